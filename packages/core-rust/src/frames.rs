//! Recovery of message boundaries from unframed byte streams.
//!
//! Stream transports carry no length prefix; the wire is a concatenation of
//! top-level JSON documents, possibly split or coalesced arbitrarily by the
//! transport. [`FrameScanner`] tracks brace depth across feeds, skipping
//! braces inside string literals (including escaped quotes), and hands back
//! one complete document at a time.

use std::collections::VecDeque;

/// Incremental splitter turning a byte stream into complete JSON documents.
///
/// Bytes outside any document (stray whitespace or garbage between frames)
/// are discarded. A partial document is buffered until its closing brace
/// arrives.
#[derive(Debug, Default)]
pub struct FrameScanner {
    /// Accumulates the document currently being scanned.
    pending: String,
    /// Completed documents not yet taken by the caller.
    ready: VecDeque<String>,
    depth: usize,
    in_document: bool,
    in_string: bool,
    escaped: bool,
}

impl FrameScanner {
    /// Creates an empty scanner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk of received text into the scanner.
    ///
    /// Completed documents become available through [`Self::take_document`].
    pub fn feed(&mut self, chunk: &str) {
        for ch in chunk.chars() {
            if !self.in_document {
                if ch == '{' {
                    self.in_document = true;
                    self.depth = 1;
                    self.pending.push(ch);
                }
                continue;
            }

            self.pending.push(ch);
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if ch == '\\' {
                    self.escaped = true;
                } else if ch == '"' {
                    self.in_string = false;
                }
                continue;
            }

            match ch {
                '"' => self.in_string = true,
                '{' => self.depth += 1,
                '}' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        self.ready.push_back(std::mem::take(&mut self.pending));
                        self.in_document = false;
                    }
                }
                _ => {}
            }
        }
    }

    /// Removes and returns the oldest complete document, if any.
    pub fn take_document(&mut self) -> Option<String> {
        self.ready.pop_front()
    }

    /// `true` when at least one complete document is waiting.
    #[must_use]
    pub fn has_document(&self) -> bool {
        !self.ready.is_empty()
    }
}
