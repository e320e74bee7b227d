//! Buffering strategies for partial token text (spec.md §4.C).
//!
//! Grounded in the teacher's SSE chunk parsing in
//! `providers/anthropic/src/lib.rs::parse_chat_stream_chunk`, which
//! accumulates raw bytes across multiple `data: ` frames before it has a
//! complete JSON value — the same "hold a partial tail across calls" shape
//! these buffers implement for text instead of JSON frames.

/// `Add(text) -> []emit`, `Flush() -> remainder` (spec.md §4.C). Buffers
/// preserve byte order; sentence and word buffers retain trailing partial
/// content across calls.
pub trait TextBuffer: Send {
    fn add(&mut self, text: &str) -> Vec<String>;
    fn flush(&mut self) -> Option<String>;
}

/// Emits every character immediately; `flush` is always empty.
#[derive(Default)]
pub struct CharacterBuffer;

impl TextBuffer for CharacterBuffer {
    fn add(&mut self, text: &str) -> Vec<String> {
        text.chars().map(|c| c.to_string()).collect()
    }

    fn flush(&mut self) -> Option<String> {
        None
    }
}

/// Splits on a delimiter (default whitespace), carrying a trailing partial
/// word across calls.
pub struct WordBuffer {
    delimiter: char,
    pending: String,
}

impl WordBuffer {
    pub fn new(delimiter: char) -> Self {
        Self { delimiter, pending: String::new() }
    }
}

impl Default for WordBuffer {
    fn default() -> Self {
        Self::new(' ')
    }
}

impl TextBuffer for WordBuffer {
    fn add(&mut self, text: &str) -> Vec<String> {
        self.pending.push_str(text);
        let mut emitted = Vec::new();
        while let Some(idx) = self.pending.find(self.delimiter) {
            let word: String = self.pending.drain(..=idx).collect();
            emitted.push(word);
        }
        emitted
    }

    fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}

/// Flushes on `.`, `!`, `?`, trimming a following space (spec.md §4.C).
#[derive(Default)]
pub struct SentenceBuffer {
    pending: String,
}

impl TextBuffer for SentenceBuffer {
    fn add(&mut self, text: &str) -> Vec<String> {
        self.pending.push_str(text);
        let mut emitted = Vec::new();
        loop {
            let Some(idx) = self.pending.find(['.', '!', '?']) else { break };
            let mut rest = self.pending.split_off(idx + 1);
            if rest.starts_with(' ') {
                rest.remove(0);
            }
            let sentence = std::mem::replace(&mut self.pending, rest);
            emitted.push(sentence);
        }
        emitted
    }

    fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}

/// Splits on `\n`, carrying a trailing partial line across calls.
#[derive(Default)]
pub struct LineBuffer {
    pending: String,
}

impl TextBuffer for LineBuffer {
    fn add(&mut self, text: &str) -> Vec<String> {
        self.pending.push_str(text);
        let mut emitted = Vec::new();
        while let Some(idx) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=idx).collect();
            emitted.push(line);
        }
        emitted
    }

    fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}
