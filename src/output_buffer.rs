//! Decodes raw PTY byte chunks into a bounded ring of completed lines.
//!
//! A line-buffering state machine: `\n` flushes, `\r` discards, `\b` pops a
//! character, `\t` expands to the next multiple of 8, other C0/C1 control
//! bytes drop.

use std::collections::VecDeque;

use regex::Regex;

/// Bounded ring of completed lines plus the in-progress current line.
pub struct OutputBuffer {
    capacity: usize,
    lines: VecDeque<String>,
    current_line: String,
}

impl OutputBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            lines: VecDeque::new(),
            current_line: String::new(),
        }
    }

    /// Decode `data` as UTF-8, replacing only the invalid byte sequences
    /// with U+FFFD, and feed the result through the line-buffering state
    /// machine.
    pub fn append(&mut self, data: &[u8]) {
        let text = String::from_utf8_lossy(data).into_owned();
        for ch in text.chars() {
            self.push_char(ch);
        }
    }

    fn push_char(&mut self, ch: char) {
        match ch {
            '\n' => self.flush_current_line(),
            '\r' => self.current_line.clear(),
            '\u{8}' => {
                self.current_line.pop();
            }
            '\t' => {
                let spaces_needed = 8 - (self.current_line.chars().count() % 8);
                self.current_line.push_str(&" ".repeat(spaces_needed));
            }
            c if is_dropped_control(c) => {}
            c => self.current_line.push(c),
        }
    }

    fn flush_current_line(&mut self) {
        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        let line = std::mem::take(&mut self.current_line);
        self.lines.push_back(line);
    }

    /// Force the in-progress line into the ring even without a trailing
    /// newline (used on PTY close to flush trailing partial output).
    pub fn flush(&mut self) {
        if !self.current_line.is_empty() {
            self.flush_current_line();
        }
    }

    fn materialize(&self, count: Option<usize>) -> Vec<String> {
        let mut all: Vec<String> = self.lines.iter().cloned().collect();
        if !self.current_line.is_empty() {
            all.push(self.current_line.clone());
        }
        match count {
            Some(n) if n < all.len() => all.split_off(all.len() - n),
            _ => all,
        }
    }

    /// Last `count` lines, ANSI escapes retained.
    pub fn last_lines_raw(&self, count: usize) -> Vec<String> {
        self.materialize(Some(count))
    }

    /// Last `count` lines with ANSI CSI/OSC sequences stripped.
    pub fn last_lines_plain(&self, count: usize) -> Vec<String> {
        self.materialize(Some(count))
            .into_iter()
            .map(|line| strip_ansi(&line))
            .collect()
    }

    /// Search both the raw and plain forms of every retained line.
    pub fn search(&self, pattern: &str) -> Vec<(usize, String)> {
        let regex = Regex::new(&format!("(?i){pattern}"))
            .unwrap_or_else(|_| Regex::new(&regex::escape(pattern)).expect("escaped literal"));
        self.materialize(None)
            .into_iter()
            .enumerate()
            .filter(|(_, line)| regex.is_match(line) || regex.is_match(&strip_ansi(line)))
            .collect()
    }

    pub fn line_count(&self) -> usize {
        self.lines.len() + usize::from(!self.current_line.is_empty())
    }

    pub fn current_line(&self) -> &str {
        &self.current_line
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.current_line.clear();
    }
}

fn is_dropped_control(c: char) -> bool {
    let code = c as u32;
    (code < 0x20 && c != '\n' && c != '\r' && c != '\t' && c != '\u{8}')
        || (0x7f..=0x9f).contains(&code)
}

fn strip_ansi(line: &str) -> String {
    String::from_utf8_lossy(&strip_ansi_escapes::strip(line.as_bytes())).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newline_flushes_current_line_into_ring() {
        let mut buffer = OutputBuffer::new(10);
        buffer.append(b"hello\n");
        assert_eq!(buffer.last_lines_raw(1), vec!["hello".to_string()]);
        assert_eq!(buffer.current_line(), "");
    }

    #[test]
    fn carriage_return_discards_current_line() {
        let mut buffer = OutputBuffer::new(10);
        buffer.append(b"garbage\rreal");
        assert_eq!(buffer.current_line(), "real");
    }

    #[test]
    fn backspace_pops_one_character() {
        let mut buffer = OutputBuffer::new(10);
        buffer.append(b"abc\x08");
        assert_eq!(buffer.current_line(), "ab");
    }

    #[test]
    fn tab_expands_to_next_multiple_of_eight() {
        let mut buffer = OutputBuffer::new(10);
        buffer.append(b"ab\t");
        assert_eq!(buffer.current_line().len(), 8);
    }

    #[test]
    fn ring_discards_oldest_on_overflow() {
        let mut buffer = OutputBuffer::new(2);
        buffer.append(b"one\ntwo\nthree\n");
        assert_eq!(buffer.last_lines_raw(10), vec!["two", "three"]);
    }

    #[test]
    fn plain_strips_ansi_csi_but_raw_retains_it() {
        let mut buffer = OutputBuffer::new(10);
        buffer.append(b"\x1b[31mred\x1b[0m\n");
        let raw = buffer.last_lines_raw(1);
        let plain = buffer.last_lines_plain(1);
        assert!(raw[0].contains("\x1b["));
        assert_eq!(plain[0], "red");
    }

    #[test]
    fn plain_of_strip_equals_strip_of_plain_roundtrip_property() {
        let mut buffer = OutputBuffer::new(10);
        buffer.append(b"  \x1b[1mbold\x1b[0m  \n");
        let plain = buffer.last_lines_plain(1)[0].clone();
        assert_eq!(strip_ansi(plain.trim()), plain.trim());
    }

    #[test]
    fn search_matches_raw_and_plain_forms() {
        let mut buffer = OutputBuffer::new(10);
        buffer.append(b"\x1b[31merror: boom\x1b[0m\n");
        let results = buffer.search("error");
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn invalid_utf8_is_replaced_without_panicking() {
        let mut buffer = OutputBuffer::new(10);
        buffer.append(&[0xff, 0xfe, b'\n']);
        assert_eq!(buffer.line_count(), 1);
    }

    #[test]
    fn valid_multi_byte_char_ahead_of_a_split_boundary_survives_intact() {
        // Simulates a PTY read() splitting a multi-byte UTF-8 sequence
        // across two chunks: the emoji here is a complete 4-byte sequence
        // that must not be corrupted by the incomplete sequence trailing it.
        let mut buffer = OutputBuffer::new(10);
        let full = "\u{1F600}\u{2500}line\n".as_bytes().to_vec();
        let (first, second) = full.split_at(4);
        buffer.append(first);
        buffer.append(second);
        let line = &buffer.last_lines_raw(1)[0];
        assert!(line.starts_with('\u{1F600}'), "line was: {line:?}");
        assert!(line.ends_with("line"));
    }

    #[test]
    fn flush_pushes_trailing_partial_line() {
        let mut buffer = OutputBuffer::new(10);
        buffer.append(b"no newline yet");
        assert_eq!(buffer.line_count(), 1);
        buffer.flush();
        assert_eq!(buffer.last_lines_raw(1), vec!["no newline yet".to_string()]);
    }
}
