//! Byte cursor over a stack of open inputs.
//!
//! The scanner sees a single "current character" drawn from the innermost
//! open file. Each open file tracks its own line number and line-start
//! offset so diagnostics can re-read the offending line; pushing an include
//! saves the includer's current character, and popping restores it. Files
//! are slurped into memory up front, so the only I/O failure mode is at
//! open/read time.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::charset::{Ch, CharTable, END_OF_INPUT};
use crate::error::{ReduceError, Result};

/// Saved cursor state for re-scanning an already-consumed token.
#[derive(Debug, Clone, Copy)]
pub struct Position {
    offset: usize,
    ch: Ch,
}

/// One open input file.
#[derive(Debug)]
pub struct SourceFrame {
    pub path: PathBuf,
    data: Vec<u8>,
    /// Offset of the byte after the current character.
    pos: usize,
    pub line: u32,
    /// Offset of the first character of the current line.
    pub line_start: usize,
    /// Whether this frame's include ancestry has been printed for the
    /// currently active error context.
    pub reported: bool,
    /// The includer's current character, reinstated when this frame pops.
    saved_ch: Ch,
}

impl SourceFrame {
    /// The bytes of the line starting at `line_start`, without its ending.
    pub fn line_bytes(&self, start: usize) -> &[u8] {
        let tail = &self.data[start.min(self.data.len())..];
        let end = tail
            .iter()
            .position(|&b| b == b'\n' || b == b'\r' || b == 0x1a)
            .unwrap_or(tail.len());
        &tail[..end]
    }
}

/// The cursor: a current character plus the stack of open inputs.
#[derive(Debug)]
pub struct Cursor {
    frames: Vec<SourceFrame>,
    /// Current character; [`END_OF_INPUT`] once the innermost file is done.
    pub ch: Ch,
}

impl Default for Cursor {
    fn default() -> Self {
        Self::new()
    }
}

impl Cursor {
    pub fn new() -> Self {
        Cursor {
            frames: Vec::new(),
            ch: END_OF_INPUT,
        }
    }

    /// Open a file as the new innermost input and prime the first
    /// character. `skip_bom` applies to the native grammar only.
    pub fn push_file(&mut self, path: &Path, skip_bom: bool) -> Result<()> {
        let data = fs::read(path).map_err(|e| ReduceError::io(path, e))?;
        debug!(path = %path.display(), bytes = data.len(), "opened survey file");
        let mut frame = SourceFrame {
            path: path.to_path_buf(),
            data,
            pos: 0,
            line: 1,
            line_start: 0,
            reported: false,
            saved_ch: self.ch,
        };
        if skip_bom && frame.data.starts_with(&[0xef, 0xbb, 0xbf]) {
            frame.pos = 3;
            frame.line_start = 3;
        }
        self.frames.push(frame);
        self.advance();
        Ok(())
    }

    /// Close the innermost input, restoring the includer's character.
    pub fn pop_file(&mut self) {
        let frame = self.frames.pop().expect("pop_file with no open file");
        self.ch = frame.saved_ch;
        debug!(path = %frame.path.display(), "closed survey file");
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn current(&self) -> &SourceFrame {
        self.frames.last().expect("cursor has no open file")
    }

    pub fn current_mut(&mut self) -> &mut SourceFrame {
        self.frames.last_mut().expect("cursor has no open file")
    }

    /// All open frames, outermost first.
    pub fn frames(&self) -> &[SourceFrame] {
        &self.frames
    }

    pub fn frames_mut(&mut self) -> &mut [SourceFrame] {
        &mut self.frames
    }

    /// Read the next character from the innermost file.
    pub fn advance(&mut self) {
        let frame = self.frames.last_mut().expect("advance with no open file");
        if frame.pos < frame.data.len() {
            self.ch = frame.data[frame.pos] as Ch;
            frame.pos += 1;
        } else {
            self.ch = END_OF_INPUT;
            frame.pos = frame.data.len() + 1;
        }
    }

    /// Offset of the current character in the innermost file.
    pub fn here(&self) -> usize {
        let frame = self.current();
        frame.pos.saturating_sub(1).min(frame.data.len())
    }

    /// Offset just past the current character (where the next read starts).
    pub fn offset(&self) -> usize {
        let frame = self.current();
        frame.pos.min(frame.data.len())
    }

    pub fn at_eof(&self) -> bool {
        self.ch == END_OF_INPUT
    }

    /// Save (offset, current character) for a later re-scan.
    pub fn capture(&self) -> Position {
        Position {
            offset: self.current().pos,
            ch: self.ch,
        }
    }

    /// Reinstate a previously captured position.
    pub fn restore(&mut self, pos: Position) {
        self.ch = pos.ch;
        self.current_mut().pos = pos.offset;
    }

    /// Consume a line break, counting intermixed line-ending conventions
    /// correctly: a run of two *different* break characters is one break,
    /// two identical ones are two. The caller has already checked the
    /// current character is a line break.
    pub fn consume_eol(&mut self, table: &CharTable) {
        let mut eolchar = self.ch;
        {
            let frame = self.current_mut();
            frame.line += 1;
        }
        while self.ch != END_OF_INPUT {
            self.advance();
            if self.ch == eolchar || !table.is_eol(self.ch) {
                break;
            }
            if self.ch == b'\n' as Ch {
                eolchar = self.ch;
            }
        }
        let start = self.here();
        self.current_mut().line_start = start;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn cursor_over(bytes: &[u8], skip_bom: bool) -> (Cursor, NamedTempFile) {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        let mut cur = Cursor::new();
        cur.push_file(f.path(), skip_bom).unwrap();
        (cur, f)
    }

    fn count_lines(bytes: &[u8]) -> u32 {
        let table = CharTable::native();
        let (mut cur, _f) = cursor_over(bytes, false);
        while !cur.at_eof() {
            if table.is_eol(cur.ch) {
                cur.consume_eol(&table);
            } else {
                cur.advance();
            }
        }
        cur.current().line
    }

    #[test]
    fn crlf_counts_as_one_break() {
        assert_eq!(count_lines(b"a\r\nb\r\nc"), 3);
    }

    #[test]
    fn lf_lf_counts_as_two_breaks() {
        assert_eq!(count_lines(b"a\n\nb"), 3);
    }

    #[test]
    fn mixed_conventions() {
        // LF file with a stray CRLF line in the middle.
        assert_eq!(count_lines(b"a\nb\r\nc\n"), 4);
    }

    #[test]
    fn capture_restore_rescans_token() {
        let (mut cur, _f) = cursor_over(b"UP 5.0", false);
        let pos = cur.capture();
        assert_eq!(cur.ch, b'U' as Ch);
        cur.advance();
        cur.advance();
        assert_eq!(cur.ch, b' ' as Ch);
        cur.restore(pos);
        assert_eq!(cur.ch, b'U' as Ch);
        cur.advance();
        assert_eq!(cur.ch, b'P' as Ch);
    }

    #[test]
    fn bom_skipped_for_native() {
        let (cur, _f) = cursor_over(b"\xef\xbb\xbfA B 1 2 3", true);
        assert_eq!(cur.ch, b'A' as Ch);
        assert_eq!(cur.current().line_start, 3);
    }

    #[test]
    fn bom_kept_when_not_native() {
        let (cur, _f) = cursor_over(b"\xef\xbb\xbfA", false);
        assert_eq!(cur.ch, 0xef);
    }

    #[test]
    fn include_restores_parent_character()  {
        let (mut cur, _f) = cursor_over(b"xy", false);
        assert_eq!(cur.ch, b'x' as Ch);
        let mut inner = NamedTempFile::new().unwrap();
        inner.write_all(b"q").unwrap();
        cur.push_file(inner.path(), false).unwrap();
        assert_eq!(cur.ch, b'q' as Ch);
        assert_eq!(cur.depth(), 2);
        cur.advance();
        assert!(cur.at_eof());
        cur.pop_file();
        assert_eq!(cur.ch, b'x' as Ch);
        assert_eq!(cur.depth(), 1);
    }

    #[test]
    fn line_bytes_stop_at_any_ending() {
        let (cur, _f) = cursor_over(b"abc\r\ndef", false);
        assert_eq!(cur.current().line_bytes(0), b"abc");
        assert_eq!(cur.current().line_bytes(5), b"def");
    }

    #[test]
    fn missing_file_is_fatal_io() {
        let mut cur = Cursor::new();
        let err = cur
            .push_file(Path::new("/nonexistent/survey.svx"), false)
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
