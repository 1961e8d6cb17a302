//! Diagnostic reporting with exact source spans.
//!
//! Renders `file:line:col: severity: message`, echoes the offending source
//! line verbatim, and draws an aligned caret/tilde underline beneath the
//! span. Tab bytes are copied literally into the alignment line so the
//! caret lines up however tabs are displayed. When the error is inside an
//! included file the include chain is printed outward-in, each frame once
//! per newly active error context.

use std::io::{self, Write};

use colored::Colorize;

use crate::charset::{Ch, CharTable};
use crate::source::Cursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Note,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    fn label(self) -> &'static str {
        match self {
            Severity::Note => "note",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal error",
        }
    }
}

/// What to underline. `Token`, `Uint`, `Date` and `Number` re-scan the
/// upcoming text under the current classification rules to compute the
/// span width, consuming it.
#[derive(Debug, Clone, Copy)]
pub enum Span {
    /// No column information: echo the line without a caret.
    None,
    /// Caret at the current character.
    Column,
    /// Caret under the last `width` characters before the current one.
    Width(usize),
    /// A previously recorded reading's source extent.
    Reading { offset: usize, width: usize },
    /// Re-scan one whitespace-delimited token.
    Token,
    /// Re-scan an unsigned integer.
    Uint,
    /// Re-scan a date (digits and dots).
    Date,
    /// Re-scan a signed decimal number.
    Number,
}

/// Sink for rendered diagnostics, with severity counters.
pub struct Reporter {
    out: Box<dyn Write + Send>,
    pub warnings: u32,
    pub errors: u32,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter {
    pub fn new() -> Self {
        Reporter {
            out: Box::new(io::stderr()),
            warnings: 0,
            errors: 0,
        }
    }

    /// Capture output instead of writing to stderr (used by tests and the
    /// JSON front end).
    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Reporter {
            out,
            warnings: 0,
            errors: 0,
        }
    }

    pub fn warning(&mut self, cur: &mut Cursor, table: &CharTable, span: Span, msg: &str) {
        self.report(cur, table, Severity::Warning, span, msg);
    }

    pub fn error(&mut self, cur: &mut Cursor, table: &CharTable, span: Span, msg: &str) {
        self.report(cur, table, Severity::Error, span, msg);
    }

    /// Render one diagnostic against the cursor's innermost file.
    pub fn report(
        &mut self,
        cur: &mut Cursor,
        table: &CharTable,
        severity: Severity,
        span: Span,
        msg: &str,
    ) {
        match severity {
            Severity::Note => {}
            Severity::Warning => self.warnings += 1,
            Severity::Error | Severity::Fatal => self.errors += 1,
        }

        self.list_parent_frames(cur);

        let col_span = self.resolve_span(cur, table, span);
        let frame = cur.current();
        let mut header = format!("{}:{}", frame.path.display(), frame.line);
        if let Some((col0, _)) = col_span {
            header.push_str(&format!(":{}", col0 + 1));
        }
        let label = match severity {
            Severity::Note => severity.label().cyan(),
            Severity::Warning => severity.label().yellow(),
            Severity::Error | Severity::Fatal => severity.label().red(),
        };
        let _ = writeln!(self.out, "{}: {}: {}", header, label, msg);

        let line = frame.line_bytes(frame.line_start);
        let _ = self.out.write_all(b" ");
        let _ = self.out.write_all(line);
        let _ = self.out.write_all(b"\n");

        if let Some((col0, width)) = col_span {
            let _ = self.out.write_all(b" ");
            // Copy literal tabs from the source so the caret stays aligned
            // whatever the output device does with them.
            for &b in line.iter().take(col0) {
                let _ = self.out.write_all(if b == b'\t' { b"\t" } else { b" " });
            }
            let _ = self.out.write_all(b"^");
            for _ in 1..width.max(1) {
                let _ = self.out.write_all(b"~");
            }
            let _ = self.out.write_all(b"\n");
        }
        let _ = self.out.flush();
    }

    /// Print "In file included from ..." for each parent of the innermost
    /// frame, outermost first, unless already printed for this context.
    /// Reporting re-arms every more-inner frame so that a later error in a
    /// parent file reprints its own (shorter) ancestry.
    fn list_parent_frames(&mut self, cur: &mut Cursor) {
        let n = cur.frames().len();
        if n < 2 || cur.current().reported {
            return;
        }
        let frames = cur.frames_mut();
        for frame in &mut frames[..n - 1] {
            let _ = writeln!(
                self.out,
                "In file included from {}:{}:",
                frame.path.display(),
                frame.line
            );
            frame.reported = false;
        }
        frames[n - 1].reported = true;
    }

    /// Turn a span request into (0-based column, width), re-scanning the
    /// source where required.
    fn resolve_span(
        &mut self,
        cur: &mut Cursor,
        table: &CharTable,
        span: Span,
    ) -> Option<(usize, usize)> {
        let line_start = cur.current().line_start;
        match span {
            Span::None => None,
            Span::Column => Some((cur.here().saturating_sub(line_start), 1)),
            Span::Width(width) => {
                let col = cur.here().saturating_sub(line_start + width);
                Some((col, width))
            }
            Span::Reading { offset, width } => {
                Some((offset.saturating_sub(line_start), width.max(1)))
            }
            Span::Token | Span::Uint | Span::Date | Span::Number => {
                while table.is_blank(cur.ch) {
                    cur.advance();
                }
                let start = cur.here();
                match span {
                    Span::Token => {
                        while !table.is_blank(cur.ch) && !table.is_eol(cur.ch) {
                            cur.advance();
                        }
                    }
                    Span::Uint => {
                        while table.is_digit(cur.ch) {
                            cur.advance();
                        }
                    }
                    Span::Date => {
                        while table.is_digit(cur.ch) || cur.ch == b'.' as Ch {
                            cur.advance();
                        }
                    }
                    _ => {
                        if table.is_sign(cur.ch) {
                            cur.advance();
                        }
                        while table.is_digit(cur.ch) {
                            cur.advance();
                        }
                        if table.is_decimal(cur.ch) {
                            cur.advance();
                        }
                        while table.is_digit(cur.ch) {
                            cur.advance();
                        }
                    }
                }
                let width = cur.here() - start;
                Some((start - line_start, width.max(1)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::sync::{Arc, Mutex};
    use tempfile::NamedTempFile;

    /// Shared buffer the reporter can own while the test keeps a handle.
    #[derive(Clone, Default)]
    struct Sink(Arc<Mutex<Vec<u8>>>);

    impl Write for Sink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Sink {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn fixture(bytes: &[u8]) -> (Cursor, NamedTempFile) {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        let mut cur = Cursor::new();
        cur.push_file(f.path(), false).unwrap();
        (cur, f)
    }

    fn reporter() -> (Reporter, Sink) {
        colored::control::set_override(false);
        let sink = Sink::default();
        (Reporter::with_writer(Box::new(sink.clone())), sink)
    }

    #[test]
    fn caret_under_recorded_reading() {
        let (mut cur, _f) = fixture(b"A B 10.0 370 0\n");
        let (mut rep, sink) = reporter();
        let table = CharTable::native();
        rep.warning(
            &mut cur,
            &table,
            Span::Reading {
                offset: 9,
                width: 3,
            },
            "Suspicious compass reading",
        );
        let text = sink.contents();
        assert!(text.contains("warning: Suspicious compass reading"), "{text}");
        assert!(text.contains(" A B 10.0 370 0\n"), "{text}");
        assert!(text.contains("          ^~~\n"), "{text}");
        assert_eq!(rep.warnings, 1);
    }

    #[test]
    fn tabs_copied_into_alignment_line() {
        let (mut cur, _f) = fixture(b"A\tB\tbogus\n");
        let (mut rep, sink) = reporter();
        let table = CharTable::native();
        rep.error(
            &mut cur,
            &table,
            Span::Reading {
                offset: 4,
                width: 5,
            },
            "Expecting numeric field",
        );
        let text = sink.contents();
        assert!(text.contains(" \t \t^~~~~\n"), "{text}");
        assert_eq!(rep.errors, 1);
    }

    #[test]
    fn token_span_rescans_width() {
        let (mut cur, _f) = fixture(b"  bogus rest\n");
        let (mut rep, sink) = reporter();
        let table = CharTable::native();
        rep.error(&mut cur, &table, Span::Token, "unexpected token");
        let text = sink.contents();
        // Two leading blanks, then a five character token.
        assert!(text.contains("   ^~~~~\n"), "{text}");
    }

    #[test]
    fn include_chain_printed_once_per_context() {
        let mut inner = NamedTempFile::new().unwrap();
        inner.write_all(b"bad line\n").unwrap();
        let (mut cur, _outer) = fixture(b"include child\n");
        cur.push_file(inner.path(), false).unwrap();
        let (mut rep, sink) = reporter();
        let table = CharTable::native();
        rep.error(&mut cur, &table, Span::None, "first");
        rep.error(&mut cur, &table, Span::None, "second");
        let text = sink.contents();
        assert_eq!(text.matches("In file included from").count(), 1, "{text}");
    }
}
