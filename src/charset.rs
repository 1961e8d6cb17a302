//! Per-byte character classification, swappable per grammar.
//!
//! Each input grammar installs its own 257-entry table: one slot per byte
//! value plus a reserved slot for end-of-input. The scanner consults the
//! table for every classification decision, so switching grammar is just
//! switching tables.

/// Character value as seen by the scanner: a byte, or [`END_OF_INPUT`].
pub type Ch = u16;

/// Reserved pseudo-character for end of input (the 257th table slot).
pub const END_OF_INPUT: Ch = 256;

pub const BLANK: u16 = 1 << 0;
pub const EOL: u16 = 1 << 1;
pub const NAME: u16 = 1 << 2;
pub const DECIMAL: u16 = 1 << 3;
pub const MINUS: u16 = 1 << 4;
pub const PLUS: u16 = 1 << 5;
pub const OMIT: u16 = 1 << 6;
pub const COMMENT: u16 = 1 << 7;
pub const KEYWORD: u16 = 1 << 8;
pub const SEPARATOR: u16 = 1 << 9;

/// Classification table for one grammar.
#[derive(Clone)]
pub struct CharTable {
    flags: [u16; 257],
}

impl CharTable {
    fn empty() -> Self {
        let mut flags = [0u16; 257];
        flags[END_OF_INPUT as usize] = EOL;
        // Line endings behave identically in every grammar. Ctrl-Z ends a
        // line too so old DOS text files are handled.
        flags[b'\n' as usize] |= EOL;
        flags[b'\r' as usize] |= EOL;
        flags[0x1a] |= EOL;
        CharTable { flags }
    }

    /// Table for the native survey grammar.
    pub fn native() -> Self {
        let mut t = Self::empty();
        for ch in b'0'..=b'9' {
            t.flags[ch as usize] |= NAME;
        }
        for ch in b'A'..=b'Z' {
            t.flags[ch as usize] |= NAME;
        }
        for ch in b'a'..=b'z' {
            t.flags[ch as usize] |= NAME;
        }
        t.flags[b'\t' as usize] |= BLANK;
        t.flags[b' ' as usize] |= BLANK;
        t.flags[b',' as usize] |= BLANK;
        t.flags[b';' as usize] |= COMMENT;
        t.flags[b'*' as usize] |= KEYWORD;
        t.flags[b'_' as usize] |= NAME;
        t.flags[b'.' as usize] |= SEPARATOR | DECIMAL;
        t.flags[b'-' as usize] |= OMIT | NAME | MINUS;
        t.flags[b'+' as usize] |= PLUS;
        t
    }

    /// Table for Compass survey data (.dat) files: almost every printable
    /// byte can appear in a station name.
    pub fn compass_dat() -> Self {
        let mut t = Self::empty();
        for ch in 33u16..127 {
            t.flags[ch as usize] |= NAME;
        }
        for ch in 128u16..256 {
            t.flags[ch as usize] |= NAME;
        }
        t.flags[b'\t' as usize] |= BLANK;
        t.flags[b' ' as usize] |= BLANK;
        t.flags[b'.' as usize] |= DECIMAL;
        t.flags[b'-' as usize] |= MINUS;
        t.flags[b'+' as usize] |= PLUS;
        t
    }

    /// Table for Compass project (.mak) files: as .dat, but the directive
    /// punctuation must not be swallowed into names.
    pub fn compass_mak() -> Self {
        let mut t = Self::compass_dat();
        t.flags[b'[' as usize] = 0;
        t.flags[b',' as usize] = 0;
        t.flags[b';' as usize] = 0;
        t
    }

    #[inline]
    pub fn has(&self, ch: Ch, flag: u16) -> bool {
        self.flags[ch as usize] & flag != 0
    }

    #[inline]
    pub fn is_blank(&self, ch: Ch) -> bool {
        self.has(ch, BLANK)
    }

    #[inline]
    pub fn is_eol(&self, ch: Ch) -> bool {
        self.has(ch, EOL)
    }

    #[inline]
    pub fn is_name(&self, ch: Ch) -> bool {
        self.has(ch, NAME)
    }

    #[inline]
    pub fn is_decimal(&self, ch: Ch) -> bool {
        self.has(ch, DECIMAL)
    }

    #[inline]
    pub fn is_minus(&self, ch: Ch) -> bool {
        self.has(ch, MINUS)
    }

    #[inline]
    pub fn is_plus(&self, ch: Ch) -> bool {
        self.has(ch, PLUS)
    }

    #[inline]
    pub fn is_sign(&self, ch: Ch) -> bool {
        self.has(ch, MINUS | PLUS)
    }

    #[inline]
    pub fn is_omit(&self, ch: Ch) -> bool {
        self.has(ch, OMIT)
    }

    #[inline]
    pub fn is_comment(&self, ch: Ch) -> bool {
        self.has(ch, COMMENT)
    }

    #[inline]
    pub fn is_keyword(&self, ch: Ch) -> bool {
        self.has(ch, KEYWORD)
    }

    #[inline]
    pub fn is_separator(&self, ch: Ch) -> bool {
        self.has(ch, SEPARATOR)
    }

    /// A data line starts with a name character.
    #[inline]
    pub fn is_data(&self, ch: Ch) -> bool {
        self.is_name(ch)
    }

    #[inline]
    pub fn is_digit(&self, ch: Ch) -> bool {
        (b'0' as Ch..=b'9' as Ch).contains(&ch)
    }

    #[inline]
    pub fn is_alpha(&self, ch: Ch) -> bool {
        (b'A' as Ch..=b'Z' as Ch).contains(&ch) || (b'a' as Ch..=b'z' as Ch).contains(&ch)
    }
}

impl std::fmt::Debug for CharTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CharTable").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_table_classes() {
        let t = CharTable::native();
        assert!(t.is_blank(b',' as Ch));
        assert!(t.is_comment(b';' as Ch));
        assert!(t.is_keyword(b'*' as Ch));
        assert!(t.is_omit(b'-' as Ch));
        assert!(t.is_name(b'-' as Ch));
        assert!(t.is_eol(END_OF_INPUT));
        assert!(t.is_eol(0x1a));
        assert!(t.is_decimal(b'.' as Ch));
        assert!(t.is_separator(b'.' as Ch));
    }

    #[test]
    fn compass_tables_differ_on_directive_punctuation() {
        let dat = CharTable::compass_dat();
        let mak = CharTable::compass_mak();
        assert!(dat.is_name(b'[' as Ch));
        assert!(!mak.is_name(b'[' as Ch));
        assert!(dat.is_name(b',' as Ch));
        assert!(!mak.is_name(b',' as Ch));
        // No omit marker in Compass data: 999.0 plays that role instead.
        assert!(!dat.is_omit(b'-' as Ch));
    }
}
