//! Field reading: numeric/bearing scanning, omission markers, multi-sample
//! averaging, plumb tokens, and per-line reading slots.
//!
//! Every read records the source offset and width of the field so later
//! diagnostics can point back at the exact span. Values live for one data
//! line only; an omitted field is `None` and each reducer decides what that
//! means for its style.

use std::f64::consts::FRAC_PI_2;

use crate::charset::{Ch, CharTable};
use crate::config::{Quantity, Settings};
use crate::diagnostics::{Reporter, Span};
use crate::error::{ReduceError, Result};
use crate::models::{ClinoType, Field};
use crate::source::Cursor;

/// One reading slot: value (None = omitted), its variance, and the source
/// span it was read from. Overwritten every line, never retained.
#[derive(Debug, Clone, Copy, Default)]
pub struct Slot {
    pub value: Option<f64>,
    pub variance: f64,
    pub offset: usize,
    pub width: usize,
}

impl Slot {
    pub fn span(&self) -> Span {
        Span::Reading {
            offset: self.offset,
            width: self.width,
        }
    }
}

/// All reading slots for the line being reduced.
#[derive(Debug, Clone, Default)]
pub struct Readings {
    pub tape: Slot,
    pub back_tape: Slot,
    pub comp: Slot,
    pub back_comp: Slot,
    pub clino: Slot,
    pub back_clino: Slot,
    pub fr_depth: Slot,
    pub to_depth: Slot,
    pub fr_count: Slot,
    pub to_count: Slot,
    pub dx: Slot,
    pub dy: Slot,
    pub dz: Slot,
    pub left: Slot,
    pub right: Slot,
    pub up: Slot,
    pub down: Slot,
}

impl Readings {
    pub fn slot(&self, field: Field) -> &Slot {
        match field {
            Field::Tape => &self.tape,
            Field::BackTape => &self.back_tape,
            Field::Comp => &self.comp,
            Field::BackComp => &self.back_comp,
            Field::Clino => &self.clino,
            Field::BackClino => &self.back_clino,
            Field::FrDepth => &self.fr_depth,
            Field::ToDepth => &self.to_depth,
            Field::FrCount => &self.fr_count,
            Field::ToCount => &self.to_count,
            Field::Dx => &self.dx,
            Field::Dy => &self.dy,
            Field::Dz => &self.dz,
            Field::Left => &self.left,
            Field::Right => &self.right,
            Field::Up => &self.up,
            Field::Down => &self.down,
        }
    }

    pub fn slot_mut(&mut self, field: Field) -> &mut Slot {
        match field {
            Field::Tape => &mut self.tape,
            Field::BackTape => &mut self.back_tape,
            Field::Comp => &mut self.comp,
            Field::BackComp => &mut self.back_comp,
            Field::Clino => &mut self.clino,
            Field::BackClino => &mut self.back_clino,
            Field::FrDepth => &mut self.fr_depth,
            Field::ToDepth => &mut self.to_depth,
            Field::FrCount => &mut self.fr_count,
            Field::ToCount => &mut self.to_count,
            Field::Dx => &mut self.dx,
            Field::Dy => &mut self.dy,
            Field::Dz => &mut self.dz,
            Field::Left => &mut self.left,
            Field::Right => &mut self.right,
            Field::Up => &mut self.up,
            Field::Down => &mut self.down,
        }
    }

    pub fn val(&self, field: Field) -> Option<f64> {
        self.slot(field).value
    }

    pub fn var(&self, field: Field) -> f64 {
        self.slot(field).variance
    }

    /// Reset all slots for a fresh line.
    pub fn clear(&mut self) {
        *self = Readings::default();
    }
}

/// The settings quantity a raw field draws its variance/calibration from.
pub fn quantity_for(field: Field) -> Quantity {
    match field {
        Field::Tape => Quantity::Length,
        Field::BackTape => Quantity::BackLength,
        Field::Comp => Quantity::Bearing,
        Field::BackComp => Quantity::BackBearing,
        Field::Clino => Quantity::Gradient,
        Field::BackClino => Quantity::BackGradient,
        Field::FrDepth | Field::ToDepth => Quantity::Depth,
        Field::FrCount | Field::ToCount => Quantity::Count,
        Field::Dx => Quantity::Dx,
        Field::Dy => Quantity::Dy,
        Field::Dz => Quantity::Dz,
        Field::Left => Quantity::Left,
        Field::Right => Quantity::Right,
        Field::Up => Quantity::Up,
        Field::Down => Quantity::Down,
    }
}

pub fn skipblanks(cur: &mut Cursor, table: &CharTable) {
    while table.is_blank(cur.ch) {
        cur.advance();
    }
}

pub fn skipline(cur: &mut Cursor, table: &CharTable) {
    while !table.is_eol(cur.ch) {
        cur.advance();
    }
}

pub fn skipword(cur: &mut Cursor, table: &CharTable) {
    while !table.is_blank(cur.ch) && !table.is_eol(cur.ch) {
        cur.advance();
    }
}

/// Read a run of alphabetic characters (a keyword or header token).
pub fn read_token(cur: &mut Cursor, table: &CharTable) -> String {
    skipblanks(cur, table);
    let mut token = String::new();
    while table.is_alpha(cur.ch) {
        token.push(cur.ch as u8 as char);
        cur.advance();
    }
    token
}

/// Read a station name: a run of name (and separator) characters.
pub fn read_station_name(
    cur: &mut Cursor,
    table: &CharTable,
    rep: &mut Reporter,
) -> Result<String> {
    skipblanks(cur, table);
    let mut name = String::new();
    while table.is_name(cur.ch) || table.is_separator(cur.ch) {
        name.push(cur.ch as u8 as char);
        cur.advance();
    }
    if name.is_empty() {
        rep.error(cur, table, Span::Token, "Expecting station name");
        return Err(ReduceError::SkipLine);
    }
    Ok(name)
}

/// Read an unsigned integer.
pub fn read_uint(cur: &mut Cursor, table: &CharTable, rep: &mut Reporter) -> Result<u32> {
    skipblanks(cur, table);
    if !table.is_digit(cur.ch) {
        rep.error(cur, table, Span::Uint, "Expecting numeric field");
        return Err(ReduceError::SkipLine);
    }
    let mut n: u32 = 0;
    while table.is_digit(cur.ch) {
        n = n.saturating_mul(10).saturating_add((cur.ch - b'0' as Ch) as u32);
        cur.advance();
    }
    Ok(n)
}

/// Try to scan one signed decimal number. Returns `None` (with the cursor
/// restored) if there is no number here.
fn try_read_number(cur: &mut Cursor, table: &CharTable) -> Option<f64> {
    skipblanks(cur, table);
    let start = cur.capture();
    let mut text = String::new();
    let mut digits = 0u32;
    if table.is_minus(cur.ch) {
        text.push('-');
        cur.advance();
    } else if table.is_plus(cur.ch) {
        cur.advance();
    }
    while table.is_digit(cur.ch) {
        text.push(cur.ch as u8 as char);
        digits += 1;
        cur.advance();
    }
    if table.is_decimal(cur.ch) {
        text.push('.');
        cur.advance();
        while table.is_digit(cur.ch) {
            text.push(cur.ch as u8 as char);
            digits += 1;
            cur.advance();
        }
    }
    if digits == 0 {
        cur.restore(start);
        return None;
    }
    // Only sign/digit/point characters were collected, so this parses.
    text.parse().ok()
}

/// Read a numeric field. When `optional`, a missing number yields `None`
/// without consuming anything; otherwise it is a recoverable error.
pub fn read_numeric(
    cur: &mut Cursor,
    table: &CharTable,
    rep: &mut Reporter,
    optional: bool,
) -> Result<Option<f64>> {
    match try_read_number(cur, table) {
        Some(v) => Ok(Some(v)),
        None if optional => Ok(None),
        None => {
            rep.error(cur, table, Span::Number, "Expecting numeric field");
            Err(ReduceError::SkipLine)
        }
    }
}

/// Read a numeric field of one or more `/`-separated samples, averaged.
/// Returns the mean and the sample count.
pub fn read_numeric_multi(
    cur: &mut Cursor,
    table: &CharTable,
    rep: &mut Reporter,
    optional: bool,
) -> Result<(Option<f64>, u32)> {
    let first = match read_numeric(cur, table, rep, optional)? {
        Some(v) => v,
        None => return Ok((None, 0)),
    };
    let mut sum = first;
    let mut count = 1u32;
    while cur.ch == b'/' as Ch {
        cur.advance();
        match read_numeric(cur, table, rep, false)? {
            Some(v) => {
                sum += v;
                count += 1;
            }
            None => unreachable!("non-optional read"),
        }
    }
    Ok((Some(sum / count as f64), count))
}

/// Quadrant bearing notation: `N30E`, `S12.5W`, or a bare cardinal letter.
/// The value is returned in the same angular unit the plain notation uses.
fn try_read_quadrant_bearing(cur: &mut Cursor, table: &CharTable) -> Option<f64> {
    skipblanks(cur, table);
    if !table.is_alpha(cur.ch) {
        return None;
    }
    let start = cur.capture();
    let first = (cur.ch as u8).to_ascii_uppercase();
    cur.advance();
    let base = match first {
        b'N' => 0.0,
        b'E' => 90.0,
        b'S' => 180.0,
        b'W' => 270.0,
        _ => {
            cur.restore(start);
            return None;
        }
    };
    let angle = match try_read_number(cur, table) {
        Some(v) => v,
        None => {
            // Bare cardinal direction.
            if table.is_blank(cur.ch) || table.is_eol(cur.ch) {
                return Some(base);
            }
            cur.restore(start);
            return None;
        }
    };
    let second = (cur.ch as u8).to_ascii_uppercase();
    let bearing = match (first, second) {
        (b'N', b'E') => angle,
        (b'N', b'W') => 360.0 - angle,
        (b'S', b'E') => 180.0 - angle,
        (b'S', b'W') => 180.0 + angle,
        (b'E', b'N') => 90.0 - angle,
        (b'E', b'S') => 90.0 + angle,
        (b'W', b'N') => 270.0 + angle,
        (b'W', b'S') => 270.0 - angle,
        _ => {
            cur.restore(start);
            return None;
        }
    };
    cur.advance();
    Some(bearing)
}

/// Read a bearing field, or consume the omit marker. Quadrant notation is
/// accepted when enabled for this instrument.
pub fn read_bearing_multi_or_omit(
    cur: &mut Cursor,
    table: &CharTable,
    rep: &mut Reporter,
    quadrants: bool,
) -> Result<(Option<f64>, u32)> {
    if quadrants {
        if let Some(bearing) = try_read_quadrant_bearing(cur, table) {
            return Ok((Some(bearing), 1));
        }
    }
    let (value, count) = read_numeric_multi(cur, table, rep, true)?;
    if value.is_some() {
        return Ok((value, count));
    }
    skipblanks(cur, table);
    if table.is_omit(cur.ch) {
        cur.advance();
        return Ok((None, 0));
    }
    rep.error(cur, table, Span::Token, "Expecting numeric field");
    Err(ReduceError::SkipLine)
}

/// Read one instrument reading into its slot, recording the source span and
/// scaling the per-reading variance for averaged multi-sample readings.
pub fn read_reading(
    cur: &mut Cursor,
    settings: &Settings,
    readings: &mut Readings,
    field: Field,
    optional: bool,
    rep: &mut Reporter,
) -> Result<()> {
    let table = &settings.table;
    skipblanks(cur, table);
    let offset = cur.here();
    let (value, count) = read_numeric_multi(cur, table, rep, optional)?;
    let width = cur.here() - offset;
    let mut variance = settings.variance[quantity_for(field)];
    if count > 1 {
        // Variance-of-mean scaling under this engine's linear-variance
        // convention.
        variance /= (count as f64).sqrt();
    }
    *readings.slot_mut(field) = Slot {
        value,
        variance,
        offset,
        width,
    };
    Ok(())
}

/// Read a compass field into its slot, honoring quadrant notation and the
/// omit marker.
pub fn read_bearing_or_omit(
    cur: &mut Cursor,
    settings: &Settings,
    readings: &mut Readings,
    field: Field,
    rep: &mut Reporter,
) -> Result<()> {
    let table = &settings.table;
    let quadrants = match field {
        Field::Comp => settings.bearing_quadrants,
        Field::BackComp => settings.backbearing_quadrants,
        _ => false,
    };
    skipblanks(cur, table);
    let offset = cur.here();
    let (value, count) = read_bearing_multi_or_omit(cur, table, rep, quadrants)?;
    let width = cur.here() - offset;
    let mut variance = settings.variance[quantity_for(field)];
    if count > 1 {
        variance /= (count as f64).sqrt();
    }
    *readings.slot_mut(field) = Slot {
        value,
        variance,
        offset,
        width,
    };
    Ok(())
}

/// Interpret a non-numeric clino field: a plumb/level token or the omit
/// marker. The returned angle is already in radians and bypasses unit
/// conversion. `None` means the field is something else entirely.
pub fn read_plumb(cur: &mut Cursor, table: &CharTable) -> Option<(f64, ClinoType)> {
    skipblanks(cur, table);
    if table.is_alpha(cur.ch) {
        let start = cur.capture();
        let token = read_token(cur, table);
        let up = token.to_ascii_uppercase();
        return match up.as_str() {
            "U" | "UP" => Some((FRAC_PI_2, ClinoType::Plumb)),
            "D" | "DOWN" => Some((-FRAC_PI_2, ClinoType::Plumb)),
            "H" | "LEVEL" => Some((0.0, ClinoType::Horiz)),
            _ => {
                cur.restore(start);
                None
            }
        };
    }
    if table.is_sign(cur.ch) {
        let start = cur.capture();
        let sign_ch = cur.ch;
        cur.advance();
        if cur.ch == b'V' as Ch || cur.ch == b'v' as Ch {
            cur.advance();
            let angle = if table.is_minus(sign_ch) {
                -FRAC_PI_2
            } else {
                FRAC_PI_2
            };
            return Some((angle, ClinoType::Plumb));
        }
        if table.is_omit(sign_ch) {
            // No clino reading: assume level with a large uncertainty.
            return Some((0.0, ClinoType::Omit));
        }
        cur.restore(start);
        return None;
    }
    if table.is_omit(cur.ch) {
        // The omit marker need not be a sign character in this grammar.
        cur.advance();
        return Some((0.0, ClinoType::Omit));
    }
    None
}
