//! Reduction settings: unit, calibration and variance tables, the active
//! ordering and style, and inference flags.
//!
//! Settings form a stack of value-semantics frames: pushing clones the
//! current frame, popping restores the previous one. Format dispatch pushes
//! a transient frame around Compass files; the native grammar's settings
//! commands are owned by an external collaborator, which mutates the top
//! frame through [`SettingsStack::top_mut`].

use crate::charset::CharTable;
use crate::constants::{
    rad, sqrd, DEFAULT_SD_ANGLE_DEG, DEFAULT_SD_COUNT, DEFAULT_SD_DEPTH, DEFAULT_SD_LENGTH,
    DEFAULT_SD_OFFSET, DEFAULT_SD_PLUMB_DEG, DEFAULT_SD_POSITION,
};
use crate::date::SurveyDate;
use crate::models::{Reading, Style};

/// A measured quantity with its own unit, calibration and variance entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Length,
    BackLength,
    Bearing,
    BackBearing,
    Gradient,
    BackGradient,
    Depth,
    Dx,
    Dy,
    Dz,
    Count,
    Left,
    Right,
    Up,
    Down,
    /// Uncertainty of each station position itself.
    Position,
    /// Uncertainty of a plumbed leg's verticality.
    Plumb,
    /// Uncertainty of a levelled leg's horizontality.
    Level,
}

const QUANTITY_COUNT: usize = 18;

impl Quantity {
    fn index(self) -> usize {
        match self {
            Quantity::Length => 0,
            Quantity::BackLength => 1,
            Quantity::Bearing => 2,
            Quantity::BackBearing => 3,
            Quantity::Gradient => 4,
            Quantity::BackGradient => 5,
            Quantity::Depth => 6,
            Quantity::Dx => 7,
            Quantity::Dy => 8,
            Quantity::Dz => 9,
            Quantity::Count => 10,
            Quantity::Left => 11,
            Quantity::Right => 12,
            Quantity::Up => 13,
            Quantity::Down => 14,
            Quantity::Position => 15,
            Quantity::Plumb => 16,
            Quantity::Level => 17,
        }
    }

    /// Angular quantities default to degrees; everything else to metres.
    pub fn is_angular(self) -> bool {
        matches!(
            self,
            Quantity::Bearing
                | Quantity::BackBearing
                | Quantity::Gradient
                | Quantity::BackGradient
                | Quantity::Plumb
                | Quantity::Level
        )
    }
}

/// Per-quantity table of reals, indexed directly by the quantity variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantityMap([f64; QUANTITY_COUNT]);

impl QuantityMap {
    pub fn filled(value: f64) -> Self {
        QuantityMap([value; QUANTITY_COUNT])
    }
}

impl std::ops::Index<Quantity> for QuantityMap {
    type Output = f64;
    fn index(&self, q: Quantity) -> &f64 {
        &self.0[q.index()]
    }
}

impl std::ops::IndexMut<Quantity> for QuantityMap {
    fn index_mut(&mut self, q: Quantity) -> &mut f64 {
        &mut self.0[q.index()]
    }
}

/// How to resolve magnetic declination for this survey.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Declination {
    /// Explicit value in radians, already including any grid convergence.
    Explicit(f64),
    /// Look up a geomagnetic model at this position for the survey date.
    Auto {
        lat_deg: f64,
        lon_deg: f64,
        alt_m: f64,
    },
}

/// Which implicit interpretations of the data are enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InferFlags {
    /// Readings within tolerance of +/-90 degrees become plumbs.
    pub plumbs: bool,
    /// Zero-length legs become station equates.
    pub equates: bool,
    /// Station export rules are inferred (kept for the settings
    /// collaborator; the reducer itself never reads it).
    pub exports: bool,
}

/// One settings frame. Cloned wholesale on push, so a retained older frame
/// can never alias the current one.
#[derive(Debug, Clone)]
pub struct Settings {
    pub style: Style,
    pub ordering: Vec<Reading>,
    pub table: CharTable,
    /// Multiplier applied to a raw reading to get internal units
    /// (metres/radians).
    pub units: QuantityMap,
    /// Zero error, subtracted after unit conversion.
    pub zero: QuantityMap,
    /// Scale factor applied after zero correction.
    pub scale: QuantityMap,
    /// Variance of a single reading, in internal units.
    pub variance: QuantityMap,
    pub infer: InferFlags,
    /// Clino fields are percentage gradients rather than angles.
    pub clino_percent: bool,
    pub backclino_percent: bool,
    /// Bearings may use quadrant notation (`N30E`).
    pub bearing_quadrants: bool,
    pub backbearing_quadrants: bool,
    pub declination: Declination,
    /// Grid convergence subtracted from looked-up declinations, radians.
    pub convergence: f64,
    /// Resolved declination for the current survey date. Also caches the
    /// "no date, assumed zero" answer so that the missing-date warning is
    /// only issued once per survey.
    pub declination_cache: Option<f64>,
    pub date: Option<SurveyDate>,
}

impl Settings {
    /// Defaults for the native grammar: metres, degrees, BCRA-grade-5
    /// variances, classic five-field ordering, nothing inferred.
    pub fn native() -> Self {
        let mut units = QuantityMap::filled(1.0);
        for q in [
            Quantity::Bearing,
            Quantity::BackBearing,
            Quantity::Gradient,
            Quantity::BackGradient,
            Quantity::Plumb,
            Quantity::Level,
        ] {
            units[q] = rad(1.0);
        }

        let mut variance = QuantityMap::filled(sqrd(DEFAULT_SD_LENGTH));
        variance[Quantity::Position] = sqrd(DEFAULT_SD_POSITION);
        variance[Quantity::Count] = sqrd(DEFAULT_SD_COUNT);
        variance[Quantity::Depth] = sqrd(DEFAULT_SD_DEPTH);
        for q in [Quantity::Dx, Quantity::Dy, Quantity::Dz] {
            variance[q] = sqrd(DEFAULT_SD_OFFSET);
        }
        for q in [
            Quantity::Bearing,
            Quantity::BackBearing,
            Quantity::Gradient,
            Quantity::BackGradient,
        ] {
            variance[q] = sqrd(rad(DEFAULT_SD_ANGLE_DEG));
        }
        variance[Quantity::Plumb] = sqrd(rad(DEFAULT_SD_PLUMB_DEG));
        variance[Quantity::Level] = sqrd(rad(DEFAULT_SD_PLUMB_DEG));

        Settings {
            style: Style::Normal,
            ordering: vec![
                Reading::From,
                Reading::To,
                Reading::Tape,
                Reading::Comp,
                Reading::Clino,
            ],
            table: CharTable::native(),
            units,
            zero: QuantityMap::filled(0.0),
            scale: QuantityMap::filled(1.0),
            variance,
            infer: InferFlags::default(),
            clino_percent: false,
            backclino_percent: false,
            bearing_quadrants: false,
            backbearing_quadrants: false,
            declination: Declination::Explicit(0.0),
            convergence: 0.0,
            declination_cache: None,
            date: None,
        }
    }
}

/// Stack of settings frames mirroring file/block nesting.
#[derive(Debug)]
pub struct SettingsStack {
    frames: Vec<Settings>,
}

impl SettingsStack {
    pub fn new(initial: Settings) -> Self {
        SettingsStack {
            frames: vec![initial],
        }
    }

    pub fn top(&self) -> &Settings {
        self.frames.last().expect("settings stack never empty")
    }

    pub fn top_mut(&mut self) -> &mut Settings {
        self.frames.last_mut().expect("settings stack never empty")
    }

    /// Push a copy of the current frame and return a mutable handle to it.
    pub fn push(&mut self) -> &mut Settings {
        let copy = self.top().clone();
        self.frames.push(copy);
        self.top_mut()
    }

    /// Pop the current frame, restoring the one beneath. The base frame
    /// cannot be popped.
    pub fn pop(&mut self) {
        debug_assert!(self.frames.len() > 1, "popped the base settings frame");
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}
