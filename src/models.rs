//! Core data types for survey reduction.
//!
//! Defines the reading kinds that make up a data-line ordering, the survey
//! styles, and the records emitted to the network-adjustment collaborator:
//! legs with full covariance, passage cross-sections, and no-geometry links.

use serde::{Deserialize, Serialize};

/// One entry in a data-line ordering: what the next textual field on the
/// line means. Supplied per style/grammar by the settings layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reading {
    /// From-station name.
    From,
    /// To-station name.
    To,
    /// Chained station name: previous To becomes From.
    Station,
    /// Leg direction token, `F` or `B`.
    Dir,
    Tape,
    BackTape,
    Comp,
    BackComp,
    Clino,
    BackClino,
    FrDepth,
    ToDepth,
    /// Running depth column: previous value becomes the from-depth.
    Depth,
    /// Single depth-change column.
    DepthChange,
    /// Running topofil counter: previous value becomes the from-count.
    Count,
    FrCount,
    ToCount,
    Dx,
    Dy,
    Dz,
    Left,
    Right,
    Up,
    Down,
    /// Compass DAT bearing column: 999.0 means omitted.
    CompassDatComp,
    CompassDatBackComp,
    /// Compass DAT clino column: 999.0 means omitted.
    CompassDatClino,
    CompassDatBackClino,
    CompassDatLeft,
    CompassDatRight,
    CompassDatUp,
    CompassDatDown,
    /// Compass DAT `#|...#` flags field.
    CompassDatFlags,
    /// Skip one whitespace-delimited word.
    Ignore,
    /// Skip the rest of the line.
    IgnoreAll,
    /// Skip the rest of the line, then behave as `Newline`.
    IgnoreAllAndNewLine,
    /// Line break within a multi-line ordering.
    Newline,
}

/// The raw field a reading kind stores into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Tape,
    BackTape,
    Comp,
    BackComp,
    Clino,
    BackClino,
    FrDepth,
    ToDepth,
    FrCount,
    ToCount,
    Dx,
    Dy,
    Dz,
    Left,
    Right,
    Up,
    Down,
}

/// How a vertical-angle field was given; selects the reduction formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClinoType {
    /// No clino reading: assume level with a large uncertainty.
    Omit,
    /// A numeric angle.
    Reading,
    /// An explicit plumb token (`UP`, `DOWN`, `+V`, `-V`).
    Plumb,
    /// A numeric angle close enough to +/-90 degrees to treat as a plumb.
    InferPlumb,
    /// An explicit `LEVEL`/`H` token.
    Horiz,
}

impl ClinoType {
    pub fn is_plumb(self) -> bool {
        matches!(self, ClinoType::Plumb | ClinoType::InferPlumb)
    }
}

/// Active survey style: decides which reducer a completed line feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Style {
    Normal,
    Diving,
    CylPolar,
    Cartesian,
    Passage,
    NoSurvey,
    /// Data present but deliberately discarded.
    Ignore,
}

/// Opaque handle for a resolved station name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StationHandle(pub u32);

/// Outcome of fixing a station's absolute coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FixOutcome {
    /// The station was not previously fixed; coordinates recorded.
    Fixed,
    /// Already fixed at the same coordinates.
    AlreadyFixed,
    /// Already fixed elsewhere; the original fix is retained.
    Conflict,
}

/// A measured connection between two stations: displacement plus the
/// symmetric covariance of its measurement uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub from: StationHandle,
    pub to: StationHandle,
    /// True when the to-station was read first on the line (after any
    /// direction reversal), so the adjustment knows the observation sense.
    pub to_first: bool,
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
    pub cxy: f64,
    pub cyz: f64,
    pub czx: f64,
    /// Excluded from length totals (Compass `L` flag).
    pub duplicate: bool,
}

/// Passage cross-section half-widths at one station, calibration applied.
/// A side the instrument couldn't read is absent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrossSection {
    pub station: StationHandle,
    pub left: Option<f64>,
    pub right: Option<f64>,
    pub up: Option<f64>,
    pub down: Option<f64>,
}

/// A from/to connection carrying no geometry, deferred to the network
/// collaborator as a placement-only constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoSurveyLink {
    pub from: StationHandle,
    pub to: StationHandle,
    pub to_first: bool,
}
