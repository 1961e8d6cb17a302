//! Numeric constants shared across the reduction engine.

/// Tolerance used when comparing adjusted readings against range limits.
///
/// Instrument readings only carry a few significant figures, so a generous
/// epsilon avoids spurious warnings from unit conversion rounding.
pub const EPSILON: f64 = f64::EPSILON * 1000.0;

/// Metres per international foot.
pub const METRES_PER_FOOT: f64 = 0.3048;

/// Radians per degree.
pub const RAD_PER_DEG: f64 = std::f64::consts::PI / 180.0;

/// Compass (and Karst) use +/-999.0 as a not-a-number marker.
pub fn is_compass_nan(x: f64) -> bool {
    (x.abs() - 999.0).abs() < EPSILON
}

/// Convert degrees to radians.
pub fn rad(deg: f64) -> f64 {
    deg * RAD_PER_DEG
}

/// Convert radians to degrees.
pub fn deg(rad: f64) -> f64 {
    rad / RAD_PER_DEG
}

/// Square a value.
pub fn sqrd(x: f64) -> f64 {
    x * x
}

// Default instrument standard deviations (BCRA grade 5 equivalents).
pub const DEFAULT_SD_POSITION: f64 = 0.05;
pub const DEFAULT_SD_LENGTH: f64 = 0.05;
pub const DEFAULT_SD_COUNT: f64 = 0.05;
pub const DEFAULT_SD_OFFSET: f64 = 0.05;
pub const DEFAULT_SD_DEPTH: f64 = 0.05;
/// Compass and clino, degrees.
pub const DEFAULT_SD_ANGLE_DEG: f64 = 0.5;
/// Plumbed and levelled legs, degrees.
pub const DEFAULT_SD_PLUMB_DEG: f64 = 0.25;
