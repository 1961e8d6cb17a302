//! Geomagnetic declination lookup primitive.
//!
//! The reduction engine treats the geomagnetic field model as an external
//! collaborator: it hands over latitude/longitude/altitude and a decimal
//! year and gets back a magnetic declination. Callers wanting automatic
//! declination plug in a real model; the default assumes none.

/// Source of magnetic declination values.
pub trait GeomagModel {
    /// Declination in radians at the given position and decimal year.
    /// Positive means magnetic north is east of true north.
    fn declination(&self, lat_deg: f64, lon_deg: f64, alt_m: f64, year: f64) -> f64;
}

/// Model that always reports zero declination. Used when no field model is
/// configured; explicit declination overrides bypass the model entirely.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullGeomag;

impl GeomagModel for NullGeomag {
    fn declination(&self, _lat_deg: f64, _lon_deg: f64, _alt_m: f64, _year: f64) -> f64 {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_model_is_zero_everywhere() {
        let m = NullGeomag;
        assert_eq!(m.declination(51.5, -0.1, 100.0, 1999.5), 0.0);
    }
}
