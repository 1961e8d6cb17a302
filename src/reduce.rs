//! Style reducers: turn one line's accumulated readings into a leg record
//! with full measurement covariance, a cross-section, or a deferred link.
//!
//! The formulas follow the engine's linear-variance convention throughout:
//! fore/backsight pairs are combined by inverse-variance weighting with a
//! combined variance of `(var_fore + var_back) / 4`, and a uniform
//! station-position term is added to every diagonal covariance entry.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

use tracing::debug;

use crate::config::{Declination, Quantity};
use crate::constants::{deg, sqrd, EPSILON};
use crate::date::decimal_year;
use crate::diagnostics::Span;
use crate::error::Result;
use crate::models::{ClinoType, CrossSection, Field, Leg, NoSurveyLink, StationHandle};
use crate::processor::Processor;

/// Wrap an angle into [0, 2pi).
pub fn mod2pi(a: f64) -> f64 {
    a - (a / (2.0 * PI)).floor() * (2.0 * PI)
}

/// Inverse-variance combination of two estimates of the same quantity.
/// Returns the combined value and variance.
pub fn combine_inverse_variance(a: f64, var_a: f64, b: f64, var_b: f64) -> (f64, f64) {
    let var = (var_a + var_b) / 4.0;
    ((a / var_a + b / var_b) * var, var)
}

impl<'a> Processor<'a> {
    /// Warn that fore and back readings of one instrument disagree by more
    /// than three combined standard deviations.
    pub(crate) fn warn_readings_differ(&mut self, what: &str, diff: f64, angular: bool) {
        let amount = if angular {
            let mut text = format!("{:.2}", deg(diff).abs());
            while text.ends_with('0') {
                text.pop();
            }
            if text.ends_with('.') {
                text.pop();
            }
            format!("{text}\u{b0}")
        } else {
            format!("{:.2}m", diff.abs())
        };
        let msg = format!("{what} reading and BACK{what} reading disagree by {amount}");
        self.warn(Span::Column, &msg);
    }

    /// Convert any compass readings to radians and range-check them.
    /// Returns true when both fore and back compass are omitted.
    fn handle_comp_units(&mut self) -> bool {
        let mut no_comp = true;
        for field in [Field::Comp, Field::BackComp] {
            let unit = self.stack.top().units[crate::reading::quantity_for(field)];
            let slot = *self.readings.slot(field);
            if let Some(raw) = slot.value {
                no_comp = false;
                let mut val = raw * unit;
                if val < 0.0 || val - 2.0 * PI > EPSILON {
                    self.warn(slot.span(), "Suspicious compass reading");
                    val = mod2pi(val);
                }
                self.readings.slot_mut(field).value = Some(val);
            }
        }
        no_comp
    }

    /// Resolve the declination for the current survey date, caching the
    /// answer (and the missing-date warning) on the settings frame.
    fn resolve_declination(&mut self) -> f64 {
        let s = self.stack.top();
        if let Declination::Explicit(d) = s.declination {
            return d;
        }
        if let Some(d) = s.declination_cache {
            return d;
        }
        let Declination::Auto {
            lat_deg,
            lon_deg,
            alt_m,
        } = s.declination
        else {
            unreachable!()
        };
        let convergence = s.convergence;
        let date = s.date;
        let d = match date {
            None => {
                self.warn(
                    Span::None,
                    "No survey date specified - using 0 for magnetic declination",
                );
                0.0
            }
            Some(date) => {
                let year = decimal_year(date.average_days());
                self.geomag.declination(lat_deg, lon_deg, alt_m, year)
            }
        } - convergence;
        // Cache both real lookups and the assumed-zero answer, so the
        // missing-date warning fires once per survey, not once per leg.
        self.stack.top_mut().declination_cache = Some(d);
        d
    }

    /// Calibrate and combine the compass pair. `None` if both are omitted.
    fn handle_compass(&mut self) -> Option<(f64, f64)> {
        let declination = self.resolve_declination();
        let s = self.stack.top();
        let zero = s.zero[Quantity::Bearing];
        let scale = s.scale[Quantity::Bearing];
        let back_zero = s.zero[Quantity::BackBearing];
        let back_scale = s.scale[Quantity::BackBearing];

        let mut compvar = self.readings.var(Field::Comp);
        let mut comp = self
            .readings
            .val(Field::Comp)
            .map(|c| (c - zero) * scale + declination);
        if let Some(raw_back) = self.readings.val(Field::BackComp) {
            let backvar = self.readings.var(Field::BackComp);
            let back = (raw_back - back_zero) * back_scale + declination - PI;
            match comp {
                Some(fore) => {
                    let mut diff = fore - back;
                    // The pair straddles north: re-add the half-turn the
                    // weighted mean loses.
                    let adj = if diff.abs() > PI { PI } else { 0.0 };
                    diff -= ((diff + PI) / (2.0 * PI)).floor() * 2.0 * PI;
                    if sqrd(diff / 3.0) > compvar + backvar {
                        self.warn_readings_differ("COMPASS", diff, true);
                    }
                    let (combined, var) =
                        combine_inverse_variance(fore, compvar, back, backvar);
                    comp = Some(combined + adj);
                    compvar = var;
                }
                None => {
                    comp = Some(back);
                    compvar = backvar;
                }
            }
        }
        comp.map(|c| (c, compvar))
    }

    /// Unit-convert and range-check one clino reading, possibly
    /// reclassifying it as an inferred plumb.
    fn handle_clino(
        &mut self,
        quantity: Quantity,
        field: Field,
        raw: f64,
        percent: bool,
        ctype: &mut ClinoType,
    ) -> f64 {
        let s = self.stack.top();
        let unit = s.units[quantity];
        let zero = s.zero[quantity];
        let infer_plumbs = s.infer.plumbs;
        let span = self.readings.slot(field).span();

        let mut val = raw * unit;
        if percent {
            val = val.atan();
        }
        // A zero error within 45 degrees of a right angle means the
        // instrument reads 0..180 with 90 horizontal (topofil style), so
        // the usual -90..90 range check doesn't apply.
        let range_0_180 = zero > FRAC_PI_4 && zero < 3.0 * FRAC_PI_4;
        let diff_from_abs90 = val.abs() - FRAC_PI_2;
        if diff_from_abs90 > EPSILON {
            if !range_0_180 {
                self.warn(span, "Clino reading over 90\u{b0} (absolute value)");
            }
        } else if infer_plumbs && diff_from_abs90 >= -EPSILON {
            *ctype = ClinoType::InferPlumb;
        }
        if range_0_180 && *ctype != ClinoType::InferPlumb && (val < 0.0 || val - PI > EPSILON) {
            self.warn(span, "Clino reading over 90\u{b0} (absolute value)");
        }
        val
    }

    /// Reduce a normal tape/compass/clino line to a leg.
    /// Returns false when the leg had to be discarded.
    pub(crate) fn process_normal(
        &mut self,
        fr: StationHandle,
        to: StationHandle,
        to_first: bool,
        mut ctype: ClinoType,
        mut backctype: ClinoType,
        duplicate: bool,
    ) -> Result<bool> {
        let tape = self.readings.val(Field::Tape).unwrap_or(0.0);
        let mut clin = self.readings.val(Field::Clino).unwrap_or(0.0);
        let mut backclin = self.readings.val(Field::BackClino).unwrap_or(0.0);

        if tape < 0.0 {
            let span = self.readings.tape.span();
            self.warn(span, "Negative adjusted tape reading");
        }

        let no_comp = self.handle_comp_units();

        if ctype == ClinoType::Reading {
            let percent = self.stack.top().clino_percent;
            clin = self.handle_clino(Quantity::Gradient, Field::Clino, clin, percent, &mut ctype);
        }
        if backctype == ClinoType::Reading {
            let percent = self.stack.top().backclino_percent;
            backclin = self.handle_clino(
                Quantity::BackGradient,
                Field::BackClino,
                backclin,
                percent,
                &mut backctype,
            );
        }

        // Un-infer the plumb if the backsight was just a reading.
        if ctype == ClinoType::InferPlumb && backctype == ClinoType::Reading {
            ctype = ClinoType::Reading;
        }

        if ctype != ClinoType::Omit && backctype != ClinoType::Omit && ctype != backctype {
            let span = self.readings.clino.span();
            self.error(span, "CLINO and BACKCLINO readings must be of the same type");
            return Ok(false);
        }

        let pos_var = self.stack.top().variance[Quantity::Position] / 3.0;
        let (dx, dy, dz, vx, vy, vz, cxy, cyz, czx);

        if ctype.is_plumb() || backctype.is_plumb() {
            if !no_comp {
                let comp_nonzero = self.readings.val(Field::Comp).map_or(true, |v| v != 0.0);
                let back_nonzero = self
                    .readings
                    .val(Field::BackComp)
                    .map_or(true, |v| v != 0.0);
                if ctype == ClinoType::Plumb
                    || (ctype == ClinoType::InferPlumb && comp_nonzero)
                    || backctype == ClinoType::Plumb
                    || (backctype == ClinoType::InferPlumb && back_nonzero)
                {
                    // The leg is vertical, so a compass bearing is
                    // meaningless; it is usually a copying error.
                    self.warn(Span::None, "Compass reading given on plumbed leg");
                }
            }

            dx = 0.0;
            dy = 0.0;
            if ctype != ClinoType::Omit {
                if backctype != ClinoType::Omit && (clin > 0.0) == (backclin > 0.0) {
                    let span = self.readings.clino.span();
                    self.error(
                        span,
                        "Plumbed CLINO and BACKCLINO readings can't be in the same direction",
                    );
                    return Ok(false);
                }
                dz = if clin > 0.0 { tape } else { -tape };
            } else {
                dz = if backclin < 0.0 { tape } else { -tape };
            }
            let plumb_var = self.stack.top().variance[Quantity::Plumb];
            vx = pos_var + dz * dz * plumb_var;
            vy = vx;
            vz = pos_var + self.readings.var(Field::Tape);
            cxy = 0.0;
            cyz = 0.0;
            czx = 0.0;
        } else {
            // Each clino type is now Reading, Horiz or Omit.
            if no_comp {
                let span = self.readings.comp.span();
                self.error(span, "Compass reading may not be omitted except on plumbed legs");
                return Ok(false);
            }
            if tape == 0.0 {
                dx = 0.0;
                dy = 0.0;
                dz = 0.0;
                vx = pos_var;
                vy = pos_var;
                vz = pos_var;
                cxy = 0.0;
                cyz = 0.0;
                czx = 0.0;
                debug!("zero length leg: position variance only");
            } else {
                // A levelled leg still has variance in its horizontality.
                let mut var_clin = self.stack.top().variance[Quantity::Level];
                let Some((comp, var_comp)) = self.handle_compass() else {
                    unreachable!("compass presence checked above")
                };
                if ctype == ClinoType::Reading {
                    let s = self.stack.top();
                    clin = (clin - s.zero[Quantity::Gradient]) * s.scale[Quantity::Gradient];
                    var_clin = self.readings.var(Field::Clino);
                }
                if backctype == ClinoType::Reading {
                    let s = self.stack.top();
                    backclin =
                        (backclin - s.zero[Quantity::BackGradient]) * s.scale[Quantity::BackGradient];
                    let backvar = self.readings.var(Field::BackClino);
                    if ctype == ClinoType::Reading {
                        if sqrd((clin + backclin) / 3.0) > var_clin + backvar {
                            self.warn_readings_differ("CLINO", clin + backclin, true);
                        }
                        let (combined, var) =
                            combine_inverse_variance(clin, var_clin, -backclin, backvar);
                        clin = combined;
                        var_clin = var;
                    } else {
                        clin = -backclin;
                        var_clin = backvar;
                    }
                }

                let tape_var = self.readings.var(Field::Tape);
                let cos_g = clin.cos();
                let l_cos_g = tape * cos_g;
                let sin_b = comp.sin();
                let cos_b = comp.cos();
                dx = l_cos_g * sin_b;
                dy = l_cos_g * cos_b;
                dz = tape * clin.sin();

                let dx2 = dx * dx;
                let dy2 = dy * dy;
                let dz2 = dz * dz;
                let l2 = tape * tape;
                let big_v = tape_var / l2;
                let cos_g2 = cos_g * cos_g;
                let sin_g_cos_g = clin.sin() * cos_g;
                let v = dz2 * var_clin;
                vx = pos_var + dx2 * big_v + dy2 * var_comp + sin_b * sin_b * v;
                vy = pos_var + dy2 * big_v + dx2 * var_comp + cos_b * cos_b * v;
                if ctype == ClinoType::Omit && backctype == ClinoType::Omit {
                    // No clino at all: assume sd = tape/sqrt(10), so three
                    // sds is about 95% of the tape length.
                    vz = pos_var + l2 * 0.1;
                } else {
                    vz = pos_var + dz2 * big_v + l2 * cos_g2 * var_clin;
                }
                // The covariance formulas hold in the no-clino case too:
                // dz = 0 there, so var_clin drops out.
                cxy = sin_b * cos_b * (tape_var * cos_g2 + var_clin * dz2) - var_comp * dx * dy;
                czx = tape_var * sin_b * sin_g_cos_g - var_clin * dx * dz;
                cyz = tape_var * cos_b * sin_g_cos_g - var_clin * dy * dz;
            }
        }

        self.net.add_leg(Leg {
            from: fr,
            to,
            to_first,
            dx,
            dy,
            dz,
            vx,
            vy,
            vz,
            cxy,
            cyz,
            czx,
            duplicate,
        });
        Ok(true)
    }

    /// Calibrated depth change for the diving and cylpolar styles.
    fn depth_change(&mut self, explicit_change: bool) -> f64 {
        let s = self.stack.top();
        let unit = s.units[Quantity::Depth];
        let zero = s.zero[Quantity::Depth];
        let scale = s.scale[Quantity::Depth];
        let to_depth = self.readings.val(Field::ToDepth).unwrap_or(0.0);
        if explicit_change {
            // Depth given as a single change column; from-depth is zero.
            (to_depth * unit - zero) * scale
        } else {
            let fr_depth = self.readings.val(Field::FrDepth).unwrap_or(0.0);
            (to_depth - fr_depth) * unit * scale
        }
    }

    /// Reduce a diving-style line: depth gauge vertical, tape slope length.
    pub(crate) fn process_diving(
        &mut self,
        fr: StationHandle,
        to: StationHandle,
        to_first: bool,
        explicit_change: bool,
        duplicate: bool,
    ) -> Result<bool> {
        let mut tape = self.readings.val(Field::Tape).unwrap_or(0.0);

        self.handle_comp_units();
        let mut dz = self.depth_change(explicit_change);

        if tape < 0.0 {
            self.warn(Span::None, "Negative adjusted tape reading");
        }
        if tape < dz.abs() {
            // Either a gross reading error or just random error on a near
            // vertical leg.
            self.warn(Span::None, "Tape reading is less than change in depth");
        }

        let pos_var = self.stack.top().variance[Quantity::Position] / 3.0;
        let tape_var = self.readings.var(Field::Tape);
        let depth_var = 2.0 * self.readings.var(Field::ToDepth);
        let (dx, dy, vx, vy, vz, cxy, cyz, czx);

        if tape == 0.0 && dz == 0.0 {
            dx = 0.0;
            dy = 0.0;
            vx = pos_var;
            vy = pos_var;
            vz = pos_var;
            cxy = 0.0;
            cyz = 0.0;
            czx = 0.0;
        } else if self.readings.val(Field::Comp).is_none()
            && self.readings.val(Field::BackComp).is_none()
        {
            // Vertical plumb: combine tape and depth change by inverse
            // variance weighting.
            dx = 0.0;
            dy = 0.0;
            if dz < 0.0 {
                tape = -tape;
            }
            let vsum = tape_var + depth_var;
            dz = (dz * tape_var + tape * depth_var) / vsum;
            let plumb_var = self.stack.top().variance[Quantity::Plumb];
            vx = pos_var + dz * dz * plumb_var;
            vy = vx;
            vz = pos_var + tape_var * depth_var / vsum;
            cxy = 0.0;
            cyz = 0.0;
            czx = 0.0;
        } else {
            let Some((comp, var_comp)) = self.handle_compass() else {
                unreachable!("compass presence checked above")
            };
            let sin_b = comp.sin();
            let cos_b = comp.cos();
            let l2 = tape * tape;
            let dz2 = dz * dz;
            let d2 = l2 - dz2;
            if d2 <= 0.0 {
                // Tape shorter than the depth change: no horizontal
                // component survives, so fold the discrepancy into the
                // vertical estimate instead of failing.
                let vsum = tape_var + depth_var;
                dx = 0.0;
                dy = 0.0;
                vx = pos_var;
                vy = pos_var;
                vz = pos_var + tape_var * depth_var / vsum;
                dz = if dz > 0.0 {
                    (dz * tape_var + tape * depth_var) / vsum
                } else {
                    (dz * tape_var - tape * depth_var) / vsum
                };
                cxy = 0.0;
                cyz = 0.0;
                czx = 0.0;
            } else {
                let d = d2.sqrt();
                let f = tape_var * l2 + depth_var * d2;
                dx = d * sin_b;
                dy = d * cos_b;
                vx = pos_var + sin_b * sin_b * f / d2 + var_comp * dy * dy;
                vy = pos_var + cos_b * cos_b * f / d2 + var_comp * dx * dx;
                vz = pos_var + depth_var;
                cxy = sin_b * cos_b * (f / d2 + var_comp * d2);
                cyz = -depth_var * dy / d;
                czx = -depth_var * dx / d;
            }
        }

        self.net.add_leg(Leg {
            from: fr,
            to,
            to_first,
            dx,
            dy,
            dz,
            vx,
            vy,
            vz,
            cxy,
            cyz,
            czx,
            duplicate,
        });
        Ok(true)
    }

    /// Reduce a cylindrical-polar line: tape is the horizontal radius.
    pub(crate) fn process_cylpolar(
        &mut self,
        fr: StationHandle,
        to: StationHandle,
        to_first: bool,
        explicit_change: bool,
        duplicate: bool,
    ) -> Result<bool> {
        let tape = self.readings.val(Field::Tape).unwrap_or(0.0);

        self.handle_comp_units();
        let dz = self.depth_change(explicit_change);

        if tape < 0.0 {
            self.warn(Span::None, "Negative adjusted tape reading");
        }

        let pos_var = self.stack.top().variance[Quantity::Position] / 3.0;
        let tape_var = self.readings.var(Field::Tape);
        let depth_var = 2.0 * self.readings.var(Field::ToDepth);
        let (dx, dy, vx, vy, vz, cxy);

        if self.readings.val(Field::Comp).is_none()
            && self.readings.val(Field::BackComp).is_none()
        {
            let plumb_var = self.stack.top().variance[Quantity::Plumb];
            dx = 0.0;
            dy = 0.0;
            vx = pos_var + dz * dz * plumb_var;
            vy = vx;
            vz = pos_var + depth_var;
            cxy = 0.0;
        } else {
            let Some((comp, var_comp)) = self.handle_compass() else {
                unreachable!("compass presence checked above")
            };
            let sin_b = comp.sin();
            let cos_b = comp.cos();
            dx = tape * sin_b;
            dy = tape * cos_b;
            vx = pos_var + tape_var * sin_b * sin_b + var_comp * dy * dy;
            vy = pos_var + tape_var * cos_b * cos_b + var_comp * dx * dx;
            vz = pos_var + depth_var;
            cxy = (tape_var - var_comp * tape * tape) * sin_b * cos_b;
        }

        self.net.add_leg(Leg {
            from: fr,
            to,
            to_first,
            dx,
            dy,
            dz,
            vx,
            vy,
            vz,
            cxy,
            cyz: 0.0,
            czx: 0.0,
            duplicate,
        });
        Ok(true)
    }

    /// Reduce a cartesian line: per-axis scaled/offset differences with
    /// independent variances and no covariance.
    pub(crate) fn process_cartesian(
        &mut self,
        fr: StationHandle,
        to: StationHandle,
        to_first: bool,
    ) -> Result<bool> {
        let s = self.stack.top();
        let calibrated =
            |q: Quantity, raw: Option<f64>| (raw.unwrap_or(0.0) * s.units[q] - s.zero[q]) * s.scale[q];
        let dx = calibrated(Quantity::Dx, self.readings.val(Field::Dx));
        let dy = calibrated(Quantity::Dy, self.readings.val(Field::Dy));
        let dz = calibrated(Quantity::Dz, self.readings.val(Field::Dz));

        self.net.add_leg(Leg {
            from: fr,
            to,
            to_first,
            dx,
            dy,
            dz,
            vx: self.readings.var(Field::Dx),
            vy: self.readings.var(Field::Dy),
            vz: self.readings.var(Field::Dz),
            cxy: 0.0,
            cyz: 0.0,
            czx: 0.0,
            duplicate: false,
        });
        Ok(true)
    }

    /// Record a passage cross-section at one station.
    pub(crate) fn process_lrud(&mut self, station: StationHandle) -> Result<bool> {
        let s = self.stack.top();
        let half_width = |field: Field, q: Quantity| {
            self.readings
                .val(field)
                .map(|raw| (raw * s.units[q] - s.zero[q]) * s.scale[q])
        };
        let section = CrossSection {
            station,
            left: half_width(Field::Left, Quantity::Left),
            right: half_width(Field::Right, Quantity::Right),
            up: half_width(Field::Up, Quantity::Up),
            down: half_width(Field::Down, Quantity::Down),
        };
        self.net.add_cross_section(section);
        Ok(true)
    }

    /// Record a connectivity-only link.
    pub(crate) fn process_nosurvey(
        &mut self,
        fr: StationHandle,
        to: StationHandle,
        to_first: bool,
    ) -> Result<bool> {
        self.net.add_no_survey_link(NoSurveyLink {
            from: fr,
            to,
            to_first,
        });
        Ok(true)
    }
}
