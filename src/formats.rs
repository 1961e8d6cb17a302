//! Input format dispatch and the Compass sub-grammars.
//!
//! The native grammar needs no per-file setup beyond its character table.
//! Compass survey data (.dat) and project (.mak) files each push a
//! transient settings frame carrying their fixed column ordering, imperial
//! length unit and character table, popped again when the file finishes.

use std::path::Path;

use tracing::debug;

use crate::charset::{Ch, CharTable};
use crate::config::{Declination, InferFlags, Quantity, Settings};
use crate::constants::{rad, METRES_PER_FOOT};
use crate::date::{days_since_1900, SurveyDate};
use crate::diagnostics::Span;
use crate::error::{ReduceError, Result};
use crate::models::{FixOutcome, Reading, Style};
use crate::processor::Processor;
use crate::reading;

const FORM_FEED: Ch = 0x0c;

/// Which grammar a survey file is written in, decided by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Native,
    CompassDat,
    CompassMak,
}

impl FileFormat {
    /// Extension dispatch, case-insensitive. Anything unrecognized
    /// (including no extension at all) is treated as native.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(e) if e.eq_ignore_ascii_case("dat") => FileFormat::CompassDat,
            Some(e) if e.eq_ignore_ascii_case("mak") => FileFormat::CompassMak,
            _ => FileFormat::Native,
        }
    }
}

/// The fixed Compass DAT column layout; the FORMAT header item decides
/// whether backsight columns are present.
fn compass_dat_ordering(backsights: bool) -> Vec<Reading> {
    let mut ordering = vec![
        Reading::From,
        Reading::To,
        Reading::Tape,
        Reading::CompassDatComp,
        Reading::CompassDatClino,
        Reading::CompassDatLeft,
        Reading::CompassDatRight,
        Reading::CompassDatUp,
        Reading::CompassDatDown,
    ];
    if backsights {
        ordering.push(Reading::CompassDatBackComp);
        ordering.push(Reading::CompassDatBackClino);
    }
    ordering.push(Reading::CompassDatFlags);
    ordering.push(Reading::IgnoreAll);
    ordering
}

fn apply_dat_settings(s: &mut Settings) {
    let defaults = Settings::native();
    s.style = Style::Normal;
    s.table = CharTable::compass_dat();
    s.ordering = compass_dat_ordering(false);
    s.units = defaults.units;
    s.zero = defaults.zero;
    s.scale = defaults.scale;
    // Compass tapes read in feet.
    s.units[Quantity::Length] = METRES_PER_FOOT;
    s.infer = InferFlags {
        plumbs: true,
        equates: true,
        exports: true,
    };
    s.clino_percent = false;
    s.backclino_percent = false;
    s.bearing_quadrants = false;
    s.backbearing_quadrants = false;
}

fn apply_mak_settings(s: &mut Settings) {
    s.table = CharTable::compass_mak();
}

impl<'a> Processor<'a> {
    pub(crate) fn reduce_dat_file(&mut self, path: &Path) -> Result<()> {
        self.cur.push_file(path, false)?;
        apply_dat_settings(self.stack.push());
        let r = self.run_dat();
        self.stack.pop();
        self.cur.pop_file();
        r
    }

    pub(crate) fn reduce_mak_file(&mut self, path: &Path) -> Result<()> {
        self.cur.push_file(path, false)?;
        apply_mak_settings(self.stack.push());
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let r = self.run_mak(&dir);
        self.stack.pop();
        self.cur.pop_file();
        r
    }

    // --- Compass DAT ---

    fn run_dat(&mut self) -> Result<()> {
        while !self.cur.at_eof() {
            if let Err(e) = self.dat_survey_block() {
                if e.is_fatal() {
                    return Err(e);
                }
                // A mangled header poisons the whole survey block: resume
                // at the next form feed.
                while !self.cur.at_eof() && self.cur.ch != FORM_FEED {
                    self.skipline();
                    self.process_eol();
                }
                if self.cur.ch == FORM_FEED {
                    self.cur.advance();
                    self.process_eol();
                }
            }
        }
        Ok(())
    }

    /// One survey block: the fixed header line sequence, then data lines
    /// until a form feed or end of file.
    fn dat_survey_block(&mut self) -> Result<()> {
        self.dat_header()?;
        while !self.cur.at_eof() {
            if self.cur.ch == FORM_FEED {
                self.cur.advance();
                self.process_eol();
                break;
            }
            if let Err(e) = self.data_normal() {
                if e.is_fatal() {
                    return Err(e);
                }
                self.skipline();
                self.process_eol();
            }
        }
        Ok(())
    }

    fn dat_token(&mut self) -> String {
        reading::read_token(&mut self.cur, &self.stack.top().table)
    }

    fn dat_uint(&mut self) -> Result<u32> {
        reading::read_uint(&mut self.cur, &self.stack.top().table, &mut self.rep)
    }

    fn dat_number(&mut self) -> Result<f64> {
        let v = reading::read_numeric(
            &mut self.cur,
            &self.stack.top().table,
            &mut self.rep,
            false,
        )?;
        Ok(v.unwrap_or_default())
    }

    fn skip_header_line(&mut self) {
        self.skipline();
        self.process_eol();
    }

    fn dat_header(&mut self) -> Result<()> {
        // Cave name line.
        self.skip_header_line();

        // SURVEY NAME: <short name>
        self.dat_token();
        self.dat_token();
        self.cur.advance();
        self.dat_token();
        self.skip_header_line();

        // SURVEY DATE: <month> <day> <year>  COMMENT:<long name>
        self.dat_token();
        self.dat_token();
        if self.cur.ch == b':' as Ch {
            self.cur.advance();
            let month = self.dat_uint()?;
            let day = self.dat_uint()?;
            let mut year = self.dat_uint()? as i32;
            // Two-digit years in Compass data are always 19xx.
            if year < 100 {
                year += 1900;
            }
            match days_since_1900(year, month, day) {
                Some(days) => {
                    let top = self.stack.top_mut();
                    top.date = Some(SurveyDate::single(days));
                    top.declination_cache = None;
                }
                None => {
                    self.warn(Span::None, "Invalid survey date");
                    self.stack.top_mut().date = None;
                }
            }
        } else {
            self.stack.top_mut().date = None;
        }
        self.skip_header_line();

        // SURVEY TEAM: header plus the team line itself.
        self.dat_token();
        self.dat_token();
        self.skip_header_line();
        self.skip_header_line();

        // DECLINATION: x  [FORMAT: ...]  [CORRECTIONS: b g l]
        self.dat_token();
        self.cur.advance();
        self.skipblanks();
        let declination = self.dat_number()?;
        {
            let top = self.stack.top_mut();
            top.declination = Declination::Explicit(rad(declination));
            top.declination_cache = None;
            top.ordering = compass_dat_ordering(false);
        }
        let mut token = self.dat_token();
        if token == "FORMAT" {
            self.cur.advance();
            let format = self.dat_token();
            if format.len() >= 12 && format.as_bytes()[11] == b'B' {
                // Backsight columns for compass and clino.
                self.stack.top_mut().ordering = compass_dat_ordering(true);
            }
            token = self.dat_token();
        }
        if token == "CORRECTIONS" {
            self.cur.advance();
            let b = self.dat_number()?;
            let g = self.dat_number()?;
            let l = self.dat_number()?;
            let top = self.stack.top_mut();
            top.zero[Quantity::Bearing] = -rad(b);
            top.zero[Quantity::Gradient] = -rad(g);
            top.zero[Quantity::Length] = -l;
        } else {
            let top = self.stack.top_mut();
            top.zero[Quantity::Bearing] = 0.0;
            top.zero[Quantity::Gradient] = 0.0;
            top.zero[Quantity::Length] = 0.0;
        }
        self.skip_header_line();

        // Blank line, column heading line, blank line.
        self.skip_header_line();
        self.skip_header_line();
        self.skip_header_line();
        Ok(())
    }

    // --- Compass MAK ---

    /// Advance the cursor, transparently consuming any line breaks so
    /// directives can span lines.
    fn advance_handling_eol(&mut self) {
        self.cur.advance();
        while !self.cur.at_eof() && self.stack.top().table.is_eol(self.cur.ch) {
            self.cur.consume_eol(&self.stack.top().table);
        }
    }

    fn read_optional_station(&mut self) -> Option<String> {
        self.skipblanks();
        let mut name = String::new();
        while self.stack.top().table.is_name(self.cur.ch) {
            name.push(self.cur.ch as u8 as char);
            self.cur.advance();
        }
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }

    /// Skip forward to the next thing that can start a coordinate.
    fn skip_to_number(&mut self) {
        loop {
            let table = &self.stack.top().table;
            let ch = self.cur.ch;
            if self.cur.at_eof()
                || table.is_digit(ch)
                || table.is_sign(ch)
                || table.is_decimal(ch)
                || ch == b']' as Ch
            {
                return;
            }
            self.advance_handling_eol();
        }
    }

    /// `name [F|M x y z]`: fix the station's absolute position, in feet or
    /// metres. A station may be fixed exactly once.
    fn mak_fix(&mut self, name: &str) -> Result<()> {
        self.advance_handling_eol();
        let mut in_feet = false;
        match self.cur.ch as u8 {
            b'F' | b'f' => {
                in_feet = true;
                self.advance_handling_eol();
            }
            b'M' | b'm' => {
                self.advance_handling_eol();
            }
            _ => {
                self.error(Span::Column, "Expecting \"F\" or \"M\"");
            }
        }
        self.skip_to_number();
        let mut x = self.dat_number()?;
        self.skip_to_number();
        let mut y = self.dat_number()?;
        self.skip_to_number();
        let mut z = self.dat_number()?;
        if in_feet {
            x *= METRES_PER_FOOT;
            y *= METRES_PER_FOOT;
            z *= METRES_PER_FOOT;
        }
        let station = self.stations.resolve(name);
        match self.stations.fix(station, x, y, z) {
            FixOutcome::Fixed => {
                debug!(name, x, y, z, "fixed station");
            }
            FixOutcome::AlreadyFixed => {
                self.warn(Span::None, "Station already fixed at the same coordinates");
            }
            FixOutcome::Conflict => {
                self.error(
                    Span::None,
                    "Station already fixed or equated to a fixed point",
                );
            }
        }
        while !self.cur.at_eof() && self.cur.ch != b']' as Ch {
            self.advance_handling_eol();
        }
        if self.cur.ch == b']' as Ch {
            self.advance_handling_eol();
            self.skipblanks();
        }
        Ok(())
    }

    fn run_mak(&mut self, dir: &Path) -> Result<()> {
        while !self.cur.at_eof() {
            if self.cur.ch != b'#' as Ch {
                self.advance_handling_eol();
                continue;
            }
            // #<data file>[,station[F|M x y z]]...;
            self.advance_handling_eol();
            let mut file_name = String::new();
            while !self.cur.at_eof()
                && self.cur.ch != b',' as Ch
                && self.cur.ch != b';' as Ch
            {
                file_name.push(self.cur.ch as u8 as char);
                self.advance_handling_eol();
            }
            while !self.cur.at_eof() && self.cur.ch != b';' as Ch {
                self.advance_handling_eol();
                if let Some(name) = self.read_optional_station() {
                    if self.cur.ch == b'[' as Ch {
                        if let Err(e) = self.mak_fix(&name) {
                            if e.is_fatal() {
                                return Err(e);
                            }
                        }
                    }
                    while !self.cur.at_eof()
                        && self.cur.ch != b',' as Ch
                        && self.cur.ch != b';' as Ch
                    {
                        self.advance_handling_eol();
                    }
                }
            }
            let file_name = file_name.trim();
            if !file_name.is_empty() {
                let dat_path = dir.join(file_name);
                if let Err(e) = self.reduce_dat_file(&dat_path) {
                    match e {
                        // A project referencing a missing data file is an
                        // error in that project, not a fatal condition.
                        ReduceError::Io { .. } => {
                            let msg = format!("Couldn't open file \"{file_name}\"");
                            self.error(Span::None, &msg);
                        }
                        other => return Err(other),
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Reporter;
    use crate::geomag::NullGeomag;
    use crate::network::{CollectingNetwork, StationResolver, StationTable};
    use std::path::PathBuf;

    #[test]
    fn extension_dispatch() {
        assert_eq!(
            FileFormat::from_path(Path::new("cave.svx")),
            FileFormat::Native
        );
        assert_eq!(
            FileFormat::from_path(Path::new("cave.DAT")),
            FileFormat::CompassDat
        );
        assert_eq!(
            FileFormat::from_path(Path::new("project.Mak")),
            FileFormat::CompassMak
        );
        assert_eq!(
            FileFormat::from_path(Path::new("plainfile")),
            FileFormat::Native
        );
        assert_eq!(
            FileFormat::from_path(Path::new("notes.txt")),
            FileFormat::Native
        );
    }

    const DAT_HEADER: &str = "\
Test Cave
SURVEY NAME: TC1
SURVEY DATE: 7 10 79  COMMENT:Entrance series
SURVEY TEAM:
A. Someone, B. Someone-Else
DECLINATION: 0.00  FORMAT: DDDDLUDRADLN

FROM TO LENGTH BEARING INC LEFT UP DOWN RIGHT FLAGS COMMENTS

";

    fn reduce_project(
        files: &[(&str, String)],
        entry: &str,
    ) -> (CollectingNetwork, StationTable, u32, u32) {
        let dir = tempfile::tempdir().unwrap();
        for (name, text) in files {
            std::fs::write(dir.path().join(name), text).unwrap();
        }
        let entry: PathBuf = dir.path().join(entry);
        let mut stations = StationTable::new();
        let mut net = CollectingNetwork::new();
        let geomag = NullGeomag;
        colored::control::set_override(false);
        let rep = Reporter::with_writer(Box::new(std::io::sink()));
        let (warnings, errors);
        {
            let mut p = Processor::with_reporter(
                Settings::native(),
                &mut stations,
                &mut net,
                &geomag,
                rep,
            );
            p.reduce_file(&entry).unwrap();
            warnings = p.warnings();
            errors = p.errors();
        }
        (net, stations, warnings, errors)
    }

    #[test]
    fn dat_file_reduces_in_feet() {
        let text = format!(
            "{DAT_HEADER}A1 A2 10.00 90.0 0.0 1.0 2.0 1.5 0.5\n\x0c\n"
        );
        let (net, stations, warnings, errors) =
            reduce_project(&[("cave.dat", text)], "cave.dat");
        assert_eq!(errors, 0);
        assert_eq!(warnings, 0);
        assert_eq!(net.legs.len(), 1);
        let leg = &net.legs[0];
        assert!((leg.dx - 10.0 * METRES_PER_FOOT).abs() < 1e-9, "{}", leg.dx);
        assert!(leg.dy.abs() < 1e-9);
        assert_eq!(stations.name(leg.from), "A1");
    }

    #[test]
    fn compass_nan_reading_becomes_inferred_plumb() {
        let text = format!(
            "{DAT_HEADER}A1 A2 10.00 999.0 -90.0 1.0 1.0 1.0 1.0\n\x0c\n"
        );
        let (net, _, _, errors) = reduce_project(&[("cave.dat", text)], "cave.dat");
        assert_eq!(errors, 0);
        assert_eq!(net.legs.len(), 1);
        let leg = &net.legs[0];
        assert_eq!(leg.dx, 0.0);
        assert_eq!(leg.dy, 0.0);
        assert!((leg.dz + 10.0 * METRES_PER_FOOT).abs() < 1e-12);
    }

    #[test]
    fn compass_flags_exclude_and_duplicate() {
        let text = format!(
            "{DAT_HEADER}\
A1 A2 10.00 90.0 0.0 1.0 1.0 1.0 1.0 #|X#\n\
A2 A3 10.00 90.0 0.0 1.0 1.0 1.0 1.0 #|L#\n\x0c\n"
        );
        let (net, _, _, errors) = reduce_project(&[("cave.dat", text)], "cave.dat");
        assert_eq!(errors, 0);
        // The X-flagged leg is discarded entirely.
        assert_eq!(net.legs.len(), 1);
        assert!(net.legs[0].duplicate);
    }

    #[test]
    fn dat_corrections_apply_as_zero_errors() {
        let text = "\
Test Cave
SURVEY NAME: TC2
SURVEY DATE: 1 2 1999
SURVEY TEAM:
A. Someone
DECLINATION: 0.00  FORMAT: DDDDLUDRADLN  CORRECTIONS: 90.00 0.00 0.00

FROM TO LENGTH BEARING INC LEFT UP DOWN RIGHT FLAGS COMMENTS

A1 A2 10.00 0.0 0.0 1.0 1.0 1.0 1.0
\x0c
";
        let (net, _, _, errors) =
            reduce_project(&[("cave.dat", text.to_string())], "cave.dat");
        assert_eq!(errors, 0);
        let leg = &net.legs[0];
        // A +90 bearing correction means a raw 0 reduces as 90 degrees.
        assert!((leg.dx - 10.0 * METRES_PER_FOOT).abs() < 1e-9, "{}", leg.dx);
    }

    #[test]
    fn mak_project_fixes_stations_and_includes_data() {
        let dat = format!(
            "{DAT_HEADER}A1 A2 10.00 90.0 0.0 1.0 1.0 1.0 1.0\n\x0c\n"
        );
        let mak = "#cave.dat,A1[M,100.0,200.0,300.0];\n".to_string();
        let (net, stations, warnings, errors) =
            reduce_project(&[("cave.dat", dat), ("proj.mak", mak)], "proj.mak");
        assert_eq!(errors, 0);
        assert_eq!(warnings, 0);
        assert_eq!(net.legs.len(), 1);
        let a1 = net.legs[0].from;
        assert_eq!(stations.name(a1), "A1");
        assert_eq!(stations.fixed_position(a1), Some([100.0, 200.0, 300.0]));
    }

    #[test]
    fn mak_fix_in_feet_converts() {
        let dat = format!("{DAT_HEADER}\x0c\n");
        let mak = "#cave.dat,A1[F,10.0,0.0,0.0];\n".to_string();
        let (_, mut stations, _, errors) =
            reduce_project(&[("cave.dat", dat), ("proj.mak", mak)], "proj.mak");
        assert_eq!(errors, 0);
        let a1 = stations.resolve("A1");
        let pos = stations.fixed_position(a1).unwrap();
        assert!((pos[0] - 10.0 * METRES_PER_FOOT).abs() < 1e-12);
    }

    #[test]
    fn mak_refix_semantics() {
        let dat = format!("{DAT_HEADER}\x0c\n");
        let mak = "\
#cave.dat,A1[M,1.0,2.0,3.0];
#cave.dat,A1[M,1.0,2.0,3.0];
#cave.dat,A1[M,9.0,9.0,9.0];
"
        .to_string();
        let (_, mut stations, warnings, errors) =
            reduce_project(&[("cave.dat", dat), ("proj.mak", mak)], "proj.mak");
        // Identical refix warns, conflicting refix errors.
        assert_eq!(warnings, 1);
        assert_eq!(errors, 1);
        let a1 = stations.resolve("A1");
        // The original fix is retained.
        assert_eq!(stations.fixed_position(a1), Some([1.0, 2.0, 3.0]));
    }

    #[test]
    fn mak_missing_data_file_is_recoverable() {
        let mak = "#nosuch.dat;\n".to_string();
        let (net, _, _, errors) = reduce_project(&[("proj.mak", mak)], "proj.mak");
        assert_eq!(errors, 1);
        assert!(net.legs.is_empty());
    }

    #[test]
    fn settings_frames_restored_after_compass_files() {
        let dir = tempfile::tempdir().unwrap();
        let dat = format!("{DAT_HEADER}A1 A2 10.00 90.0 0.0 1.0 1.0 1.0 1.0\n\x0c\n");
        std::fs::write(dir.path().join("cave.dat"), &dat).unwrap();
        std::fs::write(dir.path().join("cave.svx"), "A B 1.0 0 0\n").unwrap();
        let mut stations = StationTable::new();
        let mut net = CollectingNetwork::new();
        let geomag = NullGeomag;
        colored::control::set_override(false);
        let rep = Reporter::with_writer(Box::new(std::io::sink()));
        let mut p = Processor::with_reporter(
            Settings::native(),
            &mut stations,
            &mut net,
            &geomag,
            rep,
        );
        p.reduce_file(&dir.path().join("cave.dat")).unwrap();
        // Native file afterwards still reduces in metres with the native
        // ordering: the Compass settings frame is gone.
        p.reduce_file(&dir.path().join("cave.svx")).unwrap();
        assert_eq!(p.errors(), 0);
        drop(p);
        assert_eq!(net.legs.len(), 2);
        assert!((net.legs[1].dy - 1.0).abs() < 1e-9);
    }
}
