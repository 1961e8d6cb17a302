//! End-to-end reduction tests over real files on disk.
//!
//! These drive the public API the way the CLI does: files written to a
//! temporary directory, reduced against the in-memory station table and
//! collecting network, with diagnostics captured for inspection.

use std::f64::consts::FRAC_1_SQRT_2;
use std::io::Write;
use std::sync::{Arc, Mutex};

use survey_reducer::constants::METRES_PER_FOOT;
use survey_reducer::diagnostics::Reporter;
use survey_reducer::geomag::NullGeomag;
use survey_reducer::models::Reading;
use survey_reducer::{CollectingNetwork, Processor, Settings, StationTable, Style};

#[derive(Clone, Default)]
struct Sink(Arc<Mutex<Vec<u8>>>);

impl Sink {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct Reduced {
    net: CollectingNetwork,
    stations: StationTable,
    warnings: u32,
    errors: u32,
    diagnostics: String,
}

fn reduce_files(settings: Settings, files: &[(&str, &str)], entries: &[&str]) -> Reduced {
    let dir = tempfile::tempdir().unwrap();
    for (name, text) in files {
        std::fs::write(dir.path().join(name), text).unwrap();
    }
    let mut stations = StationTable::new();
    let mut net = CollectingNetwork::new();
    let geomag = NullGeomag;
    colored::control::set_override(false);
    let sink = Sink::default();
    let rep = Reporter::with_writer(Box::new(sink.clone()));
    let (warnings, errors);
    {
        let mut p = Processor::with_reporter(settings, &mut stations, &mut net, &geomag, rep);
        for entry in entries {
            p.reduce_file(&dir.path().join(entry)).unwrap();
        }
        warnings = p.warnings();
        errors = p.errors();
    }
    Reduced {
        net,
        stations,
        warnings,
        errors,
        diagnostics: sink.contents(),
    }
}

fn station<'a>(r: &'a Reduced, handle: survey_reducer::StationHandle) -> &'a str {
    r.stations.name(handle)
}

#[test]
fn native_file_reduces_a_traverse() {
    let text = "\
; entrance series
1 2 10.00 045 0
2 3  5.00 045 -90
3 4  7.07 090 +45
";
    let r = reduce_files(Settings::native(), &[("cave.svx", text)], &["cave.svx"]);
    assert_eq!(r.errors, 0, "{}", r.diagnostics);
    assert_eq!(r.warnings, 0, "{}", r.diagnostics);
    assert_eq!(r.net.legs.len(), 3);

    let leg = &r.net.legs[0];
    assert_eq!(station(&r, leg.from), "1");
    assert_eq!(station(&r, leg.to), "2");
    assert!((leg.dx - 10.0 * FRAC_1_SQRT_2).abs() < 1e-9);
    assert!((leg.dy - 10.0 * FRAC_1_SQRT_2).abs() < 1e-9);
    assert!(leg.dz.abs() < 1e-9);

    // Explicit -90 clino gives a plumbed leg straight down.
    let leg = &r.net.legs[1];
    assert!(leg.dx.abs() < 1e-12);
    assert!((leg.dz + 5.0).abs() < 1e-12);

    let leg = &r.net.legs[2];
    assert!((leg.dx - 7.07 * FRAC_1_SQRT_2).abs() < 1e-9);
    assert!((leg.dz - 7.07 * FRAC_1_SQRT_2).abs() < 1e-9);

    // Covariance matrix is symmetric-positive by construction; spot-check
    // that the variances came out strictly positive.
    for leg in &r.net.legs {
        assert!(leg.vx > 0.0 && leg.vy > 0.0 && leg.vz > 0.0);
    }
}

#[test]
fn diving_style_end_to_end() {
    let mut settings = Settings::native();
    settings.style = Style::Diving;
    settings.ordering = vec![
        Reading::From,
        Reading::To,
        Reading::Tape,
        Reading::Comp,
        Reading::FrDepth,
        Reading::ToDepth,
    ];
    let text = "sump1 sump2 5.00 090 -10.0 -7.0\n";
    let r = reduce_files(settings, &[("dive.svx", text)], &["dive.svx"]);
    assert_eq!(r.errors, 0, "{}", r.diagnostics);
    assert_eq!(r.net.legs.len(), 1);
    let leg = &r.net.legs[0];
    // 3-4-5 triangle: 3 up, 4 along the bearing.
    assert!((leg.dz - 3.0).abs() < 1e-12);
    assert!((leg.dx - 4.0).abs() < 1e-9);
    assert!(leg.dy.abs() < 1e-9);
}

#[test]
fn passage_style_end_to_end() {
    let mut settings = Settings::native();
    settings.style = Style::Passage;
    settings.ordering = vec![
        Reading::Station,
        Reading::Left,
        Reading::Right,
        Reading::Up,
        Reading::Down,
    ];
    let text = "1 1.0 2.0 3.0 0.5\n2 - 1.0 1.0 1.0\n";
    let r = reduce_files(settings, &[("xsect.svx", text)], &["xsect.svx"]);
    assert_eq!(r.errors, 0, "{}", r.diagnostics);
    assert_eq!(r.net.cross_sections.len(), 2);
    assert_eq!(r.net.cross_sections[0].left, Some(1.0));
    assert_eq!(r.net.cross_sections[1].left, None);
    assert_eq!(r.net.cross_sections[1].right, Some(1.0));
}

#[test]
fn reduction_is_deterministic() {
    let text = "\
1 2 10.23 123.5 -2.5
2 3  4.56 301.0 +1.0
3 4  9.99 017.2 -0.4
";
    let run = || {
        let r = reduce_files(Settings::native(), &[("cave.svx", text)], &["cave.svx"]);
        serde_json::to_string(&r.net).unwrap()
    };
    // Bit-identical output for identical input.
    assert_eq!(run(), run());
}

const DAT_BACKSIGHT_HEADER: &str = "\
Test Cave
SURVEY NAME: BS1
SURVEY DATE: 3 4 1985
SURVEY TEAM:
A. Someone
DECLINATION: 0.00  FORMAT: DDDDLUDRADLB

FROM TO LENGTH BEARING INC LEFT UP DOWN RIGHT AZM2 INC2 FLAGS COMMENTS

";

#[test]
fn compass_dat_backsights_combine() {
    let text = format!(
        "{DAT_BACKSIGHT_HEADER}A1 A2 10.00 88.0 0.0 1.0 1.0 1.0 1.0 268.0 0.0\n\x0c\n"
    );
    let r = reduce_files(
        Settings::native(),
        &[("cave.dat", text.as_str())],
        &["cave.dat"],
    );
    assert_eq!(r.errors, 0, "{}", r.diagnostics);
    assert_eq!(r.warnings, 0, "{}", r.diagnostics);
    assert_eq!(r.net.legs.len(), 1);
    let leg = &r.net.legs[0];
    // Foresight 88 and backsight 268 agree exactly, combining to 88.
    assert!((leg.dx - 10.0 * METRES_PER_FOOT * (88.0f64.to_radians()).sin()).abs() < 1e-9);
    assert!((leg.dy - 10.0 * METRES_PER_FOOT * (88.0f64.to_radians()).cos()).abs() < 1e-9);
}

#[test]
fn compass_dat_disagreeing_backsight_warns() {
    let text = format!(
        "{DAT_BACKSIGHT_HEADER}A1 A2 10.00 88.0 0.0 1.0 1.0 1.0 1.0 240.0 0.0\n\x0c\n"
    );
    let r = reduce_files(
        Settings::native(),
        &[("cave.dat", text.as_str())],
        &["cave.dat"],
    );
    assert_eq!(r.errors, 0, "{}", r.diagnostics);
    assert_eq!(r.warnings, 1, "{}", r.diagnostics);
    assert!(
        r.diagnostics.contains("COMPASS reading and BACKCOMPASS reading disagree"),
        "{}",
        r.diagnostics
    );
}

#[test]
fn compass_dat_clino_999_reads_as_omitted() {
    let dat = "\
Test Cave
SURVEY NAME: TC2
SURVEY DATE: 1 1 1990
SURVEY TEAM:
A. Someone
DECLINATION: 0.00  FORMAT: DDDDLUDRADLN

FROM TO LENGTH BEARING INC LEFT UP DOWN RIGHT FLAGS COMMENTS

A1 A2 10.00 90.0 999.0 1.0 1.0 1.0 1.0
\x0c
";
    let r = reduce_files(Settings::native(), &[("cave.dat", dat)], &["cave.dat"]);
    assert_eq!(r.errors, 0, "{}", r.diagnostics);
    assert_eq!(r.warnings, 0, "{}", r.diagnostics);
    assert_eq!(r.net.legs.len(), 1);
    // 999.0 marks the clino unread: the leg reduces as level along the
    // compass bearing, not as a plumb.
    let leg = &r.net.legs[0];
    assert!(leg.dz.abs() < 1e-12);
    assert!((leg.dx - 10.0 * METRES_PER_FOOT).abs() < 1e-9);
    assert!(leg.dy.abs() < 1e-9);
}

#[test]
fn missing_survey_date_assumes_zero_declination_and_warns_once() {
    let mut settings = Settings::native();
    settings.declination = survey_reducer::Declination::Auto {
        lat_deg: 51.5,
        lon_deg: -0.1,
        alt_m: 100.0,
    };
    let text = "\
1 2 10.00 000 0
2 3 10.00 090 0
3 4 10.00 180 0
";
    let r = reduce_files(settings, &[("cave.svx", text)], &["cave.svx"]);
    assert_eq!(r.errors, 0, "{}", r.diagnostics);
    assert_eq!(r.net.legs.len(), 3);
    // The assumed-zero answer is cached on the settings frame, so the
    // warning fires once for the survey rather than once per leg.
    assert_eq!(r.warnings, 1, "{}", r.diagnostics);
    assert_eq!(
        r.diagnostics
            .matches("No survey date specified - using 0 for magnetic declination")
            .count(),
        1,
        "{}",
        r.diagnostics
    );
    // Zero declination leaves the bearings untouched.
    assert!((r.net.legs[1].dx - 10.0).abs() < 1e-9);
    assert!(r.net.legs[1].dy.abs() < 1e-9);
}

#[test]
fn mak_diagnostics_carry_the_include_chain() {
    let dat = "\
Test Cave
SURVEY NAME: TC1
SURVEY DATE: 1 1 1990
SURVEY TEAM:
A. Someone
DECLINATION: 0.00  FORMAT: DDDDLUDRADLN

FROM TO LENGTH BEARING INC LEFT UP DOWN RIGHT FLAGS COMMENTS

A1 A2 10.00 999.0 10.0 1.0 1.0 1.0 1.0
\x0c
";
    let mak = "#cave.dat;\n";
    let r = reduce_files(
        Settings::native(),
        &[("cave.dat", dat), ("proj.mak", mak)],
        &["proj.mak"],
    );
    // Omitted compass on an unplumbed leg is an error in the data file,
    // reported with the project file named as the including context.
    assert_eq!(r.errors, 1, "{}", r.diagnostics);
    assert!(
        r.diagnostics.contains("In file included from"),
        "{}",
        r.diagnostics
    );
    assert!(r.diagnostics.contains("proj.mak"), "{}", r.diagnostics);
    assert!(r.diagnostics.contains("cave.dat"), "{}", r.diagnostics);
}

#[test]
fn multiple_files_share_one_station_table() {
    let a = "1 2 10.0 000 0\n";
    let b = "2 3 10.0 090 0\n";
    let r = reduce_files(
        Settings::native(),
        &[("a.svx", a), ("b.svx", b)],
        &["a.svx", "b.svx"],
    );
    assert_eq!(r.errors, 0, "{}", r.diagnostics);
    assert_eq!(r.net.legs.len(), 2);
    // Station 2 resolves to the same handle in both files.
    assert_eq!(r.net.legs[0].to, r.net.legs[1].from);
    assert_eq!(r.stations.len(), 3);
}

#[test]
fn caret_diagnostics_point_at_the_offending_reading() {
    let text = "1 2 10.00 361.5 0\n";
    let r = reduce_files(Settings::native(), &[("cave.svx", text)], &["cave.svx"]);
    assert_eq!(r.warnings, 1, "{}", r.diagnostics);
    assert!(
        r.diagnostics.contains("Suspicious compass reading"),
        "{}",
        r.diagnostics
    );
    // The echoed line plus a caret run under the bearing column.
    assert!(r.diagnostics.contains("1 2 10.00 361.5 0"), "{}", r.diagnostics);
    let caret_line = r
        .diagnostics
        .lines()
        .find(|l| l.trim_start().starts_with('^'))
        .unwrap_or_else(|| panic!("no caret line in {}", r.diagnostics));
    assert_eq!(caret_line.trim(), "^~~~~");
}
