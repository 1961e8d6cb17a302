//! The line processor: walks the active ordering to populate reading slots,
//! then hands each completed line to the style reducer.
//!
//! Recoverable errors unwind to the per-file loop, which discards the rest
//! of the offending line and resumes at the next one; fatal I/O errors
//! propagate out of the whole run. Non-data native lines (blank, comment,
//! `*keyword`) are tolerated and skipped here: keyword semantics belong to
//! the settings collaborator.

use std::path::Path;

use tracing::debug;

use crate::config::{Quantity, Settings, SettingsStack};
use crate::constants::{is_compass_nan, sqrd};
use crate::diagnostics::{Reporter, Severity, Span};
use crate::error::{ReduceError, Result};
use crate::formats::FileFormat;
use crate::geomag::GeomagModel;
use crate::models::{ClinoType, Field, Reading, StationHandle, Style};
use crate::network::{StationResolver, SurveyNetwork};
use crate::reading::{self, Readings, Slot};
use crate::source::Cursor;

/// Reduces survey data files against pluggable station/network/geomagnetic
/// collaborators.
pub struct Processor<'a> {
    pub(crate) cur: Cursor,
    pub(crate) stack: SettingsStack,
    pub(crate) rep: Reporter,
    pub(crate) readings: Readings,
    pub(crate) stations: &'a mut dyn StationResolver,
    pub(crate) net: &'a mut dyn SurveyNetwork,
    pub(crate) geomag: &'a dyn GeomagModel,
}

impl<'a> Processor<'a> {
    pub fn new(
        settings: Settings,
        stations: &'a mut dyn StationResolver,
        net: &'a mut dyn SurveyNetwork,
        geomag: &'a dyn GeomagModel,
    ) -> Self {
        Self::with_reporter(settings, stations, net, geomag, Reporter::new())
    }

    /// As [`Processor::new`] but diagnostics go to the given reporter.
    pub fn with_reporter(
        settings: Settings,
        stations: &'a mut dyn StationResolver,
        net: &'a mut dyn SurveyNetwork,
        geomag: &'a dyn GeomagModel,
        rep: Reporter,
    ) -> Self {
        Processor {
            cur: Cursor::new(),
            stack: SettingsStack::new(settings),
            rep,
            readings: Readings::default(),
            stations,
            net,
            geomag,
        }
    }

    pub fn warnings(&self) -> u32 {
        self.rep.warnings
    }

    pub fn errors(&self) -> u32 {
        self.rep.errors
    }

    /// Reduce one survey data file, dispatching on its extension. The
    /// settings stack and include stack are left exactly as they were,
    /// whatever happens inside.
    pub fn reduce_file(&mut self, path: &Path) -> Result<()> {
        let format = FileFormat::from_path(path);
        debug!(path = %path.display(), ?format, "reducing file");
        match format {
            FileFormat::Native => {
                self.cur.push_file(path, true)?;
                let r = self.run_native();
                self.cur.pop_file();
                r
            }
            FileFormat::CompassDat => self.reduce_dat_file(path),
            FileFormat::CompassMak => self.reduce_mak_file(path),
        }
    }

    // --- diagnostics and scanning helpers ---

    pub(crate) fn warn(&mut self, span: Span, msg: &str) {
        self.rep
            .report(&mut self.cur, &self.stack.top().table, Severity::Warning, span, msg);
    }

    pub(crate) fn error(&mut self, span: Span, msg: &str) {
        self.rep
            .report(&mut self.cur, &self.stack.top().table, Severity::Error, span, msg);
    }

    pub(crate) fn skipblanks(&mut self) {
        reading::skipblanks(&mut self.cur, &self.stack.top().table);
    }

    pub(crate) fn skipline(&mut self) {
        reading::skipline(&mut self.cur, &self.stack.top().table);
    }

    fn skipword(&mut self) {
        reading::skipword(&mut self.cur, &self.stack.top().table);
    }

    fn is_eol_here(&self) -> bool {
        self.stack.top().table.is_eol(self.cur.ch)
    }

    fn is_comment_here(&self) -> bool {
        self.stack.top().table.is_comment(self.cur.ch)
    }

    fn is_keyword_here(&self) -> bool {
        self.stack.top().table.is_keyword(self.cur.ch)
    }

    fn is_data_here(&self) -> bool {
        self.stack.top().table.is_data(self.cur.ch)
    }

    fn is_omit_here(&self) -> bool {
        self.stack.top().table.is_omit(self.cur.ch)
    }

    /// Finish the current line: anything left must be blank or a trailing
    /// comment, then the line break itself is consumed.
    pub(crate) fn process_eol(&mut self) {
        self.skipblanks();
        if !self.cur.at_eof() && !self.is_eol_here() {
            if !self.is_comment_here() {
                self.error(Span::Column, "End of line not blank");
            }
            self.skipline();
        }
        if !self.cur.at_eof() {
            self.cur.consume_eol(&self.stack.top().table);
        }
    }

    fn read_station(&mut self) -> Result<StationHandle> {
        let name =
            reading::read_station_name(&mut self.cur, &self.stack.top().table, &mut self.rep)?;
        Ok(self.stations.resolve(&name))
    }

    fn read_field(&mut self, field: Field, optional: bool) -> Result<()> {
        reading::read_reading(
            &mut self.cur,
            self.stack.top(),
            &mut self.readings,
            field,
            optional,
            &mut self.rep,
        )
    }

    fn read_bearing_field(&mut self, field: Field) -> Result<()> {
        reading::read_bearing_or_omit(
            &mut self.cur,
            self.stack.top(),
            &mut self.readings,
            field,
            &mut self.rep,
        )
    }

    // --- native file loop ---

    /// True if the line was blank, a comment, or a keyword directive, all
    /// of which are consumed here.
    fn process_non_data_line(&mut self) -> bool {
        self.skipblanks();
        if self.cur.at_eof() {
            return true;
        }
        if self.is_data_here() {
            return false;
        }
        if self.is_comment_here() || self.is_keyword_here() {
            self.skipline();
        }
        self.process_eol();
        true
    }

    pub(crate) fn run_native(&mut self) -> Result<()> {
        while !self.cur.at_eof() {
            if self.process_non_data_line() {
                continue;
            }
            let r = match self.stack.top().style {
                Style::Normal | Style::Diving | Style::CylPolar => self.data_normal(),
                Style::Cartesian => self.data_cartesian(),
                Style::Passage => self.data_passage(),
                Style::NoSurvey => self.data_nosurvey(),
                Style::Ignore => {
                    self.skipline();
                    self.process_eol();
                    Ok(())
                }
            };
            if let Err(e) = r {
                if e.is_fatal() {
                    return Err(e);
                }
                self.skipline();
                self.process_eol();
            }
        }
        Ok(())
    }

    // --- line-finish helpers shared by the normal-family walker ---

    /// Zero-length (or wholly omitted) tape with matching depths means the
    /// two stations are really one point.
    fn inferred_equate_due(&self) -> bool {
        if !self.stack.top().infer.equates {
            return false;
        }
        let tape_zero = self.readings.val(Field::Tape).map_or(true, |v| v == 0.0);
        let back_zero = self
            .readings
            .val(Field::BackTape)
            .map_or(true, |v| v == 0.0);
        tape_zero
            && back_zero
            && self.readings.val(Field::FrDepth).unwrap_or(0.0)
                == self.readings.val(Field::ToDepth).unwrap_or(0.0)
    }

    /// Synthesize a raw tape reading from the topofil counter pair.
    fn topofil_tape(&mut self) {
        let fr_c = self.readings.val(Field::FrCount).unwrap_or(0.0);
        let to_slot = self.readings.to_count;
        let variance = self.stack.top().variance[Quantity::Count];
        self.readings.tape = Slot {
            value: Some(to_slot.value.unwrap_or(0.0) - fr_c),
            variance,
            offset: to_slot.offset,
            width: to_slot.width,
        };
    }

    /// Calibrate the tape (or counter difference) and fold in the backsight
    /// tape. False means the leg must be discarded.
    fn adjust_tape(&mut self, f_topofil: bool) -> bool {
        let s = self.stack.top();
        let count_factor = s.units[Quantity::Count] * s.scale[Quantity::Count];
        let length_unit = s.units[Quantity::Length];
        let length_zero = s.zero[Quantity::Length];
        let length_scale = s.scale[Quantity::Length];
        let back_unit = s.units[Quantity::BackLength];
        let back_zero = s.zero[Quantity::BackLength];
        let back_scale = s.scale[Quantity::BackLength];

        if f_topofil {
            if let Some(v) = self.readings.tape.value {
                self.readings.tape.value = Some(v * count_factor);
            }
        } else if let Some(v) = self.readings.tape.value {
            self.readings.tape.value = Some((v * length_unit - length_zero) * length_scale);
        }

        if let Some(raw_back) = self.readings.back_tape.value {
            let back = (raw_back * back_unit - back_zero) * back_scale;
            let back_var = self.readings.back_tape.variance;
            match self.readings.tape.value {
                Some(fore) => {
                    let fore_var = self.readings.tape.variance;
                    let diff = fore - back;
                    if sqrd(diff / 3.0) > fore_var + back_var {
                        self.warn_readings_differ("TAPE", diff, false);
                    }
                    let (combined, var) =
                        crate::reduce::combine_inverse_variance(fore, fore_var, back, back_var);
                    self.readings.tape.value = Some(combined);
                    self.readings.tape.variance = var;
                }
                None => {
                    self.readings.tape.value = Some(back);
                    self.readings.tape.variance = back_var;
                }
            }
        } else if self.readings.tape.value.is_none() {
            let span = self.readings.tape.span();
            self.error(span, "Tape reading may not be omitted");
            return false;
        }
        true
    }

    fn reduce_normal_family(
        &mut self,
        fr: StationHandle,
        to: StationHandle,
        to_first: bool,
        ctype: ClinoType,
        backctype: ClinoType,
        f_depth_change: bool,
        duplicate: bool,
    ) -> Result<bool> {
        match self.stack.top().style {
            Style::Normal => self.process_normal(fr, to, to_first, ctype, backctype, duplicate),
            Style::Diving => self.process_diving(fr, to, to_first, f_depth_change, duplicate),
            Style::CylPolar => self.process_cylpolar(fr, to, to_first, f_depth_change, duplicate),
            _ => Ok(false),
        }
    }

    // --- data-line walkers ---

    /// Walker for the normal, diving and cylpolar styles, including the
    /// topofil counter and Compass DAT column variants.
    pub(crate) fn data_normal(&mut self) -> Result<()> {
        let mut fr: Option<StationHandle> = None;
        let mut to: Option<StationHandle> = None;
        let mut first_is_to = None;
        let mut f_topofil = false;
        let mut f_multi = false;
        let mut f_rev = false;
        let mut ctype = ClinoType::Omit;
        let mut backctype = ClinoType::Omit;
        let mut f_depth_change = false;
        let mut compass_dat_flags: u32 = 0;

        self.readings.clear();

        let ordering = self.stack.top().ordering.clone();
        let mut idx = 0;

        loop {
            self.skipblanks();
            let tag = ordering.get(idx).copied();
            idx += 1;
            match tag {
                Some(Reading::From) => {
                    fr = Some(self.read_station()?);
                    first_is_to.get_or_insert(false);
                }
                Some(Reading::To) => {
                    to = Some(self.read_station()?);
                    first_is_to.get_or_insert(true);
                }
                Some(Reading::Station) => {
                    fr = to;
                    to = Some(self.read_station()?);
                    first_is_to = Some(true);
                }
                Some(Reading::Dir) => {
                    let token = reading::read_token(&mut self.cur, &self.stack.top().table);
                    match token.to_ascii_uppercase().as_str() {
                        "F" => {}
                        "B" => f_rev = true,
                        _ => {
                            let msg =
                                format!("Found \"{token}\", expecting \"F\" or \"B\"");
                            self.error(Span::Width(token.len()), &msg);
                            return Err(ReduceError::SkipLine);
                        }
                    }
                }
                Some(tag @ (Reading::Tape | Reading::BackTape)) => {
                    let field = if tag == Reading::Tape {
                        Field::Tape
                    } else {
                        Field::BackTape
                    };
                    self.read_field(field, true)?;
                    match self.readings.val(field) {
                        None => {
                            if self.is_omit_here() {
                                self.cur.advance();
                            } else {
                                self.error(Span::Token, "Expecting numeric field");
                                // Avoid also complaining about an omitted
                                // tape reading for this line.
                                self.readings.slot_mut(field).value = Some(0.0);
                            }
                        }
                        Some(v) if v < 0.0 => {
                            let span = self.readings.slot(field).span();
                            self.warn(span, "Negative tape reading");
                        }
                        Some(_) => {}
                    }
                }
                Some(Reading::Count) => {
                    self.readings.fr_count = self.readings.to_count;
                    self.read_field(Field::ToCount, false)?;
                    f_topofil = true;
                }
                Some(Reading::FrCount) => {
                    self.read_field(Field::FrCount, false)?;
                }
                Some(Reading::ToCount) => {
                    self.read_field(Field::ToCount, false)?;
                    f_topofil = true;
                }
                Some(Reading::Comp) => self.read_bearing_field(Field::Comp)?,
                Some(Reading::BackComp) => self.read_bearing_field(Field::BackComp)?,
                Some(tag @ (Reading::Clino | Reading::BackClino)) => {
                    let field = if tag == Reading::Clino {
                        Field::Clino
                    } else {
                        Field::BackClino
                    };
                    self.read_field(field, true)?;
                    if self.readings.val(field).is_some() {
                        if tag == Reading::Clino {
                            ctype = ClinoType::Reading;
                        } else {
                            backctype = ClinoType::Reading;
                        }
                    } else {
                        match reading::read_plumb(&mut self.cur, &self.stack.top().table) {
                            Some((angle, ct)) => {
                                self.readings.slot_mut(field).value = Some(angle);
                                if tag == Reading::Clino {
                                    ctype = ct;
                                } else {
                                    backctype = ct;
                                }
                            }
                            None => {
                                self.error(Span::Token, "Expecting numeric field");
                                return Err(ReduceError::SkipLine);
                            }
                        }
                    }
                }
                Some(tag @ (Reading::FrDepth | Reading::ToDepth)) => {
                    let field = if tag == Reading::FrDepth {
                        Field::FrDepth
                    } else {
                        Field::ToDepth
                    };
                    self.read_field(field, false)?;
                }
                Some(Reading::Depth) => {
                    self.readings.fr_depth = self.readings.to_depth;
                    self.read_field(Field::ToDepth, false)?;
                }
                Some(Reading::DepthChange) => {
                    f_depth_change = true;
                    self.readings.fr_depth.value = Some(0.0);
                    self.read_field(Field::ToDepth, false)?;
                }
                Some(Reading::CompassDatComp) => {
                    self.read_bearing_field(Field::Comp)?;
                    if self.readings.val(Field::Comp).is_some_and(is_compass_nan) {
                        self.readings.comp.value = None;
                    }
                }
                Some(Reading::CompassDatBackComp) => {
                    self.read_bearing_field(Field::BackComp)?;
                    if self
                        .readings
                        .val(Field::BackComp)
                        .is_some_and(is_compass_nan)
                    {
                        self.readings.back_comp.value = None;
                    }
                }
                Some(tag @ (Reading::CompassDatClino | Reading::CompassDatBackClino)) => {
                    let field = if tag == Reading::CompassDatClino {
                        Field::Clino
                    } else {
                        Field::BackClino
                    };
                    self.read_field(field, false)?;
                    let omitted = self.readings.val(field).is_some_and(is_compass_nan);
                    if omitted {
                        self.readings.slot_mut(field).value = None;
                    }
                    let ct = if omitted {
                        ClinoType::Omit
                    } else {
                        ClinoType::Reading
                    };
                    if tag == Reading::CompassDatClino {
                        ctype = ct;
                    } else {
                        backctype = ct;
                    }
                }
                Some(
                    tag @ (Reading::CompassDatLeft
                    | Reading::CompassDatRight
                    | Reading::CompassDatUp
                    | Reading::CompassDatDown),
                ) => {
                    let field = match tag {
                        Reading::CompassDatLeft => Field::Left,
                        Reading::CompassDatRight => Field::Right,
                        Reading::CompassDatUp => Field::Up,
                        _ => Field::Down,
                    };
                    self.read_field(field, false)?;
                    // Negative passage dimensions mean "not measured".
                    if self.readings.val(field).is_some_and(|v| v < 0.0) {
                        self.readings.slot_mut(field).value = None;
                    }
                }
                Some(Reading::CompassDatFlags) => {
                    if self.cur.ch == b'#' as u16 {
                        let saved = self.cur.capture();
                        self.cur.advance();
                        if self.cur.ch == b'|' as u16 {
                            self.cur.advance();
                            while (b'A' as u16..=b'Z' as u16).contains(&self.cur.ch) {
                                compass_dat_flags |= 1 << (self.cur.ch - b'A' as u16);
                                self.cur.advance();
                            }
                            if self.cur.ch == b'#' as u16 {
                                self.cur.advance();
                            } else {
                                compass_dat_flags = 0;
                                self.cur.restore(saved);
                            }
                        } else {
                            self.cur.restore(saved);
                        }
                    }
                }
                Some(Reading::Ignore) => self.skipword(),
                Some(Reading::IgnoreAllAndNewLine) | Some(Reading::Newline) => {
                    if tag == Some(Reading::IgnoreAllAndNewLine) {
                        self.skipline();
                    }
                    let mut skip_resets = false;
                    if let (Some(f), Some(t)) = (fr, to) {
                        if f_topofil {
                            self.topofil_tape();
                        }
                        if self.inferred_equate_due() {
                            self.net.add_equate(f, t);
                            skip_resets = true;
                        } else {
                            let (f, t) = if f_rev { (t, f) } else { (f, t) };
                            if self.adjust_tape(f_topofil) {
                                let to_first = first_is_to.unwrap_or(false) ^ f_rev;
                                let ok = self.reduce_normal_family(
                                    f,
                                    t,
                                    to_first,
                                    ctype,
                                    backctype,
                                    f_depth_change,
                                    false,
                                )?;
                                if !ok {
                                    self.skipline();
                                }
                            } else {
                                skip_resets = true;
                            }
                        }
                    }
                    if !skip_resets {
                        f_rev = false;
                        ctype = ClinoType::Omit;
                        backctype = ClinoType::Omit;
                        f_depth_change = false;
                        self.readings.clino = Slot::default();
                        self.readings.back_clino = Slot::default();
                    }
                    f_multi = true;
                    loop {
                        self.process_eol();
                        self.skipblanks();
                        if self.is_data_here() {
                            break;
                        }
                        if !self.is_comment_here() {
                            return Ok(());
                        }
                    }
                }
                Some(Reading::IgnoreAll) | None => {
                    if tag == Some(Reading::IgnoreAll) {
                        self.skipline();
                    }
                    if !f_multi {
                        // Compass discard flag.
                        if compass_dat_flags & (1 << (b'X' - b'A')) != 0 {
                            self.process_eol();
                            return Ok(());
                        }
                        if f_rev {
                            std::mem::swap(&mut fr, &mut to);
                        }
                        if f_topofil {
                            self.topofil_tape();
                        }
                        let (Some(f), Some(t)) = (fr, to) else {
                            self.process_eol();
                            return Ok(());
                        };
                        if self.inferred_equate_due() {
                            self.net.add_equate(f, t);
                            self.process_eol();
                            return Ok(());
                        }
                        if !self.adjust_tape(f_topofil) {
                            self.process_eol();
                            return Ok(());
                        }
                        let duplicate = compass_dat_flags & (1 << (b'L' - b'A')) != 0;
                        let to_first = first_is_to.unwrap_or(false) ^ f_rev;
                        self.reduce_normal_family(
                            f,
                            t,
                            to_first,
                            ctype,
                            backctype,
                            f_depth_change,
                            duplicate,
                        )?;
                        self.process_eol();
                        return Ok(());
                    }
                    loop {
                        self.process_eol();
                        self.skipblanks();
                        if !self.is_comment_here() {
                            break;
                        }
                    }
                    if !self.is_data_here() {
                        return Ok(());
                    }
                    idx = 0;
                }
                Some(other) => {
                    debug!(?other, "reading kind not valid in this ordering");
                    return Err(ReduceError::SkipLine);
                }
            }
        }
    }

    pub(crate) fn data_cartesian(&mut self) -> Result<()> {
        let mut fr: Option<StationHandle> = None;
        let mut to: Option<StationHandle> = None;
        let mut first_is_to = None;
        let mut f_multi = false;

        self.readings.clear();

        let ordering = self.stack.top().ordering.clone();
        let mut idx = 0;

        loop {
            self.skipblanks();
            let tag = ordering.get(idx).copied();
            idx += 1;
            match tag {
                Some(Reading::From) => {
                    fr = Some(self.read_station()?);
                    first_is_to.get_or_insert(false);
                }
                Some(Reading::To) => {
                    to = Some(self.read_station()?);
                    first_is_to.get_or_insert(true);
                }
                Some(Reading::Station) => {
                    fr = to;
                    to = Some(self.read_station()?);
                    first_is_to = Some(true);
                }
                Some(Reading::Dx) => self.read_field(Field::Dx, false)?,
                Some(Reading::Dy) => self.read_field(Field::Dy, false)?,
                Some(Reading::Dz) => self.read_field(Field::Dz, false)?,
                Some(Reading::Ignore) => self.skipword(),
                Some(Reading::IgnoreAllAndNewLine) | Some(Reading::Newline) => {
                    if tag == Some(Reading::IgnoreAllAndNewLine) {
                        self.skipline();
                    }
                    if let (Some(f), Some(t)) = (fr, to) {
                        let ok =
                            self.process_cartesian(f, t, first_is_to.unwrap_or(false))?;
                        if !ok {
                            self.skipline();
                        }
                    }
                    f_multi = true;
                    loop {
                        self.process_eol();
                        self.skipblanks();
                        if self.is_data_here() {
                            break;
                        }
                        if !self.is_comment_here() {
                            return Ok(());
                        }
                    }
                }
                Some(Reading::IgnoreAll) | None => {
                    if tag == Some(Reading::IgnoreAll) {
                        self.skipline();
                    }
                    if !f_multi {
                        if let (Some(f), Some(t)) = (fr, to) {
                            self.process_cartesian(f, t, first_is_to.unwrap_or(false))?;
                        }
                        self.process_eol();
                        return Ok(());
                    }
                    loop {
                        self.process_eol();
                        self.skipblanks();
                        if !self.is_comment_here() {
                            break;
                        }
                    }
                    if !self.is_data_here() {
                        return Ok(());
                    }
                    idx = 0;
                }
                Some(other) => {
                    debug!(?other, "reading kind not valid in this ordering");
                    return Err(ReduceError::SkipLine);
                }
            }
        }
    }

    pub(crate) fn data_passage(&mut self) -> Result<()> {
        let mut stn: Option<StationHandle> = None;

        self.readings.clear();

        let ordering = self.stack.top().ordering.clone();
        let mut idx = 0;

        loop {
            self.skipblanks();
            let tag = ordering.get(idx).copied();
            idx += 1;
            match tag {
                Some(Reading::Station) => {
                    stn = Some(self.read_station()?);
                }
                Some(
                    tag @ (Reading::Left | Reading::Right | Reading::Up | Reading::Down),
                ) => {
                    let field = match tag {
                        Reading::Left => Field::Left,
                        Reading::Right => Field::Right,
                        Reading::Up => Field::Up,
                        _ => Field::Down,
                    };
                    self.read_field(field, true)?;
                    if self.readings.val(field).is_none() {
                        if self.is_omit_here() {
                            self.cur.advance();
                        } else {
                            self.error(Span::Token, "Expecting numeric field");
                        }
                    }
                }
                Some(Reading::Ignore) => self.skipword(),
                Some(Reading::IgnoreAll) | None => {
                    if tag == Some(Reading::IgnoreAll) {
                        self.skipline();
                    }
                    if let Some(s) = stn {
                        self.process_lrud(s)?;
                    }
                    self.process_eol();
                    return Ok(());
                }
                Some(other) => {
                    debug!(?other, "reading kind not valid in this ordering");
                    return Err(ReduceError::SkipLine);
                }
            }
        }
    }

    pub(crate) fn data_nosurvey(&mut self) -> Result<()> {
        let mut fr: Option<StationHandle> = None;
        let mut to: Option<StationHandle> = None;
        let mut first_is_to = None;
        let mut f_multi = false;

        let ordering = self.stack.top().ordering.clone();
        let mut idx = 0;

        loop {
            self.skipblanks();
            let tag = ordering.get(idx).copied();
            idx += 1;
            match tag {
                Some(Reading::From) => {
                    fr = Some(self.read_station()?);
                    first_is_to.get_or_insert(false);
                }
                Some(Reading::To) => {
                    to = Some(self.read_station()?);
                    first_is_to.get_or_insert(true);
                }
                Some(Reading::Station) => {
                    fr = to;
                    to = Some(self.read_station()?);
                    first_is_to = Some(true);
                }
                Some(Reading::Ignore) => self.skipword(),
                Some(Reading::IgnoreAllAndNewLine) | Some(Reading::Newline) => {
                    if tag == Some(Reading::IgnoreAllAndNewLine) {
                        self.skipline();
                    }
                    if let (Some(f), Some(t)) = (fr, to) {
                        self.process_nosurvey(f, t, first_is_to.unwrap_or(false))?;
                    }
                    f_multi = true;
                    loop {
                        self.process_eol();
                        self.skipblanks();
                        if self.is_data_here() {
                            break;
                        }
                        if !self.is_comment_here() {
                            return Ok(());
                        }
                    }
                }
                Some(Reading::IgnoreAll) | None => {
                    if tag == Some(Reading::IgnoreAll) {
                        self.skipline();
                    }
                    if !f_multi {
                        if let (Some(f), Some(t)) = (fr, to) {
                            self.process_nosurvey(f, t, first_is_to.unwrap_or(false))?;
                        }
                        self.process_eol();
                        return Ok(());
                    }
                    loop {
                        self.process_eol();
                        self.skipblanks();
                        if !self.is_comment_here() {
                            break;
                        }
                    }
                    if !self.is_data_here() {
                        return Ok(());
                    }
                    idx = 0;
                }
                Some(other) => {
                    debug!(?other, "reading kind not valid in this ordering");
                    return Err(ReduceError::SkipLine);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geomag::NullGeomag;
    use crate::network::{CollectingNetwork, StationTable};

    fn reduce(settings: Settings, text: &str) -> (CollectingNetwork, StationTable, u32, u32) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("survey.svx");
        std::fs::write(&path, text).unwrap();
        let mut stations = StationTable::new();
        let mut net = CollectingNetwork::new();
        let geomag = NullGeomag;
        colored::control::set_override(false);
        let rep = Reporter::with_writer(Box::new(std::io::sink()));
        let (warnings, errors);
        {
            let mut p =
                Processor::with_reporter(settings, &mut stations, &mut net, &geomag, rep);
            p.reduce_file(&path).unwrap();
            warnings = p.warnings();
            errors = p.errors();
        }
        (net, stations, warnings, errors)
    }

    #[test]
    fn east_pointing_leg() {
        let (net, _stations, warnings, errors) =
            reduce(Settings::native(), "A B 10.0 90 0\n");
        assert_eq!(errors, 0);
        assert_eq!(warnings, 0);
        assert_eq!(net.legs.len(), 1);
        let leg = &net.legs[0];
        assert!((leg.dx - 10.0).abs() < 1e-9, "{}", leg.dx);
        assert!(leg.dy.abs() < 1e-9);
        assert!(leg.dz.abs() < 1e-9);
    }

    #[test]
    fn plumbed_leg_goes_straight_up() {
        let (net, _stations, warnings, errors) =
            reduce(Settings::native(), "A B 5.0 - UP\n");
        assert_eq!(errors, 0);
        assert_eq!(warnings, 0);
        let leg = &net.legs[0];
        assert_eq!(leg.dx, 0.0);
        assert_eq!(leg.dy, 0.0);
        assert!((leg.dz - 5.0).abs() < 1e-12);
        assert_eq!(leg.cxy, 0.0);
    }

    #[test]
    fn bearing_above_full_circle_warns_and_wraps() {
        let (net, _stations, warnings, _) =
            reduce(Settings::native(), "A B 10.0 370 0\n");
        assert_eq!(warnings, 1);
        let leg = &net.legs[0];
        // Wrapped to 10 degrees.
        assert!((leg.dy - 10.0 * (10.0f64.to_radians()).cos()).abs() < 1e-9);
    }

    #[test]
    fn exactly_360_is_silent() {
        let (_, _, warnings, errors) = reduce(Settings::native(), "A B 10.0 360 0\n");
        assert_eq!(warnings, 0);
        assert_eq!(errors, 0);
    }

    #[test]
    fn omitted_compass_on_unplumbed_leg_is_an_error() {
        let (net, _, _, errors) = reduce(Settings::native(), "A B 10.0 - 0\n");
        assert_eq!(errors, 1);
        assert!(net.legs.is_empty());
    }

    #[test]
    fn omitted_tape_is_an_error() {
        let mut s = Settings::native();
        s.infer.equates = false;
        let (net, _, _, errors) = reduce(s, "A B - 90 0\n");
        assert_eq!(errors, 1);
        assert!(net.legs.is_empty());
    }

    #[test]
    fn inferred_equate_for_zero_tape() {
        let mut s = Settings::native();
        s.infer.equates = true;
        let (net, stations, _, errors) = reduce(s, "A B 0.0 - -\n");
        assert_eq!(errors, 0);
        assert!(net.legs.is_empty());
        assert_eq!(net.equates.len(), 1);
        assert_eq!(stations.len(), 2);
    }

    #[test]
    fn direction_reversal_flips_the_leg() {
        let mut s = Settings::native();
        s.ordering = vec![
            Reading::From,
            Reading::To,
            Reading::Tape,
            Reading::Comp,
            Reading::Clino,
            Reading::Dir,
        ];
        let (net, stations, _, errors) = reduce(s, "A B 10.0 90 0 B\n");
        assert_eq!(errors, 0);
        let leg = &net.legs[0];
        // Stations swapped; the displacement still describes from -> to.
        assert_eq!(stations.name(leg.from), "B");
        assert_eq!(stations.name(leg.to), "A");
    }

    #[test]
    fn error_line_recovers_and_later_lines_reduce() {
        let (net, _, _, errors) = reduce(
            Settings::native(),
            "A B 10.0 bogus 0\nB C 2.0 0 0\n",
        );
        assert_eq!(errors, 1);
        assert_eq!(net.legs.len(), 1);
        assert!((net.legs[0].dy - 2.0).abs() < 1e-9);
    }

    #[test]
    fn comments_and_blank_lines_skipped() {
        let (net, _, warnings, errors) = reduce(
            Settings::native(),
            "; survey of the streamway\n\nA B 1.0 0 0 ; trailing note\n*flags splay\n",
        );
        assert_eq!(errors, 0);
        assert_eq!(warnings, 0);
        assert_eq!(net.legs.len(), 1);
    }

    #[test]
    fn passage_cross_section_with_omitted_side() {
        let mut s = Settings::native();
        s.style = Style::Passage;
        s.ordering = vec![
            Reading::Station,
            Reading::Left,
            Reading::Right,
            Reading::Up,
            Reading::Down,
        ];
        let (net, _, _, errors) = reduce(s, "A 0.5 1.5 - 2.0\n");
        assert_eq!(errors, 0);
        assert_eq!(net.cross_sections.len(), 1);
        let xs = &net.cross_sections[0];
        assert_eq!(xs.left, Some(0.5));
        assert_eq!(xs.up, None);
        assert_eq!(xs.down, Some(2.0));
    }

    #[test]
    fn nosurvey_link_recorded() {
        let mut s = Settings::native();
        s.style = Style::NoSurvey;
        s.ordering = vec![Reading::From, Reading::To];
        let (net, _, _, errors) = reduce(s, "A B\n");
        assert_eq!(errors, 0);
        assert_eq!(net.no_survey_links.len(), 1);
    }

    #[test]
    fn diving_style_reduces_depth_pair() {
        let mut s = Settings::native();
        s.style = Style::Diving;
        s.ordering = vec![
            Reading::From,
            Reading::To,
            Reading::Tape,
            Reading::Comp,
            Reading::FrDepth,
            Reading::ToDepth,
        ];
        let (net, _, warnings, errors) = reduce(s, "A B 5.0 0 -10.0 -7.0\n");
        assert_eq!(errors, 0);
        assert_eq!(warnings, 0);
        let leg = &net.legs[0];
        assert!((leg.dz - 3.0).abs() < 1e-12);
        assert!((leg.dy - 4.0).abs() < 1e-12, "{}", leg.dy);
        assert!(leg.dx.abs() < 1e-12);
    }

    #[test]
    fn end_of_line_junk_reported() {
        let (net, _, _, errors) =
            reduce(Settings::native(), "A B 1.0 0 0 junk\n");
        assert_eq!(errors, 1);
        // The leg itself still reduces.
        assert_eq!(net.legs.len(), 1);
    }

    #[test]
    fn interleaved_ordering_with_chained_stations() {
        let mut s = Settings::native();
        s.ordering = vec![
            Reading::Station,
            Reading::Newline,
            Reading::Tape,
            Reading::Comp,
            Reading::Clino,
        ];
        // Stations alternate with measurement lines; each leg's readings
        // sit between its two stations.
        let (net, stations, _, errors) = reduce(s, "A\n10.0 90 0\nB\n");
        assert_eq!(errors, 0);
        assert_eq!(net.legs.len(), 1);
        assert!((net.legs[0].dx - 10.0).abs() < 1e-9);
        assert_eq!(stations.name(net.legs[0].from), "A");
        assert_eq!(stations.name(net.legs[0].to), "B");
    }
}
