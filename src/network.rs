//! Collaborator interfaces: station resolution and the network-adjustment
//! sink, plus in-memory implementations used by the CLI and tests.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{CrossSection, FixOutcome, Leg, NoSurveyLink, StationHandle};

/// Resolves station names to opaque handles and records absolute fixes.
pub trait StationResolver {
    /// Resolve a name in the current context, creating it if new.
    fn resolve(&mut self, name: &str) -> StationHandle;

    /// Fix a station's absolute coordinates. A station may be fixed exactly
    /// once; the outcome reports whether a refix agreed or conflicted (a
    /// conflicting refix leaves the original coordinates in place).
    fn fix(&mut self, station: StationHandle, x: f64, y: f64, z: f64) -> FixOutcome;
}

/// Receives the reduction output, one record per measured connection.
pub trait SurveyNetwork {
    fn add_leg(&mut self, leg: Leg);
    fn add_equate(&mut self, a: StationHandle, b: StationHandle);
    fn add_cross_section(&mut self, section: CrossSection);
    fn add_no_survey_link(&mut self, link: NoSurveyLink);
}

/// Simple name-interning station resolver.
#[derive(Debug, Default)]
pub struct StationTable {
    by_name: HashMap<String, StationHandle>,
    names: Vec<String>,
    fixes: HashMap<StationHandle, [f64; 3]>,
}

impl StationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self, station: StationHandle) -> &str {
        &self.names[station.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn fixed_position(&self, station: StationHandle) -> Option<[f64; 3]> {
        self.fixes.get(&station).copied()
    }
}

impl StationResolver for StationTable {
    fn resolve(&mut self, name: &str) -> StationHandle {
        if let Some(&h) = self.by_name.get(name) {
            return h;
        }
        let h = StationHandle(self.names.len() as u32);
        self.names.push(name.to_string());
        self.by_name.insert(name.to_string(), h);
        debug!(name, handle = h.0, "new station");
        h
    }

    fn fix(&mut self, station: StationHandle, x: f64, y: f64, z: f64) -> FixOutcome {
        match self.fixes.get(&station) {
            None => {
                self.fixes.insert(station, [x, y, z]);
                FixOutcome::Fixed
            }
            Some(&[px, py, pz]) => {
                if px == x && py == y && pz == z {
                    FixOutcome::AlreadyFixed
                } else {
                    FixOutcome::Conflict
                }
            }
        }
    }
}

/// Network sink that just collects everything, in input order.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CollectingNetwork {
    pub legs: Vec<Leg>,
    pub equates: Vec<(StationHandle, StationHandle)>,
    pub cross_sections: Vec<CrossSection>,
    pub no_survey_links: Vec<NoSurveyLink>,
}

impl CollectingNetwork {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SurveyNetwork for CollectingNetwork {
    fn add_leg(&mut self, leg: Leg) {
        self.legs.push(leg);
    }

    fn add_equate(&mut self, a: StationHandle, b: StationHandle) {
        self.equates.push((a, b));
    }

    fn add_cross_section(&mut self, section: CrossSection) {
        self.cross_sections.push(section);
    }

    fn add_no_survey_link(&mut self, link: NoSurveyLink) {
        self.no_survey_links.push(link);
    }
}
