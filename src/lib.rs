//! Survey Reducer Library
//!
//! A Rust library for reducing raw cave survey instrument readings into
//! 3-dimensional displacement vectors with full measurement covariance.
//!
//! This library provides tools for:
//! - Parsing native survey data files and Compass .dat/.mak files
//! - Scanning tape/compass/clino, diving, cartesian and passage data styles
//! - Combining foresight and backsight readings by inverse variance
//! - Propagating instrument error into per-leg covariance matrices
//! - Reporting diagnostics with caret-positioned source context across
//!   nested file inclusions
//!
//! The parsing entry point is [`processor::Processor`], which reduces files
//! against pluggable station-resolution and network-sink collaborators.

pub mod charset;
pub mod config;
pub mod constants;
pub mod date;
pub mod diagnostics;
pub mod error;
pub mod formats;
pub mod geomag;
pub mod models;
pub mod network;
pub mod processor;
pub mod reading;
pub mod reduce;
pub mod source;

// Re-export commonly used types
pub use config::{Declination, Quantity, Settings};
pub use error::{ReduceError, Result};
pub use formats::FileFormat;
pub use models::{CrossSection, Leg, NoSurveyLink, StationHandle, Style};
pub use network::{CollectingNetwork, StationTable, SurveyNetwork};
pub use processor::Processor;
