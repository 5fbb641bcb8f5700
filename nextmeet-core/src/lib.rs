//! Core types for the nextmeet ecosystem.
//!
//! This crate provides the pieces shared by the daemon and the client CLI:
//! - `Meeting` and the filter engine that selects what a status bar shows
//! - `protocol` module for the newline-delimited JSON socket protocol
//! - `tsv` module for parsing the calendar CLI's agenda output

pub mod error;
pub mod filter;
pub mod meeting;
pub mod paths;
pub mod protocol;
pub mod tsv;

pub use error::{NextmeetError, NextmeetResult};
pub use filter::{FilterOptions, apply_filters, next_meeting};
pub use meeting::Meeting;
