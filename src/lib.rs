//! Household electricity-demand synthesis and geographic rollup.
//!
//! Per-unit load profiles are simulated from appliance counts, rolled up
//! into statistics, normalized by household counts and joined onto
//! administrative geometry for web mapping.

pub mod cli;
pub mod columns;
pub mod config;
/// Profile simulation engines.
pub mod engine;
pub mod error;
pub mod io;
pub mod key;
pub mod pipeline;
pub mod runner;
