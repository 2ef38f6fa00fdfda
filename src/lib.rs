//! Track usage - durable play counts, favorites and recency for licensed tracks
//!
//! This library provides the usage store that track displays and dashboards
//! read from, plus the configuration and logging setup used by the
//! `track-usage` command-line tool.

pub mod config;
pub mod logging;
pub mod usage;
