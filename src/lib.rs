//! Task list with manual ordering, date buckets and AI-assisted planning.

pub mod assist;
pub mod config;
pub mod controller;
pub mod filter;
pub mod grouping;
pub mod logging;
pub mod model;
pub mod notes;
pub mod ordering;
pub mod store;
