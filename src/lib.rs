//! Competitor website monitoring: locate category pages on tracked sites,
//! extract structured facts, and record significance-rated changes.

pub mod alerts;
pub mod config;
pub mod db;
pub mod diff;
pub mod fetch;
pub mod limiter;
pub mod locator;
pub mod model;
pub mod monitor;
pub mod parser;
pub mod runner;
pub mod scheduler;
pub mod store;
pub mod text;
