//! Historical electoral results importer for Guardianes.
//!
//! Reads the state electorate file and one CSV per past election, resolves
//! municipality names, aggregates precinct rows per (municipality, party)
//! and stores the totals in PostgreSQL.

pub mod aggregate;
pub mod config;
pub mod db;
pub mod delimiter;
pub mod error;
pub mod lookup;
pub mod model;
pub mod normalize;
pub mod orchestrator;
pub mod percentage;
pub mod schema;
pub mod source;

pub use error::{ImportError, Result};
