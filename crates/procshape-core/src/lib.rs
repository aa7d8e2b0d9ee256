//! procshape core library: result-shape analysis for SQL Server procedures
//! and functions.
//!
//! This crate turns raw object definitions into typed content models (result
//! sets, nested JSON projections, EXEC delegation) and keeps them current
//! across runs with a fingerprinted tick cache and per-schema snapshots.
//! Rendering code from the models is left to the host.

pub mod analyzer;
pub mod config;
pub mod errors;
pub mod models;
pub mod schema;
pub mod store;
