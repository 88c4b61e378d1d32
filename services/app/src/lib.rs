//! services/app/src/lib.rs
//!
//! The `app` service: backend adapters, configuration and the wiring that turns
//! a `Config` into a ready `Gateway`.

pub mod adapters;
pub mod backend;
pub mod config;
pub mod error;
