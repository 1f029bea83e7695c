//! High-level Database API and REPL interface.
//!
//! This module selects a backend from a [`DatabaseConfig`], wraps it in a
//! user-facing [`Database`] handle and provides an interactive command-line
//! interface on top.

mod api;
mod config;
mod repl;

pub use api::{Database, DatabaseError, DatabaseResult};
pub use config::{Backend, DatabaseConfig};
pub use repl::{Repl, ReplConfig, Reply};
