//! CLI command implementations

pub mod completions;
pub mod config;
pub mod inspect;
pub mod io;
pub mod maintenance;
pub mod schema;
