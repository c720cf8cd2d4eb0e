//! Application runtime engine: supervises local application processes,
//! watches their sources, monitors their health and exposes a management
//! socket for the `apprt` CLI.

pub mod adapters;
pub mod application;
pub mod domain;
pub mod infrastructure;
