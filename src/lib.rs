// Public API - only expose the runner module
pub mod runner;

// Internal modules - organized by subsystem
mod config;
mod coordination;
mod db;
mod formats;
mod io;
mod registry;
mod telemetry;
