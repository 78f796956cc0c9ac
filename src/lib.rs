pub mod collector;
pub mod config;
pub mod error;
pub mod ledger;
pub mod run;
pub mod script;
pub mod submit;

/// Version reported in the startup banner.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
