//! CLI command implementations

pub mod config;
pub mod keys;
pub mod run;

pub use config::execute as config;
pub use keys::execute as keys;
pub use run::execute as run;
