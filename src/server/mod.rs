//! Host runtime for the Extract engine
//!
//! # Module Structure
//!
//! - `config`: Configuration structures
//! - `loader`: Configuration loading from files and environment
//! - `mailer`: Notification transport writing to the log
//! - `init`: Engine initialization and run loop

pub mod config;
mod init;
mod loader;
mod mailer;

pub use init::run;
pub use loader::{load_config, DEFAULT_CONFIG};
