#![deny(clippy::all)]

pub mod config;
pub mod diff;
pub mod evaluator;
pub mod exec;
pub mod lang;
pub mod progress;
pub mod queue;
pub mod server;
pub mod store;

pub use self::config::Config;
