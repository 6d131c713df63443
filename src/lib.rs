pub mod config;
pub mod dispatch;
pub mod error;
pub mod generation;
pub mod messages;
pub mod orchestrator;
pub mod prompt;
pub mod server;
