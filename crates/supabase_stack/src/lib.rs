pub mod applier;
pub mod config;
pub mod hardware;
pub mod orchestrator;
pub mod resources;
pub mod scheduler;
pub mod secrets;
pub mod stack;
pub mod util;

pub use orchestrator::{DeploymentResult, DestroyResult, Orchestrator};
pub use util::errors::{Error, Result};

#[cfg(test)]
pub mod tests;
