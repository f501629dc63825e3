pub mod errors;
pub mod metrics;
pub mod quantity;
pub mod telemetry;

pub use errors::*;
