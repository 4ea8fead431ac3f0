//! Chat message aggregation on top of the CLI bridge.

mod aggregator;
mod bridge;
mod message;

pub use aggregator::*;
pub use bridge::*;
pub use message::*;
