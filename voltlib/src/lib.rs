pub mod config;
pub mod history;
pub mod sampler;
pub mod screen;
pub mod transport;

#[cfg(test)]
pub(crate) mod fake;

pub use mcp3208_eh::{Channel, Mcp3208, CHANNEL_COUNT};
