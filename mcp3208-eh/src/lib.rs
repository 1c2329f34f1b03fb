//! Driver for the MCP3208 12-bit, 8-channel SPI ADC on top of `embedded-hal`.
//!
//! The framing helpers ([`command`], [`decode`], [`to_voltage`]) are pure and
//! usable without a bus; [`Mcp3208`] wires them to any blocking full-duplex
//! `Transfer<u8>` implementation.

pub mod channel;
pub mod mcp3208;

pub use channel::{Channel, InvalidChannel, CHANNEL_COUNT};
pub use mcp3208::{command, decode, to_voltage, Error, Mcp3208, FRAME_LEN, MAX_CODE};
