//! Wire encodings shared by the bar transport.
//!
//! This crate provides:
//! - The argv framing the bar expects for inbound commands
//! - The env-blob layout the bar uses for outbound events
//!
//! Both formats are plain NUL-separated byte sequences; nothing here
//! touches Mach, so the crate builds and tests on every platform.

mod argv;
mod env;

pub use argv::*;
pub use env::*;
