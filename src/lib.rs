#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

//! rbui library — an AT-command driver for the RockBLOCK Iridium SBD modem.
//!
//! The building blocks, bottom up:
//! - [`transport`] — byte-oriented serial link with a per-line deadline
//! - [`at`] — AT command framing and response expectations
//! - [`status`] — `+SBDIX` / `+SBDSX` status records
//! - [`driver`] — line-discipline negotiation, session engine, facade
//! - [`msglog`] — durable append-only message log
//! - [`config`] — configuration loading
//! - [`error`] — failure taxonomy

pub mod at;
pub mod config;
pub mod driver;
pub mod error;
pub mod msglog;
pub mod status;
pub mod transport;

// Re-export key types at crate root for convenience.
pub use config::Config;
pub use driver::RockBlock;
pub use error::{Error, Result};
pub use msglog::MessageLog;
pub use status::{SbdixStatus, SbdsxStatus};
pub use transport::{SerialTransport, Transport};
