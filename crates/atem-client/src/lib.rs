//! ATEM Client Library
//!
//! High-level async client for ATEM-family production switchers. The
//! client keeps one UDP session alive, mirrors the switcher's state
//! locally, notifies subscribers of changes, and submits control commands.
//!
//! # Example
//!
//! ```ignore
//! use atem_client::Atem;
//! use atem_core::{Command, Source, StateEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), atem_client::ClientError> {
//!     let atem = Atem::connect("10.0.0.40").await?;
//!
//!     atem.on_event(|event, packet| {
//!         if event == StateEvent::Source {
//!             println!("program/preview changed (packet {packet})");
//!         }
//!     });
//!
//!     atem.send_commands(vec![
//!         Command::Preview { me: 0, source: Source::input(2) },
//!         Command::Auto { me: 0 },
//!     ])?;
//!
//!     Ok(())
//! }
//! ```
//!
//! State queries go through a scoped lock:
//!
//! ```ignore
//! let state = atem.state()?;
//! if let Some(program) = state.program_input(0) {
//!     println!("on air: {program}");
//! }
//! ```

pub mod builder;
pub mod client;
pub mod error;
mod events;
#[cfg(feature = "send-retention")]
mod ring;
mod session;

pub use builder::AtemBuilder;
pub use client::{Atem, StateGuard};
pub use error::{ClientError, Result};
pub use session::ConnectionState;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::builder::AtemBuilder;
    pub use crate::client::Atem;
    pub use crate::error::{ClientError, Result};
    pub use atem_core::{Command, Source, StateEvent, SwitcherState};
}
