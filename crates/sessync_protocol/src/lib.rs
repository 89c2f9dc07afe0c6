//! # Sessync Protocol
//!
//! Wire types and frame codec for the sessync live session engine.
//!
//! This crate provides:
//! - `SessionInfo`, `ResourceUsage` and `PhaseProgress` payloads
//! - `PushFrame`, the closed set of push channel frames
//! - `SessionSnapshot` for the request/response snapshot endpoint
//! - `SessionCommand` for the control endpoint
//! - JSON (text frames) and CBOR (binary frames) decoding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod command;
mod error;
mod frame;
mod session;
mod snapshot;

pub use command::SessionCommand;
pub use error::{ProtocolError, ProtocolResult};
pub use frame::{decode_frame, PushFrame, RawFrame};
pub use session::{PhaseProgress, ResourceUsage, SessionInfo, SessionStatus};
pub use snapshot::SessionSnapshot;

/// Ordering token attached by the provider to every frame and snapshot.
///
/// Higher values are newer, independent of arrival order.
pub type LogicalTimestamp = u64;
