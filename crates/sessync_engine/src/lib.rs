//! # Sessync Engine
//!
//! Keeps a client's view of one long-lived remote session consistent with
//! the provider.
//!
//! This crate provides:
//! - Push channel manager with heartbeat liveness
//! - Reconnection with exponential backoff and a retry budget
//! - Adaptive polling as the fallback path
//! - A state reconciler ordering updates by logical timestamp
//! - Connection quality estimation
//! - HTTP (reqwest) and WebSocket (tokio-tungstenite) transports
//!
//! ## Architecture
//!
//! Push frames and poll snapshots both flow into the reconciler, which is
//! the only writer of [`SyncedState`]:
//! 1. The push channel delivers frames as they happen
//! 2. The poll scheduler fetches snapshots as a safety net
//! 3. The reconciler discards stale and duplicate updates, commits the rest
//!    and notifies subscribers synchronously
//!
//! ## Key Invariants
//!
//! - The highest logical timestamp wins
//! - `lastUpdate` only moves forward
//! - Connection status changes are published in order
//! - Commands never mutate state locally
//! - Only `initialize` returns errors to the caller

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod channel;
mod clock;
mod config;
mod driver;
mod engine;
mod error;
mod http;
mod poll;
mod quality;
mod reconciler;
mod reconnect;
mod snapshot;
mod state;
mod transport;
mod ws;

pub use channel::{ChannelEvent, ChannelMessage, CloseReason, PushChannel};
pub use clock::Clock;
pub use config::{EngineConfig, PollConfig};
pub use engine::{Subscription, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use http::HttpSnapshotClient;
pub use poll::PollScheduler;
pub use quality::{estimate as estimate_quality, ConnectionQuality, EXCELLENT_WITHIN, GOOD_WITHIN, POOR_WITHIN};
pub use reconciler::{CommitOutcome, Listener, Reconciler, Subscribers};
pub use reconnect::{ReconnectController, ReconnectDecision, ReconnectPhase};
pub use snapshot::SnapshotFetcher;
pub use state::{ConnectionInfo, ConnectionStatus, EngineStats, SessionView, SyncedState, UiFlags};
pub use transport::{MockTransport, PushConnection, PushTransport, SnapshotTransport};
pub use ws::{WebSocketConnection, WebSocketTransport};
