//! # Sessync Testkit
//!
//! Test utilities for the sessync engine.
//!
//! This crate provides:
//! - Sample sessions, snapshots and frames
//! - A fast engine configuration for paused-clock tests
//! - A recording subscriber
//! - Property-based test generators using proptest
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sessync_testkit::prelude::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_with_engine() {
//!     init_test_tracing();
//!     let transport = MockTransport::new();
//!     transport.set_snapshot(idle_snapshot(1));
//!     let engine = SyncEngine::new(fast_config(), transport.clone(), transport.clone()).unwrap();
//!     let (recorder, _subscription) = StateRecorder::attach(&engine);
//!     // ... drive the transport
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use sessync_engine::{MockTransport, SyncEngine};
}

pub use fixtures::*;
pub use generators::*;
