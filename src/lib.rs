//! # simplegs: embedded game-server protocol core
//!
//! A single-process game server that speaks a minimal text command
//! protocol over UDP, coordinates its lifecycle with an orchestration
//! sidecar, and relays gameplay outcomes to downstream backend services.
//!
//! ## Architecture
//!
//! Datagrams flow through a strictly sequential pipeline:
//!
//! ```text
//! datagram -> transport loop -> command parser -> dispatcher
//!                 ^                                  |
//!                 |         session registry / downstream facade
//!                 +------------- reply <-------------+
//! ```
//!
//! One task owns the transport loop and processes datagrams one at a
//! time, so the session registry has a single writer and needs no
//! locking. The lifecycle controller's watch task runs concurrently but
//! only observes; it never touches session state.
//!
//! ## Module Organization
//!
//! - [`command`]: pure text parsing into a closed verb enum
//! - [`registry`]: match/player tracking with endpoint indices
//! - [`dispatcher`]: the command state machine producing replies and
//!   envelope decisions
//! - [`downstream`]: HTTP clients for the statistics and inventory
//!   services, behind a trait seam for testing
//! - [`lifecycle`]: readiness/shutdown signaling and state watching via
//!   the orchestration sidecar's local gateway
//! - [`transport`]: the UDP read/dispatch/write loop
//! - [`config`]: flags and environment resolution at startup
//!
//! ## Error policy
//!
//! Only two conditions are fatal at startup: failing to bind the socket
//! and failing to signal readiness. At runtime, per-sender write failures
//! and downstream RPC failures are reported and survived; a CRASH command
//! terminates the process with a non-zero exit code by design.

pub mod command;
pub mod config;
pub mod dispatcher;
pub mod downstream;
pub mod lifecycle;
pub mod registry;
pub mod transport;
