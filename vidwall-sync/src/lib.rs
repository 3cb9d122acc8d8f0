//! # vidwall-sync — screen coordination for a synchronized video wall
//!
//! Turns independently connecting browser screens into one logical wall:
//! each screen gets a grid slot and a crop transform, and all of them
//! follow one authoritative playback timeline.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌──────────────────────────────┐
//! │ Screen      │ ◄────────────────► │ SyncServer                   │
//! │ (per tile)  │     JSON frames    │                              │
//! └─────────────┘                    │  Coordinator                 │
//! ┌─────────────┐                    │   ├── SessionRegistry        │
//! │ Admin       │ ◄────────────────► │   ├── MatrixTopology ─ Viewport
//! │ console     │                    │   └── PlaybackTimeline       │
//! └─────────────┘                    │          │                   │
//!                                    │   BroadcastGroup (fan-out)   │
//!                                    └──────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`registry`] — connected display nodes and their ids
//! - [`topology`] — grid config, assign/swap, resize, matrix snapshot
//! - [`viewport`] — per-tile crop transform
//! - [`timeline`] — playback state machine and drift correction
//! - [`patch`] — generic partial config updates
//! - [`coordinator`] — applies events and picks each delta's audience
//! - [`broadcast`] — fire-and-forget `publish` capability
//! - [`protocol`] — JSON wire messages
//! - [`server`] — WebSocket server and configuration
//! - [`upload`] — stores uploaded videos and hands back their URL

pub mod registry;
pub mod topology;
pub mod viewport;
pub mod timeline;
pub mod patch;
pub mod coordinator;
pub mod broadcast;
pub mod protocol;
pub mod server;
pub mod upload;

// Re-exports for convenience
pub use registry::{ConnectionId, DisplayNode, NodeId, NodeStatus, Position, SessionRegistry};
pub use topology::{Assignment, DisplayMode, GridConfig, MatrixCell, MatrixSnapshot, MatrixTopology};
pub use viewport::{viewport, Viewport};
pub use timeline::{AudioMode, PlaybackState, PlaybackTimeline, Transition};
pub use patch::{ConfigPatch, PatchError};
pub use coordinator::Coordinator;
pub use broadcast::{BroadcastGroup, BroadcastStats, Envelope, Outbox, Publish, Recipients};
pub use protocol::{ClientMessage, PlaybackCommand, ProtocolError, ServerMessage};
pub use server::{ConfigError, ServerConfig, ServerError, ServerStats, SyncServer};
pub use upload::{DiskUploadStore, UploadError, UploadStore};
