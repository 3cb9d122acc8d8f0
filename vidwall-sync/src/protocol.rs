//! JSON wire protocol between the coordinator and its connections.
//!
//! One message per WebSocket text frame, tagged by `"type"`:
//! ```text
//! → {"type":"assign","row":0,"col":1}
//! → {"type":"command","command":{"action":"seek","time":12.5}}
//! ← {"type":"positionAssigned","position":{"row":0,"col":1},"viewport":{…}}
//! ← {"type":"playbackSync","patch":{"currentTime":12.5}}
//! ```
//!
//! Display nodes and admin consoles share the same protocol; a connection
//! becomes a display node only after it sends `register`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::patch::ConfigPatch;
use crate::registry::{ConnectionId, DisplayNode, NodeId, Position};
use crate::timeline::AudioMode;
use crate::topology::MatrixSnapshot;
use crate::viewport::Viewport;

/// Playback commands, tagged by `"action"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PlaybackCommand {
    Play,
    Pause,
    Stop,
    ToggleMute,
    Seek {
        time: f64,
    },
    SetVolume {
        volume: f64,
    },
    SetAudioMode {
        mode: AudioMode,
        #[serde(default)]
        target: Option<NodeId>,
    },
    SetUrl {
        url: String,
    },
    /// Shallow merge over playback and grid fields; see [`crate::patch`].
    PatchConfig {
        patch: Value,
    },
}

/// Inbound: connection → coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Register,
    /// Place a node. `connection_id` defaults to the sender.
    Assign {
        row: u32,
        col: u32,
        #[serde(default)]
        connection_id: Option<ConnectionId>,
    },
    Unassign {
        #[serde(default)]
        connection_id: Option<ConnectionId>,
    },
    Command {
        command: PlaybackCommand,
    },
    ReportTime {
        time: f64,
    },
    ReportDuration {
        duration: f64,
    },
    GetConfig,
    GetNodes,
    GetMatrix,
    Ping,
}

/// Outbound: coordinator → connection(s).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Registered {
        node: DisplayNode,
    },
    NodesChanged {
        nodes: Vec<DisplayNode>,
    },
    MatrixChanged {
        matrix: MatrixSnapshot,
    },
    ConfigChanged {
        patch: ConfigPatch,
    },
    PlaybackSync {
        patch: ConfigPatch,
    },
    PositionAssigned {
        position: Position,
        viewport: Viewport,
    },
    PositionUnassigned,
    Config {
        config: ConfigPatch,
    },
    Nodes {
        nodes: Vec<DisplayNode>,
    },
    Matrix {
        matrix: MatrixSnapshot,
    },
    Pong,
    Error {
        message: String,
    },
}

/// Protocol errors.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),
    #[error("Deserialization error: {0}")]
    Deserialization(#[source] serde_json::Error),
    #[error("Unsupported frame: {0}")]
    UnsupportedFrame(&'static str),
}

impl ClientMessage {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Serialization)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Deserialization)
    }
}

impl ServerMessage {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Serialization)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Deserialization)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error { message: message.into() }
    }

    /// Wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Registered { .. } => "registered",
            Self::NodesChanged { .. } => "nodesChanged",
            Self::MatrixChanged { .. } => "matrixChanged",
            Self::ConfigChanged { .. } => "configChanged",
            Self::PlaybackSync { .. } => "playbackSync",
            Self::PositionAssigned { .. } => "positionAssigned",
            Self::PositionUnassigned => "positionUnassigned",
            Self::Config { .. } => "config",
            Self::Nodes { .. } => "nodes",
            Self::Matrix { .. } => "matrix",
            Self::Pong => "pong",
            Self::Error { .. } => "error",
        }
    }
}
