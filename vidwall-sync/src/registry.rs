//! Session registry for connected display nodes.
//!
//! Owns every [`DisplayNode`] keyed by the transport's [`ConnectionId`],
//! remembers registration order, and keeps a `(row, col) → connection`
//! index so occupant lookups are O(1).
//!
//! The registry never decides *where* a node goes; placement policy
//! (swap-on-assign, resize eviction) lives in [`crate::topology`], which
//! moves nodes through [`SessionRegistry::set_position`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Transport-level connection handle. Minted by the server per socket.
pub type ConnectionId = Uuid;

/// Stable display-node identifier, rendered as `SCR-<hex>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct NodeId(Uuid);

impl NodeId {
    const PREFIX: &'static str = "SCR-";

    /// Generate a fresh, collision-resistant id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.0.simple().to_string().to_uppercase())
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for NodeId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let hex = value
            .strip_prefix(Self::PREFIX)
            .ok_or_else(|| format!("node id must start with {}: {value}", Self::PREFIX))?;
        Uuid::parse_str(hex)
            .map(NodeId)
            .map_err(|e| format!("invalid node id {value}: {e}"))
    }
}

/// A cell in the wall grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub row: u32,
    pub col: u32,
}

impl Position {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Unassigned,
    Assigned,
}

/// One physical screen participating in the wall.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayNode {
    pub id: NodeId,
    pub connection_id: ConnectionId,
    pub position: Option<Position>,
    pub status: NodeStatus,
    /// Milliseconds since the Unix epoch.
    pub connected_at: u64,
}

impl DisplayNode {
    fn new(connection_id: ConnectionId) -> Self {
        Self {
            id: NodeId::generate(),
            connection_id,
            position: None,
            status: NodeStatus::Unassigned,
            connected_at: now_millis(),
        }
    }

    pub fn is_assigned(&self) -> bool {
        self.status == NodeStatus::Assigned
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Connected display nodes, in registration order.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    nodes: HashMap<ConnectionId, DisplayNode>,
    order: Vec<ConnectionId>,
    by_position: HashMap<Position, ConnectionId>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection as a new, unassigned display node.
    ///
    /// Re-registering an existing connection replaces its node: the old
    /// slot is vacated and a fresh id is issued.
    pub fn register(&mut self, connection_id: ConnectionId) -> DisplayNode {
        self.remove(&connection_id);

        let node = DisplayNode::new(connection_id);
        self.nodes.insert(connection_id, node.clone());
        self.order.push(connection_id);
        node
    }

    /// Remove a connection's node. Idempotent.
    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<DisplayNode> {
        let node = self.nodes.remove(connection_id)?;
        self.order.retain(|id| id != connection_id);
        if let Some(pos) = node.position {
            if self.by_position.get(&pos) == Some(connection_id) {
                self.by_position.remove(&pos);
            }
        }
        Some(node)
    }

    pub fn get(&self, connection_id: &ConnectionId) -> Option<&DisplayNode> {
        self.nodes.get(connection_id)
    }

    pub fn get_by_position(&self, row: u32, col: u32) -> Option<&DisplayNode> {
        self.by_position
            .get(&Position::new(row, col))
            .and_then(|id| self.nodes.get(id))
    }

    /// Find the connection that owns a node id.
    pub fn find_by_node_id(&self, node_id: &NodeId) -> Option<&DisplayNode> {
        self.nodes.values().find(|n| n.id == *node_id)
    }

    /// Snapshot of all nodes in registration order.
    pub fn list_all(&self) -> Vec<DisplayNode> {
        self.order
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .cloned()
            .collect()
    }

    /// Nodes currently holding a slot, in registration order.
    pub fn assigned(&self) -> impl Iterator<Item = &DisplayNode> {
        self.order
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .filter(|n| n.position.is_some())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Move a node to `position` (or clear it with `None`), keeping the
    /// position index and status in step.
    ///
    /// Callers must have vacated `position` first; whoever held it in the
    /// index is overwritten.
    pub(crate) fn set_position(
        &mut self,
        connection_id: ConnectionId,
        position: Option<Position>,
    ) -> Option<&DisplayNode> {
        let node = self.nodes.get_mut(&connection_id)?;

        if let Some(old) = node.position.take() {
            if self.by_position.get(&old) == Some(&connection_id) {
                self.by_position.remove(&old);
            }
        }

        node.position = position;
        node.status = match position {
            Some(pos) => {
                self.by_position.insert(pos, connection_id);
                NodeStatus::Assigned
            }
            None => NodeStatus::Unassigned,
        };

        Some(&*node)
    }
}
