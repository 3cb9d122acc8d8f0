//! The wall coordinator: one owner for registry, topology and timeline.
//!
//! Each inbound event is applied as exactly one mutation, after which the
//! resulting delta is handed to a [`Publish`] implementation together with
//! its audience. The coordinator never awaits; callers serialize access
//! (the server keeps it behind a single mutex), so every invariant of the
//! registry and topology holds between events.
//!
//! Rejected input (unknown connection, out-of-bounds slot, invalid time,
//! malformed patch) changes nothing and publishes nothing.

use serde_json::Value;

use crate::broadcast::{Publish, Recipients};
use crate::patch::{self, ConfigPatch, PatchError};
use crate::protocol::{ClientMessage, PlaybackCommand, ServerMessage};
use crate::registry::{ConnectionId, DisplayNode, SessionRegistry};
use crate::timeline::{PlaybackState, PlaybackTimeline, Transition};
use crate::topology::{Assignment, GridConfig, MatrixSnapshot, MatrixTopology};

#[derive(Debug, Default)]
pub struct Coordinator {
    registry: SessionRegistry,
    topology: MatrixTopology,
    timeline: PlaybackTimeline,
    /// Opaque config keys received through `patchConfig`.
    extras: ConfigPatch,
}

impl Coordinator {
    pub fn new(grid: GridConfig) -> Self {
        Self {
            registry: SessionRegistry::new(),
            topology: MatrixTopology::new(grid),
            timeline: PlaybackTimeline::new(),
            extras: ConfigPatch::new(),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn grid(&self) -> &GridConfig {
        self.topology.grid()
    }

    pub fn playback(&self) -> &PlaybackState {
        self.timeline.state()
    }

    /// Flat `PlaybackState ⊕ GridConfig ⊕ extras` view.
    pub fn config_view(&self) -> ConfigPatch {
        patch::merged_view(self.topology.grid(), self.timeline.state(), &self.extras)
    }

    pub fn nodes(&self) -> Vec<DisplayNode> {
        self.registry.list_all()
    }

    pub fn matrix(&self) -> MatrixSnapshot {
        self.topology.snapshot(&self.registry)
    }

    /// Dispatch one decoded message from `sender`.
    pub fn handle(&mut self, sender: ConnectionId, message: ClientMessage, out: &dyn Publish) {
        match message {
            ClientMessage::Register => {
                self.register(sender, out);
            }
            ClientMessage::Assign { row, col, connection_id } => {
                self.assign(connection_id.unwrap_or(sender), row, col, out);
            }
            ClientMessage::Unassign { connection_id } => {
                self.unassign(connection_id.unwrap_or(sender), out);
            }
            ClientMessage::Command { command } => {
                self.command(command, out);
            }
            ClientMessage::ReportTime { time } => {
                self.report_time(time, out);
            }
            ClientMessage::ReportDuration { duration } => {
                self.report_duration(duration, out);
            }
            ClientMessage::GetConfig => {
                let config = self.config_view();
                out.publish(&ServerMessage::Config { config }, Recipients::Node(sender));
            }
            ClientMessage::GetNodes => {
                let nodes = self.nodes();
                out.publish(&ServerMessage::Nodes { nodes }, Recipients::Node(sender));
            }
            ClientMessage::GetMatrix => {
                let matrix = self.matrix();
                out.publish(&ServerMessage::Matrix { matrix }, Recipients::Node(sender));
            }
            ClientMessage::Ping => {
                out.publish(&ServerMessage::Pong, Recipients::Node(sender));
            }
        }
    }

    /// Register `connection_id` as a display node.
    ///
    /// The new node receives its identity and the full config; everyone
    /// receives the updated node list.
    pub fn register(&mut self, connection_id: ConnectionId, out: &dyn Publish) -> DisplayNode {
        let previous = self.registry.get(&connection_id).cloned();
        let node = self.registry.register(connection_id);
        log::info!("Registered display node {} on {connection_id}", node.id);

        if let Some(previous) = &previous {
            self.forget_audio_target(previous, out);
        }

        out.publish(
            &ServerMessage::Registered { node: node.clone() },
            Recipients::Node(connection_id),
        );
        out.publish(
            &ServerMessage::Config { config: self.config_view() },
            Recipients::Node(connection_id),
        );
        self.publish_nodes(out);
        if previous.as_ref().is_some_and(DisplayNode::is_assigned) {
            self.publish_matrix(out);
        }

        node
    }

    /// Place a node, swapping with any occupant of the slot.
    pub fn assign(
        &mut self,
        connection_id: ConnectionId,
        row: u32,
        col: u32,
        out: &dyn Publish,
    ) -> Option<Assignment> {
        let Some(assignment) = self.topology.assign(&mut self.registry, connection_id, row, col) else {
            log::debug!("Rejected assign of {connection_id} to ({row}, {col})");
            return None;
        };
        log::info!("Assigned node {} to ({row}, {col})", assignment.node.id);

        self.publish_nodes(out);
        self.publish_matrix(out);
        self.publish_position(&assignment.node, out);
        if let Some(displaced) = &assignment.displaced {
            log::info!("Node {} displaced to {:?}", displaced.id, displaced.position);
            self.publish_position(displaced, out);
        }

        Some(assignment)
    }

    pub fn unassign(&mut self, connection_id: ConnectionId, out: &dyn Publish) -> Option<DisplayNode> {
        let Some(node) = self.topology.unassign(&mut self.registry, connection_id) else {
            log::debug!("Rejected unassign of unknown connection {connection_id}");
            return None;
        };
        log::info!("Unassigned node {}", node.id);

        self.publish_nodes(out);
        self.publish_matrix(out);
        out.publish(&ServerMessage::PositionUnassigned, Recipients::Node(connection_id));

        Some(node)
    }

    /// Drop a connection. Its slot becomes vacant; playback is untouched
    /// except for clearing it as the audio target.
    pub fn disconnect(&mut self, connection_id: ConnectionId, out: &dyn Publish) -> Option<DisplayNode> {
        let node = self.registry.remove(&connection_id)?;
        log::info!("Display node {} disconnected", node.id);

        self.forget_audio_target(&node, out);
        self.publish_nodes(out);
        self.publish_matrix(out);

        Some(node)
    }

    /// Apply an admin playback command. Returns whether it took effect.
    pub fn command(&mut self, command: PlaybackCommand, out: &dyn Publish) -> bool {
        log::debug!("Playback command: {command:?}");

        let transition = match command {
            PlaybackCommand::PatchConfig { patch } => return self.patch_config(patch, out).is_ok(),
            PlaybackCommand::Play => Transition::Play,
            PlaybackCommand::Pause => Transition::Pause,
            PlaybackCommand::Stop => Transition::Stop,
            PlaybackCommand::ToggleMute => Transition::ToggleMute,
            PlaybackCommand::Seek { time } => Transition::Seek(time),
            PlaybackCommand::SetVolume { volume } => Transition::SetVolume(volume),
            PlaybackCommand::SetUrl { url } => {
                log::info!("Loading video {url}");
                Transition::SetUrl(url)
            }
            PlaybackCommand::SetAudioMode { mode, target } => {
                if let Some(target) = target {
                    if self.registry.find_by_node_id(&target).is_none() {
                        log::debug!("Rejected audio target {target}: no such node");
                        return false;
                    }
                }
                Transition::SetAudioMode { mode, target }
            }
        };

        match self.timeline.apply(transition) {
            Some(delta) => {
                out.publish(&ServerMessage::PlaybackSync { patch: delta }, Recipients::All);
                true
            }
            None => false,
        }
    }

    /// Drift correction from a playing node.
    pub fn report_time(&mut self, time: f64, out: &dyn Publish) -> bool {
        let Some(delta) = self.timeline.report_time(time) else {
            return false;
        };
        log::trace!("Time report {time:.3}");
        out.publish(&ServerMessage::ConfigChanged { patch: delta }, Recipients::All);
        true
    }

    pub fn report_duration(&mut self, duration: f64, out: &dyn Publish) -> bool {
        let Some(delta) = self.timeline.report_duration(duration) else {
            return false;
        };
        log::debug!("Duration set to {duration:.3}");
        out.publish(&ServerMessage::ConfigChanged { patch: delta }, Recipients::All);
        true
    }

    /// Shallow-merge a partial config and broadcast the merged view.
    ///
    /// A change of `rows`/`cols` resizes the grid in the same step: evicted
    /// nodes are told they lost their slot and every remaining node gets
    /// its recomputed viewport.
    pub fn patch_config(&mut self, raw: Value, out: &dyn Publish) -> Result<ConfigPatch, PatchError> {
        let parsed = patch::parse(raw).inspect_err(|e| log::debug!("Rejected config patch: {e}"))?;
        if let Some(Some(target)) = &parsed.playback.audio_target {
            if self.registry.find_by_node_id(target).is_none() {
                log::debug!("Rejected config patch: no node {target}");
                return Err(PatchError::UnknownAudioTarget(*target));
            }
        }

        let current = *self.topology.grid();
        let next = parsed.grid.apply_to(current);
        let resized = (next.rows, next.cols) != (current.rows, current.cols);
        let evicted = if next != current {
            self.topology.reconfigure(&mut self.registry, next)
        } else {
            Vec::new()
        };

        self.timeline.merge(parsed.playback);
        self.extras.extend(parsed.extras);

        let view = self.config_view();
        log::debug!("Config patched: {}", Value::Object(view.clone()));
        out.publish(&ServerMessage::ConfigChanged { patch: view.clone() }, Recipients::All);

        if resized {
            log::info!(
                "Grid resized to {}x{}, {} node(s) evicted",
                next.rows,
                next.cols,
                evicted.len()
            );
            self.publish_nodes(out);
            self.publish_matrix(out);
            for node in &evicted {
                out.publish(&ServerMessage::PositionUnassigned, Recipients::Node(node.connection_id));
            }
            for node in self.registry.assigned() {
                self.publish_position(node, out);
            }
        }

        Ok(view)
    }

    fn forget_audio_target(&mut self, node: &DisplayNode, out: &dyn Publish) {
        if let Some(delta) = self.timeline.clear_audio_target(&node.id) {
            log::info!("Audio target {} left, target cleared", node.id);
            out.publish(&ServerMessage::PlaybackSync { patch: delta }, Recipients::All);
        }
    }

    fn publish_nodes(&self, out: &dyn Publish) {
        out.publish(&ServerMessage::NodesChanged { nodes: self.nodes() }, Recipients::All);
    }

    fn publish_matrix(&self, out: &dyn Publish) {
        out.publish(&ServerMessage::MatrixChanged { matrix: self.matrix() }, Recipients::All);
    }

    /// Tell a node where it now sits, or that it has no slot.
    fn publish_position(&self, node: &DisplayNode, out: &dyn Publish) {
        let message = match node.position {
            Some(position) => ServerMessage::PositionAssigned {
                position,
                viewport: self.topology.viewport_at(position),
            },
            None => ServerMessage::PositionUnassigned,
        };
        out.publish(&message, Recipients::Node(node.connection_id));
    }
}
