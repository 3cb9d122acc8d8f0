//! Matrix topology: grid dimensions and slot placement.
//!
//! Placement rules:
//! - at most one node per `(row, col)`;
//! - every assigned node lies inside the current grid;
//! - assigning onto an occupied slot swaps, the occupant moves to the
//!   requester's previous slot (or becomes unassigned if there was none).
//!
//! All state lives in the [`SessionRegistry`]; the topology only holds the
//! [`GridConfig`] and applies policy on top of the registry's index.

use serde::{Deserialize, Serialize};

use crate::registry::{ConnectionId, DisplayNode, Position, SessionRegistry};
use crate::viewport::Viewport;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// One source video cropped across all tiles.
    #[default]
    Matrix,
    /// Every node shows the full frame.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridConfig {
    pub rows: u32,
    pub cols: u32,
    pub display_mode: DisplayMode,
}

impl GridConfig {
    /// Matrix-mode grid. `None` if either dimension is zero.
    pub fn new(rows: u32, cols: u32) -> Option<Self> {
        (rows >= 1 && cols >= 1).then_some(Self {
            rows,
            cols,
            display_mode: DisplayMode::Matrix,
        })
    }

    pub fn contains(&self, position: Position) -> bool {
        position.row < self.rows && position.col < self.cols
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            rows: 3,
            cols: 3,
            display_mode: DisplayMode::Matrix,
        }
    }
}

/// Result of a successful assign.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    /// The requester, now at the target slot.
    pub node: DisplayNode,
    /// The previous occupant after the swap, if there was one.
    pub displaced: Option<DisplayNode>,
}

/// A populated cell of the admin matrix view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixCell {
    #[serde(flatten)]
    pub node: DisplayNode,
    pub viewport: Viewport,
}

/// `rows × cols` grid, row-major, `None` for vacant cells.
pub type MatrixSnapshot = Vec<Vec<Option<MatrixCell>>>;

#[derive(Debug, Default)]
pub struct MatrixTopology {
    grid: GridConfig,
}

impl MatrixTopology {
    pub fn new(grid: GridConfig) -> Self {
        Self { grid }
    }

    pub fn grid(&self) -> &GridConfig {
        &self.grid
    }

    /// Place `connection_id` at `(row, col)`, swapping with any occupant.
    ///
    /// Returns `None` (and changes nothing) if the connection is unknown or
    /// the slot lies outside the grid.
    pub fn assign(
        &self,
        registry: &mut SessionRegistry,
        connection_id: ConnectionId,
        row: u32,
        col: u32,
    ) -> Option<Assignment> {
        let target = Position::new(row, col);
        if !self.grid.contains(target) {
            return None;
        }

        let prior = registry.get(&connection_id)?.position;
        if prior == Some(target) {
            let node = registry.get(&connection_id)?.clone();
            return Some(Assignment { node, displaced: None });
        }

        let occupant = registry
            .get_by_position(row, col)
            .map(|n| n.connection_id)
            .filter(|id| *id != connection_id);

        registry.set_position(connection_id, None);
        let displaced = occupant.and_then(|other| registry.set_position(other, prior).cloned());
        let node = registry.set_position(connection_id, Some(target))?.clone();

        Some(Assignment { node, displaced })
    }

    /// Clear a node's slot. `None` if the connection is unknown.
    pub fn unassign(
        &self,
        registry: &mut SessionRegistry,
        connection_id: ConnectionId,
    ) -> Option<DisplayNode> {
        registry.set_position(connection_id, None).cloned()
    }

    /// Change grid dimensions, unassigning every node that falls outside.
    ///
    /// Returns the evicted nodes, or `None` if either dimension is zero.
    pub fn resize(
        &mut self,
        registry: &mut SessionRegistry,
        rows: u32,
        cols: u32,
    ) -> Option<Vec<DisplayNode>> {
        let grid = GridConfig {
            display_mode: self.grid.display_mode,
            ..GridConfig::new(rows, cols)?
        };
        Some(self.reconfigure(registry, grid))
    }

    /// Replace the whole grid config. Evictions happen in the same pass.
    pub fn reconfigure(
        &mut self,
        registry: &mut SessionRegistry,
        grid: GridConfig,
    ) -> Vec<DisplayNode> {
        self.grid = grid;

        let outside: Vec<ConnectionId> = registry
            .assigned()
            .filter(|n| n.position.is_some_and(|p| !grid.contains(p)))
            .map(|n| n.connection_id)
            .collect();

        outside
            .into_iter()
            .filter_map(|id| registry.set_position(id, None).cloned())
            .collect()
    }

    pub fn occupant<'a>(
        &self,
        registry: &'a SessionRegistry,
        row: u32,
        col: u32,
    ) -> Option<&'a DisplayNode> {
        registry.get_by_position(row, col)
    }

    /// Viewport for a slot under the current grid.
    pub fn viewport_at(&self, position: Position) -> Viewport {
        Viewport::for_position(position, &self.grid)
    }

    /// Admin matrix view of the current grid.
    pub fn snapshot(&self, registry: &SessionRegistry) -> MatrixSnapshot {
        (0..self.grid.rows)
            .map(|row| {
                (0..self.grid.cols)
                    .map(|col| {
                        registry.get_by_position(row, col).map(|node| MatrixCell {
                            node: node.clone(),
                            viewport: self.viewport_at(Position::new(row, col)),
                        })
                    })
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::NodeStatus;
    use std::collections::HashSet;
    use uuid::Uuid;

    fn setup(n: usize) -> (MatrixTopology, SessionRegistry, Vec<ConnectionId>) {
        let mut registry = SessionRegistry::new();
        let ids: Vec<ConnectionId> = (0..n).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            registry.register(*id);
        }
        (MatrixTopology::default(), registry, ids)
    }

    fn assert_unique_positions(registry: &SessionRegistry) {
        let mut seen = HashSet::new();
        for node in registry.list_all() {
            if let Some(pos) = node.position {
                assert!(seen.insert(pos), "two nodes share {pos:?}");
            }
        }
    }

    #[test]
    fn test_grid_config_rejects_zero() {
        assert!(GridConfig::new(0, 3).is_none());
        assert!(GridConfig::new(3, 0).is_none());
        assert!(GridConfig::new(1, 1).is_some());
    }

    #[test]
    fn test_assign_vacant_slot() {
        let (topo, mut reg, ids) = setup(1);
        let result = topo.assign(&mut reg, ids[0], 1, 2).unwrap();

        assert_eq!(result.node.position, Some(Position::new(1, 2)));
        assert_eq!(result.node.status, NodeStatus::Assigned);
        assert!(result.displaced.is_none());
        assert_eq!(topo.occupant(&reg, 1, 2).unwrap().connection_id, ids[0]);
    }

    #[test]
    fn test_assign_unknown_connection() {
        let (topo, mut reg, _) = setup(0);
        assert!(topo.assign(&mut reg, Uuid::new_v4(), 0, 0).is_none());
    }

    #[test]
    fn test_assign_out_of_bounds_is_rejected() {
        let (topo, mut reg, ids) = setup(1);
        assert!(topo.assign(&mut reg, ids[0], 3, 0).is_none());
        assert!(topo.assign(&mut reg, ids[0], 0, 3).is_none());
        assert!(reg.get(&ids[0]).unwrap().position.is_none());
    }

    #[test]
    fn test_assign_swaps_with_occupant() {
        let (topo, mut reg, ids) = setup(2);
        let (a, b) = (ids[0], ids[1]);
        topo.assign(&mut reg, a, 0, 0).unwrap();
        topo.assign(&mut reg, b, 1, 1).unwrap();

        let result = topo.assign(&mut reg, a, 1, 1).unwrap();

        assert_eq!(reg.get(&a).unwrap().position, Some(Position::new(1, 1)));
        assert_eq!(reg.get(&b).unwrap().position, Some(Position::new(0, 0)));
        assert_eq!(result.displaced.unwrap().connection_id, b);
        assert_unique_positions(&reg);
    }

    #[test]
    fn test_assign_onto_occupied_without_prior_unassigns_occupant() {
        let (topo, mut reg, ids) = setup(2);
        let (a, b) = (ids[0], ids[1]);
        topo.assign(&mut reg, b, 0, 0).unwrap();

        let result = topo.assign(&mut reg, a, 0, 0).unwrap();

        let displaced = result.displaced.unwrap();
        assert_eq!(displaced.connection_id, b);
        assert_eq!(displaced.status, NodeStatus::Unassigned);
        assert!(reg.get(&b).unwrap().position.is_none());
        assert_eq!(topo.occupant(&reg, 0, 0).unwrap().connection_id, a);
    }

    #[test]
    fn test_assign_same_slot_is_noop() {
        let (topo, mut reg, ids) = setup(1);
        topo.assign(&mut reg, ids[0], 2, 2).unwrap();
        let result = topo.assign(&mut reg, ids[0], 2, 2).unwrap();
        assert!(result.displaced.is_none());
        assert_eq!(result.node.position, Some(Position::new(2, 2)));
    }

    #[test]
    fn test_unassign() {
        let (topo, mut reg, ids) = setup(1);
        topo.assign(&mut reg, ids[0], 0, 1).unwrap();

        let node = topo.unassign(&mut reg, ids[0]).unwrap();
        assert!(node.position.is_none());
        assert_eq!(node.status, NodeStatus::Unassigned);
        assert!(topo.occupant(&reg, 0, 1).is_none());
        assert!(topo.unassign(&mut reg, Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_resize_evicts_exactly_out_of_bounds() {
        let (mut topo, mut reg, ids) = setup(4);
        topo.assign(&mut reg, ids[0], 0, 0).unwrap();
        topo.assign(&mut reg, ids[1], 1, 1).unwrap();
        topo.assign(&mut reg, ids[2], 2, 0).unwrap();
        topo.assign(&mut reg, ids[3], 0, 2).unwrap();

        let evicted = topo.resize(&mut reg, 2, 2).unwrap();
        let evicted_ids: HashSet<ConnectionId> = evicted.iter().map(|n| n.connection_id).collect();

        assert_eq!(evicted_ids, HashSet::from([ids[2], ids[3]]));
        assert_eq!(reg.get(&ids[0]).unwrap().position, Some(Position::new(0, 0)));
        assert_eq!(reg.get(&ids[1]).unwrap().position, Some(Position::new(1, 1)));
        for id in [ids[2], ids[3]] {
            let node = reg.get(&id).unwrap();
            assert!(node.position.is_none());
            assert_eq!(node.status, NodeStatus::Unassigned);
        }
        assert!(reg.assigned().all(|n| topo.grid().contains(n.position.unwrap())));
    }

    #[test]
    fn test_resize_rejects_zero_dimensions() {
        let (mut topo, mut reg, ids) = setup(1);
        topo.assign(&mut reg, ids[0], 2, 2).unwrap();

        assert!(topo.resize(&mut reg, 0, 2).is_none());
        assert_eq!(topo.grid().rows, 3);
        assert!(reg.get(&ids[0]).unwrap().is_assigned());
    }

    #[test]
    fn test_resize_keeps_display_mode() {
        let mut reg = SessionRegistry::new();
        let mut topo = MatrixTopology::new(GridConfig {
            display_mode: DisplayMode::Duplicate,
            ..GridConfig::default()
        });
        topo.resize(&mut reg, 4, 4).unwrap();
        assert_eq!(topo.grid().display_mode, DisplayMode::Duplicate);
    }

    #[test]
    fn test_snapshot_shape_and_viewports() {
        let (topo, mut reg, ids) = setup(1);
        topo.assign(&mut reg, ids[0], 1, 2).unwrap();

        let matrix = topo.snapshot(&reg);
        assert_eq!(matrix.len(), 3);
        assert!(matrix.iter().all(|row| row.len() == 3));

        let cell = matrix[1][2].as_ref().unwrap();
        assert_eq!(cell.node.connection_id, ids[0]);
        assert_eq!(cell.viewport.offset_x, -200.0);
        assert_eq!(cell.viewport.offset_y, -100.0);

        let occupied = matrix.iter().flatten().filter(|c| c.is_some()).count();
        assert_eq!(occupied, 1);
    }

    #[test]
    fn test_snapshot_cell_flattens_node() {
        let (topo, mut reg, ids) = setup(1);
        topo.assign(&mut reg, ids[0], 0, 0).unwrap();

        let json = serde_json::to_value(topo.snapshot(&reg)).unwrap();
        let cell = &json[0][0];
        assert_eq!(cell["status"], "assigned");
        assert_eq!(cell["viewport"]["scaleX"], 3.0);
        assert!(json[0][1].is_null());
    }

    #[test]
    fn test_random_assign_sequence_keeps_invariants() {
        let (mut topo, mut reg, ids) = setup(6);
        // Deterministic pseudo-random walk over slots and resizes.
        let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;
        for step in 0..500 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let who = ids[(seed >> 33) as usize % ids.len()];
            let row = ((seed >> 17) % 4) as u32;
            let col = ((seed >> 7) % 4) as u32;
            match step % 7 {
                0 => {
                    topo.unassign(&mut reg, who);
                }
                6 => {
                    topo.resize(&mut reg, row + 1, col + 1);
                }
                _ => {
                    topo.assign(&mut reg, who, row, col);
                }
            }
            assert_unique_positions(&reg);
            for node in reg.assigned() {
                assert!(topo.grid().contains(node.position.unwrap()));
            }
        }
    }
}
