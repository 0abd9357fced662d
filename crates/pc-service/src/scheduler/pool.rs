//! Fixed set of media nodes and their load counters.
//!
//! Membership is fixed at startup. Load counters and the round-robin cursor live
//! behind one pool-wide lock, so a capacity check and the increment that follows
//! it are a single critical section.

use super::policy::CallerClass;
use crate::engine::MediaEngine;
use crate::observability::metrics;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::error;

/// A media processing node.
pub struct Node {
    uri: String,
    engine: Arc<dyn MediaEngine>,
    capacity: Option<usize>,
}

impl Node {
    /// `capacity` of `None` means unlimited.
    pub fn new(uri: impl Into<String>, engine: Arc<dyn MediaEngine>, capacity: Option<usize>) -> Self {
        Self {
            uri: uri.into(),
            engine,
            capacity,
        }
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<dyn MediaEngine> {
        &self.engine
    }

    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    fn has_room(&self, load: usize) -> bool {
        self.capacity.map_or(true, |capacity| load < capacity)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("uri", &self.uri)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

/// Why a selection found no node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PoolRejection {
    Empty,
    Full { index: usize },
}

#[derive(Debug)]
struct PoolState {
    loads: Vec<usize>,
    cursor: usize,
}

/// Ordered nodes plus load counters and rotation cursor.
#[derive(Debug)]
pub struct NodePool {
    nodes: Vec<Arc<Node>>,
    state: Mutex<PoolState>,
}

impl NodePool {
    #[must_use]
    pub fn new(nodes: Vec<Node>) -> Self {
        let loads = vec![0; nodes.len()];
        Self {
            nodes: nodes.into_iter().map(Arc::new).collect(),
            state: Mutex::new(PoolState { loads, cursor: 0 }),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn node(&self, index: usize) -> Option<&Arc<Node>> {
        self.nodes.get(index)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.nodes.iter()
    }

    /// Current load of the node at `index`.
    #[must_use]
    pub fn load(&self, index: usize) -> Option<usize> {
        self.lock().loads.get(index).copied()
    }

    /// Snapshot of every node's load, in pool order.
    #[must_use]
    pub fn loads(&self) -> Vec<usize> {
        self.lock().loads.clone()
    }

    /// Pick a node for `class` and take one unit of its load.
    pub(crate) fn acquire(&self, class: CallerClass) -> Result<usize, PoolRejection> {
        let mut state = self.lock();

        let Some(least_loaded) = least_loaded(&state.loads) else {
            return Err(PoolRejection::Empty);
        };

        let chosen = match class {
            CallerClass::Privileged => least_loaded,
            CallerClass::Standard => {
                let next = state.cursor % self.nodes.len();
                state.cursor = (next + 1) % self.nodes.len();
                if self.has_room(next, &state.loads) {
                    next
                } else {
                    least_loaded
                }
            }
        };

        if !self.has_room(chosen, &state.loads) {
            return Err(PoolRejection::Full { index: chosen });
        }

        let Some(load) = state.loads.get_mut(chosen) else {
            return Err(PoolRejection::Empty);
        };
        *load += 1;
        metrics::set_node_load(chosen, *load);

        Ok(chosen)
    }

    /// Return one unit of load to the node at `index`.
    pub(crate) fn release(&self, index: usize) {
        let mut state = self.lock();
        match state.loads.get_mut(index) {
            Some(load) if *load > 0 => {
                *load -= 1;
                metrics::set_node_load(index, *load);
            }
            Some(_) => {
                error!(
                    target: "pc.scheduler",
                    node_index = index,
                    "Node released more often than acquired"
                );
            }
            None => {
                error!(
                    target: "pc.scheduler",
                    node_index = index,
                    "Release for unknown node index"
                );
            }
        }
    }

    fn has_room(&self, index: usize, loads: &[usize]) -> bool {
        match (self.nodes.get(index), loads.get(index)) {
            (Some(node), Some(load)) => node.has_room(*load),
            _ => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Index of the minimum load, first index on ties.
fn least_loaded(loads: &[usize]) -> Option<usize> {
    loads
        .iter()
        .enumerate()
        .min_by_key(|(index, load)| (**load, *index))
        .map(|(index, _)| index)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::test_support::InertEngine;

    fn pool(capacities: &[Option<usize>]) -> NodePool {
        NodePool::new(
            capacities
                .iter()
                .enumerate()
                .map(|(i, cap)| Node::new(format!("ws://kms-{i}"), Arc::new(InertEngine), *cap))
                .collect(),
        )
    }

    #[test]
    fn test_least_loaded_breaks_ties_by_index() {
        assert_eq!(least_loaded(&[2, 1, 1]), Some(1));
        assert_eq!(least_loaded(&[0, 0, 0]), Some(0));
        assert_eq!(least_loaded(&[]), None);
    }

    #[test]
    fn test_standard_round_robin() {
        let pool = pool(&[None, None, None]);
        let picks: Vec<usize> = (0..6)
            .map(|_| pool.acquire(CallerClass::Standard).unwrap())
            .collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(pool.loads(), vec![2, 2, 2]);
    }

    #[test]
    fn test_standard_overflows_to_least_loaded() {
        let pool = pool(&[Some(1), None]);
        assert_eq!(pool.acquire(CallerClass::Privileged).unwrap(), 0);
        // Cursor still points at node 0, which is now full.
        assert_eq!(pool.acquire(CallerClass::Standard).unwrap(), 1);
        assert_eq!(pool.loads(), vec![1, 1]);
        // Node 0 is least loaded by count but full.
        assert_eq!(
            pool.acquire(CallerClass::Standard),
            Err(PoolRejection::Full { index: 0 })
        );
    }

    #[test]
    fn test_privileged_takes_least_loaded_without_moving_cursor() {
        let pool = pool(&[None, None]);
        assert_eq!(pool.acquire(CallerClass::Standard).unwrap(), 0);
        assert_eq!(pool.acquire(CallerClass::Privileged).unwrap(), 1);
        assert_eq!(pool.acquire(CallerClass::Standard).unwrap(), 1);
    }

    #[test]
    fn test_full_pool_is_rejected_without_mutation() {
        let pool = pool(&[Some(1), Some(1)]);
        pool.acquire(CallerClass::Standard).unwrap();
        pool.acquire(CallerClass::Standard).unwrap();

        assert_eq!(
            pool.acquire(CallerClass::Standard),
            Err(PoolRejection::Full { index: 0 })
        );
        assert_eq!(
            pool.acquire(CallerClass::Privileged),
            Err(PoolRejection::Full { index: 0 })
        );
        assert_eq!(pool.loads(), vec![1, 1]);
    }

    #[test]
    fn test_zero_capacity_node_never_selected() {
        let pool = pool(&[Some(0)]);
        assert_eq!(
            pool.acquire(CallerClass::Privileged),
            Err(PoolRejection::Full { index: 0 })
        );
    }

    #[test]
    fn test_empty_pool() {
        let pool = pool(&[]);
        assert!(pool.is_empty());
        assert_eq!(pool.acquire(CallerClass::Standard), Err(PoolRejection::Empty));
    }

    #[test]
    fn test_release_never_goes_negative() {
        let pool = pool(&[None]);
        pool.acquire(CallerClass::Standard).unwrap();
        pool.release(0);
        pool.release(0);
        pool.release(7);
        assert_eq!(pool.load(0), Some(0));
    }

    #[test]
    fn test_node_debug_hides_engine() {
        let pool = pool(&[Some(3)]);
        let debug = format!("{:?}", pool.node(0).unwrap());
        assert!(debug.contains("ws://kms-0"));
        assert!(debug.contains("capacity: Some(3)"));
    }
}
