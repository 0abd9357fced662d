//! Media node scheduler.
//!
//! Selects the node that hosts a new session. Admission is gated by the
//! [`AuthorizationPolicy`]; placement depends on the [`CallerClass`]:
//!
//! - Privileged callers go to the least-loaded node (ties to the lowest index).
//! - Standard callers go round-robin, overflowing to the least-loaded node when
//!   the round-robin candidate is full.
//!
//! A successful selection yields a [`NodeLease`]. The lease holds one unit of the
//! node's load and gives it back when dropped, so each session releases its node
//! exactly once however it ends.

mod policy;
mod pool;

pub use policy::{AuthorizationPolicy, CallerClass, PRIVILEGED_PREFIX};
pub use pool::{Node, NodePool};

use crate::errors::PcError;
use crate::observability::metrics;
use pool::PoolRejection;

use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Admission control plus placement over a [`NodePool`].
#[derive(Debug)]
pub struct Scheduler {
    pool: Arc<NodePool>,
    policy: AuthorizationPolicy,
}

impl Scheduler {
    #[must_use]
    pub fn new(pool: Arc<NodePool>, policy: AuthorizationPolicy) -> Self {
        Self { pool, policy }
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<NodePool> {
        &self.pool
    }

    /// Select a node for `caller` and take one unit of its load.
    ///
    /// # Errors
    ///
    /// - `PcError::AdmissionDenied` - the authorization rule rejected `caller`
    /// - `PcError::NoCapacity` - the chosen node is full, or the pool is empty
    #[instrument(skip_all, name = "pc.scheduler.select", fields(caller = %caller))]
    pub fn select_node(&self, caller: &str) -> Result<NodeLease, PcError> {
        let class = CallerClass::classify(caller);

        if !self.policy.admits(caller) {
            warn!(
                target: "pc.scheduler",
                caller = %caller,
                "Caller rejected by authorization rule"
            );
            metrics::record_node_selection(class.as_str(), "denied");
            return Err(PcError::AdmissionDenied(caller.to_string()));
        }

        match self.pool.acquire(class) {
            Ok(index) => {
                let Some(node) = self.pool.node(index).cloned() else {
                    // acquire only returns indexes inside the pool
                    self.pool.release(index);
                    return Err(PcError::Internal(format!("node index {index} out of range")));
                };

                debug!(
                    target: "pc.scheduler",
                    caller = %caller,
                    class = class.as_str(),
                    node_index = index,
                    node_uri = %node.uri(),
                    "Offering node"
                );
                metrics::record_node_selection(class.as_str(), "selected");

                Ok(NodeLease {
                    pool: Arc::clone(&self.pool),
                    index,
                    node,
                })
            }
            Err(rejection) => {
                let uri = match rejection {
                    PoolRejection::Full { index } => self
                        .pool
                        .node(index)
                        .map_or_else(String::new, |node| node.uri().to_string()),
                    PoolRejection::Empty => String::new(),
                };

                debug!(
                    target: "pc.scheduler",
                    caller = %caller,
                    class = class.as_str(),
                    node_uri = %uri,
                    "Chosen node has no resources left"
                );
                metrics::record_node_selection(class.as_str(), "no_capacity");

                Err(PcError::NoCapacity { uri })
            }
        }
    }

    /// Give a lease back. Equivalent to dropping it.
    pub fn release(&self, lease: NodeLease) {
        debug!(
            target: "pc.scheduler",
            node_index = lease.index,
            "Releasing node"
        );
        drop(lease);
    }
}

/// One unit of load on a node, returned to the pool on drop.
pub struct NodeLease {
    pool: Arc<NodePool>,
    index: usize,
    node: Arc<Node>,
}

impl NodeLease {
    #[must_use]
    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// Position of the node in the pool.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Drop for NodeLease {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}

impl fmt::Debug for NodeLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeLease")
            .field("index", &self.index)
            .field("uri", &self.node.uri())
            .finish()
    }
}
