//! The execution engine: turns immutable [`ComputationTree`]s into live
//! per-node state, schedules every reachable node on a shared worker pool,
//! and exposes blocking and non-blocking result retrieval.

mod status;

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex};

use crate::error::{ComputeError, EngineError};
use crate::executor::Spawn;
use crate::tree::{ComputationTree, Node, NodeId};
use self::status::Status;

/// Executes computation trees on a shared worker pool, memoizing by node
/// identity: every distinct node submitted to one engine runs exactly once,
/// no matter how many parents reference it or how many threads ask for it.
///
/// # Memory
///
/// The registry never evicts. An engine remembers one status per distinct
/// node ever submitted to it, for as long as it lives. Create one engine per
/// batch of related work rather than a single long-lived process-wide one.
///
/// # Cycles
///
/// Trees are built bottom-up from the combinators, which can only produce
/// DAGs. Hand-wiring a cycle is not possible through the public API and is
/// not detected.
pub struct TreeComputer {
    pool: Arc<dyn Spawn>,
    statuses: Mutex<HashMap<NodeId, Arc<Status>>>,
}

impl TreeComputer {
    /// An engine submitting all of its work to `pool`.
    pub fn new(pool: Arc<dyn Spawn>) -> Self {
        TreeComputer {
            pool,
            statuses: Mutex::new(HashMap::new()),
        }
    }

    /// An engine backed by a dedicated rayon pool with `threads` workers.
    pub fn with_pool_size(threads: usize) -> Result<Self, EngineError> {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// Begin executing every node reachable from `tree` and return
    /// immediately. Once started, the sub-graph runs to completion or
    /// failure; there is no cancellation.
    pub fn start<V>(&self, tree: &ComputationTree<V>) {
        self.vivify(&tree.node);
    }

    /// Block until `tree` has resolved, materializing it first if necessary,
    /// and return its outcome. Waiting is idempotent: repeated or concurrent
    /// calls on the same node observe the same outcome with no re-execution.
    pub fn wait<V>(&self, tree: &ComputationTree<V>) -> Result<Arc<V>, ComputeError>
    where
        V: Send + Sync + 'static,
    {
        let outcome = self.vivify(&tree.node).wait();
        outcome.map(|value| {
            value
                .downcast::<V>()
                .ok()
                .expect("Type mismatch in resolved value")
        })
    }

    /// Non-blocking variant of [`wait`](Self::wait): `Some` only once the
    /// node is done. Purely a registry lookup — a tree that was never
    /// started is not materialized by asking about it.
    pub fn try_get<V>(&self, tree: &ComputationTree<V>) -> Option<Result<Arc<V>, ComputeError>>
    where
        V: Send + Sync + 'static,
    {
        let status = self.statuses.lock().unwrap().get(&tree.id()).cloned()?;
        let outcome = status.peek()?;
        Some(outcome.map(|value| {
            value
                .downcast::<V>()
                .ok()
                .expect("Type mismatch in resolved value")
        }))
    }

    /// Return the status for `node`, creating the whole reachable sub-graph
    /// of statuses if absent.
    ///
    /// Children are materialized leaf-first and without the registry lock, so
    /// a large build does not serialize behind it; the lock guards only the
    /// lookup-or-insert itself. A freshly inserted status gets its initial
    /// check queued on the pool — never run inline, which keeps
    /// materialization shallow and arbitrary work out of the lock.
    fn vivify(&self, node: &Arc<Node>) -> Arc<Status> {
        if let Some(existing) = self.statuses.lock().unwrap().get(&node.id) {
            return existing.clone();
        }

        let children = node.children.iter().map(|child| self.vivify(child)).collect();
        let status = Arc::new(Status::new(node.clone(), children, self.pool.clone()));

        let status = {
            let mut statuses = self.statuses.lock().unwrap();
            match statuses.entry(node.id) {
                // Another thread materialized this node while we were
                // building ours; theirs is canonical and already checked.
                Entry::Occupied(entry) => return entry.get().clone(),
                Entry::Vacant(entry) => entry.insert(status).clone(),
            }
        };

        tracing::trace!(node = ?node.id, "materialized status");
        let initial = status.clone();
        self.pool.spawn(Box::new(move || initial.check()));
        status
    }
}
