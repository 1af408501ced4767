//! The live runtime counterpart of a node: a small lock-protected state
//! machine that collects child results, runs the combine step on the worker
//! pool, and fans completion out to whoever depends on it. There is no
//! coordinator thread; progress is driven entirely by jobs queued from
//! whichever thread happened to finish something.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use crate::error::ComputeError;
use crate::executor::Spawn;
use crate::tree::{Dynamic, Node, NodeId};

/// Outcome of one node: its resolved value or the failure that produced it.
/// Cloned freely; both payloads are shared.
pub(crate) type Outcome = Result<Dynamic, ComputeError>;

/// Lifecycle of a [`Status`]. Strictly monotonic, never reverts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for at least one child to resolve.
    Pending,
    /// Every child resolved; the combine step is queued or running.
    Running,
    /// The outcome is published.
    Done,
}

struct Inner {
    state: State,
    /// Outcomes already pulled from the leading children, in declaration
    /// order. A later check resumes from `collected.len()` instead of
    /// re-scanning resolved children.
    collected: Vec<Outcome>,
    /// Statuses to re-check once this one completes. Back-references only,
    /// keyed by node id so a dependent racing through `check` twice is
    /// recorded once.
    dependents: HashMap<NodeId, Arc<Status>>,
    /// Set exactly once, on the transition to `Done`.
    result: Option<Outcome>,
}

/// Runtime state of a single node; at most one per node identity per engine.
pub(crate) struct Status {
    node: Arc<Node>,
    children: Vec<Arc<Status>>,
    pool: Arc<dyn Spawn>,
    inner: Mutex<Inner>,
    /// Signalled once, on the transition to `Done`.
    done: Condvar,
}

impl Status {
    pub(crate) fn new(node: Arc<Node>, children: Vec<Arc<Status>>, pool: Arc<dyn Spawn>) -> Self {
        Status {
            node,
            children,
            pool,
            inner: Mutex::new(Inner {
                state: State::Pending,
                collected: Vec::new(),
                dependents: HashMap::new(),
                result: None,
            }),
            done: Condvar::new(),
        }
    }

    pub(crate) fn id(&self) -> NodeId {
        self.node.id
    }

    /// If this status is done, hand back its outcome; otherwise remember
    /// `dependent` so it gets re-checked on completion.
    ///
    /// Locks only `self`, and callers only ever poll their own children, so
    /// lock acquisition always flows from a dependent toward a dependency.
    /// The graph is acyclic, so that cannot deadlock.
    fn poll(&self, dependent: &Arc<Status>) -> Option<Outcome> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            State::Done => inner.result.clone(),
            _ => {
                inner.dependents.insert(dependent.id(), dependent.clone());
                None
            }
        }
    }

    /// Try to make progress. Resumes pulling child outcomes where the last
    /// attempt left off and stops at the first unresolved child, which gets
    /// `self` registered as a listener; that child's completion re-queues
    /// this check. Once every child has resolved, the combine step is
    /// submitted to the worker pool.
    pub(crate) fn check(self: Arc<Self>) {
        let collected = {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != State::Pending {
                return;
            }

            while inner.collected.len() < self.children.len() {
                let child = &self.children[inner.collected.len()];
                match child.poll(&self) {
                    Some(outcome) => inner.collected.push(outcome),
                    None => return,
                }
            }

            inner.state = State::Running;
            std::mem::take(&mut inner.collected)
        };

        tracing::trace!(node = ?self.id(), "dependencies resolved, submitting combine");
        let pool = Arc::clone(&self.pool);
        pool.spawn(Box::new(move || {
            let outcome = self.combine(&collected);
            self.complete(outcome);
        }));
    }

    /// Force every child outcome, then run the combine function. A child
    /// failure re-raises here, so failures propagate to every transitive
    /// dependent; the whole attempt is captured as this node's own outcome.
    fn combine(&self, collected: &[Outcome]) -> Outcome {
        let attempt = || -> anyhow::Result<Dynamic> {
            let mut values = Vec::with_capacity(collected.len());
            for outcome in collected {
                values.push(outcome.clone()?);
            }
            (self.node.combine)(&values)
        };

        attempt().map_err(ComputeError::from)
    }

    /// Publish the outcome, wake every blocked waiter, and queue a re-check
    /// of every dependent. Dependent checks go through the worker pool, never
    /// inline: that keeps foreign code out of this lock's critical section
    /// and keeps the completion fan-out off the call stack.
    fn complete(&self, outcome: Outcome) {
        let dependents = {
            let mut inner = self.inner.lock().unwrap();
            debug_assert_eq!(inner.state, State::Running);
            inner.state = State::Done;
            inner.result = Some(outcome);
            self.done.notify_all();
            std::mem::take(&mut inner.dependents)
        };

        tracing::trace!(node = ?self.id(), dependents = dependents.len(), "node complete");
        for dependent in dependents.into_values() {
            self.pool.spawn(Box::new(move || dependent.check()));
        }
    }

    /// Block until this status is done, then return its outcome. Any number
    /// of threads may wait on the same status; all observe the same outcome.
    pub(crate) fn wait(&self) -> Outcome {
        let mut inner = self.inner.lock().unwrap();
        while inner.state != State::Done {
            inner = self.done.wait(inner).unwrap();
        }
        inner.result.clone().expect("done status must hold a result")
    }

    /// Non-blocking peek: the outcome if done, `None` otherwise.
    pub(crate) fn peek(&self) -> Option<Outcome> {
        let inner = self.inner.lock().unwrap();
        match inner.state {
            State::Done => inner.result.clone(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::executor::Job;
    use crate::tree::{ComputationTree, tuple2};

    /// Queues jobs instead of running them, so tests can step the engine
    /// deterministically from a single thread.
    #[derive(Default)]
    struct ManualPool {
        queue: Mutex<VecDeque<Job>>,
    }

    impl ManualPool {
        /// Run queued jobs, including any they queue, until none remain.
        fn drain(&self) {
            loop {
                let job = self.queue.lock().unwrap().pop_front();
                match job {
                    Some(job) => job(),
                    None => break,
                }
            }
        }
    }

    impl Spawn for ManualPool {
        fn spawn(&self, job: Job) {
            self.queue.lock().unwrap().push_back(job);
        }
    }

    fn status_for<V: Send + Sync + 'static>(
        tree: &ComputationTree<V>,
        children: Vec<Arc<Status>>,
        pool: &Arc<ManualPool>,
    ) -> Arc<Status> {
        Arc::new(Status::new(tree.node.clone(), children, pool.clone()))
    }

    #[test]
    fn leaf_resolves_after_drain() {
        let pool = Arc::new(ManualPool::default());
        let tree = ComputationTree::constant(5i32);
        let status = status_for(&tree, Vec::new(), &pool);

        assert!(status.peek().is_none());
        status.clone().check();
        pool.drain();

        let value = status.peek().unwrap().unwrap();
        assert_eq!(*value.downcast_ref::<i32>().unwrap(), 5);
    }

    #[test]
    fn parent_collects_children_incrementally() {
        let pool = Arc::new(ManualPool::default());
        let lhs = ComputationTree::constant(2i32);
        let rhs = ComputationTree::constant(3i32);
        let root = tuple2(&lhs, &rhs, |lhs, rhs| Ok(lhs + rhs));

        let lhs = status_for(&lhs, Vec::new(), &pool);
        let rhs = status_for(&rhs, Vec::new(), &pool);
        let parent = status_for(&root, vec![lhs.clone(), rhs.clone()], &pool);

        // Neither child resolved: the parent parks itself on the first one.
        parent.clone().check();
        assert_eq!(parent.inner.lock().unwrap().collected.len(), 0);
        assert_eq!(lhs.inner.lock().unwrap().dependents.len(), 1);

        // First child completes; the queued re-check collects it and parks
        // on the second child.
        lhs.clone().check();
        pool.drain();
        assert_eq!(rhs.inner.lock().unwrap().dependents.len(), 1);

        rhs.clone().check();
        pool.drain();

        let value = parent.peek().unwrap().unwrap();
        assert_eq!(*value.downcast_ref::<i32>().unwrap(), 5);
    }

    #[test]
    fn duplicate_checks_register_one_listener() {
        let pool = Arc::new(ManualPool::default());
        let child = ComputationTree::constant(1i32);
        let root = child.transform(|value| Ok(*value));

        let child = status_for(&child, Vec::new(), &pool);
        let parent = status_for(&root, vec![child.clone()], &pool);

        parent.clone().check();
        parent.clone().check();
        assert_eq!(child.inner.lock().unwrap().dependents.len(), 1);
    }

    #[test]
    fn combine_runs_at_most_once() {
        let pool = Arc::new(ManualPool::default());
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let tree = ComputationTree::constant(1i32).transform(move |value| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(*value)
        });

        let child = status_for(&ComputationTree::constant(1i32), Vec::new(), &pool);
        let status = status_for(&tree, vec![child.clone()], &pool);

        child.clone().check();
        status.clone().check();
        pool.drain();

        // Checks after completion are no-ops.
        status.clone().check();
        status.clone().check();
        pool.drain();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn child_failure_becomes_parent_failure() {
        let pool = Arc::new(ManualPool::default());
        let child = ComputationTree::constant(1i32)
            .transform(|_| -> anyhow::Result<i32> { anyhow::bail!("child exploded") });
        let root = child.transform(|value| Ok(value + 1));

        let leaf = status_for(&ComputationTree::constant(1i32), Vec::new(), &pool);
        let child = status_for(&child, vec![leaf.clone()], &pool);
        let parent = status_for(&root, vec![child.clone()], &pool);

        parent.clone().check();
        child.clone().check();
        leaf.clone().check();
        pool.drain();

        let err = parent.peek().unwrap().err().expect("parent must fail");
        assert!(err.to_string().contains("child exploded"));
        // The failing child still reached `Done` with its own failure.
        assert!(child.peek().unwrap().is_err());
    }
}
