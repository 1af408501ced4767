//! The worker-pool seam. The engine never runs work itself; everything it
//! needs executed — dependency checks and combine steps alike — is handed to
//! a [`Spawn`] implementation as an independent job.

/// A no-argument unit of work submitted to a worker pool.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Anything that can run submitted jobs, possibly concurrently.
///
/// No ordering or priority between jobs is assumed; every job the engine
/// submits is safe to run from any thread, in any order, at any later time.
pub trait Spawn: Send + Sync {
    fn spawn(&self, job: Job);
}

impl Spawn for rayon::ThreadPool {
    fn spawn(&self, job: Job) {
        rayon::ThreadPool::spawn(self, job)
    }
}
