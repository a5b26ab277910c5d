//! Tokio runtime spawner

use crate::{BoxedTask, Spawner};

/// Spawner for the Tokio runtime
///
/// Must be used from within a Tokio runtime context.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl Spawner for TokioSpawner {
    fn spawn(&self, future: BoxedTask) {
        // Dropping the JoinHandle detaches the task.
        drop(::tokio::spawn(future));
    }
}
