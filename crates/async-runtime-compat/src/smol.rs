//! Smol runtime spawner

use crate::{BoxedTask, Spawner};

/// Spawner for the Smol runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct SmolSpawner;

impl Spawner for SmolSpawner {
    fn spawn(&self, future: BoxedTask) {
        ::smol::spawn(future).detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smol_spawner() {
        ::smol::block_on(async {
            let spawner = SmolSpawner;
            let (tx, rx) = async_channel::bounded(1);

            spawner.spawn(Box::pin(async move {
                tx.send(42).await.unwrap();
            }));

            assert_eq!(rx.recv().await.unwrap(), 42);
        });
    }
}
