//! Runtime-agnostic async utilities
//!
//! This crate lets the orchestration crates spawn background work, sleep and
//! race futures against deadlines without naming a concrete runtime. The
//! backend is chosen with the `tokio` (default) or `smol` feature; when both
//! are enabled Tokio wins.
//!
//! # Examples
//!
//! ```no_run
//! use async_runtime_compat::prelude::*;
//! use std::time::Duration;
//!
//! async fn example(spawner: &dyn Spawner) {
//!     spawner.spawn(Box::pin(async {
//!         sleep(Duration::from_millis(10)).await;
//!     }));
//!
//!     let late = timeout(Duration::from_millis(5), sleep(Duration::from_secs(1))).await;
//!     assert!(late.is_err());
//! }
//! ```

#![warn(missing_docs)]

use std::future::Future;
use std::pin::Pin;

/// Boxed background future accepted by [`Spawner`]
pub type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A spawner that can run futures in the background on an async runtime
pub trait Spawner: Send + Sync {
    /// Spawn a future on the runtime
    ///
    /// The future runs to completion in the background; there is no handle.
    fn spawn(&self, future: BoxedTask);
}

#[cfg(feature = "tokio")]
pub mod tokio;

#[cfg(feature = "smol")]
pub mod smol;

pub mod runtime_utils;

pub use runtime_utils::{Elapsed, sleep, timeout};

/// Prelude for common imports
pub mod prelude {
    pub use crate::Spawner;
    pub use crate::runtime_utils::{Elapsed, sleep, timeout};

    #[cfg(feature = "tokio")]
    pub use crate::tokio::TokioSpawner;

    #[cfg(feature = "smol")]
    pub use crate::smol::SmolSpawner;
}

/// Create the spawner for the runtime selected at compile time
pub fn default_spawner() -> std::sync::Arc<dyn Spawner> {
    #[cfg(feature = "tokio")]
    {
        std::sync::Arc::new(crate::tokio::TokioSpawner)
    }

    #[cfg(all(feature = "smol", not(feature = "tokio")))]
    {
        std::sync::Arc::new(crate::smol::SmolSpawner)
    }

    #[cfg(not(any(feature = "smol", feature = "tokio")))]
    {
        compile_error!("One of the runtime features must be enabled: tokio or smol");
    }
}
