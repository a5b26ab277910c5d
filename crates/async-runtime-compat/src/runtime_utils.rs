//! Runtime-agnostic timers
//!
//! `sleep` dispatches to the selected runtime. `timeout` is built on top of it
//! by racing the operation against a timer, so it works the same way on every
//! backend and drops (cancels) the losing future.

use futures::future::{Either, select};
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Sleep for the specified duration using the selected runtime
pub async fn sleep(duration: Duration) {
    #[cfg(feature = "tokio")]
    {
        ::tokio::time::sleep(duration).await;
    }

    #[cfg(all(feature = "smol", not(feature = "tokio")))]
    {
        ::smol::Timer::after(duration).await;
    }

    #[cfg(not(any(feature = "smol", feature = "tokio")))]
    {
        compile_error!("One of the runtime features must be enabled: tokio or smol");
    }
}

/// Error returned by [`timeout`] when the deadline passes first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed {
    after: Duration,
}

impl Elapsed {
    /// The deadline that was exceeded
    pub fn duration(&self) -> Duration {
        self.after
    }
}

impl fmt::Display for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deadline of {:?} elapsed", self.after)
    }
}

impl std::error::Error for Elapsed {}

/// Run `future` to completion unless `duration` passes first
///
/// On expiry the future is dropped before this returns.
pub async fn timeout<F>(duration: Duration, future: F) -> Result<F::Output, Elapsed>
where
    F: Future,
{
    let future = std::pin::pin!(future);
    let timer = std::pin::pin!(sleep(duration));

    match select(future, timer).await {
        Either::Left((output, _)) => Ok(output),
        Either::Right(((), _)) => Err(Elapsed { after: duration }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_sleep() {
        let start = Instant::now();
        sleep(Duration::from_millis(50)).await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_timeout_completes_in_time() {
        let result = timeout(Duration::from_secs(1), async { 7 }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_timeout_expires() {
        let result = timeout(
            Duration::from_millis(20),
            sleep(Duration::from_secs(5)),
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.duration(), Duration::from_millis(20));
        assert_eq!(err.to_string(), "deadline of 20ms elapsed");
    }
}
