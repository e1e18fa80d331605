use std::future::Future;
use std::time::{Duration, Instant};

/// Await `fut` and emit a `performance` warning when it took longer than `max`.
///
/// Lock waits inside a dispatch transaction show up here, which makes
/// contention on a hot deliverer row visible without extra metrics.
pub async fn warn_if_slow<F, T>(label: &'static str, max: Duration, fut: F) -> T
where
    F: Future<Output = T>,
{
    let start = Instant::now();
    let out = fut.await;
    let elapsed = start.elapsed();
    if elapsed > max {
        tracing::warn!(
            target: "performance",
            label = label,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow operation detected"
        );
    }
    out
}
