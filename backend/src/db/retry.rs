//! Single-retry policy for connectivity failures

use super::DbError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Run `op`, and run it once more after `backoff` if the first attempt failed
/// with a transient error. Anything else, including pool exhaustion, is
/// returned as-is.
pub async fn retry_once<T, F, Fut>(backoff: Duration, mut op: F) -> Result<T, DbError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DbError>>,
{
    match op().await {
        Err(err) if err.is_transient() => {
            warn!(
                error = %err,
                backoff_ms = backoff.as_millis() as u64,
                "Transient database failure, retrying once"
            );
            metrics::counter!("db_retries_total").increment(1);
            tokio::time::sleep(backoff).await;
            op().await
        }
        other => other,
    }
}
