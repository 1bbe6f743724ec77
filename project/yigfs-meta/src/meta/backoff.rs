use crate::meta::store::MetaError;
use rand::{RngCore, rng};
use std::{future::Future, time::Duration};

/// Re-run `f` while it reports [`MetaError::ContinueRetry`], sleeping with
/// jittered exponential delay between attempts.
pub(crate) async fn backoff<F, Fut, R>(max_retries: u64, mut f: F) -> Result<R, MetaError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<R, MetaError>>,
{
    for c in 0..max_retries {
        match f().await {
            Ok(r) => return Ok(r),
            Err(MetaError::ContinueRetry) => {}
            Err(e) => return Err(e),
        }

        let random_delta = rng().next_u64() % 20;
        let exp = 1u64 << c.min(10);
        tokio::time::sleep(Duration::from_millis(20 + exp + random_delta)).await;
    }

    Err(MetaError::MaxRetriesExceeded)
}
