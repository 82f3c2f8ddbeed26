//! Scheduled deletion of expired session tokens.

use gatehouse_access::TokenLifecycle;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Deletes expired tokens once, logging the outcome. Returns how many went.
pub async fn purge_expired_tokens(tokens: &TokenLifecycle) -> u64 {
    match tokens.purge_expired().await {
        Ok(count) if count > 0 => {
            info!(deleted_tokens = count, "cleaned up expired session tokens");
            count
        }
        Ok(_) => {
            debug!("no expired session tokens");
            0
        }
        Err(e) => {
            warn!(error = %e, "failed to clean up expired session tokens");
            0
        }
    }
}

/// Spawns a task that purges expired tokens every `every`.
///
/// The first run happens one full interval after spawning.
pub fn spawn(tokens: TokenLifecycle, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            purge_expired_tokens(&tokens).await;
        }
    })
}
