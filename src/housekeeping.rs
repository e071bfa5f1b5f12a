//! Periodic eviction sweep over account `death` timestamps.

use std::time::Duration;

use tracing::info;

use crate::account::now_epoch_secs;
use crate::context::SharedContext;

/// Run the housekeeping tick forever, evicting expired accounts every
/// `interval`. Intended to be spawned as its own task alongside the
/// accept loop; it does not itself run handlers, so it never competes
/// with the dispatcher's single-threaded sequencing for registry
/// mutation ordering beyond the `DashMap`'s own per-entry locking.
pub async fn run(ctx: SharedContext, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let evicted = ctx.registry.evict_expired(now_epoch_secs());
        if !evicted.is_empty() {
            info!(count = evicted.len(), accounts = ?evicted, "evicted expired accounts");
        }
    }
}
