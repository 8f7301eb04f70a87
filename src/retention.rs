//! Background sweep for expired blobs.
//!
//! Runs beside the lazy expiry check in `BlobStore::get`. Either one alone
//! keeps expired ciphertext unreachable; the sweep also releases memory for
//! files nobody asks for again.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::store::BlobStore;

/// Spawn a task that runs `sweep_expired` every `interval`.
///
/// The sweep only touches shard locks briefly and never awaits while holding
/// one, so foreground requests are not blocked.
pub fn spawn_expiry_sweeper(store: Arc<BlobStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let purged = store.sweep_expired();
            if purged > 0 {
                tracing::info!("Blob retention sweep: purged {} expired blobs", purged);
            } else {
                tracing::debug!("Blob retention sweep: nothing expired");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::BlobMetadata;
    use crate::stego_crypto::TAG_LEN;

    #[tokio::test]
    async fn test_sweeper_purges_in_background() {
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let store = Arc::new(BlobStore::new(clock.clone()));
        let id = store.allocate_id().unwrap();
        store
            .put(
                id,
                vec![0u8; 8],
                [0u8; TAG_LEN],
                BlobMetadata {
                    content_type: None,
                    original_size: 8,
                },
                chrono::Duration::minutes(30),
            )
            .unwrap();

        let handle = spawn_expiry_sweeper(store.clone(), Duration::from_millis(20));
        clock.advance(chrono::Duration::minutes(31));

        let mut remaining = usize::MAX;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            remaining = store.blob_count();
            if remaining == 0 {
                break;
            }
        }
        handle.abort();
        assert_eq!(remaining, 0);
    }
}
