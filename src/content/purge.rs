use kube::api::ListParams;
use kube::ResourceExt;
use std::time::Duration;

use super::ContentStore;
use crate::error::format_error_chain;

/// Periodic sweep deleting Content blobs with an empty finalizer list.
/// Belt-and-braces against dropped finalizer updates from crashed
/// consumers; the normal path is release-then-GC.
pub async fn purge_loop(store: ContentStore, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if let Err(e) = purge_once(&store).await {
            log::error!("content purge sweep failed: {}", format_error_chain(&e));
        }
    }
}

/// One sweep; returns how many blobs were deleted.
pub async fn purge_once(store: &ContentStore) -> Result<usize, crate::error::FleetError> {
    let contents = store.api().list(&ListParams::default()).await?;
    let mut deleted = 0;

    for content in contents {
        let unreferenced = content
            .metadata
            .finalizers
            .as_ref()
            .map(|f| f.is_empty())
            .unwrap_or(true);

        if unreferenced {
            let name = content.name_any();
            log::info!("purging unreferenced content {}", name);
            store.delete(&name).await?;
            deleted += 1;
        }
    }

    if deleted > 0 {
        log::debug!("content purge sweep deleted {} blobs", deleted);
    }

    Ok(deleted)
}
