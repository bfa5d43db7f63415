use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error};
use tokio::time::{self, MissedTickBehavior};

use crate::api::ResourceStore;

use super::store::{short_revision, Published, ReloadSignal, RouteStore};

/// Keeps the published route table in sync with the resource store.
///
/// Every `refresh_time` the resources are fetched again; a new table is
/// published only when their content changed, and the server is then told
/// to reload.
pub struct Reconciler {
    source: Arc<dyn ResourceStore>,
    store: Arc<RouteStore>,
    reload: Arc<ReloadSignal>,
    refresh_time: Duration,
}

impl Reconciler {
    pub fn new(
        source: Arc<dyn ResourceStore>,
        store: Arc<RouteStore>,
        reload: Arc<ReloadSignal>,
        refresh_time: Duration,
    ) -> Self {
        Self {
            source,
            store,
            reload,
            refresh_time,
        }
    }

    /// Run one fetch-compare-publish cycle. On error the current table is
    /// left untouched.
    pub async fn reconcile(&self) -> Result<Published> {
        let resources = self
            .source
            .list_resources()
            .await
            .context("list proxy resources")?;

        let published = self.store.publish(resources);
        match published {
            Published::Replaced { ref revision, .. } => {
                debug!("Route table {} published, reload server", short_revision(revision));
                self.reload.notify();
            }
            Published::Unchanged => debug!("Proxy resources unchanged"),
        }
        Ok(published)
    }

    /// Reconcile forever. Cycles never overlap: a slow fetch delays the next
    /// tick instead of running concurrently with it.
    pub async fn run(self) {
        let mut ticker = time::interval(self.refresh_time);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately, startup already reconciled.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(err) = self.reconcile().await {
                error!("Reconcile proxy resources error, keep current routes: {err:#}");
            }
        }
    }
}
