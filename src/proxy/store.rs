use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use log::{info, warn};
use tokio::sync::Notify;

use crate::types::resource::ProxyResource;

use super::route::{self, RouteTable};

/// Holds the currently published [`RouteTable`].
///
/// Readers load the table with a single atomic load and keep the `Arc` for
/// as long as they need it. Writers are serialized by `writer`, which also
/// guards the compare step of [`RouteStore::publish`] and records whether
/// anything was published yet.
pub struct RouteStore {
    current: ArcSwap<RouteTable>,
    writer: Mutex<bool>,
}

/// What [`RouteStore::publish`] did with a fetched resource list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Published {
    Unchanged,
    Replaced { revision: String, routes: usize },
}

impl RouteStore {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(RouteTable::empty()),
            writer: Mutex::new(false),
        }
    }

    pub fn current(&self) -> Arc<RouteTable> {
        self.current.load_full()
    }

    /// Publish a table built from `resources` unless it has the same content
    /// as the current one. The first publish always replaces the bootstrap
    /// table, even with no resources.
    pub fn publish(&self, resources: Vec<ProxyResource>) -> Published {
        let mut published_once = match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let revision = route::revision(&resources);
        if *published_once && self.current.load().revision() == revision {
            return Published::Unchanged;
        }
        *published_once = true;

        let table = RouteTable::build(resources);
        if table.is_empty() {
            warn!("Publishing an empty route table, every request will be answered with 404");
        }
        info!(
            "Publishing route table {} with {} routes",
            short_revision(table.revision()),
            table.len()
        );

        let published = Published::Replaced {
            revision: table.revision().to_string(),
            routes: table.len(),
        };
        self.current.store(Arc::new(table));
        published
    }
}

impl Default for RouteStore {
    fn default() -> Self {
        Self::new()
    }
}

pub fn short_revision(revision: &str) -> &str {
    &revision[..revision.len().min(12)]
}

/// Single-slot reload notification.
///
/// Any number of [`ReloadSignal::notify`] calls made before the receiver
/// wakes up fold into one pending reload.
pub struct ReloadSignal {
    pending: AtomicBool,
    notify: Notify,
}

impl ReloadSignal {
    pub fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn notify(&self) {
        self.pending.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Consume a pending reload without waiting. Returns whether one was
    /// pending.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    /// Wait for a pending reload and consume it.
    pub async fn recv(&self) {
        loop {
            let notified = self.notify.notified();
            if self.pending.swap(false, Ordering::AcqRel) {
                return;
            }
            notified.await;
        }
    }
}

impl Default for ReloadSignal {
    fn default() -> Self {
        Self::new()
    }
}
