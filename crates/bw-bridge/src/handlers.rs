use bw_api_types::{PushCategory, PushEvent};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{error, warn};

use crate::lock;

pub type PushHandler = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Default)]
pub(crate) struct PushHandlers {
    next_id: AtomicU64,
    by_category: Mutex<HashMap<PushCategory, Vec<(HandlerId, PushHandler)>>>,
}

impl PushHandlers {
    pub(crate) fn register<F>(&self, category: PushCategory, handler: F) -> HandlerId
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handler: PushHandler = Arc::new(handler);
        lock(&self.by_category)
            .entry(category)
            .or_default()
            .push((id, handler));
        id
    }

    pub(crate) fn remove(&self, id: HandlerId) -> bool {
        let mut guard = lock(&self.by_category);
        for handlers in guard.values_mut() {
            if let Some(index) = handlers.iter().position(|(entry, _)| *entry == id) {
                handlers.remove(index);
                return true;
            }
        }
        false
    }

    /// Run every handler registered for the event's category, in registration
    /// order. Returns how many handlers ran.
    pub(crate) fn dispatch(&self, event: &PushEvent) -> usize {
        // Snapshot so handlers may register or remove handlers themselves.
        let handlers: Vec<PushHandler> = lock(&self.by_category)
            .get(&event.category)
            .map(|entries| entries.iter().map(|(_, handler)| handler.clone()).collect())
            .unwrap_or_default();

        for handler in &handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&event.payload))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(category = %event.category, "push handler failed: {err:#}"),
                Err(_) => error!(category = %event.category, "push handler panicked"),
            }
        }

        handlers.len()
    }
}
