use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::destination::Destination;
use crate::error::CdcResult;
use crate::types::Event;

#[derive(Debug)]
struct Inner {
    events: Vec<Event>,
}

/// In-memory destination for testing and development purposes.
///
/// [`MemoryDestination`] stores all captured events in memory, making it
/// ideal for testing capture sessions, debugging replication behavior, and
/// development workflows. All data is held in memory and will be lost when
/// the process terminates.
#[derive(Debug, Clone)]
pub struct MemoryDestination {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDestination {
    /// Creates a new empty memory destination.
    pub fn new() -> Self {
        let inner = Inner { events: Vec::new() };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Returns a copy of all events stored in this destination.
    ///
    /// This method is useful for testing and verification of capture
    /// behavior.
    pub async fn events(&self) -> Vec<Event> {
        let inner = self.inner.lock().await;
        inner.events.clone()
    }

    /// Clears all stored events.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.events.clear();
    }
}

impl Default for MemoryDestination {
    fn default() -> Self {
        Self::new()
    }
}

impl Destination for MemoryDestination {
    fn name() -> &'static str {
        "memory"
    }

    async fn write_events(&self, events: Vec<Event>) -> CdcResult<()> {
        let mut inner = self.inner.lock().await;

        info!("writing a batch of {} events", events.len());
        inner.events.extend(events);

        Ok(())
    }
}
