use std::sync::Arc;

use tokio::sync::broadcast;

use flurry_types::events::GatewayEvent;

/// Fans stored-row events out to every open feed connection.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for gateway events. Each connection filters by its
    /// own chat, feed and cursor.
    broadcast_tx: broadcast::Sender<GatewayEvent>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Events a slow connection may fall behind by before it is cut off.
    pub fn with_capacity(capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(DispatcherInner { broadcast_tx }),
        }
    }

    /// Subscribe to gateway events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected feeds. Having no listeners is fine.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    pub fn listener_count(&self) -> usize {
        self.inner.broadcast_tx.receiver_count()
    }
}
