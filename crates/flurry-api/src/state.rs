use std::sync::{Arc, Mutex};

use axum::http::StatusCode;
use tokio::task::JoinError;
use tracing::error;

use flurry_db::Database;
use flurry_gateway::dispatcher::Dispatcher;
use flurry_types::events::GatewayEvent;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    /// Held from a row's insert until its broadcast has gone out.
    writes: Arc<Mutex<()>>,
}

impl AppStateInner {
    pub fn new(db: Database) -> AppState {
        Arc::new(Self {
            db: Arc::new(db),
            dispatcher: Dispatcher::new(),
            writes: Arc::new(Mutex::new(())),
        })
    }

    /// Run blocking DB work off the async runtime.
    pub(crate) async fn blocking<F, T>(&self, f: F) -> Result<T, StatusCode>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        settle(tokio::task::spawn_blocking(move || f(&db)).await)
    }

    /// Run a write and broadcast the event it produced before any other
    /// write may start. Feeds therefore see rows in the same order as their
    /// timestamps, which is what lets a client resume from the last row it saw.
    pub(crate) async fn publish<F, T>(&self, f: F) -> Result<T, StatusCode>
    where
        F: FnOnce(&Database) -> anyhow::Result<(T, Option<GatewayEvent>)> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let dispatcher = self.dispatcher.clone();
        let writes = self.writes.clone();
        settle(
            tokio::task::spawn_blocking(move || {
                let _serial = writes
                    .lock()
                    .map_err(|e| anyhow::anyhow!("write lock poisoned: {}", e))?;
                let (value, event) = f(&db)?;
                if let Some(event) = event {
                    dispatcher.broadcast(event);
                }
                Ok(value)
            })
            .await,
        )
    }
}

fn settle<T>(joined: Result<anyhow::Result<T>, JoinError>) -> Result<T, StatusCode> {
    joined
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("database error: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}
