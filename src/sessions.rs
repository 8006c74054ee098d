//! Live monitor sessions
//!
//! Every websocket client of the monitor stream is recorded as a
//! [`Session`] while connected. Admins can list sessions and force one to
//! disconnect; the registry keeps a kill switch per live connection for
//! that purpose.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};

use crate::storage::schema::{Session, new_id};
use crate::storage::{SharedStorage, StorageResult};

/// Role of sessions that receive every monitor event
pub const ADMIN_ROLE: &str = "admin";

/// Who is opening a session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionInfo {
    pub user_id: String,
    pub role: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Clone)]
pub struct SessionRegistry {
    storage: SharedStorage,
    live: Arc<Mutex<HashMap<String, oneshot::Sender<()>>>>,
}

impl SessionRegistry {
    pub fn new(storage: SharedStorage) -> Self {
        Self {
            storage,
            live: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record a new session
    ///
    /// The returned receiver completes when the session is terminated (or
    /// its registration dropped); the connection should then close.
    pub async fn connect(&self, info: SessionInfo) -> StorageResult<(Session, oneshot::Receiver<()>)> {
        let now = Utc::now();
        let session = Session {
            user_id: info.user_id,
            role: info.role,
            connection_id: new_id(),
            ip: info.ip,
            user_agent: info.user_agent,
            connected_at: now,
            updated_at: now,
        };
        self.storage.insert_session(session.clone()).await?;

        let (kill_tx, kill_rx) = oneshot::channel();
        self.live
            .lock()
            .await
            .insert(session.connection_id.clone(), kill_tx);

        info!(
            "monitor session {} opened by {} ({})",
            session.connection_id, session.user_id, session.role
        );
        Ok((session, kill_rx))
    }

    /// Forget a session after its connection closed
    pub async fn disconnect(&self, connection_id: &str) {
        self.live.lock().await.remove(connection_id);
        match self.storage.remove_session(connection_id).await {
            Ok(_) => debug!("monitor session {connection_id} closed"),
            Err(e) => warn!("failed to remove session {connection_id}: {e}"),
        }
    }

    pub async fn list(&self) -> StorageResult<Vec<Session>> {
        self.storage.list_sessions().await
    }

    /// Force a session to disconnect; returns `false` if it was unknown
    pub async fn terminate(&self, connection_id: &str) -> StorageResult<bool> {
        let kill = self.live.lock().await.remove(connection_id);
        let stored = self.storage.remove_session(connection_id).await?;

        let was_live = match kill {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        };

        if stored || was_live {
            info!("terminated monitor session {connection_id}");
        }
        Ok(stored || was_live)
    }

    /// Terminate every live session
    pub async fn terminate_all(&self) -> usize {
        let drained: Vec<_> = self.live.lock().await.drain().collect();
        let count = drained.len();
        for (connection_id, tx) in drained {
            let _ = tx.send(());
            if let Err(e) = self.storage.remove_session(&connection_id).await {
                warn!("failed to remove session {connection_id}: {e}");
            }
        }
        count
    }
}
