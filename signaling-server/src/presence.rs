use std::collections::HashMap;
use std::sync::Arc;

use callbridge_protocol::UserId;
use tokio::sync::RwLock;

use crate::connection::{ConnectionHandle, ConnectionId};

/// Live mapping from a user id to the connection it joined on.
///
/// Cheap to clone, all clones share the same map.
#[derive(Debug, Default, Clone)]
pub struct PresenceRegistry {
    users: Arc<RwLock<HashMap<UserId, ConnectionHandle>>>,
}

impl PresenceRegistry {
    /// Bind `user_id` to `connection`. A previous binding of the same id is replaced
    /// and returned, last join wins.
    pub async fn register(
        &self,
        user_id: UserId,
        connection: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        self.users.write().await.insert(user_id, connection)
    }

    pub async fn lookup(&self, user_id: &UserId) -> Option<ConnectionHandle> {
        self.users.read().await.get(user_id).cloned()
    }

    /// Remove the binding that currently points at `connection`, if any.
    ///
    /// A user that already joined again on a newer connection stays registered.
    pub async fn unregister(&self, connection: ConnectionId) -> Option<UserId> {
        let mut users = self.users.write().await;
        let user_id = users
            .iter()
            .find(|&(_, handle)| handle.id() == connection)
            .map(|(user_id, _)| user_id.clone())?;
        users.remove(&user_id);
        Some(user_id)
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}
