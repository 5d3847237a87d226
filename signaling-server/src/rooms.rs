use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use callbridge_protocol::{RoomId, UserId};
use tokio::sync::RwLock;

use crate::connection::{ConnectionHandle, ConnectionId};

/// One side of a room.
#[derive(Debug, Clone)]
pub struct Member {
    pub user_id: UserId,
    pub connection: ConnectionHandle,
}

impl Member {
    #[must_use]
    pub const fn new(user_id: UserId, connection: ConnectionHandle) -> Self {
        Self {
            user_id,
            connection,
        }
    }
}

/// Bridge between the caller and the callee of one accepted call.
#[derive(Debug, Clone)]
pub struct Room {
    pub id: RoomId,
    pub members: [Member; 2],
    pub created_at: Instant,
}

impl Room {
    #[must_use]
    pub fn involves(&self, connection: ConnectionId) -> bool {
        self.member(connection).is_some()
    }

    #[must_use]
    pub fn member(&self, connection: ConnectionId) -> Option<&Member> {
        self.members
            .iter()
            .find(|member| member.connection.id() == connection)
    }

    /// The member that is not `connection`, `None` if `connection` is not in this room.
    #[must_use]
    pub fn other(&self, connection: ConnectionId) -> Option<&Member> {
        let [first, second] = &self.members;
        if first.connection.id() == connection {
            Some(second)
        } else if second.connection.id() == connection {
            Some(first)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("room {0} already exists")]
    DuplicateRoom(RoomId),
    #[error("user {user_id} is already in room {room_id}")]
    ParticipantBusy { user_id: UserId, room_id: RoomId },
    #[error("user {user_id} disconnected")]
    Disconnected { user_id: UserId },
}

/// Active rooms keyed by id. All mutations are serialized by a single write lock.
#[derive(Debug, Default, Clone)]
pub struct RoomRegistry {
    rooms: Arc<RwLock<HashMap<RoomId, Room>>>,
}

impl RoomRegistry {
    /// Bind `first` and `second` into a new room.
    ///
    /// # Errors
    /// [`RoomError::DuplicateRoom`] if `room_id` is taken, [`RoomError::ParticipantBusy`]
    /// if either member already sits in another room, [`RoomError::Disconnected`]
    /// if either connection was closed.
    pub async fn create(
        &self,
        room_id: RoomId,
        first: Member,
        second: Member,
    ) -> Result<Room, RoomError> {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(&room_id) {
            return Err(RoomError::DuplicateRoom(room_id));
        }
        // Checked under the write lock: a connection closed after this point
        // finds the room in destroy_all_involving.
        if let Some(gone) = [&first, &second]
            .into_iter()
            .find(|member| member.connection.is_closed())
        {
            return Err(RoomError::Disconnected {
                user_id: gone.user_id.clone(),
            });
        }
        for candidate in [&first, &second] {
            if let Some(busy) = rooms
                .values()
                .find(|room| room.involves(candidate.connection.id()))
            {
                return Err(RoomError::ParticipantBusy {
                    user_id: candidate.user_id.clone(),
                    room_id: busy.id.clone(),
                });
            }
        }

        let room = Room {
            id: room_id.clone(),
            members: [first, second],
            created_at: Instant::now(),
        };
        rooms.insert(room_id, room.clone());
        Ok(room)
    }

    pub async fn get(&self, room_id: &RoomId) -> Option<Room> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// Remove a room. Only the first of several concurrent calls gets the room back.
    pub async fn destroy(&self, room_id: &RoomId) -> Option<Room> {
        self.rooms.write().await.remove(room_id)
    }

    /// Remove every room `connection` is a member of and return them,
    /// so the remaining members can be notified.
    pub async fn destroy_all_involving(&self, connection: ConnectionId) -> Vec<Room> {
        let mut rooms = self.rooms.write().await;
        let affected: Vec<RoomId> = rooms
            .values()
            .filter(|room| room.involves(connection))
            .map(|room| room.id.clone())
            .collect();
        affected
            .iter()
            .filter_map(|room_id| rooms.remove(room_id))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rooms.read().await.is_empty()
    }
}
