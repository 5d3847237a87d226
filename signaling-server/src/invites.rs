use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use callbridge_protocol::{CallId, CallType, ServerMessage, UserId};
use tokio::sync::RwLock;

use crate::connection::ConnectionId;
use crate::rooms::Member;

/// Invite that was delivered to the callee and not answered yet.
#[derive(Debug, Clone)]
pub struct Invite {
    pub call_id: CallId,
    pub caller: Member,
    pub callee: Member,
    pub call_type: CallType,
    pub created_at: Instant,
}

impl Invite {
    #[must_use]
    pub fn new(call_id: CallId, caller: Member, callee: Member, call_type: CallType) -> Self {
        Self {
            call_id,
            caller,
            callee,
            call_type,
            created_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn involves(&self, connection: ConnectionId) -> bool {
        self.caller.connection.id() == connection || self.callee.connection.id() == connection
    }
}

/// Pending invites keyed by call id.
///
/// An invite leaves the registry exactly once: answered by the callee,
/// cancelled by the caller or dropped when either side disconnects.
#[derive(Debug, Default, Clone)]
pub struct InviteRegistry {
    invites: Arc<RwLock<HashMap<CallId, Invite>>>,
}

impl InviteRegistry {
    /// Record an invite and announce its call id to the caller with `call-ringing`.
    /// Returns `false`, leaving the registry untouched, if either side is already disconnected.
    pub async fn insert(&self, invite: Invite) -> bool {
        let mut invites = self.invites.write().await;
        if invite.caller.connection.is_closed() || invite.callee.connection.is_closed() {
            return false;
        }
        // queued under the lock, so it precedes any answer or withdrawal of this invite
        invite.caller.connection.send(ServerMessage::CallRinging {
            call_id: invite.call_id.clone(),
            target_user_id: invite.callee.user_id.clone(),
        });
        invites.insert(invite.call_id.clone(), invite);
        true
    }

    /// Take the invite `call_id` if it was sent by `caller_id` to the user behind `callee`.
    pub async fn answer(
        &self,
        call_id: &CallId,
        callee: ConnectionId,
        caller_id: &UserId,
    ) -> Option<Invite> {
        let mut invites = self.invites.write().await;
        let matches = invites.get(call_id).is_some_and(|invite| {
            invite.callee.connection.id() == callee && &invite.caller.user_id == caller_id
        });
        if matches {
            invites.remove(call_id)
        } else {
            None
        }
    }

    /// Take the invite `call_id` if it was sent from `caller`.
    pub async fn cancel(&self, call_id: &CallId, caller: ConnectionId) -> Option<Invite> {
        let mut invites = self.invites.write().await;
        let matches = invites
            .get(call_id)
            .is_some_and(|invite| invite.caller.connection.id() == caller);
        if matches {
            invites.remove(call_id)
        } else {
            None
        }
    }

    /// Remove every invite `connection` sent or received and return them,
    /// so the other side can be notified.
    pub async fn remove_all_involving(&self, connection: ConnectionId) -> Vec<Invite> {
        let mut invites = self.invites.write().await;
        let affected: Vec<CallId> = invites
            .values()
            .filter(|invite| invite.involves(connection))
            .map(|invite| invite.call_id.clone())
            .collect();
        affected
            .iter()
            .filter_map(|call_id| invites.remove(call_id))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.invites.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.invites.read().await.is_empty()
    }
}
