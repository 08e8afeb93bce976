use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identifier of one live WebSocket connection.
pub type ChannelId = Uuid;

#[derive(Clone, Debug)]
/// Handle used to push messages to a connected client.
pub struct ChannelHandle {
    pub id: ChannelId,
    /// Verified identity the channel was admitted with.
    pub user_id: String,
    pub tx: mpsc::UnboundedSender<Message>,
}

/// Broadcast groups: which channels listen to which session.
///
/// A channel belongs to at most one session, and a user has at most one channel in
/// a session. Membership is added on a successful create/host/join/reconnect and
/// removed when the channel closes, moves to another session or is superseded.
#[derive(Default)]
pub struct Membership {
    sessions: DashMap<Uuid, DashMap<ChannelId, ChannelHandle>>,
    channels: DashMap<ChannelId, Uuid>,
}

/// What a [`Membership::register`] call displaced.
#[derive(Debug, Default)]
pub struct Attachment {
    /// Session the channel was bound to before, when it differs from the new one.
    pub left_session: Option<Uuid>,
    /// Older channels of the same user in the new session. They no longer receive
    /// events and fail the attachment check.
    pub superseded: Vec<ChannelId>,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` under `session_id`, leaving any session it was bound to
    /// before and evicting other channels of the same user from that session.
    pub fn register(&self, session_id: Uuid, handle: ChannelHandle) -> Attachment {
        let channel_id = handle.id;
        let mut attachment = Attachment::default();

        let previous = self.channels.insert(channel_id, session_id);
        if let Some(previous) = previous.filter(|previous| *previous != session_id) {
            self.detach(previous, channel_id);
            attachment.left_session = Some(previous);
        }

        let group = self.sessions.entry(session_id).or_default();
        group.retain(|id, member| {
            let stale = *id != channel_id && member.user_id == handle.user_id;
            if stale {
                attachment.superseded.push(*id);
            }
            !stale
        });
        group.insert(channel_id, handle);
        drop(group);

        for stale in &attachment.superseded {
            self.channels.remove_if(stale, |_, bound| *bound == session_id);
        }
        attachment
    }

    /// Session the channel is currently bound to.
    pub fn session_of(&self, channel_id: ChannelId) -> Option<Uuid> {
        self.channels.get(&channel_id).map(|entry| *entry.value())
    }

    /// Drop a closed channel, returning the session it belonged to.
    pub fn remove_channel(&self, channel_id: ChannelId) -> Option<Uuid> {
        let (_, session_id) = self.channels.remove(&channel_id)?;
        self.detach(session_id, channel_id);
        Some(session_id)
    }

    /// Snapshot of the channels listening to `session_id`.
    pub fn members(&self, session_id: Uuid) -> Vec<ChannelHandle> {
        self.sessions
            .get(&session_id)
            .map(|group| group.iter().map(|entry| entry.value().clone()).collect())
            .unwrap_or_default()
    }

    fn detach(&self, session_id: Uuid, channel_id: ChannelId) {
        if let Some(group) = self.sessions.get(&session_id) {
            group.remove(&channel_id);
        }
        self.sessions
            .remove_if(&session_id, |_, group| group.is_empty());
    }
}
