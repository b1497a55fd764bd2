//! Realtime synchronization core for conversations and notifications.
//!
//! One [`SyncClient`] owns the reconciled stores and at most two live
//! channels: one for the selected conversation, one for the account-wide
//! notification stream. Inbound frames flow through a single dispatch path;
//! UI layers read snapshots and subscribe to the event bus, and issue
//! mutations only through the outbound command methods.

use std::sync::Arc;

use async_trait::async_trait;
use shared::{
    domain::{ConversationId, MessageId, NotificationId, PresenceStatus, UserId},
    error::WireError,
    protocol::{ClientFrame, ConversationSummary, MessagePayload, NotificationPayload, ServerFrame},
};
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
};
use tracing::warn;
use url::Url;

mod channel;
pub mod config;
mod dispatch;
pub mod error;
pub mod presence;
pub mod store;
pub mod transport;

pub use config::SyncConfig;
pub use error::{CommandError, SyncError, TransportError};
pub use store::DELETED_MESSAGE_PLACEHOLDER;
pub use transport::{Channel, ChannelSignal, ChannelTransport, Endpoint, WebSocketTransport};

use dispatch::Effect;
use presence::TypingTracker;
use store::{ConversationIndex, MessageStore, NotificationStore};

/// Supplies the current bearer credential. Token acquisition and refresh
/// live outside the engine; `None` means the session is unauthenticated.
pub trait CredentialProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// Fixed token handed in at construction.
pub struct StaticCredential(pub String);

impl CredentialProvider for StaticCredential {
    fn bearer_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// REST collaborator that seeds the stores before the realtime stream takes
/// over: the initial message page for a conversation and the initial
/// conversation summaries.
#[async_trait]
pub trait BootstrapProvider: Send + Sync {
    async fn initial_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> anyhow::Result<Vec<MessagePayload>>;
    async fn conversation_list(&self) -> anyhow::Result<Vec<ConversationSummary>>;
}

/// No REST collaborator wired in; realtime frames are the only data source.
pub struct EmptyBootstrap;

#[async_trait]
impl BootstrapProvider for EmptyBootstrap {
    async fn initial_messages(
        &self,
        _conversation_id: &ConversationId,
    ) -> anyhow::Result<Vec<MessagePayload>> {
        Ok(Vec::new())
    }

    async fn conversation_list(&self) -> anyhow::Result<Vec<ConversationSummary>> {
        Ok(Vec::new())
    }
}

/// Lifecycle of the conversation channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    /// No conversation selected.
    #[default]
    Idle,
    /// Bootstrap fetch and transport connect in flight.
    Loading,
    /// Transport open and authenticated; events flowing.
    Live,
    /// Abnormal closure; the supervisor retry is pending.
    Reconnecting,
}

/// Everything the engine tells its consumers.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    ConnectionChanged {
        endpoint: Endpoint,
        phase: ConnectionPhase,
    },
    NotificationsConnectionChanged {
        connected: bool,
    },
    MessageAdded(MessagePayload),
    MessageEdited(MessagePayload),
    MessageDeleted(MessagePayload),
    ConversationsUpdated,
    TypingChanged {
        user_id: UserId,
        is_typing: bool,
    },
    PresenceChanged {
        user_id: UserId,
        status: PresenceStatus,
    },
    ReadReceipt {
        user_id: UserId,
        conversation_id: ConversationId,
        message_count: u64,
    },
    NotificationAdded(NotificationPayload),
    NotificationsUpdated {
        count: usize,
    },
    ServerError(WireError),
}

/// One live channel: its address, a generation counter that fences signals
/// from superseded drivers, the command sender, and the driver task.
struct ChannelHandle {
    endpoint: Endpoint,
    epoch: u64,
    outbound: mpsc::UnboundedSender<ClientFrame>,
    driver: JoinHandle<()>,
    authenticated: bool,
}

impl ChannelHandle {
    fn close(self) {
        self.driver.abort();
    }
}

#[derive(Default)]
pub(crate) struct SyncState {
    pub(crate) phase: ConnectionPhase,
    pub(crate) active_conversation: Option<ConversationId>,
    conversation_channel: Option<ChannelHandle>,
    notification_channel: Option<ChannelHandle>,
    pub(crate) user_id: Option<UserId>,
    pub(crate) messages: MessageStore,
    pub(crate) conversations: ConversationIndex,
    pub(crate) notifications: NotificationStore,
    pub(crate) typing: TypingTracker,
    next_epoch: u64,
}

impl SyncState {
    fn channel_for(&self, endpoint: &Endpoint) -> Option<&ChannelHandle> {
        match endpoint {
            Endpoint::Conversation(_) => self.conversation_channel.as_ref(),
            Endpoint::Notifications => self.notification_channel.as_ref(),
        }
    }

    fn channel_for_mut(&mut self, endpoint: &Endpoint) -> Option<&mut ChannelHandle> {
        match endpoint {
            Endpoint::Conversation(_) => self.conversation_channel.as_mut(),
            Endpoint::Notifications => self.notification_channel.as_mut(),
        }
    }

    /// A signal is only valid when it carries the epoch of the channel that
    /// currently owns the endpoint; anything else is a leftover from an
    /// aborted driver.
    fn is_current(&self, endpoint: &Endpoint, epoch: u64) -> bool {
        self.channel_for(endpoint)
            .is_some_and(|handle| handle.epoch == epoch && handle.endpoint == *endpoint)
    }
}

/// The synchronization engine. Construct with [`SyncClient::new`] (or
/// [`SyncClient::over_websocket`]), then `start()` the notification stream
/// and `select_conversation()` to go live on a conversation.
pub struct SyncClient {
    pub(crate) config: SyncConfig,
    pub(crate) transport: Arc<dyn ChannelTransport>,
    pub(crate) credentials: Arc<dyn CredentialProvider>,
    bootstrap: Arc<dyn BootstrapProvider>,
    inner: Mutex<SyncState>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncClient {
    pub fn new(
        config: SyncConfig,
        transport: Arc<dyn ChannelTransport>,
        credentials: Arc<dyn CredentialProvider>,
        bootstrap: Arc<dyn BootstrapProvider>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_capacity);
        Arc::new(Self {
            config,
            transport,
            credentials,
            bootstrap,
            inner: Mutex::new(SyncState::default()),
            events,
        })
    }

    /// WebSocket transport against `base_url` with a fixed bearer token and
    /// no REST bootstrap.
    pub fn over_websocket(base_url: Url, token: impl Into<String>) -> Arc<Self> {
        Self::new(
            SyncConfig::default(),
            Arc::new(WebSocketTransport::new(base_url)),
            Arc::new(StaticCredential(token.into())),
            Arc::new(EmptyBootstrap),
        )
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Open the notification stream and seed the conversation index.
    /// Idempotent while the stream is already up.
    pub async fn start(self: &Arc<Self>) -> Result<(), SyncError> {
        if self.credentials.bearer_token().is_none() {
            return Err(SyncError::Unauthenticated);
        }
        let summaries = self
            .bootstrap
            .conversation_list()
            .await
            .map_err(SyncError::Bootstrap)?;
        {
            let mut state = self.inner.lock().await;
            state.conversations.reset(summaries);
            if state.notification_channel.is_none() {
                let handle = self.spawn_channel(&mut state, Endpoint::Notifications);
                state.notification_channel = Some(handle);
            }
        }
        let _ = self.events.send(SyncEvent::ConversationsUpdated);
        Ok(())
    }

    /// Tear down both channels and clear conversation-scoped state.
    pub async fn stop(&self) {
        let (conversation, notifications) = {
            let mut state = self.inner.lock().await;
            let conversation = state.conversation_channel.take();
            let notifications = state.notification_channel.take();
            state.phase = ConnectionPhase::Idle;
            state.active_conversation = None;
            state.messages.clear();
            state.typing.reset();
            (conversation, notifications)
        };
        if let Some(handle) = conversation {
            let endpoint = handle.endpoint.clone();
            handle.close();
            let _ = self.events.send(SyncEvent::ConnectionChanged {
                endpoint,
                phase: ConnectionPhase::Idle,
            });
        }
        if let Some(handle) = notifications {
            handle.close();
            let _ = self
                .events
                .send(SyncEvent::NotificationsConnectionChanged { connected: false });
        }
    }

    /// Switch the engine to a conversation: tear down the previous channel,
    /// load the initial history page, then go live. Selecting the already
    /// active conversation is a no-op.
    pub async fn select_conversation(
        self: &Arc<Self>,
        conversation_id: ConversationId,
    ) -> Result<(), SyncError> {
        if self.credentials.bearer_token().is_none() {
            return Err(SyncError::Unauthenticated);
        }
        let previous = {
            let mut state = self.inner.lock().await;
            if state.active_conversation.as_ref() == Some(&conversation_id)
                && state.conversation_channel.is_some()
            {
                return Ok(());
            }
            let previous = state.conversation_channel.take();
            state.active_conversation = Some(conversation_id.clone());
            state.phase = ConnectionPhase::Loading;
            state.messages.clear();
            state.typing.reset();
            previous
        };
        if let Some(handle) = previous {
            handle.close();
        }
        let _ = self.events.send(SyncEvent::ConnectionChanged {
            endpoint: Endpoint::Conversation(conversation_id.clone()),
            phase: ConnectionPhase::Loading,
        });

        let history = match self.bootstrap.initial_messages(&conversation_id).await {
            Ok(history) => history,
            Err(err) => {
                {
                    let mut state = self.inner.lock().await;
                    if state.active_conversation.as_ref() == Some(&conversation_id) {
                        state.active_conversation = None;
                        state.phase = ConnectionPhase::Idle;
                    }
                }
                let _ = self.events.send(SyncEvent::ConnectionChanged {
                    endpoint: Endpoint::Conversation(conversation_id),
                    phase: ConnectionPhase::Idle,
                });
                return Err(SyncError::Bootstrap(err));
            }
        };

        let mut state = self.inner.lock().await;
        // Selection may have moved on while the fetch was in flight.
        if state.active_conversation.as_ref() != Some(&conversation_id) {
            return Ok(());
        }
        state.messages.reset(history);
        let handle = self.spawn_channel(&mut state, Endpoint::Conversation(conversation_id));
        state.conversation_channel = Some(handle);
        Ok(())
    }

    /// Leave the current conversation, cancelling any pending reconnect.
    pub async fn deselect_conversation(&self) {
        let previous = {
            let mut state = self.inner.lock().await;
            let previous = state.conversation_channel.take();
            state.active_conversation = None;
            state.phase = ConnectionPhase::Idle;
            state.messages.clear();
            state.typing.reset();
            previous
        };
        if let Some(handle) = previous {
            let endpoint = handle.endpoint.clone();
            handle.close();
            let _ = self.events.send(SyncEvent::ConnectionChanged {
                endpoint,
                phase: ConnectionPhase::Idle,
            });
        }
    }

    fn spawn_channel(self: &Arc<Self>, state: &mut SyncState, endpoint: Endpoint) -> ChannelHandle {
        state.next_epoch += 1;
        let epoch = state.next_epoch;
        let (outbound, commands) = mpsc::unbounded_channel();
        let driver = tokio::spawn(channel::drive(
            Arc::clone(self),
            endpoint.clone(),
            epoch,
            commands,
        ));
        ChannelHandle {
            endpoint,
            epoch,
            outbound,
            driver,
            authenticated: false,
        }
    }

    // ---- outbound commands -------------------------------------------------

    pub async fn send_message(
        &self,
        text: impl Into<String>,
        attachments: Vec<String>,
    ) -> Result<(), CommandError> {
        let text = text.into();
        self.conversation_command(move |conversation_id| ClientFrame::SendMessage {
            conversation_id: conversation_id.clone(),
            text,
            attachments,
        })
        .await
    }

    pub async fn send_typing(&self, is_typing: bool) -> Result<(), CommandError> {
        self.conversation_command(move |conversation_id| ClientFrame::Typing {
            conversation_id: conversation_id.clone(),
            is_typing,
        })
        .await
    }

    pub async fn edit_message(
        &self,
        message_id: MessageId,
        text: impl Into<String>,
    ) -> Result<(), CommandError> {
        let text = text.into();
        self.conversation_command(move |_| ClientFrame::EditMessage { message_id, text })
            .await
    }

    pub async fn delete_message(&self, message_id: MessageId) -> Result<(), CommandError> {
        self.conversation_command(move |_| ClientFrame::DeleteMessage { message_id })
            .await
    }

    /// Tell the server everything in the conversation was read, and zero the
    /// local unread counter for the current user.
    pub async fn send_read_receipt(
        &self,
        conversation_id: ConversationId,
    ) -> Result<(), CommandError> {
        let mut state = self.inner.lock().await;
        if state.active_conversation.is_none() {
            return Err(CommandError::NoActiveConversation);
        }
        {
            let handle = state
                .conversation_channel
                .as_ref()
                .filter(|handle| handle.authenticated)
                .ok_or(CommandError::NotConnected)?;
            handle
                .outbound
                .send(ClientFrame::ReadReceipt {
                    conversation_id: conversation_id.clone(),
                    message_ids: Vec::new(),
                })
                .map_err(|_| CommandError::NotConnected)?;
        }
        if let Some(user_id) = state.user_id.clone() {
            state.conversations.reset_unread(&conversation_id, &user_id);
        }
        drop(state);
        let _ = self.events.send(SyncEvent::ConversationsUpdated);
        Ok(())
    }

    async fn conversation_command(
        &self,
        build: impl FnOnce(&ConversationId) -> ClientFrame,
    ) -> Result<(), CommandError> {
        let state = self.inner.lock().await;
        let conversation_id = state
            .active_conversation
            .as_ref()
            .ok_or(CommandError::NoActiveConversation)?;
        let handle = state
            .conversation_channel
            .as_ref()
            .filter(|handle| handle.authenticated)
            .ok_or(CommandError::NotConnected)?;
        handle
            .outbound
            .send(build(conversation_id))
            .map_err(|_| CommandError::NotConnected)
    }

    // ---- local notification operations ------------------------------------

    pub async fn mark_notification_read(&self, id: &NotificationId) -> bool {
        let changed = self.inner.lock().await.notifications.mark_read(id);
        if changed {
            let _ = self.events.send(SyncEvent::NotificationsUpdated { count: 0 });
        }
        changed
    }

    pub async fn mark_all_notifications_read(&self) {
        self.inner.lock().await.notifications.mark_all_read();
        let _ = self.events.send(SyncEvent::NotificationsUpdated { count: 0 });
    }

    pub async fn remove_notification(&self, id: &NotificationId) -> bool {
        let removed = self.inner.lock().await.notifications.remove(id);
        if removed {
            let _ = self.events.send(SyncEvent::NotificationsUpdated { count: 0 });
        }
        removed
    }

    // ---- snapshots ---------------------------------------------------------

    pub async fn messages(&self) -> Vec<MessagePayload> {
        self.inner.lock().await.messages.snapshot()
    }

    pub async fn conversations(&self) -> Vec<ConversationSummary> {
        self.inner.lock().await.conversations.snapshot()
    }

    pub async fn notifications(&self) -> Vec<NotificationPayload> {
        self.inner.lock().await.notifications.snapshot()
    }

    pub async fn unread_notifications(&self) -> u32 {
        self.inner.lock().await.notifications.unread()
    }

    pub async fn typing_users(&self) -> Vec<UserId> {
        self.inner.lock().await.typing.users()
    }

    pub async fn connection_status(&self) -> ConnectionPhase {
        self.inner.lock().await.phase
    }

    pub async fn notifications_connected(&self) -> bool {
        self.inner
            .lock()
            .await
            .notification_channel
            .as_ref()
            .is_some_and(|handle| handle.authenticated)
    }

    pub async fn current_user(&self) -> Option<UserId> {
        self.inner.lock().await.user_id.clone()
    }

    pub async fn active_conversation(&self) -> Option<ConversationId> {
        self.inner.lock().await.active_conversation.clone()
    }

    // ---- driver callbacks --------------------------------------------------

    pub(crate) async fn handle_frame(
        self: &Arc<Self>,
        endpoint: &Endpoint,
        epoch: u64,
        frame: ServerFrame,
    ) {
        let effects = {
            let mut state = self.inner.lock().await;
            if !state.is_current(endpoint, epoch) {
                return;
            }
            dispatch::apply(&mut state, &self.config, endpoint, frame)
        };
        self.run_effects(endpoint, epoch, effects).await;
    }

    pub(crate) async fn on_channel_closed(&self, endpoint: &Endpoint, epoch: u64) {
        let event = {
            let mut state = self.inner.lock().await;
            if !state.is_current(endpoint, epoch) {
                return;
            }
            if let Some(handle) = state.channel_for_mut(endpoint) {
                handle.authenticated = false;
            }
            match endpoint {
                Endpoint::Conversation(_) => {
                    let already = state.phase == ConnectionPhase::Reconnecting;
                    state.phase = ConnectionPhase::Reconnecting;
                    (!already).then(|| SyncEvent::ConnectionChanged {
                        endpoint: endpoint.clone(),
                        phase: ConnectionPhase::Reconnecting,
                    })
                }
                Endpoint::Notifications => {
                    Some(SyncEvent::NotificationsConnectionChanged { connected: false })
                }
            }
        };
        if let Some(event) = event {
            let _ = self.events.send(event);
        }
    }

    async fn run_effects(self: &Arc<Self>, endpoint: &Endpoint, epoch: u64, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Emit(event) => {
                    let _ = self.events.send(event);
                }
                Effect::Send(frame) => self.send_on(endpoint, epoch, frame).await,
                Effect::Reauthenticate => match self.credentials.bearer_token() {
                    Some(token) => {
                        self.send_on(endpoint, epoch, ClientFrame::Authenticate { token })
                            .await;
                    }
                    None => {
                        warn!(%endpoint, "re-authentication requested but no credential available");
                    }
                },
                Effect::ArmTypingExpiry {
                    user_id,
                    generation,
                } => self.arm_typing_expiry(user_id, generation),
            }
        }
    }

    async fn send_on(&self, endpoint: &Endpoint, epoch: u64, frame: ClientFrame) {
        let state = self.inner.lock().await;
        if let Some(handle) = state.channel_for(endpoint) {
            if handle.epoch == epoch && handle.endpoint == *endpoint {
                let _ = handle.outbound.send(frame);
            }
        }
    }

    fn arm_typing_expiry(self: &Arc<Self>, user_id: UserId, generation: u64) {
        let client = Arc::clone(self);
        let ttl = self.config.typing_ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let expired = {
                let mut state = client.inner.lock().await;
                state.typing.expire(&user_id, generation)
            };
            if expired {
                let _ = client.events.send(SyncEvent::TypingChanged {
                    user_id,
                    is_typing: false,
                });
            }
        });
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
