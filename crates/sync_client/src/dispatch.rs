use shared::{
    domain::UserId,
    error::WireError,
    protocol::{ClientFrame, MessagePayload, ServerFrame},
};
use tracing::{debug, warn};

use crate::{
    config::SyncConfig, transport::Endpoint, ConnectionPhase, SyncEvent, SyncState,
};

/// Follow-up work a frame produces besides its state mutation. The caller
/// emits the events, routes the frames back onto the same channel, and arms
/// the expiry tasks; this function itself never touches a transport or a
/// timer, which is what keeps it unit-testable.
#[derive(Debug)]
pub(crate) enum Effect {
    Emit(SyncEvent),
    Send(ClientFrame),
    Reauthenticate,
    ArmTypingExpiry { user_id: UserId, generation: u64 },
}

/// Route one inbound frame into the stores.
pub(crate) fn apply(
    state: &mut SyncState,
    config: &SyncConfig,
    endpoint: &Endpoint,
    frame: ServerFrame,
) -> Vec<Effect> {
    let mut effects = Vec::new();
    match frame {
        ServerFrame::AuthRequired { .. } => effects.push(Effect::Reauthenticate),
        ServerFrame::Authenticated { user_id } => {
            if let Some(user_id) = user_id {
                state.user_id = Some(user_id);
            }
            match endpoint {
                Endpoint::Conversation(conversation_id) => {
                    state.phase = ConnectionPhase::Live;
                    if let Some(handle) = state.conversation_channel.as_mut() {
                        handle.authenticated = true;
                    }
                    effects.push(Effect::Emit(SyncEvent::ConnectionChanged {
                        endpoint: endpoint.clone(),
                        phase: ConnectionPhase::Live,
                    }));
                    // Recover whatever was pushed while the channel was down.
                    // Only ever issued here, after authentication.
                    effects.push(Effect::Send(ClientFrame::GetMissedMessages {
                        conversation_id: conversation_id.clone(),
                    }));
                }
                Endpoint::Notifications => {
                    if let Some(handle) = state.notification_channel.as_mut() {
                        handle.authenticated = true;
                    }
                    effects.push(Effect::Emit(SyncEvent::NotificationsConnectionChanged {
                        connected: true,
                    }));
                    effects.push(Effect::Send(ClientFrame::NotificationsSync {
                        unread_only: true,
                        limit: config.resync_limit,
                    }));
                }
            }
        }
        ServerFrame::Message { message }
        | ServerFrame::MessageSent { message }
        | ServerFrame::ChatMessage { message }
        | ServerFrame::MissedMessage { message, .. } => {
            ingest_message(state, message, &mut effects);
        }
        ServerFrame::MissedMessages { messages, .. } => {
            for message in messages {
                ingest_message(state, message, &mut effects);
            }
        }
        ServerFrame::MessageEdited { message } => match state.messages.apply_edit(&message) {
            Some(merged) => {
                effects.push(Effect::Emit(SyncEvent::MessageEdited(merged)));
            }
            None => debug!(message_id = %message.id, "dropping edit for unknown message"),
        },
        ServerFrame::MessageDeleted { message } => match state.messages.apply_delete(&message) {
            Some(tombstone) => {
                state.conversations.record_message(&tombstone);
                effects.push(Effect::Emit(SyncEvent::MessageDeleted(tombstone)));
                effects.push(Effect::Emit(SyncEvent::ConversationsUpdated));
            }
            None => debug!(message_id = %message.id, "dropping delete for unknown message"),
        },
        ServerFrame::Typing { user_id, is_typing } => {
            if is_typing {
                let generation = state.typing.set_typing(user_id.clone());
                effects.push(Effect::Emit(SyncEvent::TypingChanged {
                    user_id: user_id.clone(),
                    is_typing: true,
                }));
                effects.push(Effect::ArmTypingExpiry {
                    user_id,
                    generation,
                });
            } else if state.typing.clear(&user_id) {
                effects.push(Effect::Emit(SyncEvent::TypingChanged {
                    user_id,
                    is_typing: false,
                }));
            }
        }
        ServerFrame::ReadReceipt {
            user_id,
            conversation_id,
            message_count,
        } => {
            effects.push(Effect::Emit(SyncEvent::ReadReceipt {
                user_id,
                conversation_id,
                message_count,
            }));
        }
        ServerFrame::ReadReceiptSent { .. } => {}
        ServerFrame::Presence { user_id, status } => {
            effects.push(Effect::Emit(SyncEvent::PresenceChanged { user_id, status }));
        }
        ServerFrame::Notification { notification } => {
            state.notifications.prepend(notification.clone());
            effects.push(Effect::Emit(SyncEvent::NotificationAdded(notification)));
        }
        ServerFrame::MissedNotifications { notifications }
        | ServerFrame::NotificationsSync { notifications } => {
            let count = state.notifications.prepend_batch(notifications);
            effects.push(Effect::Emit(SyncEvent::NotificationsUpdated { count }));
        }
        ServerFrame::Pong => {}
        ServerFrame::Error { code, error } => {
            warn!(?code, error = %error, %endpoint, "server error frame");
            effects.push(Effect::Emit(SyncEvent::ServerError(WireError::new(
                code, error,
            ))));
        }
    }
    effects
}

fn ingest_message(state: &mut SyncState, message: MessagePayload, effects: &mut Vec<Effect>) {
    if state.active_conversation.as_ref() == Some(&message.conversation_id) {
        if state.messages.upsert(message.clone()) {
            effects.push(Effect::Emit(SyncEvent::MessageAdded(message.clone())));
        } else {
            // Duplicate delivery: typically the broadcast copy of a message
            // the client already counted via its `message_sent` confirmation.
            debug!(message_id = %message.id, "discarding duplicate message delivery");
            return;
        }
    }
    state.conversations.record_message(&message);
    effects.push(Effect::Emit(SyncEvent::ConversationsUpdated));
}
