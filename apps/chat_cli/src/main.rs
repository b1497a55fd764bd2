use anyhow::{bail, Result};
use clap::Parser;
use shared::domain::{ConversationId, MessageId, NotificationId};
use sync_client::{SyncClient, SyncEvent};
use tokio::io::{AsyncBufReadExt, BufReader};
use url::Url;

mod settings;

#[derive(Parser, Debug)]
#[command(about = "Terminal client for the realtime chat stream")]
struct Args {
    /// Base URL of the chat server, e.g. http://127.0.0.1:8000
    #[arg(long)]
    server_url: Option<String>,
    /// Bearer token for the websocket channels
    #[arg(long)]
    token: Option<String>,
    /// Conversation to join on startup
    #[arg(long)]
    conversation: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let mut settings = settings::load_settings();
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    if let Some(token) = args.token {
        settings.token = token;
    }
    if let Some(conversation) = args.conversation {
        settings.conversation = Some(conversation);
    }
    if settings.token.is_empty() {
        bail!("a bearer token is required (--token, CHAT_TOKEN, or chat_cli.toml)");
    }

    let base_url = Url::parse(&settings.server_url)?;
    let client = SyncClient::over_websocket(base_url, settings.token);

    let mut events = client.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(event);
        }
    });

    client.start().await?;
    if let Some(conversation) = settings.conversation {
        client
            .select_conversation(ConversationId::new(conversation))
            .await?;
    }

    println!("commands: /typing on|off, /edit <id> <text>, /delete <id>, /read, /ack <id>, /quit");
    println!("anything else is sent as a message");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix('/') {
            if handle_command(&client, rest).await? {
                break;
            }
        } else if let Err(err) = client.send_message(line, Vec::new()).await {
            eprintln!("message not sent: {err}");
        }
    }

    client.stop().await;
    Ok(())
}

/// Returns true when the user asked to quit.
async fn handle_command(client: &std::sync::Arc<SyncClient>, input: &str) -> Result<bool> {
    let mut parts = input.splitn(3, ' ');
    let command = parts.next().unwrap_or_default();
    match command {
        "quit" => return Ok(true),
        "typing" => {
            let is_typing = parts.next() == Some("on");
            if let Err(err) = client.send_typing(is_typing).await {
                eprintln!("typing not sent: {err}");
            }
        }
        "edit" => match (parts.next(), parts.next()) {
            (Some(id), Some(text)) => {
                if let Err(err) = client.edit_message(MessageId::from(id), text).await {
                    eprintln!("edit not sent: {err}");
                }
            }
            _ => eprintln!("usage: /edit <message-id> <new text>"),
        },
        "delete" => match parts.next() {
            Some(id) => {
                if let Err(err) = client.delete_message(MessageId::from(id)).await {
                    eprintln!("delete not sent: {err}");
                }
            }
            None => eprintln!("usage: /delete <message-id>"),
        },
        "read" => match client.active_conversation().await {
            Some(conversation_id) => {
                if let Err(err) = client.send_read_receipt(conversation_id).await {
                    eprintln!("read receipt not sent: {err}");
                }
            }
            None => eprintln!("no conversation selected"),
        },
        "ack" => match parts.next() {
            Some(id) => {
                client.mark_notification_read(&NotificationId::from(id)).await;
            }
            None => eprintln!("usage: /ack <notification-id>"),
        },
        other => eprintln!("unknown command: /{other}"),
    }
    Ok(false)
}

fn print_event(event: SyncEvent) {
    match event {
        SyncEvent::ConnectionChanged { endpoint, phase } => {
            println!("* {endpoint}: {phase:?}");
        }
        SyncEvent::NotificationsConnectionChanged { connected } => {
            println!("* notifications: {}", if connected { "live" } else { "offline" });
        }
        SyncEvent::MessageAdded(message) => {
            let body = message.text.as_deref().unwrap_or("[attachment]");
            println!("[{}] {}: {body}", message.id, message.sender_id);
        }
        SyncEvent::MessageEdited(message) => {
            let body = message.text.as_deref().unwrap_or_default();
            println!("[{}] (edited) {body}", message.id);
        }
        SyncEvent::MessageDeleted(message) => {
            println!("[{}] (deleted)", message.id);
        }
        SyncEvent::TypingChanged { user_id, is_typing } => {
            if is_typing {
                println!("* {user_id} is typing...");
            }
        }
        SyncEvent::PresenceChanged { user_id, status } => {
            println!("* {user_id} is {status:?}");
        }
        SyncEvent::ReadReceipt {
            user_id,
            message_count,
            ..
        } => {
            println!("* {user_id} read {message_count} messages");
        }
        SyncEvent::NotificationAdded(notification) => {
            println!("! {}: {}", notification.title, notification.body);
        }
        SyncEvent::NotificationsUpdated { count } if count > 0 => {
            println!("! synced {count} notifications");
        }
        SyncEvent::NotificationsUpdated { .. } => {}
        SyncEvent::ConversationsUpdated => {}
        SyncEvent::ServerError(err) => {
            eprintln!("server error: {err}");
        }
    }
}
