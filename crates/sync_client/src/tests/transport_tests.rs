use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio::{net::TcpListener, sync::Mutex, time::timeout};

use super::*;

#[derive(Clone)]
struct ServerState {
    seen_tokens: Arc<Mutex<Vec<String>>>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<ServerState>,
) -> impl IntoResponse {
    let token = params.get("token").cloned().unwrap_or_default();
    state.seen_tokens.lock().await.push(token);
    ws.on_upgrade(handle_socket)
}

async fn handle_socket(mut socket: WebSocket) {
    let hello = r#"{"type":"authenticated","user_id":"me"}"#;
    if socket.send(WsMessage::Text(hello.to_string())).await.is_err() {
        return;
    }
    while let Some(Ok(message)) = socket.recv().await {
        if let WsMessage::Text(text) = message {
            if text.contains("\"ping\"") {
                let _ = socket
                    .send(WsMessage::Text(r#"{"type":"pong"}"#.to_string()))
                    .await;
                // A frame the client has no variant for; it must be dropped
                // without surfacing anywhere.
                let _ = socket
                    .send(WsMessage::Text(r#"{"type":"mystery_frame"}"#.to_string()))
                    .await;
                break;
            }
        }
    }
}

async fn spawn_ws_server() -> (String, Arc<Mutex<Vec<String>>>) {
    let seen_tokens = Arc::new(Mutex::new(Vec::new()));
    let state = ServerState {
        seen_tokens: Arc::clone(&seen_tokens),
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = Router::new()
        .route("/ws/chat/*channel", get(ws_handler))
        .with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), seen_tokens)
}

#[test]
fn endpoint_url_maps_http_to_ws_and_appends_token() {
    let transport =
        WebSocketTransport::new(Url::parse("http://example.com:8000").expect("base url"));
    let url = transport
        .endpoint_url(&Endpoint::Conversation(ConversationId::from("c1")), "tok")
        .expect("endpoint url");
    assert_eq!(url.as_str(), "ws://example.com:8000/ws/chat/c1/?token=tok");
}

#[test]
fn endpoint_url_addresses_the_notification_stream() {
    let transport = WebSocketTransport::new(Url::parse("https://example.com").expect("base url"));
    let url = transport
        .endpoint_url(&Endpoint::Notifications, "tok")
        .expect("endpoint url");
    assert_eq!(
        url.as_str(),
        "wss://example.com/ws/chat/notifications/?token=tok"
    );
}

#[test]
fn endpoint_url_rejects_unsupported_schemes() {
    let transport = WebSocketTransport::new(Url::parse("ftp://example.com").expect("base url"));
    let result = transport.endpoint_url(&Endpoint::Notifications, "tok");
    assert!(matches!(result, Err(TransportError::InvalidEndpoint(_))));
}

#[tokio::test]
async fn websocket_transport_exchanges_frames_end_to_end() {
    let (base_url, seen_tokens) = spawn_ws_server().await;
    let transport = WebSocketTransport::new(Url::parse(&base_url).expect("base url"));

    let mut channel = transport
        .connect(&Endpoint::Conversation(ConversationId::from("c1")), "tok-1")
        .await
        .expect("connect");

    let first = timeout(Duration::from_secs(5), channel.signals_in.recv())
        .await
        .expect("frame before timeout")
        .expect("channel open");
    match first {
        ChannelSignal::Frame(ServerFrame::Authenticated { user_id }) => {
            assert_eq!(user_id.as_ref().map(|u| u.as_str()), Some("me"));
        }
        other => panic!("unexpected signal: {other:?}"),
    }

    channel
        .frames_out
        .send(ClientFrame::Ping)
        .expect("send ping");

    let second = timeout(Duration::from_secs(5), channel.signals_in.recv())
        .await
        .expect("frame before timeout")
        .expect("channel open");
    assert!(matches!(
        second,
        ChannelSignal::Frame(ServerFrame::Pong)
    ));

    // The mystery frame is decoded away; the next signal is the closure.
    let last = timeout(Duration::from_secs(5), channel.signals_in.recv())
        .await
        .expect("signal before timeout")
        .expect("channel open");
    assert!(matches!(last, ChannelSignal::Closed { .. }));

    assert_eq!(seen_tokens.lock().await.clone(), vec!["tok-1".to_string()]);
}
