//! WebSocket connection handling
//!
//! One accepted TCP stream passes through: upgrade (origin + path checks in
//! the handshake callback, bearer token from the query), authentication,
//! registration in the connection registry, and then the read loop.
//!
//! # Task Model
//!
//! Each connection runs two tasks:
//! - **Writer**: drains the connection mailbox into the WebSocket sink. It
//!   is the only place the sink is touched, which serializes all outbound
//!   frames.
//! - **Reader**: the read loop below, also watching the close signal so the
//!   heartbeat sweep can stop a silent connection that will never produce
//!   another readable byte.
//!
//! # Protocol Errors
//!
//! Malformed envelopes and verbs a client must not send get a `?er` notice
//! with `BAD_FRAME`; the connection stays up. Only transport errors, close
//! frames, policy violations at upgrade, and the sweep end a connection.

use crate::acl::RuleAction;
use crate::registry::{ConnectionHandle, SessionId};
use crate::SharedState;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::{accept_hdr_async_with_config, tungstenite::Message};
use wsbus_core::{
    codec, create_reply_topic, Action, ActionFrame, CreateReply, Error, ErrorCode, Frame, Notice,
    Result, TopicFrame, TopicPattern,
};

/// Extract one query parameter from a raw query string
///
/// Token values are expected to be URL-safe; no percent-decoding is applied.
fn query_param(query: &str, key: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then(|| v.to_string())
    })
}

fn reject(status: StatusCode, body: &str) -> ErrorResponse {
    let mut resp = ErrorResponse::new(Some(body.to_string()));
    *resp.status_mut() = status;
    resp
}

/// Handle one accepted TCP stream for its whole life
#[tracing::instrument(skip(stream, state), fields(session_id = session_id))]
pub(crate) async fn handle_connection(
    stream: TcpStream,
    session_id: SessionId,
    state: Arc<SharedState>,
) -> Result<()> {
    let mut token: Option<String> = None;

    let config = &state.config;
    let callback = |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
        if req.uri().path() != config.path.as_str() {
            return Err(reject(StatusCode::NOT_FOUND, "not found"));
        }

        if !config.allow_origins.is_empty() {
            let origin = req
                .headers()
                .get("Origin")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            if !config.allow_origins.iter().any(|allowed| allowed == origin) {
                tracing::warn!(origin, "origin not in allow-list, rejecting upgrade");
                return Err(reject(StatusCode::FORBIDDEN, "origin not allowed"));
            }
        }

        token = query_param(req.uri().query().unwrap_or(""), "token");
        Ok(resp)
    };

    let mut ws_config = WebSocketConfig::default();
    if let Some(size) = config.write_buffer_size {
        ws_config.write_buffer_size = size;
    }

    let mut ws_stream = accept_hdr_async_with_config(stream, callback, Some(ws_config))
        .await
        .map_err(|e| Error::WebSocket(e.to_string()))?;

    // Authenticate before the connection exists anywhere. A bad token gets a
    // policy-violation close, not a registry entry.
    let token = token.unwrap_or_default();
    let user_id = match state.authenticator.authenticate(&token).await {
        Ok(user_id) => user_id,
        Err(e) => {
            tracing::warn!(error = %e, "authentication failed, closing");
            let _ = ws_stream
                .close(Some(CloseFrame {
                    code: CloseCode::Policy,
                    reason: "invalid token".into(),
                }))
                .await;
            return Ok(());
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let handle = Arc::new(ConnectionHandle::new(session_id, user_id.clone(), tx));
    let close_signal = handle.close_signal();

    state.registry.insert(Arc::clone(&handle)).await;
    tracing::info!(user_id = %user_id, "connection authenticated");

    // The first queued frame: the client leaves Connecting on this.
    let connected = ActionFrame::with_data(
        Action::Connected,
        "",
        json!({ "sessionId": session_id.to_string() }),
    );
    let _ = handle.send_frame(&connected);

    let mut writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let is_close = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                break;
            }
            if is_close {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    loop {
        tokio::select! {
            message = ws_receiver.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        handle_text(&text, &handle, &state).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!("connection closed by peer");
                        break;
                    }
                    Some(Ok(_)) => {} // binary/ping/pong frames at the WS layer
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "read error");
                        break;
                    }
                }
            }
            _ = close_signal.notified() => {
                tracing::debug!("close requested");
                break;
            }
            _ = &mut writer => {
                tracing::debug!("writer gone");
                break;
            }
        }
    }

    // Atomic un-registration from all indexes, then channel teardown.
    state.registry.remove(session_id).await;
    state.channels.close_for_session(session_id).await;

    // Let the writer flush whatever is still queued (including a close
    // frame from the sweep) before the socket drops.
    drop(handle);
    if !writer.is_finished() {
        let _ = tokio::time::timeout(std::time::Duration::from_secs(1), &mut writer).await;
    }
    writer.abort();

    tracing::info!("connection cleaned up");
    Ok(())
}

/// Decode and dispatch one text envelope from the client
async fn handle_text(text: &str, handle: &Arc<ConnectionHandle>, state: &Arc<SharedState>) {
    let frame = match codec::decode(text) {
        Ok(Frame::Action(frame)) => frame,
        Ok(Frame::Topic(_)) => {
            let _ = handle.send_error(&Notice::new(
                ErrorCode::BadFrame,
                "topic frames are server-to-client",
            ));
            return;
        }
        Err(e) => {
            let _ = handle.send_error(&Notice::new(ErrorCode::BadFrame, e.to_string()));
            return;
        }
    };

    handle_action(frame, handle, state).await;
}

async fn handle_action(frame: ActionFrame, handle: &Arc<ConnectionHandle>, state: &Arc<SharedState>) {
    match frame.action {
        Action::Ping => {
            state.registry.touch(handle.id).await;
            let _ = handle.send_frame(&ActionFrame::new(Action::Pong, ""));
        }

        Action::Subscribe => match TopicPattern::parse(&frame.topic) {
            // No authorization at subscribe time; enforcement happens on
            // delivery via the msg check.
            Ok(_) => {
                state.registry.subscribe(handle.id, frame.topic).await;
            }
            Err(e) => {
                let _ = handle.send_error(&Notice::new(ErrorCode::InvalidTopic, e.to_string()));
            }
        },

        Action::Unsubscribe => {
            state.registry.unsubscribe(handle.id, &frame.topic).await;
        }

        Action::Msg => handle_msg(frame, handle, state).await,

        Action::ChannelStart => handle_channel_start(frame, handle, state).await,

        Action::Channel => {
            let data = frame.data.unwrap_or(serde_json::Value::Null);
            if state
                .channels
                .route_payload(&frame.topic, handle.id, data)
                .await
                .is_err()
            {
                let _ = handle.send_error(&Notice::new(ErrorCode::NoSuchChannel, frame.topic));
            }
        }

        Action::ChannelClose => {
            let closed = state
                .channels
                .close(
                    &frame.topic,
                    Some(handle.id),
                    Notice::new(ErrorCode::PeerClosed, ""),
                    false,
                )
                .await;
            if closed.is_err() {
                let _ = handle.send_error(&Notice::new(ErrorCode::NoSuchChannel, frame.topic));
            }
        }

        // Server-to-client verbs coming from a client are protocol errors.
        Action::Pong | Action::Connected => {
            let _ = handle.send_error(&Notice::new(
                ErrorCode::BadFrame,
                format!("unexpected action {}", frame.action),
            ));
        }
    }
}

async fn handle_msg(frame: ActionFrame, handle: &Arc<ConnectionHandle>, state: &Arc<SharedState>) {
    let topic = frame.topic;
    if let Err(e) = TopicPattern::parse(&topic) {
        let _ = handle.send_error(&Notice::new(ErrorCode::InvalidTopic, e.to_string()));
        return;
    }

    if let Some(acl) = &state.authz {
        match acl.check(&topic, &handle.user_id, RuleAction::Msg).await {
            Ok((true, _)) => {}
            Ok((false, _)) => {
                let _ = handle.send_error(&Notice::new(
                    ErrorCode::Forbidden,
                    format!("msg on {topic}"),
                ));
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, topic = %topic, "authorization check failed");
                let _ = handle.send_error(&Notice::new(
                    ErrorCode::Forbidden,
                    "authorization unavailable",
                ));
                return;
            }
        }
    }

    let data = frame.data.unwrap_or(serde_json::Value::Null);
    let delivered = state
        .registry
        .fan_out(TopicFrame::new(&topic, data).from_user(&handle.user_id), None)
        .await;
    tracing::trace!(topic = %topic, delivered, "client publish fanned out");
}

async fn handle_channel_start(
    frame: ActionFrame,
    handle: &Arc<ConnectionHandle>,
    state: &Arc<SharedState>,
) {
    let topic = frame.topic;
    let reply_topic = create_reply_topic(&topic);

    let refuse = |notice: Notice| {
        let reply = CreateReply::refused(notice);
        if let Ok(data) = serde_json::to_value(&reply) {
            let _ = handle.send_frame(&TopicFrame::new(&reply_topic, data));
        }
    };

    if let Some(acl) = &state.authz {
        match acl
            .check(&topic, &handle.user_id, RuleAction::ChannelStart)
            .await
        {
            Ok((true, _)) => {}
            Ok((false, _)) => {
                refuse(Notice::new(
                    ErrorCode::Forbidden,
                    format!("channel_start on {topic}"),
                ));
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, topic = %topic, "authorization check failed");
                refuse(Notice::new(ErrorCode::Forbidden, "authorization unavailable"));
                return;
            }
        }
    }

    let acceptor = match &state.acceptor {
        Some(acceptor) => acceptor,
        None => {
            refuse(Notice::new(ErrorCode::Forbidden, "channels not enabled"));
            return;
        }
    };

    let hook = match acceptor.accept(&handle.user_id, &topic).await {
        Some(hook) => hook,
        None => {
            refuse(Notice::new(ErrorCode::Forbidden, "channel refused"));
            return;
        }
    };

    let id = state
        .channels
        .open(handle.id, &topic, Arc::clone(handle), Arc::clone(&hook))
        .await;

    // The .cre reply goes on the mailbox before the hook can send anything,
    // so the peer always learns the id before the first channel frame.
    let reply = CreateReply::ok(&id);
    if let Ok(data) = serde_json::to_value(&reply) {
        let _ = handle.send_frame(&TopicFrame::new(&reply_topic, data));
    }

    if let Some(channel) = state.channels.handle(&id).await {
        tokio::spawn(async move {
            hook.on_open(channel).await;
        });
    }
}
