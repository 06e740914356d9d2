use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use parley_types::SyncError;
use parley_types::events::{ClientIntent, IntentRef, ServerEvent};

use crate::dispatcher::{Dispatcher, Session};

/// Handle one WebSocket connection from upgrade to close.
///
/// `token` is the credential passed at upgrade time, if any. Without it the
/// first frame the client sends must be `session:identify`.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, token: Option<String>) {
    let (mut sender, mut receiver) = socket.split();

    let token = match token {
        Some(token) => Some(token),
        None => wait_for_identify(&mut receiver, dispatcher.config().auth_timeout).await,
    };
    let Some(token) = token else {
        warn!("WebSocket client failed to identify, closing");
        let err = SyncError::Auth("identify timed out".into());
        let _ = send_event(&mut sender, &ServerEvent::error(&err, Some(IntentRef::Identify))).await;
        let _ = sender.send(Message::Close(None)).await;
        return;
    };

    let (session, events) = match dispatcher.connect(&token).await {
        Ok(bound) => bound,
        Err(err) => {
            warn!("WebSocket connect rejected: {}", err);
            let _ = send_event(&mut sender, &ServerEvent::error(&err, Some(IntentRef::Identify))).await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    info!("{} ({}) connected, session {}", session.username, session.user_id, session.id);
    run_connection_loop(sender, receiver, dispatcher.clone(), session.clone(), events).await;

    dispatcher.disconnect(&session).await;
    info!("{} ({}) disconnected, session {}", session.username, session.user_id, session.id);
}

/// Wait for `session:identify` and return its token. Other frames are ignored.
async fn wait_for_identify(receiver: &mut SplitStream<WebSocket>, limit: Duration) -> Option<String> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if let Ok(ClientIntent::Identify { token }) = serde_json::from_str::<ClientIntent>(&text) {
                        return Some(token);
                    }
                }
                Message::Close(_) => return None,
                _ => {}
            }
        }
        None
    };

    tokio::time::timeout(limit, identify).await.ok().flatten()
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    session: Session,
    mut events: mpsc::UnboundedReceiver<ServerEvent>,
) {
    let heartbeat_interval = dispatcher.config().heartbeat_interval;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Queue -> socket, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Socket -> dispatcher, one intent at a time
    let recv_dispatcher = dispatcher.clone();
    let recv_session = session.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientIntent>(&text) {
                    Ok(intent) => recv_dispatcher.handle_intent(&recv_session, intent).await,
                    Err(e) => {
                        warn!(
                            "{} ({}) bad intent: {} -- raw: {}",
                            recv_session.username,
                            recv_session.user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                        let err = SyncError::validation(format!("malformed intent: {}", e));
                        recv_dispatcher
                            .send_to_session(recv_session.id, ServerEvent::error(&err, None))
                            .await;
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &ServerEvent) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(e) => {
            warn!("Failed to serialize event: {}", e);
            Ok(())
        }
    }
}
