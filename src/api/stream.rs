/// Live inbox over WebSocket
///
/// On connect the caller receives a `snapshot` frame with the latest page of
/// their inbox, newest first, followed by `created`, `read` and `deleted`
/// frames as their inbox changes. Browsers cannot set headers on WebSocket
/// requests, so the ID token may also be passed as `?token=`.
use crate::{
    auth::{extract_bearer_token, AuthContext},
    context::AppContext,
    error::{NotifyError, NotifyResult},
    inbox::InboxFrame,
};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
    routing::get,
    Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use tokio::{
    sync::broadcast::error::RecvError,
    time::{interval, timeout, Duration, Instant},
};
use tracing::{debug, warn};

const SEND_TIMEOUT_MS: u64 = 5000;
const PING_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub token: Option<String>,
}

/// Build stream routes
pub fn routes() -> Router<AppContext> {
    Router::new().route("/notifications/stream", get(subscribe_inbox))
}

/// WebSocket handler for the live inbox
pub async fn subscribe_inbox(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(params): Query<StreamParams>,
    State(ctx): State<AppContext>,
) -> NotifyResult<Response> {
    let token = extract_bearer_token(&headers)
        .or(params.token)
        .ok_or_else(|| NotifyError::Authentication("Unauthorized".to_string()))?;
    let auth = AuthContext::from_token(&ctx, &token).await?;

    Ok(ws.on_upgrade(move |socket| handle_subscription(socket, auth.user_id, ctx)))
}

async fn handle_subscription(socket: WebSocket, user_id: String, ctx: AppContext) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the snapshot so nothing written in between is missed
    let mut updates = ctx.inbox.subscribe();

    if send_snapshot(&mut sender, &ctx, &user_id).await.is_err() {
        return;
    }
    debug!("Inbox stream opened for {}", user_id);

    let mut ping_interval = interval(Duration::from_secs(PING_INTERVAL_SECS));
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            update = updates.recv() => {
                match update {
                    Ok(event) if event.user_id == user_id => {
                        match send_frame_with_timeout(&mut sender, &event.frame).await {
                            Ok(()) => last_activity = Instant::now(),
                            Err(SendError::Timeout) => {
                                warn!("Send timeout on inbox stream for {}", user_id);
                                break;
                            }
                            Err(SendError::Disconnected) => break,
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        // Missed frames; resynchronise with a fresh snapshot
                        warn!("Inbox stream for {} lagged by {} frames", user_id, skipped);
                        if send_snapshot(&mut sender, &ctx, &user_id).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            _ = ping_interval.tick() => {
                if last_activity.elapsed() >= Duration::from_secs(PING_INTERVAL_SECS)
                    && sender.send(Message::Ping(vec![])).await.is_err()
                {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Inbox stream closed by {}", user_id);
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_activity = Instant::now();
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error on inbox stream: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
}

async fn send_snapshot(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    ctx: &AppContext,
    user_id: &str,
) -> Result<(), SendError> {
    let notifications = match ctx
        .inbox
        .list_latest(user_id, ctx.config.dispatch.inbox_page_size)
        .await
    {
        Ok(list) => list,
        Err(e) => {
            warn!("Failed to load inbox snapshot for {}: {}", user_id, e);
            let _ = sender.send(Message::Close(None)).await;
            return Err(SendError::Disconnected);
        }
    };

    send_frame_with_timeout(sender, &InboxFrame::Snapshot { notifications }).await
}

#[derive(Debug)]
enum SendError {
    Timeout,
    Disconnected,
}

async fn send_frame_with_timeout(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    frame: &InboxFrame,
) -> Result<(), SendError> {
    let json = serde_json::to_string(frame).map_err(|_| SendError::Disconnected)?;

    match timeout(
        Duration::from_millis(SEND_TIMEOUT_MS),
        sender.send(Message::Text(json)),
    )
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(SendError::Disconnected),
        Err(_) => Err(SendError::Timeout),
    }
}
