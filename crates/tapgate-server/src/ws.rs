//! WebSocket stream of live notifications.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::notifier::Notification;
use crate::routes::AppState;

/// `GET /ws`
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let rx = state.gate.notifier().subscribe();
    let observers = state.gate.notifier().observer_count();
    ws.on_upgrade(move |socket| stream_notifications(socket, rx, observers))
}

/// Forward notifications as JSON text frames until either side goes away.
async fn stream_notifications(
    mut socket: WebSocket,
    mut rx: broadcast::Receiver<Notification>,
    observers: usize,
) {
    info!(observers, "Observer connected");

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(notification) => {
                    let text = match serde_json::to_string(&notification) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, "Failed to encode notification");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Observer lagged, notifications skipped");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(other)) => debug!(?other, "Ignoring observer message"),
            },
        }
    }

    info!("Observer disconnected");
}
