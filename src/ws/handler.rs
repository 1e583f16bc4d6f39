//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::http::routes::AppError;
use crate::session::{ClientId, JoinOptions, SessionHandle};
use crate::util::rate_limit::ClientRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Buffered outbound messages per connection before new ones are dropped
const OUTBOX_CAPACITY: usize = 256;

/// WebSocket upgrade handler for `/ws/{room}`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(room): Path<String>,
    Query(options): Query<JoinOptions>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let session = match room.as_str() {
        "matchmaking" => state.matchmaking.session.clone(),
        "battle" => state.battles.resolve(&options)?,
        other => return Err(AppError::NotFound(format!("Unknown room: {}", other))),
    };

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, session, options)))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, session: SessionHandle, options: JoinOptions) {
    let client_id = ClientId::new();
    info!(client_id = %client_id, session_id = %session.id, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();
    let (outbox_tx, outbox_rx) = mpsc::channel::<ServerMsg>(OUTBOX_CAPACITY);

    if let Err(e) = session.join(client_id, options, outbox_tx).await {
        warn!(client_id = %client_id, error = %e, "Join refused");
        let refusal = ServerMsg::Error {
            code: e.code().to_string(),
            message: e.to_string(),
        };
        let _ = send_msg(&mut ws_sink, &refusal).await;
        let _ = ws_sink.close().await;
        return;
    }

    let welcome = ServerMsg::Welcome {
        session_id: client_id,
        server_time: unix_millis(),
    };

    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(client_id = %client_id, error = %e, "Failed to send welcome");
        session.leave(client_id).await;
        return;
    }

    run_connection(client_id, &session, ws_sink, ws_stream, outbox_rx).await;

    // Cleanup on disconnect
    session.leave(client_id).await;

    info!(client_id = %client_id, "WebSocket connection closed");
}

/// Pump messages both ways until either side closes
async fn run_connection(
    client_id: ClientId,
    session: &SessionHandle,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    mut outbox_rx: mpsc::Receiver<ServerMsg>,
) {
    let rate_limiter = ClientRateLimiter::new();

    // Writer task: session outbox -> WebSocket
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = outbox_rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(client_id = %client_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    // Reader loop: WebSocket -> session
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(client_id = %client_id, "Rate limited input message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => {
                        if !session.send_message(client_id, msg).await {
                            debug!(client_id = %client_id, "Session closed");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(client_id = %client_id, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(client_id = %client_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(client_id = %client_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(client_id = %client_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
