//! WebSocket push endpoint.
//!
//! Each socket becomes a [`PushConnection`] bound to the session named in the
//! query string. Frames queued on the connection are written out as JSON
//! text messages until either side goes away.

use crate::handler::error_response;
use crate::protocol::READY_TAG;
use crate::server::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use sessionrpc_core::{PushChannel, PushConnection, PushFrame, RpcError, TransportConfig, WireBlob};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
pub struct PushParams {
    session: String,
}

/// `GET /push?session=<id>`.
pub async fn handle_push(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PushParams>,
) -> Response {
    let session_id = params.session;
    let bridge = state.dispatcher.bridge();

    match bridge.store().get(&session_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return error_response(RpcError::SessionMissing { session_id }),
        Err(e) => return error_response(e),
    }

    if bridge.connections().connection_count().await >= TransportConfig::MAX_PUSH_CONNECTIONS {
        warn!(session_id = %session_id, "Push connection limit reached");
        return error_response(RpcError::Transport {
            message: "too many push connections".to_string(),
        });
    }

    ws.max_message_size(TransportConfig::MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| run_connection(socket, state, session_id))
}

async fn run_connection(socket: WebSocket, state: Arc<AppState>, session_id: String) {
    let bridge = state.dispatcher.bridge();
    let (connection, frames) =
        PushConnection::open(session_id.clone(), TransportConfig::PUSH_CHANNEL_CAPACITY);
    let connection_id = connection.id().to_string();

    if let Err(e) = bridge.connect(&session_id, connection).await {
        warn!(session_id = %session_id, "Failed to bind push connection: {}", e);
        return;
    }

    // Frames pushed from here on wait in the queue until the ready frame is out.
    let ready = PushFrame {
        tag: READY_TAG.to_string(),
        payload: WireBlob::new(connection_id.clone()),
    };
    let (mut sink, mut stream) = socket.split();
    if let Err(e) = send_frame(&mut sink, &ready).await {
        debug!(conn_id = %connection_id, "Push client left before ready: {}", e);
        release(&state, &connection_id).await;
        return;
    }

    let writer = write_frames(&mut sink, frames);
    let reader = async {
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    };

    tokio::select! {
        _ = writer => {}
        _ = reader => {}
    }

    release(&state, &connection_id).await;
}

async fn release(state: &AppState, connection_id: &str) {
    if let Err(e) = state.dispatcher.bridge().disconnect(connection_id).await {
        warn!(conn_id = %connection_id, "Failed to release push connection: {}", e);
    }
}

async fn write_frames<S>(sink: &mut S, mut frames: mpsc::Receiver<PushFrame>)
where
    S: futures::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(frame) = frames.recv().await {
        if let Err(e) = send_frame(sink, &frame).await {
            debug!("Push write failed: {}", e);
            break;
        }
    }
}

async fn send_frame<S>(sink: &mut S, frame: &PushFrame) -> Result<(), String>
where
    S: futures::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = serde_json::to_string(frame).map_err(|e| e.to_string())?;
    sink.send(Message::Text(text)).await.map_err(|e| e.to_string())
}
