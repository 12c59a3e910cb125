use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

use crate::relay::connection::{Connection, RelayState};

/// Close code sent when the handshake carries no session_id.
pub const CLOSE_MISSING_SESSION: u16 = 4001;

/// Accept loop: one task per connection, nothing shared but `state`.
pub async fn run_relay_server(
    bind_addr: &str,
    state: Arc<RelayState>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!("Location relay listening on {bind_addr}");

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.changed() => break,
        };

        match accepted {
            Ok((stream, addr)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, state).await {
                        warn!("connection from {addr} ended with error: {e}");
                    }
                });
            }
            Err(e) => {
                error!("failed to accept connection: {e}");
            }
        }
    }

    info!("Location relay stopped");
    Ok(())
}

async fn handle_connection(stream: TcpStream, state: Arc<RelayState>) -> anyhow::Result<()> {
    // Capture the request query during the websocket handshake.
    let mut query: Option<String> = None;
    let ws_stream = accept_hdr_async(stream, |req: &Request, response: Response| {
        query = req.uri().query().map(str::to_string);
        Ok(response)
    })
    .await?;

    let (mut ws_write, mut ws_read) = ws_stream.split();

    let session_id = query
        .as_deref()
        .and_then(|q| query_param(q, "session_id"))
        .filter(|s| !s.is_empty());

    let Some(session_id) = session_id else {
        ws_write
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::Library(CLOSE_MISSING_SESSION),
                reason: "session_id is required".into(),
            })))
            .await
            .ok();
        return Ok(());
    };

    // The writer task owns the sink; handlers and group broadcasts all go
    // through the channel, which keeps per-connection writes ordered.
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_write.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut conn = Connection::connect(state, session_id, tx.clone()).await?;

    while let Some(msg) = ws_read.next().await {
        match msg {
            Ok(Message::Text(text)) => conn.handle_raw(&text).await,
            Ok(Message::Ping(payload)) => {
                let _ = tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(session_id = %conn.session_id(), "websocket read error: {e}");
                break;
            }
        }
    }

    conn.disconnect().await;
    // Both sender handles must go before the writer task can finish.
    drop(conn);
    drop(tx);
    writer.await.ok();
    Ok(())
}

/// Minimal query-string lookup; values are not percent-decoded since session
/// ids are plain tokens.
fn query_param(query: &str, name: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_session_id_from_query() {
        assert_eq!(
            query_param("session_id=abc123", "session_id").as_deref(),
            Some("abc123")
        );
        assert_eq!(
            query_param("foo=1&session_id=s-9&bar=2", "session_id").as_deref(),
            Some("s-9")
        );
    }

    #[test]
    fn missing_or_empty_session_id_is_none() {
        assert_eq!(query_param("foo=1", "session_id"), None);
        assert_eq!(query_param("", "session_id"), None);
        // Empty values are filtered by the caller.
        assert_eq!(query_param("session_id=", "session_id").as_deref(), Some(""));
    }
}
