//! # Upstream Connection
//!
//! One tokio task per relayed client. The task owns the WebSocket to the
//! realtime speech service and talks to its relay actor through two one-way
//! links:
//! - **Client → Upstream**: an `mpsc` channel of raw text messages
//! - **Upstream → Client**: [`UpstreamEvent`] actor messages
//!
//! ## Lifecycle:
//! 1. Connect with `Authorization: Bearer <key>` and `OpenAI-Beta: realtime=v1`
//! 2. Send one `session.update` built from configuration
//! 3. Report [`UpstreamEvent::Opened`]; the relay starts forwarding
//! 4. Pump messages both ways until either side closes
//!
//! When the channel from the relay closes (client went away) the upstream
//! socket is closed. When the upstream closes or fails, the relay receives
//! [`UpstreamEvent::Closed`] and closes the client socket.

use crate::config::UpstreamConfig;
use crate::protocol::{peek_type, ClientEvent, SessionConfig};
use actix::prelude::*;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Capacity of the client → upstream channel.
pub const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// Notifications from the upstream task to its relay actor.
#[derive(Message, Debug, Clone, PartialEq)]
#[rtype(result = "()")]
pub enum UpstreamEvent {
    /// Connected and configured; client messages may now be forwarded.
    Opened,
    /// A text message from the service, to be forwarded verbatim.
    Text(String),
    /// The upstream connection ended, with a reason when one is known.
    Closed(Option<String>),
}

type UpstreamStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(
    upstream: &UpstreamConfig,
    api_key: &str,
) -> Result<UpstreamStream, tokio_tungstenite::tungstenite::Error> {
    let mut request = upstream.ws_url().into_client_request()?;
    let headers = request.headers_mut();

    let auth = HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|e| {
        tokio_tungstenite::tungstenite::Error::HttpFormat(e.into())
    })?;
    headers.insert("Authorization", auth);
    headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

    let (stream, _response) = connect_async(request).await?;
    Ok(stream)
}

/// Log the upstream events worth seeing at `info`/`error` level.
fn log_upstream_event(relay_id: &Uuid, event_type: &str, text: &str) {
    match event_type {
        "session.created" => info!(relay = %relay_id, "Session created: {}", text),
        "session.updated" => info!(relay = %relay_id, "Session updated: {}", text),
        "conversation.created" => info!(relay = %relay_id, "Conversation created: {}", text),
        "error" => error!(relay = %relay_id, "OpenAI error: {}", text),
        other => debug!(relay = %relay_id, event_type = other, "Upstream message"),
    }
}

/// Run one upstream connection to completion.
pub async fn run_upstream(
    upstream: UpstreamConfig,
    api_key: String,
    mut outbound: mpsc::Receiver<String>,
    relay: Recipient<UpstreamEvent>,
    relay_id: Uuid,
) {
    let socket = match connect(&upstream, &api_key).await {
        Ok(socket) => socket,
        Err(e) => {
            error!(relay = %relay_id, "Failed to connect to OpenAI: {}", e);
            relay.do_send(UpstreamEvent::Closed(Some(format!(
                "upstream connection failed: {}",
                e
            ))));
            return;
        }
    };
    info!(relay = %relay_id, "Connected to OpenAI");

    let (mut sink, mut stream) = socket.split();

    let session_update = ClientEvent::SessionUpdate {
        session: SessionConfig::from_upstream(&upstream),
    };
    match serde_json::to_string(&session_update) {
        Ok(text) => {
            if let Err(e) = sink.send(Message::Text(text)).await {
                error!(relay = %relay_id, "Failed to send session.update: {}", e);
                relay.do_send(UpstreamEvent::Closed(Some(e.to_string())));
                return;
            }
        }
        Err(e) => error!(relay = %relay_id, "Failed to serialize session.update: {}", e),
    }
    relay.do_send(UpstreamEvent::Opened);

    let reason = loop {
        tokio::select! {
            message = outbound.recv() => match message {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        warn!(relay = %relay_id, "Failed to forward to OpenAI: {}", e);
                        break Some(e.to_string());
                    }
                }
                None => {
                    debug!(relay = %relay_id, "Client side closed, closing upstream");
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => match peek_type(&text) {
                    Some(event_type) => {
                        log_upstream_event(&relay_id, &event_type, &text);
                        relay.do_send(UpstreamEvent::Text(text));
                    }
                    None => warn!(relay = %relay_id, "Dropping unparseable upstream message"),
                },
                Some(Ok(Message::Close(frame))) => {
                    info!(relay = %relay_id, "Disconnected from OpenAI: {:?}", frame);
                    break frame.map(|f| f.reason.to_string());
                }
                Some(Ok(Message::Binary(data))) => {
                    debug!(relay = %relay_id, "Ignoring {} byte binary upstream frame", data.len());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(relay = %relay_id, "OpenAI WebSocket error: {}", e);
                    break Some(e.to_string());
                }
                None => break None,
            },
        }
    };

    relay.do_send(UpstreamEvent::Closed(reason));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio_tungstenite::accept_hdr_async;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    struct Collector {
        events: Arc<Mutex<Vec<UpstreamEvent>>>,
        closed: Option<oneshot::Sender<()>>,
    }

    impl Actor for Collector {
        type Context = Context<Self>;
    }

    impl Handler<UpstreamEvent> for Collector {
        type Result = ();

        fn handle(&mut self, msg: UpstreamEvent, _ctx: &mut Self::Context) {
            let is_closed = matches!(msg, UpstreamEvent::Closed(_));
            self.events.lock().unwrap().push(msg);
            if is_closed {
                if let Some(tx) = self.closed.take() {
                    let _ = tx.send(());
                }
            }
        }
    }

    #[actix_web::test]
    async fn test_configures_session_and_relays_both_ways() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen_headers = Arc::new(Mutex::new(Vec::new()));
        let headers_for_server = seen_headers.clone();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                let mut seen = headers_for_server.lock().unwrap();
                for name in ["authorization", "openai-beta"] {
                    if let Some(value) = req.headers().get(name) {
                        seen.push(value.to_str().unwrap().to_string());
                    }
                }
                Ok(resp)
            };
            let ws = accept_hdr_async(tcp, callback).await.unwrap();
            let (mut sink, mut stream) = ws.split();

            let first = stream.next().await.unwrap().unwrap().into_text().unwrap();
            sink.send(Message::Text(r#"{"type":"session.created"}"#.to_string()))
                .await
                .unwrap();
            let forwarded = stream.next().await.unwrap().unwrap().into_text().unwrap();
            sink.send(Message::Close(None)).await.unwrap();
            (first, forwarded)
        });

        let events = Arc::new(Mutex::new(Vec::new()));
        let (closed_tx, closed_rx) = oneshot::channel();
        let collector = Collector {
            events: events.clone(),
            closed: Some(closed_tx),
        }
        .start();

        let mut upstream = crate::config::AppConfig::default().upstream;
        upstream.url = format!("ws://{}/v1/realtime", addr);

        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(run_upstream(
            upstream,
            "sk-test".to_string(),
            rx,
            collector.recipient(),
            Uuid::new_v4(),
        ));

        let append = r#"{"type":"input_audio_buffer.append","audio":"AAAA"}"#;
        tx.send(append.to_string()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), closed_rx)
            .await
            .unwrap()
            .unwrap();
        let (first, forwarded) = server.await.unwrap();

        assert_eq!(peek_type(&first).as_deref(), Some("session.update"));
        assert_eq!(forwarded, append);
        assert_eq!(
            *seen_headers.lock().unwrap(),
            vec!["Bearer sk-test".to_string(), "realtime=v1".to_string()]
        );
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                UpstreamEvent::Opened,
                UpstreamEvent::Text(r#"{"type":"session.created"}"#.to_string()),
                UpstreamEvent::Closed(None),
            ]
        );
    }

    #[actix_web::test]
    async fn test_connection_failure_reports_closed() {
        // Bind then drop to get a port nothing listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let events = Arc::new(Mutex::new(Vec::new()));
        let (closed_tx, closed_rx) = oneshot::channel();
        let collector = Collector {
            events: events.clone(),
            closed: Some(closed_tx),
        }
        .start();

        let mut upstream = crate::config::AppConfig::default().upstream;
        upstream.url = format!("ws://127.0.0.1:{}/v1/realtime", port);
        let (_tx, rx) = mpsc::channel(1);
        tokio::spawn(run_upstream(
            upstream,
            "sk-test".to_string(),
            rx,
            collector.recipient(),
            Uuid::new_v4(),
        ));

        tokio::time::timeout(Duration::from_secs(5), closed_rx)
            .await
            .unwrap()
            .unwrap();
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], UpstreamEvent::Closed(Some(reason)) if reason.contains("upstream connection failed")));
    }
}
