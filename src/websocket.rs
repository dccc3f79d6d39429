//! # WebSocket Relay Handler
//!
//! Clients connect to `/ws`; every accepted connection is paired with one
//! upstream connection to the realtime speech service and every text message
//! is forwarded verbatim between the two.
//!
//! ## Relay Protocol:
//! 1. **Upgrade**: the `Origin` header must be on the allow list, otherwise 403
//! 2. **Credential**: without an API key the client receives an `error`
//!    message and the socket is closed
//! 3. **Pairing**: the upstream task starts immediately; client messages
//!    arriving before it reports open are dropped
//! 4. **Forwarding**: text messages both ways, unmodified and in order; the
//!    `type` field is read for logging only
//! 5. **Teardown**: closing either side closes the other
//!
//! ## Actor Model:
//! The relay is an actix actor. It owns the sending half of the channel to
//! the upstream task; dropping it when the actor stops is what tells the
//! upstream task to close.

use crate::error::AppError;
use crate::protocol::{peek_type, relay_error_message};
use crate::state::{AppState, Direction};
use crate::upstream::{run_upstream, UpstreamEvent, OUTBOUND_CHANNEL_CAPACITY};

use actix::prelude::*;
use actix_web::{http::header, web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// One client connection and its link to the upstream task.
pub struct RelaySocket {
    id: Uuid,
    state: web::Data<AppState>,
    upstream_tx: Option<mpsc::Sender<String>>,
    upstream_open: bool,
    last_heartbeat: Instant,
}

impl RelaySocket {
    pub fn new(state: web::Data<AppState>) -> Self {
        Self {
            id: Uuid::new_v4(),
            state,
            upstream_tx: None,
            upstream_open: false,
            last_heartbeat: Instant::now(),
        }
    }

    /// Tell the client why the relay cannot work, then close.
    fn fail(&self, ctx: &mut ws::WebsocketContext<Self>, message: &str) {
        ctx.text(relay_error_message(message));
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Error,
            description: Some(close_description(message.to_string())),
        }));
        ctx.stop();
    }

    /// Forward one client message to the upstream task.
    fn forward_to_upstream(&mut self, text: String) {
        let event_type = match peek_type(&text) {
            Some(event_type) => event_type,
            None => {
                warn!(relay = %self.id, "Dropping unparseable client message");
                return;
            }
        };

        let tx = match (&self.upstream_tx, self.upstream_open) {
            (Some(tx), true) => tx,
            _ => {
                debug!(relay = %self.id, event_type = %event_type, "Upstream not open, dropping client message");
                self.state.message_dropped();
                return;
            }
        };

        match tx.try_send(text) {
            Ok(()) => {
                debug!(relay = %self.id, event_type = %event_type, "Client message forwarded");
                self.state.message_forwarded(Direction::ClientToUpstream);
            }
            Err(TrySendError::Full(_)) => {
                warn!(relay = %self.id, event_type = %event_type, "Upstream backlog full, dropping client message");
                self.state.message_dropped();
            }
            Err(TrySendError::Closed(_)) => {
                debug!(relay = %self.id, "Upstream task gone, dropping client message");
                self.upstream_open = false;
                self.state.message_dropped();
            }
        }
    }
}

impl Actor for RelaySocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(relay = %self.id, "Client connected");
        self.state.relay_opened();

        let upstream = self.state.config().upstream.clone();
        let api_key = match upstream.api_key.clone() {
            Some(key) => key,
            None => {
                error!(relay = %self.id, "OpenAI API key not found");
                self.fail(ctx, "OpenAI API key not found");
                return;
            }
        };

        let (tx, rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        self.upstream_tx = Some(tx);
        tokio::spawn(run_upstream(
            upstream,
            api_key,
            rx,
            ctx.address().recipient(),
            self.id,
        ));

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(relay = %act.id, "Client heartbeat timeout, closing relay");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        // Dropping the sender closes the upstream socket.
        self.upstream_tx = None;
        self.upstream_open = false;
        self.state.relay_closed();
        info!(relay = %self.id, "Client disconnected");
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RelaySocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.forward_to_upstream(text.to_string());
            }
            Ok(ws::Message::Binary(data)) => {
                debug!(relay = %self.id, "Ignoring {} byte binary client frame", data.len());
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(relay = %self.id, "Client closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(relay = %self.id, "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(relay = %self.id, "WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

impl Handler<UpstreamEvent> for RelaySocket {
    type Result = ();

    fn handle(&mut self, msg: UpstreamEvent, ctx: &mut Self::Context) {
        match msg {
            UpstreamEvent::Opened => {
                self.upstream_open = true;
            }
            UpstreamEvent::Text(text) => {
                ctx.text(text);
                self.state.message_forwarded(Direction::UpstreamToClient);
            }
            UpstreamEvent::Closed(reason) => {
                self.upstream_open = false;
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Normal,
                    description: reason.map(close_description),
                }));
                ctx.stop();
            }
        }
    }
}

/// Close frames carry at most 125 payload bytes, two of them the code.
const MAX_CLOSE_DESCRIPTION: usize = 123;

/// Trim a close reason to fit a close frame, on a char boundary.
fn close_description(mut reason: String) -> String {
    if reason.len() > MAX_CLOSE_DESCRIPTION {
        let mut end = MAX_CLOSE_DESCRIPTION;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    reason
}

/// WebSocket endpoint handler.
///
/// Rejects the upgrade with 403 unless the `Origin` header exactly matches
/// an allowed origin. A missing header is rejected too.
pub async fn relay_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if !state.config().cors.is_allowed(origin) {
        warn!("Rejected WebSocket upgrade from origin {:?}", origin);
        state.upgrade_rejected();
        return Err(AppError::Forbidden(format!("origin {:?} is not allowed", origin)).into());
    }

    info!(
        "New WebSocket connection from {:?} (origin {})",
        req.connection_info().peer_addr(),
        origin
    );
    ws::start(RelaySocket::new(state), &req, stream)
}
