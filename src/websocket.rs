//! # WebSocket Ingest Handlers
//!
//! Handles streaming audio ingest from embedded devices. Devices connect to
//! `/ws` (or `/ws/{hwid}`), send one 32-byte handshake and then binary audio
//! frames; `/ws/echo` reflects messages back and is used by device bring-up
//! tooling.
//!
//! ## Protocol:
//! 1. **Connection**: plain WebSocket upgrade; non-upgrade requests get 400
//! 2. **Handshake**: first binary message fixes the stream parameters
//! 3. **Frames**: every further binary message is a PCM or ADPCM frame
//! 4. **Close**: client close is answered with 1000 "bye"; protocol errors
//!    close with 1008 and a reason phrase, non-binary messages with 1003
//!
//! ## Actor Model:
//! Each connection is an independent Actix actor. Messages are handled
//! synchronously in arrival order, which is what guarantees the on-disk
//! frame ordering; the only asynchronous work a session triggers is the
//! detached upload of closed segments. Fragmented messages are reassembled
//! before they reach the session, so the state machine only ever sees
//! complete logical messages.

use crate::ingest::assembler::{MessageAssembler, MessageKind};
use crate::ingest::clock::SystemClock;
use crate::ingest::frame::FrameError;
use crate::ingest::session::{IngestSession, SessionDeps, SessionError};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use actix_web_actors::ws::{CloseCode, CloseReason};
use actix_http::ws::Item;
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How often the server pings an idle connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long without any client traffic before the connection is dropped.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Map a session-fatal error to the close frame the client receives.
fn close_disposition(err: &SessionError) -> (CloseCode, String) {
    match err {
        SessionError::Protocol(frame_err) => (CloseCode::Policy, frame_err.to_string()),
        SessionError::Io(_) => (CloseCode::Error, "internal error".to_string()),
    }
}

/// WebSocket actor for one ingest connection.
pub struct IngestWebSocket {
    state: AppState,
    conn_id: Uuid,
    session: IngestSession,
    assembler: MessageAssembler,
    last_heartbeat: Instant,
}

impl IngestWebSocket {
    pub fn new(state: AppState, hwid: Option<String>) -> Self {
        let deps = SessionDeps {
            clock: Arc::new(SystemClock),
            uploader: Arc::clone(&state.uploader),
            storage: state.config.storage.clone(),
            data_dir: state.config.ingest.data_dir.clone(),
            segment_len: Duration::from_secs(state.config.ingest.segment_seconds),
        };
        let session = IngestSession::new(deps, hwid.as_deref());

        Self {
            state,
            conn_id: Uuid::new_v4(),
            session,
            assembler: MessageAssembler::new(),
            last_heartbeat: Instant::now(),
        }
    }

    /// Send a close frame and stop the actor; teardown runs in `stopped`.
    fn close_with(&self, ctx: &mut ws::WebsocketContext<Self>, code: CloseCode, reason: &str) {
        ctx.close(Some(CloseReason { code, description: Some(reason.to_string()) }));
        ctx.stop();
    }

    /// Feed one complete logical message to the session.
    fn deliver(&mut self, kind: MessageKind, payload: &[u8], ctx: &mut ws::WebsocketContext<Self>) {
        match kind {
            MessageKind::Text => {
                warn!("connection {}: text message on ingest endpoint", self.conn_id);
                self.close_with(ctx, CloseCode::Unsupported, "binary required");
            }
            MessageKind::Binary => {
                if let Err(err) = self.session.on_binary(payload) {
                    match &err {
                        SessionError::Protocol(_) => {
                            warn!("connection {}: {}", self.conn_id, err)
                        }
                        SessionError::Io(_) => error!("connection {}: {}", self.conn_id, err),
                    }
                    let (code, reason) = close_disposition(&err);
                    self.close_with(ctx, code, &reason);
                }
            }
        }
    }
}

impl Actor for IngestWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(
            "ingest connection {} started (hwid={})",
            self.conn_id,
            self.session.hwid().unwrap_or("-")
        );
        self.state.session_started();

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("connection {}: heartbeat timeout, dropping", act.conn_id);
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    /// Runs on every termination path — client close, protocol error,
    /// transport failure, heartbeat timeout. The session teardown closes the
    /// open segment and dispatches detached uploads, so a cancelled
    /// connection still gets its final upload attempt.
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.session.finish();
        self.state
            .session_finished(self.session.total_frames(), self.session.total_bytes());
        debug!("ingest connection {} stopped", self.conn_id);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for IngestWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => {
                self.deliver(MessageKind::Binary, &data, ctx);
            }
            Ok(ws::Message::Text(text)) => {
                self.deliver(MessageKind::Text, text.as_bytes(), ctx);
            }
            Ok(ws::Message::Continuation(item)) => {
                let result = match item {
                    Item::FirstText(chunk) => {
                        self.assembler.begin(MessageKind::Text, &chunk).map(|_| None)
                    }
                    Item::FirstBinary(chunk) => {
                        self.assembler.begin(MessageKind::Binary, &chunk).map(|_| None)
                    }
                    Item::Continue(chunk) => self.assembler.push(&chunk).map(|_| None),
                    Item::Last(chunk) => self.assembler.finish(&chunk).map(Some),
                };
                match result {
                    Ok(Some((kind, payload))) => self.deliver(kind, &payload, ctx),
                    Ok(None) => {}
                    Err(err) => {
                        warn!("connection {}: {}", self.conn_id, err);
                        self.close_with(ctx, CloseCode::Policy, &FrameError::InvalidFrame.to_string());
                    }
                }
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                debug!("connection {} closed by client: {:?}", self.conn_id, reason);
                ctx.close(Some(CloseReason {
                    code: CloseCode::Normal,
                    description: Some("bye".to_string()),
                }));
                ctx.stop();
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("connection {}: transport error: {}", self.conn_id, err);
                ctx.stop();
            }
        }
    }
}

/// WebSocket actor reflecting every complete message back to the sender.
pub struct EchoWebSocket {
    assembler: MessageAssembler,
    last_heartbeat: Instant,
}

impl EchoWebSocket {
    pub fn new() -> Self {
        Self { assembler: MessageAssembler::new(), last_heartbeat: Instant::now() }
    }

    fn reflect(&self, kind: MessageKind, payload: Bytes, ctx: &mut ws::WebsocketContext<Self>) {
        match kind {
            MessageKind::Binary => ctx.binary(payload),
            MessageKind::Text => match String::from_utf8(payload.to_vec()) {
                Ok(text) => ctx.text(text),
                Err(_) => ctx.binary(payload),
            },
        }
    }
}

impl Default for EchoWebSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl Actor for EchoWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for EchoWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => ctx.text(text),
            Ok(ws::Message::Binary(data)) => ctx.binary(data),
            Ok(ws::Message::Continuation(item)) => {
                let result = match item {
                    Item::FirstText(chunk) => {
                        self.assembler.begin(MessageKind::Text, &chunk).map(|_| None)
                    }
                    Item::FirstBinary(chunk) => {
                        self.assembler.begin(MessageKind::Binary, &chunk).map(|_| None)
                    }
                    Item::Continue(chunk) => self.assembler.push(&chunk).map(|_| None),
                    Item::Last(chunk) => self.assembler.finish(&chunk).map(Some),
                };
                match result {
                    Ok(Some((kind, payload))) => self.reflect(kind, payload, ctx),
                    Ok(None) => {}
                    Err(_) => ctx.stop(),
                }
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Nop) => {}
            Err(_) => ctx.stop(),
        }
    }
}

/// Upgrade handler for `/ws`: ingest without a hardware id.
pub async fn ingest_ws(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    start_ingest(req, stream, state, None)
}

/// Upgrade handler for `/ws/{hwid}`: ingest tagged with a hardware id taken
/// from the URL path (sanitized by the session).
pub async fn ingest_ws_tagged(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<HttpResponse> {
    start_ingest(req, stream, state, Some(path.into_inner()))
}

fn start_ingest(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    hwid: Option<String>,
) -> ActixResult<HttpResponse> {
    info!(
        "ingest upgrade from {:?} (hwid={})",
        req.connection_info().peer_addr(),
        hwid.as_deref().unwrap_or("-")
    );
    // a non-upgrade request fails the handshake and answers 400
    ws::start(IngestWebSocket::new(state.get_ref().clone(), hwid), &req, stream)
}

/// Upgrade handler for `/ws/echo`.
pub async fn echo_ws(req: HttpRequest, stream: web::Payload) -> ActixResult<HttpResponse> {
    ws::start(EchoWebSocket::new(), &req, stream)
}
