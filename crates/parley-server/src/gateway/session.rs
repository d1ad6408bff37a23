//! One WebSocket connection from upgrade through disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use parley_core::errors as codes;
use parley_core::{ErrorKind, HandshakeData, PushMessage, Request, Response, SessionId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, instrument, warn};

use super::Gateway;
use super::frames::{ClientFrame, HANDSHAKE_OK, HandshakeSys, ServerFrame};
use crate::dispatch::Dispatcher;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DECODE_ERRORS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};

/// How long a new connection has to send its handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Queued responses per connection before the reader waits.
const RESPONSE_BUFFER: usize = 256;

/// Requests accepted from one connection but not yet dispatched.
const REQUEST_QUEUE: usize = 64;

/// Work for the per-connection dispatch worker, in arrival order.
enum Inbound {
    Request(Request),
    Reply(ServerFrame),
}

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// Serve one connected client.
///
/// 1. Waits for the handshake and creates the session
/// 2. Spawns the writer (responses, pushes, pings)
/// 3. Feeds requests, in arrival order, to a dispatch worker
/// 4. Removes the session on disconnect, cancelling in-flight calls
#[instrument(name = "ws_session", skip_all, fields(session_id = tracing::field::Empty))]
pub async fn run_ws_session(ws: WebSocket, gateway: Arc<Gateway>) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let _guard = gateway.track_connection();
    let connected_at = Instant::now();
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    if let Some(handshake) = await_handshake(&mut ws_tx, &mut ws_rx).await {
        serve(ws_tx, ws_rx, handshake, &gateway).await;
    } else {
        let _ = ws_tx.close().await;
    }

    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connected_at.elapsed().as_secs_f64());
}

async fn serve(
    mut ws_tx: WsSink,
    mut ws_rx: WsStream,
    handshake: HandshakeData,
    gateway: &Arc<Gateway>,
) {
    let sessions = gateway.dispatcher().sessions().clone();
    let session_id = SessionId::new();
    if let Err(err) = sessions.create(session_id.clone(), Some(handshake)) {
        warn!(error = %err, "failed to create session");
        let _ = ws_tx.close().await;
        return;
    }
    let push_rx = match sessions.activate(&session_id) {
        Ok(rx) => rx,
        Err(err) => {
            warn!(error = %err, "failed to activate session");
            let _ = sessions.remove(&session_id);
            let _ = ws_tx.close().await;
            return;
        }
    };
    let _ = tracing::Span::current().record("session_id", session_id.as_str());

    let reply = ServerFrame::Handshake {
        code: HANDSHAKE_OK,
        sys: HandshakeSys {
            heartbeat: gateway.heartbeat().as_secs(),
            dict: gateway.dictionary().entries().clone(),
            session: session_id.to_string(),
        },
    };
    if send_now(&mut ws_tx, &reply).await.is_err() {
        let _ = sessions.remove(&session_id);
        return;
    }
    info!("client connected");

    let connection = gateway.shutdown_token().child_token();
    let last_seen = Arc::new(Mutex::new(Instant::now()));
    let (resp_tx, resp_rx) = mpsc::channel::<String>(RESPONSE_BUFFER);
    let writer = tokio::spawn(
        write_loop(
            ws_tx,
            resp_rx,
            push_rx,
            gateway.heartbeat(),
            last_seen.clone(),
            connection.clone(),
        )
        .in_current_span(),
    );

    let (inbound_tx, inbound_rx) = mpsc::channel::<Inbound>(REQUEST_QUEUE);
    let worker = tokio::spawn(
        dispatch_loop(
            gateway.dispatcher().clone(),
            inbound_rx,
            resp_tx.clone(),
            connection.clone(),
        )
        .in_current_span(),
    );

    loop {
        let next = tokio::select! {
            () = connection.cancelled() => break,
            next = ws_rx.next() => next,
        };
        let Some(Ok(msg)) = next else { break };
        *last_seen.lock() = Instant::now();

        let text = match msg {
            Message::Text(t) => t.to_string(),
            Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(err) => {
                    counter!(WS_DECODE_ERRORS_TOTAL).increment(1);
                    warn!(len = data.len(), "binary frame is not valid UTF-8");
                    let frame = rejection(
                        None,
                        "",
                        ErrorKind::ValidationError,
                        codes::BAD_REQUEST,
                        format!("binary frame is not valid UTF-8: {err}"),
                    );
                    if !enqueue(&inbound_tx, Inbound::Reply(frame), &connection).await {
                        break;
                    }
                    continue;
                }
            },
            Message::Close(_) => {
                debug!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        let inbound = match ClientFrame::parse(&text) {
            Ok(ClientFrame::Request {
                id,
                route,
                body,
                trace,
            }) => {
                match route.resolve(gateway.dictionary()) {
                    Ok(route) => {
                        let mut request = Request::new(session_id.clone(), route, body);
                        request.id = id;
                        request.trace = trace;
                        Inbound::Request(request)
                    }
                    Err(err) => Inbound::Reply(rejection(
                        id,
                        "",
                        ErrorKind::RouteNotFound,
                        codes::NOT_FOUND,
                        err,
                    )),
                }
            }
            Ok(ClientFrame::Handshake(_)) => Inbound::Reply(rejection(
                None,
                "handshake",
                ErrorKind::ValidationError,
                codes::BAD_REQUEST,
                "handshake already completed",
            )),
            Err(err) => {
                counter!(WS_DECODE_ERRORS_TOTAL).increment(1);
                warn!(error = %err, "invalid frame received");
                Inbound::Reply(rejection(
                    ClientFrame::sniff_id(&text),
                    "",
                    ErrorKind::ValidationError,
                    codes::BAD_REQUEST,
                    err,
                ))
            }
        };
        if !enqueue(&inbound_tx, inbound, &connection).await {
            break;
        }
    }

    // Removing the session cancels the running dispatch and closes the
    // push queue, which stops the writer.
    let _ = sessions.remove(&session_id);
    connection.cancel();
    drop(inbound_tx);
    if worker.await.is_err() {
        warn!("dispatch worker failed");
    }
    drop(resp_tx);
    if writer.await.is_err() {
        warn!("writer task failed");
    }
    info!("client disconnected");
}

/// Run dispatches one at a time so replies leave in request order.
async fn dispatch_loop(
    dispatcher: Arc<Dispatcher>,
    mut inbound: mpsc::Receiver<Inbound>,
    responses: mpsc::Sender<String>,
    connection: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            () = connection.cancelled() => break,
            next = inbound.recv() => next,
        };
        match next {
            Some(Inbound::Request(request)) => {
                let notify = request.is_notify();
                let response = dispatcher.handle(request).await;
                if !notify {
                    queue(&responses, &ServerFrame::Response(response)).await;
                }
            }
            Some(Inbound::Reply(frame)) => queue(&responses, &frame).await,
            None => break,
        }
    }
}

/// Hand work to the dispatch worker, waiting while its queue is full.
/// Returns `false` once the connection is going away.
async fn enqueue(
    tx: &mpsc::Sender<Inbound>,
    inbound: Inbound,
    connection: &CancellationToken,
) -> bool {
    tokio::select! {
        () = connection.cancelled() => false,
        sent = tx.send(inbound) => sent.is_ok(),
    }
}

/// Read frames until the handshake arrives. Anything else is refused.
async fn await_handshake(ws_tx: &mut WsSink, ws_rx: &mut WsStream) -> Option<HandshakeData> {
    let first = async {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Text(t) => return Some(Ok(t.to_string())),
                Message::Binary(data) => return Some(String::from_utf8(data.to_vec())),
                Message::Close(_) => return None,
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
        None
    };
    let text = match tokio::time::timeout(HANDSHAKE_TIMEOUT, first).await {
        Ok(Some(Ok(text))) => text,
        Ok(Some(Err(err))) => {
            counter!(WS_DECODE_ERRORS_TOTAL).increment(1);
            warn!("rejecting connection: handshake frame is not valid UTF-8");
            let frame = rejection(
                None,
                "handshake",
                ErrorKind::ValidationError,
                codes::BAD_REQUEST,
                format!("binary frame is not valid UTF-8: {err}"),
            );
            let _ = send_now(ws_tx, &frame).await;
            return None;
        }
        Ok(None) => return None,
        Err(_) => {
            debug!("handshake timed out");
            return None;
        }
    };

    match ClientFrame::parse(&text) {
        Ok(ClientFrame::Handshake(data)) => Some(data),
        other => {
            let message = match other {
                Err(err) => err.to_string(),
                Ok(_) => "handshake required before any other frame".to_owned(),
            };
            warn!(%message, "rejecting connection");
            let frame = rejection(
                ClientFrame::sniff_id(&text),
                "handshake",
                ErrorKind::ValidationError,
                codes::BAD_REQUEST,
                message,
            );
            let _ = send_now(ws_tx, &frame).await;
            None
        }
    }
}

async fn write_loop(
    mut ws_tx: WsSink,
    mut responses: mpsc::Receiver<String>,
    mut pushes: mpsc::Receiver<PushMessage>,
    heartbeat: Duration,
    last_seen: Arc<Mutex<Instant>>,
    connection: CancellationToken,
) {
    let mut ping = tokio::time::interval(heartbeat);
    // Skip the immediate first tick
    let _ = ping.tick().await;

    loop {
        let text = tokio::select! {
            msg = responses.recv() => match msg {
                Some(text) => text,
                None => break,
            },
            push = pushes.recv() => match push {
                Some(push) => match ServerFrame::Push(push).to_text() {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(error = %err, "failed to serialize push");
                        continue;
                    }
                },
                None => break,
            },
            _ = ping.tick() => {
                if last_seen.lock().elapsed() > heartbeat * 2 {
                    warn!("client unresponsive for {:?}, disconnecting", heartbeat * 2);
                    break;
                }
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                continue;
            }
            () = connection.cancelled() => break,
        };
        if ws_tx.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }
    connection.cancel();
    let _ = ws_tx.close().await;
}

fn rejection(
    id: Option<u64>,
    route: &str,
    kind: ErrorKind,
    code: &str,
    message: impl ToString,
) -> ServerFrame {
    ServerFrame::Response(Response::error(id, route, kind, code, message.to_string()))
}

async fn queue(tx: &mpsc::Sender<String>, frame: &ServerFrame) {
    match frame.to_text() {
        Ok(text) => {
            if tx.send(text).await.is_err() {
                debug!("connection closed before response was written");
            }
        }
        Err(err) => tracing::error!(error = %err, "failed to serialize frame"),
    }
}

async fn send_now(ws_tx: &mut WsSink, frame: &ServerFrame) -> Result<(), axum::Error> {
    let text = match frame.to_text() {
        Ok(text) => text,
        Err(err) => {
            tracing::error!(error = %err, "failed to serialize frame");
            return Ok(());
        }
    };
    ws_tx.send(Message::Text(text.into())).await
}
