//! Local stream listener and the per-connection protocol state machine.
//!
//! Connections start unauthenticated and may issue exactly one successful
//! `auth`; everything else in that phase earns an `auth_required` error.
//! Authenticated connections get `ping`/`whoami`/`send`. Frames are
//! newline-delimited JSON bounded by the configured frame size; a parse
//! buffer past twice that bound destroys the connection.

use amb_core::{
    encode_frame, ClientFrame, Envelope, ErrorCode, LineDecoder, LineEvent, ServerFrame,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{unix::OwnedWriteHalf, UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::connections::ConnHandle;
use crate::daemon::BridgeCtx;

/// Authentication phase of one connection.
enum ConnPhase {
    Unauth,
    Authed { client_id: String },
}

/// What the dispatcher wants done with the connection after a frame.
enum Flow {
    Continue,
    Close,
}

/// Accept connections until shutdown fires; each is served concurrently.
pub async fn run(
    listener: UnixListener,
    ctx: Arc<BridgeCtx>,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut shutdown = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!("stream listener stopping");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let ctx = ctx.clone();
                    let conn_shutdown = shutdown_tx.subscribe();
                    tokio::spawn(async move {
                        handle_connection(stream, ctx, conn_shutdown).await;
                    });
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }
}

async fn handle_connection(
    stream: UnixStream,
    ctx: Arc<BridgeCtx>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let conn_id = ctx.next_conn_id();
    ctx.conn_opened();
    let started = Instant::now();
    debug!(conn_id, "connection accepted");

    let (mut reader, writer) = stream.into_split();

    // the outbox must absorb a full queue drain (auth_ok plus up to
    // queue_limit messages) without blocking the router
    let (outbox, outbox_rx) = mpsc::channel::<ServerFrame>(ctx.config.queue_limit + 16);
    let writer_task = tokio::spawn(write_loop(writer, outbox_rx));

    let mut decoder = LineDecoder::new(ctx.config.max_frame_bytes);
    let mut phase = ConnPhase::Unauth;
    // per-connection clamp so envelope timestamps never run backwards
    let mut last_ts = DateTime::<Utc>::MIN_UTC;
    let mut buf = vec![0u8; 8192];

    'conn: loop {
        tokio::select! {
            _ = shutdown.recv() => break 'conn,
            read = reader.read(&mut buf) => match read {
                Ok(0) => break 'conn,
                Ok(n) => {
                    let events = match decoder.feed(&buf[..n]) {
                        Ok(events) => events,
                        Err(e) => {
                            let _ = outbox.try_send(ServerFrame::Error {
                                error: ErrorCode::BufferExceeded,
                            });
                            ctx.events.warn(
                                "protocol",
                                format!("connection {conn_id} destroyed: {e}"),
                                json!({"connId": conn_id}),
                            );
                            break 'conn;
                        }
                    };
                    for event in events {
                        let flow = match event {
                            LineEvent::Line(line) => dispatch_frame(
                                &line, &mut phase, &mut last_ts, conn_id, &ctx, &outbox,
                            ),
                            LineEvent::Oversized { len } => {
                                debug!(conn_id, len, "frame over size limit");
                                let _ = outbox.try_send(ServerFrame::Error {
                                    error: ErrorCode::MessageTooLarge,
                                });
                                Flow::Continue
                            }
                        };
                        if matches!(flow, Flow::Close) {
                            break 'conn;
                        }
                    }
                }
                Err(e) => {
                    ctx.events.warn(
                        "socket_error",
                        format!("connection {conn_id} read error: {e}"),
                        json!({"connId": conn_id}),
                    );
                    break 'conn;
                }
            }
        }
    }

    if let ConnPhase::Authed { client_id } = &phase {
        ctx.router.disconnect(client_id, conn_id);
        ctx.events.info(
            "client_offline",
            format!("{client_id} disconnected"),
            json!({
                "clientId": client_id,
                "connId": conn_id,
                "lifetimeMs": started.elapsed().as_millis() as u64,
            }),
        );
    }

    // dropping the outbox lets the writer drain pending frames, then close
    drop(outbox);
    let _ = writer_task.await;
    ctx.conn_closed();
    debug!(conn_id, "connection closed");
}

/// Serialize outbound frames onto the socket in outbox order.
async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<ServerFrame>) {
    while let Some(frame) = rx.recv().await {
        match encode_frame(&frame) {
            Ok(bytes) => {
                if let Err(e) = writer.write_all(&bytes).await {
                    debug!(error = %e, "connection write failed");
                    break;
                }
            }
            Err(e) => warn!(error = %e, "failed to encode outbound frame"),
        }
    }
}

fn dispatch_frame(
    line: &[u8],
    phase: &mut ConnPhase,
    last_ts: &mut DateTime<Utc>,
    conn_id: u64,
    ctx: &Arc<BridgeCtx>,
    outbox: &mpsc::Sender<ServerFrame>,
) -> Flow {
    let frame: ClientFrame = match serde_json::from_slice(line) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(conn_id, error = %e, "unparseable frame");
            let _ = outbox.try_send(ServerFrame::Error {
                error: ErrorCode::InvalidJson,
            });
            return Flow::Continue;
        }
    };

    match phase {
        ConnPhase::Unauth => match frame {
            ClientFrame::Auth { client_id, api_key } => {
                if ctx.registry.verify_key(&client_id, &api_key) {
                    ctx.router.connect(
                        &client_id,
                        ConnHandle {
                            conn_id,
                            outbox: outbox.clone(),
                        },
                    );
                    *phase = ConnPhase::Authed { client_id };
                    Flow::Continue
                } else {
                    ctx.events.warn(
                        "auth_failed",
                        format!("auth failed for {client_id}"),
                        json!({"clientId": client_id, "connId": conn_id}),
                    );
                    let _ = outbox.try_send(ServerFrame::AuthFailed);
                    Flow::Close
                }
            }
            _ => {
                let _ = outbox.try_send(ServerFrame::Error {
                    error: ErrorCode::AuthRequired,
                });
                Flow::Continue
            }
        },
        ConnPhase::Authed { client_id } => match frame {
            ClientFrame::Ping => {
                let _ = outbox.try_send(ServerFrame::Pong { ts: Utc::now() });
                Flow::Continue
            }
            ClientFrame::Whoami => {
                let can_send_to = ctx
                    .registry
                    .get(client_id)
                    .map(|c| c.can_send_to.clone())
                    .unwrap_or_default();
                let _ = outbox.try_send(ServerFrame::Whoami {
                    client_id: client_id.clone(),
                    can_send_to,
                    ts: Utc::now(),
                });
                Flow::Continue
            }
            ClientFrame::Send {
                to,
                kind,
                payload,
                id,
                correlation_id,
            } => handle_send(
                client_id.clone(),
                to,
                kind,
                payload,
                id,
                correlation_id,
                last_ts,
                ctx,
                outbox,
            ),
            ClientFrame::Auth { .. } | ClientFrame::Unknown => {
                let _ = outbox.try_send(ServerFrame::Error {
                    error: ErrorCode::UnknownAction,
                });
                Flow::Continue
            }
        },
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_send(
    sender: String,
    to: Option<String>,
    kind: String,
    payload: Value,
    id: Option<String>,
    correlation_id: Option<String>,
    last_ts: &mut DateTime<Utc>,
    ctx: &Arc<BridgeCtx>,
    outbox: &mpsc::Sender<ServerFrame>,
) -> Flow {
    let to = match to {
        Some(t) if !t.is_empty() => t,
        _ => {
            let _ = outbox.try_send(ServerFrame::Error {
                error: ErrorCode::MissingTo,
            });
            return Flow::Continue;
        }
    };
    if !ctx.registry.contains(&to) {
        let _ = outbox.try_send(ServerFrame::Error {
            error: ErrorCode::UnknownTarget,
        });
        return Flow::Continue;
    }
    if !ctx.registry.route_allowed(&sender, &to) {
        let _ = outbox.try_send(ServerFrame::Error {
            error: ErrorCode::RouteNotAllowed,
        });
        return Flow::Continue;
    }

    // server-assigned timestamp, monotonically non-decreasing per connection
    let ts = Utc::now().max(*last_ts);
    *last_ts = ts;

    let envelope = Envelope {
        id: id.unwrap_or_else(Envelope::generate_id),
        from: sender,
        to,
        kind,
        payload,
        correlation_id,
        ts,
    };
    let ack_id = envelope.id.clone();
    let delivery = ctx.router.route(envelope);
    let _ = outbox.try_send(ServerFrame::Sent {
        id: ack_id,
        delivered_to: delivery.delivered_to,
        queued: delivery.queued,
        ts,
    });
    Flow::Continue
}
