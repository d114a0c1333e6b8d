// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listener task for handling socket I/O.
//!
//! The listener accepts connections and serves them in spawned tasks
//! without blocking the broker. A connection carries a sequence of
//! single-shot requests, or flips into streaming mode on `Subscribe`.

use crate::broker::Broker;
use crate::egress::DurableConsumer;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use yard_core::Clock;
use yard_store::{keys, Store};
use yard_wire::{
    read_request, write_response, ErrorKind, ProtocolError, Request, Response,
};

/// Per-frame I/O timeout for request/response exchanges.
const IPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle timeout while waiting for the next request on a kept-open
/// connection; workers poll well within this.
const IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Shared listener context.
pub struct ListenCtx<S, C: Clock> {
    pub broker: Arc<Broker<S, C>>,
    /// Auth token for TCP connections. When set, TCP clients must provide
    /// it in the Hello handshake.
    pub auth_token: Option<String>,
    pub shutdown: CancellationToken,
}

/// Source of a connection (for auth decisions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionSource {
    /// Local Unix socket: trusted, no auth required.
    Unix,
    /// Remote TCP: requires auth token in the Hello handshake.
    Tcp,
}

pub struct Listener<S, C: Clock> {
    unix: UnixListener,
    tcp: Option<TcpListener>,
    ctx: Arc<ListenCtx<S, C>>,
}

impl<S: Store, C: Clock> Listener<S, C> {
    pub fn new(unix: UnixListener, ctx: Arc<ListenCtx<S, C>>) -> Self {
        Self { unix, tcp: None, ctx }
    }

    pub fn with_tcp(unix: UnixListener, tcp: TcpListener, ctx: Arc<ListenCtx<S, C>>) -> Self {
        Self { unix, tcp: Some(tcp), ctx }
    }

    /// Accept connections until shutdown.
    pub async fn run(self) {
        let shutdown = self.ctx.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.unix.accept() => match result {
                    Ok((stream, _)) => {
                        let ctx = Arc::clone(&self.ctx);
                        tokio::spawn(async move {
                            let (reader, writer) = stream.into_split();
                            handle_connection(reader, writer, ConnectionSource::Unix, ctx).await;
                        });
                    }
                    Err(e) => error!("unix accept error: {e}"),
                },
                result = accept_tcp(&self.tcp) => match result {
                    Ok((stream, addr)) => {
                        debug!("tcp connection from {addr}");
                        let ctx = Arc::clone(&self.ctx);
                        tokio::spawn(async move {
                            let (reader, writer) = stream.into_split();
                            handle_connection(reader, writer, ConnectionSource::Tcp, ctx).await;
                        });
                    }
                    Err(e) => error!("tcp accept error: {e}"),
                },
            }
        }
    }
}

async fn accept_tcp(
    tcp: &Option<TcpListener>,
) -> std::io::Result<(tokio::net::TcpStream, std::net::SocketAddr)> {
    match tcp {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

/// Serve one connection: a request/response sequence, or a subscription
/// stream after a `Subscribe` request.
async fn handle_connection<S, C, R, W>(
    mut reader: R,
    mut writer: W,
    source: ConnectionSource,
    ctx: Arc<ListenCtx<S, C>>,
) where
    S: Store,
    C: Clock,
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut authenticated = source == ConnectionSource::Unix || ctx.auth_token.is_none();
    loop {
        let request = tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            request = read_request(&mut reader, IDLE_TIMEOUT) => request,
        };
        let request = match request {
            Ok(request) => request,
            Err(ProtocolError::ConnectionClosed) => {
                debug!("client disconnected");
                break;
            }
            Err(ProtocolError::Timeout) => {
                debug!("idle connection timed out");
                break;
            }
            Err(e) => {
                warn!("connection error: {e}");
                break;
            }
        };

        // TCP clients must authenticate before anything else.
        if !authenticated {
            match &request {
                Request::Hello { token: Some(token), .. }
                    if Some(token) == ctx.auth_token.as_ref() =>
                {
                    authenticated = true;
                }
                _ => {
                    let response =
                        Response::error(ErrorKind::Validation, "unauthorized");
                    let _ = write_response(&mut writer, &response, IPC_TIMEOUT).await;
                    break;
                }
            }
        }

        match request {
            Request::Subscribe { consumer, event_types, replay_from } => {
                serve_subscription(reader, writer, ctx, consumer, event_types, replay_from)
                    .await;
                return;
            }
            Request::Shutdown => {
                let response = ctx.broker.handle(Request::Shutdown).await;
                let _ = write_response(&mut writer, &response, IPC_TIMEOUT).await;
                ctx.shutdown.cancel();
                return;
            }
            request => {
                let response = ctx.broker.handle(request).await;
                if let Err(e) = write_response(&mut writer, &response, IPC_TIMEOUT).await {
                    debug!("write failed: {e}");
                    break;
                }
            }
        }
    }
}

/// Stream events to a durable subscriber. Replay runs first, then live
/// group reads; acknowledgements arrive as `Ack` requests on the same
/// connection, drained by a dedicated reader task.
async fn serve_subscription<S, C, R, W>(
    mut reader: R,
    mut writer: W,
    ctx: Arc<ListenCtx<S, C>>,
    consumer: String,
    event_types: Vec<String>,
    replay_from: Option<String>,
) where
    S: Store,
    C: Clock,
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let store = Arc::clone(&ctx.broker.store);
    let durable = DurableConsumer::new(Arc::clone(&store), consumer.clone(), event_types.clone());
    if let Err(e) = durable.ensure_groups().await {
        let response = Response::error(ErrorKind::StoreUnavailable, e.to_string());
        let _ = write_response(&mut writer, &response, IPC_TIMEOUT).await;
        return;
    }
    let _ = write_response(&mut writer, &Response::Ok, IPC_TIMEOUT).await;

    // Replay persisted history before going live.
    if let Some(from) = replay_from {
        for event_type in &event_types {
            let after = if from.is_empty() { None } else { Some(from.as_str()) };
            match durable.replay(event_type, after, 10_000).await {
                Ok(deliveries) => {
                    for delivery in deliveries {
                        let frame = Response::Event {
                            stream_id: delivery.stream_id,
                            record: Box::new(delivery.record),
                        };
                        if write_response(&mut writer, &frame, IPC_TIMEOUT).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(consumer = %consumer, error = %e, "replay failed");
                    return;
                }
            }
        }
    }

    // Acks ride the same connection; a dedicated task owns the reader so
    // frame boundaries survive the select loop.
    let (ack_tx, mut ack_rx) = mpsc::unbounded_channel::<Request>();
    let ack_reader = tokio::spawn(async move {
        loop {
            match read_request(&mut reader, IDLE_TIMEOUT).await {
                Ok(request) => {
                    if ack_tx.send(request).is_err() {
                        break;
                    }
                }
                Err(ProtocolError::Timeout) => continue,
                Err(_) => break,
            }
        }
    });

    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            ack = ack_rx.recv() => match ack {
                Some(Request::Ack { consumer: c, event_type, stream_id }) => {
                    if let Err(e) =
                        store.stream_ack(&keys::stream(&event_type), &c, &stream_id).await
                    {
                        warn!(consumer = %c, error = %e, "ack failed");
                    }
                }
                Some(_) => {
                    let response = Response::error(
                        ErrorKind::Validation,
                        "only Ack is valid on a subscription connection",
                    );
                    if write_response(&mut writer, &response, IPC_TIMEOUT).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            batch = durable.next_batch(1_000) => match batch {
                Ok(deliveries) => {
                    for delivery in deliveries {
                        let frame = Response::Event {
                            stream_id: delivery.stream_id,
                            record: Box::new(delivery.record),
                        };
                        if write_response(&mut writer, &frame, IPC_TIMEOUT).await.is_err() {
                            ack_reader.abort();
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(consumer = %consumer, error = %e, "subscription read failed");
                    break;
                }
            },
        }
    }
    ack_reader.abort();
}
