//! Frame distribution server
//!
//! Accepts TCP clients, performs the name handshake and runs one worker task per client.
//! Each worker interleaves two duties with `tokio::select!`:
//!
//! - reading inbound messages (liveness probes are dropped, anything else is forwarded to
//!   the command inbox tagged with the client's name)
//! - pushing the newest frame on every tick of the frame interval
//!
//! A socket error, EOF or a frame write that misses its deadline ends only that client's
//! worker. The client is then evicted from the registry, which also clears the control
//! grant if it held it. Only a failure to bind is fatal to the server.

use crate::config::ServerConfig;
use crate::control::authority::CommandInbox;
use crate::control::messages::InboundCommand;
use crate::error::{RigError, RigResult};
use crate::network::protocol::{classify_inbound, parse_handshake_name, write_frame, InboundMessage};
use crate::network::registry::{Client, ClientRegistry};
use crate::video::FrameBuffer;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{debug, info, info_span, trace, warn, Instrument};
use uuid::Uuid;

/// Connection lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ServerEvent {
    /// Handshake succeeded and a worker started
    ClientAccepted {
        id: Uuid,
        name: String,
        address: SocketAddr,
    },
    /// A worker ended and its client was evicted
    ClientDisconnected {
        id: Uuid,
        name: String,
        held_grant: bool,
    },
    /// Handshake failed (duplicate or empty name); the connection was dropped silently
    ClientRejected {
        name: Option<String>,
        address: SocketAddr,
    },
}

/// Everything a client worker needs, shared by all workers
struct WorkerContext {
    config: ServerConfig,
    registry: ClientRegistry,
    frames: Arc<FrameBuffer>,
    inbox: CommandInbox,
    events: broadcast::Sender<ServerEvent>,
}

impl WorkerContext {
    fn emit(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }
}

struct Listening {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

/// TCP server streaming frames to every connected client
pub struct FrameDistributionServer {
    context: Arc<WorkerContext>,
    listening: Option<Listening>,
}

impl FrameDistributionServer {
    pub fn new(
        config: ServerConfig,
        registry: ClientRegistry,
        frames: Arc<FrameBuffer>,
        inbox: CommandInbox,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            context: Arc::new(WorkerContext {
                config,
                registry,
                frames,
                inbox,
                events,
            }),
            listening: None,
        }
    }

    /// Bind `bind_address` and start accepting clients
    ///
    /// Retries the bind `bind_retries` times, pausing `bind_retry_delay_ms` between
    /// attempts, then fails with `AddressInUse`. Returns the bound address. Starting a server
    /// that is already listening returns its current address.
    pub async fn start(&mut self, bind_address: &str) -> RigResult<SocketAddr> {
        if let Some(listening) = &self.listening {
            debug!(address = %listening.local_addr, "Server already listening");
            return Ok(listening.local_addr);
        }

        let listener = bind_with_retries(
            bind_address,
            self.context.config.bind_retries,
            self.context.config.bind_retry_delay(),
        )
        .await?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "Frame distribution server listening");

        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(listener, self.context.clone(), shutdown_rx));

        self.listening = Some(Listening {
            local_addr,
            shutdown,
            accept_task,
        });
        Ok(local_addr)
    }

    /// Stop accepting, disconnect every client and wait for their workers to end
    ///
    /// Returns `false` if the server was not listening.
    pub async fn stop(&mut self) -> bool {
        let Some(listening) = self.listening.take() else {
            debug!("Server already stopped");
            return false;
        };

        let _ = listening.shutdown.send(true);
        if let Err(e) = listening.accept_task.await {
            warn!(error = %e, "Accept loop ended abnormally");
        }
        info!(address = %listening.local_addr, "Frame distribution server stopped");
        true
    }

    /// Stop, then listen again on `bind_address`
    pub async fn reset(&mut self, bind_address: &str) -> RigResult<SocketAddr> {
        self.stop().await;
        self.start(bind_address).await
    }

    pub fn is_listening(&self) -> bool {
        self.listening.is_some()
    }

    /// Bound address while listening
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listening.as_ref().map(|l| l.local_addr)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.context.events.subscribe()
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.context.registry
    }
}

async fn bind_with_retries(
    address: &str,
    attempts: u32,
    delay: std::time::Duration,
) -> RigResult<TcpListener> {
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        match TcpListener::bind(address).await {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                warn!(%address, attempt, error = %e, "Unable to bind address");
                if attempt < attempts {
                    sleep(delay).await;
                }
            }
        }
    }

    Err(RigError::AddressInUse {
        address: address.to_string(),
        attempts,
    })
}

async fn accept_loop(
    listener: TcpListener,
    context: Arc<WorkerContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut workers = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,

            result = listener.accept() => match result {
                Ok((socket, address)) => {
                    debug!(%address, "Connection accepted");
                    let context = context.clone();
                    let shutdown = shutdown.clone();
                    workers.spawn(handle_connection(context, socket, address, shutdown));
                }
                Err(e) => warn!(error = %e, "Accept failed"),
            },

            Some(finished) = workers.join_next(), if !workers.is_empty() => {
                if let Err(e) = finished {
                    warn!(error = %e, "Client worker panicked");
                }
            }
        }
    }

    drop(listener);
    while workers.join_next().await.is_some() {}
    debug!("Accept loop exited");
}

async fn handle_connection(
    context: Arc<WorkerContext>,
    mut socket: TcpStream,
    address: SocketAddr,
    shutdown: watch::Receiver<bool>,
) {
    let handshake = timeout(
        context.config.handshake_timeout(),
        read_handshake(&mut socket, &context.config),
    )
    .await;

    let name = match handshake {
        Ok(Ok(name)) => name,
        Ok(Err(e)) => {
            debug!(%address, error = %e, "Handshake read failed");
            return;
        }
        Err(_) => {
            debug!(%address, "Handshake timed out");
            return;
        }
    };

    let client = match name {
        Some(name) => context.registry.register_client(name, address).await,
        None => Err(RigError::ClientHandshakeRejected {
            name: String::new(),
            address,
        }),
    };

    let client = match client {
        Ok(client) => client,
        Err(e) => {
            // Silent drop: the socket closes without a reply
            info!(%address, error = %e, "Handshake rejected");
            let name = match e {
                RigError::ClientHandshakeRejected { name, .. } if !name.is_empty() => Some(name),
                _ => None,
            };
            context.emit(ServerEvent::ClientRejected { name, address });
            return;
        }
    };

    info!(client = %client.name, %address, "Client connected");
    context.emit(ServerEvent::ClientAccepted {
        id: client.id,
        name: client.name.clone(),
        address,
    });

    let span = info_span!("client", name = %client.name);
    let result = serve_client(&context, &client, socket, shutdown)
        .instrument(span)
        .await;
    match result {
        Ok(()) => debug!(client = %client.name, "Worker stopped by server shutdown"),
        Err(e) => info!(client = %client.name, error = %e, "Client worker ended"),
    }

    if let Some(removed) = context.registry.remove_client(client.id).await {
        if removed.held_grant {
            info!(client = %client.name, "Control grant cleared");
        }
        context.emit(ServerEvent::ClientDisconnected {
            id: client.id,
            name: client.name,
            held_grant: removed.held_grant,
        });
    }
}

async fn read_handshake(socket: &mut TcpStream, config: &ServerConfig) -> RigResult<Option<String>> {
    let mut buf = vec![0u8; config.handshake_max_bytes.max(1)];
    let n = socket.read(&mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    Ok(parse_handshake_name(&buf[..n], &config.liveness_token))
}

/// Client worker loop; returns `Ok` only when the server shuts down
async fn serve_client(
    context: &WorkerContext,
    client: &Client,
    mut socket: TcpStream,
    mut shutdown: watch::Receiver<bool>,
) -> RigResult<()> {
    let (mut reader, mut writer) = socket.split();
    let mut frames = context.frames.subscribe();
    let mut buf = vec![0u8; context.config.command_max_bytes.max(1)];

    let mut ticker = interval(context.config.frame_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),

            read = reader.read(&mut buf) => {
                let n = read.map_err(|e| RigError::ClientDisconnected(format!("{}: {e}", client.name)))?;
                if n == 0 {
                    return Err(RigError::ClientDisconnected(client.name.clone()));
                }

                match classify_inbound(&buf[..n], &context.config.liveness_token) {
                    InboundMessage::Liveness => trace!("Liveness probe"),
                    InboundMessage::Command(text) => forward_command(context, client, text),
                }
            }

            _ = ticker.tick() => {
                let Some(frame) = frames.take_fresh() else {
                    continue;
                };

                // A client that stops reading must not block shutdown
                let write = timeout(
                    context.config.write_timeout(),
                    write_frame(&mut writer, &frame.payload),
                );
                let written = tokio::select! {
                    _ = shutdown.changed() => return Ok(()),
                    written = write => written,
                };

                match written {
                    Ok(Ok(())) => trace!(sequence = frame.sequence, bytes = frame.len(), "Frame sent"),
                    Ok(Err(RigError::FrameTooLarge(len))) => {
                        warn!(sequence = frame.sequence, len, "Skipping oversized frame");
                    }
                    Ok(Err(e)) => {
                        return Err(RigError::ClientDisconnected(format!("{}: {e}", client.name)));
                    }
                    Err(_) => {
                        warn!(sequence = frame.sequence, "Frame write timed out, evicting client");
                        return Err(RigError::ClientDisconnected(format!(
                            "{}: frame write timed out",
                            client.name
                        )));
                    }
                }
            }
        }
    }
}

fn forward_command(context: &WorkerContext, client: &Client, text: String) {
    debug!(command = %text, "Command received");
    match context.inbox.try_send(InboundCommand::new(client.name.clone(), text)) {
        Ok(()) => {}
        Err(TrySendError::Full(dropped)) => {
            warn!(command = %dropped.text, "Command inbox full, dropping command");
        }
        Err(TrySendError::Closed(_)) => {
            warn!("Command inbox closed, dropping command");
        }
    }
}
