//! Wire client for the frame distribution server
//!
//! Used by the `watch` subcommand and by the integration tests.
//!
//! The protocol has no message delimiter on the client side, so two writes sent back to back
//! may reach the server as one read. Callers should leave a short gap between the handshake
//! and the first command, and between consecutive commands.

use crate::error::RigResult;
use crate::network::protocol::read_frame;
use bytes::Bytes;
use std::net::SocketAddr;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

/// Reading half: framed frames from the server
pub struct FrameReader {
    inner: BufReader<OwnedReadHalf>,
}

impl FrameReader {
    /// Wait for the next frame payload
    pub async fn next_frame(&mut self) -> RigResult<Bytes> {
        read_frame(&mut self.inner).await
    }
}

/// Writing half: commands and liveness probes
pub struct CommandWriter {
    inner: OwnedWriteHalf,
    liveness_token: String,
}

impl CommandWriter {
    /// Send a `verb[:argument]` command
    pub async fn send_command(&mut self, command: &str) -> RigResult<()> {
        self.inner.write_all(command.as_bytes()).await?;
        Ok(())
    }

    /// Send the liveness token
    pub async fn send_liveness(&mut self) -> RigResult<()> {
        self.inner.write_all(self.liveness_token.as_bytes()).await?;
        Ok(())
    }

    /// Close the write side of the connection
    pub async fn shutdown(&mut self) -> RigResult<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// A connected client
pub struct FrameClient {
    name: String,
    local_addr: SocketAddr,
    reader: FrameReader,
    writer: CommandWriter,
}

impl FrameClient {
    /// Connect and announce `name`
    pub async fn connect<A: ToSocketAddrs>(
        address: A,
        name: &str,
        liveness_token: &str,
    ) -> RigResult<Self> {
        let mut stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        stream.write_all(name.as_bytes()).await?;
        let local_addr = stream.local_addr()?;
        debug!(%name, %local_addr, "Connected to frame server");

        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            name: name.to_string(),
            local_addr,
            reader: FrameReader {
                inner: BufReader::new(read_half),
            },
            writer: CommandWriter {
                inner: write_half,
                liveness_token: liveness_token.to_string(),
            },
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn next_frame(&mut self) -> RigResult<Bytes> {
        self.reader.next_frame().await
    }

    pub async fn send_command(&mut self, command: &str) -> RigResult<()> {
        self.writer.send_command(command).await
    }

    pub async fn send_liveness(&mut self) -> RigResult<()> {
        self.writer.send_liveness().await
    }

    /// Separate the halves so frames can be read while commands are sent
    pub fn into_split(self) -> (FrameReader, CommandWriter) {
        (self.reader, self.writer)
    }
}
