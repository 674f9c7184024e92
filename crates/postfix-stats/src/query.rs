// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Query server for reading and resetting counters over a socket.
//!
//! The protocol is one command per connection: the client writes a command word, the server
//! answers with a text payload and closes. Commands are `stats`, `stats_reset`, `reset`, or the
//! name of a counter. The first read from the client is the whole command, capped at
//! [`MAX_COMMAND_LEN`] bytes.
//!
//! Every accepted connection is handled on its own task without a limit. Each one does a fixed,
//! small amount of work and the callers are local and trusted.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::constants::MAX_COMMAND_LEN;
use crate::listener::{ListenAddr, Listener};
use crate::store::SharedCounterStore;

/// A parsed query command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryCommand {
    /// Full report.
    Stats,
    /// Full report, then reset.
    StatsReset,
    /// Reset without a report.
    Reset,
    /// Single counter value; unknown names read as zero.
    Counter(String),
}

impl QueryCommand {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "stats" => QueryCommand::Stats,
            "stats_reset" => QueryCommand::StatsReset,
            "reset" => QueryCommand::Reset,
            name => QueryCommand::Counter(name.to_string()),
        }
    }

    /// Runs the command against `store` and returns the response payload.
    pub fn execute(&self, store: &SharedCounterStore) -> String {
        match self {
            QueryCommand::Stats => store.snapshot(),
            QueryCommand::StatsReset => store.stats_reset(),
            QueryCommand::Reset => {
                store.reset();
                String::new()
            }
            QueryCommand::Counter(name) => format!("{}\n", store.read(name)),
        }
    }
}

/// Serves counter queries from a bound [`Listener`].
pub struct QueryServer {
    listener: Listener,
    store: SharedCounterStore,
    cancel_token: CancellationToken,
}

impl QueryServer {
    #[must_use]
    pub fn new(
        listener: Listener,
        store: SharedCounterStore,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            listener,
            store,
            cancel_token,
        }
    }

    /// Accept loop. Returns once the cancel token fires or the listener fails to accept, both
    /// of which are the normal way for the server to stop.
    pub async fn spin(self) {
        debug!("Query server started");
        loop {
            let accepted = tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    debug!("Query server cancelled");
                    break;
                }
                accepted = self.accept() => accepted,
            };
            if let Err(e) = accepted {
                debug!("Query listener stopped accepting: {}", e);
                break;
            }
        }
        debug!("Query server stopped");
    }

    async fn accept(&self) -> io::Result<()> {
        match &self.listener {
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                trace!("Query connection from {}", peer);
                tokio::spawn(handle_connection(stream, self.store.clone()));
            }
            #[cfg(unix)]
            Listener::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                trace!("Query connection on unix socket");
                tokio::spawn(handle_connection(stream, self.store.clone()));
            }
        }
        Ok(())
    }
}

/// Reads one command from `stream`, answers it and closes the connection.
///
/// I/O errors abandon the connection; they are never reported to the peer.
pub async fn handle_connection<S>(mut stream: S, store: SharedCounterStore)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; MAX_COMMAND_LEN];
    let read = match stream.read(&mut buf).await {
        Ok(read) => read,
        Err(e) => {
            debug!("Failed to read query command: {}", e);
            return;
        }
    };
    let raw = String::from_utf8_lossy(&buf[..read]);
    let command = QueryCommand::parse(&raw);
    trace!("Query command {:?}", command);

    let response = command.execute(&store);
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        debug!("Failed to write query response: {}", e);
        return;
    }
    if let Err(e) = stream.shutdown().await {
        trace!("Failed to close query connection: {}", e);
    }
}

/// Sends `command` to a running query server at `addr` and returns its response.
pub async fn send_query(addr: &ListenAddr, command: &str) -> io::Result<String> {
    let context = |e: io::Error| {
        io::Error::new(
            e.kind(),
            format!("Cannot connect to log reader process at {}: {}", addr, e),
        )
    };
    match addr {
        ListenAddr::Tcp(host_port) => {
            let stream = TcpStream::connect(host_port.as_str())
                .await
                .map_err(context)?;
            exchange(stream, command).await
        }
        #[cfg(unix)]
        ListenAddr::Unix(path) => {
            let stream = UnixStream::connect(path).await.map_err(context)?;
            exchange(stream, command).await
        }
        #[cfg(not(unix))]
        ListenAddr::Unix(_) => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "Unix domain sockets are only supported on Unix platforms",
        )),
    }
}

async fn exchange<S>(mut stream: S, command: &str) -> io::Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(command.as_bytes()).await?;
    stream.shutdown().await?;
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;
    Ok(String::from_utf8_lossy(&response).into_owned())
}
