//! # TCP server binder
//!
//! This module contains the implementation of the TCP server binder,
//! based on [`tokio::net::TcpStream`]. Requests and responses are
//! JSON documents, one per line.

use std::{io, sync::Arc};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf},
    net::{TcpListener, TcpStream},
};
use tracing::{debug, trace};

use crate::{
    request::{Request, RequestReader},
    response::{Response, ResponseWriter},
    service::SyncService,
};

use super::{ServerBind, ServerStream};

/// The TCP server binder.
///
/// This [`ServerBind`]er uses the TCP protocol to bind a listener, to
/// read requests and write responses.
pub struct TcpBind {
    /// The TCP host of the listener.
    pub host: String,

    /// The TCP port of the listener.
    pub port: u16,
}

impl TcpBind {
    /// Create a new TCP binder using the given host and port.
    pub fn new(host: impl ToString, port: u16) -> Box<dyn ServerBind> {
        Box::new(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Accept connections from the given listener forever, handling
    /// each of them in a dedicated task.
    pub async fn serve(listener: TcpListener, service: Arc<dyn SyncService>) -> io::Result<()> {
        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(err) => {
                    debug!("cannot get stream from client: {err}");
                    debug!("{err:?}");
                    continue;
                }
            };

            trace!(%addr, "accepted connection");
            let service = service.clone();

            tokio::spawn(async move {
                let mut handler = TcpHandler::from(stream);
                if let Err(err) = handler.handle(service).await {
                    debug!(%addr, "cannot handle connection: {err}");
                    debug!("{err:?}");
                }
                trace!(%addr, "connection closed");
            });
        }
    }
}

#[async_trait]
impl ServerBind for TcpBind {
    /// Bind the TCP listener, then serve incoming connections.
    async fn bind(&self, service: Arc<dyn SyncService>) -> io::Result<()> {
        let listener = TcpListener::bind((self.host.as_str(), self.port)).await?;
        debug!(host = %self.host, port = self.port, "listening for commands");
        Self::serve(listener, service).await
    }
}

/// The TCP connection handler.
pub struct TcpHandler {
    pub reader: BufReader<ReadHalf<TcpStream>>,
    pub writer: WriteHalf<TcpStream>,
}

impl From<TcpStream> for TcpHandler {
    fn from(stream: TcpStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let reader = BufReader::new(reader);
        Self { reader, writer }
    }
}

#[async_trait]
impl RequestReader for TcpHandler {
    async fn read(&mut self) -> io::Result<Option<Request>> {
        let mut line = String::new();

        loop {
            line.clear();

            if self.reader.read_line(&mut line).await? == 0 {
                return Ok(None);
            }

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            trace!("receiving request: {line:?}");

            return serde_json::from_str(line)
                .map(Some)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err));
        }
    }
}

#[async_trait]
impl ResponseWriter for TcpHandler {
    async fn write(&mut self, res: Response) -> io::Result<()> {
        let mut res = serde_json::to_string(&res)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
        res.push('\n');

        self.writer.write_all(res.as_bytes()).await?;
        self.writer.flush().await
    }
}
