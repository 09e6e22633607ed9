//! Client side of the request/response protocol.
//!
//! A [`Client`] owns one connection and runs strictly alternating turns:
//! send a request, read one reply. The client imposes no idle deadline.

use crate::codec::{FrameReader, FrameWriter, Framing};
use crate::dialer::Dialer;
use crate::endpoint::Endpoint;
use crate::error::ClientError;
use crate::transport::{Connection, Connector};
use crate::wire::Reply;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tracing::trace;

pub struct Client<S> {
    reader: FrameReader<ReadHalf<S>>,
    writer: FrameWriter<WriteHalf<S>>,
}

impl Client<Connection> {
    /// Dial `endpoint` and wrap the connection.
    pub async fn connect<C: Connector>(
        dialer: &Dialer<C>,
        endpoint: &Endpoint,
        framing: &Framing,
    ) -> Result<Self, ClientError> {
        let connection = dialer.dial(endpoint).await?;
        Ok(Self::new(connection, framing))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Client<S> {
    pub fn new(stream: S, framing: &Framing) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: FrameReader::new(read_half, framing),
            writer: FrameWriter::new(write_half),
        }
    }

    /// Send one request and wait for its reply.
    ///
    /// A [`ClientError::Remote`] carries the server's error message; the
    /// connection stays usable after it.
    pub async fn call<Req, Resp>(&mut self, request: &Req) -> Result<Resp, ClientError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        self.writer.write_frame(request).await?;

        let reply: Reply<Resp> = self.reader.read_frame().await?.ok_or(ClientError::Closed)?;
        trace!("Reply received");
        reply.into_result().map_err(ClientError::Remote)
    }

    /// Close the write side; the server sees a clean end of stream.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
