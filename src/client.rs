//! Line-oriented chat client
//!
//! Speaks the server's protocol: swallows the `SUBMIT_NAME` prompt, answers
//! with the requested name, tracks `NAME_CHANGED:` substitutions, prefixes
//! chat lines with `"<name>: "` and leaves with `EXIT`.

use std::io;

use futures_util::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::debug;

use crate::message::{EXIT, NAME_CHANGED_PREFIX, SUBMIT_NAME};

/// A connected client
#[derive(Debug)]
pub struct ChatClient {
    reader: FramedRead<OwnedReadHalf, LinesCodec>,
    writer: FramedWrite<OwnedWriteHalf, LinesCodec>,
    name: String,
}

impl ChatClient {
    /// Connect and answer the name prompt
    ///
    /// The server may still rename us; `name()` follows `NAME_CHANGED:`
    /// lines as they are read.
    pub async fn connect<A: ToSocketAddrs>(addr: A, name: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();
        let mut client = Self {
            reader: FramedRead::new(read_half, LinesCodec::new()),
            writer: FramedWrite::new(write_half, LinesCodec::new()),
            name: name.trim().to_string(),
        };

        match client.reader.next().await {
            Some(Ok(line)) if line == SUBMIT_NAME => {}
            Some(Ok(line)) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("expected {SUBMIT_NAME}, got {line:?}"),
                ))
            }
            Some(Err(e)) => return Err(codec_to_io(e)),
            None => return Err(io::ErrorKind::UnexpectedEof.into()),
        }

        client.send_line(name).await?;
        debug!(name, "name submitted");
        Ok(client)
    }

    /// Current display name as far as the client knows
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next line from the server; `None` once the server hangs up
    pub async fn recv_line(&mut self) -> io::Result<Option<String>> {
        match self.reader.next().await {
            Some(Ok(line)) => {
                if let Some(name) = line.strip_prefix(NAME_CHANGED_PREFIX) {
                    self.name = name.to_string();
                }
                Ok(Some(line))
            }
            Some(Err(e)) => Err(codec_to_io(e)),
            None => Ok(None),
        }
    }

    /// Send a raw line
    pub async fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.send(line).await.map_err(codec_to_io)
    }

    /// Send a chat line as `"<name>: <text>"`
    pub async fn send_chat(&mut self, text: &str) -> io::Result<()> {
        let line = format!("{}: {}", self.name, text);
        self.send_line(&line).await
    }

    /// Announce departure; the connection stays readable until the server closes it
    pub async fn exit(&mut self) -> io::Result<()> {
        self.send_line(EXIT).await
    }
}

fn codec_to_io(err: LinesCodecError) -> io::Error {
    match err {
        LinesCodecError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}
