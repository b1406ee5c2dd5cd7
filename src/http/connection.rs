use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use crate::http::parser::{parse_http_request, ParseError};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;
use crate::proxy::{Disposition, Proxy};

pub struct Connection {
    stream: TcpStream,
    remote_addr: String,
    proxy: Arc<Proxy>,
    buffer: Vec<u8>,
    state: ConnectionState,
}

pub enum ConnectionState {
    Reading,
    Processing(Request),
    Writing(ResponseWriter, bool), // bool = keep_alive?
    Closed,
}

enum ReadOutcome {
    Request(Request),
    Malformed(ParseError),
    Eof,
}

impl Connection {
    /// `remote_addr` is the peer address in `host:port` form.
    pub fn new(stream: TcpStream, remote_addr: impl Into<String>, proxy: Arc<Proxy>) -> Self {
        Self {
            stream,
            remote_addr: remote_addr.into(),
            proxy,
            buffer: Vec::with_capacity(4096),
            state: ConnectionState::Reading,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            let state = std::mem::replace(&mut self.state, ConnectionState::Closed);

            self.state = match state {
                ConnectionState::Reading => match self.read_request().await? {
                    ReadOutcome::Request(req) => ConnectionState::Processing(req),
                    ReadOutcome::Malformed(err) => {
                        tracing::debug!(client = %self.remote_addr, error = ?err, "Malformed request");
                        let response = match err {
                            ParseError::UnsupportedTransferEncoding => Response::not_implemented(),
                            ParseError::BodyTooLarge => Response::payload_too_large(),
                            _ => Response::bad_request(),
                        };
                        ConnectionState::Writing(ResponseWriter::new(&response.closing()), false)
                    }
                    ReadOutcome::Eof => ConnectionState::Closed,
                },

                ConnectionState::Processing(req) => {
                    let disposition = self
                        .proxy
                        .handle(&req, &self.remote_addr, &mut self.stream)
                        .await?;

                    // Relayed responses are delimited by closing the connection
                    match disposition {
                        Disposition::Rejected if req.keep_alive() => ConnectionState::Reading,
                        _ => ConnectionState::Closed,
                    }
                }

                ConnectionState::Writing(mut writer, keep_alive) => {
                    writer.write_to_stream(&mut self.stream).await?;

                    if keep_alive {
                        ConnectionState::Reading
                    } else {
                        ConnectionState::Closed
                    }
                }

                ConnectionState::Closed => break,
            };
        }

        Ok(())
    }

    async fn read_request(&mut self) -> anyhow::Result<ReadOutcome> {
        loop {
            // Try parsing whatever we already have
            match parse_http_request(&self.buffer) {
                Ok((request, consumed)) => {
                    self.buffer.drain(..consumed);
                    return Ok(ReadOutcome::Request(request));
                }

                Err(ParseError::Incomplete) => {}

                Err(e) => return Ok(ReadOutcome::Malformed(e)),
            }

            let mut temp = [0u8; 4096];
            let n = self.stream.read(&mut temp).await?;

            if n == 0 {
                // Client closed connection
                return Ok(ReadOutcome::Eof);
            }

            self.buffer.extend_from_slice(&temp[..n]);
        }
    }
}
