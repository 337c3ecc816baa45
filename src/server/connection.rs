// src/server/connection.rs

//! One accepted connection: read request frames, hand them to the request
//! handler, write response frames back.

use crate::core::handler::RequestHandler;
use crate::core::request::{RequestCodec, Response, WireCodec, WireFrame};
use crate::CitrineError;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

pub struct ConnectionHandler {
    framed: Framed<TcpStream, WireCodec>,
    addr: SocketAddr,
    handler: Arc<RequestHandler>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl ConnectionHandler {
    pub fn new(
        socket: TcpStream,
        addr: SocketAddr,
        handler: Arc<RequestHandler>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            framed: Framed::new(socket, WireCodec::new(RequestCodec::default())),
            addr,
            handler,
            shutdown_rx,
        }
    }

    pub async fn run(&mut self) -> Result<(), CitrineError> {
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.recv() => {
                    debug!("Closing connection from {} for shutdown.", self.addr);
                    return Ok(());
                }

                frame = self.framed.next() => {
                    match frame {
                        None => return Ok(()),
                        Some(Ok(WireFrame::Request(request))) => {
                            let response = self.handler.handle(request).await;
                            self.framed.send(WireFrame::Response(response)).await?;
                        }
                        Some(Ok(WireFrame::Response(_))) => {
                            warn!("{} sent a response frame to a server; closing.", self.addr);
                            return Err(CitrineError::InvalidRequest(
                                "unexpected response frame".to_string(),
                            ));
                        }
                        Some(Err(e)) => {
                            // Version and parse rejections are answered; the
                            // stream position is unreliable afterwards, so the
                            // connection closes either way.
                            let response = Response::from_error(&e);
                            let _ = self.framed.send(WireFrame::Response(response)).await;
                            return Err(e);
                        }
                    }
                }
            }
        }
    }
}
