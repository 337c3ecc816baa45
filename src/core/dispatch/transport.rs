// src/core/dispatch/transport.rs

//! The transport seam between routing and the network. The dispatcher and
//! the handler's forwarding path both talk through `NodeTransport`, so
//! tests can script a cluster without sockets.

use crate::core::CitrineError;
use crate::core::request::{Request, RequestCodec, Response, WireCodec, WireFrame};
use crate::core::topology::NodeEndpoint;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

// Timeout constants for robust network operations.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);
const READ_TIMEOUT: Duration = Duration::from_secs(3);

/// Sends one request to one node and returns its response.
#[async_trait]
pub trait NodeTransport: Send + Sync {
    async fn invoke(
        &self,
        endpoint: &NodeEndpoint,
        request: Request,
    ) -> Result<Response, CitrineError>;
}

/// The production transport: one TCP connection per invocation, framed
/// with the wire codec, bounded by connect/write/read timeouts.
#[derive(Debug, Clone, Default)]
pub struct TcpNodeTransport {
    requests: RequestCodec,
}

impl TcpNodeTransport {
    pub fn new(requests: RequestCodec) -> Self {
        Self { requests }
    }
}

#[async_trait]
impl NodeTransport for TcpNodeTransport {
    async fn invoke(
        &self,
        endpoint: &NodeEndpoint,
        request: Request,
    ) -> Result<Response, CitrineError> {
        let address = endpoint.address();
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&address))
            .await
            .map_err(|_| CitrineError::Unreachable(format!("connect timeout to {address}")))??;

        let mut framed = Framed::new(stream, WireCodec::new(self.requests.clone()));

        // The per-request deadline governs how long we wait for an answer;
        // the static floor keeps a zero-timeout request from hanging up
        // before the peer can even reject it.
        let read_timeout = READ_TIMEOUT.max(Duration::from_millis(u64::from(request.timeout_ms)));

        tokio::time::timeout(WRITE_TIMEOUT, framed.send(WireFrame::Request(request)))
            .await
            .map_err(|_| CitrineError::Unreachable(format!("write timeout to {address}")))??;

        match tokio::time::timeout(read_timeout, framed.next()).await {
            Ok(Some(Ok(WireFrame::Response(response)))) => Ok(response),
            Ok(Some(Ok(WireFrame::Request(_)))) => Err(CitrineError::Internal(format!(
                "{address} answered with a request frame"
            ))),
            Ok(Some(Err(e))) => Err(e),
            Ok(None) => Err(CitrineError::Unreachable(format!(
                "connection closed by {address}"
            ))),
            Err(_) => Err(CitrineError::Unreachable(format!(
                "read timeout waiting on {address}"
            ))),
        }
    }
}
