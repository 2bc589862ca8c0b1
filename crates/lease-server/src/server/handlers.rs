//! Per-connection request handling.

use super::types::{RegisterRequest, Response};
use super::{Limits, ServerState};
use crate::error::LeaseError;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, instrument, warn};

/// Serve one connection: read a request, answer it, close.
#[instrument(skip(state, stream))]
pub async fn handle_connection(state: Arc<ServerState>, mut stream: TcpStream, peer: SocketAddr) {
    debug!("Client connected");

    let (reader, mut writer) = stream.split();
    let response = match read_request(reader, &state.limits).await {
        Ok(payload) => process(&state, &payload)
            .await
            .unwrap_or_else(LeaseError::into_response),
        Err(e) => {
            warn!(error = %e, "Unreadable request");
            e.into_response()
        }
    };

    if let Err(e) = writer.write_all(&response.to_line()).await {
        warn!(error = %e, "Failed to write response");
        return;
    }
    if let Err(e) = writer.shutdown().await {
        debug!(error = %e, "Shutdown failed");
    }

    debug!(status = response.status, "Client disconnected");
}

/// Read a single request line, bounded in size and time.
pub(crate) async fn read_request<R>(reader: R, limits: &Limits) -> Result<Vec<u8>, LeaseError>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader.take(limits.max_request_bytes as u64 + 1));
    let mut payload = Vec::new();

    tokio::time::timeout(limits.read_timeout, reader.read_until(b'\n', &mut payload))
        .await
        .map_err(|_| LeaseError::MalformedRequest("Request timed out".into()))?
        .map_err(|e| LeaseError::MalformedRequest(format!("Read failed: {}", e)))?;

    while matches!(payload.last(), Some(b'\n' | b'\r')) {
        payload.pop();
    }

    if payload.len() > limits.max_request_bytes {
        return Err(LeaseError::MalformedRequest("Request too large".into()));
    }

    Ok(payload)
}

/// Authentication, admission and registration for one request.
async fn process(state: &ServerState, payload: &[u8]) -> Result<Response, LeaseError> {
    let request: RegisterRequest = serde_json::from_slice(payload).map_err(|e| {
        debug!(error = %e, "Request is not valid JSON");
        LeaseError::MalformedRequest("Invalid JSON".into())
    })?;

    state.auth.verify(request.password.as_deref()).inspect_err(|_| {
        warn!("Invalid password");
    })?;
    info!("Client authenticated");

    // Only authenticated requests draw on the shared quota.
    state.rate_limit.check()?;

    let identity = request.pubkey.ok_or(LeaseError::InvalidIdentity)?;
    let lease = state.coordinator.register(&identity, request.misc).await?;

    let pubkey = state
        .server_public_key
        .clone()
        .unwrap_or_else(|| lease.identity.clone());
    Ok(Response::success(&lease, pubkey))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limits(max: usize) -> Limits {
        Limits {
            read_timeout: Duration::from_millis(200),
            max_request_bytes: max,
        }
    }

    #[tokio::test]
    async fn test_read_request_strips_terminator() {
        let input: &[u8] = b"{\"pubkey\":\"a\"}\r\nignored";
        let payload = read_request(input, &limits(1024)).await.unwrap();
        assert_eq!(payload, b"{\"pubkey\":\"a\"}".to_vec());
    }

    #[tokio::test]
    async fn test_read_request_accepts_eof_without_newline() {
        let input: &[u8] = b"{}";
        let payload = read_request(input, &limits(1024)).await.unwrap();
        assert_eq!(payload, b"{}".to_vec());
    }

    #[tokio::test]
    async fn test_read_request_size_limit() {
        let input: &[u8] = b"0123456789\n";
        assert_eq!(
            read_request(input, &limits(10)).await.unwrap(),
            b"0123456789".to_vec()
        );

        let input: &[u8] = b"0123456789A\n";
        assert!(matches!(
            read_request(input, &limits(10)).await,
            Err(LeaseError::MalformedRequest(msg)) if msg == "Request too large"
        ));
    }

    #[tokio::test]
    async fn test_read_request_timeout() {
        let (client, server) = tokio::io::duplex(64);
        let result = read_request(server, &limits(1024)).await;
        assert!(matches!(
            result,
            Err(LeaseError::MalformedRequest(msg)) if msg == "Request timed out"
        ));
        drop(client);
    }
}
