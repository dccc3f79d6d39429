use crate::error::{PipelineError, PipelineResult};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};

pub type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One connection attempt, abandoned if the socket is not open within `timeout`.
pub async fn connect_once(url: &str, origin: &str, timeout: Duration) -> PipelineResult<ClientSocket> {
    let mut request = url.into_client_request()?;
    let origin = HeaderValue::from_str(origin)
        .map_err(|e| PipelineError::Connection(format!("invalid origin header: {}", e)))?;
    request.headers_mut().insert("Origin", origin);

    match tokio::time::timeout(timeout, connect_async(request)).await {
        Ok(Ok((socket, _response))) => Ok(socket),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(PipelineError::ConnectTimeout(timeout.as_millis() as u64)),
    }
}

/// Connect to the relay, retrying exactly once when the first attempt times out.
///
/// Other failures (refused, rejected upgrade) are returned without a retry.
pub async fn connect_with_retry(url: &str, origin: &str, timeout: Duration) -> PipelineResult<ClientSocket> {
    match connect_once(url, origin, timeout).await {
        Ok(socket) => {
            info!("Connected to relay at {}", url);
            Ok(socket)
        }
        Err(PipelineError::ConnectTimeout(ms)) => {
            warn!("Connection timeout after {}ms, retrying once", ms);
            connect_once(url, origin, timeout).await
        }
        Err(e) => Err(e),
    }
}
