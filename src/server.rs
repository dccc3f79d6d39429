//! # HTTP Server Assembly
//!
//! Route table, CORS policy and listener binding for the relay server.
//!
//! ## Routes:
//! - `GET /api/key`: the upstream credential as `{"apiKey": ...}`
//! - `GET /ws`: WebSocket relay (origin-checked)
//! - `GET /health`: service status and relay counters
//! - `GET /`: the entry HTML document
//! - everything else: static files from the configured directory

use crate::config::CorsConfig;
use crate::{handlers, health, websocket};
use actix_cors::Cors;
use actix_web::web;
use std::io;
use std::net::TcpListener;
use tracing::{info, warn};

/// Register every route. Static files are registered last so they never
/// shadow the API routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig, static_dir: &str) {
    cfg.route("/api/key", web::get().to(handlers::get_api_key))
        .route("/ws", web::get().to(websocket::relay_websocket))
        .route("/health", web::get().to(health::health_check))
        .route("/", web::get().to(handlers::index))
        .service(handlers::static_files(static_dir));
}

/// CORS restricted to the configured origins.
pub fn build_cors(cors: &CorsConfig) -> Cors {
    cors.allowed_origins
        .iter()
        .fold(Cors::default(), |policy, origin| policy.allowed_origin(origin))
        .allow_any_method()
        .allow_any_header()
        .max_age(3600)
}

/// Bind `host:port`, moving on to the next port while the address is in use.
///
/// ## Parameters:
/// - `retry_limit`: how many ports after `port` to try before giving up
///
/// ## Returns:
/// The bound listener and the port it ended up on. Errors other than
/// "address in use" are returned immediately.
pub fn bind_with_port_retry(host: &str, port: u16, retry_limit: u16) -> io::Result<(TcpListener, u16)> {
    let mut candidate = port;
    let mut attempts = 0;

    loop {
        match TcpListener::bind((host, candidate)) {
            Ok(listener) => {
                if candidate != port {
                    info!("Port {} was busy, bound to {} instead", port, candidate);
                }
                return Ok((listener, candidate));
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse && attempts < retry_limit => {
                warn!("Port {} is busy, trying port {}", candidate, candidate.wrapping_add(1));
                attempts += 1;
                candidate = candidate.checked_add(1).ok_or(e)?;
            }
            Err(e) => return Err(e),
        }
    }
}
