//! Listener binding with fallback port scan

use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Ports scanned when the configured one is taken
pub const PORT_SCAN_RANGE: std::ops::RangeInclusive<u16> = 3000..=9000;

/// Bind `host:port`; when busy and `auto_port` is set, take the first free
/// port in [`PORT_SCAN_RANGE`]
pub async fn bind_listener(host: &str, port: u16, auto_port: bool) -> std::io::Result<TcpListener> {
    match TcpListener::bind((host, port)).await {
        Ok(listener) => Ok(listener),
        Err(e) if auto_port => {
            warn!("Port {} unavailable ({}), scanning for a free port", port, e);
            let listener = find_available_port(host).await?;
            if let Ok(addr) = listener.local_addr() {
                info!("Using fallback port {}", addr.port());
            }
            Ok(listener)
        }
        Err(e) => Err(e),
    }
}

async fn find_available_port(host: &str) -> std::io::Result<TcpListener> {
    for port in PORT_SCAN_RANGE {
        if let Ok(listener) = TcpListener::bind((host, port)).await {
            return Ok(listener);
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::AddrInUse,
        format!(
            "No free port in {}..={}",
            PORT_SCAN_RANGE.start(),
            PORT_SCAN_RANGE.end()
        ),
    ))
}

/// Display form of the bound address
pub fn display_addr(listener: &TcpListener) -> String {
    listener
        .local_addr()
        .map(|addr: SocketAddr| addr.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_busy_port_falls_back() {
        let taken = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let busy = taken.local_addr().unwrap().port();

        let listener = bind_listener("127.0.0.1", busy, true).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert_ne!(port, busy);
        assert!(PORT_SCAN_RANGE.contains(&port));
    }

    #[tokio::test]
    async fn test_busy_port_without_auto_port_fails() {
        let taken = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let busy = taken.local_addr().unwrap().port();

        assert!(bind_listener("127.0.0.1", busy, false).await.is_err());
    }
}
