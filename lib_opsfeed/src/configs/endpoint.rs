//! # Endpoint Selection
//!
//! Picks the event-stream endpoint from the execution context. Development hosts
//! talk to the backend directly on its own port; production traffic goes through
//! the reverse proxy under `/api/ws`.

/// Dev-server ports that indicate a local development build.
pub const DEV_SERVER_PORTS: [u16; 4] = [5173, 3000, 4200, 8080];

/// Backend port used when a development context does not name one.
pub const DEFAULT_BACKEND_PORT: u16 = 8000;

/// Path of the direct backend socket.
pub const DIRECT_PATH: &str = "/ws";

/// Path of the socket behind the reverse proxy.
pub const PROXIED_PATH: &str = "/api/ws";

const LOCAL_HOSTS: [&str; 4] = ["localhost", "127.0.0.1", "::1", "0.0.0.0"];

/// Environment signals the endpoint is derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSignals {
    /// Host the dashboard is served from.
    pub host: String,
    /// Port the dashboard is served from, if not the scheme default.
    pub port: Option<u16>,
    /// Whether the dashboard is served over TLS.
    pub secure: bool,
    /// Backend port for direct development connections.
    pub backend_port: Option<u16>,
}

impl EnvironmentSignals {
    /// Signals for a host with no port, served over TLS.
    pub fn secure_host(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            secure: true,
            backend_port: None,
        }
    }

    /// True when the signals describe a local development build.
    pub fn is_development(&self) -> bool {
        let host = self.host.trim_matches(|c| c == '[' || c == ']');
        LOCAL_HOSTS.contains(&host)
            || self.port.is_some_and(|p| DEV_SERVER_PORTS.contains(&p))
    }
}

/// Derives the socket endpoint. Same input, same output.
pub fn select_endpoint(signals: &EnvironmentSignals) -> String {
    let host = format_host(&signals.host);
    if signals.is_development() {
        let port = signals.backend_port.unwrap_or(DEFAULT_BACKEND_PORT);
        return format!("ws://{}:{}{}", host, port, DIRECT_PATH);
    }

    let (scheme, default_port) = if signals.secure { ("wss", 443) } else { ("ws", 80) };
    match signals.port {
        Some(port) if port != default_port => {
            format!("{}://{}:{}{}", scheme, host, port, PROXIED_PATH)
        }
        _ => format!("{}://{}{}", scheme, host, PROXIED_PATH),
    }
}

// IPv6 literals need brackets inside a URL authority.
fn format_host(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]", host)
    } else {
        host.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals(host: &str, port: Option<u16>, secure: bool) -> EnvironmentSignals {
        EnvironmentSignals {
            host: host.to_string(),
            port,
            secure,
            backend_port: None,
        }
    }

    #[test]
    fn test_localhost_goes_direct() {
        let endpoint = select_endpoint(&signals("localhost", Some(5173), false));
        assert_eq!(endpoint, "ws://localhost:8000/ws");
    }

    #[test]
    fn test_dev_port_on_lan_host_goes_direct() {
        let mut s = signals("192.168.1.20", Some(3000), false);
        s.backend_port = Some(9000);
        assert_eq!(select_endpoint(&s), "ws://192.168.1.20:9000/ws");
    }

    #[test]
    fn test_production_uses_proxy_path() {
        let endpoint = select_endpoint(&EnvironmentSignals::secure_host("ops.hospital.example"));
        assert_eq!(endpoint, "wss://ops.hospital.example/api/ws");
    }

    #[test]
    fn test_production_keeps_non_default_port() {
        let endpoint = select_endpoint(&signals("ops.example", Some(8443), true));
        assert_eq!(endpoint, "wss://ops.example:8443/api/ws");
        let plain = select_endpoint(&signals("ops.example", Some(80), false));
        assert_eq!(plain, "ws://ops.example/api/ws");
    }

    #[test]
    fn test_ipv6_loopback_is_bracketed() {
        let endpoint = select_endpoint(&signals("::1", None, false));
        assert_eq!(endpoint, "ws://[::1]:8000/ws");
    }

    #[test]
    fn test_selection_is_deterministic() {
        let s = signals("ops.example", None, true);
        assert_eq!(select_endpoint(&s), select_endpoint(&s.clone()));
    }
}
