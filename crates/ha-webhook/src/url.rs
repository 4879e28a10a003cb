//! Webhook URL helpers
//!
//! Webhook URLs handed to devices only ever use the internal URL; the
//! external URL is never offered.

use std::net::{IpAddr, UdpSocket};

use ha_config::{CoreConfig, HttpConfig};

use crate::{WebhookError, WebhookResult};

/// Path of a webhook relative to the server root
pub fn webhook_path(webhook_id: &str) -> String {
    format!("/api/webhook/{webhook_id}")
}

/// Full webhook URL for a base URL
pub fn generate_url(base_url: &str, webhook_id: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), webhook_path(webhook_id))
}

/// Source address the host uses to reach the local network
///
/// Connecting a UDP socket sends nothing; it only selects a route.
pub fn local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("224.0.0.0:80").ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

/// Base URL devices on the local network can reach the server at
///
/// The configured `internal_url` wins. Otherwise a bound `server_host` or the
/// routed local address is combined with `server_port`.
pub fn internal_base_url(core: &CoreConfig, http: &HttpConfig) -> WebhookResult<String> {
    if let Some(url) = core.internal_url.as_deref().filter(|u| !u.is_empty()) {
        return Ok(url.trim_end_matches('/').to_string());
    }

    let host = match http.server_host.parse::<IpAddr>() {
        Ok(ip) if !ip.is_unspecified() && !ip.is_loopback() => ip,
        _ => local_ip().ok_or_else(|| {
            WebhookError::NoUrlAvailable("unable to determine a local IP address".to_string())
        })?,
    };

    let host = match host {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{v6}]"),
    };
    Ok(format!("http://{}:{}", host, http.server_port))
}
