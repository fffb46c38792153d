//! Private-network guard for untrusted destinations.

use std::net::IpAddr;

use {tracing::debug, url::Url};

use crate::error::{Result, UpstreamError};

/// Resolve the URL host and reject loopback, private, link-local and other
/// non-public addresses. Runs before every hop, so a public name that
/// redirects to a private one is still caught.
pub async fn ssrf_check(url: &Url) -> Result<()> {
    let host = url
        .host_str()
        .ok_or_else(|| UpstreamError::InvalidRequest(format!("URL has no host: {url}")))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');

    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_private_ip(&ip) {
            return Err(UpstreamError::Blocked(format!(
                "{host} is a private address"
            )));
        }
        return Ok(());
    }

    let port = url.port_or_known_default().unwrap_or(443);
    let addrs: Vec<_> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| UpstreamError::Transport(format!("DNS resolution failed for {host}: {e}")))?
        .collect();

    if addrs.is_empty() {
        return Err(UpstreamError::Transport(format!(
            "DNS resolution failed for {host}"
        )));
    }

    if let Some(addr) = addrs.iter().find(|a| is_private_ip(&a.ip())) {
        debug!(%host, ip = %addr.ip(), "untrusted destination resolves to private address");
        return Err(UpstreamError::Blocked(format!(
            "{host} resolves to private address {}",
            addr.ip()
        )));
    }

    Ok(())
}

/// Check if an IP address is private, loopback, or link-local.
#[must_use]
pub fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (CGNAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
                // 192.0.0.0/24
                || (v4.octets()[0] == 192 && v4.octets()[1] == 0 && v4.octets()[2] == 0)
        },
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_private_ip(&IpAddr::V4(v4));
            }
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 (unique local)
                || (v6.segments()[0] & 0xFE00) == 0xFC00
                // fe80::/10 (link-local)
                || (v6.segments()[0] & 0xFFC0) == 0xFE80
        },
    }
}
