pub mod chat;
pub mod webhook;

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

pub use chat::ChatWebhookNotifier;
pub use webhook::GenericWebhookNotifier;

/// Shared "at most one send per `interval`" gate. Tracks the last attempted
/// send regardless of whether it succeeded, matching the contract that
/// `last_sent` updates on every attempt.
pub(crate) struct RateLimiter {
    interval: Duration,
    last_sent: Mutex<Option<tokio::time::Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        RateLimiter {
            interval,
            last_sent: Mutex::new(None),
        }
    }

    /// Waits out the remainder of the rate-limit window, if any, honouring
    /// cancellation. Returns `Err(())` if cancelled before the wait elapsed.
    pub async fn wait(&self, cancellation: &CancellationToken) -> Result<(), ()> {
        let deadline = {
            let last = *self.last_sent.lock().expect("rate limiter lock");
            last.map(|t| t + self.interval)
        };
        if let Some(deadline) = deadline {
            let now = tokio::time::Instant::now();
            if deadline > now {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = cancellation.cancelled() => return Err(()),
                }
            }
        }
        Ok(())
    }

    pub fn record_attempt(&self) {
        *self.last_sent.lock().expect("rate limiter lock") = Some(tokio::time::Instant::now());
    }
}

fn is_disallowed_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_broadcast()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || v6.is_multicast()
        }
    }
}

/// Validates a webhook target URL and resolves it to socket addresses,
/// rejecting anything that is not a public `http`/`https` endpoint.
pub(crate) async fn validate_webhook_url(raw: &str) -> anyhow::Result<url::Url> {
    let parsed = url::Url::parse(raw.trim()).map_err(|_| anyhow::anyhow!("invalid webhook url"))?;
    let scheme = parsed.scheme();
    if scheme != "http" && scheme != "https" {
        anyhow::bail!("webhook url must use http or https");
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("webhook url missing host"))?
        .to_string();
    if host.eq_ignore_ascii_case("localhost") {
        anyhow::bail!("webhook target host is not allowed");
    }
    let port = parsed
        .port_or_known_default()
        .ok_or_else(|| anyhow::anyhow!("webhook url missing port"))?;

    let resolved: Vec<SocketAddr> = tokio::task::spawn_blocking(move || {
        (host.as_str(), port)
            .to_socket_addrs()
            .map(|iter| iter.collect::<Vec<_>>())
    })
    .await
    .map_err(|e| anyhow::anyhow!("webhook dns task join failed: {e}"))?
    .map_err(|e| anyhow::anyhow!("webhook dns resolve failed: {e}"))?;
    if resolved.is_empty() {
        anyhow::bail!("webhook dns resolve returned no addresses");
    }
    if resolved.iter().any(|addr| is_disallowed_ip(addr.ip())) {
        anyhow::bail!("webhook target resolves to non-public address");
    }
    Ok(parsed)
}
