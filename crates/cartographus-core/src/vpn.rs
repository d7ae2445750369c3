use async_trait::async_trait;

/// A single IP's VPN classification as reported by an injected lookup
/// service. `provider` is a stable machine key (e.g. `"nordvpn"`);
/// `provider_display_name` is human-readable (e.g. `"NordVPN"`).
#[derive(Debug, Clone)]
pub struct VpnLookupResult {
    pub is_vpn: bool,
    pub provider: String,
    pub provider_display_name: String,
    pub server_country: String,
    pub server_city: String,
    /// `0.0..=1.0`; reserved for the `alert_on_high_risk` extension point.
    pub confidence: f64,
}

/// The VPN detector's only external dependency. No concrete
/// implementation ships with this crate; callers wire in whatever
/// threat-intelligence source they have.
#[async_trait]
pub trait VpnLookupService: Send + Sync {
    async fn lookup_ip(&self, ip: &str) -> anyhow::Result<Option<VpnLookupResult>>;

    fn enabled(&self) -> bool;
}
