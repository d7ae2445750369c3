use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use cartographus_core::detector::Detector;
use cartographus_core::rule::Rule;
use cartographus_core::store::RuleStore;
use cartographus_core::vpn::{VpnLookupResult, VpnLookupService};
use cartographus_detect::{
    ConcurrentStreamsDetector, DeviceVelocityDetector, GeoRestrictionDetector,
    ImpossibleTravelDetector, SimultaneousLocationsDetector, UserAgentAnomalyDetector,
    VpnUsageDetector,
};
use cartographus_duckdb::DuckDbBackend;
use cartographus_engine::{BroadcastChannel, Engine, Metrics};
use tokio_util::sync::CancellationToken;
use tracing::info;

mod config;

/// No VPN lookup provider is shipped with this binary; wire a real one in
/// by constructing [`VpnUsageDetector`] with a different [`VpnLookupService`].
struct NoopVpnLookup;

#[async_trait]
impl VpnLookupService for NoopVpnLookup {
    async fn lookup_ip(&self, _ip: &str) -> Result<Option<VpnLookupResult>> {
        Ok(None)
    }

    fn enabled(&self) -> bool {
        false
    }
}

/// Builds one detector per rule type and applies the stored enabled flag
/// and config blob from `rules`, falling back to detector defaults when a
/// rule's config fails to parse.
fn build_detectors(
    history: Arc<cartographus_detect::CachedEventHistory<DuckDbBackend>>,
    rules: &[Rule],
    vpn_lookup: Arc<dyn VpnLookupService>,
) -> Vec<Arc<dyn Detector>> {
    let detectors: Vec<Arc<dyn Detector>> = vec![
        Arc::new(ImpossibleTravelDetector::new(Arc::clone(&history))),
        Arc::new(ConcurrentStreamsDetector::new(Arc::clone(&history))),
        Arc::new(DeviceVelocityDetector::new(Arc::clone(&history))),
        Arc::new(GeoRestrictionDetector::new()),
        Arc::new(SimultaneousLocationsDetector::new(Arc::clone(&history))),
        Arc::new(UserAgentAnomalyDetector::new(Arc::clone(&history))),
        Arc::new(VpnUsageDetector::new(vpn_lookup)),
    ];

    for detector in &detectors {
        let Some(rule) = rules.iter().find(|r| r.rule_type == detector.rule_type()) else {
            continue;
        };
        detector.set_enabled(rule.enabled);
        if rule.config != serde_json::json!({}) {
            if let Err(e) = detector.configure(rule.config.clone()) {
                tracing::warn!(
                    rule_type = ?rule.rule_type,
                    error = %e,
                    "stored rule config rejected, keeping detector default"
                );
            }
        }
    }
    detectors
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cartographus=info".parse()?),
        )
        .json()
        .init();

    let cfg = config::Config::from_env().map_err(|e| anyhow::anyhow!(e))?;
    std::fs::create_dir_all(&cfg.data_dir)?;
    let db_path = format!("{}/cartographus.db", cfg.data_dir);

    let backend = DuckDbBackend::open(&db_path, &cfg.duckdb_memory_limit).await?;
    let history = Arc::new(cartographus_detect::cache::from_config(
        backend.clone(),
        &cfg,
    ));
    let backend = Arc::new(backend);

    let rules = backend.list_rules().await?;
    let vpn_lookup: Arc<dyn VpnLookupService> = Arc::new(NoopVpnLookup);
    let detectors = build_detectors(Arc::clone(&history), &rules, vpn_lookup);

    let metrics = Arc::new(Metrics::new());
    let broadcaster = Arc::new(BroadcastChannel::new(256, Arc::clone(&metrics)));

    let engine = Arc::new(Engine::new(
        backend.clone(),
        backend.clone(),
        history.clone(),
        detectors,
        Vec::new(),
        Some(broadcaster as Arc<dyn cartographus_core::broadcaster::Broadcaster>),
        Arc::clone(&metrics),
        &cfg,
    ));

    let cancellation = CancellationToken::new();

    let violation_task = {
        let engine = Arc::clone(&engine);
        let cancellation = cancellation.clone();
        tokio::spawn(async move { engine.run(cancellation).await })
    };
    let recovery_task = {
        let engine = Arc::clone(&engine);
        let cancellation = cancellation.clone();
        let interval = cfg.trust_recovery_interval();
        let amount = cfg.trust_recovery_amount;
        tokio::spawn(async move { engine.run_trust_recovery(interval, amount, cancellation).await })
    };

    info!(%db_path, "cartographus detection engine started");

    // Event ingestion is left to the deployment's message-bus transport,
    // which decodes frames with `cartographus_engine::bus::decode_event_envelope`
    // and calls `engine.process`. This binary only owns lifecycle and the
    // background trust-score machinery.
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    cancellation.cancel();

    let _ = tokio::join!(violation_task, recovery_task);
    Ok(())
}
