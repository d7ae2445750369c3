use std::collections::HashMap;
use std::time::{Duration as StdDuration, Instant};

use async_trait::async_trait;
use cartographus_core::event::{DetectionEvent, Geolocation};
use cartographus_core::history::EventHistory;
use chrono::Duration;
use tokio::sync::RwLock;

/// Per-cache hit/miss counters, exposed for observability.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub device_ip_hits: u64,
    pub device_ip_misses: u64,
    pub last_event_hits: u64,
    pub last_event_misses: u64,
    pub geolocation_negative_hits: u64,
}

struct DeviceIpEntry {
    ips: Vec<(String, Instant)>,
    touched_at: Instant,
}

struct LastEventEntry {
    event: DetectionEvent,
    expires_at: Instant,
}

struct Counters {
    device_ip_hits: u64,
    device_ip_misses: u64,
    last_event_hits: u64,
    last_event_misses: u64,
    geolocation_negative_hits: u64,
}

impl Default for Counters {
    fn default() -> Self {
        Counters {
            device_ip_hits: 0,
            device_ip_misses: 0,
            last_event_hits: 0,
            last_event_misses: 0,
            geolocation_negative_hits: 0,
        }
    }
}

/// Wraps any [`EventHistory`] implementation with an in-memory layer per
/// the sliding-window/TTL scheme: a device-IP window store, a short-TTL
/// last-event cache, and a bounded negative-lookup cache for IPs known to
/// have no geolocation row. The geolocation cache never stores a positive
/// value — only presence of a prior miss — so there is nothing to return
/// stale and no path where a cached hit silently fails to surface.
pub struct CachedEventHistory<H: EventHistory> {
    inner: H,
    device_ip_window: Duration,
    device_ip_capacity: usize,
    last_event_ttl: StdDuration,
    geo_negative_capacity: usize,
    geo_negative_ttl: StdDuration,

    device_ips: RwLock<HashMap<String, DeviceIpEntry>>,
    last_events: RwLock<HashMap<String, LastEventEntry>>,
    geo_negative: RwLock<HashMap<String, Instant>>,
    counters: RwLock<Counters>,
}

fn device_key(machine_id: &str, server_id: &str) -> String {
    format!("{machine_id}:{server_id}")
}

fn user_server_key(user_id: i64, server_id: &str) -> String {
    format!("{user_id}:{server_id}")
}

impl<H: EventHistory> CachedEventHistory<H> {
    pub fn new(
        inner: H,
        device_ip_window: Duration,
        device_ip_capacity: usize,
        last_event_ttl: StdDuration,
        geo_negative_capacity: usize,
        geo_negative_ttl: StdDuration,
    ) -> Self {
        CachedEventHistory {
            inner,
            device_ip_window,
            device_ip_capacity,
            last_event_ttl,
            geo_negative_capacity,
            geo_negative_ttl,
            device_ips: RwLock::new(HashMap::new()),
            last_events: RwLock::new(HashMap::new()),
            geo_negative: RwLock::new(HashMap::new()),
            counters: RwLock::new(Counters::default()),
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let counters = self.counters.read().await;
        CacheStats {
            device_ip_hits: counters.device_ip_hits,
            device_ip_misses: counters.device_ip_misses,
            last_event_hits: counters.last_event_hits,
            last_event_misses: counters.last_event_misses,
            geolocation_negative_hits: counters.geolocation_negative_hits,
        }
    }

    async fn evict_device_ips_if_full(&self, map: &mut HashMap<String, DeviceIpEntry>) {
        if map.len() < self.device_ip_capacity {
            return;
        }
        if let Some(oldest_key) = map
            .iter()
            .min_by_key(|(_, entry)| entry.touched_at)
            .map(|(key, _)| key.clone())
        {
            map.remove(&oldest_key);
        }
    }

    async fn evict_geo_negative_if_full(&self, map: &mut HashMap<String, Instant>) {
        if map.len() < self.geo_negative_capacity {
            return;
        }
        if let Some(oldest_key) = map
            .iter()
            .min_by_key(|(_, inserted_at)| **inserted_at)
            .map(|(key, _)| key.clone())
        {
            map.remove(&oldest_key);
        }
    }
}

#[async_trait]
impl<H: EventHistory> EventHistory for CachedEventHistory<H> {
    async fn last_event_for_user(
        &self,
        user_id: i64,
        server_id: &str,
    ) -> anyhow::Result<Option<DetectionEvent>> {
        let key = user_server_key(user_id, server_id);
        let now = Instant::now();
        {
            let cache = self.last_events.read().await;
            if let Some(entry) = cache.get(&key) {
                if entry.expires_at > now {
                    self.counters.write().await.last_event_hits += 1;
                    return Ok(Some(entry.event.clone()));
                }
            }
        }
        self.counters.write().await.last_event_misses += 1;
        let result = self.inner.last_event_for_user(user_id, server_id).await?;
        if let Some(ref event) = result {
            let mut cache = self.last_events.write().await;
            cache.insert(
                key,
                LastEventEntry {
                    event: event.clone(),
                    expires_at: now + self.last_event_ttl,
                },
            );
        }
        Ok(result)
    }

    async fn active_streams_for_user(
        &self,
        user_id: i64,
        server_id: &str,
    ) -> anyhow::Result<Vec<DetectionEvent>> {
        self.inner.active_streams_for_user(user_id, server_id).await
    }

    async fn recent_ips_for_device(
        &self,
        machine_id: &str,
        server_id: &str,
        window: Duration,
    ) -> anyhow::Result<Vec<String>> {
        let key = device_key(machine_id, server_id);
        let now = Instant::now();
        {
            let cache = self.device_ips.read().await;
            if let Some(entry) = cache.get(&key) {
                if !entry.ips.is_empty() {
                    self.counters.write().await.device_ip_hits += 1;
                    return Ok(entry.ips.iter().map(|(ip, _)| ip.clone()).collect());
                }
            }
        }
        self.counters.write().await.device_ip_misses += 1;
        let ips = self
            .inner
            .recent_ips_for_device(machine_id, server_id, window)
            .await?;
        if !ips.is_empty() {
            let mut cache = self.device_ips.write().await;
            self.evict_device_ips_if_full(&mut cache).await;
            cache.insert(
                key,
                DeviceIpEntry {
                    ips: ips.iter().map(|ip| (ip.clone(), now)).collect(),
                    touched_at: now,
                },
            );
        }
        Ok(ips)
    }

    async fn simultaneous_locations_for_user(
        &self,
        user_id: i64,
        server_id: &str,
        window: Duration,
    ) -> anyhow::Result<Vec<DetectionEvent>> {
        self.inner
            .simultaneous_locations_for_user(user_id, server_id, window)
            .await
    }

    async fn geolocation_for_ip(&self, ip: &str) -> anyhow::Result<Option<Geolocation>> {
        let now = Instant::now();
        {
            let cache = self.geo_negative.read().await;
            if let Some(inserted_at) = cache.get(ip) {
                if now.duration_since(*inserted_at) < self.geo_negative_ttl {
                    self.counters.write().await.geolocation_negative_hits += 1;
                    return Ok(None);
                }
            }
        }
        let result = self.inner.geolocation_for_ip(ip).await?;
        if result.is_none() {
            let mut cache = self.geo_negative.write().await;
            self.evict_geo_negative_if_full(&mut cache).await;
            cache.insert(ip.to_string(), now);
        }
        Ok(result)
    }

    async fn record_event(&self, event: &DetectionEvent) -> anyhow::Result<()> {
        self.inner.record_event(event).await?;

        let now = Instant::now();
        let device_key = device_key(&event.machine_id, &event.server_id);
        if !event.ip_address.is_empty() {
            let mut cache = self.device_ips.write().await;
            let window = self.device_ip_window;
            let entry = cache.entry(device_key).or_insert_with(|| DeviceIpEntry {
                ips: Vec::new(),
                touched_at: now,
            });
            entry.touched_at = now;
            entry
                .ips
                .retain(|(_, seen_at)| now.duration_since(*seen_at) < to_std(window));
            if !entry.ips.iter().any(|(ip, _)| ip == &event.ip_address) {
                entry.ips.push((event.ip_address.clone(), now));
            }
            if cache.len() > self.device_ip_capacity {
                self.evict_device_ips_if_full(&mut cache).await;
            }
        }

        let last_event_key = user_server_key(event.user_id, &event.server_id);
        let mut last_events = self.last_events.write().await;
        last_events.insert(
            last_event_key,
            LastEventEntry {
                event: event.clone(),
                expires_at: now + self.last_event_ttl,
            },
        );

        Ok(())
    }
}

fn to_std(d: Duration) -> StdDuration {
    d.to_std().unwrap_or(StdDuration::from_secs(0))
}

/// Convenience constructor reading window/capacity/TTL straight from
/// [`cartographus_core::config::Config`].
pub fn from_config<H: EventHistory>(
    inner: H,
    config: &cartographus_core::config::Config,
) -> CachedEventHistory<H> {
    CachedEventHistory::new(
        inner,
        Duration::seconds(config.device_ip_window_secs),
        config.device_ip_cache_capacity,
        StdDuration::from_secs(config.last_event_ttl_secs),
        config.geolocation_cache_capacity,
        StdDuration::from_secs(config.geolocation_cache_ttl_secs),
    )
}

#[cfg(test)]
mod tests {
    use cartographus_core::event::DetectionEvent;
    use cartographus_duckdb::DuckDbBackend;

    use super::*;

    fn sample_event(user_id: i64, machine_id: &str, ip: &str) -> DetectionEvent {
        DetectionEvent {
            event_id: format!("evt-{user_id}-{ip}"),
            session_key: format!("sess-{user_id}"),
            event_type: "start".to_string(),
            server_id: "srv1".to_string(),
            timestamp: chrono::Utc::now(),
            user_id,
            machine_id: machine_id.to_string(),
            ip_address: ip.to_string(),
            ..Default::default()
        }
    }

    async fn cache_with_window(window: Duration) -> CachedEventHistory<DuckDbBackend> {
        let inner = DuckDbBackend::open_in_memory().await.expect("open db");
        CachedEventHistory::new(
            inner,
            window,
            10_000,
            StdDuration::from_secs(30),
            10_000,
            StdDuration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn record_event_makes_the_device_ip_visible_within_the_same_batch() {
        let cache = cache_with_window(Duration::minutes(5)).await;
        let event = sample_event(1, "machine-a", "203.0.113.1");
        cache.record_event(&event).await.expect("record event");

        let ips = cache
            .recent_ips_for_device("machine-a", "srv1", Duration::minutes(5))
            .await
            .expect("recent ips");
        assert_eq!(ips, vec!["203.0.113.1".to_string()]);
        assert_eq!(cache.stats().await.device_ip_hits, 1);
    }

    #[tokio::test]
    async fn record_event_deduplicates_repeated_ips_for_the_same_device() {
        let cache = cache_with_window(Duration::minutes(5)).await;
        cache
            .record_event(&sample_event(1, "machine-a", "203.0.113.1"))
            .await
            .expect("record 1");
        cache
            .record_event(&sample_event(1, "machine-a", "203.0.113.1"))
            .await
            .expect("record 2");
        cache
            .record_event(&sample_event(1, "machine-a", "203.0.113.2"))
            .await
            .expect("record 3");

        let ips = cache
            .recent_ips_for_device("machine-a", "srv1", Duration::minutes(5))
            .await
            .expect("recent ips");
        assert_eq!(ips.len(), 2);
    }

    #[tokio::test]
    async fn record_event_populates_the_last_event_cache() {
        let cache = cache_with_window(Duration::minutes(5)).await;
        let event = sample_event(9, "machine-z", "198.51.100.1");
        cache.record_event(&event).await.expect("record event");

        let last = cache
            .last_event_for_user(9, "srv1")
            .await
            .expect("last event")
            .expect("event present");
        assert_eq!(last.event_id, event.event_id);
        assert_eq!(cache.stats().await.last_event_hits, 1);
    }

    #[tokio::test]
    async fn geolocation_negative_cache_reports_misses_without_repeated_lookups() {
        let cache = cache_with_window(Duration::minutes(5)).await;
        let first = cache
            .geolocation_for_ip("203.0.113.50")
            .await
            .expect("first lookup");
        assert!(first.is_none());

        let second = cache
            .geolocation_for_ip("203.0.113.50")
            .await
            .expect("second lookup");
        assert!(second.is_none());
        assert_eq!(cache.stats().await.geolocation_negative_hits, 1);
    }
}
