//! Three-tier search cache
//!
//! L1 is an in-process bounded map with TTL, L2 an optional distributed KV
//! (Redis), L3 a warehouse lookup that reconstitutes recent classified
//! events for the same company. Reads consult tiers in order and populate
//! the layers above the one that hit. Any tier exception is logged and
//! treated as a miss: cache trouble never fails a request.

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use redis::AsyncCommands;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::config::CacheConfig;
use crate::models::{RiskLabel, Source};
use crate::services::warehouse::{WarehouseClient, tables};
use crate::utils::SearchWindow;

#[derive(Clone)]
struct L1Entry {
    value: Value,
    cached_at: Instant,
}

#[derive(Debug, Default)]
struct TierCounters {
    l1_hits: AtomicU64,
    l1_misses: AtomicU64,
    l2_hits: AtomicU64,
    l2_misses: AtomicU64,
    l3_hits: AtomicU64,
    l3_misses: AtomicU64,
}

pub struct CacheTier {
    l1: DashMap<String, L1Entry>,
    l1_capacity: usize,
    l1_ttl: Duration,
    l2: Option<redis::aio::ConnectionManager>,
    l2_ttl_secs: u64,
    warehouse: Arc<WarehouseClient>,
    counters: TierCounters,
}

impl CacheTier {
    /// Build the tier; an unreachable Redis degrades to a two-tier cache
    /// rather than failing startup.
    pub async fn new(config: &CacheConfig, warehouse: Arc<WarehouseClient>) -> Self {
        let l2 = if config.redis_url.is_empty() {
            tracing::info!("L2 cache disabled (no redis_url configured)");
            None
        } else {
            match redis::Client::open(config.redis_url.as_str()) {
                Ok(client) => match client.get_connection_manager().await {
                    Ok(manager) => {
                        tracing::info!("L2 cache connected");
                        Some(manager)
                    },
                    Err(e) => {
                        tracing::warn!("L2 cache unavailable, continuing without it: {}", e);
                        None
                    },
                },
                Err(e) => {
                    tracing::warn!("Invalid redis_url, continuing without L2: {}", e);
                    None
                },
            }
        };

        Self {
            l1: DashMap::new(),
            l1_capacity: config.l1_capacity,
            l1_ttl: Duration::from_secs(config.l1_ttl_secs),
            l2,
            l2_ttl_secs: config.l2_ttl_secs,
            warehouse,
            counters: TierCounters::default(),
        }
    }

    /// Derive the cache key from canonicalized search parameters.
    /// Source ordering does not matter: the list is sorted before hashing.
    pub fn derive_key(
        company_name: &str,
        window: SearchWindow,
        days_back: Option<i64>,
        active_sources: &[Source],
    ) -> String {
        let mut sources: Vec<String> = active_sources.iter().map(|s| s.as_str()).collect();
        sources.sort();

        let canonical = format!(
            "{}|{}|{}|{}|{}",
            company_name.trim().to_lowercase(),
            window.start,
            window.end,
            days_back.map(|d| d.to_string()).unwrap_or_default(),
            sources.join(",")
        );

        format!("{:x}", md5::compute(canonical.as_bytes()))
    }

    /// Multi-layer lookup. `cache_age_hours` bounds the L3 event age.
    pub async fn get(
        &self,
        cache_key: &str,
        company_name: &str,
        window: SearchWindow,
        cache_age_hours: i64,
    ) -> Option<Value> {
        // L1: in-process
        if let Some(value) = self.get_l1(cache_key) {
            self.counters.l1_hits.fetch_add(1, Ordering::Relaxed);
            tracing::info!("L1 cache hit for {}", company_name);
            return Some(value);
        }
        self.counters.l1_misses.fetch_add(1, Ordering::Relaxed);

        // L2: distributed KV
        if let Some(value) = self.get_l2(cache_key).await {
            self.counters.l2_hits.fetch_add(1, Ordering::Relaxed);
            tracing::info!("L2 cache hit for {}", company_name);
            self.set_l1(cache_key, value.clone());
            return Some(value);
        }
        if self.l2.is_some() {
            self.counters.l2_misses.fetch_add(1, Ordering::Relaxed);
        }

        // L3: warehouse
        if let Some(value) = self.get_l3(company_name, window, cache_age_hours).await {
            self.counters.l3_hits.fetch_add(1, Ordering::Relaxed);
            tracing::info!("L3 cache hit for {}", company_name);
            self.set_l1(cache_key, value.clone());
            self.set_l2(cache_key, &value).await;
            return Some(value);
        }
        self.counters.l3_misses.fetch_add(1, Ordering::Relaxed);

        tracing::info!("Cache miss for {}", company_name);
        None
    }

    /// Populate L1 and L2 after a fresh search. L3 is populated implicitly
    /// by the write queue persisting the events themselves.
    pub async fn put(&self, cache_key: &str, value: &Value) {
        self.set_l1(cache_key, value.clone());
        self.set_l2(cache_key, value).await;
    }

    /// L1/L2-only lookup for callers with no warehouse reconstitution
    /// (semantic search results, for instance).
    pub async fn get_fast(&self, cache_key: &str) -> Option<Value> {
        if let Some(value) = self.get_l1(cache_key) {
            self.counters.l1_hits.fetch_add(1, Ordering::Relaxed);
            return Some(value);
        }
        self.counters.l1_misses.fetch_add(1, Ordering::Relaxed);

        if let Some(value) = self.get_l2(cache_key).await {
            self.counters.l2_hits.fetch_add(1, Ordering::Relaxed);
            self.set_l1(cache_key, value.clone());
            return Some(value);
        }
        if self.l2.is_some() {
            self.counters.l2_misses.fetch_add(1, Ordering::Relaxed);
        }
        None
    }

    /// Key for non-search cached values, namespaced to avoid collisions
    /// with search keys.
    pub fn derive_value_key(namespace: &str, payload: &str) -> String {
        format!("{:x}", md5::compute(format!("{}|{}", namespace, payload).as_bytes()))
    }

    pub fn stats(&self) -> Value {
        json!({
            "l1": {
                "hits": self.counters.l1_hits.load(Ordering::Relaxed),
                "misses": self.counters.l1_misses.load(Ordering::Relaxed),
                "entries": self.l1.len(),
                "capacity": self.l1_capacity,
            },
            "l2": {
                "enabled": self.l2.is_some(),
                "hits": self.counters.l2_hits.load(Ordering::Relaxed),
                "misses": self.counters.l2_misses.load(Ordering::Relaxed),
            },
            "l3": {
                "hits": self.counters.l3_hits.load(Ordering::Relaxed),
                "misses": self.counters.l3_misses.load(Ordering::Relaxed),
            },
        })
    }

    // ========================================
    // L1: in-process bounded map with TTL
    // ========================================

    fn get_l1(&self, cache_key: &str) -> Option<Value> {
        let entry = self.l1.get(cache_key)?;
        if entry.cached_at.elapsed() < self.l1_ttl {
            return Some(entry.value.clone());
        }
        drop(entry);
        self.l1.remove(cache_key);
        None
    }

    fn set_l1(&self, cache_key: &str, value: Value) {
        if self.l1.len() >= self.l1_capacity {
            // Evict the oldest-cached entry on overflow
            let oldest = self
                .l1
                .iter()
                .min_by_key(|e| e.value().cached_at)
                .map(|e| e.key().clone());
            if let Some(key) = oldest {
                self.l1.remove(&key);
            }
        }

        self.l1
            .insert(cache_key.to_string(), L1Entry { value, cached_at: Instant::now() });
    }

    // ========================================
    // L2: distributed KV (optional)
    // ========================================

    async fn get_l2(&self, cache_key: &str) -> Option<Value> {
        let mut conn = self.l2.clone()?;
        match conn.get::<_, Option<String>>(format!("search:{}", cache_key)).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!("L2 entry corrupt, treating as miss: {}", e);
                    None
                },
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("L2 get failed, treating as miss: {}", e);
                None
            },
        }
    }

    async fn set_l2(&self, cache_key: &str, value: &Value) {
        let Some(mut conn) = self.l2.clone() else {
            return;
        };
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("L2 serialization failed, skipping: {}", e);
                return;
            },
        };
        if let Err(e) = conn
            .set_ex::<_, _, ()>(format!("search:{}", cache_key), raw, self.l2_ttl_secs)
            .await
        {
            tracing::warn!("L2 set failed: {}", e);
        }
    }

    // ========================================
    // L3: warehouse reconstitution
    // ========================================

    /// Look for recent classified events for the company and rebuild a
    /// results envelope with `method = "cached"` on each item.
    async fn get_l3(
        &self,
        company_name: &str,
        window: SearchWindow,
        cache_age_hours: i64,
    ) -> Option<Value> {
        let cutoff = (Utc::now() - ChronoDuration::hours(cache_age_hours)).to_rfc3339();
        let sql = format!(
            "SELECT event_id, source, title, text, section, url, pub_date, risk_label, \
             confidence, created_at FROM `{}` WHERE company_name = '{}' \
             AND created_at > '{}' ORDER BY pub_date DESC LIMIT 1000",
            self.warehouse.qualified(tables::EVENTS),
            WarehouseClient::escape(company_name),
            cutoff,
        );

        let rows = match self.warehouse.query(&sql).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!("L3 lookup failed, treating as miss: {}", e);
                return None;
            },
        };

        if rows.is_empty() {
            return None;
        }

        let items: Vec<Value> = rows
            .iter()
            .filter(|row| {
                // Respect the requested window when the row has a pub_date
                row.get("pub_date")
                    .and_then(Value::as_str)
                    .and_then(crate::utils::parse_flexible_date)
                    .map(|date| window.contains(date))
                    .unwrap_or(true)
            })
            .map(|row| {
                let label = row
                    .get("risk_label")
                    .and_then(Value::as_str)
                    .and_then(RiskLabel::parse)
                    .unwrap_or(RiskLabel::Unknown);
                let text = row.get("text").and_then(Value::as_str).unwrap_or_default();
                let summary: String = text.chars().take(200).collect();

                json!({
                    "event_id": row.get("event_id").cloned().unwrap_or(Value::Null),
                    "source": row.get("source").cloned().unwrap_or(Value::Null),
                    "title": row.get("title").cloned().unwrap_or(Value::Null),
                    "summary": summary,
                    "url": row.get("url").cloned().unwrap_or(Value::Null),
                    "pub_date": row.get("pub_date").cloned().unwrap_or(Value::Null),
                    "section": row.get("section").cloned().unwrap_or(Value::Null),
                    "risk_level": label.as_str(),
                    "confidence": row.get("confidence").cloned().unwrap_or(json!(0.5)),
                    "method": "cached",
                    "risk_color": label.color().as_str(),
                })
            })
            .collect();

        if items.is_empty() {
            return None;
        }

        let mut sources: Vec<String> = rows
            .iter()
            .filter_map(|row| row.get("source").and_then(Value::as_str))
            .map(|s| s.to_string())
            .collect();
        sources.sort();
        sources.dedup();

        Some(json!({
            "results": items,
            "total_events": items.len(),
            "sources": sources,
        }))
    }
}
