//! Hybrid vector storage
//!
//! The warehouse is the store of record: vectors are serialized as base64
//! little-endian float32 byte arrays next to denormalized filter columns.
//! A local flat index gives fast in-process search, and an optional remote
//! vector service contributes a third backend. Reads fan out to every
//! configured backend in parallel and merge by id keeping the best score.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use reqwest::Client;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::models::SemanticHit;
use crate::services::warehouse::{WarehouseClient, tables};

const TITLE_LIMIT: usize = 500;
const SUMMARY_LIMIT: usize = 1000;
const WAREHOUSE_SCAN_LIMIT: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("Vector encoding error: {0}")]
    Codec(String),

    #[error("Warehouse vector write failed: {0}")]
    Warehouse(String),
}

/// Denormalized metadata stored beside each vector for query predicates.
#[derive(Debug, Clone, Default)]
pub struct VectorMetadata {
    pub company_name: Option<String>,
    pub risk_level: Option<String>,
    pub publication_date: Option<String>,
    pub source: Option<String>,
    pub title: Option<String>,
    pub text_summary: Option<String>,
    pub embedding_model: String,
}

/// Filters accepted by `search`.
#[derive(Debug, Clone, Default)]
pub struct VectorFilters {
    pub company_name: Option<String>,
    pub risk_level: Option<String>,
    pub source: Option<String>,
}

#[derive(Clone)]
struct LocalVector {
    vector: Vec<f32>,
    metadata: HashMap<String, Value>,
    document: String,
}

/// Encode a vector as base64 over little-endian f32 bytes.
pub fn encode_vector(vector: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    BASE64.encode(bytes)
}

/// Decode a base64 little-endian f32 byte array.
pub fn decode_vector(encoded: &str) -> Result<Vec<f32>, VectorStoreError> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| VectorStoreError::Codec(e.to_string()))?;
    if bytes.len() % 4 != 0 {
        return Err(VectorStoreError::Codec(format!(
            "byte length {} is not a multiple of 4",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += *x as f64 * *y as f64;
        norm_a += *x as f64 * *x as f64;
        norm_b += *y as f64 * *y as f64;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

pub struct VectorStore {
    warehouse: Arc<WarehouseClient>,
    local: DashMap<String, LocalVector>,
    /// Remote vector service; None when not configured
    remote: Option<RemoteVectorService>,
}

struct RemoteVectorService {
    http_client: Client,
    base_url: String,
}

impl VectorStore {
    pub fn new(warehouse: Arc<WarehouseClient>, remote_url: &str, timeout_secs: u64) -> Self {
        let remote = if remote_url.is_empty() {
            None
        } else {
            let http_client = Client::builder()
                .pool_max_idle_per_host(16)
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_else(|e| {
                    tracing::error!(
                        "Failed to build vector service HTTP client: {}. Using defaults.",
                        e
                    );
                    Client::default()
                });
            Some(RemoteVectorService {
                http_client,
                base_url: remote_url.trim_end_matches('/').to_string(),
            })
        };

        Self { warehouse, local: DashMap::new(), remote }
    }

    /// Store a vector in every configured backend concurrently.
    /// Succeeds iff the warehouse (store of record) write succeeded.
    pub async fn add(
        &self,
        event_id: &str,
        vector: &[f32],
        metadata: &VectorMetadata,
        document: &str,
    ) -> Result<(), VectorStoreError> {
        let row = self.build_row(event_id, vector, metadata, document);
        let rows = [row];

        let warehouse_write = self.warehouse.insert_all(tables::VECTORS, &rows);
        let remote_write = self.remote_add(event_id, document, metadata);

        let (warehouse_result, _) = tokio::join!(warehouse_write, remote_write);

        // Local index is synchronous and cheap; populate regardless
        self.local.insert(
            event_id.to_string(),
            LocalVector {
                vector: vector.to_vec(),
                metadata: metadata_map(event_id, metadata),
                document: document.to_string(),
            },
        );

        warehouse_result.map_err(|e| VectorStoreError::Warehouse(e.to_string()))?;
        tracing::debug!("Vector stored for {}", event_id);
        Ok(())
    }

    /// Parallel read fan-out with score merging: dedup on id keeping the max
    /// score, sort descending, truncate to k.
    pub async fn search(
        &self,
        query_text: &str,
        query_vector: &[f32],
        k: usize,
        filters: &VectorFilters,
    ) -> Vec<SemanticHit> {
        let mut backends: Vec<
            std::pin::Pin<Box<dyn std::future::Future<Output = Vec<SemanticHit>> + Send + '_>>,
        > = Vec::new();

        backends.push(Box::pin(self.search_warehouse(query_vector, filters)));
        backends.push(Box::pin(async move { self.search_local(query_vector, filters) }));
        if self.remote.is_some() {
            backends.push(Box::pin(self.search_remote(query_text, k, filters)));
        }

        let mut merged: HashMap<String, SemanticHit> = HashMap::new();
        for hits in join_all(backends).await {
            for hit in hits {
                match merged.get_mut(&hit.id) {
                    Some(existing) if existing.score >= hit.score => {},
                    Some(existing) => *existing = hit,
                    None => {
                        merged.insert(hit.id.clone(), hit);
                    },
                }
            }
        }

        let mut hits: Vec<SemanticHit> = merged.into_values().collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        hits
    }

    /// Copy every vector in the local index into the warehouse.
    pub async fn migrate(&self) -> Value {
        let snapshot: Vec<(String, LocalVector)> = self
            .local
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let total = snapshot.len();
        let mut migrated = 0usize;
        let mut failed = 0usize;

        for (event_id, local) in snapshot {
            let metadata = VectorMetadata {
                company_name: string_field(&local.metadata, "company"),
                risk_level: string_field(&local.metadata, "risk_level"),
                publication_date: string_field(&local.metadata, "fecha"),
                source: string_field(&local.metadata, "source"),
                title: string_field(&local.metadata, "titulo"),
                text_summary: Some(local.document.clone()),
                embedding_model: string_field(&local.metadata, "embedding_model")
                    .unwrap_or_default(),
            };
            let row = self.build_row(&event_id, &local.vector, &metadata, &local.document);

            match self.warehouse.insert_all(tables::VECTORS, &[row]).await {
                Ok(()) => migrated += 1,
                Err(e) => {
                    tracing::warn!("Vector migration failed for {}: {}", event_id, e);
                    failed += 1;
                },
            }
        }

        tracing::info!("Vector migration: {}/{} migrated, {} failed", migrated, total, failed);
        json!({ "migrated": migrated, "failed": failed, "total": total })
    }

    pub fn stats(&self) -> Value {
        json!({
            "local_vectors": self.local.len(),
            "remote_configured": self.remote.is_some(),
        })
    }

    fn build_row(
        &self,
        event_id: &str,
        vector: &[f32],
        metadata: &VectorMetadata,
        document: &str,
    ) -> Value {
        json!({
            "event_id": event_id,
            "vector_embedding": encode_vector(vector),
            "vector_dimension": vector.len(),
            "embedding_model": metadata.embedding_model,
            "vector_created_at": Utc::now().to_rfc3339(),
            "metadata": serde_json::to_string(&metadata_map(event_id, metadata))
                .unwrap_or_default(),
            "is_active": true,
            "company_name": metadata.company_name,
            "risk_level": metadata.risk_level,
            "publication_date": metadata.publication_date,
            "source": metadata.source,
            "title": metadata.title.as_deref().map(|t| truncate(t, TITLE_LIMIT)),
            "text_summary": metadata
                .text_summary
                .as_deref()
                .map(|t| truncate(t, SUMMARY_LIMIT))
                .or_else(|| Some(truncate(document, SUMMARY_LIMIT))),
        })
    }

    // ========================================
    // Warehouse backend
    // ========================================

    async fn search_warehouse(
        &self,
        query_vector: &[f32],
        filters: &VectorFilters,
    ) -> Vec<SemanticHit> {
        let mut where_clauses = vec!["is_active = TRUE".to_string()];
        if let Some(company) = &filters.company_name {
            where_clauses.push(format!("company_name = '{}'", WarehouseClient::escape(company)));
        }
        if let Some(risk) = &filters.risk_level {
            where_clauses.push(format!("risk_level = '{}'", WarehouseClient::escape(risk)));
        }
        if let Some(source) = &filters.source {
            where_clauses.push(format!("source = '{}'", WarehouseClient::escape(source)));
        }

        let sql = format!(
            "SELECT event_id, vector_embedding, company_name, title, text_summary, source, \
             risk_level, publication_date, metadata, vector_created_at FROM `{}` WHERE {} LIMIT {}",
            self.warehouse.qualified(tables::VECTORS),
            where_clauses.join(" AND "),
            WAREHOUSE_SCAN_LIMIT,
        );

        let rows = match self.warehouse.query(&sql).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!("Warehouse vector search failed: {}", e);
                return Vec::new();
            },
        };

        rows.into_iter()
            .filter_map(|row| {
                let encoded = row.get("vector_embedding")?.as_str()?;
                let stored = match decode_vector(encoded) {
                    Ok(stored) => stored,
                    Err(e) => {
                        tracing::warn!("Skipping corrupt vector row: {}", e);
                        return None;
                    },
                };
                let score = cosine_similarity(query_vector, &stored);

                let mut metadata: HashMap<String, Value> = row
                    .get("metadata")
                    .and_then(Value::as_str)
                    .and_then(|raw| serde_json::from_str(raw).ok())
                    .unwrap_or_default();
                for (key, column) in [
                    ("company", "company_name"),
                    ("titulo", "title"),
                    ("fecha", "publication_date"),
                    ("source", "source"),
                    ("risk_level", "risk_level"),
                    ("created_at", "vector_created_at"),
                ] {
                    if let Some(value) = row.get(column) {
                        metadata.entry(key.to_string()).or_insert_with(|| value.clone());
                    }
                }

                let document = row
                    .get("text_summary")
                    .and_then(Value::as_str)
                    .or_else(|| row.get("title").and_then(Value::as_str))
                    .unwrap_or_default()
                    .to_string();

                Some(SemanticHit {
                    id: row.get("event_id")?.as_str()?.to_string(),
                    score,
                    metadata,
                    document,
                })
            })
            .collect()
    }

    // ========================================
    // Local flat index
    // ========================================

    fn search_local(&self, query_vector: &[f32], filters: &VectorFilters) -> Vec<SemanticHit> {
        self.local
            .iter()
            .filter(|entry| local_matches_filters(entry.value(), filters))
            .map(|entry| SemanticHit {
                id: entry.key().clone(),
                score: cosine_similarity(query_vector, &entry.value().vector),
                metadata: entry.value().metadata.clone(),
                document: entry.value().document.clone(),
            })
            .collect()
    }

    // ========================================
    // Remote vector service
    // ========================================

    async fn remote_add(&self, event_id: &str, document: &str, metadata: &VectorMetadata) {
        let Some(remote) = &self.remote else {
            return;
        };

        let body = json!({
            "documents": [{
                "id": event_id,
                "text": document,
                "metadata": metadata_map(event_id, metadata),
            }]
        });

        let url = format!("{}/embed", remote.base_url);
        match remote.http_client.post(&url).json(&body).send().await {
            Ok(resp) if !resp.status().is_success() => {
                tracing::warn!("Remote vector add failed: HTTP {}", resp.status());
            },
            Err(e) => tracing::warn!("Remote vector add failed: {}", e),
            _ => {},
        }
    }

    async fn search_remote(
        &self,
        query_text: &str,
        k: usize,
        filters: &VectorFilters,
    ) -> Vec<SemanticHit> {
        let Some(remote) = &self.remote else {
            return Vec::new();
        };

        let mut body = json!({ "query": query_text, "k": k });
        if let Some(company) = &filters.company_name {
            body["filter"] = json!({ "company": company });
        }

        let url = format!("{}/search", remote.base_url);
        let response = match remote.http_client.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                tracing::warn!("Remote vector search failed: HTTP {}", resp.status());
                return Vec::new();
            },
            Err(e) => {
                tracing::warn!("Remote vector search failed: {}", e);
                return Vec::new();
            },
        };

        let reply: Value = match response.json().await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("Remote vector search reply malformed: {}", e);
                return Vec::new();
            },
        };

        reply
            .get("results")
            .and_then(Value::as_array)
            .map(|results| {
                results
                    .iter()
                    .filter_map(|item| {
                        let id = item.get("id")?.as_str()?.to_string();
                        // A backend reporting a distance is converted to
                        // similarity as 1 - distance
                        let score = item
                            .get("score")
                            .and_then(Value::as_f64)
                            .or_else(|| {
                                item.get("distance").and_then(Value::as_f64).map(|d| 1.0 - d)
                            })?;
                        let metadata = item
                            .get("metadata")
                            .and_then(Value::as_object)
                            .map(|m| m.clone().into_iter().collect())
                            .unwrap_or_default();
                        let document = item
                            .get("document")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        Some(SemanticHit { id, score, metadata, document })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn local_matches_filters(local: &LocalVector, filters: &VectorFilters) -> bool {
    let field_matches = |key: &str, expected: &Option<String>| match expected {
        None => true,
        Some(expected) => local
            .metadata
            .get(key)
            .and_then(Value::as_str)
            .map(|actual| actual == expected)
            .unwrap_or(false),
    };

    field_matches("company", &filters.company_name)
        && field_matches("risk_level", &filters.risk_level)
        && field_matches("source", &filters.source)
}

fn metadata_map(event_id: &str, metadata: &VectorMetadata) -> HashMap<String, Value> {
    let mut map = HashMap::new();
    map.insert("event_id".to_string(), json!(event_id));
    if let Some(company) = &metadata.company_name {
        map.insert("company".to_string(), json!(company));
    }
    if let Some(risk) = &metadata.risk_level {
        map.insert("risk_level".to_string(), json!(risk));
    }
    if let Some(date) = &metadata.publication_date {
        map.insert("fecha".to_string(), json!(date));
    }
    if let Some(source) = &metadata.source {
        map.insert("source".to_string(), json!(source));
    }
    if let Some(title) = &metadata.title {
        map.insert("titulo".to_string(), json!(truncate(title, TITLE_LIMIT)));
    }
    map.insert("embedding_model".to_string(), json!(metadata.embedding_model));
    map
}

fn string_field(metadata: &HashMap<String, Value>, key: &str) -> Option<String> {
    metadata.get(key).and_then(Value::as_str).map(String::from)
}

fn truncate(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_codec_round_trip() {
        let vector: Vec<f32> = (0..384).map(|i| (i as f32) * 0.25 - 40.0).collect();
        let encoded = encode_vector(&vector);
        let decoded = decode_vector(&encoded).unwrap();
        assert_eq!(vector, decoded);
    }

    #[test]
    fn decode_rejects_misaligned_bytes() {
        let encoded = BASE64.encode([1u8, 2, 3]);
        assert!(decode_vector(&encoded).is_err());
        assert!(decode_vector("no es base64 !!!").is_err());
    }

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-9);
        // Degenerate inputs
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn local_search_filters_and_scores() {
        let store = VectorStore::new(
            Arc::new(WarehouseClient::new("http://127.0.0.1:1", "p", "d")),
            "",
            30,
        );

        store.local.insert(
            "BOE:a".to_string(),
            LocalVector {
                vector: vec![1.0, 0.0],
                metadata: HashMap::from([
                    ("company".to_string(), json!("Banco X")),
                    ("risk_level".to_string(), json!("High-Legal")),
                ]),
                document: "sanción del regulador".to_string(),
            },
        );
        store.local.insert(
            "BOE:b".to_string(),
            LocalVector {
                vector: vec![0.0, 1.0],
                metadata: HashMap::from([("company".to_string(), json!("Otra SA"))]),
                document: "otro documento".to_string(),
            },
        );

        let all = store.search_local(&[1.0, 0.0], &VectorFilters::default());
        assert_eq!(all.len(), 2);

        let filtered = store.search_local(
            &[1.0, 0.0],
            &VectorFilters { company_name: Some("Banco X".to_string()), ..Default::default() },
        );
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "BOE:a");
        assert!((filtered[0].score - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn merge_keeps_max_score_per_id() {
        let store = VectorStore::new(
            Arc::new(WarehouseClient::new("http://127.0.0.1:1", "p", "d")),
            "",
            30,
        );

        // Same id in the local index; warehouse is unreachable and contributes
        // nothing, so search exercises dedup across two local-ish hit sets by
        // calling search with k=1 over multiple entries.
        store.local.insert(
            "BOE:a".to_string(),
            LocalVector {
                vector: vec![0.9, 0.1],
                metadata: HashMap::new(),
                document: "doc".to_string(),
            },
        );
        store.local.insert(
            "BOE:c".to_string(),
            LocalVector {
                vector: vec![0.1, 0.9],
                metadata: HashMap::new(),
                document: "doc".to_string(),
            },
        );

        let hits = store
            .search("pregunta", &[1.0, 0.0], 1, &VectorFilters::default())
            .await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "BOE:a");
    }
}
