// Warehouse Module
// Purpose: REST client for the columnar warehouse (store of record) plus the
// non-blocking write queue that fronts it.

mod write_queue;

pub use write_queue::{WriteOperation, WriteQueue, WriteQueueStatus, WriteRequest};

use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use uuid::Uuid;

/// Warehouse table names. Registered here so the write path and the query
/// paths agree on spelling and on primary keys.
pub mod tables {
    pub const RAW_DOCS: &str = "raw_docs";
    pub const EVENTS: &str = "events";
    pub const VECTORS: &str = "vectors";
    pub const SEARCH_CACHE: &str = "search_cache";
    pub const COMPANIES: &str = "companies";
    pub const ASSESSMENTS: &str = "assessments";
    pub const FINANCIAL_METRICS: &str = "financial_metrics";
    pub const USERS: &str = "users";
}

/// Primary key column per table; MERGE statements key on this.
pub fn primary_key(table: &str) -> &'static str {
    match table {
        tables::RAW_DOCS => "raw_id",
        tables::EVENTS => "event_id",
        tables::VECTORS => "event_id",
        tables::SEARCH_CACHE => "cache_key",
        tables::COMPANIES => "name",
        tables::ASSESSMENTS => "assessment_id",
        tables::FINANCIAL_METRICS => "company_name",
        tables::USERS => "user_id",
        _ => "id",
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    #[error("Warehouse request failed: {0}")]
    Request(String),

    #[error("Warehouse rejected rows: {0}")]
    InsertErrors(String),

    #[error("Warehouse response parsing error: {0}")]
    Parse(String),

    #[error("Warehouse query failed ({status}): {body}")]
    Query { status: u16, body: String },
}

/// REST client for the columnar warehouse.
///
/// Wire dialect (bounded interface):
/// - `POST {base}/v1/projects/{p}/datasets/{d}/tables/{t}/insertAll`
///   with `{rows: [{json: {...}}]}` replies `{insert_errors: [...]}`
/// - `POST {base}/v1/projects/{p}/queries` with `{query}` replies `{rows: [...]}`
/// - `POST {base}/v1/projects/{p}/datasets/{d}/tables` with `{table_id, like}`
///   and `DELETE .../tables/{t}` manage ephemeral MERGE staging tables
pub struct WarehouseClient {
    http_client: Client,
    base_url: String,
    project_id: String,
    dataset_id: String,
}

impl WarehouseClient {
    pub fn new(base_url: &str, project_id: &str, dataset_id: &str) -> Self {
        let http_client = Client::builder()
            .pool_max_idle_per_host(16)
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|e| {
                tracing::error!("Failed to build warehouse HTTP client: {}. Using defaults.", e);
                Client::default()
            });

        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            project_id: project_id.to_string(),
            dataset_id: dataset_id.to_string(),
        }
    }

    /// Fully qualified table name for SQL statements.
    pub fn qualified(&self, table: &str) -> String {
        format!("{}.{}.{}", self.project_id, self.dataset_id, table)
    }

    fn tables_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/datasets/{}/tables",
            self.base_url, self.project_id, self.dataset_id
        )
    }

    /// Bulk append rows to a table.
    pub async fn insert_all(&self, table: &str, rows: &[Value]) -> Result<(), WarehouseError> {
        if rows.is_empty() {
            return Ok(());
        }

        let url = format!("{}/{}/insertAll", self.tables_url(), table);
        let body = json!({
            "rows": rows.iter().map(|row| json!({"json": row})).collect::<Vec<_>>()
        });

        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| WarehouseError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WarehouseError::Query { status: status.as_u16(), body });
        }

        let reply: Value = response
            .json()
            .await
            .map_err(|e| WarehouseError::Parse(e.to_string()))?;

        if let Some(errors) = reply.get("insert_errors").and_then(Value::as_array)
            && !errors.is_empty()
        {
            return Err(WarehouseError::InsertErrors(
                serde_json::to_string(errors).unwrap_or_default(),
            ));
        }

        Ok(())
    }

    /// Run a SQL statement, returning result rows (empty for DML).
    pub async fn query(&self, sql: &str) -> Result<Vec<Value>, WarehouseError> {
        let url = format!("{}/v1/projects/{}/queries", self.base_url, self.project_id);
        let body = json!({ "query": sql });

        tracing::debug!("Warehouse query: {}", sql);

        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| WarehouseError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WarehouseError::Query { status: status.as_u16(), body });
        }

        let reply: Value = response
            .json()
            .await
            .map_err(|e| WarehouseError::Parse(e.to_string()))?;

        Ok(reply
            .get("rows")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_table_like(&self, table_id: &str, like: &str) -> Result<(), WarehouseError> {
        let body = json!({ "table_id": table_id, "like": like });

        let response = self
            .http_client
            .post(self.tables_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| WarehouseError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WarehouseError::Query { status: status.as_u16(), body });
        }
        Ok(())
    }

    async fn delete_table(&self, table_id: &str) -> Result<(), WarehouseError> {
        let url = format!("{}/{}", self.tables_url(), table_id);

        let response = self
            .http_client
            .delete(&url)
            .send()
            .await
            .map_err(|e| WarehouseError::Request(e.to_string()))?;

        // A missing staging table is not worth failing cleanup over
        if !response.status().is_success()
            && response.status() != reqwest::StatusCode::NOT_FOUND
        {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(WarehouseError::Query { status: status.as_u16(), body });
        }
        Ok(())
    }

    /// Upsert via ephemeral staging table + MERGE on the table's primary key.
    /// The staging table is dropped in every exit path.
    pub async fn upsert(&self, table: &str, rows: &[Value]) -> Result<(), WarehouseError> {
        if rows.is_empty() {
            return Ok(());
        }

        let staging = format!("temp_{}", &Uuid::new_v4().simple().to_string()[..8]);

        self.create_table_like(&staging, table).await?;

        let result = async {
            self.insert_all(&staging, rows).await?;
            let merge_sql = build_merge_sql(
                &self.qualified(table),
                &self.qualified(&staging),
                rows,
                primary_key(table),
            )?;
            self.query(&merge_sql).await?;
            Ok(())
        }
        .await;

        if let Err(e) = self.delete_table(&staging).await {
            tracing::warn!("Failed to clean up staging table {}: {}", staging, e);
        }

        result
    }

    /// SQL string literal escaping for filter values.
    pub fn escape(value: &str) -> String {
        value.replace('\'', "''")
    }
}

/// Build the MERGE statement for an upsert. Columns are the union of keys
/// across the staged rows, sorted for determinism.
fn build_merge_sql(
    target: &str,
    staging: &str,
    rows: &[Value],
    primary_key: &str,
) -> Result<String, WarehouseError> {
    let mut columns: Vec<String> = rows
        .iter()
        .filter_map(Value::as_object)
        .flat_map(|obj| obj.keys().cloned())
        .collect();
    columns.sort();
    columns.dedup();

    if columns.is_empty() {
        return Err(WarehouseError::Parse("upsert rows carry no columns".to_string()));
    }
    if !columns.iter().any(|c| c == primary_key) {
        return Err(WarehouseError::Parse(format!(
            "upsert rows lack primary key column '{}'",
            primary_key
        )));
    }

    let update_set = columns
        .iter()
        .filter(|c| c.as_str() != primary_key)
        .map(|c| format!("{} = S.{}", c, c))
        .collect::<Vec<_>>()
        .join(", ");

    let insert_columns = columns.join(", ");
    let insert_values = columns
        .iter()
        .map(|c| format!("S.{}", c))
        .collect::<Vec<_>>()
        .join(", ");

    Ok(format!(
        "MERGE `{target}` T USING `{staging}` S ON T.{pk} = S.{pk} \
         WHEN MATCHED THEN UPDATE SET {update_set} \
         WHEN NOT MATCHED THEN INSERT ({insert_columns}) VALUES ({insert_values})",
        target = target,
        staging = staging,
        pk = primary_key,
        update_set = update_set,
        insert_columns = insert_columns,
        insert_values = insert_values,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_sql_keys_on_primary_key() {
        let rows = vec![json!({"event_id": "BOE:abc", "title": "t", "confidence": 0.9})];
        let sql = build_merge_sql("p.d.events", "p.d.temp_x", &rows, "event_id").unwrap();

        assert!(sql.contains("ON T.event_id = S.event_id"));
        assert!(sql.contains("confidence = S.confidence"));
        assert!(sql.contains("title = S.title"));
        // The primary key is never in the UPDATE SET clause
        assert!(!sql.contains("event_id = S.event_id,"));
        assert!(sql.contains("INSERT (confidence, event_id, title)"));
    }

    #[test]
    fn merge_sql_requires_primary_key_column() {
        let rows = vec![json!({"title": "sin clave"})];
        assert!(build_merge_sql("t", "s", &rows, "event_id").is_err());
    }

    #[test]
    fn table_primary_keys() {
        assert_eq!(primary_key(tables::RAW_DOCS), "raw_id");
        assert_eq!(primary_key(tables::EVENTS), "event_id");
        assert_eq!(primary_key(tables::USERS), "user_id");
        assert_eq!(primary_key("unknown_table"), "id");
    }

    #[test]
    fn escape_quotes() {
        assert_eq!(WarehouseClient::escape("O'Hara"), "O''Hara");
    }
}
