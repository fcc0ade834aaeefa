// Source Adapter Module
// Purpose: Provide a unified interface over heterogeneous Spanish public sources
// Design: One thin trait, tagged source identity, per-adapter error capture

mod boe;
mod newsapi;
mod rss;
mod yahoo;

pub use boe::BoeAdapter;
pub use newsapi::NewsApiAdapter;
pub use rss::RssAdapter;
pub use yahoo::YahooFinanceAdapter;

use crate::config::SourcesConfig;
use crate::models::{RssOutlet, Source, SourceResult};
use crate::services::generate::GenerateClient;
use crate::utils::SearchWindow;
use async_trait::async_trait;
use std::sync::Arc;

/// Source adapter trait - uniform search over heterogeneous backends.
///
/// `search` never fails: every per-adapter error lands in
/// `SourceResult::summary.errors` instead of propagating.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Source identity of this adapter
    fn source(&self) -> Source;

    /// Search the source for the query within an already-resolved window
    async fn search(&self, query: &str, window: SearchWindow) -> SourceResult;
}

/// Build the full adapter set from configuration (factory method).
/// The orchestrator picks the active subset per request.
pub fn build_adapters(
    config: &SourcesConfig,
    generate_client: Option<Arc<GenerateClient>>,
) -> Vec<Arc<dyn SourceAdapter>> {
    let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();

    adapters.push(Arc::new(BoeAdapter::new(&config.boe_base_url, config.fetch_timeout_secs)));

    if config.newsapi_key.is_empty() {
        tracing::warn!("NewsAPI key not configured - news adapter disabled");
    } else {
        adapters.push(Arc::new(NewsApiAdapter::new(
            &config.newsapi_base_url,
            &config.newsapi_key,
            config.fetch_timeout_secs,
        )));
    }

    for outlet in RssOutlet::ALL {
        adapters.push(Arc::new(RssAdapter::new(outlet, config.fetch_timeout_secs)));
    }

    adapters.push(Arc::new(YahooFinanceAdapter::new(
        &config.finance_base_url,
        config.fetch_timeout_secs,
        generate_client,
    )));

    adapters
}

/// Case-insensitive term filter shared by the text-bearing adapters: a
/// record matches when any whitespace-split term of the query appears.
pub(crate) fn matches_query(query: &str, haystacks: &[&str]) -> bool {
    let terms: Vec<String> =
        query.split_whitespace().map(|t| t.to_lowercase()).filter(|t| !t.is_empty()).collect();
    if terms.is_empty() {
        return true;
    }

    let lowered: Vec<String> = haystacks.iter().map(|h| h.to_lowercase()).collect();
    terms.iter().any(|term| lowered.iter().any(|h| h.contains(term)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_filter_is_case_insensitive_and_any_term() {
        assert!(matches_query("Banco Santander", &["El BANCO anuncia resultados", ""]));
        assert!(matches_query("Banco Santander", &["nada aquí", "grupo santander crece"]));
        assert!(!matches_query("Banco Santander", &["Iberdrola invierte", "en renovables"]));
        assert!(matches_query("", &["cualquier cosa"]));
    }
}
