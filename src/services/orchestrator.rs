//! Search orchestrator - concurrent fan-out with per-source isolation
//!
//! One spawned task per enabled source, each with its own time budget. A
//! panicking or overrunning adapter contributes an error entry to its own
//! slot in the result map and nothing else; siblings are unaffected. The
//! orchestrator never classifies.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::models::{Source, SourceResult};
use crate::services::sources::SourceAdapter;
use crate::utils::SearchWindow;

pub struct SearchOrchestrator {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    /// Per-source budget; a slow source forfeits its slot, not the search
    source_timeout: Duration,
}

impl SearchOrchestrator {
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>, source_timeout_secs: u64) -> Self {
        Self { adapters, source_timeout: Duration::from_secs(source_timeout_secs) }
    }

    /// Sources this orchestrator can serve.
    pub fn available_sources(&self) -> Vec<Source> {
        self.adapters.iter().map(|a| a.source()).collect()
    }

    /// Fan a query out to the active subset of sources concurrently.
    /// The result map is keyed by `Source::map_key` and always contains one
    /// entry per requested-and-available source.
    pub async fn search_all(
        &self,
        query: &str,
        window: SearchWindow,
        active_sources: &[Source],
    ) -> HashMap<String, SourceResult> {
        let selected: Vec<Arc<dyn SourceAdapter>> = self
            .adapters
            .iter()
            .filter(|a| active_sources.contains(&a.source()))
            .cloned()
            .collect();

        tracing::info!(
            "Orchestrating search '{}' across {} sources ({} - {})",
            query,
            selected.len(),
            window.start,
            window.end
        );

        let tasks = selected.into_iter().map(|adapter| {
            let query = query.to_string();
            let timeout = self.source_timeout;
            async move {
                let source = adapter.source();
                let key = source.map_key();
                let name = source.as_str();

                // Spawn so a panic inside an adapter is contained
                let handle = tokio::spawn(async move {
                    tokio::time::timeout(timeout, adapter.search(&query, window)).await
                });

                let result = match handle.await {
                    Ok(Ok(result)) => result,
                    Ok(Err(_elapsed)) => {
                        tracing::warn!("Source {} exceeded its {:?} budget", name, timeout);
                        SourceResult::failed(
                            "",
                            &name,
                            format!("Source timed out after {:?}", timeout),
                        )
                    },
                    Err(join_error) => {
                        tracing::error!("Source {} task failed: {}", name, join_error);
                        SourceResult::failed("", &name, format!("Source task failed: {}", join_error))
                    },
                };

                (key, result)
            }
        });

        join_all(tasks).await.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::models::{RssOutlet, SearchSummary, SourceRecord};

    struct StubAdapter {
        source: Source,
        delay: Duration,
        panics: bool,
    }

    #[async_trait]
    impl SourceAdapter for StubAdapter {
        fn source(&self) -> Source {
            self.source
        }

        async fn search(&self, query: &str, _window: SearchWindow) -> SourceResult {
            if self.panics {
                panic!("adapter exploded");
            }
            tokio::time::sleep(self.delay).await;
            SourceResult {
                summary: SearchSummary {
                    query: query.to_string(),
                    source: self.source.as_str(),
                    total_results: 1,
                    feeds_searched: 1,
                    errors: vec![],
                },
                records: vec![SourceRecord {
                    title: format!("resultado de {}", self.source.as_str()),
                    ..Default::default()
                }],
            }
        }
    }

    fn window() -> SearchWindow {
        SearchWindow::resolve(None, None, Some(7), 7)
    }

    #[tokio::test]
    async fn fans_out_to_active_sources_only() {
        let orchestrator = SearchOrchestrator::new(
            vec![
                Arc::new(StubAdapter {
                    source: Source::Boe,
                    delay: Duration::ZERO,
                    panics: false,
                }),
                Arc::new(StubAdapter {
                    source: Source::NewsApi,
                    delay: Duration::ZERO,
                    panics: false,
                }),
                Arc::new(StubAdapter {
                    source: Source::Rss(RssOutlet::ElPais),
                    delay: Duration::ZERO,
                    panics: false,
                }),
            ],
            5,
        );

        let results = orchestrator
            .search_all("Empresa", window(), &[Source::Boe, Source::NewsApi])
            .await;

        assert_eq!(results.len(), 2);
        assert!(results.contains_key("boe"));
        assert!(results.contains_key("newsapi"));
        assert!(!results.contains_key("elpais"));
    }

    #[tokio::test]
    async fn panicking_source_does_not_affect_peers() {
        let orchestrator = SearchOrchestrator::new(
            vec![
                Arc::new(StubAdapter {
                    source: Source::Boe,
                    delay: Duration::ZERO,
                    panics: false,
                }),
                Arc::new(StubAdapter {
                    source: Source::NewsApi,
                    delay: Duration::ZERO,
                    panics: true,
                }),
            ],
            5,
        );

        let results = orchestrator
            .search_all("Empresa", window(), &[Source::Boe, Source::NewsApi])
            .await;

        let boe = &results["boe"];
        assert_eq!(boe.records.len(), 1);
        assert!(boe.summary.errors.is_empty());

        let news = &results["newsapi"];
        assert!(news.records.is_empty());
        assert!(!news.summary.errors.is_empty());
    }

    #[tokio::test]
    async fn slow_source_is_time_boxed() {
        let orchestrator = SearchOrchestrator::new(
            vec![
                Arc::new(StubAdapter {
                    source: Source::Boe,
                    delay: Duration::ZERO,
                    panics: false,
                }),
                Arc::new(StubAdapter {
                    source: Source::NewsApi,
                    delay: Duration::from_secs(30),
                    panics: false,
                }),
            ],
            1,
        );

        let results = orchestrator
            .search_all("Empresa", window(), &[Source::Boe, Source::NewsApi])
            .await;

        assert!(results["boe"].summary.errors.is_empty());
        assert!(results["newsapi"].summary.errors[0].contains("timed out"));
    }
}
