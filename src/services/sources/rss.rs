//! RSS adapter - eight Spanish newspaper feeds
//!
//! Some outlets ship feeds whose XML prologue declares `us-ascii` while the
//! body is UTF-8. The declaration is rewritten to `utf-8` before parsing;
//! skipping that step garbles every accented character in the feed.

use async_trait::async_trait;
use chrono::Utc;
use quick_xml::Reader;
use quick_xml::events::Event as XmlEvent;
use regex::RegexBuilder;
use reqwest::Client;
use std::time::Duration;

use super::{SourceAdapter, matches_query};
use crate::models::{RssOutlet, SearchSummary, Source, SourceRecord, SourceResult};
use crate::utils::{SearchWindow, parse_flexible_date};

/// A single `<item>` as pulled off the wire.
#[derive(Debug, Default, Clone)]
pub struct FeedEntry {
    pub title: String,
    pub description: String,
    pub link: String,
    pub pub_date: String,
}

/// Rewrite a lying encoding declaration so the parser sees the truth.
pub fn fix_encoding_declaration(content: &str) -> String {
    let mut fixed = content.to_string();

    if fixed.to_lowercase().contains("us-ascii") {
        let declaration = RegexBuilder::new(r#"encoding=["']us-ascii["']"#)
            .case_insensitive(true)
            .build()
            .expect("encoding declaration pattern");
        fixed = declaration.replace_all(&fixed, r#"encoding="utf-8""#).into_owned();

        let charset = RegexBuilder::new(r"charset=us-ascii")
            .case_insensitive(true)
            .build()
            .expect("charset pattern");
        fixed = charset.replace_all(&fixed, "charset=utf-8").into_owned();

        tracing::debug!("Fixed encoding declaration from us-ascii to utf-8");
    }

    fixed
}

/// Pull `<item>` entries out of an RSS document.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>, String> {
    let fixed = fix_encoding_declaration(xml);
    let mut reader = Reader::from_str(&fixed);
    reader.config_mut().trim_text(true);

    #[derive(PartialEq)]
    enum Field {
        None,
        Title,
        Description,
        Link,
        PubDate,
    }

    let mut entries = Vec::new();
    let mut current: Option<FeedEntry> = None;
    let mut field = Field::None;

    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(e)) => match e.name().as_ref() {
                b"item" | b"entry" => {
                    current = Some(FeedEntry::default());
                    field = Field::None;
                },
                b"title" if current.is_some() => field = Field::Title,
                b"description" | b"summary" if current.is_some() => field = Field::Description,
                b"link" if current.is_some() => field = Field::Link,
                b"pubDate" | b"published" if current.is_some() => field = Field::PubDate,
                _ => field = Field::None,
            },
            Ok(XmlEvent::End(e)) => match e.name().as_ref() {
                b"item" | b"entry" => {
                    if let Some(entry) = current.take()
                        && !entry.title.is_empty()
                    {
                        entries.push(entry);
                    }
                    field = Field::None;
                },
                _ => field = Field::None,
            },
            Ok(XmlEvent::Text(t)) => {
                if let Some(entry) = current.as_mut() {
                    let text = t.unescape().unwrap_or_default().into_owned();
                    append_field(entry, &field, &text);
                }
            },
            Ok(XmlEvent::CData(t)) => {
                if let Some(entry) = current.as_mut() {
                    let text = String::from_utf8_lossy(t.as_ref()).into_owned();
                    append_field(entry, &field, &text);
                }
            },
            Ok(XmlEvent::Eof) => break,
            Err(e) => {
                return Err(format!(
                    "XML parse error at byte {}: {}",
                    reader.buffer_position(),
                    e
                ));
            },
            _ => {},
        }
    }

    fn append_field(entry: &mut FeedEntry, field: &Field, text: &str) {
        let target = match field {
            Field::Title => &mut entry.title,
            Field::Description => &mut entry.description,
            Field::Link => &mut entry.link,
            Field::PubDate => &mut entry.pub_date,
            Field::None => return,
        };
        if !target.is_empty() {
            target.push(' ');
        }
        target.push_str(text.trim());
    }

    Ok(entries)
}

pub struct RssAdapter {
    outlet: RssOutlet,
    http_client: Client,
}

impl RssAdapter {
    pub fn new(outlet: RssOutlet, timeout_secs: u64) -> Self {
        let http_client = Client::builder()
            .pool_max_idle_per_host(16)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::error!("Failed to build RSS HTTP client: {}. Using defaults.", e);
                Client::default()
            });

        Self { outlet, http_client }
    }

    pub fn outlet(&self) -> RssOutlet {
        self.outlet
    }
}

#[async_trait]
impl SourceAdapter for RssAdapter {
    fn source(&self) -> Source {
        Source::Rss(self.outlet)
    }

    async fn search(&self, query: &str, window: SearchWindow) -> SourceResult {
        let source_name = self.source().as_str();
        let url = self.outlet.feed_url();
        let mut errors = Vec::new();

        let body = match self.http_client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    errors.push(format!("Body read failed: {}", e));
                    String::new()
                },
            },
            Ok(resp) => {
                errors.push(format!("HTTP {}", resp.status()));
                String::new()
            },
            Err(e) => {
                errors.push(format!("Request failed: {}", e));
                String::new()
            },
        };

        let entries = if body.is_empty() {
            Vec::new()
        } else {
            match parse_feed(&body) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!("RSS {} parse failed: {}", source_name, e);
                    errors.push(e);
                    Vec::new()
                },
            }
        };

        let mut records = Vec::new();
        for entry in entries {
            if !matches_query(query, &[&entry.title, &entry.description]) {
                continue;
            }

            let (pub_date, date_parse_error) = match parse_flexible_date(&entry.pub_date) {
                Some(date) => (date, false),
                None => (Utc::now().date_naive(), true),
            };

            // Entries with a trustworthy date outside the window are dropped;
            // fallback-dated entries are kept and flagged.
            if !date_parse_error && !window.contains(pub_date) {
                continue;
            }

            records.push(SourceRecord {
                title: entry.title,
                text: entry.description,
                url: entry.link,
                published_at: pub_date.format("%Y-%m-%d").to_string(),
                date_parse_error,
                ..Default::default()
            });
        }

        tracing::info!("RSS {} search '{}': {} entries", source_name, query, records.len());

        SourceResult {
            summary: SearchSummary {
                query: query.to_string(),
                source: source_name,
                total_results: records.len(),
                feeds_searched: 1,
                errors,
            },
            records,
        }
    }
}
