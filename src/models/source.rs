//! Source identity and the uniform adapter result envelope

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// One of the eight Spanish press feeds consumed over RSS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RssOutlet {
    ElPais,
    Expansion,
    ElMundo,
    Abc,
    LaVanguardia,
    ElConfidencial,
    ElDiario,
    EuropaPress,
}

impl RssOutlet {
    pub const ALL: [RssOutlet; 8] = [
        RssOutlet::ElPais,
        RssOutlet::Expansion,
        RssOutlet::ElMundo,
        RssOutlet::Abc,
        RssOutlet::LaVanguardia,
        RssOutlet::ElConfidencial,
        RssOutlet::ElDiario,
        RssOutlet::EuropaPress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ElPais => "ELPAIS",
            Self::Expansion => "EXPANSION",
            Self::ElMundo => "ELMUNDO",
            Self::Abc => "ABC",
            Self::LaVanguardia => "LAVANGUARDIA",
            Self::ElConfidencial => "ELCONFIDENCIAL",
            Self::ElDiario => "ELDIARIO",
            Self::EuropaPress => "EUROPAPRESS",
        }
    }

    /// Key used in the per-source result map ("elpais", "expansion", ...)
    pub fn map_key(&self) -> String {
        self.as_str().to_lowercase()
    }

    pub fn feed_url(&self) -> &'static str {
        match self {
            Self::ElPais => "https://feeds.elpais.com/mrss-s/pages/ep/site/elpais.com/portada",
            Self::Expansion => "https://e00-expansion.uecdn.es/rss/empresas.xml",
            Self::ElMundo => "https://e00-elmundo.uecdn.es/elmundo/rss/economia.xml",
            Self::Abc => "https://www.abc.es/rss/feeds/abc_Economia.xml",
            Self::LaVanguardia => "https://www.lavanguardia.com/rss/economia.xml",
            Self::ElConfidencial => "https://rss.elconfidencial.com/empresas/",
            Self::ElDiario => "https://www.eldiario.es/rss/economia/",
            Self::EuropaPress => "https://www.europapress.es/rss/rss.aspx?ch=00136",
        }
    }
}

/// Tagged source identity. Uniform in interface, heterogeneous in payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Boe,
    NewsApi,
    Rss(RssOutlet),
    YahooFinance,
}

impl Source {
    /// Canonical name; also the `event_id` prefix.
    pub fn as_str(&self) -> String {
        match self {
            Self::Boe => "BOE".to_string(),
            Self::NewsApi => "NewsAPI".to_string(),
            Self::Rss(outlet) => format!("RSS-{}", outlet.as_str()),
            Self::YahooFinance => "YahooFinance".to_string(),
        }
    }

    /// Key in the orchestrator's result map ("boe", "newsapi", "elpais", ...)
    pub fn map_key(&self) -> String {
        match self {
            Self::Boe => "boe".to_string(),
            Self::NewsApi => "newsapi".to_string(),
            Self::Rss(outlet) => outlet.map_key(),
            Self::YahooFinance => "yahoo_finance".to_string(),
        }
    }

    pub fn is_press(&self) -> bool {
        matches!(self, Self::NewsApi | Self::Rss(_))
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BOE" => Ok(Self::Boe),
            "NewsAPI" => Ok(Self::NewsApi),
            "YahooFinance" => Ok(Self::YahooFinance),
            other => {
                if let Some(outlet_name) = other.strip_prefix("RSS-") {
                    for outlet in RssOutlet::ALL {
                        if outlet.as_str() == outlet_name {
                            return Ok(Self::Rss(outlet));
                        }
                    }
                }
                Err(format!("Unknown source: {}", other))
            },
        }
    }
}

impl Serialize for Source {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_str())
    }
}

impl<'de> Deserialize<'de> for Source {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// A single record as returned by a source adapter, before classification.
///
/// `title`/`text`/`url`/`published_at` are the uniform minimum; everything
/// source-specific travels in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SourceRecord {
    pub title: String,
    pub text: String,
    pub url: String,
    /// Raw date string as emitted by the source; normalized later
    pub published_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
    /// Gazette item identifier, where the source has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identificador: Option<String>,
    /// Set when the published_at string failed to parse and "now" was used
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub date_parse_error: bool,
    /// Source-specific payload fields (author, category, indicators, ...)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Fetch summary for one source, errors included.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchSummary {
    pub query: String,
    pub source: String,
    pub total_results: usize,
    #[serde(default)]
    pub feeds_searched: usize,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Uniform per-source search result envelope.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SourceResult {
    pub summary: SearchSummary,
    pub records: Vec<SourceRecord>,
}

impl SourceResult {
    pub fn empty(query: &str, source: &str) -> Self {
        Self {
            summary: SearchSummary {
                query: query.to_string(),
                source: source.to_string(),
                ..Default::default()
            },
            records: Vec::new(),
        }
    }

    pub fn failed(query: &str, source: &str, error: impl Into<String>) -> Self {
        let mut result = Self::empty(query, source);
        result.summary.errors.push(error.into());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_round_trip() {
        for source in [
            Source::Boe,
            Source::NewsApi,
            Source::Rss(RssOutlet::Expansion),
            Source::YahooFinance,
        ] {
            let name = source.as_str();
            assert_eq!(name.parse::<Source>().unwrap(), source);
        }
    }

    #[test]
    fn rss_names_match_outlets() {
        assert_eq!(Source::Rss(RssOutlet::ElPais).as_str(), "RSS-ELPAIS");
        assert_eq!(Source::Rss(RssOutlet::EuropaPress).map_key(), "europapress");
    }

    #[test]
    fn unknown_source_is_rejected() {
        assert!("Twitter".parse::<Source>().is_err());
        assert!("RSS-NADA".parse::<Source>().is_err());
    }
}
