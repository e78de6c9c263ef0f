//! Web search tool
//!
//! Searches through a [`SearchProvider`] and caches results per normalized
//! query, so repeated questions within a conversation do not hit the
//! provider again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parley_config::ToolsConfig;
use parley_core::TtlLruCache;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tool::{InputSchema, PropertySchema, Tool, ToolError, ToolOutput};

const DEFAULT_LIMIT: usize = 3;
const MAX_QUERY_CHARS: usize = 200;

/// One search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

/// Search backend
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, ToolError>;

    fn name(&self) -> &str;
}

/// In-memory provider matching query terms against a fixed corpus
#[derive(Debug, Clone)]
pub struct StaticSearchProvider {
    documents: Vec<SearchHit>,
}

impl StaticSearchProvider {
    pub fn new(documents: Vec<SearchHit>) -> Self {
        Self { documents }
    }

    fn score(doc: &SearchHit, terms: &[String]) -> usize {
        let haystack = format!("{} {}", doc.title, doc.snippet).to_lowercase();
        terms.iter().filter(|t| haystack.contains(t.as_str())).count()
    }
}

impl Default for StaticSearchProvider {
    fn default() -> Self {
        let doc = |title: &str, snippet: &str, url: &str| SearchHit {
            title: title.to_string(),
            snippet: snippet.to_string(),
            url: url.to_string(),
        };

        Self::new(vec![
            doc(
                "東京の天気",
                "東京は今日、晴れのち曇りの予報です。",
                "https://example.com/weather/tokyo",
            ),
            doc(
                "Tokyo weather",
                "Tokyo is expected to be sunny, turning cloudy later.",
                "https://example.com/weather/tokyo/en",
            ),
            doc(
                "富士山",
                "富士山の標高は3776メートルです。",
                "https://example.com/fuji",
            ),
            doc(
                "Mount Fuji",
                "Mount Fuji is 3,776 metres tall.",
                "https://example.com/fuji/en",
            ),
        ])
    }
}

#[async_trait]
impl SearchProvider for StaticSearchProvider {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, ToolError> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();

        let mut scored: Vec<(usize, &SearchHit)> = self
            .documents
            .iter()
            .map(|doc| (Self::score(doc, &terms), doc))
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, doc)| doc.clone())
            .collect())
    }

    fn name(&self) -> &str {
        "static"
    }
}

pub struct WebSearchTool {
    provider: Arc<dyn SearchProvider>,
    cache: TtlLruCache<(String, usize), Vec<SearchHit>>,
}

impl WebSearchTool {
    pub fn new(provider: Arc<dyn SearchProvider>, config: &ToolsConfig) -> Self {
        Self {
            provider,
            cache: TtlLruCache::new(
                config.search_cache_capacity,
                Some(Duration::from_secs(config.search_cache_ttl_secs)),
            ),
        }
    }

    pub fn cache(&self) -> &TtlLruCache<(String, usize), Vec<SearchHit>> {
        &self.cache
    }

    fn normalize(query: &str) -> String {
        query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
    }

    fn render(query: &str, hits: &[SearchHit]) -> String {
        match hits.first() {
            None => format!("「{}」については見つかりませんでした。", query),
            Some(top) => top.snippet.clone(),
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web and return the most relevant snippets"
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::object()
            .property(
                "query",
                PropertySchema::string("Search query").with_max_length(MAX_QUERY_CHARS),
                true,
            )
            .property(
                "limit",
                PropertySchema::integer("Maximum results").with_range(1.0, 10.0),
                false,
            )
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput, ToolError> {
        let query = input
            .get("query")
            .and_then(Value::as_str)
            .map(Self::normalize)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ToolError::invalid_params("query must not be empty"))?;
        let limit = input
            .get("limit")
            .and_then(Value::as_u64)
            .map(|l| l as usize)
            .unwrap_or(DEFAULT_LIMIT);

        let key = (query.clone(), limit);
        let hits = match self.cache.get(&key) {
            Some(hits) => {
                tracing::debug!(query = %query, "Search cache hit");
                hits
            }
            None => {
                let hits = self.provider.search(&query, limit).await?;
                self.cache.insert(key, hits.clone());
                hits
            }
        };

        Ok(ToolOutput::text(Self::render(&query, &hits)).with_data(json!({
            "provider": self.provider.name(),
            "results": hits,
        })))
    }

    fn timeout_secs(&self) -> u64 {
        5
    }
}
