//! Web search through DuckDuckGo's HTML endpoint.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use toolbox_core::error::ToolError;
use tracing::debug;

use crate::fetch::strip_tags;

const SEARCH_URL: &str = "https://html.duckduckgo.com/html/";

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub title: String,
    pub href: String,
    pub body: String,
}

static RESULT_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<a([^>]*class="[^"]*result__a[^"]*"[^>]*)>(.*?)</a>"#).expect("valid regex")
});
static SNIPPET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<(?:a|div|td)[^>]*class="[^"]*result__snippet[^"]*"[^>]*>(.*?)</(?:a|div|td)>"#)
        .expect("valid regex")
});
static HREF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"href="([^"]*)""#).expect("valid regex"));

pub async fn search(
    client: &reqwest::Client,
    base_url: Option<&str>,
    query: &str,
    max_results: usize,
) -> Result<Vec<SearchResult>, ToolError> {
    let url = base_url.unwrap_or(SEARCH_URL);
    debug!(query = %query, max_results, "Searching the web");

    let response = client
        .get(url)
        .query(&[("q", query), ("kl", "wt-wt")])
        .send()
        .await
        .map_err(|e| ToolError::failed("search", e))?;
    let status = response.status();
    if !status.is_success() {
        return Err(ToolError::failed("search", format!("HTTP {status} from search endpoint")));
    }
    let html = response.text().await.map_err(|e| ToolError::failed("search", e))?;
    Ok(parse_results(&html, max_results))
}

/// Pull results out of a DuckDuckGo HTML results page.
///
/// Each result link is paired with the first snippet that follows it and
/// precedes the next result link.
pub fn parse_results(html: &str, max_results: usize) -> Vec<SearchResult> {
    let links: Vec<_> = RESULT_LINK.captures_iter(html).collect();
    let mut results = Vec::new();

    for (i, caps) in links.iter().enumerate() {
        if results.len() >= max_results {
            break;
        }
        let Some(whole) = caps.get(0) else { continue };
        let href = HREF
            .captures(&caps[1])
            .map(|h| resolve_href(&crate::fetch::decode_entities(&h[1])))
            .unwrap_or_default();
        if href.is_empty() {
            continue;
        }

        let section_end = links
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(html.len(), |m| m.start());
        let body = SNIPPET
            .captures(&html[whole.end()..section_end])
            .map(|s| strip_tags(&s[1]))
            .unwrap_or_default();

        results.push(SearchResult {
            title: strip_tags(&caps[2]),
            href,
            body,
        });
    }

    results
}

/// Unwrap DuckDuckGo's `/l/?uddg=<target>` redirect links.
fn resolve_href(raw: &str) -> String {
    let absolute = if raw.starts_with("//") {
        format!("https:{raw}")
    } else if raw.starts_with('/') {
        format!("https://duckduckgo.com{raw}")
    } else {
        raw.to_string()
    };

    match reqwest::Url::parse(&absolute) {
        Ok(url) if url.path().starts_with("/l/") => url
            .query_pairs()
            .find(|(k, _)| k == "uddg")
            .map(|(_, v)| v.into_owned())
            .unwrap_or(absolute),
        _ => absolute,
    }
}
