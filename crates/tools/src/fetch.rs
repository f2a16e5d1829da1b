//! HTTP GET shared by the web tools, plus HTML-to-text helpers.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use toolbox_core::error::ToolError;
use tracing::debug;

const USER_AGENT: &str = concat!("Mozilla/5.0 (compatible; toolbox/", env!("CARGO_PKG_VERSION"), ")");

/// Build the client the web tools share.
pub fn http_client(timeout_secs: u64) -> Result<reqwest::Client, ToolError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ToolError::failed("http", e))
}

/// GET `url` and return the body as text. Non-2xx statuses are failures.
pub async fn get_text(client: &reqwest::Client, tool: &str, url: &str) -> Result<String, ToolError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ToolError::invalid(tool, "URL must start with http:// or https://"));
    }

    debug!(tool = %tool, url = %url, "Fetching");
    let response = client.get(url).send().await.map_err(|e| ToolError::failed(tool, e))?;
    let status = response.status();
    if !status.is_success() {
        return Err(ToolError::failed(tool, format!("HTTP {status} from {url}")));
    }
    response.text().await.map_err(|e| ToolError::failed(tool, e))
}

static INVISIBLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b.*?</script>|<style\b.*?</style>|<noscript\b.*?</noscript>|<head\b.*?</head>|<!--.*?-->")
        .expect("valid regex")
});
static BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</(p|div|li|tr|h[1-6]|section|article|header|footer|blockquote|pre|table|ul|ol)>")
        .expect("valid regex")
});
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));
static ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").expect("valid regex"));

/// Remove every tag and decode entities, keeping the text on one line.
pub fn strip_tags(html: &str) -> String {
    let text = TAG.replace_all(html, "");
    collapse_whitespace(&decode_entities(&text))
}

/// Visible text of an HTML page, one non-empty line per block element.
pub fn html_to_text(html: &str) -> String {
    let visible = INVISIBLE.replace_all(html, "");
    let broken = BREAK.replace_all(&visible, "\n");
    let bare = TAG.replace_all(&broken, "");
    decode_entities(&bare)
        .lines()
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let raw = &caps[1];
            let decoded = if let Some(hex) = raw.strip_prefix("#x").or_else(|| raw.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = raw.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match raw {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some(' '),
                    "ndash" => Some('–'),
                    "mdash" => Some('—'),
                    "hellip" => Some('…'),
                    "rsquo" => Some('’'),
                    "lsquo" => Some('‘'),
                    "rdquo" => Some('”'),
                    "ldquo" => Some('“'),
                    _ => None,
                }
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cut `text` to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
