//! RSS 2.0 and Atom feed parsing.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde::Serialize;
use toolbox_core::error::ToolError;

use crate::fetch::{get_text, html_to_text};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub published: String,
    pub summary: String,
}

pub async fn fetch_feed(
    client: &reqwest::Client,
    url: &str,
    num_entries: usize,
) -> Result<Vec<FeedEntry>, ToolError> {
    let xml = get_text(client, "rss_feed", url).await?;
    let mut entries = parse_feed(&xml).map_err(|e| ToolError::failed("rss_feed", e))?;
    entries.truncate(num_entries);
    Ok(entries)
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    Title,
    Link,
    Published,
    Summary,
}

impl Field {
    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"title" => Some(Self::Title),
            b"link" => Some(Self::Link),
            b"pubDate" | b"published" | b"updated" | b"dc:date" => Some(Self::Published),
            b"description" | b"summary" | b"content" | b"content:encoded" => Some(Self::Summary),
            _ => None,
        }
    }
}

/// Parse every `<item>` (RSS) or `<entry>` (Atom) in document order.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>, String> {
    let mut reader = Reader::from_str(xml);

    let mut entries = Vec::new();
    let mut current: Option<FeedEntry> = None;
    let mut field: Option<Field> = None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.name();
                let tag = name.as_ref();
                if tag == b"item" || tag == b"entry" {
                    current = Some(FeedEntry::default());
                } else if current.is_some() {
                    field = Field::from_tag(tag);
                    text.clear();
                    if field == Some(Field::Link) {
                        set_atom_link(current.as_mut(), &e);
                    }
                }
            }
            Ok(Event::Empty(e)) => {
                if e.name().as_ref() == b"link" {
                    set_atom_link(current.as_mut(), &e);
                }
            }
            Ok(Event::Text(t)) => {
                if field.is_some() {
                    let chunk = t.decode().map_err(|e| e.to_string())?;
                    text.push_str(&quick_xml::escape::unescape(&chunk).map_err(|e| e.to_string())?);
                }
            }
            Ok(Event::GeneralRef(r)) => {
                if field.is_some() {
                    if let Ok(Some(ch)) = r.resolve_char_ref() {
                        text.push(ch);
                    } else {
                        let name = r.decode().map_err(|e| e.to_string())?;
                        match quick_xml::escape::resolve_predefined_entity(&name) {
                            Some(resolved) => text.push_str(resolved),
                            None => {
                                text.push('&');
                                text.push_str(&name);
                                text.push(';');
                            }
                        }
                    }
                }
            }
            Ok(Event::CData(c)) => {
                if field.is_some() {
                    text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Ok(Event::End(e)) => {
                let name = e.name();
                let tag = name.as_ref();
                if tag == b"item" || tag == b"entry" {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                    field = None;
                } else if let (Some(f), Some(entry)) = (field, current.as_mut()) {
                    if Field::from_tag(tag) == Some(f) {
                        store(entry, f, &text);
                        field = None;
                        text.clear();
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("invalid feed at byte {}: {e}", reader.buffer_position())),
            _ => {}
        }
    }

    Ok(entries)
}

fn store(entry: &mut FeedEntry, field: Field, text: &str) {
    let text = text.trim();
    let slot = match field {
        Field::Title => &mut entry.title,
        Field::Link => &mut entry.link,
        Field::Published => &mut entry.published,
        Field::Summary => &mut entry.summary,
    };
    if slot.is_empty() && !text.is_empty() {
        *slot = if field == Field::Summary {
            html_to_text(text)
        } else {
            text.to_string()
        };
    }
}

/// Atom links carry the target in `href`; keep the first `alternate` one.
fn set_atom_link(entry: Option<&mut FeedEntry>, e: &BytesStart<'_>) {
    let Some(entry) = entry else { return };
    if !entry.link.is_empty() {
        return;
    }
    let mut href = None;
    let mut alternate = true;
    for attr in e.attributes().flatten() {
        let value = String::from_utf8_lossy(&attr.value).into_owned();
        match attr.key.as_ref() {
            b"href" => href = Some(value),
            b"rel" => alternate = value == "alternate",
            _ => {}
        }
    }
    if let (Some(href), true) = (href, alternate) {
        entry.link = href;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Feed title is not an entry</title>
  <item>
    <title>First &amp; best</title>
    <link>https://example.com/1</link>
    <pubDate>Mon, 06 May 2024 10:00:00 GMT</pubDate>
    <description><![CDATA[<p>Some <b>bold</b> text</p>]]></description>
  </item>
  <item>
    <title>Second</title>
    <link>https://example.com/2</link>
  </item>
</channel></rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom</title>
  <entry>
    <title>Atom entry</title>
    <link rel="self" href="https://example.com/self"/>
    <link href="https://example.com/atom/1"/>
    <updated>2024-05-06T10:00:00Z</updated>
    <summary>Short summary</summary>
  </entry>
</feed>"#;

    #[test]
    fn parses_rss_items() {
        let entries = parse_feed(RSS).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0],
            FeedEntry {
                title: "First & best".into(),
                link: "https://example.com/1".into(),
                published: "Mon, 06 May 2024 10:00:00 GMT".into(),
                summary: "Some bold text".into(),
            }
        );
        assert_eq!(entries[1].published, "");
    }

    #[test]
    fn parses_atom_entries() {
        let entries = parse_feed(ATOM).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "Atom entry");
        assert_eq!(entries[0].link, "https://example.com/atom/1");
        assert_eq!(entries[0].published, "2024-05-06T10:00:00Z");
        assert_eq!(entries[0].summary, "Short summary");
    }

    #[test]
    fn malformed_feed_is_an_error() {
        assert!(parse_feed("<rss><item><title>x</item></rss>").is_err());
    }
}
