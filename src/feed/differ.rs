//! `diff_feed(bytes, format) -> (envelope, entries)` — the pure differ.
//!
//! A tag-scanning pass over `quick-xml` rather than a structured feed parser
//! like `feed-rs`, because splicing new entries back into a delivery payload
//! needs each entry's *raw* XML, which a structured parser discards once it
//! builds its own model. Entry identity prefers the feed's own id/guid
//! element, falling back to a hash of the raw entry XML when it is missing
//! or empty.

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Atom,
    Rss,
}

impl FeedFormat {
    fn entry_tag(self) -> &'static [u8] {
        match self {
            FeedFormat::Atom => b"entry",
            FeedFormat::Rss => b"item",
        }
    }

    fn id_tag(self) -> &'static [u8] {
        match self {
            FeedFormat::Atom => b"id",
            FeedFormat::Rss => b"guid",
        }
    }

    fn closing_tag(self) -> &'static str {
        match self {
            FeedFormat::Atom => "</feed>",
            FeedFormat::Rss => "</channel>",
        }
    }

    /// The other format, used to build a format-hinted retry order: try the
    /// declared/guessed format first, then fall back to the other one if
    /// that parse comes back empty.
    pub fn other(self) -> Self {
        match self {
            FeedFormat::Atom => FeedFormat::Rss,
            FeedFormat::Rss => FeedFormat::Atom,
        }
    }
}

#[derive(Debug, Error)]
pub enum DiffError {
    #[error("malformed XML: {0}")]
    InvalidXml(String),
    #[error("document does not contain a recognizable {0:?} feed")]
    NotAFeed(FeedFormat),
}

#[derive(Debug, Clone)]
pub struct DiffResult {
    /// The feed document with every entry's raw XML removed (spec's
    /// "header_footer").
    pub envelope: String,
    /// (entry_id, raw_entry_xml) pairs in document order.
    pub entries: Vec<(String, String)>,
}

/// Parses `bytes` as `format`, returning the envelope and the
/// (entry_id, raw_xml) pairs for every entry/item element found.
pub fn diff_feed(bytes: &[u8], format: FeedFormat) -> Result<DiffResult, DiffError> {
    let text = std::str::from_utf8(bytes).map_err(|e| DiffError::InvalidXml(e.to_string()))?;

    let entry_tag = format.entry_tag();
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(false);

    let mut spans: Vec<(usize, usize)> = Vec::new();
    // (start offset, remaining nesting depth of entry_tag) -- real feeds
    // never nest <entry>/<item>, but we track depth defensively.
    let mut open: Option<(usize, u32)> = None;
    let mut saw_root = false;

    loop {
        let pos_before = reader.buffer_position() as usize;
        let event = reader
            .read_event()
            .map_err(|e| DiffError::InvalidXml(e.to_string()))?;

        match &event {
            Event::Eof => break,
            Event::Start(e) => {
                saw_root = true;
                if e.name().as_ref() == entry_tag {
                    match &mut open {
                        Some((_, depth)) => *depth += 1,
                        None => open = Some((pos_before, 1)),
                    }
                }
            }
            Event::Empty(e) => {
                saw_root = true;
                if open.is_none() && e.name().as_ref() == entry_tag {
                    let pos_after = reader.buffer_position() as usize;
                    spans.push((pos_before, pos_after));
                }
            }
            Event::End(e) => {
                if e.name().as_ref() == entry_tag {
                    if let Some((start, depth)) = open {
                        if depth == 1 {
                            let pos_after = reader.buffer_position() as usize;
                            spans.push((start, pos_after));
                            open = None;
                        } else {
                            open = Some((start, depth - 1));
                        }
                    }
                }
            }
            _ => {}
        }
    }

    if !saw_root {
        return Err(DiffError::NotAFeed(format));
    }

    let mut entries = Vec::with_capacity(spans.len());
    for &(start, end) in &spans {
        let raw = &text[start..end];
        let id = extract_id(raw, format).unwrap_or_else(|| crate::store::content_hash(raw));
        entries.push((id, raw.to_string()));
    }

    let mut envelope = String::with_capacity(text.len());
    let mut cursor = 0;
    for &(start, end) in &spans {
        envelope.push_str(&text[cursor..start]);
        cursor = end;
    }
    envelope.push_str(&text[cursor..]);

    Ok(DiffResult { envelope, entries })
}

fn extract_id(raw: &str, format: FeedFormat) -> Option<String> {
    let id_tag = format.id_tag();
    let mut reader = Reader::from_str(raw);
    reader.config_mut().trim_text(true);
    let mut in_id = false;

    loop {
        match reader.read_event().ok()? {
            Event::Start(e) if e.name().as_ref() == id_tag => in_id = true,
            Event::Text(t) if in_id => {
                let text = t.decode().ok()?.trim().to_string();
                if !text.is_empty() {
                    return Some(text);
                }
            }
            Event::End(e) if e.name().as_ref() == id_tag => in_id = false,
            Event::Eof => break,
            _ => {}
        }
    }
    None
}

/// Splices `new_entries`' raw XML just before the format's closing tag,
/// prefixed by an XML declaration, producing the payload that gets
/// delivered to subscribers.
pub fn splice_entries(envelope: &str, new_entries: &[String], format: FeedFormat) -> String {
    let closing_tag = format.closing_tag();
    let insertion_point = envelope.rfind(closing_tag).unwrap_or(envelope.len());

    let extra: usize = new_entries.iter().map(|e| e.len() + 1).sum();
    let mut payload = String::with_capacity(envelope.len() + extra + 64);
    payload.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    payload.push_str(&envelope[..insertion_point]);
    for entry in new_entries {
        payload.push_str(entry);
        payload.push('\n');
    }
    payload.push_str(&envelope[insertion_point..]);
    payload
}
