//! Raw message normalization.
//!
//! Turns a provider message (a MIME part tree plus headers, in the Gmail
//! API `format=full` JSON shape) into a [`NormalizedMessage`]:
//!
//! 1. `From`, `Subject`, `To` and `Date` are read from the first header of
//!    each name (names compare case-insensitively).
//! 2. The body is the first non-empty `text/plain` part found depth-first.
//!    Failing that, the first `text/html` part is decoded and passed through
//!    [`strip_html`].
//! 3. The timestamp comes from the `Date` header when one of the known
//!    layouts parses it, otherwise from the provider's internal timestamp.
//!
//! Normalization never fails. Parts that cannot be decoded are skipped and
//! a message without a readable body gets an empty body.

use base64::engine::general_purpose::{GeneralPurpose, STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::models::NormalizedMessage;

/// A message as delivered by the mail provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub snippet: String,
    /// Provider receive time in milliseconds since the Unix epoch.
    ///
    /// The Gmail API encodes this as a decimal string; plain numbers are
    /// accepted too.
    #[serde(default, deserialize_with = "deserialize_millis")]
    pub internal_date: i64,
    #[serde(default)]
    pub payload: MessagePart,
}

/// One node of the MIME tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

/// Transfer-encoded body of a part.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartBody {
    /// Base64 payload (URL-safe in practice, but not guaranteed).
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

fn deserialize_millis<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Millis {
        Number(i64),
        Text(String),
    }

    match Option::<Millis>::deserialize(deserializer)? {
        None => Ok(0),
        Some(Millis::Number(n)) => Ok(n),
        Some(Millis::Text(s)) if s.trim().is_empty() => Ok(0),
        Some(Millis::Text(s)) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Normalize a raw provider message.
pub fn normalize_message(raw: &RawMessage) -> NormalizedMessage {
    let headers = &raw.payload.headers;

    NormalizedMessage {
        id: raw.id.clone(),
        thread_id: raw.thread_id.clone(),
        subject: header_value(headers, "Subject")
            .unwrap_or_default()
            .to_string(),
        from: header_value(headers, "From").unwrap_or_default().to_string(),
        to: header_value(headers, "To")
            .map(split_recipients)
            .unwrap_or_default(),
        body: extract_body(&raw.payload),
        snippet: raw.snippet.clone(),
        date: resolve_date(header_value(headers, "Date"), raw.internal_date),
    }
}

/// Value of the first header called `name`.
pub fn header_value<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Split an address-list header on commas that sit outside quoted display
/// names and angle-bracketed addresses.
fn split_recipients(value: &str) -> Vec<String> {
    let mut recipients = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_angle = false;

    for c in value.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => in_angle = true,
            '>' if !in_quotes => in_angle = false,
            ',' if !in_quotes && !in_angle => {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    recipients.push(trimmed.to_string());
                }
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        recipients.push(trimmed.to_string());
    }
    recipients
}

// ============ Body extraction ============

/// Extract a plain-text body from a MIME tree.
///
/// Prefers `text/plain`; falls back to stripped `text/html`; returns an
/// empty string when neither yields text.
pub fn extract_body(payload: &MessagePart) -> String {
    if let Some(text) = find_part_text(payload, "text/plain") {
        return text;
    }
    find_part_text(payload, "text/html")
        .map(|html| strip_html(&html))
        .unwrap_or_default()
}

/// Depth-first search for the first part of `mime_type` whose body decodes
/// to non-empty text.
fn find_part_text(part: &MessagePart, mime_type: &str) -> Option<String> {
    if is_mime_type(&part.mime_type, mime_type) {
        let data = part.body.as_ref().map(|b| b.data.as_str()).unwrap_or("");
        if !data.is_empty() {
            match decode_body(data) {
                Some(text) if !text.is_empty() => return Some(text),
                Some(_) => {}
                None => debug!(mime_type, "Skipping part with undecodable body"),
            }
        }
    }

    part.parts
        .iter()
        .find_map(|child| find_part_text(child, mime_type))
}

fn is_mime_type(actual: &str, expected: &str) -> bool {
    actual
        .split(';')
        .next()
        .map(|base| base.trim().eq_ignore_ascii_case(expected))
        .unwrap_or(false)
}

/// Base64 alphabets tried in order when decoding a part body.
const BODY_ENGINES: [GeneralPurpose; 3] = [URL_SAFE, URL_SAFE_NO_PAD, STANDARD];

/// Decode a transfer-encoded part body.
///
/// Line wraps and other ASCII whitespace are ignored. Tries URL-safe, then
/// unpadded URL-safe, then standard base64. Returns `None` when every
/// alphabet rejects the input. Byte sequences that are not valid UTF-8 are
/// replaced with U+FFFD rather than failing the part.
pub fn decode_body(data: &str) -> Option<String> {
    let compact: String = data
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let bytes = BODY_ENGINES
        .iter()
        .find_map(|engine| engine.decode(&compact).ok())?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

// ============ HTML stripping ============

static STYLE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<style[^>]*>.*?</style>").expect("valid regex"));
static SCRIPT_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script[^>]*>.*?</script>").expect("valid regex"));
static BLOCK_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<(?:br|p|/p|/div|/?h[1-6])\b[^>]*>").expect("valid regex")
});
static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
static ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(?:amp|lt|gt|nbsp|quot|#39);").expect("valid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Reduce an HTML document to readable text.
///
/// `<style>` and `<script>` blocks go first, contents included. Block-level
/// tags become newlines, every other tag becomes a space, the six common
/// entities are decoded, and whitespace runs collapse to one space.
pub fn strip_html(input: &str) -> String {
    let content = STYLE_BLOCK.replace_all(input, "");
    let content = SCRIPT_BLOCK.replace_all(&content, "");
    let content = BLOCK_TAG.replace_all(&content, "\n");
    let content = ANY_TAG.replace_all(&content, " ");
    let content = decode_entities(&content);
    WHITESPACE.replace_all(&content, " ").trim().to_string()
}

/// Decode `&amp; &lt; &gt; &nbsp; &quot; &#39;` in a single pass, so an
/// escaped entity such as `&amp;lt;` decodes to `&lt;` and no further.
fn decode_entities(input: &str) -> String {
    ENTITY
        .replace_all(input, |caps: &Captures| match &caps[0] {
            "&amp;" => "&",
            "&lt;" => "<",
            "&gt;" => ">",
            "&nbsp;" => " ",
            "&quot;" => "\"",
            _ => "'",
        })
        .into_owned()
}

// ============ Date resolution ============

/// A trailing comment such as `(PST)` or `(Coordinated Universal Time)`.
static ZONE_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\([^()]*\)\s*$").expect("valid regex"));

enum DateLayout {
    /// chrono format ending in a numeric `%z` offset.
    Offset {
        format: &'static str,
        weekday: bool,
    },
    /// chrono format without a zone, followed by a zone abbreviation.
    NamedZone(&'static str),
    Rfc3339,
    /// Zone-less layout, read as UTC.
    NaiveUtc(&'static str),
}

/// Header layouts in the order they are tried. The first that parses wins.
const DATE_LAYOUTS: &[DateLayout] = &[
    DateLayout::Offset {
        format: "%a, %d %b %Y %H:%M:%S %z",
        weekday: true,
    },
    DateLayout::NamedZone("%a, %d %b %Y %H:%M:%S"),
    DateLayout::Offset {
        format: "%a, %e %b %Y %H:%M:%S %z",
        weekday: true,
    },
    DateLayout::Offset {
        format: "%d %b %Y %H:%M:%S %z",
        weekday: false,
    },
    DateLayout::Offset {
        format: "%e %b %Y %H:%M:%S %z",
        weekday: false,
    },
    DateLayout::Rfc3339,
    DateLayout::NaiveUtc("%Y-%m-%d %H:%M:%S"),
];

impl DateLayout {
    fn parse(&self, value: &str) -> Option<DateTime<FixedOffset>> {
        match self {
            DateLayout::Offset { format, weekday } => {
                let value = if *weekday {
                    value
                } else {
                    strip_weekday(value)
                };
                DateTime::parse_from_str(value, format).ok()
            }
            DateLayout::NamedZone(format) => {
                let (stamp, zone) = value.rsplit_once(' ')?;
                let offset = named_zone_offset(zone)?;
                let stamp = stamp.trim_end();
                let naive = NaiveDateTime::parse_from_str(stamp, format)
                    .or_else(|_| {
                        NaiveDateTime::parse_from_str(strip_weekday(stamp), "%d %b %Y %H:%M:%S")
                    })
                    .ok()?;
                offset.from_local_datetime(&naive).single()
            }
            DateLayout::Rfc3339 => DateTime::parse_from_rfc3339(value).ok(),
            DateLayout::NaiveUtc(format) => NaiveDateTime::parse_from_str(value, format)
                .ok()
                .map(|naive| naive.and_utc().fixed_offset()),
        }
    }
}

/// Drop a leading `Mon, ` so the weekday-less layouts can also accept
/// headers whose weekday disagrees with the date.
fn strip_weekday(value: &str) -> &str {
    match value.split_once(',') {
        Some((day, rest)) if day.len() == 3 && day.chars().all(|c| c.is_ascii_alphabetic()) => {
            rest.trim_start()
        }
        _ => value,
    }
}

/// Offset for an RFC-822 style zone abbreviation.
///
/// Unknown alphabetic abbreviations map to UTC; anything else is rejected.
fn named_zone_offset(zone: &str) -> Option<FixedOffset> {
    if zone.is_empty() || zone.len() > 5 || !zone.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let hours = match zone.to_ascii_uppercase().as_str() {
        "EST" => -5,
        "EDT" => -4,
        "CST" => -6,
        "CDT" => -5,
        "MST" => -7,
        "MDT" => -6,
        "PST" => -8,
        "PDT" => -7,
        _ => 0,
    };
    FixedOffset::east_opt(hours * 3600)
}

/// Parse a `Date` header value against the known layouts.
///
/// A trailing parenthesized zone comment is ignored.
pub fn parse_email_date(value: &str) -> Option<DateTime<FixedOffset>> {
    let cleaned = ZONE_COMMENT.replace(value.trim(), "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }
    DATE_LAYOUTS.iter().find_map(|layout| layout.parse(cleaned))
}

/// Resolve a message timestamp from its `Date` header, falling back to the
/// provider's internal timestamp (milliseconds, UTC).
///
/// Returns `None` only when the header is unusable and `internal_ms` is 0.
pub fn resolve_date(header: Option<&str>, internal_ms: i64) -> Option<DateTime<FixedOffset>> {
    if let Some(parsed) = header.and_then(parse_email_date) {
        return Some(parsed);
    }
    if let Some(value) = header {
        debug!(date = value, "Unparseable Date header, using internal timestamp");
    }
    if internal_ms == 0 {
        return None;
    }
    DateTime::from_timestamp_millis(internal_ms).map(|utc| utc.fixed_offset())
}
