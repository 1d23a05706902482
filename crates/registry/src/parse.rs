//! Registry document parsing and URL normalization.

use cometgate_types::RegistryEndpoint;
use serde_json::Value;
use url::Url;

/// Recognized keys for the endpoint address, in priority order.
const URL_KEYS: [&str; 4] = ["RPC Address", "rpc_address", "rpc", "url"];

/// Recognized keys for the contributor name, in priority order.
const NAME_KEYS: [&str; 4] = ["Team or Contributor Name", "team_name", "team", "name"];

/// Contributor name used when no recognized key is present.
const UNKNOWN_CONTRIBUTOR: &str = "unknown";

/// Validate and normalize a raw endpoint address.
///
/// Accepts only syntactically valid `http`/`https` URLs and strips any
/// trailing slashes. Host case and explicit default ports are preserved, so
/// entries differing only in those respects stay distinct endpoints.
#[must_use]
pub fn normalize_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let parsed = Url::parse(trimmed).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    parsed.host_str()?;
    Some(trimmed.trim_end_matches('/').to_string())
}

fn string_field<'a>(entry: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| entry.get(*key).and_then(Value::as_str))
}

/// Parse a registry document into endpoint entries.
///
/// The document must be a JSON array of objects. An entry is kept iff it
/// yields a valid `http(s)` URL under one of the recognized keys; malformed
/// entries are silently dropped and unknown keys ignored. The first entry
/// wins when two normalize to the same URL.
#[must_use]
pub fn parse_registry(doc: &Value) -> Vec<RegistryEndpoint> {
    let Some(entries) = doc.as_array() else {
        return Vec::new();
    };

    let mut seen = std::collections::HashSet::new();
    let mut endpoints = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(url) = string_field(entry, &URL_KEYS).and_then(normalize_url) else {
            continue;
        };
        if !seen.insert(url.clone()) {
            continue;
        }
        let name = string_field(entry, &NAME_KEYS).unwrap_or(UNKNOWN_CONTRIBUTOR);
        endpoints.push(RegistryEndpoint::new(url, name));
    }
    endpoints
}
