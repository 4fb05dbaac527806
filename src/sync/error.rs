//! Error taxonomy for the sync pipeline and the
//! `bad indexers: { ... }` attribution parser.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorKind {
    /// Empty response body: DNS/TCP/TLS/HTTP transport failure or timeout.
    Network,
    /// Response body was not parseable JSON.
    Json,
    /// Parseable body contains a top-level `errors` array.
    GraphQl,
    /// Parseable body, but no `data.<plural>` array of the expected shape.
    Format,
}

impl SyncErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncErrorKind::Network => "network",
            SyncErrorKind::Json => "json",
            SyncErrorKind::GraphQl => "graphql",
            SyncErrorKind::Format => "format",
        }
    }
}

/// Classifies a raw response body and, on success, returns the row
/// array found at `data.<plural>`.
pub fn classify(body: &str, plural: &str) -> Result<Vec<serde_json::Value>, SyncErrorKind> {
    if body.is_empty() {
        return Err(SyncErrorKind::Network);
    }
    let parsed: serde_json::Value = serde_json::from_str(body).map_err(|_| SyncErrorKind::Json)?;
    if parsed.get("errors").is_some() {
        return Err(SyncErrorKind::GraphQl);
    }
    match parsed.get("data").and_then(|d| d.get(plural)).and_then(|v| v.as_array()) {
        Some(rows) => Ok(rows.clone()),
        None => Err(SyncErrorKind::Format),
    }
}

/// Parses the federated-indexer failure list out of a GraphQL error
/// message of the shape:
/// `"bad indexers: { idx1: BadResponse(x), idx2: Unavailable }"`.
/// Returns the indexer ids whose reason begins with `BadResponse`; other
/// reasons (notably `Unavailable`) are not counted.
pub fn bad_response_indexers(message: &str) -> Vec<String> {
    let Some(start) = message.find("bad indexers:") else {
        return Vec::new();
    };
    let rest = &message[start + "bad indexers:".len()..];
    let Some(open) = rest.find('{') else {
        return Vec::new();
    };
    let Some(close) = rest.find('}') else {
        return Vec::new();
    };
    if close < open {
        return Vec::new();
    }
    let body = &rest[open + 1..close];

    body.split(',')
        .filter_map(|entry| {
            let (id, reason) = entry.split_once(':')?;
            let id = id.trim();
            let reason = reason.trim();
            if id.is_empty() {
                return None;
            }
            if reason.starts_with("BadResponse") {
                Some(id.to_string())
            } else {
                None
            }
        })
        .collect()
}

/// Extracts the GraphQL error message text (first error's `message`
/// field) from an already-parsed error response, if present.
pub fn first_error_message(body: &str) -> Option<String> {
    let parsed: serde_json::Value = serde_json::from_str(body).ok()?;
    parsed
        .get("errors")?
        .as_array()?
        .first()?
        .get("message")?
        .as_str()
        .map(|s| s.to_string())
}
