use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;

use aulos_net::Headers;

use crate::error::StreamResult;

/// Prefix of the structured envelope URI shape.
pub const REMOTE_TRACK_PREFIX: &str = "musikcube://remote-track/";

const DEFAULT_TRACK_TYPE: &str = ".mp3";

/// Payload carried after [`REMOTE_TRACK_PREFIX`].
#[derive(Debug, Deserialize)]
struct RemoteTrackPayload {
    uri: String,
    #[serde(rename = "originalUri")]
    original_uri: String,
    #[serde(rename = "type", default)]
    track_type: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// A resolved open target: where to transfer from and what to report outward.
#[derive(Debug)]
pub struct ResolvedUri {
    pub transfer_uri: String,
    /// The consumer-visible URI returned by `uri()`.
    pub display_uri: String,
    pub content_type: Option<String>,
    pub request_headers: Headers,
}

/// Resolve a raw open URI.
///
/// Plain URIs pass through verbatim. An envelope URI is decoded into its
/// transfer target, display URI, content type (default `.mp3`) and, when a
/// password is present, an `Authorization: Basic` header for the fixed
/// `default` user. A malformed envelope fails the open before any cache
/// state exists.
pub fn resolve(raw: &str) -> StreamResult<ResolvedUri> {
    let Some(payload) = raw.strip_prefix(REMOTE_TRACK_PREFIX) else {
        return Ok(ResolvedUri {
            transfer_uri: raw.to_string(),
            display_uri: raw.to_string(),
            content_type: None,
            request_headers: Headers::new(),
        });
    };

    let payload: RemoteTrackPayload = serde_json::from_str(payload)?;

    let mut request_headers = Headers::new();
    if let Some(password) = &payload.password {
        let credentials = BASE64.encode(format!("default:{password}"));
        request_headers.insert("Authorization", format!("Basic {credentials}"));
    }

    Ok(ResolvedUri {
        transfer_uri: payload.uri,
        display_uri: payload.original_uri,
        content_type: Some(
            payload
                .track_type
                .unwrap_or_else(|| DEFAULT_TRACK_TYPE.to_string()),
        ),
        request_headers,
    })
}
