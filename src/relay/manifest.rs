//! HLS manifest rewriting.
//!
//! Every URI in a playlist is resolved against the base URL and replaced with
//! a gateway URL of the form `<gateway>?url=<encoded absolute URI>`, so
//! segments, keys and variant playlists route back through `/stream`.
//! Line count, line endings and everything that is not a URI are preserved.

use bytes::BytesMut;
use futures::StreamExt;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use streamrelay_common::{Error, Result};
use url::Url;

use super::fetcher::BodyStream;

/// Content type of every rewritten manifest.
pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Characters left unescaped in a query value, matching what browsers'
/// `encodeURIComponent` leaves alone.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Percent-encode a URL for use as a query value.
pub fn encode_query_value(value: &str) -> String {
    utf8_percent_encode(value, QUERY_VALUE).to_string()
}

/// Build the gateway URL for one absolute upstream URI.
pub fn gateway_url(gateway: &str, absolute: &str) -> String {
    format!("{gateway}?url={}", encode_query_value(absolute))
}

/// Rewrite a manifest.
///
/// `base` is the final upstream URL (after redirects); `gateway` is the
/// absolute `/stream` endpoint of this server.
pub fn rewrite(manifest: &str, base: &Url, gateway: &str) -> String {
    let mut output = String::with_capacity(manifest.len() * 2);

    for (i, raw_line) in manifest.split('\n').enumerate() {
        if i > 0 {
            output.push('\n');
        }
        let (line, cr) = match raw_line.strip_suffix('\r') {
            Some(stripped) => (stripped, "\r"),
            None => (raw_line, ""),
        };
        output.push_str(&rewrite_line(line, base, gateway));
        output.push_str(cr);
    }

    output
}

fn rewrite_line(line: &str, base: &Url, gateway: &str) -> String {
    let trimmed = line.trim();

    if trimmed.is_empty() {
        return line.to_string();
    }

    if trimmed.starts_with('#') {
        return rewrite_uri_attributes(line, base, gateway);
    }

    match resolve(trimmed, base) {
        Some(absolute) => {
            let start = line.len() - line.trim_start().len();
            let end = start + trimmed.len();
            format!(
                "{}{}{}",
                &line[..start],
                gateway_url(gateway, &absolute),
                &line[end..]
            )
        }
        None => {
            tracing::debug!(uri = %trimmed, "Leaving unresolvable manifest entry as-is");
            line.to_string()
        }
    }
}

/// Rewrite every quoted `URI=` attribute in a tag line, keeping its quotes.
fn rewrite_uri_attributes(line: &str, base: &Url, gateway: &str) -> String {
    const ATTR: &str = "URI=";
    let mut result = String::with_capacity(line.len() * 2);
    let mut remaining = line;

    while let Some(start) = remaining.find(ATTR) {
        let value_start = start + ATTR.len();
        result.push_str(&remaining[..value_start]);
        remaining = &remaining[value_start..];

        let quote = match remaining.chars().next() {
            Some(q @ ('"' | '\'')) => q,
            _ => continue,
        };
        let Some(len) = remaining[1..].find(quote) else {
            break;
        };

        let uri = &remaining[1..1 + len];
        match resolve(uri, base) {
            Some(absolute) => {
                result.push(quote);
                result.push_str(&gateway_url(gateway, &absolute));
                result.push(quote);
            }
            None => result.push_str(&remaining[..len + 2]),
        }
        remaining = &remaining[len + 2..];
    }

    result.push_str(remaining);
    result
}

/// Resolve a possibly-relative URI against the base. Absolute URIs resolve
/// to themselves.
fn resolve(uri: &str, base: &Url) -> Option<String> {
    if uri.is_empty() {
        return None;
    }
    base.join(uri).ok().map(String::from)
}

/// Buffer the rest of a manifest body behind its peeked prefix.
///
/// Fails with [`Error::ManifestTooLarge`] once more than `limit` bytes arrive.
pub async fn read_manifest(prefix: &[u8], body: &mut BodyStream, limit: usize) -> Result<String> {
    if prefix.len() > limit {
        return Err(Error::ManifestTooLarge { limit });
    }

    let mut buf = BytesMut::from(prefix);
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        if buf.len() + chunk.len() > limit {
            return Err(Error::ManifestTooLarge { limit });
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(String::from_utf8_lossy(&buf).into_owned())
}
