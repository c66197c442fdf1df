//! Page URL normalization.
//!
//! A normalized URL has no fragment and carries the `headless` marker query
//! parameter, which tells the target page it is being rendered for a
//! snapshot. It doubles as the render-cache key.

use url::Url;

/// Query parameter injected into every rendered page URL.
pub const MARKER_PARAM: &str = "headless";

/// Strip the fragment and set the marker parameter.
///
/// Any existing marker occurrences are replaced by a single empty one at
/// the end of the query, so inputs that differ only by fragment or by the
/// marker map to the same string.
pub fn normalize(raw: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(raw)?;
    url.set_fragment(None);

    let pairs = retained_pairs(&url);
    url.query_pairs_mut()
        .clear()
        .extend_pairs(pairs)
        .append_pair(MARKER_PARAM, "");

    Ok(url)
}

/// Remove the marker parameter, dropping the query entirely if it was the
/// only parameter.
pub fn strip_marker(url: &Url) -> Url {
    let mut stripped = url.clone();
    let pairs = retained_pairs(url);
    if pairs.is_empty() {
        stripped.set_query(None);
    } else {
        stripped.query_pairs_mut().clear().extend_pairs(pairs);
    }
    stripped
}

/// Host with an explicit port if one is present (`example.com:8080`).
pub fn url_host(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn retained_pairs(url: &Url) -> Vec<(String, String)> {
    url.query_pairs()
        .filter(|(key, _)| key != MARKER_PARAM)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect()
}
