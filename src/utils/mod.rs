//! Utility functions and helpers.

pub mod http;

use url::Url;

use crate::error::Result;

/// URL of the following search page: `p` (default 1) becomes `p + 1`.
///
/// Other query parameters keep their order.
pub fn next_page_url(url: &str) -> Result<String> {
    let mut parsed = Url::parse(url)?;
    let mut current = None;
    let mut pairs: Vec<(String, String)> = Vec::new();

    for (key, value) in parsed.query_pairs() {
        if key == "p" && current.is_none() {
            current = Some(value.parse::<u32>().unwrap_or(1));
            pairs.push((key.into_owned(), String::new()));
        } else if key != "p" {
            pairs.push((key.into_owned(), value.into_owned()));
        }
    }

    let next = current.unwrap_or(1).saturating_add(1).to_string();
    match pairs.iter_mut().find(|(key, _)| key == "p") {
        Some((_, value)) => *value = next,
        None => pairs.push(("p".to_string(), next)),
    }

    parsed.query_pairs_mut().clear().extend_pairs(&pairs);
    Ok(parsed.to_string())
}

/// Join a site origin and an absolute path without doubling the slash.
pub fn absolute_url(origin: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        origin.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
