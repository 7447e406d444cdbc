use url::Url;

use crate::error::{DownloadError, Result};
use crate::state::Cookie;

pub fn get_filename_from_url(url_str: &str) -> Result<String> {
    let url = Url::parse(url_str).map_err(|source| DownloadError::InvalidUrl {
        url: url_str.to_string(),
        source,
    })?;

    if let Some(segments) = url.path_segments() {
        if let Some(filename) = segments.last() {
            if is_usable_name(filename) {
                return Ok(filename.to_string());
            }
        }
    }

    // Fallback if no filename found in path
    Ok(format!("download_{}", uuid::Uuid::new_v4()))
}

/// Extracts the quoted or bare `filename` parameter of a Content-Disposition
/// value, reduced to its last path component.
pub fn filename_from_disposition(value: &str) -> Option<String> {
    value
        .match_indices("filename")
        .find_map(|(start, key)| filename_param(&value[start + key.len()..]))
}

fn filename_param(after_key: &str) -> Option<String> {
    // `filename*=` carries an encoded name we do not decode
    let rest = after_key.trim_start().strip_prefix('=')?.trim_start();

    let raw = match rest.strip_prefix('"') {
        Some(quoted) => &quoted[..quoted.find('"')?],
        None => rest.split(';').next().unwrap_or_default().trim(),
    };

    let base = raw.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or_default();
    is_usable_name(base).then(|| base.to_string())
}

/// Logical name for a download: the Content-Disposition filename when
/// present, otherwise the last segment of the URL path.
pub fn logical_name(disposition: Option<&str>, url: &str) -> Result<String> {
    match disposition.and_then(filename_from_disposition) {
        Some(name) => Ok(name),
        None => get_filename_from_url(url),
    }
}

fn is_usable_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".."
}

/// Parses `a=1; b=2` into cookies. Pairs without `=` are dropped.
pub fn parse_cookies(raw: &str) -> Vec<Cookie> {
    raw.split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            (!name.is_empty()).then(|| Cookie {
                name: name.to_string(),
                value: value.trim().to_string(),
            })
        })
        .collect()
}

/// Renders cookies as a single `Cookie` request header value.
pub fn cookie_header(cookies: &[Cookie]) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }
    Some(
        cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; "),
    )
}
