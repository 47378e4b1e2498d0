use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use http::HeaderMap;
use http::header::{HeaderName, HeaderValue, RETRY_AFTER};

use crate::error::{Error, TransportErrorKind};

pub(crate) const MAX_ERROR_BODY_LEN: usize = 2048;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn redact_uri_for_logs(uri_text: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(uri_text) else {
        return uri_text.split('?').next().unwrap_or(uri_text).to_owned();
    };

    let _ = parsed.set_username("");
    let _ = parsed.set_password(None);
    parsed.set_query(None);
    parsed.set_fragment(None);
    parsed.to_string()
}

pub(crate) fn is_absolute_url(url: &str) -> bool {
    let Some((scheme, rest)) = url.split_once("://") else {
        return false;
    };
    !scheme.is_empty()
        && !rest.is_empty()
        && scheme
            .chars()
            .all(|item| item.is_ascii_alphanumeric() || item == '_')
}

/// Resolves `path` against `base` with WHATWG URL semantics: a leading slash
/// replaces the base path, a bare segment replaces the last base segment.
pub(crate) fn join_url(base: &str, path: &str) -> Result<String, Error> {
    let base_url = url::Url::parse(base).map_err(|_| Error::InvalidUri {
        uri: base.to_owned(),
    })?;
    base_url
        .join(path)
        .map(String::from)
        .map_err(|_| Error::InvalidUri {
            uri: path.to_owned(),
        })
}

pub(crate) fn append_query(path: &str, query: &str) -> String {
    if query.is_empty() {
        return path.to_owned();
    }
    let separator = if path.contains('?') { '&' } else { '?' };
    format!("{path}{separator}{query}")
}

pub(crate) fn query_keys(query: &str) -> Vec<String> {
    let mut keys = Vec::new();
    for (name, _) in url::form_urlencoded::parse(query.as_bytes()) {
        let name = name.into_owned();
        if !keys.contains(&name) {
            keys.push(name);
        }
    }
    keys
}

/// Low-cardinality grouping tag for a request: the domain is stripped, query
/// values are wiped and argument names not already present as `:name`
/// placeholders in the path are appended, sorted.
pub(crate) fn request_shape(path: &str, arg_keys: &[String]) -> String {
    let without_domain = match path.split_once("://") {
        Some((scheme, rest))
            if !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|item| item.is_ascii_alphanumeric() || item == '_') =>
        {
            rest.find('/').map_or("", |index| &rest[index..])
        }
        _ => path,
    };

    let mut shape = String::with_capacity(without_domain.len());
    let mut wiping = false;
    for item in without_domain.chars() {
        match item {
            '=' => {
                shape.push('=');
                wiping = true;
            }
            '&' => {
                shape.push('&');
                wiping = false;
            }
            _ if wiping => {}
            _ => shape.push(item),
        }
    }

    let placeholders = path_placeholders(&shape);
    let mut keys = arg_keys
        .iter()
        .filter(|key| !placeholders.iter().any(|placeholder| placeholder == *key))
        .map(String::as_str)
        .collect::<Vec<_>>();
    keys.sort_unstable();
    keys.dedup();
    if !keys.is_empty() {
        shape.push(':');
        shape.push_str(&keys.join(","));
    }
    shape
}

fn path_placeholders(path: &str) -> Vec<String> {
    let mut placeholders = Vec::new();
    let mut rest = path;
    while let Some(index) = rest.find(':') {
        rest = &rest[index + 1..];
        let name = rest
            .chars()
            .take_while(|item| item.is_ascii_alphanumeric() || *item == '_')
            .collect::<String>();
        if !name.is_empty() {
            placeholders.push(name);
        }
    }
    placeholders
}

pub(crate) fn classify_transport_error(
    error: &hyper_util::client::legacy::Error,
) -> TransportErrorKind {
    if error.is_connect() {
        let text = error_chain_text(error);
        if text.contains("dns")
            || text.contains("name or service not known")
            || text.contains("failed to lookup address")
            || text.contains("no address found")
        {
            return TransportErrorKind::Dns;
        }
        if text.contains("tls") || text.contains("certificate") || text.contains("handshake") {
            return TransportErrorKind::Tls;
        }
        return TransportErrorKind::Connect;
    }

    let text = error_chain_text(error);
    if text.contains("read")
        || text.contains("connection reset")
        || text.contains("broken pipe")
        || text.contains("unexpected eof")
    {
        return TransportErrorKind::Read;
    }

    TransportErrorKind::Other
}

fn error_chain_text(error: &(dyn std::error::Error + 'static)) -> String {
    let mut text = error.to_string().to_ascii_lowercase();
    let mut source = error.source();
    while let Some(current) = source {
        text.push_str(": ");
        text.push_str(&current.to_string().to_ascii_lowercase());
        source = current.source();
    }
    text
}

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName, Error> {
    name.parse().map_err(|source| Error::InvalidHeaderName {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue, Error> {
    value.parse().map_err(|source| Error::InvalidHeaderValue {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn parse_retry_after(headers: &HeaderMap, now: SystemTime) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?;
    let raw_value = value.to_str().ok()?.trim();
    if let Ok(seconds) = raw_value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let date = httpdate::parse_http_date(raw_value).ok()?;
    match date.duration_since(now) {
        Ok(duration) => Some(duration),
        Err(_) => Some(Duration::ZERO),
    }
}

pub(crate) fn truncate_text(text: &str) -> String {
    if text.chars().count() <= MAX_ERROR_BODY_LEN {
        return text.to_owned();
    }

    let truncated: String = text.chars().take(MAX_ERROR_BODY_LEN).collect();
    format!("{truncated}...(truncated)")
}

pub(crate) fn truncate_body(body: &[u8]) -> String {
    truncate_text(&String::from_utf8_lossy(body))
}

pub(crate) fn format_headers(headers: &HeaderMap) -> String {
    headers
        .iter()
        .map(|(name, value)| {
            format!(
                "{}: {}",
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes())
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
