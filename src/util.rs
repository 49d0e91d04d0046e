use std::sync::{Mutex, MutexGuard, PoisonError};

use http::HeaderMap;
use http::header::{HeaderName, HeaderValue};
use url::{Position, Url};

use crate::error::Error;

const MAX_ERROR_BODY_CHARS: usize = 2048;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn merge_headers(defaults: &HeaderMap, overrides: &HeaderMap) -> HeaderMap {
    let mut merged = defaults.clone();
    merged.extend(overrides.clone());
    merged
}

pub(crate) fn redact_uri_for_logs(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) if parsed.has_host() => format!(
            "{}://{}",
            parsed.scheme(),
            &parsed[Position::BeforeHost..Position::AfterPath]
        ),
        Ok(parsed) => parsed[..Position::AfterPath].to_owned(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_owned(),
    }
}

fn is_absolute_http(url: &str) -> bool {
    url.split_once("://").is_some_and(|(scheme, _)| {
        scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https")
    })
}

pub(crate) fn resolve_url(base_url: Option<&str>, path: &str) -> String {
    let base = match base_url {
        Some(base) if !is_absolute_http(path) => base.trim_end_matches('/'),
        _ => return path.to_owned(),
    };
    match path.trim_start_matches('/') {
        "" => base.to_owned(),
        relative if base.is_empty() => relative.to_owned(),
        relative => format!("{base}/{relative}"),
    }
}

pub(crate) fn validate_base_url(base_url: &str) -> Result<(), Error> {
    let invalid = || Error::InvalidUri {
        uri: base_url.to_owned(),
    };
    let parsed = Url::parse(base_url).map_err(|_| invalid())?;
    if !matches!(parsed.scheme(), "http" | "https") || !parsed.has_host() {
        return Err(invalid());
    }
    Ok(())
}

pub(crate) fn append_query_pairs(url: &str, query_pairs: &[(String, String)]) -> String {
    if query_pairs.is_empty() {
        return url.to_owned();
    }
    if let Ok(mut parsed) = Url::parse(url) {
        parsed.query_pairs_mut().extend_pairs(query_pairs);
        return parsed.into();
    }

    let (without_fragment, fragment) = match url.split_once('#') {
        Some((left, right)) => (left, Some(right)),
        None => (url, None),
    };
    let encoded = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(query_pairs)
        .finish();
    let separator = match without_fragment.split_once('?') {
        Some((_, "")) => "",
        Some(_) => "&",
        None => "?",
    };
    let mut merged = format!("{without_fragment}{separator}{encoded}");
    if let Some(fragment) = fragment {
        merged.push('#');
        merged.push_str(fragment);
    }
    merged
}

pub(crate) fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), Error> {
    let header_name = name
        .parse::<HeaderName>()
        .map_err(|source| Error::InvalidHeaderName {
            name: name.to_owned(),
            source,
        })?;
    let header_value = value
        .parse::<HeaderValue>()
        .map_err(|source| Error::InvalidHeaderValue {
            name: header_name.as_str().to_owned(),
            source,
        })?;
    Ok((header_name, header_value))
}

pub(crate) fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    match text.char_indices().nth(MAX_ERROR_BODY_CHARS) {
        Some((cut, _)) => format!("{}...(truncated)", &text[..cut]),
        None => text.into_owned(),
    }
}
