//! `key=value` list parsing for query strings and `Cookie` headers.

use crate::http::multidict::MultiDict;
use memchr::memchr;
use percent_encoding::percent_decode;
use std::borrow::Cow;

/// Splits `data` on `separator` into `(key, value)` byte pairs.
///
/// A segment without `=` becomes `(segment, "")`; empty segments are skipped,
/// so `a=1&&b` yields two pairs.
pub(crate) fn pairs(data: &[u8], separator: u8) -> impl Iterator<Item = (&[u8], &[u8])> {
    let mut start = 0;

    std::iter::from_fn(move || {
        while start < data.len() {
            let end = memchr(separator, &data[start..])
                .map(|pos| start + pos)
                .unwrap_or(data.len());

            let segment = &data[start..end];
            start = end + 1;

            if segment.is_empty() {
                continue;
            }

            return Some(match memchr(b'=', segment) {
                Some(index) => (&segment[..index], &segment[index + 1..]),
                None => (segment, &b""[..]),
            });
        }

        None
    })
}

/// Parses a query string (leading `?` optional) into a [`MultiDict`],
/// percent-decoding keys and values and turning `+` into a space.
pub(crate) fn parse_query(query: &str) -> MultiDict {
    let data = query.strip_prefix('?').unwrap_or(query).as_bytes();

    pairs(data, b'&')
        .map(|(key, value)| (decode_component(key), decode_component(value)))
        .collect()
}

/// Parses a `Cookie` header value (`a=1; b=2`) into a [`MultiDict`].
///
/// Cookie values are taken verbatim apart from surrounding whitespace
/// and optional double quotes.
pub(crate) fn parse_cookies(header: &str) -> MultiDict {
    pairs(header.as_bytes(), b';')
        .filter_map(|(key, value)| {
            let key = String::from_utf8_lossy(key).trim().to_owned();
            let value = String::from_utf8_lossy(value);
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);

            (!key.is_empty()).then(|| (key, value.to_owned()))
        })
        .collect()
}

#[inline]
fn decode_component(raw: &[u8]) -> String {
    let raw: Cow<[u8]> = match memchr(b'+', raw) {
        Some(_) => raw
            .iter()
            .map(|&b| if b == b'+' { b' ' } else { b })
            .collect::<Vec<u8>>()
            .into(),
        None => raw.into(),
    };

    percent_decode(&raw).decode_utf8_lossy().into_owned()
}
