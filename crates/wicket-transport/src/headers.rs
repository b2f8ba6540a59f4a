/// Order-preserving header multimap. Repeated names keep every value.
pub type Headers = Vec<(String, String)>;

/// Case-insensitive name prefixes removed before forwarding a request
/// upstream. `Host` is re-injected with the upstream hostname; the CDN and
/// referrer families would leak deployment metadata.
const STRIPPED_PREFIXES: [&str; 6] = [
    "host",
    "accept-encoding",
    "cf-",
    "cdn-",
    "referer",
    "referrer",
];

/// First value for `name`, matched case-insensitively without allocating.
pub fn header_get<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers.iter().find_map(|(candidate, value)| {
        candidate
            .eq_ignore_ascii_case(name)
            .then_some(value.as_str())
    })
}

pub fn is_stripped_header(name: &str) -> bool {
    let name = name.as_bytes();
    STRIPPED_PREFIXES.iter().any(|prefix| {
        let prefix = prefix.as_bytes();
        name.len() >= prefix.len() && name[..prefix.len()].eq_ignore_ascii_case(prefix)
    })
}

/// Drops every header whose name matches a stripped prefix. Idempotent:
/// filtering an already-filtered set is a no-op.
pub fn filter_forward_headers(headers: &Headers) -> Headers {
    headers
        .iter()
        .filter(|(name, _)| !is_stripped_header(name))
        .cloned()
        .collect()
}

pub fn from_http_headers(map: &http::HeaderMap) -> Headers {
    let mut out = Vec::new();
    for (name, value) in map {
        if let Ok(value) = value.to_str() {
            out.push((name.as_str().to_string(), value.to_string()));
        }
    }
    out
}
