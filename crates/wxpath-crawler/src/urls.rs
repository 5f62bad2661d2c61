use url::Url;

/// Canonical URL form used for deduplication and provenance: lowercased
/// scheme and host, default ports stripped, fragment removed, empty path
/// rendered as `/`. Percent-encoding and query order are preserved.
pub fn canonicalize(url: &str) -> Result<String, url::ParseError> {
    let mut u = Url::parse(url)?;
    u.set_fragment(None);
    Ok(u.to_string())
}

/// Resolves `href` against `base` and canonicalises the result. Returns
/// `None` for unparseable references and non-HTTP schemes (mailto:,
/// javascript:, ...).
pub fn resolve(base: &str, href: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    let mut joined = base.join(href.trim()).ok()?;
    if !matches!(joined.scheme(), "http" | "https") {
        return None;
    }
    joined.set_fragment(None);
    Some(joined.to_string())
}

/// Canonical host key for per-host limits and throttling: `host` or
/// `host:port` when a non-default port is present.
pub fn host_key(url: &str) -> Option<String> {
    let u = Url::parse(url).ok()?;
    let host = u.host_str()?.to_string();
    Some(match u.port() {
        Some(port) => format!("{host}:{port}"),
        None => host,
    })
}

/// Scheme + authority, for locating a host's robots.txt.
pub fn origin(url: &str) -> Option<String> {
    let u = Url::parse(url).ok()?;
    let host = u.host_str()?;
    Some(match u.port() {
        Some(port) => format!("{}://{}:{}", u.scheme(), host, port),
        None => format!("{}://{}", u.scheme(), host),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_form() {
        assert_eq!(
            canonicalize("HTTP://Example.COM:80").unwrap(),
            "http://example.com/"
        );
        assert_eq!(
            canonicalize("https://example.com:443/a#frag").unwrap(),
            "https://example.com/a"
        );
        assert_eq!(
            canonicalize("http://example.com:8080/a?b=1&a=2").unwrap(),
            "http://example.com:8080/a?b=1&a=2"
        );
    }

    #[test]
    fn resolve_relative_refs() {
        assert_eq!(
            resolve("http://h/a/b", "../x").as_deref(),
            Some("http://h/x")
        );
        assert_eq!(
            resolve("http://h/a", "/y#frag").as_deref(),
            Some("http://h/y")
        );
        assert_eq!(
            resolve("http://h/a", "http://other/z").as_deref(),
            Some("http://other/z")
        );
        assert_eq!(resolve("http://h/a", "mailto:x@y"), None);
        assert_eq!(resolve("http://h/a", "javascript:void(0)"), None);
    }

    #[test]
    fn host_keys_include_non_default_ports() {
        assert_eq!(host_key("http://h/a").as_deref(), Some("h"));
        assert_eq!(host_key("http://h:8080/a").as_deref(), Some("h:8080"));
        assert_eq!(origin("http://h:8080/a/b").as_deref(), Some("http://h:8080"));
    }
}
