//! URL normalization for deduplication and host accounting.

use url::{form_urlencoded, Url};

/// Query keys dropped as tracking noise (in addition to any `utm_*` key).
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "yclid", "mc_cid", "mc_eid", "_ga", "ref", "ref_src",
    "referrer", "source", "trk", "igshid", "si",
];

/// Query keys that only select a page of a listing.
const PAGINATION_PARAMS: &[&str] = &[
    "page", "p", "pg", "paged", "start", "offset", "seite", "pagenum", "page_num",
];

pub fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

pub fn is_pagination_param(key: &str) -> bool {
    PAGINATION_PARAMS.contains(&key.to_ascii_lowercase().as_str())
}

/// Normalize a URL: lowercase scheme and host, drop userinfo, default port,
/// fragment, tracking and pagination parameters, and trailing slashes.
///
/// Idempotent: `normalize_url(&normalize_url(u)) == normalize_url(u)`.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let parsed = match Url::parse(trimmed) {
        Ok(u) if !u.cannot_be_a_base() && u.host_str().is_some() => u,
        _ => return normalize_unparsed(trimmed),
    };

    // Checked above
    let host = parsed.host_str().unwrap_or_default();
    let mut out = format!("{}://{}", parsed.scheme(), host);
    if let Some(port) = parsed.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }
    out.push_str(parsed.path().trim_end_matches('/'));

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k) && !is_pagination_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if !kept.is_empty() {
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(kept)
            .finish();
        out.push('?');
        out.push_str(&query);
    }

    out
}

fn normalize_unparsed(raw: &str) -> String {
    let without_fragment = raw.split('#').next().unwrap_or_default();
    without_fragment.trim_end_matches('/').to_string()
}

/// Extract the lowercase host of a URL.
pub fn extract_host(url: &str) -> Option<String> {
    Url::parse(url.trim())
        .ok()
        .and_then(|u| u.host_str().map(|s| s.to_ascii_lowercase()))
        .filter(|h| !h.is_empty())
}

/// Portal name for a host: the host without a leading `www.`.
pub fn portal_for_host(host: &str) -> String {
    host.strip_prefix("www.").unwrap_or(host).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tracking_params() {
        assert_eq!(
            normalize_url("https://example.com/job?id=7&utm_source=x&UTM_MEDIUM=y&fbclid=abc"),
            "https://example.com/job?id=7"
        );
    }

    #[test]
    fn strips_pagination_params() {
        assert_eq!(
            normalize_url("https://example.com/list?q=nurse&page=3&offset=20"),
            "https://example.com/list?q=nurse"
        );
    }

    #[test]
    fn strips_trailing_slash_and_fragment() {
        assert_eq!(
            normalize_url("https://example.com/jobs/#top"),
            "https://example.com/jobs"
        );
        assert_eq!(normalize_url("https://example.com/"), "https://example.com");
        assert_eq!(normalize_url("https://example.com//a//"), "https://example.com//a");
    }

    #[test]
    fn lowercases_host_and_drops_default_port() {
        assert_eq!(
            normalize_url("HTTPS://User:pw@Example.COM:443/Path"),
            "https://example.com/Path"
        );
        assert_eq!(
            normalize_url("http://example.com:8080/a/"),
            "http://example.com:8080/a"
        );
    }

    #[test]
    fn drops_query_marker_when_everything_is_stripped() {
        assert_eq!(
            normalize_url("https://example.com/a?utm_campaign=z&page=2"),
            "https://example.com/a"
        );
    }

    #[test]
    fn idempotent() {
        let inputs = [
            "https://example.com/job?id=7&utm_source=x",
            "https://example.com/",
            "https://example.com",
            "https://example.com/a b/?q=hello world&page=2#frag",
            "https://example.com/?q=a+b&x",
            "http://[::1]:8080/x/",
            "not a url/#frag",
            "mailto:someone@example.com",
            "  https://Example.com/Path/?Ref=abc  ",
            "",
        ];
        for input in inputs {
            let once = normalize_url(input);
            assert_eq!(normalize_url(&once), once, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn extract_host_lowercases() {
        assert_eq!(
            extract_host("https://Jobs.Example.com/x"),
            Some("jobs.example.com".to_string())
        );
        assert_eq!(extract_host("garbage"), None);
    }

    #[test]
    fn portal_strips_www() {
        assert_eq!(portal_for_host("www.example.com"), "example.com");
        assert_eq!(portal_for_host("jobs.example.com"), "jobs.example.com");
    }
}
