//! SSRF-hardened HTTP fetch for `web_resources_seed`:
//! scheme-restricted, DNS-resolve-then-reject-private/loopback/link-local,
//! `.local` hostname rejection, a bounded redirect chain with per-hop
//! re-check, body size cap, content-type gate.

use std::net::IpAddr;
use std::time::Duration;

use url::Url;

use crate::error::{Result, StageError};

const MAX_REDIRECTS: u8 = 6;

#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub final_url: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Fetches `url`, following at most [`MAX_REDIRECTS`] redirects, re-checking
/// every hop against the SSRF policy, capping the body at `max_bytes`, and
/// requiring the response `content-type` to start with one of
/// `allowed_content_type_prefixes`.
pub async fn fetch(url: &str, max_bytes: u64, allowed_content_type_prefixes: &[&str]) -> Result<FetchedResource> {
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(20))
        .build()
        .map_err(|e| StageError::WebFetchRejected(format!("client build failed: {e}")))?;

    let mut current = url.to_string();
    for hop in 0..=MAX_REDIRECTS {
        check_url_is_safe(&current).await?;

        let response = client
            .get(&current)
            .send()
            .await
            .map_err(|e| StageError::WebFetchRejected(format!("request failed: {e}")))?;

        if response.status().is_redirection() {
            if hop == MAX_REDIRECTS {
                return Err(StageError::WebFetchRejected("too many redirects".into()));
            }
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| StageError::WebFetchRejected("redirect with no Location header".into()))?;
            current = resolve_relative(&current, location)?;
            continue;
        }

        if !response.status().is_success() {
            return Err(StageError::WebFetchRejected(format!("upstream status {}", response.status())));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !allowed_content_type_prefixes.iter().any(|p| content_type.starts_with(p)) {
            return Err(StageError::WebFetchRejected(format!("disallowed content-type `{content_type}`")));
        }

        if let Some(len) = response.content_length() {
            if len > max_bytes {
                return Err(StageError::WebFetchRejected(format!("content-length {len} exceeds cap {max_bytes}")));
            }
        }

        let final_url = response.url().to_string();
        let bytes = read_capped(response, max_bytes).await?;
        return Ok(FetchedResource { final_url, content_type, bytes });
    }

    Err(StageError::WebFetchRejected("redirect loop exhausted hop budget".into()))
}

async fn read_capped(response: reqwest::Response, max_bytes: u64) -> Result<Vec<u8>> {
    use futures::StreamExt;
    let mut stream = response.bytes_stream();
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| StageError::WebFetchRejected(format!("body read failed: {e}")))?;
        buf.extend_from_slice(&chunk);
        if buf.len() as u64 > max_bytes {
            return Err(StageError::WebFetchRejected(format!("body exceeded cap of {max_bytes} bytes")));
        }
    }
    Ok(buf)
}

fn resolve_relative(base: &str, location: &str) -> Result<String> {
    let base_url = Url::parse(base).map_err(|e| StageError::WebFetchRejected(format!("bad base url: {e}")))?;
    base_url
        .join(location)
        .map(|u| u.to_string())
        .map_err(|e| StageError::WebFetchRejected(format!("bad redirect location: {e}")))
}

/// Rejects anything but `https://`, hostnames ending in `.local`, and any
/// resolved IP that is private/loopback/link-local/unspecified/multicast:
/// DNS is resolved and every returned address is checked before the fetch
/// proceeds.
async fn check_url_is_safe(raw: &str) -> Result<()> {
    let url = Url::parse(raw).map_err(|e| StageError::WebFetchRejected(format!("invalid url: {e}")))?;

    if url.scheme() != "https" {
        return Err(StageError::WebFetchRejected(format!("scheme `{}` not allowed", url.scheme())));
    }

    let host = url.host_str().ok_or_else(|| StageError::WebFetchRejected("url has no host".into()))?;
    if host.eq_ignore_ascii_case("localhost") || host.to_ascii_lowercase().ends_with(".local") {
        return Err(StageError::WebFetchRejected(format!("hostname `{host}` not allowed")));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        reject_unsafe_ip(ip)?;
        return Ok(());
    }

    let port = url.port_or_known_default().unwrap_or(443);
    let addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| StageError::WebFetchRejected(format!("DNS resolution failed for `{host}`: {e}")))?;

    let mut resolved_any = false;
    for addr in addrs {
        resolved_any = true;
        reject_unsafe_ip(addr.ip())?;
    }
    if !resolved_any {
        return Err(StageError::WebFetchRejected(format!("DNS resolution for `{host}` returned no addresses")));
    }
    Ok(())
}

fn reject_unsafe_ip(ip: IpAddr) -> Result<()> {
    let unsafe_ip = match ip {
        IpAddr::V4(v4) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified() || v4.is_multicast() || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_multicast()
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    };
    if unsafe_ip {
        Err(StageError::WebFetchRejected(format!("resolved address {ip} is not publicly routable")))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_https_scheme() {
        let err = check_url_is_safe("http://example.com").await.unwrap_err();
        assert!(matches!(err, StageError::WebFetchRejected(_)));
    }

    #[tokio::test]
    async fn rejects_dot_local_hostnames() {
        let err = check_url_is_safe("https://printer.local").await.unwrap_err();
        assert!(matches!(err, StageError::WebFetchRejected(_)));
    }

    #[tokio::test]
    async fn rejects_loopback_literal_ip() {
        let err = check_url_is_safe("https://127.0.0.1").await.unwrap_err();
        assert!(matches!(err, StageError::WebFetchRejected(_)));
    }

    #[tokio::test]
    async fn rejects_private_literal_ip() {
        let err = check_url_is_safe("https://10.0.0.5").await.unwrap_err();
        assert!(matches!(err, StageError::WebFetchRejected(_)));
    }

    #[test]
    fn resolve_relative_joins_against_base() {
        let joined = resolve_relative("https://example.com/a/b", "/c").unwrap();
        assert_eq!(joined, "https://example.com/c");
    }

    #[test]
    fn reject_unsafe_ip_allows_public_v4() {
        assert!(reject_unsafe_ip("93.184.216.34".parse().unwrap()).is_ok());
    }

    #[test]
    fn reject_unsafe_ip_rejects_v6_link_local() {
        assert!(reject_unsafe_ip("fe80::1".parse().unwrap()).is_err());
    }

    #[test]
    fn reject_unsafe_ip_allows_public_v6() {
        assert!(reject_unsafe_ip("2606:2800:220:1:248:1893:25c8:1946".parse().unwrap()).is_ok());
    }
}
