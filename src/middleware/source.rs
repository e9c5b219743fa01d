use anyhow::{Result, bail};
use http::HeaderName;
use http::header::HOST;

use crate::config::SourceCriterion;

use super::Request;

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Maps a request to a traffic-source identity plus the number of quota
/// units it consumes. Built-in strategies always report one unit; custom
/// implementations may weight sources differently.
pub trait SourceExtractor: Send + Sync + std::fmt::Debug {
    fn extract(&self, req: &Request) -> Result<(String, i64)>;
}

/// Builds the extractor for a criterion, rejecting ambiguous configuration.
/// An unset criterion falls back to the peer-address IP strategy.
pub(crate) fn build_source_extractor(
    criterion: &SourceCriterion,
) -> Result<Box<dyn SourceExtractor>> {
    let configured = usize::from(criterion.ip_strategy.is_some())
        + usize::from(criterion.request_header_name.is_some())
        + usize::from(criterion.request_host);
    if configured > 1 {
        bail!("only one source criterion strategy may be set");
    }

    if let Some(strategy) = &criterion.ip_strategy {
        return Ok(Box::new(IpSource {
            depth: strategy.depth,
        }));
    }
    if let Some(name) = &criterion.request_header_name {
        let name = HeaderName::try_from(name.as_str())
            .map_err(|_| anyhow::anyhow!("invalid source header name '{name}'"))?;
        return Ok(Box::new(HeaderSource { name }));
    }
    if criterion.request_host {
        return Ok(Box::new(HostSource));
    }
    Ok(Box::new(IpSource { depth: 0 }))
}

#[derive(Debug)]
struct IpSource {
    depth: usize,
}

impl SourceExtractor for IpSource {
    fn extract(&self, req: &Request) -> Result<(String, i64)> {
        if self.depth == 0 {
            return Ok((req.peer.ip().to_string(), 1));
        }

        let forwarded = req
            .headers
            .get(&X_FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        let entries: Vec<&str> = forwarded
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .collect();
        if entries.len() < self.depth {
            bail!(
                "x-forwarded-for has {} entries, need depth {}",
                entries.len(),
                self.depth
            );
        }
        Ok((entries[entries.len() - self.depth].to_string(), 1))
    }
}

#[derive(Debug)]
struct HeaderSource {
    name: HeaderName,
}

impl SourceExtractor for HeaderSource {
    fn extract(&self, req: &Request) -> Result<(String, i64)> {
        let value = req
            .headers
            .get(&self.name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if value.is_empty() {
            bail!("source header '{}' missing from request", self.name);
        }
        Ok((value.to_string(), 1))
    }
}

#[derive(Debug)]
struct HostSource;

impl SourceExtractor for HostSource {
    fn extract(&self, req: &Request) -> Result<(String, i64)> {
        if let Some(host) = req.headers.get(HOST).and_then(|value| value.to_str().ok())
            && !host.is_empty()
        {
            return Ok((host.to_string(), 1));
        }
        if let Some(host) = req.uri.host() {
            return Ok((host.to_string(), 1));
        }
        bail!("request carries no host");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IpStrategy;
    use http::{HeaderMap, HeaderValue, Method, Uri};

    fn request(headers: HeaderMap) -> Request {
        Request {
            method: Method::GET,
            uri: Uri::from_static("/resource"),
            headers,
            peer: "203.0.113.7:44218".parse().unwrap(),
        }
    }

    #[test]
    fn default_criterion_uses_peer_ip() {
        let extractor = build_source_extractor(&SourceCriterion::default()).unwrap();
        let (source, amount) = extractor.extract(&request(HeaderMap::new())).unwrap();
        assert_eq!(source, "203.0.113.7");
        assert_eq!(amount, 1);
    }

    #[test]
    fn ip_depth_picks_from_forwarded_chain() {
        let criterion = SourceCriterion {
            ip_strategy: Some(IpStrategy { depth: 2 }),
            ..Default::default()
        };
        let extractor = build_source_extractor(&criterion).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("10.0.0.1, 192.0.2.5, 198.51.100.9"),
        );
        let (source, _) = extractor.extract(&request(headers)).unwrap();
        assert_eq!(source, "192.0.2.5");
    }

    #[test]
    fn ip_depth_beyond_chain_fails_extraction() {
        let criterion = SourceCriterion {
            ip_strategy: Some(IpStrategy { depth: 3 }),
            ..Default::default()
        };
        let extractor = build_source_extractor(&criterion).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));
        assert!(extractor.extract(&request(headers)).is_err());
    }

    #[test]
    fn header_strategy_requires_the_header() {
        let criterion = SourceCriterion {
            request_header_name: Some("x-api-client".to_string()),
            ..Default::default()
        };
        let extractor = build_source_extractor(&criterion).unwrap();

        assert!(extractor.extract(&request(HeaderMap::new())).is_err());

        let mut headers = HeaderMap::new();
        headers.insert("x-api-client", HeaderValue::from_static("tenant-a"));
        let (source, _) = extractor.extract(&request(headers)).unwrap();
        assert_eq!(source, "tenant-a");
    }

    #[test]
    fn host_strategy_reads_host_header() {
        let criterion = SourceCriterion {
            request_host: true,
            ..Default::default()
        };
        let extractor = build_source_extractor(&criterion).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("api.example.com"));
        let (source, _) = extractor.extract(&request(headers)).unwrap();
        assert_eq!(source, "api.example.com");
    }

    #[test]
    fn ambiguous_criterion_is_rejected() {
        let criterion = SourceCriterion {
            ip_strategy: Some(IpStrategy::default()),
            request_host: true,
            ..Default::default()
        };
        let err = build_source_extractor(&criterion).unwrap_err();
        assert!(err.to_string().contains("only one source criterion"));
    }

    #[test]
    fn invalid_header_name_is_rejected() {
        let criterion = SourceCriterion {
            request_header_name: Some("bad header\n".to_string()),
            ..Default::default()
        };
        assert!(build_source_extractor(&criterion).is_err());
    }
}
