use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use tower_governor::{key_extractor::KeyExtractor, GovernorError};

/// Client-IP key extractor: X-Forwarded-For first (reverse proxies), then the
/// peer address. Requests with no identifiable address share one localhost
/// bucket so limiting still works behind opaque transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIpKeyExtractor;

impl KeyExtractor for ClientIpKeyExtractor {
    type Key = IpAddr;

    fn extract<T>(&self, req: &Request<T>) -> Result<Self::Key, GovernorError> {
        let forwarded = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|ip| ip.trim().parse::<IpAddr>().ok());
        if let Some(ip) = forwarded {
            return Ok(ip);
        }

        if let Some(connect_info) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
            return Ok(connect_info.0.ip());
        }

        Ok(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_header(value: &str) -> Request<()> {
        Request::builder()
            .header("x-forwarded-for", value)
            .body(())
            .unwrap()
    }

    #[test]
    fn forwarded_for_takes_the_first_hop() {
        let req = request_with_header("203.0.113.7, 10.0.0.1");
        let key = ClientIpKeyExtractor.extract(&req).unwrap();
        assert_eq!(key, "203.0.113.7".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn malformed_forwarded_for_falls_back_to_localhost() {
        let req = request_with_header("not-an-ip");
        let key = ClientIpKeyExtractor.extract(&req).unwrap();
        assert_eq!(key, IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn bare_request_falls_back_to_localhost() {
        let req = Request::builder().body(()).unwrap();
        let key = ClientIpKeyExtractor.extract(&req).unwrap();
        assert_eq!(key, IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
}
