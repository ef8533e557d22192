//! Client address resolution.

use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use http::Request;

/// Resolve the client address for a request, first match wins:
/// a trusted-proxy `True-Client-IP`, then `X-Real-IP`, then the first
/// hop of `X-Forwarded-For`, then the socket's remote address.
///
/// Unparseable header values fall through silently to the next source;
/// identity resolution must never fail a request.
pub(crate) fn resolve<B>(req: &Request<B>) -> Option<IpAddr> {
    for header in ["true-client-ip", "x-real-ip"] {
        if let Some(value) = req.headers().get(header)
            && let Ok(value) = value.to_str()
            && let Ok(ip) = value.trim().parse::<IpAddr>()
        {
            return Some(ip);
        }
    }

    if let Some(forwarded_for) = req.headers().get("x-forwarded-for")
        && let Ok(value) = forwarded_for.to_str()
        && let Some(first_hop) = value.split(',').next()
        && let Ok(ip) = first_hop.trim().parse::<IpAddr>()
    {
        return Some(ip);
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|connect_info| connect_info.0.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> http::request::Builder {
        Request::builder().uri("/api/v3/sponsors")
    }

    #[test]
    fn true_client_ip_wins() {
        let req = request()
            .header("True-Client-IP", "10.0.0.1")
            .header("X-Real-IP", "10.0.0.2")
            .header("X-Forwarded-For", "10.0.0.3, 10.0.0.4")
            .body(())
            .unwrap();

        assert_eq!(resolve(&req), Some("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn x_real_ip_beats_forwarded_for() {
        let req = request()
            .header("X-Real-IP", "10.0.0.2")
            .header("X-Forwarded-For", "10.0.0.3")
            .body(())
            .unwrap();

        assert_eq!(resolve(&req), Some("10.0.0.2".parse().unwrap()));
    }

    #[test]
    fn forwarded_for_takes_the_first_hop_only() {
        let req = request()
            .header("X-Forwarded-For", "10.0.0.3, 10.0.0.4, 10.0.0.5")
            .body(())
            .unwrap();

        assert_eq!(resolve(&req), Some("10.0.0.3".parse().unwrap()));
    }

    #[test]
    fn garbage_headers_fall_through_to_connect_info() {
        let mut req = request()
            .header("True-Client-IP", "not an ip")
            .header("X-Forwarded-For", "also not an ip")
            .body(())
            .unwrap();

        req.extensions_mut()
            .insert(ConnectInfo::<SocketAddr>("192.168.1.7:9999".parse().unwrap()));

        assert_eq!(resolve(&req), Some("192.168.1.7".parse().unwrap()));
    }

    #[test]
    fn nothing_resolvable_yields_none() {
        let req = request().body(()).unwrap();
        assert_eq!(resolve(&req), None);
    }
}
