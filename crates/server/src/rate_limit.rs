//! Rate limiting middleware for HTTP requests.
//!
//! This is the only place engine results become protocol-visible
//! effects: quota headers on every response, and a 429 short-circuit
//! when an identity's window is exhausted.

use std::{
    fmt::Display,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::body::Body;
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode, header};
use jiff::Timestamp;
use rate_limit::{QuotaManager, QuotaRecord};
use serde_json::json;
use tower::Layer;

use crate::auth::TokenValidator;
use crate::client_ip;

#[derive(Clone)]
pub struct RateLimitLayer {
    manager: Arc<QuotaManager>,
    validator: Option<Arc<dyn TokenValidator>>,
}

impl RateLimitLayer {
    pub fn new(manager: Arc<QuotaManager>, validator: Option<Arc<dyn TokenValidator>>) -> Self {
        Self { manager, validator }
    }
}

impl<Service> Layer<Service> for RateLimitLayer
where
    Service: Send + Clone,
{
    type Service = RateLimitService<Service>;

    fn layer(&self, next: Service) -> Self::Service {
        RateLimitService {
            next,
            manager: self.manager.clone(),
            validator: self.validator.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<Service> {
    next: Service,
    manager: Arc<QuotaManager>,
    validator: Option<Arc<dyn TokenValidator>>,
}

impl<Service, ReqBody> tower::Service<Request<ReqBody>> for RateLimitService<Service>
where
    Service: tower::Service<Request<ReqBody>, Response = Response<Body>> + Send + Clone + 'static,
    Service::Future: Send,
    Service::Error: Display + 'static,
    ReqBody: http_body::Body + Send + 'static,
{
    type Response = http::Response<Body>;
    type Error = Service::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let mut next = self.next.clone();
        let manager = self.manager.clone();
        let validator = self.validator.clone();

        Box::pin(async move {
            let identity = resolve_identity(&req, validator.as_deref());
            let tier = manager.tier_for(req.uri().path(), identity.credential);
            let admission = manager.admit(&identity.key, identity.credential, &tier);

            if !admission.allowed {
                log::debug!("Rate limit exceeded for {}", identity.key);
                return Ok(deny(&admission.record));
            }

            let mut response = next.call(req).await?;
            quota_headers(response.headers_mut(), &admission.record);
            Ok(response)
        })
    }
}

/// The identity a quota record is keyed by.
struct Identity {
    key: String,
    credential: bool,
}

/// Resolve the rate limit identity for a request.
///
/// A validated bearer credential becomes the identity key itself; an
/// invalid or malformed one silently falls back to the client address.
/// Rate limiting must never fail a request over an auth problem.
fn resolve_identity<B>(req: &Request<B>, validator: Option<&dyn TokenValidator>) -> Identity {
    if let Some(validator) = validator
        && let Some(value) = req.headers().get(header::AUTHORIZATION)
        && let Ok(value) = value.to_str()
    {
        let token = value.strip_prefix("Bearer ").unwrap_or(value);

        if validator.is_valid(token) {
            return Identity {
                key: token.to_string(),
                credential: true,
            };
        }
    }

    let key = match client_ip::resolve(req) {
        Some(ip) => ip.to_string(),
        None => "unknown".to_string(),
    };

    Identity { key, credential: false }
}

/// Build the 429 response: quota headers, `Retry-After`, and the
/// structured error payload. The downstream handler is never invoked.
fn deny(record: &QuotaRecord) -> Response<Body> {
    let retry_after = (record.reset_time.as_second() - Timestamp::now().as_second()).max(0);

    let body = json!({
        "success": false,
        "errors": [
            {
                "code": "RATELIMITED",
                "message": "You have been ratelimited! Wait a bit before trying again.",
            }
        ],
    });

    let mut response = Response::builder()
        .status(StatusCode::TOO_MANY_REQUESTS)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::RETRY_AFTER, retry_after)
        .body(Body::from(body.to_string()))
        .unwrap();

    quota_headers(response.headers_mut(), record);
    response
}

/// Set the quota headers; these go out on every response, admitted or not.
fn quota_headers(headers: &mut HeaderMap, record: &QuotaRecord) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(record.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(record.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(record.reset_time.as_millisecond()));

    if let Ok(value) = HeaderValue::from_str(&record.reset_time.to_string()) {
        headers.insert("x-ratelimit-reset-date", value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, routing::get};
    use config::{RateLimitConfig, TierQuota, TiersConfig};
    use std::time::Duration;
    use tower::ServiceExt;

    struct StaticValidator(bool);

    impl TokenValidator for StaticValidator {
        fn is_valid(&self, _token: &str) -> bool {
            self.0
        }
    }

    fn small_tiers() -> TiersConfig {
        TiersConfig {
            default: TierQuota {
                limit: 2,
                duration: Duration::from_secs(60),
            },
            authenticated: TierQuota {
                limit: 5,
                duration: Duration::from_secs(60),
            },
            image_manipulation: TierQuota {
                limit: 3,
                duration: Duration::from_secs(60),
            },
        }
    }

    async fn app(validator: Option<Arc<dyn TokenValidator>>) -> Router {
        let config = RateLimitConfig {
            tiers: small_tiers(),
            ..RateLimitConfig::default()
        };
        let manager = Arc::new(QuotaManager::new(config).await.unwrap());

        Router::new()
            .route("/api/v3/sponsors", get(|| async { "ok" }))
            .route("/api/v2/manipulation", get(|| async { "ok" }))
            .layer(RateLimitLayer::new(manager, validator))
    }

    fn request(path: &str) -> http::request::Builder {
        Request::builder().uri(path).header("X-Real-IP", "10.1.2.3")
    }

    async fn body_json(response: Response<Body>) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn quota_headers_are_set_on_admitted_responses() {
        let app = app(None).await;

        let response = app
            .oneshot(request("/api/v3/sponsors").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "2");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "1");
        assert!(response.headers().contains_key("x-ratelimit-reset"));
        assert!(response.headers().contains_key("x-ratelimit-reset-date"));
    }

    #[tokio::test]
    async fn exhausted_window_yields_a_429_with_retry_after() {
        let app = app(None).await;

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(request("/api/v3/sponsors").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .oneshot(request("/api/v3/sponsors").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");

        let retry_after: i64 = response.headers()[header::RETRY_AFTER].to_str().unwrap().parse().unwrap();
        assert!(retry_after >= 0);

        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["errors"][0]["code"], "RATELIMITED");
    }

    #[tokio::test]
    async fn valid_token_selects_the_authenticated_tier() {
        let app = app(Some(Arc::new(StaticValidator(true)))).await;

        let response = app
            .oneshot(
                request("/api/v3/sponsors")
                    .header(header::AUTHORIZATION, "Bearer some-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()["x-ratelimit-limit"], "5");
    }

    #[tokio::test]
    async fn invalid_token_falls_back_to_the_default_tier() {
        let app = app(Some(Arc::new(StaticValidator(false)))).await;

        let response = app
            .oneshot(
                request("/api/v3/sponsors")
                    .header(header::AUTHORIZATION, "Bearer forged-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        // Not an auth failure, just the anonymous tier.
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "2");
    }

    #[tokio::test]
    async fn image_routes_use_the_strict_tier_even_with_a_token() {
        let app = app(Some(Arc::new(StaticValidator(true)))).await;

        let response = app
            .oneshot(
                request("/api/v2/manipulation")
                    .header(header::AUTHORIZATION, "Bearer some-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()["x-ratelimit-limit"], "3");
    }
}
