//! Quota tier selection.

use std::sync::LazyLock;
use std::time::Duration;

use config::{TierQuota, TiersConfig};
use regex::Regex;

/// Routes constrained by the image manipulation tier, with or without a
/// versioned API prefix (`/api/manipulation`, `/api/v2/manipulation/...`).
static IMAGE_MANIPULATION_ROUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/api(?:/v\d+)?/manipulation(?:/|$)").expect("route pattern is valid"));

/// The quota values applied when a record is created for an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierPolicy {
    /// Maximum number of requests in the window.
    pub limit: u32,
    /// Window duration.
    pub window: Duration,
    /// Whether this is the resource-heavy image manipulation tier.
    pub image_manipulation: bool,
}

impl TierPolicy {
    /// Select the tier for a request.
    ///
    /// Route-based selection takes precedence over credentials: an image
    /// manipulation route is always constrained by the stricter tier,
    /// even for a caller otherwise entitled to the authenticated tier.
    pub fn select(tiers: &TiersConfig, path: &str, credential_valid: bool) -> Self {
        if IMAGE_MANIPULATION_ROUTE.is_match(path) {
            return Self::from_quota(&tiers.image_manipulation, true);
        }

        if credential_valid {
            Self::from_quota(&tiers.authenticated, false)
        } else {
            Self::from_quota(&tiers.default, false)
        }
    }

    fn from_quota(quota: &TierQuota, image_manipulation: bool) -> Self {
        Self {
            limit: quota.limit,
            window: quota.duration,
            image_manipulation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiers() -> TiersConfig {
        TiersConfig::default()
    }

    #[test]
    fn anonymous_ordinary_route_gets_default_tier() {
        let tier = TierPolicy::select(&tiers(), "/api/v3/sponsors/octocat", false);

        assert_eq!(tier.limit, 1200);
        assert_eq!(tier.window, Duration::from_secs(3600));
        assert!(!tier.image_manipulation);
    }

    #[test]
    fn valid_credential_gets_authenticated_tier() {
        let tier = TierPolicy::select(&tiers(), "/api/v3/sponsors/octocat", true);

        assert_eq!(tier.limit, 2500);
        assert_eq!(tier.window, Duration::from_secs(3600));
    }

    #[test]
    fn image_manipulation_routes_match_with_and_without_version() {
        for path in ["/api/manipulation", "/api/v2/manipulation", "/api/v3/manipulation/blur"] {
            let tier = TierPolicy::select(&tiers(), path, false);
            assert!(tier.image_manipulation, "{path} should select the image tier");
            assert_eq!(tier.limit, 100);
            assert_eq!(tier.window, Duration::from_secs(900));
        }
    }

    #[test]
    fn image_tier_takes_precedence_over_credential() {
        let tier = TierPolicy::select(&tiers(), "/api/v2/manipulation", true);

        assert!(tier.image_manipulation);
        assert_eq!(tier.limit, 100);
    }

    #[test]
    fn unrelated_paths_do_not_match_the_image_pattern() {
        for path in ["/api/manipulations", "/manipulation", "/api/v2/images"] {
            let tier = TierPolicy::select(&tiers(), path, false);
            assert!(!tier.image_manipulation, "{path} should not select the image tier");
        }
    }
}
