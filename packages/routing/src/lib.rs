#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Driving routes for dispatched units.
//!
//! A [`RouteProvider`] always produces a [`Route`]. Providers backed by a
//! network service recover every failure into the two-point straight-line
//! route, so callers handle one shape and never see routing errors.

pub mod osrm;

use std::time::Duration;

use async_trait::async_trait;
use civic_dispatch_models::{GeoPoint, Route};

pub use osrm::OsrmRouteProvider;

/// Errors from talking to a routing service. Never returned by
/// [`RouteProvider::route`].
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("Routing service returned status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// The response could not be understood.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of what went wrong.
        message: String,
    },
}

/// Source of driving routes.
#[async_trait]
pub trait RouteProvider: Send + Sync {
    /// Route from `start` to `end`. Never fails; falls back to
    /// [`Route::straight_line`].
    async fn route(&self, start: GeoPoint, end: GeoPoint) -> Route;
}

/// Provider that always answers with the straight line.
#[derive(Debug, Clone, Copy, Default)]
pub struct StraightLineRouteProvider;

#[async_trait]
impl RouteProvider for StraightLineRouteProvider {
    async fn route(&self, start: GeoPoint, end: GeoPoint) -> Route {
        Route::straight_line(start, end)
    }
}

/// Asks `provider` for a route, giving up after `limit`.
///
/// A provider that is slower than `limit` is abandoned and the straight
/// line is returned instead.
pub async fn route_within(
    provider: &dyn RouteProvider,
    start: GeoPoint,
    end: GeoPoint,
    limit: Duration,
) -> Route {
    if let Ok(route) = tokio::time::timeout(limit, provider.route(start, end)).await {
        route
    } else {
        log::warn!("Routing timed out after {limit:?}, using straight line");
        Route::straight_line(start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use civic_dispatch_models::RouteSource;

    struct StalledProvider;

    #[async_trait]
    impl RouteProvider for StalledProvider {
        async fn route(&self, start: GeoPoint, end: GeoPoint) -> Route {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Route {
                distance_meters: Some(1.0),
                duration_seconds: Some(1.0),
                polyline: vec![start, end],
                source: RouteSource::External,
            }
        }
    }

    #[tokio::test]
    async fn stalled_provider_degrades_to_straight_line() {
        let start = GeoPoint::new(13.0827, 80.2707);
        let end = GeoPoint::new(13.09, 80.28);
        let route = route_within(&StalledProvider, start, end, Duration::from_millis(20)).await;
        assert_eq!(route, Route::straight_line(start, end));
    }

    #[tokio::test]
    async fn straight_line_has_both_endpoints() {
        let start = GeoPoint::new(13.0, 80.0);
        let end = GeoPoint::new(13.1, 80.1);
        let route = StraightLineRouteProvider.route(start, end).await;
        assert_eq!(route.polyline, vec![start, end]);
        assert_eq!(route.source, RouteSource::Fallback);
    }
}
