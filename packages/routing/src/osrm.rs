//! OSRM route client.
//!
//! Queries the `route/v1/driving` endpoint with full GeoJSON geometry.
//! OSRM coordinates are `[lng, lat]` in both the request path and the
//! response geometry.
//!
//! See <https://project-osrm.org/docs/v5.24.0/api/#route-service>

use std::time::Duration;

use async_trait::async_trait;
use civic_dispatch_models::{GeoPoint, Route, RouteSource};

use crate::{RouteProvider, RoutingError};

/// Public demo instance.
pub const DEFAULT_OSRM_BASE_URL: &str = "https://router.project-osrm.org";

/// Route provider backed by an OSRM server.
#[derive(Debug, Clone)]
pub struct OsrmRouteProvider {
    client: reqwest::Client,
    base_url: String,
}

impl OsrmRouteProvider {
    /// Creates a client for the OSRM server at `base_url` whose requests
    /// give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::Http`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RoutingError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetches a route, surfacing any failure.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError`] if the request fails, the server answers
    /// with an error status, or the body has no usable route.
    pub async fn fetch_route(&self, start: GeoPoint, end: GeoPoint) -> Result<Route, RoutingError> {
        let url = format!(
            "{}/route/v1/driving/{},{};{},{}",
            self.base_url, start.lng, start.lat, end.lng, end.lat
        );

        let resp = self
            .client
            .get(&url)
            .query(&[("overview", "full"), ("geometries", "geojson")])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(RoutingError::Status {
                status: resp.status().as_u16(),
            });
        }

        let body: serde_json::Value = resp.json().await?;
        parse_response(&body)
    }
}

#[async_trait]
impl RouteProvider for OsrmRouteProvider {
    async fn route(&self, start: GeoPoint, end: GeoPoint) -> Route {
        match self.fetch_route(start, end).await {
            Ok(route) => route,
            Err(e) => {
                log::warn!("OSRM route failed, using straight line: {e}");
                Route::straight_line(start, end)
            }
        }
    }
}

/// Parses an OSRM route response, taking the first route.
fn parse_response(body: &serde_json::Value) -> Result<Route, RoutingError> {
    if let Some(code) = body["code"].as_str().filter(|code| *code != "Ok") {
        return Err(RoutingError::Parse {
            message: format!("OSRM answered {code}"),
        });
    }

    let route = body["routes"]
        .as_array()
        .and_then(|routes| routes.first())
        .ok_or_else(|| RoutingError::Parse {
            message: "No routes in OSRM response".to_string(),
        })?;

    let coordinates = route["geometry"]["coordinates"]
        .as_array()
        .ok_or_else(|| RoutingError::Parse {
            message: "Missing geometry in OSRM response".to_string(),
        })?;

    let polyline = coordinates
        .iter()
        .map(|pair| match (pair[0].as_f64(), pair[1].as_f64()) {
            (Some(lng), Some(lat)) => Ok(GeoPoint::new(lat, lng)),
            _ => Err(RoutingError::Parse {
                message: format!("Bad coordinate in OSRM geometry: {pair}"),
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    if polyline.len() < 2 {
        return Err(RoutingError::Parse {
            message: format!("OSRM geometry has {} points", polyline.len()),
        });
    }

    Ok(Route {
        distance_meters: route["distance"].as_f64(),
        duration_seconds: route["duration"].as_f64(),
        polyline,
        source: RouteSource::External,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_osrm_route() {
        let body = serde_json::json!({
            "code": "Ok",
            "routes": [{
                "distance": 1520.4,
                "duration": 210.7,
                "geometry": {
                    "type": "LineString",
                    "coordinates": [[80.2707, 13.0827], [80.2750, 13.0860], [80.28, 13.09]]
                }
            }]
        });
        let route = parse_response(&body).unwrap();
        assert_eq!(route.source, RouteSource::External);
        assert_eq!(route.polyline.len(), 3);
        assert!((route.polyline[0].lat - 13.0827).abs() < 1e-9);
        assert!((route.polyline[0].lng - 80.2707).abs() < 1e-9);
        assert_eq!(route.distance_meters, Some(1520.4));
        assert_eq!(route.duration_seconds, Some(210.7));
    }

    #[test]
    fn rejects_error_code() {
        let body = serde_json::json!({ "code": "NoRoute", "routes": [] });
        assert!(matches!(
            parse_response(&body),
            Err(RoutingError::Parse { .. })
        ));
    }

    #[test]
    fn rejects_degenerate_geometry() {
        let body = serde_json::json!({
            "code": "Ok",
            "routes": [{ "geometry": { "coordinates": [[80.27, 13.08]] } }]
        });
        assert!(parse_response(&body).is_err());
    }

    #[test]
    fn rejects_missing_routes() {
        assert!(parse_response(&serde_json::json!({})).is_err());
    }

    #[tokio::test]
    async fn unreachable_server_falls_back() {
        let provider =
            OsrmRouteProvider::new("http://127.0.0.1:9/", Duration::from_millis(200)).unwrap();
        let start = GeoPoint::new(13.0827, 80.2707);
        let end = GeoPoint::new(13.09, 80.28);
        let route = provider.route(start, end).await;
        assert_eq!(route, Route::straight_line(start, end));
    }
}
