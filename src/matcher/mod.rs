//! Geolocation-based responder matching.
//!
//! Ranks available responders by great-circle distance from the user,
//! with ties broken by how long ago they were last tasked so that load
//! spreads across the network. The registry behind the matcher is
//! read-only; responder lifecycle is owned elsewhere.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::{GeoPoint, Responder, ResponderId, ResponderRole};

/// Read-only view of the responder registry.
#[async_trait]
pub trait ResponderRegistry: Send + Sync {
    /// All registered responders with the given role.
    async fn query_responders(&self, role: ResponderRole) -> Vec<Responder>;
}

/// In-memory registry, used for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryResponderRegistry {
    responders: RwLock<Vec<Responder>>,
}

impl InMemoryResponderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a responder by id.
    pub fn upsert(&self, responder: Responder) {
        let mut responders = self.responders.write();
        if let Some(existing) = responders.iter_mut().find(|r| r.id == responder.id) {
            *existing = responder;
        } else {
            responders.push(responder);
        }
    }

    /// Mark a responder available or busy.
    pub fn set_available(&self, id: &ResponderId, available: bool) {
        if let Some(r) = self.responders.write().iter_mut().find(|r| &r.id == id) {
            r.available = available;
        }
    }
}

#[async_trait]
impl ResponderRegistry for InMemoryResponderRegistry {
    async fn query_responders(&self, role: ResponderRole) -> Vec<Responder> {
        self.responders
            .read()
            .iter()
            .filter(|r| r.role == role)
            .cloned()
            .collect()
    }
}

/// A responder candidate with its computed distance.
#[derive(Debug, Clone)]
pub struct RankedResponder {
    /// The matched responder
    pub responder: Responder,
    /// Great-circle distance from the user in kilometers
    pub distance_km: f64,
}

/// Ranks candidate responders for an alert location.
pub struct EmergencyNetworkMatcher {
    registry: Arc<dyn ResponderRegistry>,
}

impl EmergencyNetworkMatcher {
    /// Create a matcher over a registry.
    pub fn new(registry: Arc<dyn ResponderRegistry>) -> Self {
        Self { registry }
    }

    /// Return the `k` nearest available responders of `role` within
    /// `radius_km` of `location`.
    ///
    /// Ordering is deterministic: ascending distance, then ascending
    /// `last_response_at` (never-tasked responders first).
    pub async fn rank(
        &self,
        location: GeoPoint,
        role: ResponderRole,
        radius_km: f64,
        k: usize,
    ) -> Vec<RankedResponder> {
        let mut candidates: Vec<RankedResponder> = self
            .registry
            .query_responders(role)
            .await
            .into_iter()
            .filter(|r| r.available)
            .map(|r| {
                let distance_km = location.haversine_km(&r.location);
                RankedResponder {
                    responder: r,
                    distance_km,
                }
            })
            .filter(|c| c.distance_km <= radius_km)
            .collect();

        candidates.sort_by(|a, b| {
            a.distance_km
                .total_cmp(&b.distance_km)
                .then_with(|| a.responder.last_response_at.cmp(&b.responder.last_response_at))
        });
        candidates.truncate(k);

        tracing::debug!(
            role = %role,
            radius_km,
            matched = candidates.len(),
            "Ranked responder candidates"
        );

        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn responder(
        name: &str,
        lat: f64,
        lon: f64,
        available: bool,
        last_response_at: Option<chrono::DateTime<Utc>>,
    ) -> Responder {
        Responder {
            id: ResponderId::new(),
            name: name.to_string(),
            role: ResponderRole::Volunteer,
            phone: "+15550000".to_string(),
            location: GeoPoint::new(lat, lon),
            available,
            last_response_at,
        }
    }

    fn matcher_with(responders: Vec<Responder>) -> EmergencyNetworkMatcher {
        let registry = InMemoryResponderRegistry::new();
        for r in responders {
            registry.upsert(r);
        }
        EmergencyNetworkMatcher::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_nearest_first() {
        let origin = GeoPoint::new(0.0, 0.0);
        let matcher = matcher_with(vec![
            responder("far", 0.010, 0.0, true, None),
            responder("near", 0.001, 0.0, true, None),
        ]);

        let ranked = matcher.rank(origin, ResponderRole::Volunteer, 2.0, 5).await;
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].responder.name, "near");
        assert!(ranked[0].distance_km < ranked[1].distance_km);
    }

    #[tokio::test]
    async fn test_unavailable_and_out_of_radius_filtered() {
        let origin = GeoPoint::new(0.0, 0.0);
        let matcher = matcher_with(vec![
            responder("busy", 0.001, 0.0, false, None),
            responder("distant", 1.0, 0.0, true, None), // ~111 km away
            responder("ok", 0.002, 0.0, true, None),
        ]);

        let ranked = matcher.rank(origin, ResponderRole::Volunteer, 2.0, 5).await;
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].responder.name, "ok");
    }

    #[tokio::test]
    async fn test_equal_distance_tie_break_by_last_response() {
        let origin = GeoPoint::new(0.0, 0.0);
        let recent = Utc::now();
        let older = recent - Duration::hours(6);

        // Same location for both, so distance is identical.
        let matcher = matcher_with(vec![
            responder("recently-tasked", 0.001, 0.0, true, Some(recent)),
            responder("rested", 0.001, 0.0, true, Some(older)),
            responder("never-tasked", 0.001, 0.0, true, None),
        ]);

        let ranked = matcher.rank(origin, ResponderRole::Volunteer, 2.0, 5).await;
        assert_eq!(ranked[0].responder.name, "never-tasked");
        assert_eq!(ranked[1].responder.name, "rested");
        assert_eq!(ranked[2].responder.name, "recently-tasked");
    }

    #[tokio::test]
    async fn test_truncates_to_k() {
        let origin = GeoPoint::new(0.0, 0.0);
        let matcher = matcher_with(
            (0..10)
                .map(|i| responder(&format!("v{i}"), 0.001 * (i + 1) as f64, 0.0, true, None))
                .collect(),
        );

        let ranked = matcher.rank(origin, ResponderRole::Volunteer, 5.0, 3).await;
        assert_eq!(ranked.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_registry_is_not_an_error() {
        let matcher = matcher_with(vec![]);
        let ranked = matcher
            .rank(GeoPoint::new(0.0, 0.0), ResponderRole::Doctor, 2.0, 5)
            .await;
        assert!(ranked.is_empty());
    }
}
