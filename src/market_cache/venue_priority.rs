//! Venue priority selection (§4.1): ordered by (tier ascending, reliability
//! descending), with a single fallback attempt to the next healthy venue
//! with reliability >= 0.5 when the primary fails.

use crate::models::VenueHealth;

pub const FALLBACK_MIN_RELIABILITY: f64 = 0.5;

/// Order candidate venues by (tier ascending, reliability descending).
pub fn select_venues(mut candidates: Vec<VenueHealth>) -> Vec<VenueHealth> {
    candidates.sort_by(|a, b| {
        a.tier
            .cmp(&b.tier)
            .then(b.reliability_score.partial_cmp(&a.reliability_score).unwrap_or(std::cmp::Ordering::Equal))
    });
    candidates
}

/// Given an ordered candidate list and a primary that just failed, find the
/// single fallback candidate (§4.1: "a single fallback attempt").
pub fn fallback_after_failure<'a>(
    ordered: &'a [VenueHealth],
    failed_venue: &crate::models::VenueId,
) -> Option<&'a VenueHealth> {
    ordered
        .iter()
        .find(|v| &v.venue != failed_venue && v.healthy && v.reliability_score >= FALLBACK_MIN_RELIABILITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{VenueId, VenueTier};

    fn health(venue: &str, tier: VenueTier, reliability: f64) -> VenueHealth {
        let mut h = VenueHealth::new(VenueId::from(venue), tier);
        h.reliability_score = reliability;
        h
    }

    #[test]
    fn orders_by_tier_then_reliability() {
        let candidates = vec![
            health("secondary-high-rel", VenueTier::Secondary, 0.99),
            health("primary-low-rel", VenueTier::Primary, 0.6),
            health("primary-high-rel", VenueTier::Primary, 0.9),
        ];
        let ordered = select_venues(candidates);
        assert_eq!(ordered[0].venue, VenueId::from("primary-high-rel"));
        assert_eq!(ordered[1].venue, VenueId::from("primary-low-rel"));
        assert_eq!(ordered[2].venue, VenueId::from("secondary-high-rel"));
    }

    #[test]
    fn fallback_skips_low_reliability() {
        let ordered = vec![
            health("primary", VenueTier::Primary, 0.9),
            health("weak-secondary", VenueTier::Secondary, 0.3),
            health("strong-secondary", VenueTier::Secondary, 0.7),
        ];
        let fallback = fallback_after_failure(&ordered, &VenueId::from("primary")).unwrap();
        assert_eq!(fallback.venue, VenueId::from("strong-secondary"));
    }
}
