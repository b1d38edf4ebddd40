use geo::Intersects;
use serde::Serialize;
use tracing::{debug, info};

use crate::polygon::Geometry;

/// Detail reported when no contact is found.
pub const DEFAULT_DETAIL: &str = "No encroachment detected.";

/// Detail reported when vegetation touches a cable.
pub const CABLE_CONTACT_DETAIL: &str = "CRITICAL: Detected vegetation contacting power lines!";

/// Detail reported when vegetation touches a tower (only with tower checks on).
pub const TOWER_CONTACT_DETAIL: &str = "CRITICAL: Detected vegetation contacting a transmission tower!";

/// Outcome of a contact test.
///
/// `risk_detected` and `details` are only constructed together, so a positive
/// flag always carries a critical detail and a negative one the default detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskAssessment {
    pub risk_detected: bool,
    pub details: &'static str,
}

impl RiskAssessment {
    pub const fn clear() -> Self {
        Self {
            risk_detected: false,
            details: DEFAULT_DETAIL,
        }
    }

    const fn contact(details: &'static str) -> Self {
        Self {
            risk_detected: true,
            details,
        }
    }
}

impl Default for RiskAssessment {
    fn default() -> Self {
        Self::clear()
    }
}

/// Tests vegetation geometry against infrastructure geometry.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskEvaluator {
    include_towers: bool,
}

impl RiskEvaluator {
    pub const fn new(include_towers: bool) -> Self {
        Self { include_towers }
    }

    pub const fn includes_towers(&self) -> bool {
        self.include_towers
    }

    /// Vegetation x cable contact test.
    pub fn evaluate(&self, vegetation: &[Geometry], cables: &[Geometry]) -> RiskAssessment {
        self.evaluate_all(vegetation, cables, &[])
    }

    /// Vegetation x cable contact test, followed by vegetation x tower when
    /// tower checks are enabled. Towers are ignored otherwise.
    pub fn evaluate_all(
        &self,
        vegetation: &[Geometry],
        cables: &[Geometry],
        towers: &[Geometry],
    ) -> RiskAssessment {
        if let Some((v, c)) = find_contact(vegetation, cables) {
            info!(vegetation = v, cable = c, "vegetation contacting cable");
            return RiskAssessment::contact(CABLE_CONTACT_DETAIL);
        }
        if self.include_towers {
            if let Some((v, t)) = find_contact(vegetation, towers) {
                info!(vegetation = v, tower = t, "vegetation contacting tower");
                return RiskAssessment::contact(TOWER_CONTACT_DETAIL);
            }
        }
        debug!(
            vegetation = vegetation.len(),
            cables = cables.len(),
            towers = towers.len(),
            "no contact found"
        );
        RiskAssessment::clear()
    }
}

/// Index pair of the first intersecting `(source, target)` geometries.
///
/// Multi-ring geometries are expanded into their rings. Iteration follows the
/// slice order and stops at the first hit.
pub fn find_contact(sources: &[Geometry], targets: &[Geometry]) -> Option<(usize, usize)> {
    sources.iter().enumerate().find_map(|(i, source)| {
        source.parts().into_iter().find_map(|source_part| {
            targets.iter().enumerate().find_map(|(j, target)| {
                target
                    .parts()
                    .into_iter()
                    .any(|target_part| source_part.intersects(target_part))
                    .then_some((i, j))
            })
        })
    })
}
