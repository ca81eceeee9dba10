//! Comparison of the totals declared by the mother trailer against the
//! totals recomputed from the routed records. Divergence is reported, never
//! fatal: children are produced either way.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictStatus {
    Ok,
    Divergent,
}

#[derive(Debug, Clone, Serialize)]
pub struct DimensionVerdict {
    pub name: &'static str,
    pub expected: i64,
    pub computed: i64,
    pub status: VerdictStatus,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub dimensions: Vec<DimensionVerdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Verdict {
    pub fn from_dimensions(dimensions: Vec<DimensionVerdict>) -> Self {
        let status = if dimensions
            .iter()
            .all(|d| d.status == VerdictStatus::Ok)
        {
            VerdictStatus::Ok
        } else {
            VerdictStatus::Divergent
        };
        Verdict {
            status,
            dimensions,
            note: None,
        }
    }

    /// A verdict with nothing to compare (e.g. a simplified extract without
    /// a mother trailer, or a file without movement).
    pub fn ok_with_note(note: impl Into<String>) -> Self {
        Verdict {
            status: VerdictStatus::Ok,
            dimensions: Vec::new(),
            note: Some(note.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == VerdictStatus::Ok
    }
}

/// Compares one dimension within a tolerance in cents (default zero).
pub fn compare(name: &'static str, expected: i64, computed: i64, tolerance: i64) -> DimensionVerdict {
    let delta = computed - expected;
    if delta.abs() <= tolerance {
        DimensionVerdict {
            name,
            expected,
            computed,
            status: VerdictStatus::Ok,
            detail: "totals consistent".to_string(),
        }
    } else {
        let side = if delta > 0 { "high" } else { "low" };
        DimensionVerdict {
            name,
            expected,
            computed,
            status: VerdictStatus::Divergent,
            detail: format!("divergence of {} cents ({side})", delta.abs()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_is_ok() {
        let d = compare("liquido", 35801, 35801, 0);
        assert_eq!(d.status, VerdictStatus::Ok);
    }

    #[test]
    fn divergence_reports_delta_and_side() {
        let d = compare("bruto", 1000, 900, 0);
        assert_eq!(d.status, VerdictStatus::Divergent);
        assert_eq!(d.detail, "divergence of 100 cents (low)");

        let d = compare("bruto", 900, 1000, 0);
        assert_eq!(d.detail, "divergence of 100 cents (high)");
    }

    #[test]
    fn tolerance_absorbs_small_deltas() {
        let d = compare("liquido", 1000, 998, 5);
        assert_eq!(d.status, VerdictStatus::Ok);
    }

    #[test]
    fn overall_status_requires_every_dimension() {
        let verdict = Verdict::from_dimensions(vec![
            compare("bruto", 1, 1, 0),
            compare("liquido", 2, 1, 0),
        ]);
        assert_eq!(verdict.status, VerdictStatus::Divergent);
        assert!(!verdict.is_ok());
    }
}
