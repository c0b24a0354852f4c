//! Age units, the composite age window, and time-rule post-filters.
//!
//! All comparison and filtering happens in years before present; the unit
//! the client asked for only matters when records are shaped for output.

use serde::Serialize;

const YBP_PER_MA: f64 = 1_000_000.0;

/// Age unit a client may request or supply values in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgeUnit {
    Ma,
    Ybp,
}

impl AgeUnit {
    pub fn parse(s: &str) -> Option<AgeUnit> {
        match s.to_ascii_lowercase().as_str() {
            "ma" => Some(AgeUnit::Ma),
            "ybp" | "yr" | "years" => Some(AgeUnit::Ybp),
            _ => None,
        }
    }

    /// Convert a value in this unit to years before present.
    pub fn to_ybp(self, v: f64) -> f64 {
        match self {
            AgeUnit::Ma => v * YBP_PER_MA,
            AgeUnit::Ybp => v,
        }
    }

    /// Convert a canonical ybp value into this unit.
    pub fn from_ybp(self, v: f64) -> f64 {
        match self {
            AgeUnit::Ma => v / YBP_PER_MA,
            AgeUnit::Ybp => v,
        }
    }
}

/// Policy for comparing a record's age span against the request window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRule {
    Contain,
    #[default]
    Major,
    Buffer,
    Overlap,
}

impl TimeRule {
    pub fn parse(s: &str) -> Option<TimeRule> {
        match s.to_ascii_lowercase().as_str() {
            "contain" => Some(TimeRule::Contain),
            "major" => Some(TimeRule::Major),
            "buffer" => Some(TimeRule::Buffer),
            "overlap" => Some(TimeRule::Overlap),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeRule::Contain => "contain",
            TimeRule::Major => "major",
            TimeRule::Buffer => "buffer",
            TimeRule::Overlap => "overlap",
        }
    }
}

/// The request's age window in canonical years before present.
///
/// `min_ybp` is the young edge, `max_ybp` the old edge. Buffers widen the
/// window under the `buffer` rule only.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgeWindow {
    pub min_ybp: Option<f64>,
    pub max_ybp: Option<f64>,
    pub old_buffer_ybp: Option<f64>,
    pub young_buffer_ybp: Option<f64>,
}

impl AgeWindow {
    pub fn is_bounded(&self) -> bool {
        self.min_ybp.is_some() || self.max_ybp.is_some()
    }

    /// Window span: `max - (min|0)`. Basis for percentage buffers.
    pub fn range_ybp(&self) -> Option<f64> {
        self.max_ybp.map(|max| max - self.min_ybp.unwrap_or(0.0))
    }

    /// Apply the client-side post-filter for `rule` to a record span.
    ///
    /// Records with no age information pass: the upstream already applied
    /// its coarse overlap and there is nothing to re-judge. Under
    /// `contain`/`overlap` the upstream is trusted and no filtering happens.
    pub fn passes(&self, rule: TimeRule, older: Option<f64>, younger: Option<f64>) -> bool {
        match rule {
            TimeRule::Contain | TimeRule::Overlap => true,
            TimeRule::Major => self.passes_major(older, younger),
            TimeRule::Buffer => self.passes_buffer(older, younger),
        }
    }

    /// Keep records whose overlap with the window is at least half the
    /// record's own span. Zero-span records pass iff they lie inside the
    /// closed window.
    fn passes_major(&self, older: Option<f64>, younger: Option<f64>) -> bool {
        let (older, younger) = match span(older, younger) {
            Some(pair) => pair,
            None => return true,
        };
        let win_min = self.min_ybp.unwrap_or(0.0);
        let win_max = self.max_ybp.unwrap_or(f64::INFINITY);

        let rec_span = older - younger;
        if rec_span <= 0.0 {
            return younger >= win_min && older <= win_max;
        }
        let overlap = older.min(win_max) - younger.max(win_min);
        if overlap <= 0.0 {
            return false;
        }
        overlap / rec_span >= 0.5
    }

    /// Keep records fully inside the buffered window.
    fn passes_buffer(&self, older: Option<f64>, younger: Option<f64>) -> bool {
        let old_limit = self
            .max_ybp
            .map(|max| max + self.old_buffer_ybp.unwrap_or(0.0));
        let young_limit = self
            .min_ybp
            .map(|min| (min - self.young_buffer_ybp.unwrap_or(0.0)).max(0.0));

        if let (Some(older), Some(limit)) = (older, old_limit) {
            if older > limit {
                return false;
            }
        }
        if let (Some(younger), Some(limit)) = (younger, young_limit) {
            if younger < limit {
                return false;
            }
        }
        true
    }
}

/// Normalize an age pair: fills a missing edge from the other so a
/// single-valued record is treated as zero-span.
fn span(older: Option<f64>, younger: Option<f64>) -> Option<(f64, f64)> {
    match (older, younger) {
        (Some(o), Some(y)) => Some((o.max(y), o.min(y))),
        (Some(o), None) => Some((o, o)),
        (None, Some(y)) => Some((y, y)),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(min_ma: f64, max_ma: f64) -> AgeWindow {
        AgeWindow {
            min_ybp: Some(min_ma * 1e6),
            max_ybp: Some(max_ma * 1e6),
            ..Default::default()
        }
    }

    #[test]
    fn unit_round_trip() {
        for v in [0.0, 1.5, 780_000.0] {
            for unit in [AgeUnit::Ma, AgeUnit::Ybp] {
                let there = unit.to_ybp(v);
                assert!((unit.from_ybp(there) - v).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn major_keeps_majority_overlap() {
        let w = window(1.0, 2.0);
        // span [1.4, 2.1] Ma: overlap 0.6, span 0.7 -> 0.857
        assert!(w.passes(TimeRule::Major, Some(2.1e6), Some(1.4e6)));
        // span [1.9, 5.0] Ma: overlap 0.1, span 3.1 -> 0.032
        assert!(!w.passes(TimeRule::Major, Some(5.0e6), Some(1.9e6)));
    }

    #[test]
    fn major_boundary_is_exactly_half() {
        let w = window(1.0, 2.0);
        // span [1.5, 2.5]: overlap 0.5, span 1.0 -> exactly 0.5 passes
        assert!(w.passes(TimeRule::Major, Some(2.5e6), Some(1.5e6)));
        // nudge out
        assert!(!w.passes(TimeRule::Major, Some(2.500_001e6), Some(1.500_001e6)));
    }

    #[test]
    fn major_zero_span_inside_closed_window() {
        let w = window(1.0, 2.0);
        assert!(w.passes(TimeRule::Major, Some(2.0e6), Some(2.0e6)));
        assert!(w.passes(TimeRule::Major, Some(1.0e6), Some(1.0e6)));
        assert!(!w.passes(TimeRule::Major, Some(2.1e6), Some(2.1e6)));
    }

    #[test]
    fn major_disjoint_record_fails() {
        let w = window(1.0, 2.0);
        assert!(!w.passes(TimeRule::Major, Some(0.9e6), Some(0.5e6)));
    }

    #[test]
    fn recordless_age_passes() {
        let w = window(1.0, 2.0);
        assert!(w.passes(TimeRule::Major, None, None));
        assert!(w.passes(TimeRule::Buffer, None, None));
    }

    #[test]
    fn buffer_widens_the_window() {
        let mut w = window(1.0, 2.0);
        w.old_buffer_ybp = Some(0.5e6);
        w.young_buffer_ybp = Some(0.25e6);
        assert!(w.passes(TimeRule::Buffer, Some(2.4e6), Some(0.8e6)));
        assert!(!w.passes(TimeRule::Buffer, Some(2.6e6), Some(1.2e6)));
        assert!(!w.passes(TimeRule::Buffer, Some(1.8e6), Some(0.7e6)));
    }

    #[test]
    fn zero_buffer_accepts_only_the_base_window() {
        let mut w = window(1.0, 2.0);
        w.old_buffer_ybp = Some(0.0);
        w.young_buffer_ybp = Some(0.0);
        assert!(w.passes(TimeRule::Buffer, Some(2.0e6), Some(1.0e6)));
        assert!(!w.passes(TimeRule::Buffer, Some(2.000_001e6), Some(1.0e6)));
        assert!(!w.passes(TimeRule::Buffer, Some(2.0e6), Some(0.999_999e6)));
    }

    #[test]
    fn young_buffer_clamps_at_present() {
        let mut w = AgeWindow {
            min_ybp: Some(1_000.0),
            max_ybp: Some(10_000.0),
            ..Default::default()
        };
        w.young_buffer_ybp = Some(5_000.0);
        // young limit is max(0, 1000 - 5000) = 0
        assert!(w.passes(TimeRule::Buffer, Some(9_000.0), Some(0.0)));
    }

    #[test]
    fn contain_and_overlap_trust_the_upstream() {
        let w = window(1.0, 2.0);
        assert!(w.passes(TimeRule::Contain, Some(9.9e6), Some(9.0e6)));
        assert!(w.passes(TimeRule::Overlap, Some(9.9e6), Some(9.0e6)));
    }
}
