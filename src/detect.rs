//! Change-point detection over swept timing series.
//!
//! A [`Series`] holds one median latency per swept parameter value (stride,
//! working-set size, conflict count). A [`JumpRule`] decides which points mark a
//! structural boundary: the value must grow by a relative factor over its
//! reference AND sit an absolute margin above the baseline, so that noise at
//! sub-nanosecond magnitudes can't pass for a 20% jump.
use log::debug;

use crate::stats::median;

/// One swept parameter value and the statistic measured for it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub param: usize,
    pub value: f64,
}

/// Points ordered by strictly increasing parameter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Series {
    points: Vec<Point>,
}

impl Series {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a point. Parameters must arrive in increasing order.
    pub fn push(&mut self, param: usize, value: f64) {
        debug_assert!(
            self.points.last().is_none_or(|p| p.param < param),
            "series parameters must be strictly increasing"
        );
        self.points.push(Point { param, value });
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Median of the first `n` values (or of all of them if shorter).
    pub fn baseline(&self, n: usize) -> Option<f64> {
        let n = n.max(1).min(self.points.len());
        if n == 0 {
            return None;
        }
        let mut head: Vec<f64> = self.points[..n].iter().map(|p| p.value).collect();
        Some(median(&mut head))
    }

    /// Difference between each point and its predecessor; `deltas()[i]` belongs to point `i + 1`.
    pub fn deltas(&self) -> Vec<f64> {
        self.points
            .windows(2)
            .map(|w| w[1].value - w[0].value)
            .collect()
    }
}

impl FromIterator<(usize, f64)> for Series {
    fn from_iter<T: IntoIterator<Item = (usize, f64)>>(iter: T) -> Self {
        let mut series = Series::new();
        for (param, value) in iter {
            series.push(param, value);
        }
        series
    }
}

/// What a candidate point's relative growth is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference {
    /// The immediately preceding point (size and stride sweeps).
    Previous,
    /// The baseline median (contention sweeps).
    Baseline,
}

/// Thresholds a point has to clear to count as a jump.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JumpRule {
    /// Minimum growth over the reference, as a fraction (0.2 = 20%).
    pub relative: f64,
    pub reference: Reference,
    /// Minimum distance above the baseline, in the series' own unit.
    pub absolute_margin: f64,
    /// Number of leading points whose median forms the baseline.
    pub baseline_points: usize,
    /// If set, the point after a jump must stay at or above this fraction of the jump value.
    pub persistence: Option<f64>,
}

/// A flagged point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Jump {
    /// Index of the first elevated point.
    pub index: usize,
    /// Parameter of the first elevated point.
    pub param: usize,
    /// Parameter of the last point before the jump.
    pub last_flat_param: usize,
    pub value: f64,
    /// Value the growth was measured against.
    pub reference: f64,
    pub baseline: f64,
}

impl Jump {
    pub fn ratio(&self) -> f64 {
        self.value / self.reference
    }
}

impl JumpRule {
    fn qualifies(&self, points: &[Point], i: usize, baseline: f64) -> Option<Jump> {
        let point = points[i];
        let reference = match self.reference {
            Reference::Previous => points[i - 1].value,
            Reference::Baseline => baseline,
        };

        if point.value <= reference * (1.0 + self.relative) {
            return None;
        }
        if point.value - baseline < self.absolute_margin {
            return None;
        }
        if let (Some(fraction), Some(next)) = (self.persistence, points.get(i + 1)) {
            if next.value < point.value * fraction {
                debug!(
                    "rejecting spike at {}: next point {:.3} fell below {:.0}% of {:.3}",
                    point.param,
                    next.value,
                    fraction * 100.0,
                    point.value
                );
                return None;
            }
        }

        Some(Jump {
            index: i,
            param: point.param,
            last_flat_param: points[i - 1].param,
            value: point.value,
            reference,
            baseline,
        })
    }

    /// First qualifying jump, or `None` if the sweep is inconclusive.
    pub fn first(&self, series: &Series) -> Option<Jump> {
        self.iter(series).next()
    }

    /// Every qualifying jump in parameter order.
    pub fn all(&self, series: &Series) -> Vec<Jump> {
        self.iter(series).collect()
    }

    fn iter<'a>(&'a self, series: &'a Series) -> impl Iterator<Item = Jump> + 'a {
        let points = series.points();
        let settled = series.baseline(self.baseline_points);
        (1..points.len()).filter_map(move |i| {
            // a candidate never counts toward its own baseline
            let baseline = if i >= self.baseline_points {
                settled
            } else {
                series.baseline(i)
            };
            self.qualifies(points, i, baseline.unwrap_or(0.0))
        })
    }
}

/// First jump whose delta is at least `dominance` times each neighboring delta.
///
/// Used by the stride scan, where a smooth rise across several doublings must not
/// be mistaken for the step at the line boundary.
pub fn first_dominant(series: &Series, rule: &JumpRule, dominance: f64) -> Option<Jump> {
    let deltas = series.deltas();
    rule.iter(series).find(|jump| {
        let own = deltas[jump.index - 1];
        let before = jump.index.checked_sub(2).map(|d| deltas[d].abs()).unwrap_or(0.0);
        let after = deltas.get(jump.index).map(|d| d.abs()).unwrap_or(0.0);
        let dominant = own >= dominance * before && own >= dominance * after;
        if !dominant {
            debug!(
                "jump at {} not dominant: delta {:.3} vs neighbors {:.3}/{:.3}",
                jump.param,
                own,
                before,
                after
            );
        }
        dominant
    })
}
