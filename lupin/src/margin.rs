//! Target similarities for dynamic-margin losses.
//!
//! A raw distance `d` in `[0, d_max]` (0 = identical) is mapped to a
//! similarity in `[0, 1]` with `s(0) = 1` and `s(d_max) = 0`. Distances
//! past `d_max`, including disconnected (`+inf`) ones, give 0.

use crate::distance_table::DistanceTable;
use crate::error::LupinError;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransformFn {
    Linear,
    Exponential,
    Sigmoidal,
    Binary,
}

/// What the distance table holds
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DistanceKind {
    /// ontology path lengths, normalized by `d_max`
    #[default]
    OntologyPath,
    /// text-mined similarities already in `[0, 1]`
    TextMined,
}

#[derive(Debug, Clone, Copy)]
pub struct MarginScorer {
    transform: TransformFn,
    param: f32,
    d_max: f32,
    kind: DistanceKind,
}

impl MarginScorer {
    ///
    /// * `transform` - shape of the distance-to-similarity map
    /// * `param` - steepness for exponential and sigmoidal maps (> 0)
    /// * `d_max` - distance at which similarity reaches 0 (> 0)
    ///
    pub fn new(transform: TransformFn, param: f32, d_max: f32) -> anyhow::Result<Self> {
        if !(d_max > 0. && d_max.is_finite()) {
            return Err(
                LupinError::InvalidParameter(format!("d_max must be positive: {}", d_max)).into(),
            );
        }
        if matches!(transform, TransformFn::Exponential | TransformFn::Sigmoidal)
            && !(param > 0. && param.is_finite())
        {
            return Err(LupinError::InvalidParameter(format!(
                "{:?} needs a positive shape parameter: {}",
                transform, param
            ))
            .into());
        }
        Ok(Self {
            transform,
            param,
            d_max,
            kind: DistanceKind::OntologyPath,
        })
    }

    /// Text-mined tables store similarities; they are read as `d = 1 - s`
    /// over `d_max = 1`
    pub fn text_mined(transform: TransformFn, param: f32) -> anyhow::Result<Self> {
        let mut ret = Self::new(transform, param, 1.)?;
        ret.kind = DistanceKind::TextMined;
        Ok(ret)
    }

    pub fn transform(&self) -> TransformFn {
        self.transform
    }

    pub fn d_max(&self) -> f32 {
        self.d_max
    }

    /// Binary targets carry no graded margin downstream
    pub fn is_dynamic(&self) -> bool {
        self.transform != TransformFn::Binary
    }

    pub fn similarity(&self, d: f32) -> f32 {
        let d = d.max(0.);
        if d >= self.d_max {
            return 0.;
        }

        let x = d / self.d_max;
        let s = match self.transform {
            TransformFn::Linear => 1. - x,
            TransformFn::Exponential => {
                // exp(-k x) rescaled to hit 0 at x = 1
                let k = self.param;
                let floor = (-k).exp();
                ((-k * x).exp() - floor) / (1. - floor)
            }
            TransformFn::Sigmoidal => {
                // logistic centred at x = 1/2, rescaled to the end points
                let k = self.param;
                let f = |t: f32| 1. / (1. + (k * (t - 0.5)).exp());
                let (hi, lo) = (f(0.), f(1.));
                (f(x) - lo) / (hi - lo)
            }
            TransformFn::Binary => {
                if d == 0. {
                    1.
                } else {
                    0.
                }
            }
        };
        s.clamp(0., 1.)
    }

    /// Target similarity between two cell types
    pub fn target(&self, table: &DistanceTable, a: &str, b: &str) -> anyhow::Result<f32> {
        let raw = table.get(a, b)?;
        let d = match self.kind {
            DistanceKind::OntologyPath => raw,
            DistanceKind::TextMined => 1. - raw.clamp(0., 1.),
        };
        Ok(self.similarity(d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const ALL: [TransformFn; 4] = [
        TransformFn::Linear,
        TransformFn::Exponential,
        TransformFn::Sigmoidal,
        TransformFn::Binary,
    ];

    #[test]
    fn end_points_are_exact() -> anyhow::Result<()> {
        for f in ALL {
            let s = MarginScorer::new(f, 2., 4.)?;
            assert_eq!(s.similarity(0.), 1., "{:?}", f);
            assert_eq!(s.similarity(4.), 0., "{:?}", f);
            assert_eq!(s.similarity(f32::INFINITY), 0., "{:?}", f);
        }
        Ok(())
    }

    #[test]
    fn linear_and_binary_values() -> anyhow::Result<()> {
        let lin = MarginScorer::new(TransformFn::Linear, 0., 4.)?;
        assert_abs_diff_eq!(lin.similarity(1.), 0.75);
        assert_abs_diff_eq!(lin.similarity(10.), 0.);

        let bin = MarginScorer::new(TransformFn::Binary, 0., 4.)?;
        assert_eq!(bin.similarity(0.5), 0.);
        assert_eq!(bin.similarity(1.), 0.);
        assert!(!bin.is_dynamic());
        Ok(())
    }

    #[test]
    fn sigmoid_midpoint_is_half() -> anyhow::Result<()> {
        let s = MarginScorer::new(TransformFn::Sigmoidal, 6., 4.)?;
        assert_abs_diff_eq!(s.similarity(2.), 0.5, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn exponential_drops_faster_early() -> anyhow::Result<()> {
        let e = MarginScorer::new(TransformFn::Exponential, 3., 4.)?;
        let lin = MarginScorer::new(TransformFn::Linear, 0., 4.)?;
        assert!(e.similarity(1.) < lin.similarity(1.));
        Ok(())
    }

    #[test]
    fn all_transforms_are_non_increasing() -> anyhow::Result<()> {
        for f in ALL {
            let s = MarginScorer::new(f, 1.5, 5.)?;
            let values: Vec<f32> = (0..=60).map(|i| s.similarity(i as f32 * 0.1)).collect();
            for w in values.windows(2) {
                assert!(w[1] <= w[0], "{:?}: {} > {}", f, w[1], w[0]);
            }
        }
        Ok(())
    }

    #[test]
    fn text_mined_similarity_passes_through_linear() -> anyhow::Result<()> {
        let mut t = DistanceTable::new(false);
        t.insert("a", "b", 0.8);
        let s = MarginScorer::text_mined(TransformFn::Linear, 0.)?;
        assert_abs_diff_eq!(s.target(&t, "a", "b")?, 0.8, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn invalid_parameters() {
        assert!(MarginScorer::new(TransformFn::Linear, 0., 0.).is_err());
        assert!(MarginScorer::new(TransformFn::Exponential, 0., 4.).is_err());
    }
}
