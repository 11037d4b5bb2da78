//! Batch-hard triplet sampling: `P` cell types x `K` samples per batch.
//!
//! The loss helpers pick, for every anchor in a batch, the farthest sample
//! of its own type and the closest sample of another type.

use crate::error::LupinError;
use log::{info, warn};
use nalgebra::DMatrix;
use rand::Rng;
use rayon::prelude::*;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct TripletBatch {
    /// `P * K` sample indices, grouped by class
    pub samples: Vec<usize>,
    /// class id of each entry of `samples`
    pub classes: Vec<usize>,
}

pub struct TripletBatchSampler<'a> {
    classes: Vec<&'a str>,
    members: Vec<Vec<usize>>,
    eligible: Vec<usize>,
    p: usize,
    k: usize,
    num_batches: usize,
}

fn insufficient(msg: String) -> anyhow::Error {
    LupinError::InsufficientSamples(msg).into()
}

impl<'a> TripletBatchSampler<'a> {
    ///
    /// * `labels` - cell type of every sample
    /// * `p` - cell types per batch (>= 2)
    /// * `k` - samples per cell type (>= 2)
    /// * `num_batches` - batches per epoch
    ///
    pub fn new(
        labels: &'a [Box<str>],
        p: usize,
        k: usize,
        num_batches: usize,
    ) -> anyhow::Result<Self> {
        if p < 2 {
            return Err(insufficient(format!(
                "batch-hard needs at least 2 classes per batch, got P = {}",
                p
            )));
        }
        if k < 2 {
            return Err(insufficient(format!(
                "batch-hard needs at least 2 samples per class, got K = {}",
                k
            )));
        }

        let mut by_class: BTreeMap<&'a str, Vec<usize>> = BTreeMap::new();
        for (i, x) in labels.iter().enumerate() {
            by_class.entry(x.as_ref()).or_default().push(i);
        }
        let classes: Vec<&str> = by_class.keys().copied().collect();
        let members: Vec<Vec<usize>> = by_class.into_values().collect();

        let eligible: Vec<usize> = (0..classes.len())
            .filter(|&c| {
                let ok = members[c].len() >= k;
                if !ok {
                    warn!(
                        "{}: {} samples < K = {}, excluded from batches",
                        classes[c],
                        members[c].len(),
                        k
                    );
                }
                ok
            })
            .collect();

        if eligible.len() < p {
            return Err(insufficient(format!(
                "only {} of {} classes have {} samples; P = {}",
                eligible.len(),
                classes.len(),
                k,
                p
            )));
        }

        info!(
            "batch-hard: P = {}, K = {}, {} batches/epoch over {} classes",
            p,
            k,
            num_batches,
            eligible.len()
        );

        Ok(Self {
            classes,
            members,
            eligible,
            p,
            k,
            num_batches,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.p * self.k
    }

    pub fn class_name(&self, c: usize) -> &str {
        self.classes[c]
    }

    /// `P` distinct classes, `K` distinct samples from each
    pub fn sample_batch(&self, rng: &mut impl Rng) -> TripletBatch {
        let mut samples = Vec::with_capacity(self.batch_size());
        let mut classes = Vec::with_capacity(self.batch_size());

        for e in rand::seq::index::sample(rng, self.eligible.len(), self.p).iter() {
            let c = self.eligible[e];
            let mm = &self.members[c];
            for j in rand::seq::index::sample(rng, mm.len(), self.k).iter() {
                samples.push(mm[j]);
                classes.push(c);
            }
        }
        TripletBatch { samples, classes }
    }

    /// `num_batches` independent batches
    pub fn sample_epoch(&self, rng: &mut impl Rng) -> Vec<TripletBatch> {
        let mut ret = Vec::with_capacity(self.num_batches);
        for _ in 0..self.num_batches {
            ret.push(self.sample_batch(rng));
        }
        ret
    }
}

/// Per-anchor hardest distances within a batch
#[derive(Debug, Clone)]
pub struct HardestDistances {
    pub positive: Vec<f32>,
    pub negative: Vec<f32>,
    /// batch position of the hardest negative
    pub negative_index: Vec<usize>,
}

///
/// Hardest positive (farthest same class) and hardest negative (closest
/// other class) Euclidean distances for every row of `embeddings`.
///
/// * `embeddings` - batch embeddings, one row per sample
/// * `classes` - class id of each row
///
pub fn batch_hard_distances(
    embeddings: &DMatrix<f32>,
    classes: &[usize],
) -> anyhow::Result<HardestDistances> {
    let nn = embeddings.nrows();
    if nn == 0 {
        return Err(LupinError::InvalidParameter("empty batch".into()).into());
    }
    if nn != classes.len() {
        return Err(LupinError::InvalidParameter(format!(
            "{} embedding rows for {} labels",
            nn,
            classes.len()
        ))
        .into());
    }

    let hardest = (0..nn)
        .into_par_iter()
        .map(|i| {
            let mut pos: Option<f32> = None;
            let mut neg: Option<(f32, usize)> = None;
            for j in 0..nn {
                if j == i {
                    continue;
                }
                let d = (embeddings.row(i) - embeddings.row(j)).norm();
                if classes[j] == classes[i] {
                    pos = Some(pos.map_or(d, |p| p.max(d)));
                } else if neg.map_or(true, |(n, _)| d < n) {
                    neg = Some((d, j));
                }
            }
            match (pos, neg) {
                (Some(p), Some((n, j))) => Ok((p, n, j)),
                _ => Err(insufficient(format!(
                    "anchor {} lacks a positive or a negative in its batch",
                    i
                ))),
            }
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(HardestDistances {
        positive: hardest.iter().map(|x| x.0).collect(),
        negative: hardest.iter().map(|x| x.1).collect(),
        negative_index: hardest.iter().map(|x| x.2).collect(),
    })
}

/// Mean of `max(0, d_pos - d_neg + margin)` over anchors
pub fn batch_hard_triplet_loss(
    embeddings: &DMatrix<f32>,
    classes: &[usize],
    margin: f32,
) -> anyhow::Result<f32> {
    batch_hard_triplet_loss_dynamic(embeddings, classes, margin, |_, _| 0.)
}

///
/// Batch-hard loss whose margin shrinks with the similarity between the
/// anchor's class and its hardest negative's class:
/// `margin_i = base_margin * (1 - similarity(c_anchor, c_negative))`.
///
pub fn batch_hard_triplet_loss_dynamic<F>(
    embeddings: &DMatrix<f32>,
    classes: &[usize],
    base_margin: f32,
    similarity: F,
) -> anyhow::Result<f32>
where
    F: Fn(usize, usize) -> f32,
{
    let hard = batch_hard_distances(embeddings, classes)?;
    let nn = hard.positive.len();
    let total: f32 = (0..nn)
        .map(|i| {
            let s = similarity(classes[i], classes[hard.negative_index[i]]).clamp(0., 1.);
            let margin = base_margin * (1. - s);
            (hard.positive[i] - hard.negative[i] + margin).max(0.)
        })
        .sum();
    Ok(total / nn as f32)
}
