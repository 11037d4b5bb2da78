//! Siamese pair selection.
//!
//! Same-type pairs are drawn per cell type, different-type pairs either
//! uniformly over all cross-type sample pairs or stratified by target
//! similarity into equal-width buckets over `[0, 1]`.

use crate::distance_table::DistanceTable;
use crate::error::LupinError;
use crate::margin::MarginScorer;
use log::{info, warn};
use nalgebra::DMatrix;
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::Rng;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy)]
pub struct PairSelectorArgs {
    /// same-type pairs per cell type
    pub same_lim: usize,
    /// different pairs = `diff_multiplier` x same pairs
    pub diff_multiplier: usize,
    /// number of similarity buckets for different pairs (0 = uniform)
    pub unif_diff: usize,
    /// carry transformed similarities as targets instead of 1/0
    pub dynamic_margin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pair {
    pub a: usize,
    pub b: usize,
    pub same: bool,
    /// 1/0 for contrastive loss, transformed similarity for dynamic margins
    pub target: f32,
}

impl std::fmt::Display for Pair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}",
            self.a, self.b, self.same as u8, self.target
        )
    }
}

pub struct PairSelector<'a> {
    classes: Vec<&'a str>,
    members: Vec<Vec<usize>>,
    class_of: Vec<usize>,
    args: PairSelectorArgs,
    /// `similarity[c][d]` between cell types when a scorer is given
    similarity: Option<Vec<Vec<f32>>>,
    dynamic: bool,
}

enum DiffSampler {
    Uniform {
        classes: WeightedIndex<usize>,
    },
    Bucketed {
        /// class pairs and their sampler, per non-empty bucket
        buckets: Vec<(Vec<(usize, usize)>, WeightedIndex<usize>)>,
        /// drawn bucket -> non-empty bucket slot
        redirect: Vec<usize>,
    },
}

fn insufficient(msg: String) -> anyhow::Error {
    LupinError::InsufficientSamples(msg).into()
}

/// k-th pair `(i, j)`, `i < j`, in row-major order over `n` items
fn unrank_pair(mut k: usize, n: usize) -> (usize, usize) {
    let mut i = 0;
    while k >= n - 1 - i {
        k -= n - 1 - i;
        i += 1;
    }
    (i, i + 1 + k)
}

/// equal-width bucket of a similarity in `[0, 1]`
pub fn similarity_bucket(s: f32, n_buckets: usize) -> usize {
    ((s.clamp(0., 1.) * n_buckets as f32).floor() as usize).min(n_buckets - 1)
}

impl<'a> PairSelector<'a> {
    ///
    /// * `labels` - cell type of every sample
    /// * `args` - pair counts and stratification
    /// * `scoring` - target transform and distance table; required for
    ///   `unif_diff > 0` and for dynamic margins
    ///
    pub fn new(
        labels: &'a [Box<str>],
        args: PairSelectorArgs,
        scoring: Option<(&MarginScorer, &DistanceTable)>,
    ) -> anyhow::Result<Self> {
        let mut by_class: BTreeMap<&'a str, Vec<usize>> = BTreeMap::new();
        for (i, x) in labels.iter().enumerate() {
            by_class.entry(x.as_ref()).or_default().push(i);
        }

        let classes: Vec<&str> = by_class.keys().copied().collect();
        let members: Vec<Vec<usize>> = by_class.into_values().collect();

        let mut class_of = vec![0; labels.len()];
        for (c, mm) in members.iter().enumerate() {
            for &i in mm.iter() {
                class_of[i] = c;
            }
        }

        if !members.iter().any(|mm| mm.len() > 1) {
            return Err(insufficient(
                "no cell type has two samples to pair".into(),
            ));
        }
        if args.diff_multiplier > 0 && classes.len() < 2 {
            return Err(insufficient(format!(
                "different pairs need two cell types, found {}",
                classes.len()
            )));
        }
        if (args.unif_diff > 0 || args.dynamic_margin) && scoring.is_none() {
            return Err(LupinError::InvalidParameter(
                "stratified pairs and dynamic margins need a distance table".into(),
            )
            .into());
        }

        let similarity = match scoring {
            Some((scorer, table)) => Some(
                classes
                    .iter()
                    .map(|a| {
                        classes
                            .iter()
                            .map(|b| scorer.target(table, a, b))
                            .collect::<anyhow::Result<Vec<f32>>>()
                    })
                    .collect::<anyhow::Result<Vec<_>>>()?,
            ),
            None => None,
        };
        let dynamic =
            args.dynamic_margin && scoring.is_some_and(|(scorer, _)| scorer.is_dynamic());

        info!(
            "{} samples over {} cell types; same_lim {}, diff x{}, buckets {}",
            labels.len(),
            classes.len(),
            args.same_lim,
            args.diff_multiplier,
            args.unif_diff
        );

        Ok(Self {
            classes,
            members,
            class_of,
            args,
            similarity,
            dynamic,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn class_name(&self, c: usize) -> &str {
        self.classes[c]
    }

    pub fn class_of(&self, sample: usize) -> usize {
        self.class_of[sample]
    }

    /// Pair target: transformed similarity in dynamic mode, else 1/0
    fn target(&self, ca: usize, cb: usize) -> f32 {
        match (&self.similarity, self.dynamic) {
            (Some(sim), true) => sim[ca][cb],
            _ => {
                if ca == cb {
                    1.
                } else {
                    0.
                }
            }
        }
    }

    /// One epoch of pairs: all same-type pairs, then the different ones
    pub fn select(&self, rng: &mut impl Rng) -> anyhow::Result<Vec<Pair>> {
        let mut pairs = self.same_pairs(rng);
        let n_diff = self.args.diff_multiplier * pairs.len();
        if n_diff > 0 {
            let sampler = self.diff_sampler()?;
            for _ in 0..n_diff {
                pairs.push(self.draw_diff(&sampler, rng));
            }
        }
        info!("selected {} same, {} different pairs", pairs.len() - n_diff, n_diff);
        Ok(pairs)
    }

    ///
    /// Like [`select`](Self::select), but each different pair is the
    /// closest (in `embeddings`) of `n_candidates` draws. Rows of
    /// `embeddings` are samples. The same snapshot and seed give the
    /// same pairs.
    ///
    pub fn select_hard(
        &self,
        rng: &mut impl Rng,
        embeddings: &DMatrix<f32>,
        n_candidates: usize,
    ) -> anyhow::Result<Vec<Pair>> {
        if embeddings.nrows() != self.class_of.len() {
            return Err(LupinError::InvalidParameter(format!(
                "{} embedding rows for {} samples",
                embeddings.nrows(),
                self.class_of.len()
            ))
            .into());
        }
        let n_candidates = n_candidates.max(1);

        let mut pairs = self.same_pairs(rng);
        let n_diff = self.args.diff_multiplier * pairs.len();
        if n_diff == 0 {
            return Ok(pairs);
        }
        let sampler = self.diff_sampler()?;

        let dist = |p: &Pair| (embeddings.row(p.a) - embeddings.row(p.b)).norm();

        for _ in 0..n_diff {
            let mut best = self.draw_diff(&sampler, rng);
            let mut best_d = dist(&best);
            for _ in 1..n_candidates {
                let cand = self.draw_diff(&sampler, rng);
                let d = dist(&cand);
                if d < best_d {
                    best = cand;
                    best_d = d;
                }
            }
            pairs.push(best);
        }
        info!(
            "re-mined {} different pairs from {} candidates each",
            n_diff, n_candidates
        );
        Ok(pairs)
    }

    /// Exactly `same_lim` pairs for every cell type with two or more samples
    fn same_pairs(&self, rng: &mut impl Rng) -> Vec<Pair> {
        let same_lim = self.args.same_lim;
        let mut ret = vec![];

        for (c, mm) in self.members.iter().enumerate() {
            let n = mm.len();
            if n < 2 {
                warn!("{}: single sample, no same pairs", self.classes[c]);
                continue;
            }
            let total = n * (n - 1) / 2;
            let target = self.target(c, c);
            let mut push = |k: usize| {
                let (i, j) = unrank_pair(k, n);
                ret.push(Pair {
                    a: mm[i],
                    b: mm[j],
                    same: true,
                    target,
                });
            };

            if same_lim <= total {
                for k in rand::seq::index::sample(rng, total, same_lim).iter() {
                    push(k);
                }
            } else {
                warn!(
                    "{}: same_lim {} exceeds {} distinct pairs; sampling the rest with replacement",
                    self.classes[c], same_lim, total
                );
                for k in 0..total {
                    push(k);
                }
                for _ in total..same_lim {
                    push(rng.random_range(0..total));
                }
            }
        }
        ret
    }

    fn diff_sampler(&self) -> anyhow::Result<DiffSampler> {
        let nn = self.class_of.len();

        if self.args.unif_diff == 0 {
            // class c is the first element with weight n_c (N - n_c),
            // which makes every ordered cross-type pair equally likely
            let weights: Vec<usize> = self
                .members
                .iter()
                .map(|mm| mm.len() * (nn - mm.len()))
                .collect();
            let classes = WeightedIndex::new(&weights)
                .map_err(|e| insufficient(format!("no cross-type pairs: {}", e)))?;
            return Ok(DiffSampler::Uniform { classes });
        }

        let n_buckets = self.args.unif_diff;
        let sim = self.similarity.as_ref().ok_or_else(|| {
            LupinError::InvalidParameter("stratified pairs without similarities".into())
        })?;

        let mut stratified: Vec<Vec<(usize, usize)>> = vec![vec![]; n_buckets];
        for ca in 0..self.classes.len() {
            for cb in 0..self.classes.len() {
                if ca != cb {
                    stratified[similarity_bucket(sim[ca][cb], n_buckets)].push((ca, cb));
                }
            }
        }

        let mut slot_of = vec![None; n_buckets];
        let mut buckets = vec![];
        for (u, class_pairs) in stratified.into_iter().enumerate() {
            if class_pairs.is_empty() {
                continue;
            }
            let weights: Vec<usize> = class_pairs
                .iter()
                .map(|&(ca, cb)| self.members[ca].len() * self.members[cb].len())
                .collect();
            let w = WeightedIndex::new(&weights)
                .map_err(|e| insufficient(format!("bucket {}: {}", u, e)))?;
            slot_of[u] = Some(buckets.len());
            buckets.push((class_pairs, w));
        }

        if buckets.is_empty() {
            return Err(insufficient("no cross-type pairs".into()));
        }

        // empty buckets borrow from the nearest non-empty one, lower first
        let redirect = (0..n_buckets)
            .map(|u| {
                (0..n_buckets)
                    .flat_map(|r| [u.checked_sub(r), Some(u + r)])
                    .flatten()
                    .filter(|&v| v < n_buckets)
                    .find_map(|v| slot_of[v])
                    .unwrap_or(0)
            })
            .collect::<Vec<_>>();

        let empty = slot_of.iter().filter(|x| x.is_none()).count();
        if empty > 0 {
            warn!(
                "{} of {} similarity buckets are empty; drawing from nearest neighbours",
                empty, n_buckets
            );
        }

        Ok(DiffSampler::Bucketed { buckets, redirect })
    }

    fn draw_diff(&self, sampler: &DiffSampler, rng: &mut impl Rng) -> Pair {
        let nn = self.class_of.len();
        let (a, b) = match sampler {
            DiffSampler::Uniform { classes } => {
                let c = classes.sample(rng);
                let mm = &self.members[c];
                let a = mm[rng.random_range(0..mm.len())];
                // uniform over samples outside class c
                let mut r = rng.random_range(0..(nn - mm.len()));
                let mut b = 0;
                for (d, other) in self.members.iter().enumerate() {
                    if d == c {
                        continue;
                    }
                    if r < other.len() {
                        b = other[r];
                        break;
                    }
                    r -= other.len();
                }
                (a, b)
            }
            DiffSampler::Bucketed { buckets, redirect } => {
                let u = rng.random_range(0..redirect.len());
                let (class_pairs, w) = &buckets[redirect[u]];
                let (ca, cb) = class_pairs[w.sample(rng)];
                let ma = &self.members[ca];
                let mb = &self.members[cb];
                (
                    ma[rng.random_range(0..ma.len())],
                    mb[rng.random_range(0..mb.len())],
                )
            }
        };
        Pair {
            a,
            b,
            same: false,
            target: self.target(self.class_of[a], self.class_of[b]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrank_covers_all_pairs_once() {
        let n = 5;
        let total = n * (n - 1) / 2;
        let pairs: Vec<(usize, usize)> = (0..total).map(|k| unrank_pair(k, n)).collect();
        let mut expected = vec![];
        for i in 0..n {
            for j in (i + 1)..n {
                expected.push((i, j));
            }
        }
        assert_eq!(pairs, expected);
    }

    #[test]
    fn empty_bucket_borrows_from_the_lower_neighbour_on_ties() -> anyhow::Result<()> {
        // linear over d_max 1: a/b 0.9 (bucket 2), a/c and b/c 0.1 (bucket 0)
        let mut table = DistanceTable::new(false);
        table.insert("a", "b", 0.1);
        table.insert("a", "c", 0.9);
        table.insert("b", "c", 0.9);
        let scorer = MarginScorer::new(crate::margin::TransformFn::Linear, 1., 1.)?;

        let labels: Vec<Box<str>> = ["a", "a", "b", "b", "c", "c"]
            .iter()
            .map(|&x| x.into())
            .collect();
        let args = PairSelectorArgs {
            same_lim: 1,
            diff_multiplier: 1,
            unif_diff: 3,
            dynamic_margin: true,
        };
        let selector = PairSelector::new(&labels, args, Some((&scorer, &table)))?;

        match selector.diff_sampler()? {
            DiffSampler::Bucketed { buckets, redirect } => {
                assert_eq!(buckets.len(), 2);
                // bucket 1 is empty and equally far from 0 and 2
                assert_eq!(redirect, vec![0, 0, 1]);
            }
            DiffSampler::Uniform { .. } => panic!("expected buckets"),
        }
        Ok(())
    }

    #[test]
    fn buckets_are_equal_width() {
        assert_eq!(similarity_bucket(0., 4), 0);
        assert_eq!(similarity_bucket(0.249, 4), 0);
        assert_eq!(similarity_bucket(0.25, 4), 1);
        assert_eq!(similarity_bucket(0.99, 4), 3);
        assert_eq!(similarity_bucket(1., 4), 3);
    }
}
