use lupin::distance_table::DistanceTable;
use lupin::error::LupinError;
use lupin::margin::{MarginScorer, TransformFn};
use lupin::pairs::{Pair, PairSelector, PairSelectorArgs};
use lupin::triplet::{batch_hard_triplet_loss, TripletBatchSampler};
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{HashMap, HashSet};

fn labels(counts: &[(&str, usize)]) -> Vec<Box<str>> {
    counts
        .iter()
        .flat_map(|&(name, n)| std::iter::repeat(name).take(n))
        .map(Box::<str>::from)
        .collect()
}

fn kind(err: &anyhow::Error) -> Option<&LupinError> {
    err.downcast_ref::<LupinError>()
}

fn pair_args(same_lim: usize, diff_multiplier: usize, unif_diff: usize) -> PairSelectorArgs {
    PairSelectorArgs {
        same_lim,
        diff_multiplier,
        unif_diff,
        dynamic_margin: false,
    }
}

fn immune_distances() -> DistanceTable {
    let mut t = DistanceTable::new(false);
    t.insert("CD4 T", "CD8 T", 1.);
    t.insert("CD4 T", "B", 3.);
    t.insert("CD8 T", "B", 3.);
    t
}

#[test]
fn same_and_different_pair_counts() -> anyhow::Result<()> {
    let y = labels(&[("CD4 T", 6), ("CD8 T", 5), ("B", 4)]);
    let selector = PairSelector::new(&y, pair_args(3, 2, 0), None)?;
    let pairs = selector.select(&mut StdRng::seed_from_u64(7))?;

    let same: Vec<&Pair> = pairs.iter().filter(|p| p.same).collect();
    let diff: Vec<&Pair> = pairs.iter().filter(|p| !p.same).collect();

    assert_eq!(same.len(), 3 * 3);
    assert_eq!(diff.len(), 2 * same.len());

    let mut per_class: HashMap<&str, usize> = HashMap::new();
    for p in same.iter() {
        assert_ne!(p.a, p.b);
        assert_eq!(y[p.a], y[p.b]);
        assert_eq!(p.target, 1.);
        *per_class.entry(y[p.a].as_ref()).or_default() += 1;
    }
    assert!(per_class.values().all(|&n| n <= 3));

    // distinct pairs while same_lim fits
    let distinct: HashSet<(usize, usize)> = same.iter().map(|p| (p.a, p.b)).collect();
    assert_eq!(distinct.len(), same.len());

    for p in diff.iter() {
        assert_ne!(y[p.a], y[p.b]);
        assert_eq!(p.target, 0.);
    }
    Ok(())
}

#[test]
fn same_lim_beyond_distinct_pairs_fills_with_replacement() -> anyhow::Result<()> {
    // 3 samples -> 3 distinct pairs
    let y = labels(&[("NK", 3), ("B", 2)]);
    let selector = PairSelector::new(&y, pair_args(5, 0, 0), None)?;
    let pairs = selector.select(&mut StdRng::seed_from_u64(1))?;

    let nk = pairs.iter().filter(|p| y[p.a].as_ref() == "NK").count();
    let b = pairs.iter().filter(|p| y[p.a].as_ref() == "B").count();
    assert_eq!((nk, b), (5, 5));

    let nk_distinct: HashSet<(usize, usize)> = pairs
        .iter()
        .filter(|p| y[p.a].as_ref() == "NK")
        .map(|p| (p.a, p.b))
        .collect();
    assert_eq!(nk_distinct.len(), 3);
    Ok(())
}

#[test]
fn same_seed_same_pairs() -> anyhow::Result<()> {
    let y = labels(&[("CD4 T", 10), ("CD8 T", 7), ("B", 9)]);
    let table = immune_distances();
    let scorer = MarginScorer::new(TransformFn::Linear, 1., 4.)?;
    let selector = PairSelector::new(&y, pair_args(4, 3, 4), Some((&scorer, &table)))?;

    let first = selector.select(&mut StdRng::seed_from_u64(2024))?;
    let second = selector.select(&mut StdRng::seed_from_u64(2024))?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn single_class_cannot_form_different_pairs() {
    let y = labels(&[("B", 5)]);
    let err = PairSelector::new(&y, pair_args(2, 1, 0), None).err();
    assert!(matches!(
        err.as_ref().and_then(kind),
        Some(LupinError::InsufficientSamples(_))
    ));
}

#[test]
fn single_class_without_different_pairs() -> anyhow::Result<()> {
    let y = labels(&[("B", 4)]);
    let selector = PairSelector::new(&y, pair_args(2, 0, 0), None)?;

    let pairs = selector.select(&mut StdRng::seed_from_u64(4))?;
    assert_eq!(pairs.len(), 2);
    assert!(pairs.iter().all(|p| p.same && p.a != p.b));

    let emb = DMatrix::<f32>::zeros(4, 2);
    let hard = selector.select_hard(&mut StdRng::seed_from_u64(4), &emb, 3)?;
    assert_eq!(hard.len(), 2);
    assert!(hard.iter().all(|p| p.same));
    Ok(())
}

#[test]
fn bucketed_pairs_reach_every_populated_bucket() -> anyhow::Result<()> {
    // linear over d_max 4: CD4/CD8 0.75, T/B 0.25
    let y = labels(&[("CD4 T", 8), ("CD8 T", 8), ("B", 8)]);
    let table = immune_distances();
    let scorer = MarginScorer::new(TransformFn::Linear, 1., 4.)?;
    let args = PairSelectorArgs {
        dynamic_margin: true,
        ..pair_args(10, 20, 2)
    };
    let selector = PairSelector::new(&y, args, Some((&scorer, &table)))?;
    let pairs = selector.select(&mut StdRng::seed_from_u64(11))?;

    let diff: Vec<&Pair> = pairs.iter().filter(|p| !p.same).collect();
    assert_eq!(diff.len(), 20 * 30);

    let close = diff.iter().filter(|p| (p.target - 0.75).abs() < 1e-6).count();
    let far = diff.iter().filter(|p| (p.target - 0.25).abs() < 1e-6).count();
    assert_eq!(close + far, diff.len());

    // two buckets drawn uniformly; each should get roughly half
    assert!(close > diff.len() / 4, "close pairs {}", close);
    assert!(far > diff.len() / 4, "far pairs {}", far);

    for p in pairs.iter().filter(|p| p.same) {
        assert_eq!(p.target, 1.);
    }
    Ok(())
}

#[test]
fn empty_buckets_fall_back_to_the_populated_one() -> anyhow::Result<()> {
    // linear over d_max 4: every cross pair has s = 0.9, bucket 3 of 4
    let y = labels(&[("CD4 T", 5), ("CD8 T", 5), ("B", 5)]);
    let mut table = DistanceTable::new(false);
    table.insert("CD4 T", "CD8 T", 0.4);
    table.insert("CD4 T", "B", 0.4);
    table.insert("CD8 T", "B", 0.4);
    let scorer = MarginScorer::new(TransformFn::Linear, 1., 4.)?;
    let args = PairSelectorArgs {
        dynamic_margin: true,
        ..pair_args(4, 5, 4)
    };
    let selector = PairSelector::new(&y, args, Some((&scorer, &table)))?;
    let pairs = selector.select(&mut StdRng::seed_from_u64(17))?;

    let diff: Vec<&Pair> = pairs.iter().filter(|p| !p.same).collect();
    assert_eq!(diff.len(), 5 * 12);
    for p in diff {
        assert_ne!(y[p.a], y[p.b]);
        approx::assert_abs_diff_eq!(p.target, 0.9, epsilon = 1e-5);
    }
    Ok(())
}

#[test]
fn binary_transform_keeps_hard_targets() -> anyhow::Result<()> {
    let y = labels(&[("CD4 T", 4), ("CD8 T", 4), ("B", 4)]);
    let table = immune_distances();
    let scorer = MarginScorer::new(TransformFn::Binary, 1., 4.)?;
    let args = PairSelectorArgs {
        dynamic_margin: true,
        ..pair_args(3, 2, 2)
    };
    let selector = PairSelector::new(&y, args, Some((&scorer, &table)))?;
    let pairs = selector.select(&mut StdRng::seed_from_u64(8))?;

    assert_eq!(pairs.iter().filter(|p| !p.same).count(), 2 * 9);
    for p in pairs.iter() {
        assert_eq!(p.target, if p.same { 1. } else { 0. });
    }
    Ok(())
}

#[test]
fn stratified_pairs_need_a_distance_table() {
    let y = labels(&[("CD4 T", 3), ("B", 3)]);
    let err = PairSelector::new(&y, pair_args(1, 1, 3), None).err();
    assert!(matches!(
        err.as_ref().and_then(kind),
        Some(LupinError::InvalidParameter(_))
    ));
}

#[test]
fn missing_distance_fails_early() -> anyhow::Result<()> {
    let y = labels(&[("CD4 T", 3), ("NK", 3)]);
    let table = immune_distances();
    let scorer = MarginScorer::new(TransformFn::Linear, 1., 4.)?;
    let err = PairSelector::new(&y, pair_args(1, 1, 2), Some((&scorer, &table))).err();
    assert!(matches!(
        err.as_ref().and_then(kind),
        Some(LupinError::MissingDistance(_, _))
    ));
    Ok(())
}

#[test]
fn hard_pairs_are_reproducible_and_closer() -> anyhow::Result<()> {
    let y = labels(&[("CD4 T", 6), ("CD8 T", 6), ("B", 6)]);
    // one coordinate: CD4 T near 0, CD8 T near 1, B near 10
    let coords: Vec<f32> = (0..18)
        .map(|i| match i / 6 {
            0 => 0.01 * i as f32,
            1 => 1. + 0.01 * i as f32,
            _ => 10. + 0.01 * i as f32,
        })
        .collect();
    let emb = DMatrix::from_row_slice(18, 1, &coords);

    let selector = PairSelector::new(&y, pair_args(4, 5, 0), None)?;
    let hard = selector.select_hard(&mut StdRng::seed_from_u64(3), &emb, 8)?;
    let again = selector.select_hard(&mut StdRng::seed_from_u64(3), &emb, 8)?;
    assert_eq!(hard, again);

    let easy = selector.select(&mut StdRng::seed_from_u64(3))?;
    let mean_gap = |pairs: &[Pair]| {
        let diff: Vec<f32> = pairs
            .iter()
            .filter(|p| !p.same)
            .map(|p| (coords[p.a] - coords[p.b]).abs())
            .collect();
        diff.iter().sum::<f32>() / diff.len() as f32
    };
    assert!(mean_gap(&hard) < mean_gap(&easy));

    let short = DMatrix::<f32>::zeros(5, 1);
    assert!(selector
        .select_hard(&mut StdRng::seed_from_u64(3), &short, 8)
        .is_err());
    Ok(())
}

#[test]
fn triplet_batches_have_p_classes_of_k() -> anyhow::Result<()> {
    let names: Vec<String> = (0..20).map(|c| format!("type{:02}", c)).collect();
    let counts: Vec<(&str, usize)> = names.iter().map(|n| (n.as_str(), 6)).collect();
    let y = labels(&counts);

    let sampler = TripletBatchSampler::new(&y, 18, 4, 5)?;
    assert_eq!(sampler.batch_size(), 72);

    let batches = sampler.sample_epoch(&mut StdRng::seed_from_u64(5));
    assert_eq!(batches.len(), 5);

    for batch in batches.iter() {
        assert_eq!(batch.samples.len(), 72);
        let mut per_class: HashMap<usize, usize> = HashMap::new();
        for (&i, &c) in batch.samples.iter().zip(batch.classes.iter()) {
            assert_eq!(y[i].as_ref(), sampler.class_name(c));
            *per_class.entry(c).or_default() += 1;
        }
        assert_eq!(per_class.len(), 18);
        assert!(per_class.values().all(|&n| n == 4));

        let distinct: HashSet<usize> = batch.samples.iter().copied().collect();
        assert_eq!(distinct.len(), 72);
    }
    Ok(())
}

#[test]
fn triplet_batches_need_p_classes_with_k_samples() {
    // only 17 classes reach K = 4
    let names: Vec<String> = (0..20).map(|c| format!("type{:02}", c)).collect();
    let counts: Vec<(&str, usize)> = names
        .iter()
        .enumerate()
        .map(|(c, n)| (n.as_str(), if c < 17 { 4 } else { 3 }))
        .collect();
    let y = labels(&counts);

    let err = TripletBatchSampler::new(&y, 18, 4, 1).err();
    assert!(matches!(
        err.as_ref().and_then(kind),
        Some(LupinError::InsufficientSamples(_))
    ));
    assert!(TripletBatchSampler::new(&y, 17, 4, 1).is_ok());
}

#[test]
fn batch_hard_loss_on_sampled_batch() -> anyhow::Result<()> {
    let y = labels(&[("a", 4), ("b", 4), ("c", 4)]);
    let sampler = TripletBatchSampler::new(&y, 2, 2, 1)?;
    let batch = sampler.sample_batch(&mut StdRng::seed_from_u64(9));

    // well separated classes: hinge is inactive for a small margin
    let coords: Vec<f32> = batch
        .classes
        .iter()
        .zip(batch.samples.iter())
        .map(|(&c, &i)| 100. * c as f32 + 0.1 * (i % 4) as f32)
        .collect();
    let emb = DMatrix::from_row_slice(coords.len(), 1, &coords);
    approx::assert_abs_diff_eq!(batch_hard_triplet_loss(&emb, &batch.classes, 1.)?, 0.);
    Ok(())
}
