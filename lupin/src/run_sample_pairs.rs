use crate::cli_common::*;

use lupin::common_io::write_lines;
use lupin::pairs::{PairSelector, PairSelectorArgs};

#[derive(Args, Debug)]
pub struct SamplePairsArgs {
    /// Sample labels; the last column of each line is the cell type
    #[arg(required = true)]
    labels: Box<str>,

    /// Same-type pairs per cell type
    #[arg(long, default_value_t = 100)]
    same_lim: usize,

    /// Different-type pairs per same-type pair
    #[arg(long, default_value_t = 2)]
    diff_multiplier: usize,

    /// Stratify different pairs into this many similarity buckets
    /// (0: uniform over all cross-type pairs)
    #[arg(long, default_value_t = 0)]
    unif_diff: usize,

    #[command(flatten)]
    margin: MarginArgs,

    /// Embedding snapshot (one row per sample) for online re-mining of
    /// different pairs
    #[arg(long)]
    embeddings: Option<Box<str>>,

    /// Candidate different pairs per kept pair when re-mining
    #[arg(long, default_value_t = 5)]
    n_candidates: usize,

    /// Random seed
    #[arg(long, default_value_t = 42)]
    rseed: u64,

    /// Output file (`a b same target` rows)
    #[arg(long, short, required = true)]
    out: Box<str>,
}

pub fn sample_pairs(args: &SamplePairsArgs) -> anyhow::Result<()> {
    let labels = read_labels(&args.labels)?;
    let scoring = args.margin.scoring(&labels)?;

    let selector = PairSelector::new(
        &labels,
        PairSelectorArgs {
            same_lim: args.same_lim,
            diff_multiplier: args.diff_multiplier,
            unif_diff: args.unif_diff,
            dynamic_margin: args.margin.dyn_margin_loss,
        },
        scoring.as_ref().map(|(scorer, table)| (scorer, table)),
    )?;

    let mut rng = StdRng::seed_from_u64(args.rseed);

    let pairs = match args.embeddings.as_ref() {
        Some(file) => {
            let emb = read_embeddings(file)?;
            selector.select_hard(&mut rng, &emb, args.n_candidates)?
        }
        None => selector.select(&mut rng)?,
    };

    write_lines(&pairs, &args.out)?;
    info!("wrote {} pairs to {}", pairs.len(), args.out);
    Ok(())
}
