use crate::cli_common::*;

use lupin::common_io::write_lines;
use lupin::triplet::TripletBatchSampler;

#[derive(Args, Debug)]
pub struct TripletBatchesArgs {
    /// Sample labels; the last column of each line is the cell type
    #[arg(required = true)]
    labels: Box<str>,

    /// Cell types per batch
    #[arg(long = "batch-hard-P", default_value_t = 18)]
    batch_hard_p: usize,

    /// Samples per cell type
    #[arg(long = "batch-hard-K", default_value_t = 4)]
    batch_hard_k: usize,

    /// Batches per epoch
    #[arg(long, default_value_t = 100)]
    num_batches: usize,

    /// Random seed
    #[arg(long, default_value_t = 42)]
    rseed: u64,

    /// Output file (`batch sample cell_type` rows)
    #[arg(long, short, required = true)]
    out: Box<str>,
}

pub fn triplet_batches(args: &TripletBatchesArgs) -> anyhow::Result<()> {
    let labels = read_labels(&args.labels)?;

    let sampler = TripletBatchSampler::new(
        &labels,
        args.batch_hard_p,
        args.batch_hard_k,
        args.num_batches,
    )?;

    let mut rng = StdRng::seed_from_u64(args.rseed);
    let batches = sampler.sample_epoch(&mut rng);

    let lines: Vec<Box<str>> = batches
        .iter()
        .enumerate()
        .flat_map(|(b, batch)| {
            batch
                .samples
                .iter()
                .zip(batch.classes.iter())
                .map(move |(i, &c)| (b, *i, c))
        })
        .map(|(b, i, c)| format!("{}\t{}\t{}", b, i, sampler.class_name(c)).into_boxed_str())
        .collect();

    write_lines(&lines, &args.out)?;
    info!(
        "wrote {} batches of {} to {}",
        batches.len(),
        sampler.batch_size(),
        args.out
    );
    Ok(())
}
