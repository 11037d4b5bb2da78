mod cli_common;
mod run_build_arch;
mod run_path_length;
mod run_sample_pairs;
mod run_triplet_batches;

use run_build_arch::*;
use run_path_length::*;
use run_sample_pairs::*;
use run_triplet_batches::*;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    version,
    about = "LUPIN",
    long_about = "Ontology-guided sparse architectures and metric-learning samplers\n\
		  for single-cell embedding. Each subcommand writes a plain-text\n\
		  or JSON file for an external training loop."
)]
struct Cli {
    #[arg(short = 'v', long, global = true, help = "Print info-level logs")]
    verbose: bool,

    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Build a sparse (grouping/GO) network topology",
        long_about = "Build the layer topology of an embedding network:\n\
		      (1) dense: fully connected hidden layers only\n\
		      (2) sparse: one unit per gene group\n\
		      (3) GO: one sparse layer per ontology level\n\
		      (4) flatGO_ppitf / GO_ppitf: GO next to PPI/TF groups\n\
		      and write it as JSON."
    )]
    BuildArch(BuildArchArgs),

    #[command(
        about = "Select siamese pairs for one epoch",
        long_about = "Draw same-type and different-type sample pairs.\n\
		      Different pairs are uniform or stratified by the\n\
		      target similarity of their cell types. Targets are 1/0\n\
		      or, with --dyn-margin-loss, transformed similarities."
    )]
    SamplePairs(SamplePairsArgs),

    #[command(
        about = "Sample batch-hard triplet batches",
        long_about = "Draw P cell types x K samples per batch for\n\
		      batch-hard triplet training."
    )]
    TripletBatches(TripletBatchesArgs),

    #[command(
        about = "Ontology path lengths between terms",
        long_about = "Shortest undirected path lengths between ontology terms,\n\
		      `inf` when disconnected or beyond --max-ont-path-len."
    )]
    PathLength(PathLengthArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    match &cli.commands {
        Commands::BuildArch(args) => {
            build_arch(args)?;
        }
        Commands::SamplePairs(args) => {
            sample_pairs(args)?;
        }
        Commands::TripletBatches(args) => {
            triplet_batches(args)?;
        }
        Commands::PathLength(args) => {
            path_length(args)?;
        }
    }

    Ok(())
}
