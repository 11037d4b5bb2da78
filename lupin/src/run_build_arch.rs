use crate::cli_common::*;

use lupin::architecture::{build_architecture, ArchitectureMode};
use lupin::common_io::write_lines;
use lupin::grouping::Grouping;
use lupin::ontology::OntologyGraph;

#[derive(Args, Debug)]
pub struct BuildArchArgs {
    #[command(flatten)]
    genes: GeneArgs,

    /// Grouping file: `name gene gene ...` per line; one sparse unit
    /// per group
    #[arg(long, conflicts_with_all = ["go_arch", "fgo_ppitf_grps"])]
    sparse_groupings: Option<Box<str>>,

    /// Ontology directory of `level_<k>.txt` files; one sparse layer per
    /// level
    #[arg(long, conflicts_with = "fgo_ppitf_grps")]
    go_arch: Option<Box<str>>,

    /// PPI/TF grouping file placed next to the `--go-arch` tree
    #[arg(long, requires = "go_arch")]
    ppitf_grps: Option<Box<str>>,

    /// Flat GO grouping and PPI/TF grouping files, side by side
    #[arg(long, num_args = 2, value_names = ["GO", "PPITF"])]
    fgo_ppitf_grps: Option<Vec<Box<str>>>,

    /// Unconstrained units added next to the sparse units
    #[arg(long, default_value_t = 0)]
    with_dense: usize,

    /// Dense hidden layers after the sparse stage (comma-separated)
    #[arg(long, value_delimiter(','))]
    hidden_sizes: Vec<usize>,

    /// Output JSON file
    #[arg(long, short, required = true)]
    out: Box<str>,

    /// Per-layer summary file (`layer kind in out`)
    #[arg(long)]
    summary: Option<Box<str>>,
}

pub fn build_arch(args: &BuildArchArgs) -> anyhow::Result<()> {
    let genes = args.genes.universe()?;

    let with_dense = args.with_dense;

    let arch = if let Some(file) = args.sparse_groupings.as_ref() {
        let grouping = Grouping::from_file(file, &genes)?;
        build_architecture(
            &ArchitectureMode::Sparse {
                grouping: &grouping,
                with_dense,
            },
            &genes,
            &args.hidden_sizes,
        )?
    } else if let Some(dir) = args.go_arch.as_ref() {
        let ontology = OntologyGraph::load(dir)?;
        match args.ppitf_grps.as_ref() {
            Some(file) => {
                let ppitf = Grouping::from_file(file, &genes)?;
                build_architecture(
                    &ArchitectureMode::GoPpiTf {
                        ontology: &ontology,
                        ppitf: &ppitf,
                        with_dense,
                    },
                    &genes,
                    &args.hidden_sizes,
                )?
            }
            None => build_architecture(
                &ArchitectureMode::GoTree {
                    ontology: &ontology,
                    with_dense,
                },
                &genes,
                &args.hidden_sizes,
            )?,
        }
    } else if let Some(files) = args.fgo_ppitf_grps.as_ref() {
        let go = Grouping::from_file(&files[0], &genes)?;
        let ppitf = Grouping::from_file(&files[1], &genes)?;
        build_architecture(
            &ArchitectureMode::FlatGoPpiTf {
                go: &go,
                ppitf: &ppitf,
                with_dense,
            },
            &genes,
            &args.hidden_sizes,
        )?
    } else {
        if with_dense > 0 {
            warn!("--with-dense is ignored without a sparse stage");
        }
        build_architecture(&ArchitectureMode::Dense, &genes, &args.hidden_sizes)?
    };

    arch.to_json_file(&args.out)?;
    info!("wrote {}", args.out);

    if let Some(file) = args.summary.as_ref() {
        write_lines(&arch.summary(), file)?;
    }
    Ok(())
}
