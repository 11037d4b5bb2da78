use crate::cli_common::*;

use lupin::common_io::{read_lines_of_words_delim, write_lines};
use lupin::ontology::OntologyGraph;
use rayon::prelude::*;

#[derive(Args, Debug)]
pub struct PathLengthArgs {
    /// Ontology directory of `level_<k>.txt` files
    #[arg(long, conflicts_with = "cell_ontology")]
    ontology: Option<Box<str>>,

    /// OBO ontology file
    #[arg(long)]
    cell_ontology: Option<Box<str>>,

    /// Term pairs, two columns per line
    #[arg(long, conflicts_with_all = ["a", "b"])]
    pairs: Option<Box<str>>,

    /// First term of a single query
    #[arg(long, requires = "b")]
    a: Option<Box<str>>,

    /// Second term of a single query
    #[arg(long, requires = "a")]
    b: Option<Box<str>>,

    /// Search no farther than this many edges
    #[arg(long)]
    max_ont_path_len: Option<usize>,

    /// Output file (`a b length` rows)
    #[arg(long, short, default_value = "stdout")]
    out: Box<str>,
}

pub fn path_length(args: &PathLengthArgs) -> anyhow::Result<()> {
    let graph = match (args.ontology.as_ref(), args.cell_ontology.as_ref()) {
        (Some(dir), _) => OntologyGraph::load(dir)?,
        (None, Some(obo)) => OntologyGraph::load_obo(obo)?,
        (None, None) => {
            return Err(anyhow::anyhow!("need either --ontology or --cell-ontology"));
        }
    }
    .with_max_path_len(args.max_ont_path_len);

    let queries: Vec<(Box<str>, Box<str>)> = match (args.pairs.as_ref(), &args.a, &args.b) {
        (Some(file), _, _) => read_lines_of_words_delim(file, &['\t', ','])?
            .into_iter()
            .filter_map(|words| {
                let mut words = words.into_iter().filter(|w| !w.is_empty());
                match (words.next(), words.next()) {
                    (Some(a), Some(b)) => Some((a, b)),
                    _ => {
                        warn!("skipping a line with fewer than two terms");
                        None
                    }
                }
            })
            .collect(),
        (None, Some(a), Some(b)) => vec![(a.clone(), b.clone())],
        _ => return Err(anyhow::anyhow!("need either --pairs or --a/--b")),
    };

    let lines = queries
        .par_iter()
        .map(|(a, b)| {
            let d = match graph.path_length(a, b)? {
                Some(d) => d.to_string(),
                None => "inf".to_string(),
            };
            Ok(format!("{}\t{}\t{}", a, b, d).into_boxed_str())
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    info!("{} path lengths", lines.len());
    write_lines(&lines, &args.out)
}
