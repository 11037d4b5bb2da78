pub use clap::Args;
pub use log::{info, warn};
pub use rand::rngs::StdRng;
pub use rand::SeedableRng;

use lupin::common_io::read_lines_of_words_delim;
use lupin::distance_table::DistanceTable;
use lupin::error::LupinError;
use lupin::grouping::GeneUniverse;
use lupin::margin::{DistanceKind, MarginScorer, TransformFn};
use lupin::ontology::OntologyGraph;
use nalgebra::DMatrix;
use std::collections::BTreeSet;

#[derive(Args, Debug)]
pub struct GeneArgs {
    /// Gene names of the expression matrix, one per line (first column).
    /// Grouping tokens are then looked up by name; write `@j` for column `j`
    #[arg(long)]
    pub genes: Option<Box<str>>,

    /// Number of genes when groupings refer to column indices only
    #[arg(long, conflicts_with = "genes")]
    pub n_genes: Option<usize>,
}

impl GeneArgs {
    pub fn universe(&self) -> anyhow::Result<GeneUniverse> {
        if let Some(file) = self.genes.as_ref() {
            let names: Vec<Box<str>> = read_lines_of_words_delim(file, &['\t', ','])?
                .into_iter()
                .filter_map(|words| words.into_iter().next())
                .collect();
            info!("{} genes from {}", names.len(), file);
            return Ok(GeneUniverse::new(names));
        }
        match self.n_genes {
            Some(n) => Ok(GeneUniverse::with_size(n)),
            None => Err(LupinError::InvalidParameter(
                "need either --genes or --n-genes".into(),
            )
            .into()),
        }
    }
}

#[derive(Args, Debug)]
pub struct MarginArgs {
    /// Carry transformed cell-type similarities as pair targets
    #[arg(long = "dyn-margin-loss", default_value_t = false)]
    pub dyn_margin_loss: bool,

    /// Cell-type distance table: `a b d` rows, or `.json` `{a: {b: d}}`
    #[arg(long, conflicts_with = "cell_ontology")]
    pub dist_mat_file: Option<Box<str>>,

    /// OBO cell ontology; labels are term ids and distances path lengths
    #[arg(long)]
    pub cell_ontology: Option<Box<str>>,

    /// Only look up distances in the stored direction
    #[arg(long, default_value_t = false)]
    pub asymm_dist: bool,

    /// What the distance table holds
    #[arg(long, value_enum, default_value = "ontology-path")]
    pub dist_kind: DistanceKind,

    /// Distance-to-similarity transform
    #[arg(long, value_enum, default_value = "linear")]
    pub trnsfm_fcn: TransformFn,

    /// Steepness of the exponential/sigmoidal transforms
    #[arg(long, default_value_t = 1.0)]
    pub trnsfm_fcn_param: f32,

    /// Ontology distance at which similarity reaches zero
    #[arg(long, default_value_t = 4.0)]
    pub max_ont_dist: f32,
}

impl MarginArgs {
    ///
    /// Scorer and distance table for the cell types in `labels`, or
    /// `None` when no distance source is given.
    ///
    pub fn scoring(
        &self,
        labels: &[Box<str>],
    ) -> anyhow::Result<Option<(MarginScorer, DistanceTable)>> {
        let table = if let Some(file) = self.dist_mat_file.as_ref() {
            DistanceTable::from_file(file, self.asymm_dist)?
        } else if let Some(obo) = self.cell_ontology.as_ref() {
            // paths past max_ont_dist score 0 anyway
            let bound = self.max_ont_dist.ceil().max(1.) as usize;
            let graph = OntologyGraph::load_obo(obo)?.with_max_path_len(Some(bound));
            let types: Vec<Box<str>> = labels
                .iter()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .cloned()
                .collect();
            DistanceTable::from_ontology(&graph, &types)?
        } else {
            return Ok(None);
        };

        let scorer = match self.dist_kind {
            DistanceKind::OntologyPath => {
                MarginScorer::new(self.trnsfm_fcn, self.trnsfm_fcn_param, self.max_ont_dist)?
            }
            DistanceKind::TextMined => {
                MarginScorer::text_mined(self.trnsfm_fcn, self.trnsfm_fcn_param)?
            }
        };
        Ok(Some((scorer, table)))
    }
}

/// Cell type per sample: the last column of each line
pub fn read_labels(file: &str) -> anyhow::Result<Vec<Box<str>>> {
    let labels = read_lines_of_words_delim(file, &['\t', ','])?
        .into_iter()
        .filter_map(|words| words.into_iter().rev().find(|w| !w.is_empty()))
        .collect::<Vec<_>>();
    info!("{} labelled samples from {}", labels.len(), file);
    Ok(labels)
}

/// Dense embedding snapshot, one row per sample
pub fn read_embeddings(file: &str) -> anyhow::Result<DMatrix<f32>> {
    let rows = read_lines_of_words_delim(file, &['\t', ',', ' '])?;
    let mut ncols = None;
    let mut data = vec![];
    for (i, words) in rows.iter().enumerate() {
        let vals = words
            .iter()
            .filter(|w| !w.is_empty())
            .map(|w| {
                w.parse::<f32>()
                    .map_err(|_| anyhow::anyhow!("{}: line {}: not a number {}", file, i, w))
            })
            .collect::<anyhow::Result<Vec<f32>>>()?;
        match ncols {
            None => ncols = Some(vals.len()),
            Some(d) if d != vals.len() => {
                return Err(anyhow::anyhow!(
                    "{}: line {} has {} columns, expected {}",
                    file,
                    i,
                    vals.len(),
                    d
                ));
            }
            _ => {}
        }
        data.extend(vals);
    }
    let ncols = ncols.unwrap_or(0);
    Ok(DMatrix::from_row_slice(rows.len(), ncols, &data))
}
