//! Sparse, biologically structured network topologies.
//!
//! An [`ArchitectureSpec`] is an ordered list of layers. A sparse layer
//! lists its output units in order; unit `i` reads exactly the upstream
//! indices in `units[i].inputs`. A parallel layer runs several branches
//! on the same input and concatenates their outputs in branch order.

use crate::common_io::{open_buf_reader, open_buf_writer};
use crate::error::LupinError;
use crate::grouping::{GeneUniverse, Grouping};
use crate::ontology::OntologyGraph;
use fnv::FnvHashMap as HashMap;
use fnv::FnvHashSet as HashSet;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::io::Write;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseUnit {
    pub name: Box<str>,
    pub inputs: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    Dense { units: usize },
    Sparse { units: Vec<SparseUnit> },
    Parallel { branches: Vec<Branch> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub name: Box<str>,
    pub layers: Vec<LayerSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchitectureSpec {
    pub input_dim: usize,
    pub layers: Vec<LayerSpec>,
}

/// Which topology to build
pub enum ArchitectureMode<'a> {
    /// fully connected hidden layers only
    Dense,
    /// one unit per group, plus `with_dense` unconstrained units
    Sparse {
        grouping: &'a Grouping,
        with_dense: usize,
    },
    /// one sparse layer per ontology level
    GoTree {
        ontology: &'a OntologyGraph,
        with_dense: usize,
    },
    /// flat GO groups next to flat PPI/TF groups
    FlatGoPpiTf {
        go: &'a Grouping,
        ppitf: &'a Grouping,
        with_dense: usize,
    },
    /// GO tree next to flat PPI/TF groups
    GoPpiTf {
        ontology: &'a OntologyGraph,
        ppitf: &'a Grouping,
        with_dense: usize,
    },
}

impl ArchitectureMode<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Dense => "dense",
            Self::Sparse { .. } => "sparse",
            Self::GoTree { .. } => "GO",
            Self::FlatGoPpiTf { .. } => "flatGO_ppitf",
            Self::GoPpiTf { .. } => "GO_ppitf",
        }
    }
}

fn disconnected(msg: String) -> anyhow::Error {
    LupinError::DisconnectedArchitecture(msg).into()
}

///
/// Build the layer topology for `mode`.
///
/// * `mode` - architecture variant and its groupings
/// * `genes` - expression matrix columns (input layer)
/// * `hidden_sizes` - dense layers appended after the sparse stage
///
pub fn build_architecture(
    mode: &ArchitectureMode,
    genes: &GeneUniverse,
    hidden_sizes: &[usize],
) -> anyhow::Result<ArchitectureSpec> {
    if let Some(&h) = hidden_sizes.iter().find(|&&h| h == 0) {
        return Err(LupinError::InvalidParameter(format!("hidden size {}", h)).into());
    }

    let mut layers = match mode {
        ArchitectureMode::Dense => {
            if hidden_sizes.is_empty() {
                return Err(LupinError::InvalidParameter(
                    "dense architecture needs at least one hidden size".into(),
                )
                .into());
            }
            vec![]
        }
        ArchitectureMode::Sparse {
            grouping,
            with_dense,
        } => {
            let sparse = Branch::single("sparse", flat_sparse_layer(grouping)?);
            with_parallel_dense(vec![sparse], *with_dense)
        }
        ArchitectureMode::GoTree {
            ontology,
            with_dense,
        } => {
            let go = Branch {
                name: "GO".into(),
                layers: go_tree_layers(ontology, genes)?,
            };
            with_parallel_dense(vec![go], *with_dense)
        }
        ArchitectureMode::FlatGoPpiTf {
            go,
            ppitf,
            with_dense,
        } => {
            let go = Branch::single("GO", flat_sparse_layer(go)?);
            let ppitf = Branch::single("ppitf", flat_sparse_layer(ppitf)?);
            with_parallel_dense(vec![go, ppitf], *with_dense)
        }
        ArchitectureMode::GoPpiTf {
            ontology,
            ppitf,
            with_dense,
        } => {
            let go = Branch {
                name: "GO".into(),
                layers: go_tree_layers(ontology, genes)?,
            };
            let ppitf = Branch::single("ppitf", flat_sparse_layer(ppitf)?);
            with_parallel_dense(vec![go, ppitf], *with_dense)
        }
    };

    layers.extend(hidden_sizes.iter().map(|&units| LayerSpec::Dense { units }));

    let ret = ArchitectureSpec {
        input_dim: genes.len(),
        layers,
    };
    ret.validate()?;

    info!(
        "{} architecture: {} -> {:?}, {} parameters",
        mode.name(),
        ret.input_dim,
        ret.layer_output_dims(),
        ret.num_parameters()
    );
    Ok(ret)
}

/// A single sparse branch stays a plain layer; extra branches and dense
/// units become one parallel layer
fn with_parallel_dense(mut branches: Vec<Branch>, with_dense: usize) -> Vec<LayerSpec> {
    if with_dense > 0 {
        branches.push(Branch::single("dense", LayerSpec::Dense { units: with_dense }));
    }
    if branches.len() == 1 {
        branches.pop().map(|b| b.layers).unwrap_or_default()
    } else {
        vec![LayerSpec::Parallel { branches }]
    }
}

///
/// Hidden unit `i` connects exactly to the genes of group `i`.
///
pub fn flat_sparse_layer(grouping: &Grouping) -> anyhow::Result<LayerSpec> {
    let mut units = Vec::with_capacity(grouping.len());
    for (name, genes) in grouping.iter() {
        if genes.is_empty() {
            return Err(LupinError::EmptyGroup(name.to_string()).into());
        }
        units.push(SparseUnit {
            name: name.into(),
            inputs: genes.to_vec(),
        });
    }
    if units.is_empty() {
        return Err(LupinError::EmptyGroup("grouping has no groups".into()).into());
    }
    Ok(LayerSpec::Sparse { units })
}

///
/// One sparse layer per ontology level, leaves first. Level-0 nodes read
/// their annotated genes; a node at level `k > 0` reads the outputs of
/// its children at level `k - 1`.
///
pub fn go_tree_layers(
    ontology: &OntologyGraph,
    genes: &GeneUniverse,
) -> anyhow::Result<Vec<LayerSpec>> {
    let nlevels = ontology.num_levels();
    if nlevels == 0 {
        return Err(disconnected("empty ontology".into()));
    }

    let mut layers = Vec::with_capacity(nlevels);
    let mut prev_position: HashMap<usize, usize> = HashMap::default();

    for k in 0..nlevels {
        let level_nodes = ontology.nodes_at_level(k);
        let mut units = Vec::with_capacity(level_nodes.len());

        for &i in level_nodes.iter() {
            let node = ontology.node(i);

            let inputs: Vec<usize> = if k == 0 {
                let mut seen = HashSet::default();
                let mut inputs = vec![];
                for g in node.genes.iter() {
                    let j = genes.resolve(g, &node.id)?;
                    if seen.insert(j) {
                        inputs.push(j);
                    }
                }
                inputs
            } else {
                if !node.genes.is_empty() {
                    debug!(
                        "{}: direct genes are only wired at level 0 (level {})",
                        node.id, k
                    );
                }
                node.children
                    .iter()
                    .filter_map(|c| {
                        let pos = prev_position.get(c).copied();
                        if pos.is_none() {
                            warn!(
                                "{} (level {}) skips child {} at level {}",
                                node.id,
                                k,
                                ontology.node(*c).id,
                                ontology.node(*c).level
                            );
                        }
                        pos
                    })
                    .collect()
            };

            if inputs.is_empty() {
                return Err(disconnected(format!(
                    "{} at level {} has no connection to the input",
                    node.id, k
                )));
            }

            if k + 1 < nlevels && !node.parents.iter().any(|&p| ontology.node(p).level == k + 1) {
                warn!("{} (level {}) does not feed level {}", node.id, k, k + 1);
            }

            units.push(SparseUnit {
                name: node.id.clone(),
                inputs,
            });
        }

        prev_position = level_nodes
            .iter()
            .enumerate()
            .map(|(pos, &i)| (i, pos))
            .collect();

        layers.push(LayerSpec::Sparse { units });
    }

    Ok(layers)
}

impl Branch {
    fn single(name: &str, layer: LayerSpec) -> Self {
        Self {
            name: name.into(),
            layers: vec![layer],
        }
    }

    pub fn output_dim(&self, input_dim: usize) -> usize {
        self.layers
            .iter()
            .fold(input_dim, |d, layer| layer.output_dim(d))
    }
}

impl LayerSpec {
    pub fn output_dim(&self, input_dim: usize) -> usize {
        match self {
            Self::Dense { units } => *units,
            Self::Sparse { units } => units.len(),
            Self::Parallel { branches } => branches.iter().map(|b| b.output_dim(input_dim)).sum(),
        }
    }

    /// weights plus biases
    pub fn num_parameters(&self, input_dim: usize) -> usize {
        match self {
            Self::Dense { units } => (input_dim + 1) * units,
            Self::Sparse { units } => units.iter().map(|u| u.inputs.len() + 1).sum(),
            Self::Parallel { branches } => branches
                .iter()
                .map(|b| {
                    let mut d = input_dim;
                    let mut n = 0;
                    for layer in b.layers.iter() {
                        n += layer.num_parameters(d);
                        d = layer.output_dim(d);
                    }
                    n
                })
                .sum(),
        }
    }

    /// Output unit names; dense units are `<prefix>dense_<i>`
    pub fn unit_names(&self, prefix: &str) -> Vec<Box<str>> {
        match self {
            Self::Dense { units } => (0..*units)
                .map(|i| format!("{}dense_{}", prefix, i).into_boxed_str())
                .collect(),
            Self::Sparse { units } => units
                .iter()
                .map(|u| format!("{}{}", prefix, u.name).into_boxed_str())
                .collect(),
            Self::Parallel { branches } => branches
                .iter()
                .flat_map(|b| {
                    b.layers
                        .last()
                        .map(|l| l.unit_names(&format!("{}{}.", prefix, b.name)))
                        .unwrap_or_default()
                })
                .collect(),
        }
    }

    fn validate(&self, input_dim: usize, path: &str) -> anyhow::Result<()> {
        match self {
            Self::Dense { units } => {
                if *units == 0 {
                    return Err(
                        LupinError::InvalidParameter(format!("{}: empty dense layer", path)).into(),
                    );
                }
            }
            Self::Sparse { units } => {
                let mut names = HashSet::default();
                for u in units.iter() {
                    if !names.insert(u.name.as_ref()) {
                        return Err(LupinError::InvalidParameter(format!(
                            "{}: duplicated unit {}",
                            path, u.name
                        ))
                        .into());
                    }
                    if u.inputs.is_empty() {
                        return Err(disconnected(format!("{}: {} has no inputs", path, u.name)));
                    }
                    if let Some(&j) = u.inputs.iter().find(|&&j| j >= input_dim) {
                        return Err(disconnected(format!(
                            "{}: {} reads input {} of {}",
                            path, u.name, j, input_dim
                        )));
                    }
                }
            }
            Self::Parallel { branches } => {
                for b in branches.iter() {
                    let mut d = input_dim;
                    for (l, layer) in b.layers.iter().enumerate() {
                        layer.validate(d, &format!("{}/{}[{}]", path, b.name, l))?;
                        d = layer.output_dim(d);
                    }
                }
            }
        }
        Ok(())
    }
}

impl ArchitectureSpec {
    /// Every sparse input must point to an existing upstream unit
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut d = self.input_dim;
        for (l, layer) in self.layers.iter().enumerate() {
            layer.validate(d, &format!("layer[{}]", l))?;
            d = layer.output_dim(d);
        }
        Ok(())
    }

    pub fn layer_output_dims(&self) -> Vec<usize> {
        let mut d = self.input_dim;
        self.layers
            .iter()
            .map(|layer| {
                d = layer.output_dim(d);
                d
            })
            .collect()
    }

    pub fn output_dim(&self) -> usize {
        self.layer_output_dims()
            .last()
            .copied()
            .unwrap_or(self.input_dim)
    }

    pub fn num_parameters(&self) -> usize {
        let mut d = self.input_dim;
        let mut n = 0;
        for layer in self.layers.iter() {
            n += layer.num_parameters(d);
            d = layer.output_dim(d);
        }
        n
    }

    /// One line per layer
    pub fn summary(&self) -> Vec<Box<str>> {
        let mut d = self.input_dim;
        self.layers
            .iter()
            .enumerate()
            .map(|(l, layer)| {
                let out = layer.output_dim(d);
                let kind = match layer {
                    LayerSpec::Dense { .. } => "dense".to_string(),
                    LayerSpec::Sparse { .. } => "sparse".to_string(),
                    LayerSpec::Parallel { branches } => format!(
                        "parallel[{}]",
                        branches
                            .iter()
                            .map(|b| b.name.as_ref())
                            .collect::<Vec<_>>()
                            .join("+")
                    ),
                };
                let line = format!("{}\t{}\t{}\t{}", l, kind, d, out);
                d = out;
                line.into_boxed_str()
            })
            .collect()
    }

    pub fn to_json_file(&self, file_path: &str) -> anyhow::Result<()> {
        let mut buf = open_buf_writer(file_path)?;
        serde_json::to_writer_pretty(&mut buf, self)?;
        writeln!(buf)?;
        buf.flush()?;
        Ok(())
    }

    pub fn from_json_file(file_path: &str) -> anyhow::Result<Self> {
        let ret: Self = serde_json::from_reader(open_buf_reader(file_path)?)?;
        ret.validate()?;
        Ok(ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grouping(groups: Vec<(&str, Vec<usize>)>, n: usize) -> Grouping {
        Grouping::from_groups(groups.into_iter().map(|(k, v)| (k.into(), v)), n)
            .expect("grouping")
    }

    #[test]
    fn flat_sparse_with_dense_units() -> anyhow::Result<()> {
        let g = grouping(vec![("a", vec![0, 1]), ("b", vec![2])], 4);
        let genes = GeneUniverse::with_size(4);
        let mode = ArchitectureMode::Sparse {
            grouping: &g,
            with_dense: 3,
        };
        let arch = build_architecture(&mode, &genes, &[5])?;
        assert_eq!(arch.layer_output_dims(), vec![5, 5]);
        assert_eq!(
            arch.layers[0].unit_names(""),
            vec![
                Box::<str>::from("sparse.a"),
                "sparse.b".into(),
                "dense.dense_0".into(),
                "dense.dense_1".into(),
                "dense.dense_2".into()
            ]
        );
        // (2+1) + (1+1) + 3 * (4+1) + 5 * (5+1)
        assert_eq!(arch.num_parameters(), 3 + 2 + 15 + 30);
        Ok(())
    }

    #[test]
    fn empty_group_is_rejected() {
        let g = grouping(vec![("a", vec![0]), ("b", vec![])], 2);
        let err = flat_sparse_layer(&g).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LupinError>(),
            Some(LupinError::EmptyGroup(_))
        ));
    }

    #[test]
    fn dense_needs_hidden_sizes() {
        let genes = GeneUniverse::with_size(3);
        assert!(build_architecture(&ArchitectureMode::Dense, &genes, &[]).is_err());
        assert!(build_architecture(&ArchitectureMode::Dense, &genes, &[4, 0]).is_err());
    }

    #[test]
    fn validate_catches_out_of_range_inputs() {
        let arch = ArchitectureSpec {
            input_dim: 2,
            layers: vec![LayerSpec::Sparse {
                units: vec![SparseUnit {
                    name: "x".into(),
                    inputs: vec![0, 2],
                }],
            }],
        };
        let err = arch.validate().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LupinError>(),
            Some(LupinError::DisconnectedArchitecture(_))
        ));
    }
}
