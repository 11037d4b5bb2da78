//! Gene groupings: named sets of expression-matrix columns.
//!
//! A grouping file has one group per line, `name gene gene ...`, split on
//! tabs, commas or spaces. Gene tokens are gene symbols or column indices:
//! `@j` is always column `j`, a bare integer only when no gene name is an
//! integer. An optional `!genes g0 g1 ...` line pins the gene order the
//! file was written against.

use crate::common_io::read_lines_of_words_delim;
use crate::error::LupinError;
use fnv::FnvHashMap as HashMap;
use fnv::FnvHashSet as HashSet;
use log::{info, warn};

const ALIGNMENT_TAG: &str = "!genes";
const INDEX_PREFIX: char = '@';

/// Column space of the expression matrix.
#[derive(Debug, Clone)]
pub struct GeneUniverse {
    names: Vec<Box<str>>,
    name_to_index: HashMap<Box<str>, usize>,
    /// bare integer tokens are column indices
    bare_indices: bool,
}

impl GeneUniverse {
    pub fn new(names: Vec<Box<str>>) -> Self {
        let mut name_to_index = HashMap::default();
        for (j, g) in names.iter().enumerate() {
            // keep the first column on duplicated symbols
            name_to_index.entry(g.clone()).or_insert(j);
        }
        // numeric gene ids (e.g. Entrez) would collide with indices
        let bare_indices = !names.iter().any(|g| g.parse::<usize>().is_ok());
        Self {
            names,
            name_to_index,
            bare_indices,
        }
    }

    /// Anonymous universe `0 .. n_genes`; only index tokens resolve
    pub fn with_size(n_genes: usize) -> Self {
        let mut ret = Self::new((0..n_genes).map(|j| j.to_string().into_boxed_str()).collect());
        ret.bare_indices = true;
        ret
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[Box<str>] {
        &self.names
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    ///
    /// Resolve a gene token to a column.
    ///
    /// `@j` is column `j`. A bare integer is a column index only if no
    /// gene name is an integer; otherwise it is looked up as a symbol.
    ///
    pub fn resolve(&self, token: &str, group: &str) -> anyhow::Result<usize> {
        if let Some(idx) = token.strip_prefix(INDEX_PREFIX) {
            let j = idx.parse::<usize>().map_err(|_| {
                LupinError::GroupingFormat(format!(
                    "group {}: bad column index {}",
                    group, token
                ))
            })?;
            return self.check_index(j, group);
        }

        if self.bare_indices {
            if let Ok(j) = token.parse::<usize>() {
                return self.check_index(j, group);
            }
        }

        self.index_of(token).ok_or_else(|| {
            LupinError::GeneAlignment(format!(
                "group {}: gene {} not found in the expression matrix",
                group, token
            ))
            .into()
        })
    }

    fn check_index(&self, j: usize, group: &str) -> anyhow::Result<usize> {
        if j >= self.len() {
            return Err(LupinError::GroupingFormat(format!(
                "group {}: gene index {} out of range [0, {})",
                group,
                j,
                self.len()
            ))
            .into());
        }
        Ok(j)
    }

    /// The declared gene order must match the expression matrix exactly
    pub fn check_alignment(&self, declared: &[Box<str>]) -> anyhow::Result<()> {
        if declared.len() != self.len() {
            return Err(LupinError::GeneAlignment(format!(
                "grouping declares {} genes, expression matrix has {}",
                declared.len(),
                self.len()
            ))
            .into());
        }
        if let Some((j, (a, b))) = declared
            .iter()
            .zip(self.names.iter())
            .enumerate()
            .find(|(_, (a, b))| a != b)
        {
            return Err(LupinError::GeneAlignment(format!(
                "column {}: grouping has {}, expression matrix has {}",
                j, a, b
            ))
            .into());
        }
        Ok(())
    }
}

/// Ordered mapping from group name to gene indices (file order).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grouping {
    names: Vec<Box<str>>,
    members: Vec<Vec<usize>>,
}

impl Grouping {
    /// Build from `(name, gene indices)` pairs, rejecting duplicated names
    /// and indices outside `[0, n_genes)`
    pub fn from_groups(
        groups: impl IntoIterator<Item = (Box<str>, Vec<usize>)>,
        n_genes: usize,
    ) -> anyhow::Result<Self> {
        let mut ret = Grouping::default();
        let mut seen: HashSet<Box<str>> = HashSet::default();

        for (name, genes) in groups {
            if !seen.insert(name.clone()) {
                return Err(
                    LupinError::GroupingFormat(format!("duplicated group {}", name)).into(),
                );
            }
            if let Some(&j) = genes.iter().find(|&&j| j >= n_genes) {
                return Err(LupinError::GroupingFormat(format!(
                    "group {}: gene index {} out of range [0, {})",
                    name, j, n_genes
                ))
                .into());
            }
            ret.names.push(name);
            ret.members.push(dedup_keep_order(genes));
        }
        Ok(ret)
    }

    ///
    /// Read a grouping file against the expression matrix genes.
    ///
    /// * `file_path` - grouping file (gzipped or not)
    /// * `genes` - expression matrix column names
    ///
    pub fn from_file(file_path: &str, genes: &GeneUniverse) -> anyhow::Result<Self> {
        let lines = read_lines_of_words_delim(file_path, &['\t', ',', ' '])?;

        let mut groups = vec![];
        for words in lines {
            let words: Vec<Box<str>> = words.into_iter().filter(|w| !w.is_empty()).collect();
            let Some((head, rest)) = words.split_first() else {
                continue;
            };

            if head.as_ref() == ALIGNMENT_TAG {
                genes.check_alignment(rest)?;
                continue;
            }

            let members = rest
                .iter()
                .map(|tok| genes.resolve(tok, head))
                .collect::<anyhow::Result<Vec<usize>>>()?;

            if members.is_empty() {
                warn!("group {} in {} has no genes", head, file_path);
            }
            groups.push((head.clone(), members));
        }

        let ret = Self::from_groups(groups, genes.len())?;
        info!(
            "Loaded {} groups covering {} genes from {}",
            ret.len(),
            ret.num_covered_genes(),
            file_path
        );
        Ok(ret)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[Box<str>] {
        &self.names
    }

    pub fn genes(&self, g: usize) -> &[usize] {
        &self.members[g]
    }

    pub fn get(&self, name: &str) -> Option<&[usize]> {
        self.names
            .iter()
            .position(|x| x.as_ref() == name)
            .map(|g| self.members[g].as_slice())
    }

    /// `(name, genes)` in file order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.names
            .iter()
            .zip(self.members.iter())
            .map(|(n, m)| (n.as_ref(), m.as_slice()))
    }

    /// number of distinct genes used by any group
    pub fn num_covered_genes(&self) -> usize {
        self.members
            .iter()
            .flatten()
            .collect::<HashSet<_>>()
            .len()
    }
}

fn dedup_keep_order(genes: Vec<usize>) -> Vec<usize> {
    let mut seen = HashSet::default();
    genes.into_iter().filter(|j| seen.insert(*j)).collect()
}
