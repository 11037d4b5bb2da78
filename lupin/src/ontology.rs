//! Ontology DAG (GO terms or cell-type terms).
//!
//! Nodes may have several parents. Levels run from 0 (closest to the
//! genes / most specific) toward the root, and every parent sits at a
//! strictly higher level than its children, which keeps the graph
//! acyclic. Path lengths are measured on the undirected projection.

use crate::common_io::{read_lines_of_words_delim, read_to_string};
use crate::error::LupinError;
use fnv::FnvHashMap as HashMap;
use fnv::FnvHashSet as HashSet;
use log::{debug, info};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

/// One node as declared in an input file
#[derive(Debug, Clone, Default)]
pub struct NodeRecord {
    pub id: Box<str>,
    pub parents: Vec<Box<str>>,
    /// direct gene annotations (symbols or column indices)
    pub genes: Vec<Box<str>>,
}

#[derive(Debug, Clone)]
pub struct OntologyNode {
    pub id: Box<str>,
    pub level: usize,
    pub parents: Vec<usize>,
    pub children: Vec<usize>,
    pub genes: Vec<Box<str>>,
}

#[derive(Debug)]
pub struct OntologyGraph {
    nodes: Vec<OntologyNode>,
    index: HashMap<Box<str>, usize>,
    neighbours: Vec<Vec<usize>>,
    max_path_len: Option<usize>,
    path_cache: Mutex<HashMap<(usize, usize), Option<usize>>>,
}

fn malformed(msg: String) -> anyhow::Error {
    LupinError::MalformedOntology(msg).into()
}

impl OntologyGraph {
    ///
    /// Load a directory of `level_<k>.txt[.gz]` files.
    ///
    /// Each line is `node<TAB>parent,parent,...<TAB>gene,gene,...`; the
    /// parent and gene columns may be empty or `-`.
    ///
    pub fn load(directory: &str) -> anyhow::Result<Self> {
        let mut level_files: Vec<(usize, String)> = vec![];

        for entry in std::fs::read_dir(directory)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            match parse_level_file_name(&path) {
                Some(k) => level_files.push((k, path.to_string_lossy().into_owned())),
                None => debug!("skipping {}", path.display()),
            }
        }

        if level_files.is_empty() {
            return Err(malformed(format!("no level_<k> files in {}", directory)));
        }

        level_files.sort();

        for w in level_files.windows(2) {
            if w[0].0 == w[1].0 {
                return Err(malformed(format!(
                    "level {} defined twice: {} and {}",
                    w[0].0, w[0].1, w[1].1
                )));
            }
        }

        let mut records = vec![];
        let mut levels = vec![];

        for (k, file) in level_files.iter() {
            for words in read_lines_of_words_delim(file, "\t")? {
                if words.len() > 3 {
                    return Err(malformed(format!(
                        "{}: expected at most 3 columns, found {}",
                        file,
                        words.len()
                    )));
                }
                let id = words[0].clone();
                if id.is_empty() {
                    return Err(malformed(format!("{}: empty node id", file)));
                }
                let parents = words.get(1).map(|x| split_list(x)).unwrap_or_default();
                let genes = words.get(2).map(|x| split_list(x)).unwrap_or_default();
                records.push(NodeRecord { id, parents, genes });
                levels.push(*k);
            }
        }

        let ret = Self::assemble(records, Some(levels))?;
        info!(
            "Loaded {} ontology nodes over {} levels from {}",
            ret.num_nodes(),
            ret.num_levels(),
            directory
        );
        Ok(ret)
    }

    ///
    /// Read `[Term]` stanzas of an OBO file (`id:`, `is_a:`), skipping
    /// obsolete terms. Levels are node heights.
    ///
    pub fn load_obo(file_path: &str) -> anyhow::Result<Self> {
        let text = read_to_string(file_path)?;

        let mut records = vec![];
        let mut current: Option<NodeRecord> = None;
        let mut in_term = false;
        let mut obsolete = false;

        let mut flush = |rec: Option<NodeRecord>, obsolete: bool| {
            if let Some(rec) = rec {
                if !obsolete && !rec.id.is_empty() {
                    records.push(rec);
                }
            }
        };

        for line in text.lines() {
            let line = line.trim();
            if line.starts_with('[') {
                flush(current.take(), obsolete);
                obsolete = false;
                in_term = line == "[Term]";
                if in_term {
                    current = Some(NodeRecord::default());
                }
                continue;
            }
            if !in_term {
                continue;
            }
            let Some(rec) = current.as_mut() else {
                continue;
            };
            if let Some(v) = line.strip_prefix("id:") {
                rec.id = v.trim().into();
            } else if let Some(v) = line.strip_prefix("is_a:") {
                if let Some(p) = v.split_whitespace().next() {
                    rec.parents.push(p.into());
                }
            } else if let Some(v) = line.strip_prefix("is_obsolete:") {
                obsolete = v.trim() == "true";
            }
        }
        flush(current.take(), obsolete);

        let ret = Self::from_parent_links(records)?;
        info!(
            "Loaded {} ontology terms from {}",
            ret.num_nodes(),
            file_path
        );
        Ok(ret)
    }

    /// Build from nodes with explicit levels (`levels[i]` for `records[i]`)
    pub fn from_level_records(records: Vec<NodeRecord>, levels: Vec<usize>) -> anyhow::Result<Self> {
        if records.len() != levels.len() {
            return Err(LupinError::InvalidParameter(format!(
                "{} records but {} levels",
                records.len(),
                levels.len()
            ))
            .into());
        }
        Self::assemble(records, Some(levels))
    }

    /// Build from parent links alone; a node's level is its height
    pub fn from_parent_links(records: Vec<NodeRecord>) -> anyhow::Result<Self> {
        Self::assemble(records, None)
    }

    fn assemble(records: Vec<NodeRecord>, levels: Option<Vec<usize>>) -> anyhow::Result<Self> {
        let mut index: HashMap<Box<str>, usize> = HashMap::default();
        for (i, rec) in records.iter().enumerate() {
            if index.insert(rec.id.clone(), i).is_some() {
                return Err(malformed(format!("node {} defined twice", rec.id)));
            }
        }

        let nn = records.len();
        let mut parents: Vec<Vec<usize>> = vec![vec![]; nn];
        let mut children: Vec<Vec<usize>> = vec![vec![]; nn];

        for (i, rec) in records.iter().enumerate() {
            for p in rec.parents.iter() {
                let &j = index.get(p).ok_or_else(|| {
                    malformed(format!("{} refers to undefined parent {}", rec.id, p))
                })?;
                if j == i {
                    return Err(malformed(format!("{} is its own parent", rec.id)));
                }
                if !parents[i].contains(&j) {
                    parents[i].push(j);
                    children[j].push(i);
                }
            }
        }

        let levels = match levels {
            Some(levels) => {
                for (i, rec) in records.iter().enumerate() {
                    if let Some(&j) = parents[i].iter().find(|&&j| levels[j] <= levels[i]) {
                        return Err(malformed(format!(
                            "parent {} (level {}) is not above {} (level {})",
                            records[j].id, levels[j], rec.id, levels[i]
                        )));
                    }
                }
                levels
            }
            None => node_heights(&records, &parents, &children)?,
        };

        let neighbours = (0..nn)
            .map(|i| {
                let mut nb: Vec<usize> = parents[i].iter().chain(children[i].iter()).copied().collect();
                nb.sort_unstable();
                nb.dedup();
                nb
            })
            .collect();

        let nodes = records
            .into_iter()
            .zip(levels)
            .zip(parents.into_iter().zip(children))
            .map(|((rec, level), (parents, children))| OntologyNode {
                id: rec.id,
                level,
                parents,
                children,
                genes: rec.genes,
            })
            .collect();

        Ok(Self {
            nodes,
            index,
            neighbours,
            max_path_len: None,
            path_cache: Mutex::new(HashMap::default()),
        })
    }

    /// Stop path searches beyond `max_len` edges (`--max_ont_dist`)
    pub fn with_max_path_len(mut self, max_len: Option<usize>) -> Self {
        self.max_path_len = max_len;
        self.path_cache
            .get_mut()
            .expect("path cache lock")
            .clear();
        self
    }

    pub fn max_path_len(&self) -> Option<usize> {
        self.max_path_len
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_levels(&self) -> usize {
        self.nodes.iter().map(|n| n.level + 1).max().unwrap_or(0)
    }

    pub fn nodes(&self) -> &[OntologyNode] {
        &self.nodes
    }

    pub fn node(&self, i: usize) -> &OntologyNode {
        &self.nodes[i]
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn require(&self, id: &str) -> anyhow::Result<usize> {
        self.index_of(id)
            .ok_or_else(|| LupinError::UnknownTerm(id.into()).into())
    }

    /// Nodes of level `k`, in declaration order
    pub fn nodes_at_level(&self, k: usize) -> Vec<usize> {
        (0..self.nodes.len())
            .filter(|&i| self.nodes[i].level == k)
            .collect()
    }

    /// All nodes reachable through parent links, nearest first
    pub fn ancestors(&self, i: usize) -> Vec<usize> {
        self.closure(i, |n| &n.parents)
    }

    /// All nodes reachable through child links, nearest first
    pub fn descendants(&self, i: usize) -> Vec<usize> {
        self.closure(i, |n| &n.children)
    }

    fn closure<F>(&self, i: usize, next: F) -> Vec<usize>
    where
        F: Fn(&OntologyNode) -> &Vec<usize>,
    {
        let mut visited: HashSet<usize> = HashSet::default();
        let mut queue = VecDeque::from([i]);
        let mut ret = vec![];
        while let Some(u) = queue.pop_front() {
            for &v in next(&self.nodes[u]) {
                if visited.insert(v) {
                    ret.push(v);
                    queue.push_back(v);
                }
            }
        }
        ret
    }

    ///
    /// Number of edges on the shortest undirected path between two terms.
    ///
    /// Returns `None` if the terms are disconnected or farther apart than
    /// the maximum path length.
    ///
    pub fn path_length(&self, a: &str, b: &str) -> anyhow::Result<Option<usize>> {
        let i = self.require(a)?;
        let j = self.require(b)?;
        Ok(self.path_length_by_index(i, j))
    }

    pub fn path_length_by_index(&self, i: usize, j: usize) -> Option<usize> {
        if i == j {
            return Some(0);
        }
        let key = (i.min(j), i.max(j));

        if let Some(&d) = self.path_cache.lock().expect("path cache lock").get(&key) {
            return d;
        }

        let d = self.bfs_distance(key.0, key.1);
        self.path_cache
            .lock()
            .expect("path cache lock")
            .insert(key, d);
        d
    }

    fn bfs_distance(&self, source: usize, target: usize) -> Option<usize> {
        let mut depth: HashMap<usize, usize> = HashMap::default();
        depth.insert(source, 0);
        let mut queue = VecDeque::from([source]);

        while let Some(u) = queue.pop_front() {
            let du = depth[&u];
            if self.max_path_len.is_some_and(|m| du >= m) {
                continue;
            }
            for &v in self.neighbours[u].iter() {
                if depth.contains_key(&v) {
                    continue;
                }
                if v == target {
                    return Some(du + 1);
                }
                depth.insert(v, du + 1);
                queue.push_back(v);
            }
        }
        None
    }
}

/// `level_3.txt`, `level_3.txt.gz`, `level_3` -> 3
fn parse_level_file_name(path: &Path) -> Option<usize> {
    let name = path.file_name()?.to_str()?;
    let name = name.strip_suffix(".gz").unwrap_or(name);
    let name = name.strip_suffix(".txt").unwrap_or(name);
    name.strip_prefix("level_")?.parse().ok()
}

fn split_list(s: &str) -> Vec<Box<str>> {
    s.split(',')
        .map(|x| x.trim())
        .filter(|x| !x.is_empty() && *x != "-")
        .map(|x| x.into())
        .collect()
}

/// Height of every node (leaves are 0); fails on cycles
fn node_heights(
    records: &[NodeRecord],
    parents: &[Vec<usize>],
    children: &[Vec<usize>],
) -> anyhow::Result<Vec<usize>> {
    let nn = records.len();
    let mut remaining: Vec<usize> = children.iter().map(|c| c.len()).collect();
    let mut height = vec![0usize; nn];
    let mut queue: VecDeque<usize> = (0..nn).filter(|&i| remaining[i] == 0).collect();
    let mut nvisited = 0;

    while let Some(u) = queue.pop_front() {
        nvisited += 1;
        for &p in parents[u].iter() {
            height[p] = height[p].max(height[u] + 1);
            remaining[p] -= 1;
            if remaining[p] == 0 {
                queue.push_back(p);
            }
        }
    }

    if nvisited < nn {
        let stuck = (0..nn)
            .find(|&i| remaining[i] > 0)
            .map(|i| records[i].id.clone())
            .unwrap_or_default();
        return Err(malformed(format!("cycle through {}", stuck)));
    }
    Ok(height)
}
