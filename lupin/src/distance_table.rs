//! Raw distances between cell types, keyed by `(type, type)`.
//!
//! Tables come from tab- or comma-separated rows `type_a type_b distance`,
//! from a JSON object of objects, or from ontology path lengths. Asymmetric
//! tables are only answered in the stored direction.

use crate::common_io::{read_lines_of_words_delim, read_to_string};
use crate::error::LupinError;
use crate::ontology::OntologyGraph;
use fnv::FnvHashMap as HashMap;
use log::info;

#[derive(Debug, Clone, Default)]
pub struct DistanceTable {
    entries: HashMap<(Box<str>, Box<str>), f32>,
    asymmetric: bool,
}

impl DistanceTable {
    pub fn new(asymmetric: bool) -> Self {
        Self {
            entries: HashMap::default(),
            asymmetric,
        }
    }

    pub fn is_asymmetric(&self) -> bool {
        self.asymmetric
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, a: &str, b: &str, d: f32) {
        self.entries.insert((a.into(), b.into()), d);
    }

    ///
    /// Raw distance from `a` to `b`.
    ///
    /// A symmetric table falls back to the `(b, a)` entry; identical
    /// types are at distance 0 unless stored otherwise.
    ///
    pub fn get(&self, a: &str, b: &str) -> anyhow::Result<f32> {
        let key = (Box::<str>::from(a), Box::<str>::from(b));
        if let Some(&d) = self.entries.get(&key) {
            return Ok(d);
        }
        if !self.asymmetric {
            if let Some(&d) = self.entries.get(&(key.1.clone(), key.0.clone())) {
                return Ok(d);
            }
        }
        if a == b {
            return Ok(0.);
        }
        Err(LupinError::MissingDistance(key.0, key.1).into())
    }

    /// Read `.json` as `{"a": {"b": d}}`, anything else as `a b d` rows
    pub fn from_file(file_path: &str, asymmetric: bool) -> anyhow::Result<Self> {
        let ret = if file_path.ends_with(".json") || file_path.ends_with(".json.gz") {
            Self::from_json_file(file_path, asymmetric)?
        } else {
            Self::from_tsv_file(file_path, asymmetric)?
        };
        info!(
            "Loaded {} {} distances from {}",
            ret.len(),
            if asymmetric { "asymmetric" } else { "symmetric" },
            file_path
        );
        Ok(ret)
    }

    pub fn from_tsv_file(file_path: &str, asymmetric: bool) -> anyhow::Result<Self> {
        let mut ret = Self::new(asymmetric);
        // cell type names may hold spaces
        for words in read_lines_of_words_delim(file_path, &['\t', ','])? {
            let words: Vec<&str> = words
                .iter()
                .map(|w| w.trim())
                .filter(|w| !w.is_empty())
                .collect();
            if words.len() != 3 {
                return Err(LupinError::DistanceTableFormat(format!(
                    "{}: expected 3 columns, found {}",
                    file_path,
                    words.len()
                ))
                .into());
            }
            let d: f32 = words[2].parse().map_err(|_| {
                LupinError::DistanceTableFormat(format!(
                    "{}: cannot parse distance {}",
                    file_path, words[2]
                ))
            })?;
            ret.insert(words[0], words[1], d);
        }
        Ok(ret)
    }

    pub fn from_json_file(file_path: &str, asymmetric: bool) -> anyhow::Result<Self> {
        let text = read_to_string(file_path)?;
        Self::from_json_str(&text, asymmetric)
    }

    pub fn from_json_str(text: &str, asymmetric: bool) -> anyhow::Result<Self> {
        let nested: HashMap<Box<str>, HashMap<Box<str>, f32>> = serde_json::from_str(text)
            .map_err(|e| LupinError::DistanceTableFormat(e.to_string()))?;
        let mut ret = Self::new(asymmetric);
        for (a, row) in nested {
            for (b, d) in row {
                ret.entries.insert((a.clone(), b), d);
            }
        }
        Ok(ret)
    }

    ///
    /// Path lengths between every pair of `terms`; disconnected pairs
    /// (or pairs beyond the graph's maximum path length) are `+inf`.
    ///
    pub fn from_ontology(graph: &OntologyGraph, terms: &[Box<str>]) -> anyhow::Result<Self> {
        let idx = terms
            .iter()
            .map(|t| graph.require(t))
            .collect::<anyhow::Result<Vec<usize>>>()?;

        let mut ret = Self::new(false);
        for (x, &i) in idx.iter().enumerate() {
            for (y, &j) in idx.iter().enumerate().skip(x) {
                let d = graph
                    .path_length_by_index(i, j)
                    .map(|d| d as f32)
                    .unwrap_or(f32::INFINITY);
                ret.insert(&terms[x], &terms[y], d);
            }
        }
        Ok(ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symmetric_lookup_uses_either_direction() -> anyhow::Result<()> {
        let mut t = DistanceTable::new(false);
        t.insert("T cell", "B cell", 3.);
        assert_eq!(t.get("B cell", "T cell")?, 3.);
        assert_eq!(t.get("B cell", "B cell")?, 0.);
        Ok(())
    }

    #[test]
    fn asymmetric_lookup_keeps_direction() -> anyhow::Result<()> {
        let t = DistanceTable::from_json_str(r#"{"a": {"b": 0.25}, "b": {"a": 0.75}}"#, true)?;
        assert_eq!(t.get("a", "b")?, 0.25);
        assert_eq!(t.get("b", "a")?, 0.75);

        let t = DistanceTable::from_json_str(r#"{"a": {"b": 0.25}}"#, true)?;
        let err = t.get("b", "a").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LupinError>(),
            Some(LupinError::MissingDistance(_, _))
        ));
        Ok(())
    }
}
