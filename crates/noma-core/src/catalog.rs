//! Ordered class names and the persisted index-to-label mapping.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::persist::atomic_write_json;

/// File name of the mapping written at the end of training.
pub const CLASS_MAP_FILE: &str = "class_index_to_label.json";

/// Ordered class names. A class's position is its label id everywhere in
/// training, checkpoints and export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassCatalog {
    names: Vec<String>,
}

impl ClassCatalog {
    /// Build a catalog, rejecting empty lists and duplicate names.
    pub fn new(names: Vec<String>) -> Result<Self> {
        if names.is_empty() {
            return Err(Error::Config("class list is empty".into()));
        }
        for (i, name) in names.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(Error::Config(format!("class {i} has an empty name")));
            }
            if names[..i].contains(name) {
                return Err(Error::Config(format!("duplicate class name '{name}'")));
            }
        }
        Ok(Self { names })
    }

    /// Parse a comma-separated list, trimming entries and dropping empty ones.
    pub fn from_comma_list(list: &str) -> Result<Self> {
        let names = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Self::new(names)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn require_at_least(&self, min: usize) -> Result<()> {
        if self.len() < min {
            return Err(Error::Config(format!(
                "at least {min} classes are required, got {} ({})",
                self.len(),
                self.names.join(", ")
            )));
        }
        Ok(())
    }

    /// JSON array of the names, as embedded in exported metadata.
    pub fn to_json_list(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.names)?)
    }

    /// Write `{"0": name0, "1": name1, ...}` atomically, keys in index order.
    pub fn write_index_map(&self, path: &Path) -> Result<()> {
        atomic_write_json(path, &IndexMap(&self.names))
    }

    /// Read a mapping written by [`ClassCatalog::write_index_map`] and rebuild
    /// the ordered list by looking up `"0"`, `"1"`, ... in turn.
    pub fn read_index_map(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::class_map(path, format!("cannot read file: {e}")))?;
        let map: HashMap<String, String> = serde_json::from_str(&content)
            .map_err(|e| Error::class_map(path, format!("invalid JSON object: {e}")))?;

        let names = (0..map.len())
            .map(|i| {
                map.get(&i.to_string())
                    .cloned()
                    .ok_or_else(|| Error::class_map(path, format!("missing index \"{i}\"")))
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(names).map_err(|e| Error::class_map(path, e.to_string()))
    }
}

struct IndexMap<'a>(&'a [String]);

impl Serialize for IndexMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().enumerate().map(|(i, n)| (i.to_string(), n)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn catalog(names: &[&str]) -> ClassCatalog {
        ClassCatalog::new(names.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    #[test]
    fn test_index_map_roundtrip_preserves_order() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CLASS_MAP_FILE);
        let names: Vec<String> = (0..12).map(|i| format!("class_{i:02}")).collect();
        let original = ClassCatalog::new(names).unwrap();

        original.write_index_map(&path).unwrap();
        let restored = ClassCatalog::read_index_map(&path).unwrap();

        assert_eq!(restored, original);
    }

    #[test]
    fn test_index_map_keys_in_index_order() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CLASS_MAP_FILE);
        let names: Vec<String> = (0..11).map(|i| format!("c{i}")).collect();
        ClassCatalog::new(names).unwrap().write_index_map(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let pos_2 = text.find("\"2\"").unwrap();
        let pos_10 = text.find("\"10\"").unwrap();
        assert!(pos_2 < pos_10);
    }

    #[test]
    fn test_index_map_with_gap_is_malformed() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CLASS_MAP_FILE);
        fs::write(&path, r#"{"0": "normal", "2": "noma"}"#).unwrap();

        let err = ClassCatalog::read_index_map(&path).unwrap_err();
        assert!(matches!(err, Error::ClassMap { .. }));
    }

    #[test]
    fn test_index_map_not_an_object_is_malformed() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CLASS_MAP_FILE);
        fs::write(&path, r#"["normal", "noma"]"#).unwrap();

        assert!(matches!(
            ClassCatalog::read_index_map(&path),
            Err(Error::ClassMap { .. })
        ));
    }

    #[test]
    fn test_comma_list_parsing() {
        let parsed = ClassCatalog::from_comma_list(" normal, noma ,,").unwrap();
        assert_eq!(parsed, catalog(&["normal", "noma"]));

        let single = ClassCatalog::from_comma_list("a").unwrap();
        assert!(matches!(single.require_at_least(2), Err(Error::Config(_))));
        assert!(ClassCatalog::from_comma_list(" , ").is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        assert!(ClassCatalog::new(vec!["a".into(), "b".into(), "a".into()]).is_err());
    }

    #[test]
    fn test_json_list() {
        let json = catalog(&["normal", "noma"]).to_json_list().unwrap();
        assert_eq!(json, r#"["normal","noma"]"#);
    }
}
