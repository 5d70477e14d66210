//! # Remote File Index
//!
//! In-memory result of enumerating the remote catalog for one folder.
//!
//! The source of truth is `token -> [FileRef]`, kept in the
//! order tokens were first seen. A second map, the duplicate index, groups
//! occurrences by normalized name and token so name collisions can be shown
//! to the operator before a sync overwrites anything.
//!
//! The flattened and deduplicated file lists are derived views. Every
//! mutation sets a dirty flag and the views are rebuilt on the next read.

use crate::types::{normalize_name, ContentToken, FileRef};
use bridge_traits::catalog::FileOccurrence;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Tokens that share one normalized name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateName {
    /// Display name of the first occurrence
    pub name: String,
    /// Each token with every place it was found
    pub tokens: Vec<(ContentToken, Vec<FileOccurrence>)>,
}

#[derive(Debug, Default)]
struct NameEntry {
    display: String,
    tokens: Vec<(ContentToken, Vec<FileOccurrence>)>,
}

#[derive(Debug, Default)]
pub struct RemoteFileIndex {
    token_order: Vec<ContentToken>,
    by_token: HashMap<ContentToken, Vec<FileRef>>,
    by_name: BTreeMap<String, NameEntry>,

    dirty: bool,
    all_files: Vec<FileRef>,
    unique_files: Vec<FileRef>,
}

impl RemoteFileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one file value found in the catalog
    pub fn add(&mut self, file: FileRef, occurrence: FileOccurrence) {
        let entry = self
            .by_name
            .entry(file.name.normalized().to_string())
            .or_insert_with(|| NameEntry {
                display: file.name.as_str().to_string(),
                tokens: Vec::new(),
            });
        match entry.tokens.iter_mut().find(|(token, _)| *token == file.token) {
            Some((_, occurrences)) => occurrences.push(occurrence),
            None => entry.tokens.push((file.token.clone(), vec![occurrence])),
        }

        if !self.by_token.contains_key(&file.token) {
            self.token_order.push(file.token.clone());
        }
        self.by_token
            .entry(file.token.clone())
            .or_default()
            .push(file);

        self.dirty = true;
    }

    /// Every file value, grouped by token in first-seen order
    pub fn all_files(&mut self) -> &[FileRef] {
        self.refresh();
        &self.all_files
    }

    /// One file per distinct (name, token) pair; the first occurrence wins
    pub fn unique_files(&mut self) -> &[FileRef] {
        self.refresh();
        &self.unique_files
    }

    /// Names that map to more than one token, sorted by normalized name
    pub fn duplicates(&self) -> Vec<DuplicateName> {
        self.by_name
            .values()
            .filter(|entry| entry.tokens.len() > 1)
            .map(|entry| DuplicateName {
                name: entry.display.clone(),
                tokens: entry.tokens.clone(),
            })
            .collect()
    }

    pub fn has_duplicates(&self) -> bool {
        self.by_name.values().any(|entry| entry.tokens.len() > 1)
    }

    /// Forget name collisions after the operator accepted them
    ///
    /// The files themselves stay indexed.
    pub fn clear_duplicates(&mut self) {
        self.by_name.clear();
    }

    pub fn token_count(&self) -> usize {
        self.token_order.len()
    }

    fn refresh(&mut self) {
        if !self.dirty {
            return;
        }

        self.all_files = self
            .token_order
            .iter()
            .filter_map(|token| self.by_token.get(token))
            .flat_map(|files| files.iter().cloned())
            .collect();

        let mut seen: HashSet<(String, ContentToken)> = HashSet::new();
        self.unique_files = self
            .all_files
            .iter()
            .filter(|file| seen.insert((normalize_name(file.name.as_str()), file.token.clone())))
            .cloned()
            .collect();

        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileName;

    fn file(token: &str, name: &str) -> FileRef {
        FileRef::new(
            format!("https://cdn.example.com/{}", token),
            ContentToken::new(token).unwrap(),
            FileName::new(name).unwrap(),
        )
    }

    fn occurrence(field: &str, thing: &str) -> FileOccurrence {
        FileOccurrence {
            resource_id: "albums".to_string(),
            field_name: field.to_string(),
            thing_id: thing.to_string(),
            thing_label: None,
            lang: None,
        }
    }

    #[test]
    fn test_unique_files_keep_first_occurrence_in_order() {
        let mut index = RemoteFileIndex::new();
        index.add(file("T1", "a.jpg"), occurrence("cover", "1"));
        index.add(file("T2", "b.jpg"), occurrence("cover", "2"));
        index.add(file("T1", "A.JPG"), occurrence("thumb", "3"));
        index.add(file("T1", "c.jpg"), occurrence("thumb", "4"));

        assert_eq!(index.all_files().len(), 4);

        let unique: Vec<&str> = index.unique_files().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(unique, vec!["a.jpg", "c.jpg", "b.jpg"]);
        assert_eq!(index.token_count(), 2);
    }

    #[test]
    fn test_views_are_recomputed_after_add() {
        let mut index = RemoteFileIndex::new();
        index.add(file("T1", "a.jpg"), occurrence("cover", "1"));
        assert_eq!(index.unique_files().len(), 1);

        index.add(file("T2", "b.jpg"), occurrence("cover", "2"));
        assert_eq!(index.unique_files().len(), 2);
        assert_eq!(index.all_files().len(), 2);
    }

    #[test]
    fn test_same_name_different_tokens_is_duplicate() {
        let mut index = RemoteFileIndex::new();
        index.add(file("T1", "a.jpg"), occurrence("cover", "1"));
        index.add(file("T2", "a.jpg"), occurrence("gallery", "2"));
        index.add(file("T3", "b.jpg"), occurrence("cover", "3"));
        index.add(file("T3", "b.jpg"), occurrence("gallery", "4"));

        let duplicates = index.duplicates();
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].name, "a.jpg");
        assert_eq!(duplicates[0].tokens.len(), 2);
        assert_eq!(duplicates[0].tokens[1].1[0].field_name, "gallery");

        index.clear_duplicates();
        assert!(!index.has_duplicates());
        assert_eq!(index.unique_files().len(), 3);
    }
}
