//! Explicit label vocabulary shared by the datasets of one task.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Bidirectional mapping between label strings and dense ids.
///
/// Ids are assigned in first-seen order. Build one vocabulary per task and
/// pass it to every split so train, dev and test share ids.
///
/// Serializes as the plain label list in id order; the lookup table is
/// rebuilt when it is read back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct LabelVocab {
    labels: Vec<String>,
    index: HashMap<String, u32>,
}

impl LabelVocab {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut vocab = Self::new();
        for label in labels {
            vocab.get_or_insert(label);
        }
        vocab
    }

    /// Returns the id of `label`, assigning the next id if it is new.
    pub fn get_or_insert(&mut self, label: impl Into<String>) -> u32 {
        let label = label.into();
        if let Some(&id) = self.index.get(&label) {
            return id;
        }
        let id = self.labels.len() as u32;
        self.index.insert(label.clone(), id);
        self.labels.push(label);
        id
    }

    pub fn id(&self, label: &str) -> Option<u32> {
        self.index.get(label).copied()
    }

    pub fn label(&self, id: u32) -> Option<&str> {
        self.labels.get(id as usize).map(String::as_str)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl From<Vec<String>> for LabelVocab {
    fn from(labels: Vec<String>) -> Self {
        Self::from_labels(labels)
    }
}

impl From<LabelVocab> for Vec<String> {
    fn from(vocab: LabelVocab) -> Self {
        vocab.labels
    }
}
