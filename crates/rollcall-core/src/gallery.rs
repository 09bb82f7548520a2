//! In-memory gallery of enrolled identities.

use crate::types::{FaceTemplate, GalleryEntry};
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("identity not enrolled: {0}")]
    NotFound(String),
}

/// At most one entry per identity name, in stable insertion order.
///
/// Matching iterates every entry; listing relies on the stable order.
/// The gallery is rebuilt wholesale by the training pipeline — on startup,
/// on explicit retrain, and on every enroll/delete at the service level —
/// and only replaced when the rebuild produced at least one entry.
#[derive(Debug, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enroll or replace. Re-enrolling a name swaps in the new template and
    /// timestamp without changing the entry's position.
    pub fn enroll(&mut self, name: &str, template: FaceTemplate, enrolled_at: DateTime<Utc>) {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => {
                entry.template = template;
                entry.enrolled_at = enrolled_at;
            }
            None => self.entries.push(GalleryEntry {
                name: name.to_string(),
                template,
                enrolled_at,
            }),
        }
    }

    pub fn remove(&mut self, name: &str) -> Result<(), GalleryError> {
        match self.entries.iter().position(|e| e.name == name) {
            Some(idx) => {
                self.entries.remove(idx);
                Ok(())
            }
            None => Err(GalleryError::NotFound(name.to_string())),
        }
    }

    pub fn get(&self, name: &str) -> Option<&GalleryEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
