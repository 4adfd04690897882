//! Labeled embedding set derived from the profile roster.
//!
//! The gallery is immutable once built. Any roster change produces a fresh
//! gallery that replaces the previous one wholesale.

use crate::types::{Embedding, Profile};
use std::sync::Arc;

/// All embeddings enrolled for one profile.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledEmbeddings {
    /// Profile id.
    pub label: String,
    pub embeddings: Vec<Embedding>,
}

/// Matchable profiles in roster order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    entries: Vec<LabeledEmbeddings>,
}

impl Gallery {
    /// Keep only profiles carrying a finite embedding of exactly `dim` values.
    pub fn from_profiles(profiles: &[Profile], dim: usize) -> Self {
        let mut entries = Vec::with_capacity(profiles.len());

        for profile in profiles {
            let Some(embedding) = profile.embedding() else {
                continue;
            };
            if !embedding.is_valid(dim) {
                tracing::warn!(
                    profile = %profile.id,
                    len = embedding.len(),
                    expected = dim,
                    "ignoring profile with unusable face descriptor"
                );
                continue;
            }
            entries.push(LabeledEmbeddings {
                label: profile.id.clone(),
                embeddings: vec![embedding],
            });
        }

        Self { entries }
    }

    pub fn entries(&self) -> &[LabeledEmbeddings] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Cached gallery plus a revision counter bumped on every rebuild.
#[derive(Debug)]
pub struct EmbeddingStore {
    gallery: Arc<Gallery>,
    revision: u64,
    dim: usize,
}

impl EmbeddingStore {
    pub fn new(dim: usize) -> Self {
        Self {
            gallery: Arc::new(Gallery::default()),
            revision: 0,
            dim,
        }
    }

    /// Replace the cached gallery with one built from `profiles`.
    pub fn rebuild(&mut self, profiles: &[Profile]) -> Arc<Gallery> {
        let gallery = Arc::new(Gallery::from_profiles(profiles, self.dim));
        self.revision += 1;
        tracing::info!(
            revision = self.revision,
            profiles = profiles.len(),
            matchable = gallery.len(),
            "rebuilt embedding gallery"
        );
        self.gallery = Arc::clone(&gallery);
        gallery
    }

    /// Shared handle to the current gallery.
    pub fn gallery(&self) -> Arc<Gallery> {
        Arc::clone(&self.gallery)
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}
