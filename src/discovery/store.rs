use std::sync::Arc;

use super::candidate::{AuthContext, Candidate};

/// Ordered, URL-unique collection of candidates for one discovery run.
///
/// Lookups are a linear scan; a session rarely sees more than a few dozen
/// media responses.
#[derive(Debug, Default)]
pub struct CandidateStore {
    items: Vec<Candidate>,
}

impl CandidateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `candidate` unless one with the same URL is already stored.
    /// Returns whether it was added.
    pub fn add(&mut self, candidate: Candidate) -> bool {
        if self.contains(&candidate.url) {
            return false;
        }
        self.items.push(candidate);
        true
    }

    pub fn contains(&self, url: &str) -> bool {
        self.items.iter().any(|c| c.url == url)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Candidates in discovery order
    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.items.iter()
    }

    pub fn attach_auth(&mut self, auth: Arc<AuthContext>) {
        for candidate in &mut self.items {
            candidate.auth = Some(Arc::clone(&auth));
        }
    }

    /// Largest first; equal sizes keep discovery order, unknown sizes go last.
    pub fn rank(self) -> Vec<Candidate> {
        let mut ranked = self.items;
        // sort_by is stable
        ranked.sort_by(|a, b| b.rank_size().cmp(&a.rank_size()));
        ranked
    }
}
