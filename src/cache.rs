//! Hash-consing of prediction contexts.
use hashbrown::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::context::{ByAddress, Context, PredictionContext};

/// Table mapping each context to one canonical, shared instance.
///
/// Lookups go by structural hash key and fall back to a structural
/// comparison, so two equal contexts never occupy separate entries.
/// The Empty context is never stored.
///
/// Sharing a cache between threads needs external locking around both
/// [`ContextCache::get`] and [`ContextCache::add`].
#[derive(Default)]
pub struct ContextCache {
    contexts: HashSet<Context>,
}

impl ContextCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            contexts: HashSet::with_capacity(capacity),
        }
    }

    /// Adds a context, returning the canonical instance equal to it.
    ///
    /// The returned handle, not the argument, is to be used afterwards.
    pub fn add(&mut self, context: Context) -> Context {
        if context.is_empty() {
            return PredictionContext::empty();
        }
        let len = self.contexts.len();
        let canonical = self.contexts.get_or_insert(context).clone();
        if self.contexts.len() != len {
            debug!(hash = canonical.hash_key(), "cached prediction context");
        }
        canonical
    }

    /// Returns the canonical instance equal to `context`, if any.
    pub fn get(&self, context: &Context) -> Option<Context> {
        self.contexts.get(context).cloned()
    }

    /// Number of distinct contexts held.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn clear(&mut self) {
        self.contexts.clear();
    }

    /// Rewrites `context` so that it and all of its ancestors are
    /// instances held by this cache.
    ///
    /// `visited` remembers the result for every node seen, so that a
    /// node reachable along several paths is processed only once. It
    /// may be reused across calls against the same cache.
    pub fn canonicalize(&mut self, context: &Context, visited: &mut Visited) -> Context {
        if context.is_empty() {
            return context.clone();
        }
        if let Some(existing) = visited.0.get(&ByAddress(context.clone())) {
            return existing.clone();
        }
        if let Some(existing) = self.get(context) {
            visited.0.insert(ByAddress(context.clone()), existing.clone());
            return existing;
        }

        let mut parents: Option<Vec<Option<Context>>> = None;
        for (i, (_, parent)) in context.entries().enumerate() {
            let Some(parent) = parent else { continue };
            let updated = self.canonicalize(parent, visited);
            if !Arc::ptr_eq(&updated, parent) {
                parents.get_or_insert_with(|| {
                    context.entries().map(|(_, p)| p.cloned()).collect()
                })[i] = Some(updated);
            }
        }

        let Some(parents) = parents else {
            let canonical = self.add(context.clone());
            visited.0.insert(ByAddress(context.clone()), canonical.clone());
            return canonical;
        };

        let updated = match &**context {
            PredictionContext::Empty => unreachable!(),
            PredictionContext::Singleton(s) => {
                let parent = parents.into_iter().next().flatten();
                PredictionContext::from_entry(parent, s.return_state())
            }
            PredictionContext::Array(a) => {
                PredictionContext::array(a.return_states().to_vec(), parents)
            }
        };
        let canonical = self.add(updated.clone());
        trace!(hash = canonical.hash_key(), "rebuilt prediction context");
        visited.0.insert(ByAddress(updated), canonical.clone());
        visited.0.insert(ByAddress(context.clone()), canonical.clone());
        canonical
    }
}

/// Per-pass record of already canonicalized nodes, keyed by identity.
#[derive(Default)]
pub struct Visited(HashMap<ByAddress, Context>);

impl Visited {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}
