/*!
Merging of prediction contexts.

Two merge semantics are supported, selected by `root_is_wildcard`:

* Local context (`true`): the Empty context stands for "any stack", so
  `$ + x = $`.
* Full context (`false`): the Empty context is a concrete stack bottom
  that has to be kept next to other alternatives, so `$ + x = [x, $]`.

Results are memoized in a [`MergeMemo`] keyed by the ordered pair of
operands.
*/
use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::trace;

use crate::context::{same, Context, PredictionContext, SingletonContext};
use crate::{StateId, EMPTY_RETURN_STATE};

/// Table of previously computed merges.
///
/// Keys are taken in the exact order given; [`merge`] itself probes
/// both orders.
pub trait MergeMemo {
    fn get(&self, a: &Context, b: &Context) -> Option<Context>;

    fn set(&mut self, a: &Context, b: &Context, merged: Context);
}

/// No memoization.
impl MergeMemo for () {
    fn get(&self, _a: &Context, _b: &Context) -> Option<Context> {
        None
    }

    fn set(&mut self, _a: &Context, _b: &Context, _merged: Context) {}
}

/// Merge memo table keyed by structural identity of the operands.
#[derive(Default)]
pub struct MergeCache {
    map: HashMap<(Context, Context), Context>,
}

impl MergeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            map: HashMap::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

impl MergeMemo for MergeCache {
    fn get(&self, a: &Context, b: &Context) -> Option<Context> {
        self.map.get(&(a.clone(), b.clone())).cloned()
    }

    fn set(&mut self, a: &Context, b: &Context, merged: Context) {
        self.map.insert((a.clone(), b.clone()), merged);
    }
}

fn lookup<M: MergeMemo + ?Sized>(memo: &M, a: &Context, b: &Context) -> Option<Context> {
    let previous = memo.get(a, b).or_else(|| memo.get(b, a));
    if previous.is_some() {
        trace!(a = a.hash_key(), b = b.hash_key(), "merge memo hit");
    }
    previous
}

/// Merges two prediction contexts into one.
///
/// The result may be one of the operands, or a node sharing their
/// ancestry. Structurally, `merge(a, b)` equals `merge(b, a)`.
pub fn merge<M: MergeMemo + ?Sized>(
    a: &Context,
    b: &Context,
    root_is_wildcard: bool,
    memo: &mut M,
) -> Context {
    if Arc::ptr_eq(a, b) {
        return a.clone();
    }

    use PredictionContext::{Array, Empty, Singleton};
    match (&**a, &**b) {
        (Empty | Singleton(_), Empty | Singleton(_)) => {
            merge_singletons(a, b, root_is_wildcard, memo)
        }
        _ => {
            if root_is_wildcard {
                // $ is a superset of any stack
                if a.is_empty() {
                    return a.clone();
                }
                if b.is_empty() {
                    return b.clone();
                }
            }
            debug_assert!(matches!(**a, Array(_)) || matches!(**b, Array(_)));
            merge_arrays(a, b, root_is_wildcard, memo)
        }
    }
}

/// Merges two single-frame contexts, either of which may be Empty.
fn merge_singletons<M: MergeMemo + ?Sized>(
    a: &Context,
    b: &Context,
    root_is_wildcard: bool,
    memo: &mut M,
) -> Context {
    if let Some(previous) = lookup(memo, a, b) {
        return previous;
    }

    let merged = match (&**a, &**b) {
        (PredictionContext::Singleton(x), PredictionContext::Singleton(y)) => {
            merge_frames((a, x), (b, y), root_is_wildcard, memo)
        }
        _ => merge_root(a, b, root_is_wildcard),
    };
    memo.set(a, b, merged.clone());
    merged
}

/// Merges two frames when at least one of them is the Empty context.
fn merge_root(a: &Context, b: &Context, root_is_wildcard: bool) -> Context {
    trace!(root_is_wildcard, "root merge");
    let empty = PredictionContext::empty();
    if root_is_wildcard {
        return empty;
    }
    match (a.is_empty(), b.is_empty()) {
        (true, true) => empty,
        // $ + x = [x, $]
        (true, false) => with_empty_slot(b),
        (false, true) => with_empty_slot(a),
        (false, false) => unreachable!("root merge of two non-empty frames"),
    }
}

/// Builds the two-entry array holding `x`'s frame and the sentinel slot.
fn with_empty_slot(x: &Context) -> Context {
    PredictionContext::array(
        vec![x.return_state(0), EMPTY_RETURN_STATE],
        vec![x.parent(0).cloned(), None],
    )
}

fn merge_frames<M: MergeMemo + ?Sized>(
    (a, x): (&Context, &SingletonContext),
    (b, y): (&Context, &SingletonContext),
    root_is_wildcard: bool,
    memo: &mut M,
) -> Context {
    if x.return_state() == y.return_state() {
        // ax + bx = ax, if a = b; otherwise ax + ay = a'[x, y]
        let parent = merge(x.parent(), y.parent(), root_is_wildcard, memo);
        if same(&parent, x.parent()) {
            return a.clone();
        }
        if same(&parent, y.parent()) {
            return b.clone();
        }
        return PredictionContext::singleton(parent, x.return_state());
    }

    // Different stack tops: [a, b]x when the parent is shared, else [ax, by]
    let (lo, hi) = if x.return_state() < y.return_state() {
        (x, y)
    } else {
        (y, x)
    };
    PredictionContext::array(
        vec![lo.return_state(), hi.return_state()],
        vec![Some(lo.parent().clone()), Some(hi.parent().clone())],
    )
}

/// Merges two contexts entry by entry, treating Singleton and Empty
/// operands as one-entry arrays.
fn merge_arrays<M: MergeMemo + ?Sized>(
    a: &Context,
    b: &Context,
    root_is_wildcard: bool,
    memo: &mut M,
) -> Context {
    if let Some(previous) = lookup(memo, a, b) {
        return previous;
    }

    let capacity = a.len() + b.len();
    let mut return_states = SmallVec::<[StateId; 8]>::with_capacity(capacity);
    let mut parents = SmallVec::<[Option<Context>; 8]>::with_capacity(capacity);

    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        let (a_state, a_parent) = (a.return_state(i), a.parent(i));
        let (b_state, b_parent) = (b.return_state(j), b.parent(j));
        match a_state.cmp(&b_state) {
            Ordering::Equal => {
                // Same stack top: $ + $ = $ and ax + ax = ax, else merge parents
                let parent = match (a_parent, b_parent) {
                    (Some(x), Some(y)) if !Arc::ptr_eq(x, y) => {
                        Some(merge(x, y, root_is_wildcard, memo))
                    }
                    _ => a_parent.or(b_parent).cloned(),
                };
                return_states.push(a_state);
                parents.push(parent);
                i += 1;
                j += 1;
            }
            Ordering::Less => {
                return_states.push(a_state);
                parents.push(a_parent.cloned());
                i += 1;
            }
            Ordering::Greater => {
                return_states.push(b_state);
                parents.push(b_parent.cloned());
                j += 1;
            }
        }
    }
    for (state, parent) in a.entries().skip(i).chain(b.entries().skip(j)) {
        return_states.push(state);
        parents.push(parent.cloned());
    }

    let merged = if return_states.len() == 1 {
        PredictionContext::from_entry(parents.pop().flatten(), return_states[0])
    } else {
        combine_common_parents(&mut parents);
        let merged = PredictionContext::array(return_states.into_vec(), parents.into_vec());
        if *merged == **a {
            a.clone()
        } else if *merged == **b {
            b.clone()
        } else {
            merged
        }
    };
    trace!(
        a = a.hash_key(),
        b = b.hash_key(),
        len = merged.len(),
        "array merge"
    );
    memo.set(a, b, merged.clone());
    merged
}

/// Makes structurally equal parents share a single node.
fn combine_common_parents(parents: &mut [Option<Context>]) {
    let mut unique = HashSet::with_capacity(parents.len());
    for parent in parents.iter_mut().flatten() {
        *parent = unique.get_or_insert(parent.clone()).clone();
    }
}
