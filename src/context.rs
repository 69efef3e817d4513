/*!
Prediction context nodes.

A prediction context is an immutable node in a graph-structured stack
of rule return states. Parents are shared through [`Arc`] so that
many alternatives may point at the same suffix of a call stack.

The three node kinds:

* [`PredictionContext::Empty`], the bottom of every stack. Exactly one
  instance exists, see [`PredictionContext::empty`].
* [`PredictionContext::Singleton`], one return state over one parent.
* [`PredictionContext::Array`], at least two `(return state, parent)`
  pairs sorted by ascending return state. The slot holding
  [`EMPTY_RETURN_STATE`] (if any) is always the last one and is the
  only slot without a parent.
*/
use hashbrown::HashSet;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};
use std::{fmt, iter, ptr};

use crate::{StateId, EMPTY_RETURN_STATE};

/// Shared handle to a prediction context node.
pub type Context = Arc<PredictionContext>;

const EMPTY_HASH: u64 = 1;
const SINGLETON_TAG: u8 = 1;
const ARRAY_TAG: u8 = 2;

static EMPTY: OnceLock<Context> = OnceLock::new();

/// A node of the graph-structured stack.
pub enum PredictionContext {
    Empty,
    Singleton(SingletonContext),
    Array(ArrayContext),
}

pub struct SingletonContext {
    parent: Context,
    return_state: StateId,
    hash: u64,
}

pub struct ArrayContext {
    /// `None` only in the [`EMPTY_RETURN_STATE`] slot.
    parents: Box<[Option<Context>]>,
    return_states: Box<[StateId]>,
    hash: u64,
}

fn hash_entries<'a>(
    tag: u8,
    entries: impl IntoIterator<Item = (StateId, Option<&'a Context>)>,
) -> u64 {
    let mut h = FxHasher::default();
    tag.hash(&mut h);
    for (return_state, parent) in entries {
        return_state.hash(&mut h);
        parent.map_or(0, |p| p.hash_key()).hash(&mut h);
    }
    h.finish()
}

impl PredictionContext {
    /// Returns the process-wide Empty context.
    pub fn empty() -> Context {
        EMPTY
            .get_or_init(|| Arc::new(PredictionContext::Empty))
            .clone()
    }

    /// Creates a single frame returning to `return_state` on top of `parent`.
    ///
    /// The sentinel return state yields the Empty context.
    pub fn singleton(parent: Context, return_state: StateId) -> Context {
        if return_state == EMPTY_RETURN_STATE {
            debug_assert!(parent.is_empty(), "sentinel frame over {}", parent);
            return Self::empty();
        }
        let hash = hash_entries(SINGLETON_TAG, iter::once((return_state, Some(&parent))));
        Arc::new(PredictionContext::Singleton(SingletonContext {
            parent,
            return_state,
            hash,
        }))
    }

    /// Creates a node from one array slot.
    ///
    /// The parentless sentinel slot becomes the Empty context.
    pub(crate) fn from_entry(parent: Option<Context>, return_state: StateId) -> Context {
        match parent {
            Some(parent) => Self::singleton(parent, return_state),
            None => {
                debug_assert_eq!(return_state, EMPTY_RETURN_STATE, "parentless frame");
                Self::empty()
            }
        }
    }

    /// Creates a node from parallel return state and parent sequences.
    ///
    /// Return states must be strictly ascending and only the
    /// [`EMPTY_RETURN_STATE`] slot may lack a parent. A single entry
    /// yields a Singleton (or Empty) instead of an Array.
    pub fn array(return_states: Vec<StateId>, parents: Vec<Option<Context>>) -> Context {
        assert_eq!(return_states.len(), parents.len());
        debug_assert!(!return_states.is_empty(), "array context without entries");
        debug_assert!(
            return_states.windows(2).all(|w| w[0] < w[1]),
            "unsorted return states {:?}",
            return_states
        );
        debug_assert!(return_states
            .iter()
            .zip(&parents)
            .all(|(&rs, p)| p.is_some() || rs == EMPTY_RETURN_STATE));

        if return_states.len() == 1 {
            let parent = parents.into_iter().next().flatten();
            return Self::from_entry(parent, return_states[0]);
        }
        let hash = hash_entries(
            ARRAY_TAG,
            return_states.iter().copied().zip(parents.iter().map(Option::as_ref)),
        );
        Arc::new(PredictionContext::Array(ArrayContext {
            parents: parents.into_boxed_slice(),
            return_states: return_states.into_boxed_slice(),
            hash,
        }))
    }

    /// The structural hash key, computed at construction.
    ///
    /// Structurally equal contexts always have equal keys.
    pub fn hash_key(&self) -> u64 {
        match self {
            PredictionContext::Empty => EMPTY_HASH,
            PredictionContext::Singleton(s) => s.hash,
            PredictionContext::Array(a) => a.hash,
        }
    }

    /// Number of `(return state, parent)` pairs held by this node.
    ///
    /// The Empty context reports a single parentless sentinel pair.
    pub fn len(&self) -> usize {
        match self {
            PredictionContext::Empty | PredictionContext::Singleton(_) => 1,
            PredictionContext::Array(a) => a.return_states.len(),
        }
    }

    pub fn parent(&self, index: usize) -> Option<&Context> {
        match self {
            PredictionContext::Empty => None,
            PredictionContext::Singleton(s) => {
                debug_assert_eq!(index, 0);
                Some(&s.parent)
            }
            PredictionContext::Array(a) => a.parents[index].as_ref(),
        }
    }

    pub fn return_state(&self, index: usize) -> StateId {
        match self {
            PredictionContext::Empty => EMPTY_RETURN_STATE,
            PredictionContext::Singleton(s) => {
                debug_assert_eq!(index, 0);
                s.return_state
            }
            PredictionContext::Array(a) => a.return_states[index],
        }
    }

    /// Iterates over the `(return state, parent)` pairs of this node.
    pub fn entries(
        &self,
    ) -> impl DoubleEndedIterator<Item = (StateId, Option<&Context>)> + ExactSizeIterator + '_ {
        (0..self.len()).map(move |i| (self.return_state(i), self.parent(i)))
    }

    /// Returns whether this is the Empty context.
    pub fn is_empty(&self) -> bool {
        matches!(self, PredictionContext::Empty)
    }

    /// Returns whether some direct entry is the empty sentinel.
    pub fn has_empty_path(&self) -> bool {
        self.return_state(self.len() - 1) == EMPTY_RETURN_STATE
    }
}

impl SingletonContext {
    pub fn parent(&self) -> &Context {
        &self.parent
    }

    pub fn return_state(&self) -> StateId {
        self.return_state
    }
}

impl ArrayContext {
    pub fn parents(&self) -> &[Option<Context>] {
        &self.parents
    }

    pub fn return_states(&self) -> &[StateId] {
        &self.return_states
    }
}

impl PartialEq for PredictionContext {
    fn eq(&self, other: &Self) -> bool {
        if ptr::eq(self, other) {
            return true;
        }
        if self.hash_key() != other.hash_key() {
            return false;
        }
        structurally_equal(self, other, &mut HashSet::new())
    }
}

/// Deep comparison remembering the node pairs already found equal, so
/// that shared ancestors are compared once rather than once per path.
fn structurally_equal(
    a: &PredictionContext,
    b: &PredictionContext,
    equal: &mut HashSet<(*const PredictionContext, *const PredictionContext)>,
) -> bool {
    if ptr::eq(a, b) {
        return true;
    }
    if a.hash_key() != b.hash_key() {
        return false;
    }
    let pair = (a as *const _, b as *const _);
    if equal.contains(&pair) {
        return true;
    }
    let result = match (a, b) {
        (PredictionContext::Empty, PredictionContext::Empty) => true,
        (PredictionContext::Singleton(x), PredictionContext::Singleton(y)) => {
            x.return_state == y.return_state && structurally_equal(&x.parent, &y.parent, equal)
        }
        (PredictionContext::Array(x), PredictionContext::Array(y)) => {
            x.return_states == y.return_states
                && x.parents.iter().zip(y.parents.iter()).all(|(p, q)| match (p, q) {
                    (Some(p), Some(q)) => structurally_equal(p, q, equal),
                    (None, None) => true,
                    _ => false,
                })
        }
        _ => false,
    };
    if result {
        equal.insert(pair);
    }
    result
}

impl Eq for PredictionContext {}

/// Pointer check before falling back to a structural comparison.
pub(crate) fn same(a: &Context, b: &Context) -> bool {
    Arc::ptr_eq(a, b) || **a == **b
}

impl Hash for PredictionContext {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash_key());
    }
}

impl fmt::Display for PredictionContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fn write_state(f: &mut fmt::Formatter, return_state: StateId) -> fmt::Result {
            if return_state == EMPTY_RETURN_STATE {
                f.write_str("$")
            } else {
                write!(f, "{}", return_state)
            }
        }

        match self {
            PredictionContext::Empty => f.write_str("$"),
            PredictionContext::Singleton(s) => {
                write_state(f, s.return_state)?;
                write!(f, " {}", s.parent)
            }
            PredictionContext::Array(_) => {
                f.write_str("[")?;
                for (i, (return_state, parent)) in self.entries().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_state(f, return_state)?;
                    if let Some(parent) = parent {
                        write!(f, " {}", parent)?;
                    }
                }
                f.write_str("]")
            }
        }
    }
}

impl fmt::Debug for PredictionContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Identity key for a context node.
///
/// Holds on to the node so that its address cannot be reused while
/// the key is alive.
#[derive(Clone)]
pub(crate) struct ByAddress(pub Context);

impl PartialEq for ByAddress {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ByAddress {}

impl Hash for ByAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

/// Returns every distinct node reachable from `context`, including
/// itself, each once and in depth-first discovery order.
pub fn all_nodes(context: &Context) -> Vec<Context> {
    let mut visited = HashSet::new();
    let mut nodes = Vec::new();
    let mut stack = vec![context.clone()];
    while let Some(node) = stack.pop() {
        if !visited.insert(ByAddress(node.clone())) {
            continue;
        }
        stack.extend(node.entries().filter_map(|(_, p)| p.cloned()).rev());
        nodes.push(node);
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(parent: &Context, return_state: StateId) -> Context {
        PredictionContext::singleton(parent.clone(), return_state)
    }

    #[test]
    fn empty_is_unique() {
        let a = PredictionContext::empty();
        let b = PredictionContext::empty();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.is_empty());
        assert!(a.has_empty_path());
        assert_eq!(a.len(), 1);
        assert_eq!(a.parent(0), None);
        assert_eq!(a.return_state(0), EMPTY_RETURN_STATE);
    }

    #[test]
    fn sentinel_entry_is_empty() {
        let ctx = PredictionContext::from_entry(None, EMPTY_RETURN_STATE);
        assert!(Arc::ptr_eq(&ctx, &PredictionContext::empty()));
        let ctx = PredictionContext::array(vec![EMPTY_RETURN_STATE], vec![None]);
        assert!(ctx.is_empty());
    }

    #[test]
    fn sentinel_singleton_is_empty() {
        let empty = PredictionContext::empty();
        let ctx = s(&empty, EMPTY_RETURN_STATE);
        assert!(Arc::ptr_eq(&ctx, &empty));
        assert!(ctx.is_empty());
    }

    /// A chain of `[1 c, 2 c]` nodes, each slot sharing the node below.
    fn diamond(depth: usize) -> Context {
        (0..depth).fold(PredictionContext::empty(), |c, _| {
            PredictionContext::array(vec![1, 2], vec![Some(c.clone()), Some(c)])
        })
    }

    #[test]
    fn deep_shared_graphs_compare_equal() {
        let a = diamond(200);
        let b = diamond(200);
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a, b);
        let c = PredictionContext::array(vec![1, 2], vec![Some(diamond(199)), Some(diamond(198))]);
        assert_ne!(a, c);
    }

    #[test]
    fn singleton_equality_is_structural() {
        let empty = PredictionContext::empty();
        let a = s(&s(&empty, 1), 2);
        let b = s(&s(&empty, 1), 2);
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.hash_key(), b.hash_key());
        assert_eq!(a, b);
        assert_ne!(a, s(&s(&empty, 3), 2));
        assert_ne!(a, s(&s(&empty, 1), 4));
    }

    #[test]
    fn array_equality_is_structural() {
        let empty = PredictionContext::empty();
        let a = PredictionContext::array(vec![1, 2], vec![Some(s(&empty, 7)), Some(empty.clone())]);
        let b = PredictionContext::array(vec![1, 2], vec![Some(s(&empty, 7)), Some(empty.clone())]);
        assert_eq!(a, b);
        let c = PredictionContext::array(vec![1, 2], vec![Some(s(&empty, 8)), Some(empty)]);
        assert_ne!(a, c);
    }

    #[test]
    fn singleton_and_array_differ() {
        let empty = PredictionContext::empty();
        let single = s(&empty, 4);
        let array = PredictionContext::array(vec![4, EMPTY_RETURN_STATE], vec![Some(empty), None]);
        assert_ne!(single, array);
        assert!(array.has_empty_path());
        assert!(!array.is_empty());
        assert!(!single.has_empty_path());
    }

    #[test]
    fn display() {
        let empty = PredictionContext::empty();
        assert_eq!(empty.to_string(), "$");
        let a = s(&s(&empty, 1), 2);
        assert_eq!(a.to_string(), "2 1 $");
        let array = PredictionContext::array(
            vec![3, 9, EMPTY_RETURN_STATE],
            vec![Some(a), Some(empty), None],
        );
        assert_eq!(array.to_string(), "[3 2 1 $, 9 $, $]");
    }

    #[test]
    fn all_nodes_visits_shared_parents_once() {
        let empty = PredictionContext::empty();
        let shared = s(&empty, 1);
        let array = PredictionContext::array(
            vec![2, 3],
            vec![Some(s(&shared, 5)), Some(s(&shared, 6))],
        );
        let nodes = all_nodes(&array);
        // array, two singletons, shared, empty
        assert_eq!(nodes.len(), 5);
        assert!(Arc::ptr_eq(&nodes[0], &array));
        assert!(nodes.iter().filter(|n| n.is_empty()).count() == 1);
    }
}
