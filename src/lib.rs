/*!
Prediction contexts for adaptive LL(*) parsing.

During prediction many alternatives are simulated side by side, each
with its own stack of rule return states. These stacks are stored as
one shared, hash-consed graph (a graph-structured stack) of
[`PredictionContext`] nodes and merged with [`merge`] whenever two
simulation paths meet.

```
use predctx::{merge, ContextCache, MergeCache, PredictionContext, Visited};

let empty = PredictionContext::empty();
let a = PredictionContext::singleton(empty.clone(), 3);
let b = PredictionContext::singleton(empty, 7);

let mut memo = MergeCache::new();
let merged = merge(&a, &b, false, &mut memo);
assert_eq!(merged.to_string(), "[3 $, 7 $]");

let mut cache = ContextCache::new();
let canonical = cache.canonicalize(&merged, &mut Visited::new());
assert_eq!(cache.len(), 1);
assert!(std::sync::Arc::ptr_eq(&canonical, &merged));
```
*/

pub mod atn;
mod cache;
mod context;
pub mod dot;
mod error;
mod merge;

pub use cache::{ContextCache, Visited};
pub use context::{all_nodes, ArrayContext, Context, PredictionContext, SingletonContext};
pub use error::{Error, Result};
pub use merge::{merge, MergeCache, MergeMemo};

/// ATN state number.
pub type StateId = usize;

/// Return state of the bottom of a stack, never a real call site.
///
/// Being the largest state number, it sorts after every other return
/// state.
pub const EMPTY_RETURN_STATE: StateId = StateId::MAX;
