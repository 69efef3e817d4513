use predctx::{
    all_nodes, merge, Context, ContextCache, MergeCache, PredictionContext, StateId, Visited,
    EMPTY_RETURN_STATE,
};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

/// Stacks are listed bottom first.
fn chain(stack: &[StateId]) -> Context {
    stack
        .iter()
        .fold(PredictionContext::empty(), |parent, &s| {
            PredictionContext::singleton(parent, s)
        })
}

fn build(stacks: &[Vec<StateId>], root_is_wildcard: bool) -> Context {
    stacks
        .iter()
        .map(|s| chain(s))
        .reduce(|a, b| merge(&a, &b, root_is_wildcard, &mut ()))
        .unwrap_or_else(PredictionContext::empty)
}

/// Every stack represented by `context`, bottom first.
fn stacks_of(context: &Context) -> BTreeSet<Vec<StateId>> {
    let mut stacks = BTreeSet::new();
    for (return_state, parent) in context.entries() {
        match parent {
            Some(parent) if return_state != EMPTY_RETURN_STATE => {
                for mut stack in stacks_of(parent) {
                    stack.push(return_state);
                    stacks.insert(stack);
                }
            }
            _ => {
                stacks.insert(Vec::new());
            }
        }
    }
    stacks
}

fn assert_well_formed(context: &Context) {
    for node in all_nodes(context) {
        if let PredictionContext::Array(a) = &*node {
            assert!(a.return_states().len() >= 2);
            assert!(a.return_states().windows(2).all(|w| w[0] < w[1]));
            for (&s, p) in a.return_states().iter().zip(a.parents()) {
                assert_eq!(p.is_none(), s == EMPTY_RETURN_STATE);
            }
        }
    }
}

fn stacks() -> impl Strategy<Value = Vec<Vec<StateId>>> {
    prop::collection::vec(prop::collection::vec(0usize..6, 0..4), 1..5)
}

proptest! {
    #[test]
    fn merge_is_idempotent(xs in stacks(), wildcard in any::<bool>()) {
        let x = build(&xs, wildcard);
        prop_assert!(Arc::ptr_eq(&merge(&x, &x, wildcard, &mut ()), &x));
    }

    #[test]
    fn merge_is_commutative(xs in stacks(), ys in stacks(), wildcard in any::<bool>()) {
        let x = build(&xs, wildcard);
        let y = build(&ys, wildcard);
        let xy = merge(&x, &y, wildcard, &mut ());
        let yx = merge(&y, &x, wildcard, &mut ());
        prop_assert_eq!(&xy, &yx);
        assert_well_formed(&xy);
    }

    #[test]
    fn full_merge_is_union(xs in stacks(), ys in stacks()) {
        let x = build(&xs, false);
        let y = build(&ys, false);
        let merged = merge(&x, &y, false, &mut ());
        let expected: BTreeSet<_> = xs.iter().chain(&ys).cloned().collect();
        let union: BTreeSet<_> = stacks_of(&x).union(&stacks_of(&y)).cloned().collect();
        prop_assert_eq!(union, expected.clone());
        prop_assert_eq!(stacks_of(&merged), expected);
    }

    #[test]
    fn memoized_merge_agrees(xs in stacks(), ys in stacks(), wildcard in any::<bool>()) {
        let x = build(&xs, wildcard);
        let y = build(&ys, wildcard);
        let mut memo = MergeCache::new();
        let first = merge(&x, &y, wildcard, &mut memo);
        prop_assert_eq!(&first, &merge(&x, &y, wildcard, &mut ()));
        prop_assert!(Arc::ptr_eq(&first, &merge(&y, &x, wildcard, &mut memo)));
    }

    #[test]
    fn local_wildcard_absorbs(xs in stacks()) {
        let x = build(&xs, true);
        let empty = PredictionContext::empty();
        prop_assert!(merge(&empty, &x, true, &mut ()).is_empty());
        prop_assert!(merge(&x, &empty, true, &mut ()).is_empty());
    }

    #[test]
    fn full_context_keeps_bottom(xs in stacks()) {
        let x = build(&xs, false);
        let empty = PredictionContext::empty();
        let merged = merge(&empty, &x, false, &mut ());
        prop_assert!(merged.has_empty_path());
        let mut expected = stacks_of(&x);
        expected.insert(Vec::new());
        prop_assert_eq!(stacks_of(&merged), expected);
    }

    #[test]
    fn canonicalization_is_stable(xs in stacks(), wildcard in any::<bool>()) {
        let mut cache = ContextCache::new();
        let first = cache.canonicalize(&build(&xs, wildcard), &mut Visited::new());
        let len = cache.len();
        prop_assert!(Arc::ptr_eq(&first, &cache.canonicalize(&first, &mut Visited::new())));
        let second = cache.canonicalize(&build(&xs, wildcard), &mut Visited::new());
        prop_assert!(Arc::ptr_eq(&first, &second));
        prop_assert_eq!(cache.len(), len);
        for node in all_nodes(&first).iter().filter(|n| !n.is_empty()) {
            prop_assert!(Arc::ptr_eq(&cache.get(node).unwrap(), node));
        }
    }

    #[test]
    fn hash_consing_is_unique(xs in stacks()) {
        let a = build(&xs, false);
        let b = build(&xs, false);
        prop_assert_eq!(a.hash_key(), b.hash_key());
        let mut cache = ContextCache::new();
        let first = cache.add(a.clone());
        let second = cache.add(b.clone());
        prop_assert!(Arc::ptr_eq(&first, &second));
        if a.is_empty() {
            prop_assert!(cache.is_empty());
        } else {
            prop_assert!(Arc::ptr_eq(&cache.get(&b).unwrap(), &first));
            prop_assert_eq!(cache.len(), 1);
        }
    }
}

#[test]
fn shared_cache_behind_a_lock() {
    let cache = Arc::new(Mutex::new(ContextCache::new()));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                let ctx = build(&[vec![1, 2], vec![3]], false);
                cache.lock().unwrap().add(ctx)
            })
        })
        .collect();
    let contexts: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(contexts.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(cache.lock().unwrap().len(), 1);
}
