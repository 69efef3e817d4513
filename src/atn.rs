/*!
Conversion of a parser call stack into a prediction context.

Only as much of the augmented transition network (ATN) is modelled as
the conversion needs: numbered states with outgoing transitions, where
a rule transition knows the state to return to once the invoked rule
completes.
*/
use petgraph::visit::EdgeRef as _;
use petgraph::{graph::NodeIndex, Graph};
use std::sync::Arc;
use tracing::debug;

use crate::context::{Context, PredictionContext};
use crate::error::{Error, Result};
use crate::StateId;

/// Grammar rule index.
pub type RuleId = usize;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct AtnState {
    pub rule: RuleId,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Transition {
    Epsilon,
    Atom(u16),
    /// Invocation of the rule whose start state is the edge target.
    Rule {
        follow_state: StateId,
    },
}

/// Augmented transition network.
///
/// State numbers are assigned consecutively from zero.
#[derive(Default, Debug)]
pub struct Atn {
    g: Graph<AtnState, Transition>,
}

impl Atn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_state(&mut self, rule: RuleId) -> StateId {
        self.g.add_node(AtnState { rule }).index()
    }

    /// Adds a transition between two existing states.
    pub fn add_transition(
        &mut self,
        from: StateId,
        to: StateId,
        transition: Transition,
    ) -> Result<()> {
        self.state(from)?;
        self.state(to)?;
        self.g.add_edge(NodeIndex::new(from), NodeIndex::new(to), transition);
        Ok(())
    }

    pub fn state(&self, state: StateId) -> Result<&AtnState> {
        self.g
            .node_weight(NodeIndex::new(state))
            .ok_or(Error::UnknownState(state))
    }

    /// Returns the outgoing transitions of `state` with their targets.
    pub fn transitions(
        &self,
        state: StateId,
    ) -> Result<impl Iterator<Item = (StateId, Transition)> + '_> {
        self.state(state)?;
        Ok(self
            .g
            .edges(NodeIndex::new(state))
            .map(|e| (e.target().index(), *e.weight())))
    }

    /// Returns the state to return to after the rule invoked from `state`.
    pub fn follow_state(&self, state: StateId) -> Result<StateId> {
        self.transitions(state)?
            .find_map(|(_, transition)| match transition {
                Transition::Rule { follow_state } => Some(follow_state),
                _ => None,
            })
            .ok_or(Error::MissingRuleTransition(state))
    }
}

/// One frame of the parser's rule invocation stack.
pub trait RuleContext {
    /// The invoking frame, or `None` for the outermost one.
    fn parent(&self) -> Option<&Self>;

    /// The ATN state holding the rule transition that created this frame.
    fn invoking_state(&self) -> Option<StateId>;
}

/// Call frame with a shared link to its caller.
#[derive(Clone, Debug)]
pub struct CallFrame {
    parent: Option<Arc<CallFrame>>,
    invoking_state: Option<StateId>,
}

impl CallFrame {
    /// The frame of the start rule.
    pub fn root() -> Arc<Self> {
        Arc::new(Self {
            parent: None,
            invoking_state: None,
        })
    }

    /// A frame for a rule invoked from `invoking_state` within `parent`.
    pub fn invoke(parent: &Arc<Self>, invoking_state: StateId) -> Arc<Self> {
        Arc::new(Self {
            parent: Some(parent.clone()),
            invoking_state: Some(invoking_state),
        })
    }
}

impl RuleContext for CallFrame {
    fn parent(&self) -> Option<&Self> {
        self.parent.as_deref()
    }

    fn invoking_state(&self) -> Option<StateId> {
        self.invoking_state
    }
}

/// Builds the prediction context of the call stack ending in `frame`.
///
/// The start rule's frame, or no frame at all, yields the Empty context.
pub fn from_call_stack<R: RuleContext + ?Sized>(atn: &Atn, frame: Option<&R>) -> Result<Context> {
    let mut follow_states = Vec::new();
    let mut frame = frame;
    while let Some(current) = frame {
        let Some(parent) = current.parent() else {
            break;
        };
        let invoking_state = current
            .invoking_state()
            .ok_or(Error::InvalidInvokingState)?;
        follow_states.push(atn.follow_state(invoking_state)?);
        frame = Some(parent);
    }
    debug!(depth = follow_states.len(), "prediction context from call stack");

    Ok(follow_states
        .into_iter()
        .rev()
        .fold(PredictionContext::empty(), PredictionContext::singleton))
}
