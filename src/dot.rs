//! Graphviz export of prediction context graphs.
use hashbrown::HashMap;
use petgraph::dot::Dot;
use petgraph::Graph;

use crate::context::{all_nodes, ByAddress, Context, PredictionContext};
use crate::EMPTY_RETURN_STATE;

fn state_label(return_state: usize) -> String {
    if return_state == EMPTY_RETURN_STATE {
        "$".to_owned()
    } else {
        return_state.to_string()
    }
}

fn node_label(context: &PredictionContext) -> String {
    match context {
        PredictionContext::Empty => "$".to_owned(),
        PredictionContext::Singleton(s) => state_label(s.return_state()),
        PredictionContext::Array(a) => {
            let states: Vec<_> = a.return_states().iter().map(|&s| state_label(s)).collect();
            format!("[{}]", states.join(", "))
        }
    }
}

/// Copies the context graph into a [`Graph`], one node per distinct
/// context node.
///
/// Nodes are labelled with their return states and edges point from a
/// node to its parents, labelled with the slot index. The node at index
/// zero is `context` itself.
pub fn to_graph(context: &Context) -> Graph<String, String> {
    let nodes = all_nodes(context);
    let mut g = Graph::with_capacity(nodes.len(), nodes.len());
    let indices: HashMap<_, _> = nodes
        .iter()
        .map(|node| (ByAddress(node.clone()), g.add_node(node_label(node))))
        .collect();

    for node in &nodes {
        let from = indices[&ByAddress(node.clone())];
        for (i, (_, parent)) in node.entries().enumerate() {
            if let Some(parent) = parent {
                let label = if node.len() > 1 { i.to_string() } else { String::new() };
                g.add_edge(from, indices[&ByAddress(parent.clone())], label);
            }
        }
    }
    g
}

/// Renders the context graph in the DOT language.
pub fn to_dot(context: &Context) -> String {
    format!("{}", Dot::new(&to_graph(context)))
}
