//! Join-graph projection of a model, for diagnostics.
//!
//! Sources become nodes and join fields become directed edges. The
//! projection is rebuilt on demand; the store itself never depends on it.
//! Cycles here are expected and legal; this view only reports them.

use petgraph::algo::{is_cyclic_directed, tarjan_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;

use super::store::ModelStore;
use super::types::{Cardinality, FieldId, SourceId};

/// Edge weight: the join field that created the edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinEdge {
    pub field: FieldId,
    pub name: String,
    pub cardinality: Cardinality,
}

/// A join whose target source is not (yet) defined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingJoin {
    pub owner: String,
    pub field: String,
    pub target: String,
}

/// Directed graph of sources connected by join fields.
#[derive(Debug, Clone)]
pub struct JoinGraph {
    graph: DiGraph<String, JoinEdge>,
    node_index: HashMap<SourceId, NodeIndex>,
    dangling: Vec<DanglingJoin>,
}

impl JoinGraph {
    /// Project the current state of `store`.
    pub fn from_store(store: &ModelStore) -> Self {
        let mut graph = DiGraph::new();
        let mut node_index = HashMap::new();

        for source in store.sources() {
            let idx = graph.add_node(source.name.clone());
            node_index.insert(source.id, idx);
        }

        let mut dangling = Vec::new();
        for field in store.join_fields() {
            let Some(join) = field.join() else { continue };
            let from = node_index[&field.owner];
            match store.source_id(&join.target) {
                Some(target) => {
                    graph.add_edge(
                        from,
                        node_index[&target],
                        JoinEdge {
                            field: field.id,
                            name: field.name.clone(),
                            cardinality: join.cardinality,
                        },
                    );
                }
                None => dangling.push(DanglingJoin {
                    owner: store.source(field.owner).name.clone(),
                    field: field.name.clone(),
                    target: join.target.clone(),
                }),
            }
        }

        Self {
            graph,
            node_index,
            dangling,
        }
    }

    pub fn graph(&self) -> &DiGraph<String, JoinEdge> {
        &self.graph
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_cyclic(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// Groups of sources that can reach each other through joins.
    ///
    /// Only groups that actually contain a cycle are returned: components
    /// with more than one source, or a single source joined to itself.
    /// Names within a group and the groups themselves are sorted.
    pub fn cycle_groups(&self) -> Vec<Vec<String>> {
        let mut groups: Vec<Vec<String>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || self.graph.find_edge(component[0], component[0]).is_some()
            })
            .map(|component| {
                let mut names: Vec<String> =
                    component.iter().map(|idx| self.graph[*idx].clone()).collect();
                names.sort();
                names
            })
            .collect();
        groups.sort();
        groups
    }

    /// Joins whose targets are missing from the store.
    pub fn dangling(&self) -> &[DanglingJoin] {
        &self.dangling
    }

    /// Outgoing joins of a source as `(field name, target name)` pairs.
    pub fn joins_from(&self, source: SourceId) -> Vec<(String, String)> {
        let Some(idx) = self.node_index.get(&source) else {
            return Vec::new();
        };
        let mut edges: Vec<_> = self
            .graph
            .edges(*idx)
            .map(|edge| {
                let weight = edge.weight();
                (weight.field, weight.name.clone(), self.graph[edge.target()].clone())
            })
            .collect();
        edges.sort_by_key(|(field, _, _)| *field);
        edges.into_iter().map(|(_, name, target)| (name, target)).collect()
    }
}
