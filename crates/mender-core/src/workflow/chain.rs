//! Task chain validation.
//!
//! A creation request describes its tasks as a successor relation (`next_task`
//! by name). This module checks, once, that the relation is a single simple
//! path and returns the tasks in execution order so nothing downstream has to
//! re-derive the order.
//!
//! The successor graph is modelled with `petgraph`; `toposort` rejects cycles.

use std::collections::HashMap;

use mender_types::error::ValidationError;
use mender_types::workflow::{TaskSpec, TaskType};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

/// A validated chain: spec indices in execution order plus the parsed task
/// type of every spec (indexed like the input slice).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedChain {
    pub order: Vec<usize>,
    pub task_types: Vec<TaskType>,
}

/// Validate `specs` as a linear chain and compute its execution order.
///
/// Checks, in order: non-empty, names present and unique, known task types,
/// successors exist and are not self references, no task is the successor of
/// two tasks, no cycle, exactly one head.
pub fn build_chain(specs: &[TaskSpec]) -> Result<ValidatedChain, ValidationError> {
    if specs.is_empty() {
        return Err(ValidationError::NoTasks);
    }

    let mut name_to_idx: HashMap<&str, usize> = HashMap::with_capacity(specs.len());
    let mut task_types = Vec::with_capacity(specs.len());
    for (i, spec) in specs.iter().enumerate() {
        if spec.name.trim().is_empty() {
            return Err(ValidationError::EmptyTaskName(i));
        }
        if name_to_idx.insert(spec.name.as_str(), i).is_some() {
            return Err(ValidationError::DuplicateTaskName(spec.name.clone()));
        }
        let task_type = spec.task_type.parse::<TaskType>().map_err(|_| {
            ValidationError::UnknownTaskType {
                task: spec.name.clone(),
                task_type: spec.task_type.clone(),
            }
        })?;
        task_types.push(task_type);
    }

    let mut graph = DiGraph::<&str, ()>::new();
    let nodes: Vec<NodeIndex> = specs.iter().map(|s| graph.add_node(s.name.as_str())).collect();

    // successor index -> predecessor index
    let mut predecessor: HashMap<usize, usize> = HashMap::new();
    for (i, spec) in specs.iter().enumerate() {
        let Some(next) = spec.next_task.as_deref() else {
            continue;
        };
        if next == spec.name {
            return Err(ValidationError::SelfReference(spec.name.clone()));
        }
        let succ = *name_to_idx
            .get(next)
            .ok_or_else(|| ValidationError::UnknownSuccessor {
                task: spec.name.clone(),
                next: next.to_string(),
            })?;
        if let Some(&first) = predecessor.get(&succ) {
            return Err(ValidationError::SharedSuccessor {
                successor: next.to_string(),
                first: specs[first].name.clone(),
                second: spec.name.clone(),
            });
        }
        predecessor.insert(succ, i);
        graph.add_edge(nodes[i], nodes[succ], ());
    }

    toposort(&graph, None).map_err(|_| ValidationError::Cycle)?;

    let heads: Vec<NodeIndex> = graph
        .node_indices()
        .filter(|&n| graph.neighbors_directed(n, Direction::Incoming).next().is_none())
        .collect();
    let head = match heads.as_slice() {
        [] => return Err(ValidationError::Cycle),
        [only] => *only,
        many => {
            return Err(ValidationError::AmbiguousHead(
                many.iter().map(|&n| graph[n].to_string()).collect(),
            ));
        }
    };

    // In-degree and out-degree are both <= 1 and the graph is acyclic with a
    // single head, so walking successors from the head visits every node.
    let mut order = Vec::with_capacity(specs.len());
    let mut cursor = Some(head);
    while let Some(node) = cursor {
        order.push(node.index());
        cursor = graph.neighbors_directed(node, Direction::Outgoing).next();
    }
    if order.len() != specs.len() {
        return Err(ValidationError::Cycle);
    }

    Ok(ValidatedChain { order, task_types })
}
