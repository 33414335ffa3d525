//! Task graph linearization using petgraph.
//!
//! A workspace's tasks and connections form a directed graph. Before anything
//! runs, the graph is flattened into layers:
//! - a task's layer is the length of its longest upstream chain, so every
//!   upstream dependency sits in a strictly earlier layer
//! - tasks within a layer keep their declaration order
//! - each task carries the ids whose results form its input context, in the
//!   order the connections were declared

use crate::definition::{Connection, TaskDefinition};
use crate::error::GraphError;
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use rootcause::Report;
use serde::Serialize;
use std::collections::HashMap;
use taskloom_core::TaskId;

/// A task scheduled into a layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedTask {
    /// The task to run.
    pub task_id: TaskId,
    /// Tasks whose results are joined into this task's context.
    pub upstream_ids: Vec<TaskId>,
}

/// Tasks that may run once every earlier layer has finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionLayer {
    /// Zero-based position of the layer.
    pub index: usize,
    /// Tasks in declaration order.
    pub tasks: Vec<PlannedTask>,
}

/// The linearized form of a task graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    layers: Vec<ExecutionLayer>,
}

impl ExecutionPlan {
    /// Returns the layers in execution order.
    #[must_use]
    pub fn layers(&self) -> &[ExecutionLayer] {
        &self.layers
    }

    /// Returns the number of layers.
    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Returns the number of scheduled tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.layers.iter().map(|layer| layer.tasks.len()).sum()
    }

    /// Returns true if nothing is scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Iterates over every planned task in execution order.
    pub fn tasks(&self) -> impl Iterator<Item = &PlannedTask> {
        self.layers.iter().flat_map(|layer| layer.tasks.iter())
    }

    /// Returns the task that runs last.
    #[must_use]
    pub fn final_task(&self) -> Option<&PlannedTask> {
        self.layers.last().and_then(|layer| layer.tasks.last())
    }
}

/// Linearizes tasks and connections into an execution plan.
///
/// Duplicate connections collapse to one.
///
/// # Errors
///
/// Returns an error if:
/// - Two tasks share an id
/// - A connection references an unknown task
/// - The connections contain a cycle (including a self-loop)
pub fn linearize(
    tasks: &[TaskDefinition],
    connections: &[Connection],
) -> Result<ExecutionPlan, Report<GraphError>> {
    let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(tasks.len(), connections.len());
    let mut index_of: HashMap<&TaskId, NodeIndex> = HashMap::with_capacity(tasks.len());

    for (position, task) in tasks.iter().enumerate() {
        let node = graph.add_node(position);
        if index_of.insert(&task.id, node).is_some() {
            return Err(GraphError::DuplicateTask {
                task_id: task.id.clone(),
            }
            .into());
        }
    }

    let mut upstream: Vec<Vec<TaskId>> = vec![Vec::new(); tasks.len()];
    for connection in connections {
        let from = *index_of
            .get(&connection.from_task_id)
            .ok_or_else(|| GraphError::UnknownTask {
                task_id: connection.from_task_id.clone(),
            })?;
        let to = *index_of
            .get(&connection.to_task_id)
            .ok_or_else(|| GraphError::UnknownTask {
                task_id: connection.to_task_id.clone(),
            })?;

        if from == to {
            return Err(GraphError::CycleDetected {
                task_id: connection.from_task_id.clone(),
            }
            .into());
        }

        let ids = &mut upstream[graph[to]];
        if ids.contains(&connection.from_task_id) {
            continue;
        }
        ids.push(connection.from_task_id.clone());
        graph.add_edge(from, to, ());
    }

    let order = toposort(&graph, None).map_err(|cycle| GraphError::CycleDetected {
        task_id: tasks[graph[cycle.node_id()]].id.clone(),
    })?;

    // Topological order guarantees every predecessor's depth is final.
    let mut depth = vec![0usize; tasks.len()];
    for node in order {
        depth[graph[node]] = graph
            .neighbors_directed(node, Direction::Incoming)
            .map(|predecessor| depth[graph[predecessor]] + 1)
            .max()
            .unwrap_or(0);
    }

    let layer_count = depth.iter().max().map_or(0, |deepest| deepest + 1);
    let mut layers: Vec<ExecutionLayer> = (0..layer_count)
        .map(|index| ExecutionLayer {
            index,
            tasks: Vec::new(),
        })
        .collect();

    for (position, task) in tasks.iter().enumerate() {
        layers[depth[position]].tasks.push(PlannedTask {
            task_id: task.id.clone(),
            upstream_ids: std::mem::take(&mut upstream[position]),
        });
    }

    Ok(ExecutionPlan { layers })
}
