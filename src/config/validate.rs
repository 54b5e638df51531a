// src/config/validate.rs

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::errors::{KindleError, Result};
use crate::task::Task;
use crate::types::TaskName;

/// Check that a set of tasks can be supervised together.
///
/// This checks:
/// - there is at least one task
/// - task names are unique (names are the task identity)
/// - every dependency is itself part of the set; a dependency nobody runs
///   would never become ready
/// - the dependency graph has no cycles
pub fn validate_task_graph(tasks: &[Arc<Task>]) -> Result<()> {
    ensure_has_tasks(tasks)?;
    let by_name = index_by_name(tasks)?;
    validate_task_dependencies(tasks, &by_name)?;
    start_order(tasks).map(|_| ())
}

/// Names in an order where every task comes after its dependencies.
pub fn start_order(tasks: &[Arc<Task>]) -> Result<Vec<TaskName>> {
    // Edge direction: dependency -> dependent.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for task in tasks {
        graph.add_node(task.name());
    }

    for task in tasks {
        for dep in task.dependencies() {
            graph.add_edge(dep.name(), task.name(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
        Err(cycle) => Err(KindleError::DependencyCycle(format!(
            "cycle detected in task graph involving task '{}'",
            cycle.node_id()
        ))),
    }
}

fn ensure_has_tasks(tasks: &[Arc<Task>]) -> Result<()> {
    if tasks.is_empty() {
        return Err(KindleError::ConfigError(
            "a task group must contain at least one task".into(),
        ));
    }
    Ok(())
}

fn index_by_name(tasks: &[Arc<Task>]) -> Result<HashMap<&str, &Arc<Task>>> {
    let mut by_name = HashMap::with_capacity(tasks.len());
    for task in tasks {
        if by_name.insert(task.name(), task).is_some() {
            return Err(KindleError::ConfigError(format!(
                "task '{}' appears more than once in the group",
                task.name()
            )));
        }
    }
    Ok(by_name)
}

fn validate_task_dependencies(
    tasks: &[Arc<Task>],
    by_name: &HashMap<&str, &Arc<Task>>,
) -> Result<()> {
    for task in tasks {
        for dep in task.dependencies() {
            match by_name.get(dep.name()) {
                None => {
                    return Err(KindleError::ConfigError(format!(
                        "task '{}' depends on '{}' which is not part of the group",
                        task.name(),
                        dep.name()
                    )));
                }
                Some(member) if !Arc::ptr_eq(member, dep) => {
                    return Err(KindleError::ConfigError(format!(
                        "task '{}' depends on a different task instance also named '{}'",
                        task.name(),
                        dep.name()
                    )));
                }
                Some(_) => {}
            }
        }
    }
    Ok(())
}
