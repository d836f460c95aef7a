//! Dependency staging for a plan's tasks.

use std::collections::{HashMap, HashSet};

use genesis_core::{Task, TaskId};

/// Why a task cannot be staged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Depends on a task that is not in the plan
    Dangling(TaskId),
    /// Part of (or downstream of) a dependency cycle
    Circular,
}

/// Tasks grouped into stages that can each run as one batch.
#[derive(Debug, Clone, Default)]
pub struct Staging {
    /// Stage k holds tasks whose dependencies all sit in earlier stages,
    /// each stage in submission order
    pub stages: Vec<Vec<TaskId>>,
    /// Tasks that can never run, with the reason
    pub unresolved: Vec<(TaskId, Resolution)>,
}

/// Group tasks into dependency stages.
///
/// A task whose dependency is unresolved is still staged after it, so it
/// can be failed as a dependency failure rather than disappear.
pub fn stage(tasks: &[Task]) -> Staging {
    let mut ordered: Vec<&Task> = tasks.iter().collect();
    ordered.sort_by_key(|t| t.seq);

    let known: HashSet<TaskId> = ordered.iter().map(|t| t.id).collect();
    let mut staging = Staging::default();
    let mut placed: HashSet<TaskId> = HashSet::new();
    let mut remaining: Vec<&Task> = Vec::new();

    for task in ordered {
        match task.depends_on.iter().find(|d| !known.contains(d)) {
            Some(missing) => {
                staging.unresolved.push((task.id, Resolution::Dangling(*missing)));
                placed.insert(task.id);
            }
            None => remaining.push(task),
        }
    }

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<&Task>, Vec<&Task>) = remaining
            .into_iter()
            .partition(|t| t.depends_on.iter().all(|d| placed.contains(d)));

        if ready.is_empty() {
            for task in blocked {
                staging.unresolved.push((task.id, Resolution::Circular));
            }
            break;
        }

        let stage: Vec<TaskId> = ready.iter().map(|t| t.id).collect();
        placed.extend(stage.iter().copied());
        staging.stages.push(stage);
        remaining = blocked;
    }

    staging
}

/// Tasks no other task depends on.
pub fn terminal_tasks(tasks: &[Task]) -> HashSet<TaskId> {
    let consumed: HashSet<TaskId> = tasks.iter().flat_map(|t| t.depends_on.iter().copied()).collect();
    tasks
        .iter()
        .map(|t| t.id)
        .filter(|id| !consumed.contains(id))
        .collect()
}

/// Map from task id to task, for lookups during staging.
pub fn index(tasks: &[Task]) -> HashMap<TaskId, &Task> {
    tasks.iter().map(|t| (t.id, t)).collect()
}
