//! Choosing the next issue to work on
//!
//! Eligibility is fixed: a task must be READY and every one of its
//! dependencies must be present in the feature and DONE. Ranking among
//! eligible tasks is pluggable through [`IssueSelector::score`].

use std::collections::{BTreeMap, HashMap};

use crate::model::{TaskRef, TaskSize, TaskStage};

/// Ranks eligible tasks; the highest score wins, ties go to task order
pub trait IssueSelector: Send + Sync {
    /// Priority of a task; higher is picked first
    fn score(&self, task: &TaskRef) -> f64;

    /// Keep the tasks whose dependencies are all present and DONE
    fn filter_unblocked<'a>(&self, tasks: &[&'a TaskRef], all_tasks: &[TaskRef]) -> Vec<&'a TaskRef> {
        let stages: HashMap<u64, TaskStage> = all_tasks
            .iter()
            .map(|t| (t.issue_number, t.stage))
            .collect();
        tasks
            .iter()
            .copied()
            .filter(|task| {
                task.dependencies
                    .iter()
                    .all(|dep| stages.get(dep) == Some(&TaskStage::Done))
            })
            .collect()
    }

    /// Highest-scoring task, first occurrence on ties
    fn select<'a>(&self, tasks: &[&'a TaskRef]) -> Option<&'a TaskRef> {
        let mut best: Option<(&'a TaskRef, f64)> = None;
        for &task in tasks {
            let score = self.score(task);
            let score = if score.is_nan() { f64::NEG_INFINITY } else { score };
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((task, score)),
            }
        }
        best.map(|(task, _)| task)
    }
}

/// Weighted preference for small, valuable, low-risk tasks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityScorer {
    pub size_weight: f64,
    pub value_weight: f64,
    pub risk_weight: f64,
}

impl Default for PriorityScorer {
    fn default() -> Self {
        Self {
            size_weight: 0.3,
            value_weight: 0.5,
            risk_weight: 0.2,
        }
    }
}

impl PriorityScorer {
    /// Preference for a size estimate; unknown sizes sit in the middle
    pub fn size_score(size: Option<TaskSize>) -> f64 {
        match size {
            Some(TaskSize::Xs) => 1.0,
            Some(TaskSize::S) => 0.8,
            Some(TaskSize::M) => 0.6,
            Some(TaskSize::L) => 0.4,
            Some(TaskSize::Xl) => 0.2,
            None => 0.5,
        }
    }
}

/// Clamp to [0, 1]; anything non-finite counts as 0
fn unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

impl IssueSelector for PriorityScorer {
    fn score(&self, task: &TaskRef) -> f64 {
        self.size_weight * Self::size_score(task.estimated_size)
            + self.value_weight * unit(task.business_value_score)
            + self.risk_weight * (1.0 - unit(task.technical_risk_score))
    }
}

/// Find a dependency cycle among the tasks, if there is one
///
/// The cycle is returned as the issue numbers along it, starting and ending
/// with the same issue. Dependencies on issues outside `tasks` are ignored.
pub fn find_dependency_cycle(tasks: &[TaskRef]) -> Option<Vec<u64>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        issue: u64,
        graph: &BTreeMap<u64, Vec<u64>>,
        marks: &mut HashMap<u64, Mark>,
        path: &mut Vec<u64>,
    ) -> Option<Vec<u64>> {
        marks.insert(issue, Mark::Visiting);
        path.push(issue);

        for &dep in graph.get(&issue).into_iter().flatten() {
            if !graph.contains_key(&dep) {
                continue;
            }
            match marks.get(&dep) {
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|&n| n == dep).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(dep);
                    return Some(cycle);
                }
                Some(Mark::Done) => {}
                None => {
                    if let Some(cycle) = visit(dep, graph, marks, path) {
                        return Some(cycle);
                    }
                }
            }
        }

        path.pop();
        marks.insert(issue, Mark::Done);
        None
    }

    let graph: BTreeMap<u64, Vec<u64>> = tasks
        .iter()
        .map(|t| (t.issue_number, t.dependencies.iter().copied().collect()))
        .collect();
    let mut marks = HashMap::new();

    for task in tasks {
        if marks.contains_key(&task.issue_number) {
            continue;
        }
        let mut path = Vec::new();
        if let Some(cycle) = visit(task.issue_number, &graph, &mut marks, &mut path) {
            return Some(cycle);
        }
    }
    None
}
