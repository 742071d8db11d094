//! Module registry: what earlier tasks already built
//!
//! Later tasks get a view of every file completed tasks produced and the
//! symbols defined in them, so they reuse rather than re-create code.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{FeatureState, TaskRef};

/// One file known to the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleEntry {
    /// Issue whose task owns this path
    pub issue_number: u64,
    /// Symbols the owning task defined in this file
    pub symbols: Vec<String>,
}

/// Files produced by DONE tasks, keyed by path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRegistry {
    pub entries: BTreeMap<String, ModuleEntry>,
}

impl ModuleRegistry {
    /// Build the registry from a feature's DONE tasks
    ///
    /// A path has exactly one owner. The task that created a file owns it;
    /// the earliest-completed creator wins if several claim the same path.
    /// Paths a task only defined symbols in (without creating them) are
    /// recorded only when no creator exists.
    pub fn build(feature: &FeatureState) -> Self {
        let mut done: Vec<(usize, &TaskRef)> = feature
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_done() && t.outputs.is_some())
            .collect();
        // Completion order; tasks without a timestamp keep task order and go first
        done.sort_by_key(|(index, t)| (t.completed_at, *index));

        let mut entries = BTreeMap::new();

        for (_, task) in &done {
            let Some(outputs) = &task.outputs else { continue };
            for path in &outputs.files_created {
                entries.entry(path.clone()).or_insert_with(|| ModuleEntry {
                    issue_number: task.issue_number,
                    symbols: outputs.symbols.get(path).cloned().unwrap_or_default(),
                });
            }
        }

        for (_, task) in &done {
            let Some(outputs) = &task.outputs else { continue };
            for (path, symbols) in &outputs.symbols {
                entries.entry(path.clone()).or_insert_with(|| ModuleEntry {
                    issue_number: task.issue_number,
                    symbols: symbols.clone(),
                });
            }
        }

        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, path: &str) -> Option<&ModuleEntry> {
        self.entries.get(path)
    }

    /// Markdown listing suitable for an agent prompt
    pub fn render_context(&self) -> String {
        if self.entries.is_empty() {
            return "No modules have been produced by completed issues yet.\n".to_string();
        }
        let mut out = String::from("## Existing modules\n\n");
        for (path, entry) in &self.entries {
            out.push_str(&format!("- `{}` (#{})", path, entry.issue_number));
            if !entry.symbols.is_empty() {
                out.push_str(": ");
                out.push_str(&entry.symbols.join(", "));
            }
            out.push('\n');
        }
        out
    }
}
