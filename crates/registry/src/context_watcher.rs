//! Watches the ambient context for `onContext` completion triggers.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use guidepost_types::CompletionTrigger;
use guidepost_util::{ContextExpr, ContextKeyService, ContextSnapshot};
use indexmap::{IndexMap, IndexSet};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::registry::WalkthroughRegistry;

#[derive(Debug)]
struct WatchedExpression {
    expression: ContextExpr,
    steps: IndexSet<String>,
}

/// Registered context expressions keyed by canonical form, and the keys they read.
#[derive(Debug, Default)]
pub struct ContextWatcher {
    expressions: IndexMap<String, WatchedExpression>,
    keys: BTreeSet<String>,
}

impl ContextWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watches `expression` on behalf of `step_id`.
    pub fn register(&mut self, expression: &ContextExpr, step_id: &str) {
        let canonical = expression.serialize();
        self.keys.extend(expression.referenced_keys());
        self.expressions
            .entry(canonical)
            .or_insert_with(|| WatchedExpression {
                expression: expression.clone(),
                steps: IndexSet::new(),
            })
            .steps
            .insert(step_id.to_string());
    }

    /// Stops watching on behalf of the given steps. Expressions no step needs are dropped
    /// along with keys no remaining expression reads.
    pub fn remove_steps<'a>(&mut self, step_ids: impl IntoIterator<Item = &'a str>) {
        let doomed: HashSet<&str> = step_ids.into_iter().collect();
        if doomed.is_empty() {
            return;
        }
        let before = self.expressions.len();
        self.expressions.retain(|_, watched| {
            watched.steps.retain(|step| !doomed.contains(step.as_str()));
            !watched.steps.is_empty()
        });
        if self.expressions.len() != before {
            self.keys = self
                .expressions
                .values()
                .flat_map(|watched| watched.expression.referenced_keys())
                .collect();
        }
    }

    /// Whether a change to `changed_keys` can flip any watched expression.
    pub fn affects(&self, changed_keys: &BTreeSet<String>) -> bool {
        changed_keys.iter().any(|key| self.keys.contains(key))
    }

    /// Triggers whose expression reads one of `changed_keys` and now holds.
    pub fn matching(&self, snapshot: &ContextSnapshot, changed_keys: &BTreeSet<String>) -> Vec<CompletionTrigger> {
        self.expressions
            .iter()
            .filter(|(_, watched)| {
                let keys = watched.expression.referenced_keys();
                changed_keys.iter().any(|key| keys.contains(key))
            })
            .filter(|(_, watched)| watched.expression.evaluate(snapshot))
            .map(|(canonical, _)| CompletionTrigger::Context(canonical.clone()))
            .collect()
    }

    /// Every watched trigger that currently holds, regardless of what changed.
    pub fn all_matching(&self, snapshot: &ContextSnapshot) -> Vec<CompletionTrigger> {
        self.expressions
            .iter()
            .filter(|(_, watched)| watched.expression.evaluate(snapshot))
            .map(|(canonical, _)| CompletionTrigger::Context(canonical.clone()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }
}

/// Forwards context changes to the registry until the context service goes away.
///
/// A lagged receiver re-evaluates every watched expression since individual changes were
/// dropped.
pub fn spawn_context_watcher(registry: Arc<WalkthroughRegistry>, context: Arc<dyn ContextKeyService>) -> JoinHandle<()> {
    let mut receiver = context.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(change) => {
                    registry.on_context_changed(&change.keys);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Context watcher lagged; re-evaluating all context triggers");
                    registry.reevaluate_context();
                }
                Err(RecvError::Closed) => {
                    debug!("Context service closed; stopping context watcher");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|key| key.to_string()).collect()
    }

    #[test]
    fn matching_requires_intersection_and_truth() {
        let mut watcher = ContextWatcher::new();
        watcher.register(&ContextExpr::parse("a && b").unwrap(), "s1");
        watcher.register(&ContextExpr::parse("c").unwrap(), "s2");

        let snapshot: ContextSnapshot = [("a".to_string(), serde_json::json!(true)), ("b".to_string(), serde_json::json!(true))]
            .into_iter()
            .collect();

        assert!(watcher.affects(&keys(&["b"])));
        assert!(!watcher.affects(&keys(&["zzz"])));
        assert_eq!(watcher.matching(&snapshot, &keys(&["b"])), vec![CompletionTrigger::Context("a && b".into())]);
        assert!(watcher.matching(&snapshot, &keys(&["c"])).is_empty());
    }

    #[test]
    fn equivalent_expressions_share_an_entry() {
        let mut watcher = ContextWatcher::new();
        watcher.register(&ContextExpr::parse("b && a").unwrap(), "s1");
        watcher.register(&ContextExpr::parse("a && b").unwrap(), "s2");

        watcher.remove_steps(["s1"]);
        assert!(!watcher.is_empty());
        assert!(watcher.affects(&keys(&["a"])));

        watcher.remove_steps(["s2"]);
        assert!(watcher.is_empty());
        assert!(watcher.keys.is_empty());
        assert!(!watcher.affects(&keys(&["a"])));
    }
}
