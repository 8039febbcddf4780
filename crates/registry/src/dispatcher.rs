use std::collections::HashSet;

use guidepost_types::CompletionTrigger;
use indexmap::{IndexMap, IndexSet};

/// Reverse index from completion triggers to the steps they complete, plus the
/// session-scoped set of triggers that have already been delivered.
///
/// A trigger is delivered at most once per session: the first `fire` returns its
/// listeners, every later `fire` of the same trigger returns `None`. Steps registered
/// after a trigger fired can ask `has_fired` and progress themselves immediately.
#[derive(Debug, Default)]
pub struct EventDispatcher {
    listeners: IndexMap<CompletionTrigger, IndexSet<String>>,
    fired: HashSet<CompletionTrigger>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `step_id` as a listener of `trigger`. Re-adding keeps the original position.
    pub fn register(&mut self, trigger: CompletionTrigger, step_id: &str) {
        self.listeners.entry(trigger).or_default().insert(step_id.to_string());
    }

    pub fn has_fired(&self, trigger: &CompletionTrigger) -> bool {
        self.fired.contains(trigger)
    }

    /// Records `trigger` as delivered without returning listeners.
    pub fn mark_fired(&mut self, trigger: CompletionTrigger) -> bool {
        self.fired.insert(trigger)
    }

    /// Delivers `trigger`.
    ///
    /// Returns the listening step ids in registration order on the first delivery, and
    /// `None` when the trigger already fired this session.
    pub fn fire(&mut self, trigger: &CompletionTrigger) -> Option<Vec<String>> {
        if !self.fired.insert(trigger.clone()) {
            return None;
        }
        Some(self.steps_for(trigger))
    }

    pub fn steps_for(&self, trigger: &CompletionTrigger) -> Vec<String> {
        self.listeners
            .get(trigger)
            .map(|steps| steps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Removes the given steps from every trigger and drops triggers left without listeners.
    pub fn remove_steps<'a>(&mut self, step_ids: impl IntoIterator<Item = &'a str>) {
        let doomed: HashSet<&str> = step_ids.into_iter().collect();
        if doomed.is_empty() {
            return;
        }
        self.listeners.retain(|_, steps| {
            steps.retain(|step| !doomed.contains(step.as_str()));
            !steps.is_empty()
        });
    }

    /// Whether any trigger still lists `step_id`.
    pub fn is_listening(&self, step_id: &str) -> bool {
        self.listeners.values().any(|steps| steps.contains(step_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(id: &str) -> CompletionTrigger {
        CompletionTrigger::Command(id.into())
    }

    #[test]
    fn fire_delivers_once_in_registration_order() {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(command("save"), "b");
        dispatcher.register(command("save"), "a");
        dispatcher.register(command("save"), "b");

        assert_eq!(dispatcher.fire(&command("save")), Some(vec!["b".to_string(), "a".to_string()]));
        assert_eq!(dispatcher.fire(&command("save")), None);
        assert!(dispatcher.has_fired(&command("save")));
    }

    #[test]
    fn firing_without_listeners_still_records_the_trigger() {
        let mut dispatcher = EventDispatcher::new();
        assert_eq!(dispatcher.fire(&command("later")), Some(Vec::new()));
        dispatcher.register(command("later"), "s");
        assert!(dispatcher.has_fired(&command("later")));
        assert_eq!(dispatcher.fire(&command("later")), None);
    }

    #[test]
    fn remove_steps_prunes_empty_triggers() {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(command("a"), "s1");
        dispatcher.register(command("a"), "s2");
        dispatcher.register(command("b"), "s1");

        dispatcher.remove_steps(["s1"]);

        assert_eq!(dispatcher.steps_for(&command("a")), vec!["s2".to_string()]);
        assert!(dispatcher.steps_for(&command("b")).is_empty());
        assert_eq!(dispatcher.listeners.len(), 1);
        assert!(!dispatcher.is_listening("s1"));
    }
}
