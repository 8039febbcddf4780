//! The walkthrough registry.
//!
//! `WalkthroughRegistry` owns every table the engine keeps: registered walkthroughs, the
//! step index, the completion dispatcher, the context watcher, and the persisted stores.
//! All of it sits behind one mutex and is mutated synchronously inside a single call; the
//! only awaits happen during registration, before the lock is taken.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use guidepost_types::{CompletionTrigger, ResolvedStep, ResolvedWalkthrough, Step, Walkthrough, WalkthroughDescriptor};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::completion::{step_triggers, trigger_from_key};
use crate::config::EngineConfig;
use crate::context_watcher::ContextWatcher;
use crate::dispatcher::EventDispatcher;
use crate::errors::RegistryError;
use crate::resolver::{RankedWalkthrough, rank_walkthroughs, resolve_walkthrough, when_holds};
use crate::services::RegistryServices;
use crate::stores::{HiddenWalkthroughs, MetadataStore, ProgressStore};

/// Reserved placeholder id that is never listed.
pub const NEW_WELCOME_EXPERIENCE: &str = "NewWelcomeExperience";

/// Notifications delivered to registry subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RegistryEvent {
    #[serde(rename_all = "camelCase")]
    WalkthroughAdded { walkthrough_id: String },
    #[serde(rename_all = "camelCase")]
    WalkthroughRemoved { walkthrough_id: String },
    #[serde(rename_all = "camelCase")]
    StepProgressed {
        step_id: String,
        walkthrough_id: String,
        done: bool,
    },
    /// A freshly installed plugin asked for its walkthrough to be shown.
    #[serde(rename_all = "camelCase")]
    OpenWalkthroughRequested { walkthrough_id: String },
}

struct RegistryState {
    walkthroughs: IndexMap<String, Walkthrough>,
    /// Step id to owning walkthrough id.
    steps: HashMap<String, String>,
    dispatcher: EventDispatcher,
    context_watcher: ContextWatcher,
    progress: ProgressStore,
    metadata: MetadataStore,
    hidden: HiddenWalkthroughs,
}

impl RegistryState {
    fn set_done(&mut self, step_id: &str, done: bool) -> Option<RegistryEvent> {
        let walkthrough_id = self.steps.get(step_id)?.clone();
        if !self.progress.set_done(step_id, done) {
            return None;
        }
        Some(RegistryEvent::StepProgressed {
            step_id: step_id.to_string(),
            walkthrough_id,
            done,
        })
    }

    fn fire(&mut self, trigger: &CompletionTrigger) -> Vec<RegistryEvent> {
        let Some(step_ids) = self.dispatcher.fire(trigger) else {
            trace!(%trigger, "Trigger already delivered this session");
            return Vec::new();
        };
        debug!(%trigger, listeners = step_ids.len(), "Delivering completion trigger");
        step_ids.iter().filter_map(|step_id| self.set_done(step_id, true)).collect()
    }

    fn walkthrough_for_step(&self, step_id: &str) -> Result<&Walkthrough, RegistryError> {
        self.steps
            .get(step_id)
            .and_then(|walkthrough_id| self.walkthroughs.get(walkthrough_id))
            .ok_or_else(|| RegistryError::step_not_found(step_id))
    }
}

/// Central registry of walkthroughs and their completion state.
pub struct WalkthroughRegistry {
    state: Mutex<RegistryState>,
    services: RegistryServices,
    config: EngineConfig,
    /// One unbounded queue per subscriber so a burst of events is never dropped.
    subscribers: Mutex<Vec<UnboundedSender<RegistryEvent>>>,
}

impl WalkthroughRegistry {
    /// Creates a registry, loading persisted records from `services.storage`.
    pub fn new(config: EngineConfig, services: RegistryServices) -> Self {
        let state = RegistryState {
            walkthroughs: IndexMap::new(),
            steps: HashMap::new(),
            dispatcher: EventDispatcher::new(),
            context_watcher: ContextWatcher::new(),
            progress: ProgressStore::load(services.storage.clone()),
            metadata: MetadataStore::load(services.storage.clone()),
            hidden: HiddenWalkthroughs::load(services.storage.clone()),
        };
        Self {
            state: Mutex::new(state),
            services,
            config,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn services(&self) -> &RegistryServices {
        &self.services
    }

    /// Subscribe to registry notifications. Events emitted before the call are not replayed.
    pub fn subscribe(&self) -> UnboundedReceiver<RegistryEvent> {
        let (event_tx, event_rx) = unbounded_channel();
        self.subscribers.lock().expect("subscriber lock poisoned").push(event_tx);
        event_rx
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().expect("registry lock poisoned")
    }

    fn emit(&self, events: impl IntoIterator<Item = RegistryEvent>) {
        let mut subscribers = self.subscribers.lock().expect("subscriber lock poisoned");
        for event in events {
            trace!(?event, "Registry event");
            subscribers.retain(|subscriber| subscriber.send(event.clone()).is_ok());
        }
    }

    /// Registers a walkthrough.
    ///
    /// An id that is already registered is logged and skipped. A step without media or a
    /// step id already in use fails the whole registration and nothing is inserted.
    pub async fn register_walkthrough(&self, descriptor: WalkthroughDescriptor) -> Result<(), RegistryError> {
        if self.contains_walkthrough(&descriptor.id) {
            error!(walkthrough = %descriptor.id, "Walkthrough already registered; skipping");
            return Ok(());
        }

        let steps = build_steps(&descriptor)?;
        let when = self.resolve_when(&descriptor).await;
        let is_featured = descriptor.is_featured || self.resolve_featured(&descriptor).await;

        let walkthrough = Walkthrough {
            id: descriptor.id.clone(),
            title: descriptor.title.clone(),
            description: descriptor.description.clone(),
            icon: descriptor.icon.clone(),
            source: descriptor.source.clone(),
            order: descriptor.order,
            when,
            is_featured,
            steps,
        };

        let snapshot = self.services.context.snapshot();
        let now = self.services.clock.now();
        let mut events = Vec::new();
        {
            let mut state = self.lock();
            if state.walkthroughs.contains_key(&walkthrough.id) {
                error!(walkthrough = %walkthrough.id, "Walkthrough registered concurrently; keeping the first");
                return Ok(());
            }
            if let Some(step) = walkthrough.steps.iter().find(|step| state.steps.contains_key(&step.id)) {
                return Err(RegistryError::DuplicateStep {
                    walkthrough_id: walkthrough.id.clone(),
                    step_id: step.id.clone(),
                });
            }

            for step in &walkthrough.steps {
                state.steps.insert(step.id.clone(), walkthrough.id.clone());
                for parsed in step_triggers(step) {
                    if let Some(expression) = &parsed.expression {
                        state.context_watcher.register(expression, &step.id);
                        if expression.evaluate(&snapshot) {
                            state.dispatcher.mark_fired(parsed.trigger.clone());
                        }
                    }
                    let already_fired = state.dispatcher.has_fired(&parsed.trigger);
                    state.dispatcher.register(parsed.trigger, &step.id);
                    if already_fired {
                        events.extend(state.set_done(&step.id, true));
                    }
                }
            }

            state.metadata.ensure(&walkthrough.id, now, walkthrough.step_ids());
            info!(
                walkthrough = %walkthrough.id,
                steps = walkthrough.steps.len(),
                featured = walkthrough.is_featured,
                "Registered walkthrough"
            );
            let walkthrough_id = walkthrough.id.clone();
            state.walkthroughs.insert(walkthrough_id.clone(), walkthrough);
            events.insert(0, RegistryEvent::WalkthroughAdded { walkthrough_id });
        }
        self.emit(events);
        Ok(())
    }

    async fn resolve_when(&self, descriptor: &WalkthroughDescriptor) -> Option<String> {
        let lookup = self.services.experiments.when_override(&descriptor.id);
        match timeout(self.config.experiment_timeout(), lookup).await {
            Ok(Some(overridden)) => {
                debug!(walkthrough = %descriptor.id, when = %overridden, "Experiment overrides when clause");
                Some(overridden)
            }
            Ok(None) => descriptor.when.clone(),
            Err(_) => {
                warn!(walkthrough = %descriptor.id, "Experiment lookup timed out; using declared when clause");
                descriptor.when.clone()
            }
        }
    }

    async fn resolve_featured(&self, descriptor: &WalkthroughDescriptor) -> bool {
        if descriptor.featured_for.is_empty() {
            return false;
        }
        let search = self.services.workspace.any_match(&descriptor.featured_for);
        match timeout(self.config.featured_lookup_timeout(), search).await {
            Ok(Ok(matched)) => matched,
            Ok(Err(error)) => {
                warn!(walkthrough = %descriptor.id, error = %error, "Workspace search failed; not featured");
                false
            }
            Err(_) => {
                warn!(walkthrough = %descriptor.id, "Workspace search timed out; not featured");
                false
            }
        }
    }

    /// Removes a walkthrough and every trace of its steps. Returns whether it was registered.
    /// Persisted progress and metadata are kept for a later re-registration.
    pub fn unregister_walkthrough(&self, id: &str) -> bool {
        {
            let mut state = self.lock();
            let Some(walkthrough) = state.walkthroughs.shift_remove(id) else {
                return false;
            };
            let step_ids = walkthrough.step_ids();
            for step_id in &step_ids {
                state.steps.remove(step_id);
            }
            state.dispatcher.remove_steps(step_ids.iter().map(String::as_str));
            state.context_watcher.remove_steps(step_ids.iter().map(String::as_str));
            info!(walkthrough = id, "Unregistered walkthrough");
        }
        self.emit([RegistryEvent::WalkthroughRemoved {
            walkthrough_id: id.to_string(),
        }]);
        true
    }

    pub fn contains_walkthrough(&self, id: &str) -> bool {
        self.lock().walkthroughs.contains_key(id)
    }

    /// Whether a step id is currently registered.
    pub fn contains_step(&self, id: &str) -> bool {
        self.lock().steps.contains_key(id)
    }

    /// Whether any trigger still routes to `step_id`.
    pub fn is_step_listening(&self, step_id: &str) -> bool {
        self.lock().dispatcher.is_listening(step_id)
    }

    pub fn get_walkthrough(&self, id: &str) -> Result<ResolvedWalkthrough, RegistryError> {
        let snapshot = self.services.context.snapshot();
        let now = self.services.clock.now();
        let state = self.lock();
        let walkthrough = state
            .walkthroughs
            .get(id)
            .ok_or_else(|| RegistryError::walkthrough_not_found(id))?;
        Ok(resolve_walkthrough(
            walkthrough,
            state.metadata.get(id),
            &state.progress,
            &snapshot,
            now,
        ))
    }

    /// Every listable walkthrough whose `when` holds, in registration order.
    pub fn get_walkthroughs(&self) -> Vec<ResolvedWalkthrough> {
        let snapshot = self.services.context.snapshot();
        let now = self.services.clock.now();
        let state = self.lock();
        state
            .walkthroughs
            .values()
            .filter(|walkthrough| walkthrough.id != NEW_WELCOME_EXPERIENCE)
            .filter(|walkthrough| when_holds(walkthrough.when.as_deref(), &snapshot))
            .map(|walkthrough| {
                resolve_walkthrough(
                    walkthrough,
                    state.metadata.get(&walkthrough.id),
                    &state.progress,
                    &snapshot,
                    now,
                )
            })
            .collect()
    }

    pub fn get_step(&self, id: &str) -> Result<ResolvedStep, RegistryError> {
        let snapshot = self.services.context.snapshot();
        let state = self.lock();
        let walkthrough = state.walkthrough_for_step(id)?;
        let step = walkthrough
            .steps
            .iter()
            .find(|step| step.id == id)
            .ok_or_else(|| RegistryError::step_not_found(id))?;
        Ok(ResolvedStep {
            step: step.clone(),
            done: state.progress.is_done(id),
            active: when_holds(step.when.as_deref(), &snapshot),
        })
    }

    /// Marks a step done. Repeated calls are no-ops.
    pub fn progress_step(&self, id: &str) -> Result<(), RegistryError> {
        self.set_step_done(id, true)
    }

    /// Marks a step not done. Repeated calls are no-ops.
    pub fn deprogress_step(&self, id: &str) -> Result<(), RegistryError> {
        self.set_step_done(id, false)
    }

    fn set_step_done(&self, id: &str, done: bool) -> Result<(), RegistryError> {
        let event = {
            let mut state = self.lock();
            if !state.steps.contains_key(id) {
                return Err(RegistryError::step_not_found(id));
            }
            state.set_done(id, done)
        };
        self.emit(event);
        Ok(())
    }

    /// Delivers a raw dispatch key such as `onCommand:foo`. Malformed keys are logged and
    /// ignored. Returns the steps that became done.
    pub fn progress_by_event(&self, key: &str) -> Vec<String> {
        match trigger_from_key(key) {
            Some(trigger) => self.progress_by_trigger(&trigger),
            None => Vec::new(),
        }
    }

    /// Delivers `trigger` at most once per session. Returns the steps that became done.
    pub fn progress_by_trigger(&self, trigger: &CompletionTrigger) -> Vec<String> {
        let events = self.lock().fire(trigger);
        let progressed = progressed_steps(&events);
        self.emit(events);
        progressed
    }

    /// Records that the user opened the walkthrough: clears its "new" state and remembers
    /// the current step list as seen.
    pub fn mark_walkthrough_opened(&self, id: &str) -> Result<(), RegistryError> {
        let now = self.services.clock.now();
        let mut state = self.lock();
        let step_ids = state
            .walkthroughs
            .get(id)
            .map(Walkthrough::step_ids)
            .ok_or_else(|| RegistryError::walkthrough_not_found(id))?;
        state.metadata.mark_opened(id, now, step_ids);
        debug!(walkthrough = id, "Walkthrough opened");
        Ok(())
    }

    /// Marks the walkthrough opened and returns its view.
    pub fn open_walkthrough(&self, id: &str) -> Result<ResolvedWalkthrough, RegistryError> {
        self.mark_walkthrough_opened(id)?;
        self.get_walkthrough(id)
    }

    /// Hides a registered walkthrough from ranked lists. Returns whether it was newly hidden.
    pub fn hide_walkthrough(&self, id: &str) -> Result<bool, RegistryError> {
        let mut state = self.lock();
        if !state.walkthroughs.contains_key(id) {
            return Err(RegistryError::walkthrough_not_found(id));
        }
        Ok(state.hidden.hide(id))
    }

    /// Returns whether the id was hidden.
    pub fn unhide_walkthrough(&self, id: &str) -> bool {
        self.lock().hidden.unhide(id)
    }

    pub fn hidden_walkthroughs(&self) -> Vec<String> {
        self.lock().hidden.ids()
    }

    /// Visible, non-hidden walkthroughs by descending rank, at most `limit` of them.
    pub fn ranked_walkthroughs(&self, limit: usize) -> Vec<RankedWalkthrough> {
        let walkthroughs = self.get_walkthroughs();
        let state = self.lock();
        rank_walkthroughs(walkthroughs, |id| state.hidden.contains(id), limit)
    }

    /// Forgets all progress, metadata, and hidden state. Registered steps that were done
    /// are announced as not done.
    pub fn reset_all_progress(&self) {
        let events: Vec<RegistryEvent> = {
            let mut state = self.lock();
            let done = state.progress.done_steps();
            state.progress.clear();
            state.metadata.clear();
            state.hidden.clear();
            done.into_iter()
                .filter_map(|step_id| {
                    let walkthrough_id = state.steps.get(&step_id)?.clone();
                    Some(RegistryEvent::StepProgressed {
                        step_id,
                        walkthrough_id,
                        done: false,
                    })
                })
                .collect()
        };
        info!(deprogressed = events.len(), "Reset all walkthrough progress");
        self.emit(events);
    }

    /// Fires context triggers whose keys changed and which now hold.
    pub fn on_context_changed(&self, changed_keys: &BTreeSet<String>) -> Vec<String> {
        if !self.lock().context_watcher.affects(changed_keys) {
            return Vec::new();
        }
        let snapshot = self.services.context.snapshot();
        let events: Vec<RegistryEvent> = {
            let mut state = self.lock();
            let triggers = state.context_watcher.matching(&snapshot, changed_keys);
            triggers.iter().flat_map(|trigger| state.fire(trigger)).collect()
        };
        let progressed = progressed_steps(&events);
        self.emit(events);
        progressed
    }

    /// Fires every watched context trigger that currently holds.
    pub fn reevaluate_context(&self) -> Vec<String> {
        let snapshot = self.services.context.snapshot();
        let events: Vec<RegistryEvent> = {
            let mut state = self.lock();
            let triggers = state.context_watcher.all_matching(&snapshot);
            triggers.iter().flat_map(|trigger| state.fire(trigger)).collect()
        };
        let progressed = progressed_steps(&events);
        self.emit(events);
        progressed
    }

    /// Emits an open request for `walkthrough_id`.
    pub(crate) fn request_open(&self, walkthrough_id: &str) {
        self.emit([RegistryEvent::OpenWalkthroughRequested {
            walkthrough_id: walkthrough_id.to_string(),
        }]);
    }
}

fn build_steps(descriptor: &WalkthroughDescriptor) -> Result<Vec<Step>, RegistryError> {
    let mut seen = HashSet::new();
    let mut steps = Vec::with_capacity(descriptor.steps.len());
    for (index, step_descriptor) in descriptor.steps.iter().enumerate() {
        if !seen.insert(step_descriptor.id.as_str()) {
            return Err(RegistryError::DuplicateStep {
                walkthrough_id: descriptor.id.clone(),
                step_id: step_descriptor.id.clone(),
            });
        }
        let step = Step::from_descriptor(step_descriptor, &descriptor.id, index).ok_or_else(|| RegistryError::MissingMedia {
            walkthrough_id: descriptor.id.clone(),
            step_id: step_descriptor.id.clone(),
        })?;
        steps.push(step);
    }
    Ok(steps)
}

fn progressed_steps(events: &[RegistryEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            RegistryEvent::StepProgressed { step_id, done: true, .. } => Some(step_id.clone()),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use guidepost_types::{StepDescriptor, StepMedia};

    fn descriptor(id: &str, steps: &[(&str, &[&str])]) -> WalkthroughDescriptor {
        WalkthroughDescriptor {
            id: id.into(),
            title: id.into(),
            description: String::new(),
            icon: None,
            source: "test".into(),
            order: 0,
            when: None,
            is_featured: false,
            featured_for: Vec::new(),
            steps: steps
                .iter()
                .map(|(step_id, events)| StepDescriptor {
                    id: step_id.to_string(),
                    title: step_id.to_string(),
                    description: String::new(),
                    media: Some(StepMedia::Markdown { path: "x.md".into() }),
                    when: None,
                    completion_events: events.iter().map(|event| event.to_string()).collect(),
                    order: None,
                })
                .collect(),
        }
    }

    fn registry() -> WalkthroughRegistry {
        WalkthroughRegistry::new(EngineConfig::default(), RegistryServices::in_memory())
    }

    #[tokio::test]
    async fn missing_media_rejects_the_whole_walkthrough() {
        let registry = registry();
        let mut broken = descriptor("w", &[("a", &[]), ("b", &[])]);
        broken.steps[1].media = None;

        let error = registry.register_walkthrough(broken).await.unwrap_err();
        assert_eq!(
            error,
            RegistryError::MissingMedia {
                walkthrough_id: "w".into(),
                step_id: "b".into()
            }
        );
        assert!(!registry.contains_walkthrough("w"));
        assert!(!registry.contains_step("a"));
    }

    #[tokio::test]
    async fn duplicate_step_across_walkthroughs_is_rejected_atomically() {
        let registry = registry();
        registry.register_walkthrough(descriptor("w1", &[("shared", &[])])).await.unwrap();

        let error = registry
            .register_walkthrough(descriptor("w2", &[("fresh", &["onCommand:x"]), ("shared", &[])]))
            .await
            .unwrap_err();
        assert!(matches!(error, RegistryError::DuplicateStep { .. }));
        assert!(!registry.contains_walkthrough("w2"));
        assert!(!registry.contains_step("fresh"));
        assert!(registry.progress_by_event("onCommand:x").is_empty());
    }

    #[tokio::test]
    async fn progress_events_fire_only_on_change() {
        let registry = registry();
        registry.register_walkthrough(descriptor("w", &[("a", &[])])).await.unwrap();
        let mut events = registry.subscribe();

        registry.progress_step("a").unwrap();
        registry.progress_step("a").unwrap();
        registry.deprogress_step("a").unwrap();

        assert_eq!(
            events.try_recv().unwrap(),
            RegistryEvent::StepProgressed {
                step_id: "a".into(),
                walkthrough_id: "w".into(),
                done: true
            }
        );
        assert!(matches!(events.try_recv().unwrap(), RegistryEvent::StepProgressed { done: false, .. }));
        assert!(events.try_recv().is_err());
        assert_eq!(registry.progress_step("nope"), Err(RegistryError::step_not_found("nope")));
    }

    #[tokio::test]
    async fn dropped_subscribers_are_forgotten() {
        let registry = registry();
        registry.register_walkthrough(descriptor("w", &[("a", &[])])).await.unwrap();
        drop(registry.subscribe());
        let mut live = registry.subscribe();

        registry.progress_step("a").unwrap();
        assert!(matches!(live.try_recv().unwrap(), RegistryEvent::StepProgressed { done: true, .. }));
        assert_eq!(registry.subscribers.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn placeholder_and_hidden_by_when_are_not_listed() {
        let registry = registry();
        registry.register_walkthrough(descriptor(NEW_WELCOME_EXPERIENCE, &[])).await.unwrap();
        let mut gated = descriptor("gated", &[]);
        gated.when = Some("neverSet".into());
        registry.register_walkthrough(gated).await.unwrap();
        registry.register_walkthrough(descriptor("open", &[])).await.unwrap();

        let ids: Vec<String> = registry.get_walkthroughs().into_iter().map(|view| view.id).collect();
        assert_eq!(ids, vec!["open".to_string()]);
        assert!(registry.get_walkthrough("gated").is_ok());
    }
}
