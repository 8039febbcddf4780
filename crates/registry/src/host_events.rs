//! Host application events that can complete steps.

use std::sync::Arc;

use guidepost_types::{CompletionTrigger, trigger::strip_to_side};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::registry::WalkthroughRegistry;

/// Something that happened in the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostEvent {
    CommandExecuted { command: String },
    ViewVisibilityChanged { id: String, visible: bool },
    SettingsChanged { keys: Vec<String> },
    StepSelected { step_id: String },
    ExtensionInstalled { extension_id: String },
    LinkOpened { url: String },
    /// A named custom event (`onEvent:<name>`).
    Custom { name: String },
}

impl HostEvent {
    /// Completion triggers raised by this event.
    pub fn triggers(&self) -> Vec<CompletionTrigger> {
        match self {
            HostEvent::CommandExecuted { command } => vec![CompletionTrigger::Command(strip_to_side(command).to_string())],
            HostEvent::ViewVisibilityChanged { id, visible: true } => vec![CompletionTrigger::View(id.clone())],
            HostEvent::ViewVisibilityChanged { visible: false, .. } => Vec::new(),
            HostEvent::SettingsChanged { keys } => keys.iter().cloned().map(CompletionTrigger::SettingChanged).collect(),
            HostEvent::StepSelected { step_id } => vec![CompletionTrigger::StepSelected(step_id.clone())],
            HostEvent::ExtensionInstalled { extension_id } => {
                vec![CompletionTrigger::ExtensionInstalled(extension_id.to_lowercase())]
            }
            HostEvent::LinkOpened { url } => vec![CompletionTrigger::Link(url.clone())],
            HostEvent::Custom { name } => vec![CompletionTrigger::Event(name.clone())],
        }
    }
}

/// Feeds host events into the registry until every sender is dropped.
pub fn spawn_host_event_pump(registry: Arc<WalkthroughRegistry>, mut receiver: mpsc::Receiver<HostEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            trace!(?event, "Host event");
            for trigger in event.triggers() {
                let progressed = registry.progress_by_trigger(&trigger);
                if !progressed.is_empty() {
                    debug!(%trigger, steps = ?progressed, "Host event completed steps");
                }
            }
        }
        debug!("Host event channel closed; stopping pump");
    })
}
