//! Normalized completion triggers.
//!
//! A `CompletionTrigger` is the dispatch key that marks steps done when it fires. Raw
//! authored strings are only split at the boundary (`from_key`); everything past that point
//! compares variant values.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of events that can complete a step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum CompletionTrigger {
    /// An application command finished executing.
    Command(String),
    /// A link was opened (full URL).
    Link(String),
    /// A named host event was raised.
    Event(String),
    /// A view became visible.
    View(String),
    /// A configuration key changed.
    SettingChanged(String),
    /// A context expression became true; holds its canonical serialized form.
    Context(String),
    /// A specific step was selected in the UI.
    StepSelected(String),
    /// A plugin finished installing; holds the lowercased plugin id.
    ExtensionInstalled(String),
}

/// Failure to turn a dispatch key string into a trigger.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TriggerKeyError {
    #[error("completion event '{0}' has no ':' separator")]
    MissingSeparator(String),
    #[error("completion event '{key}' has an empty argument")]
    EmptyArgument { key: String },
    #[error("unknown completion event type '{event_type}'")]
    UnknownType { event_type: String },
}

impl CompletionTrigger {
    /// Parses a normalized dispatch key such as `onCommand:foo` or `stepSelected:s1`.
    ///
    /// Context keys are returned with their expression text as given; callers that need the
    /// canonical form re-serialize it through the context expression parser.
    pub fn from_key(key: &str) -> Result<Self, TriggerKeyError> {
        let (event_type, argument) = key.split_once(':').ok_or_else(|| TriggerKeyError::MissingSeparator(key.to_string()))?;
        if argument.is_empty() {
            return Err(TriggerKeyError::EmptyArgument { key: key.to_string() });
        }
        let argument = argument.to_string();
        let trigger = match event_type {
            "onCommand" => CompletionTrigger::Command(strip_to_side(&argument).to_string()),
            "onLink" => CompletionTrigger::Link(argument),
            "onEvent" => CompletionTrigger::Event(argument),
            "onView" => CompletionTrigger::View(argument),
            "onSettingChanged" => CompletionTrigger::SettingChanged(argument),
            "onContext" => CompletionTrigger::Context(argument),
            "stepSelected" | "onStepSelected" => CompletionTrigger::StepSelected(argument),
            "extensionInstalled" | "onExtensionInstalled" => CompletionTrigger::ExtensionInstalled(argument.to_lowercase()),
            other => {
                return Err(TriggerKeyError::UnknownType {
                    event_type: other.to_string(),
                });
            }
        };
        Ok(trigger)
    }

    /// The event-type prefix used in the key form.
    pub fn event_type(&self) -> &'static str {
        match self {
            CompletionTrigger::Command(_) => "onCommand",
            CompletionTrigger::Link(_) => "onLink",
            CompletionTrigger::Event(_) => "onEvent",
            CompletionTrigger::View(_) => "onView",
            CompletionTrigger::SettingChanged(_) => "onSettingChanged",
            CompletionTrigger::Context(_) => "onContext",
            CompletionTrigger::StepSelected(_) => "stepSelected",
            CompletionTrigger::ExtensionInstalled(_) => "extensionInstalled",
        }
    }

    /// The argument carried by the trigger.
    pub fn argument(&self) -> &str {
        match self {
            CompletionTrigger::Command(value)
            | CompletionTrigger::Link(value)
            | CompletionTrigger::Event(value)
            | CompletionTrigger::View(value)
            | CompletionTrigger::SettingChanged(value)
            | CompletionTrigger::Context(value)
            | CompletionTrigger::StepSelected(value)
            | CompletionTrigger::ExtensionInstalled(value) => value,
        }
    }
}

impl fmt::Display for CompletionTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.event_type(), self.argument())
    }
}

/// Removes a leading `toSide:` marker from a command argument.
pub fn strip_to_side(command: &str) -> &str {
    command.strip_prefix("toSide:").unwrap_or(command)
}
