//! Completion-event parsing.
//!
//! Turns a step's authored `completionEvents` (or, when there are none, the buttons in its
//! description) into normalized `CompletionTrigger`s. Malformed events are logged and
//! skipped one at a time so a single bad trigger never takes the rest of the step down.

use guidepost_types::{CompletionTrigger, Step, trigger::strip_to_side};
use guidepost_util::{ContextExpr, ContextExprError, parse_description};
use thiserror::Error;
use tracing::{error, warn};

/// Implicit event used when a step declares no events and has no qualifying button.
pub const STEP_SELECTED_EVENT: &str = "stepSelected";

/// A trigger parsed from one raw completion event.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTrigger {
    pub trigger: CompletionTrigger,
    /// The parsed expression for `onContext` triggers.
    pub expression: Option<ContextExpr>,
}

/// Reasons a raw completion event is rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompletionEventError {
    #[error("unknown completion event type '{event_type}'")]
    UnknownType { event_type: String },

    #[error("completion event '{event}' requires an argument")]
    MissingArgument { event: String },

    #[error("unable to parse context expression '{expression}': {source}")]
    InvalidContext {
        expression: String,
        #[source]
        source: ContextExprError,
    },
}

/// Returns the step's authored events, or the derived defaults when none were authored.
///
/// Derivation scans the description for runs that are a single link button: a
/// `command:` target yields `onCommand:<id>`, an `http(s)` target yields `onLink:<url>`.
/// Runs holding several links do not qualify. With nothing derived the step falls back to
/// the implicit `stepSelected` event.
pub fn effective_completion_events(step: &Step) -> Vec<String> {
    if !step.completion_events.is_empty() {
        return step.completion_events.clone();
    }

    let derived: Vec<String> = parse_description(&step.description)
        .iter()
        .filter_map(|run| run.button())
        .filter_map(|link| event_for_link_target(&link.target))
        .collect();

    if derived.is_empty() { vec![STEP_SELECTED_EVENT.to_string()] } else { derived }
}

fn event_for_link_target(target: &str) -> Option<String> {
    if let Some(command) = target.strip_prefix("command:") {
        let command = strip_to_side(command);
        let command = command.split_once('?').map(|(id, _)| id).unwrap_or(command);
        if command.is_empty() {
            return None;
        }
        return Some(format!("onCommand:{command}"));
    }
    if target.starts_with("https://") || target.starts_with("http://") {
        return Some(format!("onLink:{target}"));
    }
    None
}

/// Parses one raw completion event for `step_id`.
pub fn parse_completion_event(raw: &str, step_id: &str) -> Result<ParsedTrigger, CompletionEventError> {
    let (event_type, argument) = raw.split_once(':').unwrap_or((raw, ""));
    let require_argument = || {
        if argument.is_empty() {
            Err(CompletionEventError::MissingArgument { event: raw.to_string() })
        } else {
            Ok(argument.to_string())
        }
    };

    let trigger = match event_type {
        "onCommand" => CompletionTrigger::Command(strip_to_side(&require_argument()?).to_string()),
        "onLink" => CompletionTrigger::Link(require_argument()?),
        "onEvent" => CompletionTrigger::Event(require_argument()?),
        "onView" => CompletionTrigger::View(require_argument()?),
        "onSettingChanged" => CompletionTrigger::SettingChanged(require_argument()?),
        "onContext" => {
            let source = require_argument()?;
            let expression = ContextExpr::parse(&source).map_err(|source_error| CompletionEventError::InvalidContext {
                expression: source.clone(),
                source: source_error,
            })?;
            return Ok(ParsedTrigger {
                trigger: CompletionTrigger::Context(expression.serialize()),
                expression: Some(expression),
            });
        }
        "onStepSelected" | "stepSelected" => CompletionTrigger::StepSelected(step_id.to_string()),
        "onExtensionInstalled" | "extensionInstalled" => CompletionTrigger::ExtensionInstalled(require_argument()?.to_lowercase()),
        other => {
            return Err(CompletionEventError::UnknownType {
                event_type: other.to_string(),
            });
        }
    };

    Ok(ParsedTrigger { trigger, expression: None })
}

/// Parses every effective event of `step`, logging and skipping the ones that fail.
/// Duplicate triggers within a step are collapsed.
pub fn step_triggers(step: &Step) -> Vec<ParsedTrigger> {
    let mut parsed: Vec<ParsedTrigger> = Vec::new();
    for raw in effective_completion_events(step) {
        match parse_completion_event(&raw, &step.id) {
            Ok(trigger) => {
                if !parsed.iter().any(|existing| existing.trigger == trigger.trigger) {
                    parsed.push(trigger);
                }
            }
            Err(error @ CompletionEventError::InvalidContext { .. }) => {
                error!(step = %step.id, event = %raw, error = %error, "Skipping completion event");
            }
            Err(error) => {
                warn!(step = %step.id, event = %raw, error = %error, "Skipping completion event");
            }
        }
    }
    parsed
}

/// Canonicalizes a dispatch key received from the outside world.
///
/// Context keys are re-serialized so that differently spelled but equivalent expressions
/// reach the same listeners.
pub fn trigger_from_key(key: &str) -> Option<CompletionTrigger> {
    match CompletionTrigger::from_key(key) {
        Ok(CompletionTrigger::Context(source)) => match ContextExpr::parse(&source) {
            Ok(expression) => Some(CompletionTrigger::Context(expression.serialize())),
            Err(error) => {
                warn!(key, error = %error, "Ignoring context event with invalid expression");
                None
            }
        },
        Ok(trigger) => Some(trigger),
        Err(error) => {
            warn!(key, error = %error, "Ignoring malformed completion event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guidepost_types::StepMedia;

    fn step(id: &str, description: &str, events: &[&str]) -> Step {
        Step {
            id: id.into(),
            title: id.into(),
            description: description.into(),
            media: StepMedia::Markdown { path: "step.md".into() },
            when: None,
            completion_events: events.iter().map(|event| event.to_string()).collect(),
            order: 0,
            category: "wt".into(),
        }
    }

    fn keys(step: &Step) -> Vec<String> {
        step_triggers(step).into_iter().map(|parsed| parsed.trigger.to_string()).collect()
    }

    #[test]
    fn single_command_button_derives_on_command() {
        let step = step("s", "Open a file.\n[Open](command:workbench.action.files.openFile?%5B%5D)", &[]);
        assert_eq!(keys(&step), vec!["onCommand:workbench.action.files.openFile"]);
    }

    #[test]
    fn single_link_button_derives_on_link() {
        let step = step("s", "[Docs](https://example.com/docs?tab=1)", &[]);
        assert_eq!(keys(&step), vec!["onLink:https://example.com/docs?tab=1"]);
    }

    #[test]
    fn two_links_in_one_run_fall_back_to_step_selected() {
        let step = step("s", "[Open](command:foo) [Docs](https://example.com)", &[]);
        assert_eq!(keys(&step), vec!["stepSelected:s"]);
    }

    #[test]
    fn inline_link_and_other_schemes_do_not_derive() {
        let step = step("s", "See [the docs](command:foo) for more.\n[Mail](mailto:a@example.com)", &[]);
        assert_eq!(keys(&step), vec!["stepSelected:s"]);
    }

    #[test]
    fn to_side_prefix_is_stripped() {
        let derived = step("a", "[Preview](command:toSide:markdown.showPreview)", &[]);
        assert_eq!(keys(&derived), vec!["onCommand:markdown.showPreview"]);

        let authored = step("b", "", &["onCommand:toSide:markdown.showPreview"]);
        assert_eq!(keys(&authored), vec!["onCommand:markdown.showPreview"]);
    }

    #[test]
    fn authored_events_are_normalized() {
        let step = step(
            "wt#s",
            "[Ignored](command:ignored)",
            &[
                "onView:explorer",
                "onSettingChanged:editor.fontSize",
                "onEvent:custom",
                "onStepSelected",
                "stepSelected:anything",
                "onExtensionInstalled:Acme.Linter",
            ],
        );
        assert_eq!(
            keys(&step),
            vec![
                "onView:explorer",
                "onSettingChanged:editor.fontSize",
                "onEvent:custom",
                "stepSelected:wt#s",
                "extensionInstalled:acme.linter",
            ]
        );
    }

    #[test]
    fn context_events_use_canonical_form() {
        let step = step("s", "", &["onContext:b && a"]);
        let parsed = step_triggers(&step);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].trigger, CompletionTrigger::Context("a && b".into()));
        assert!(parsed[0].expression.is_some());
    }

    #[test]
    fn malformed_events_are_skipped_individually() {
        let step = step("s", "", &["onContext:a &&", "onTeleport:x", "onCommand:", "onCommand:ok"]);
        assert_eq!(keys(&step), vec!["onCommand:ok"]);
    }

    #[test]
    fn all_events_skipped_leaves_no_triggers() {
        let step = step("s", "", &["onContext:(broken"]);
        assert!(step_triggers(&step).is_empty());
    }

    #[test]
    fn external_context_keys_are_canonicalized() {
        assert_eq!(trigger_from_key("onContext:z || y"), Some(CompletionTrigger::Context("y || z".into())));
        assert_eq!(trigger_from_key("onContext:(("), None);
        assert_eq!(trigger_from_key("garbage"), None);
    }
}
