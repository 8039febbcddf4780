//! Display-ready views derived from a walkthrough, its progress, and its metadata.
//!
//! Nothing here is stored; the registry builds these on demand.

use serde::{Deserialize, Serialize};

use crate::walkthrough::{Step, Walkthrough};

/// Derived lifecycle state of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepStatus {
    /// The step's `when` expression is currently false.
    Inactive,
    /// Active and not yet done.
    Pending,
    /// Progressed.
    Done,
}

/// A step merged with its live progress and visibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedStep {
    #[serde(flatten)]
    pub step: Step,
    pub done: bool,
    /// Whether the step's `when` expression currently holds.
    pub active: bool,
}

impl ResolvedStep {
    pub fn status(&self) -> StepStatus {
        if !self.active {
            StepStatus::Inactive
        } else if self.done {
            StepStatus::Done
        } else {
            StepStatus::Pending
        }
    }
}

/// A walkthrough ready for presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedWalkthrough {
    pub id: String,
    pub title: String,
    pub description: String,
    pub icon: Option<String>,
    pub source: String,
    pub order: i64,
    pub is_featured: bool,
    /// Steps sorted by their `order` key.
    pub steps: Vec<ResolvedStep>,
    /// Active steps that are done.
    pub steps_complete: usize,
    /// Active steps.
    pub steps_total: usize,
    /// First seen within the recency window and never opened manually.
    pub new_entry: bool,
    /// The step set changed since it was last viewed.
    pub new_items: bool,
    /// Linearly decayed freshness score in `[0, 1]`. Ranking input only.
    pub recency_bonus: f64,
}

impl ResolvedWalkthrough {
    /// Assembles the view from its already-resolved parts.
    pub fn new(walkthrough: &Walkthrough, steps: Vec<ResolvedStep>, new_entry: bool, new_items: bool, recency_bonus: f64) -> Self {
        let steps_total = steps.iter().filter(|step| step.active).count();
        let steps_complete = steps.iter().filter(|step| step.active && step.done).count();
        Self {
            id: walkthrough.id.clone(),
            title: walkthrough.title.clone(),
            description: walkthrough.description.clone(),
            icon: walkthrough.icon.clone(),
            source: walkthrough.source.clone(),
            order: walkthrough.order,
            is_featured: walkthrough.is_featured,
            steps,
            steps_complete,
            steps_total,
            new_entry,
            new_items,
            recency_bonus,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.steps_total > 0 && self.steps_complete == self.steps_total
    }
}
