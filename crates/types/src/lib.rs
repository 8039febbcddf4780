//! Shared type definitions for the Guidepost walkthrough engine.
//!
//! - **`walkthrough`**: authoring descriptors and the runtime `Walkthrough` / `Step` records
//! - **`trigger`**: the closed `CompletionTrigger` dispatch key
//! - **`view`**: resolved, display-ready views

pub mod trigger;
pub mod view;
pub mod walkthrough;

pub use trigger::{CompletionTrigger, TriggerKeyError};
pub use view::{ResolvedStep, ResolvedWalkthrough, StepStatus};
pub use walkthrough::{Step, StepDescriptor, StepMedia, ThemeKind, ThemedPath, Walkthrough, WalkthroughDescriptor};
