//! Strongly typed walkthrough definitions shared across the registry, storage, and CLI.
//!
//! Two layers live here. Descriptors (`WalkthroughDescriptor`, `StepDescriptor`) are the
//! declarative authoring form read from built-in catalogs and plugin manifests. Runtime
//! records (`Walkthrough`, `Step`) are what the registry stores once a descriptor has been
//! accepted: ids are final, steps carry their owning walkthrough id, and ordering is fixed.

use serde::{Deserialize, Serialize};

/// Declarative description of one walkthrough as authored in a catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WalkthroughDescriptor {
    /// Walkthrough identifier, unique across the registry.
    pub id: String,
    /// Title shown in the walkthrough list.
    pub title: String,
    /// Short description rendered under the title.
    #[serde(default)]
    pub description: String,
    /// Optional icon identifier or path.
    #[serde(default)]
    pub icon: Option<String>,
    /// Attribution string (for example, the contributing plugin's display name).
    #[serde(default)]
    pub source: String,
    /// Base ordering / ranking value.
    #[serde(default)]
    pub order: i64,
    /// Visibility context expression for the whole walkthrough.
    #[serde(default)]
    pub when: Option<String>,
    /// Whether the walkthrough is featured regardless of workspace contents.
    #[serde(default)]
    pub is_featured: bool,
    /// Workspace file globs that mark the walkthrough as featured when any file matches.
    #[serde(default)]
    pub featured_for: Vec<String>,
    /// Steps in authoring order.
    #[serde(default)]
    pub steps: Vec<StepDescriptor>,
}

/// Declarative description of a single step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepDescriptor {
    /// Final step identifier.
    pub id: String,
    /// Step title.
    pub title: String,
    /// Rich text with embedded `[label](target)` links.
    #[serde(default)]
    pub description: String,
    /// Media rendered beside the step. Required; a missing value is an authoring error.
    #[serde(default)]
    pub media: Option<StepMedia>,
    /// Context expression gating whether the step is active.
    #[serde(default)]
    pub when: Option<String>,
    /// Raw completion trigger strings such as `onCommand:foo`.
    #[serde(default)]
    pub completion_events: Vec<String>,
    /// Explicit sort key. Defaults to the authoring index.
    #[serde(default)]
    pub order: Option<i64>,
}

/// Media attached to a step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StepMedia {
    /// Raster image with theme variants.
    #[serde(rename_all = "camelCase")]
    Image { path: ThemedPath, alt_text: String },
    /// Inline SVG with theme variants.
    #[serde(rename_all = "camelCase")]
    Svg { path: ThemedPath, alt_text: String },
    /// Markdown document rendered in place of an image.
    #[serde(rename_all = "camelCase")]
    Markdown { path: String },
    /// Video with an optional poster frame.
    #[serde(rename_all = "camelCase")]
    Video {
        path: ThemedPath,
        #[serde(default)]
        poster: Option<ThemedPath>,
        #[serde(default)]
        alt_text: Option<String>,
    },
}

impl StepMedia {
    /// Returns a copy with every resource location passed through `rebase`.
    pub fn map_paths(&self, rebase: impl Fn(&str) -> String) -> StepMedia {
        match self {
            StepMedia::Image { path, alt_text } => StepMedia::Image {
                path: path.map(&rebase),
                alt_text: alt_text.clone(),
            },
            StepMedia::Svg { path, alt_text } => StepMedia::Svg {
                path: path.map(&rebase),
                alt_text: alt_text.clone(),
            },
            StepMedia::Markdown { path } => StepMedia::Markdown { path: rebase(path.as_str()) },
            StepMedia::Video { path, poster, alt_text } => StepMedia::Video {
                path: path.map(&rebase),
                poster: poster.as_ref().map(|poster| poster.map(&rebase)),
                alt_text: alt_text.clone(),
            },
        }
    }
}

/// Color theme families a resource can vary by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ThemeKind {
    Light,
    Dark,
    HighContrast,
    HighContrastLight,
}

/// A resource location that is either shared by every theme or varies per theme.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ThemedPath {
    /// One path used for all themes.
    Uniform(String),
    /// Distinct paths per theme family.
    Themed {
        light: String,
        dark: String,
        hc: String,
        #[serde(rename = "hcLight")]
        hc_light: String,
    },
}

impl ThemedPath {
    /// Picks the location used when rendering under `theme`.
    pub fn for_theme(&self, theme: ThemeKind) -> &str {
        match self {
            ThemedPath::Uniform(path) => path,
            ThemedPath::Themed { light, dark, hc, hc_light } => match theme {
                ThemeKind::Light => light,
                ThemeKind::Dark => dark,
                ThemeKind::HighContrast => hc,
                ThemeKind::HighContrastLight => hc_light,
            },
        }
    }

    pub fn map(&self, rebase: impl Fn(&str) -> String) -> ThemedPath {
        match self {
            ThemedPath::Uniform(path) => ThemedPath::Uniform(rebase(path.as_str())),
            ThemedPath::Themed { light, dark, hc, hc_light } => ThemedPath::Themed {
                light: rebase(light.as_str()),
                dark: rebase(dark.as_str()),
                hc: rebase(hc.as_str()),
                hc_light: rebase(hc_light.as_str()),
            },
        }
    }
}

/// A walkthrough accepted by the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Walkthrough {
    pub id: String,
    pub title: String,
    pub description: String,
    pub icon: Option<String>,
    pub source: String,
    pub order: i64,
    /// Effective visibility expression (after any experiment override).
    pub when: Option<String>,
    /// Featured flag, resolved once at registration.
    pub is_featured: bool,
    /// Steps in authoring order.
    pub steps: Vec<Step>,
}

impl Walkthrough {
    /// Step identifiers in authoring order.
    pub fn step_ids(&self) -> Vec<String> {
        self.steps.iter().map(|step| step.id.clone()).collect()
    }

    /// Steps re-sorted by their `order` key. The sort is stable, so ties keep authoring order.
    pub fn sorted_steps(&self) -> Vec<&Step> {
        let mut steps: Vec<&Step> = self.steps.iter().collect();
        steps.sort_by_key(|step| step.order);
        steps
    }
}

/// A step accepted by the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    pub title: String,
    pub description: String,
    pub media: StepMedia,
    pub when: Option<String>,
    /// Raw completion events as authored (possibly empty).
    pub completion_events: Vec<String>,
    pub order: i64,
    /// Owning walkthrough id.
    pub category: String,
}

impl Step {
    /// Builds a runtime step from its descriptor. Fails when the descriptor has no media.
    pub fn from_descriptor(descriptor: &StepDescriptor, category: &str, index: usize) -> Option<Step> {
        let media = descriptor.media.clone()?;
        Some(Step {
            id: descriptor.id.clone(),
            title: descriptor.title.clone(),
            description: descriptor.description.clone(),
            media,
            when: descriptor.when.clone(),
            completion_events: descriptor.completion_events.clone(),
            order: descriptor.order.unwrap_or(index as i64),
            category: category.to_string(),
        })
    }
}
