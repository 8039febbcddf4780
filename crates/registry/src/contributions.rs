//! Walkthroughs contributed by plugins.
//!
//! Plugins describe walkthroughs in their manifest using paths relative to their install
//! location. This adapter qualifies ids with the plugin id, rebases media onto the install
//! location, and tracks what each plugin registered so it can be removed on uninstall.
//! Failures are logged per walkthrough and never reach the plugin host.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use guidepost_types::{CompletionTrigger, StepDescriptor, StepMedia, ThemedPath, WalkthroughDescriptor};
use guidepost_util::resolve_resource;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::errors::RegistryError;
use crate::registry::WalkthroughRegistry;

/// The walkthrough section of a plugin manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionContribution {
    /// Plugin identifier (`publisher.name`).
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Install location media paths are resolved against.
    pub location: PathBuf,
    #[serde(default)]
    pub walkthroughs: Vec<ContributedWalkthrough>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContributedWalkthrough {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub when: Option<String>,
    #[serde(default)]
    pub featured_for: Vec<String>,
    #[serde(default)]
    pub steps: Vec<ContributedStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContributedStep {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub media: Option<ContributedMedia>,
    #[serde(default)]
    pub when: Option<String>,
    #[serde(default)]
    pub completion_events: Vec<String>,
}

/// Manifest media: exactly one of `image`, `svg`, `markdown`, `video` is expected.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContributedMedia {
    #[serde(default)]
    pub image: Option<ThemedPath>,
    #[serde(default)]
    pub svg: Option<ThemedPath>,
    #[serde(default)]
    pub markdown: Option<String>,
    #[serde(default)]
    pub video: Option<ThemedPath>,
    #[serde(default)]
    pub poster: Option<ThemedPath>,
    #[serde(default)]
    pub alt_text: Option<String>,
}

/// Why a contributed walkthrough was not registered.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ContributionError {
    #[error("step '{step_id}' of walkthrough '{walkthrough_id}' declares no media")]
    MissingMedia { walkthrough_id: String, step_id: String },

    #[error("step '{step_id}' of walkthrough '{walkthrough_id}' has an unsupported media shape")]
    UnsupportedMedia { walkthrough_id: String, step_id: String },

    #[error(transparent)]
    Registration(#[from] RegistryError),
}

impl ContributedMedia {
    /// The first declared media kind, with paths still relative to the plugin.
    fn to_step_media(&self, fallback_alt: &str) -> Option<StepMedia> {
        let alt_text = || self.alt_text.clone().unwrap_or_else(|| fallback_alt.to_string());
        if let Some(image) = &self.image {
            return Some(StepMedia::Image {
                path: image.clone(),
                alt_text: alt_text(),
            });
        }
        if let Some(svg) = &self.svg {
            return Some(StepMedia::Svg {
                path: svg.clone(),
                alt_text: alt_text(),
            });
        }
        if let Some(markdown) = &self.markdown {
            return Some(StepMedia::Markdown { path: markdown.clone() });
        }
        self.video.as_ref().map(|video| StepMedia::Video {
            path: video.clone(),
            poster: self.poster.clone(),
            alt_text: self.alt_text.clone(),
        })
    }
}

/// `<plugin>#<walkthrough>`
pub fn qualified_walkthrough_id(extension_id: &str, walkthrough_id: &str) -> String {
    format!("{extension_id}#{walkthrough_id}")
}

/// `<plugin>#<walkthrough>#<step>`
pub fn qualified_step_id(extension_id: &str, walkthrough_id: &str, step_id: &str) -> String {
    format!("{extension_id}#{walkthrough_id}#{step_id}")
}

/// Converts one contributed walkthrough into a registrable descriptor.
pub fn build_descriptor(
    contribution: &ExtensionContribution,
    walkthrough: &ContributedWalkthrough,
) -> Result<WalkthroughDescriptor, ContributionError> {
    let walkthrough_id = qualified_walkthrough_id(&contribution.id, &walkthrough.id);
    let steps = walkthrough
        .steps
        .iter()
        .enumerate()
        .map(|(index, step)| {
            let media = step.media.as_ref().ok_or_else(|| ContributionError::MissingMedia {
                walkthrough_id: walkthrough_id.clone(),
                step_id: step.id.clone(),
            })?;
            let media = media
                .to_step_media(&step.title)
                .ok_or_else(|| ContributionError::UnsupportedMedia {
                    walkthrough_id: walkthrough_id.clone(),
                    step_id: step.id.clone(),
                })?
                .map_paths(|path| resolve_resource(&contribution.location, path));
            Ok(StepDescriptor {
                id: qualified_step_id(&contribution.id, &walkthrough.id, &step.id),
                title: step.title.clone(),
                description: step.description.clone(),
                media: Some(media),
                when: step.when.clone(),
                completion_events: step.completion_events.clone(),
                order: Some(index as i64),
            })
        })
        .collect::<Result<Vec<_>, ContributionError>>()?;

    Ok(WalkthroughDescriptor {
        id: walkthrough_id,
        title: walkthrough.title.clone(),
        description: walkthrough.description.clone(),
        icon: walkthrough
            .icon
            .as_ref()
            .map(|icon| resolve_resource(&contribution.location, icon)),
        source: contribution.display_name.clone().unwrap_or_else(|| contribution.id.clone()),
        order: 0,
        when: walkthrough.when.clone(),
        is_featured: false,
        featured_for: walkthrough.featured_for.clone(),
        steps,
    })
}

/// What one installed plugin has registered, or is still registering.
#[derive(Debug)]
struct Contributed {
    /// Changes each time the plugin is uninstalled and installed again.
    generation: u64,
    walkthroughs: Vec<String>,
}

/// Registers and unregisters plugin walkthroughs as plugins come and go.
///
/// Walkthrough ids are recorded before their registration awaits anything, so an uninstall
/// that lands mid-registration still removes them once they commit.
pub struct ExtensionWalkthroughs {
    registry: Arc<WalkthroughRegistry>,
    contributed: Mutex<HashMap<String, Contributed>>,
    next_generation: AtomicU64,
}

impl ExtensionWalkthroughs {
    pub fn new(registry: Arc<WalkthroughRegistry>) -> Self {
        Self {
            registry,
            contributed: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    fn contributed(&self) -> MutexGuard<'_, HashMap<String, Contributed>> {
        self.contributed.lock().expect("contribution lock poisoned")
    }

    /// Registers every walkthrough the plugin contributes. Returns the ids that were
    /// registered; the rest were logged and skipped.
    pub async fn register_extension(&self, contribution: &ExtensionContribution) -> Vec<String> {
        let generation = self
            .contributed()
            .entry(contribution.id.clone())
            .or_insert_with(|| Contributed {
                generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
                walkthroughs: Vec::new(),
            })
            .generation;

        let mut registered = Vec::new();
        for walkthrough in &contribution.walkthroughs {
            match self.register_one(contribution, walkthrough, generation).await {
                Ok(Some(id)) => registered.push(id),
                Ok(None) => {}
                Err(error) => {
                    error!(extension = %contribution.id, walkthrough = %walkthrough.id, error = %error, "Skipping contributed walkthrough");
                }
            }
        }

        let mut contributed = self.contributed();
        if let Some(entry) = contributed.get(&contribution.id)
            && entry.generation == generation
            && entry.walkthroughs.is_empty()
        {
            contributed.remove(&contribution.id);
        }
        drop(contributed);

        if !registered.is_empty() {
            info!(extension = %contribution.id, walkthroughs = registered.len(), "Registered extension walkthroughs");
        }
        registered
    }

    async fn register_one(
        &self,
        contribution: &ExtensionContribution,
        walkthrough: &ContributedWalkthrough,
        generation: u64,
    ) -> Result<Option<String>, ContributionError> {
        let descriptor = build_descriptor(contribution, walkthrough)?;
        let id = descriptor.id.clone();
        if self.registry.contains_walkthrough(&id) {
            warn!(walkthrough = %id, "Walkthrough contributed twice; keeping the first");
            return Ok(None);
        }

        match self.contributed().get_mut(&contribution.id) {
            Some(entry) if entry.generation == generation => entry.walkthroughs.push(id.clone()),
            _ => {
                debug!(extension = %contribution.id, walkthrough = %id, "Extension removed before registration started");
                return Ok(None);
            }
        }

        if let Err(error) = self.registry.register_walkthrough(descriptor).await {
            self.forget(&contribution.id, generation, &id);
            return Err(error.into());
        }

        if self.is_tracked(&contribution.id, generation, &id) {
            return Ok(Some(id));
        }
        info!(extension = %contribution.id, walkthrough = %id, "Extension removed while registering; unregistering walkthrough");
        self.registry.unregister_walkthrough(&id);
        Ok(None)
    }

    fn is_tracked(&self, extension_id: &str, generation: u64, walkthrough_id: &str) -> bool {
        self.contributed()
            .get(extension_id)
            .is_some_and(|entry| entry.generation == generation && entry.walkthroughs.iter().any(|id| id == walkthrough_id))
    }

    fn forget(&self, extension_id: &str, generation: u64, walkthrough_id: &str) {
        if let Some(entry) = self.contributed().get_mut(extension_id)
            && entry.generation == generation
        {
            entry.walkthroughs.retain(|id| id != walkthrough_id);
        }
    }

    /// Unregisters everything the plugin contributed. Returns the removed ids. Walkthroughs
    /// still registering are removed when their registration commits.
    pub fn unregister_extension(&self, extension_id: &str) -> Vec<String> {
        let ids = self
            .contributed()
            .remove(extension_id)
            .map(|entry| entry.walkthroughs)
            .unwrap_or_default();
        ids.into_iter().filter(|id| self.registry.unregister_walkthrough(id)).collect()
    }

    /// Handles a plugin that finished installing during this session: registers its
    /// walkthroughs, delivers `extensionInstalled:<id>`, and asks for the first
    /// walkthrough to open when `openOnInstall` is enabled.
    pub async fn extension_installed(&self, contribution: &ExtensionContribution) -> Vec<String> {
        let registered = self.register_extension(contribution).await;
        self.registry
            .progress_by_trigger(&CompletionTrigger::ExtensionInstalled(contribution.id.to_lowercase()));

        if self.registry.config().open_on_install
            && let Some(first) = registered.first()
        {
            info!(extension = %contribution.id, walkthrough = %first, "Requesting walkthrough open after install");
            self.registry.request_open(first);
        }
        registered
    }

    /// Walkthrough ids registered, or registering, on behalf of `extension_id`.
    pub fn contributed_by(&self, extension_id: &str) -> Vec<String> {
        self.contributed()
            .get(extension_id)
            .map(|entry| entry.walkthroughs.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contribution() -> ExtensionContribution {
        serde_json::from_value(serde_json::json!({
            "id": "acme.linter",
            "displayName": "Acme Linter",
            "location": "/plugins/acme",
            "walkthroughs": [{
                "id": "setup",
                "title": "Set up Acme",
                "icon": "media/icon.png",
                "steps": [
                    { "id": "install", "title": "Install", "media": { "image": { "light": "media/l.png", "dark": "media/d.png", "hc": "media/h.png", "hcLight": "media/hl.png" } } },
                    { "id": "docs", "title": "Docs", "media": { "markdown": "./media/docs.md" }, "completionEvents": ["onLink:https://acme.dev"] }
                ]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn descriptors_are_qualified_and_rebased() {
        let contribution = contribution();
        let descriptor = build_descriptor(&contribution, &contribution.walkthroughs[0]).unwrap();

        assert_eq!(descriptor.id, "acme.linter#setup");
        assert_eq!(descriptor.source, "Acme Linter");
        assert_eq!(descriptor.icon.as_deref(), Some("/plugins/acme/media/icon.png"));
        assert_eq!(descriptor.steps[0].id, "acme.linter#setup#install");
        assert_eq!(descriptor.steps[1].order, Some(1));
        match descriptor.steps[0].media.as_ref().unwrap() {
            StepMedia::Image { path, alt_text } => {
                assert_eq!(path.for_theme(guidepost_types::ThemeKind::Dark), "/plugins/acme/media/d.png");
                assert_eq!(alt_text, "Install");
            }
            other => panic!("unexpected media {other:?}"),
        }
        assert_eq!(
            descriptor.steps[1].media,
            Some(StepMedia::Markdown {
                path: "/plugins/acme/media/docs.md".into()
            })
        );
    }

    #[test]
    fn missing_or_empty_media_is_rejected() {
        let mut contribution = contribution();
        contribution.walkthroughs[0].steps[1].media = Some(ContributedMedia::default());
        let error = build_descriptor(&contribution, &contribution.walkthroughs[0]).unwrap_err();
        assert!(matches!(error, ContributionError::UnsupportedMedia { .. }));

        contribution.walkthroughs[0].steps[1].media = None;
        let error = build_descriptor(&contribution, &contribution.walkthroughs[0]).unwrap_err();
        assert_eq!(
            error,
            ContributionError::MissingMedia {
                walkthrough_id: "acme.linter#setup".into(),
                step_id: "docs".into()
            }
        );
    }
}
