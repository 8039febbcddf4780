//! Walkthrough catalogs: the embedded built-in set and descriptor files loaded from disk.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use guidepost_types::WalkthroughDescriptor;
use serde::{Deserialize, Serialize};

const BUILTIN_CATALOG: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/builtin_walkthroughs.yaml"));

/// A catalog document: `walkthroughs:` followed by descriptors.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CatalogDocument {
    #[serde(default)]
    pub walkthroughs: Vec<WalkthroughDescriptor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogFormat {
    Yaml,
    Json,
}

impl CatalogFormat {
    /// Infers the format from a file extension. Anything that is not `.json` is YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|extension| extension.to_str()) {
            Some(extension) if extension.eq_ignore_ascii_case("json") => CatalogFormat::Json,
            _ => CatalogFormat::Yaml,
        }
    }
}

/// Descriptors of the walkthroughs compiled into the engine.
pub fn builtin_walkthroughs() -> Result<Vec<WalkthroughDescriptor>> {
    parse_catalog(BUILTIN_CATALOG, CatalogFormat::Yaml).context("parse built-in walkthrough catalog")
}

/// Parses catalog text. A bare list of descriptors is accepted as well as a document.
pub fn parse_catalog(content: &str, format: CatalogFormat) -> Result<Vec<WalkthroughDescriptor>> {
    let value: serde_json::Value = match format {
        CatalogFormat::Yaml => serde_yaml::from_str(content).map_err(|error| anyhow!(format_yaml_error(error)))?,
        CatalogFormat::Json => serde_json::from_str(content).map_err(|error| anyhow!(format_json_error(error)))?,
    };
    if value.is_array() {
        return serde_json::from_value(value).context("parse walkthrough list");
    }
    let document: CatalogDocument = serde_json::from_value(value).context("parse walkthrough catalog")?;
    Ok(document.walkthroughs)
}

/// Reads a catalog file, choosing the format from its extension.
pub fn load_catalog_file(path: &Path) -> Result<Vec<WalkthroughDescriptor>> {
    let content = std::fs::read_to_string(path).with_context(|| format!("read catalog {}", path.display()))?;
    parse_catalog(&content, CatalogFormat::from_path(path)).with_context(|| format!("load catalog {}", path.display()))
}

fn format_yaml_error(error: serde_yaml::Error) -> String {
    if let Some(location) = error.location() {
        return format!(
            "parse yaml catalog at line {}, column {}: {}",
            location.line(),
            location.column(),
            error
        );
    }
    format!("parse yaml catalog: {error}")
}

fn format_json_error(error: serde_json::Error) -> String {
    format!("parse json catalog at line {}, column {}: {}", error.line(), error.column(), error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use guidepost_types::StepMedia;
    use tempfile::tempdir;

    #[test]
    fn builtin_catalog_has_unique_ids_and_media() {
        let walkthroughs = builtin_walkthroughs().expect("load built-in catalog");
        assert!(!walkthroughs.is_empty());

        let mut step_ids = HashSet::new();
        for walkthrough in &walkthroughs {
            for step in &walkthrough.steps {
                assert!(step.media.is_some(), "step {} has no media", step.id);
                assert!(step_ids.insert(step.id.clone()), "duplicate step id {}", step.id);
            }
        }
    }

    #[test]
    fn builtin_media_variants_parse() {
        let walkthroughs = builtin_walkthroughs().unwrap();
        let debugging = walkthroughs
            .iter()
            .flat_map(|walkthrough| &walkthrough.steps)
            .find(|step| step.id == "debugging")
            .unwrap();
        assert!(matches!(debugging.media, Some(StepMedia::Video { poster: Some(_), .. })));
    }

    #[test]
    fn json_list_files_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("extra.json");
        std::fs::write(
            &path,
            r#"[{"id":"extra","title":"Extra","steps":[{"id":"one","title":"One","media":{"kind":"markdown","path":"one.md"}}]}]"#,
        )
        .unwrap();

        let walkthroughs = load_catalog_file(&path).unwrap();
        assert_eq!(walkthroughs.len(), 1);
        assert_eq!(walkthroughs[0].steps[0].id, "one");
    }

    #[test]
    fn yaml_errors_carry_location() {
        let error = parse_catalog("walkthroughs: [", CatalogFormat::Yaml).unwrap_err();
        assert!(error.to_string().contains("parse yaml catalog"));
    }
}
