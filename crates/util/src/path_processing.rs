use std::path::{Path, PathBuf};

use dirs_next::home_dir;
use url::Url;

/// Expands a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    let p = path.trim();
    if p == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = p.strip_prefix("~/") {
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    if let Some(rest) = p.strip_prefix("~\\") {
        // Windows-style
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    PathBuf::from(p)
}

/// Resolves a resource reference against a plugin's install location.
///
/// Absolute paths and URLs with a scheme (`https:`, `data:`, ...) are returned unchanged.
pub fn resolve_resource(base: &Path, reference: &str) -> String {
    let reference = reference.trim();
    if Url::parse(reference).is_ok_and(|url| url.scheme().len() > 1) {
        return reference.to_string();
    }
    let relative = reference.strip_prefix("./").unwrap_or(reference);
    if Path::new(relative).is_absolute() {
        return relative.to_string();
    }
    base.join(relative).to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_resources_join_the_base() {
        let base = Path::new("/plugins/acme");
        assert_eq!(resolve_resource(base, "./media/a.png"), "/plugins/acme/media/a.png");
        assert_eq!(resolve_resource(base, "media/b.md"), "/plugins/acme/media/b.md");
    }

    #[test]
    fn absolute_paths_and_urls_are_kept() {
        let base = Path::new("/plugins/acme");
        assert_eq!(resolve_resource(base, "/opt/shared.svg"), "/opt/shared.svg");
        assert_eq!(resolve_resource(base, "https://example.com/x.png"), "https://example.com/x.png");
    }
}
