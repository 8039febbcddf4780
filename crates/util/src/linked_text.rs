//! Parsing of step descriptions into linked text runs.
//!
//! A description is split into runs, one per non-empty line. Each run is a sequence of
//! plain text and `[label](target "title")` link nodes. A run consisting of a single link
//! node is rendered as a button by the host.

use once_cell::sync::Lazy;
use regex::Regex;

static LINK_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\[([^\]]*)\]\(\s*([^\s)]+)(?:\s+"([^"]*)")?\s*\)"#).expect("valid link regex"));

/// A link embedded in a description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub label: String,
    pub target: String,
    pub title: Option<String>,
}

/// One piece of a linked text run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkedTextNode {
    Text(String),
    Link(Link),
}

/// A single line of a description.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinkedText {
    pub nodes: Vec<LinkedTextNode>,
}

impl LinkedText {
    /// The link when this run is a lone button, i.e. exactly one node which is a link.
    pub fn button(&self) -> Option<&Link> {
        match self.nodes.as_slice() {
            [LinkedTextNode::Link(link)] => Some(link),
            _ => None,
        }
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.nodes.iter().filter_map(|node| match node {
            LinkedTextNode::Link(link) => Some(link),
            LinkedTextNode::Text(_) => None,
        })
    }
}

/// Splits `description` into runs, one per non-blank line.
pub fn parse_description(description: &str) -> Vec<LinkedText> {
    description
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_linked_text)
        .collect()
}

/// Parses a single line into text and link nodes. Whitespace-only text between links is dropped.
pub fn parse_linked_text(line: &str) -> LinkedText {
    let mut nodes = Vec::new();
    let mut cursor = 0usize;

    for captures in LINK_PATTERN.captures_iter(line) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        push_text(&mut nodes, &line[cursor..whole.start()]);
        nodes.push(LinkedTextNode::Link(Link {
            label: captures.get(1).map(|m| m.as_str().to_string()).unwrap_or_default(),
            target: captures.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
            title: captures.get(3).map(|m| m.as_str().to_string()),
        }));
        cursor = whole.end();
    }
    push_text(&mut nodes, &line[cursor..]);

    LinkedText { nodes }
}

fn push_text(nodes: &mut Vec<LinkedTextNode>, text: &str) {
    if !text.trim().is_empty() {
        nodes.push(LinkedTextNode::Text(text.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lone_link_is_a_button() {
        let runs = parse_description("Pick a theme you like.\n\n[Browse themes](command:workbench.action.selectTheme)\n");
        assert_eq!(runs.len(), 2);
        assert!(runs[0].button().is_none());
        let button = runs[1].button().expect("button");
        assert_eq!(button.label, "Browse themes");
        assert_eq!(button.target, "command:workbench.action.selectTheme");
    }

    #[test]
    fn text_with_inline_link_is_not_a_button() {
        let run = parse_linked_text("Read the [docs](https://example.com/docs) first.");
        assert_eq!(run.nodes.len(), 3);
        assert!(run.button().is_none());
        assert_eq!(run.links().count(), 1);
    }

    #[test]
    fn two_links_in_one_run_are_not_a_button() {
        let run = parse_linked_text("[Open](command:a) [Docs](https://example.com)");
        assert_eq!(run.nodes.len(), 2);
        assert!(run.button().is_none());
    }

    #[test]
    fn link_titles_are_captured() {
        let run = parse_linked_text(r#"[Run](command:tasks.run "Run the build task")"#);
        let button = run.button().expect("button");
        assert_eq!(button.title.as_deref(), Some("Run the build task"));
    }
}
