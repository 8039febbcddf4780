//! Builds display views and ranks walkthroughs.
//!
//! Everything here is a pure function of a walkthrough, its stored records, the context
//! snapshot, and the current time.

use chrono::{DateTime, Duration, Utc};
use guidepost_types::{ResolvedStep, ResolvedWalkthrough, Walkthrough};
use guidepost_util::{ContextExpr, ContextSnapshot};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::stores::{ProgressStore, WalkthroughMetadata};

/// Days a freshly seen walkthrough counts as new.
pub const RECENCY_WINDOW_DAYS: i64 = 7;

const FEATURED_WEIGHT: f64 = 7.0;
const NEW_ENTRY_WEIGHT: f64 = 3.0;
const NEW_ITEMS_WEIGHT: f64 = 2.0;
const RECENCY_WEIGHT: f64 = 4.0;

fn recency_window() -> Duration {
    Duration::days(RECENCY_WINDOW_DAYS)
}

/// Linear decay from 1 (just seen) to 0 (seen a full window ago or earlier).
pub fn recency_bonus(first_seen: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let window = recency_window().num_milliseconds() as f64;
    let age = (now - first_seen).num_milliseconds() as f64;
    ((window - age) / window).clamp(0.0, 1.0)
}

pub fn is_new_entry(metadata: &WalkthroughMetadata, now: DateTime<Utc>) -> bool {
    now - metadata.first_seen < recency_window() && !metadata.manually_opened
}

/// Whether the step list differs (order included) from the one recorded when last viewed.
pub fn has_new_items(metadata: &WalkthroughMetadata, current_step_ids: &[String]) -> bool {
    metadata
        .step_ids
        .as_ref()
        .is_some_and(|stored| stored.as_slice() != current_step_ids)
}

/// Evaluates an optional `when` expression. Absent or unparseable expressions hold.
pub fn when_holds(when: Option<&str>, snapshot: &ContextSnapshot) -> bool {
    let Some(source) = when.map(str::trim).filter(|source| !source.is_empty()) else {
        return true;
    };
    match ContextExpr::parse(source) {
        Ok(expression) => expression.evaluate(snapshot),
        Err(error) => {
            debug!(when = source, error = %error, "Treating unparseable when clause as true");
            true
        }
    }
}

/// Merges a walkthrough with its progress, metadata and the current context.
pub fn resolve_walkthrough(
    walkthrough: &Walkthrough,
    metadata: Option<&WalkthroughMetadata>,
    progress: &ProgressStore,
    snapshot: &ContextSnapshot,
    now: DateTime<Utc>,
) -> ResolvedWalkthrough {
    let steps = walkthrough
        .sorted_steps()
        .into_iter()
        .map(|step| ResolvedStep {
            step: step.clone(),
            done: progress.is_done(&step.id),
            active: when_holds(step.when.as_deref(), snapshot),
        })
        .collect();

    let (new_entry, new_items, bonus) = match metadata {
        Some(metadata) => (
            is_new_entry(metadata, now),
            has_new_items(metadata, &walkthrough.step_ids()),
            recency_bonus(metadata.first_seen, now),
        ),
        None => (false, false, 0.0),
    };

    ResolvedWalkthrough::new(walkthrough, steps, new_entry, new_items, bonus)
}

/// Rank of a resolved walkthrough; hidden walkthroughs have none.
pub fn rank_walkthrough(walkthrough: &ResolvedWalkthrough, hidden: bool) -> Option<f64> {
    if hidden {
        return None;
    }
    let flag = |set: bool, weight: f64| if set { weight } else { 0.0 };
    Some(
        walkthrough.order as f64
            + flag(walkthrough.is_featured, FEATURED_WEIGHT)
            + flag(walkthrough.new_entry, NEW_ENTRY_WEIGHT)
            + flag(walkthrough.new_items, NEW_ITEMS_WEIGHT)
            + RECENCY_WEIGHT * walkthrough.recency_bonus,
    )
}

/// A walkthrough paired with its rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedWalkthrough {
    pub rank: f64,
    pub walkthrough: ResolvedWalkthrough,
}

/// Drops hidden walkthroughs, sorts the rest by descending rank and keeps the first `limit`.
/// Ties keep their incoming order.
pub fn rank_walkthroughs(
    walkthroughs: Vec<ResolvedWalkthrough>,
    is_hidden: impl Fn(&str) -> bool,
    limit: usize,
) -> Vec<RankedWalkthrough> {
    let mut ranked: Vec<RankedWalkthrough> = walkthroughs
        .into_iter()
        .filter_map(|walkthrough| {
            rank_walkthrough(&walkthrough, is_hidden(&walkthrough.id)).map(|rank| RankedWalkthrough { rank, walkthrough })
        })
        .collect();
    ranked.sort_by(|left, right| right.rank.total_cmp(&left.rank));
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use guidepost_types::{Step, StepMedia};
    use guidepost_util::InMemoryStorage;

    fn walkthrough(id: &str, order: i64, steps: &[(&str, i64, Option<&str>)]) -> Walkthrough {
        Walkthrough {
            id: id.into(),
            title: id.into(),
            description: String::new(),
            icon: None,
            source: "builtin".into(),
            order,
            when: None,
            is_featured: false,
            steps: steps
                .iter()
                .map(|(step_id, step_order, when)| Step {
                    id: step_id.to_string(),
                    title: step_id.to_string(),
                    description: String::new(),
                    media: StepMedia::Markdown { path: "x.md".into() },
                    when: when.map(str::to_string),
                    completion_events: Vec::new(),
                    order: *step_order,
                    category: id.into(),
                })
                .collect(),
        }
    }

    fn metadata(first_seen: DateTime<Utc>, manually_opened: bool, step_ids: Option<&[&str]>) -> WalkthroughMetadata {
        WalkthroughMetadata {
            first_seen,
            manually_opened,
            step_ids: step_ids.map(|ids| ids.iter().map(|id| id.to_string()).collect()),
        }
    }

    #[test]
    fn recency_decays_linearly_and_clamps() {
        let now = Utc::now();
        assert_eq!(recency_bonus(now, now), 1.0);
        let half = recency_bonus(now - Duration::hours(84), now);
        assert!((half - 0.5).abs() < 1e-9);
        assert_eq!(recency_bonus(now - Duration::days(30), now), 0.0);
        assert_eq!(recency_bonus(now + Duration::days(1), now), 1.0);
    }

    #[test]
    fn new_entry_and_new_items_flags() {
        let now = Utc::now();
        assert!(is_new_entry(&metadata(now - Duration::days(1), false, None), now));
        assert!(!is_new_entry(&metadata(now - Duration::days(1), true, None), now));
        assert!(!is_new_entry(&metadata(now - Duration::days(8), false, None), now));

        let current = vec!["a".to_string(), "b".to_string()];
        assert!(!has_new_items(&metadata(now, false, None), &current));
        assert!(!has_new_items(&metadata(now, false, Some(&["a", "b"])), &current));
        assert!(has_new_items(&metadata(now, false, Some(&["b", "a"])), &current));
        assert!(has_new_items(&metadata(now, false, Some(&["a"])), &current));
    }

    #[test]
    fn resolution_sorts_steps_and_counts_active_only() {
        let now = Utc::now();
        let storage = Arc::new(InMemoryStorage::new());
        let mut progress = ProgressStore::load(storage);
        progress.set_done("b", true);
        progress.set_done("c", true);

        let walkthrough = walkthrough("w", 0, &[("a", 2, None), ("b", 1, None), ("c", 0, Some("neverSet"))]);
        let resolved = resolve_walkthrough(&walkthrough, None, &progress, &ContextSnapshot::new(), now);

        let ids: Vec<&str> = resolved.steps.iter().map(|step| step.step.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
        assert_eq!(resolved.steps_total, 2);
        assert_eq!(resolved.steps_complete, 1);
        assert!(!resolved.new_entry);
        assert_eq!(resolved.recency_bonus, 0.0);
    }

    #[test]
    fn unparseable_when_counts_as_true() {
        assert!(when_holds(Some("a &&"), &ContextSnapshot::new()));
        assert!(when_holds(None, &ContextSnapshot::new()));
        assert!(!when_holds(Some("a"), &ContextSnapshot::new()));
    }

    #[test]
    fn ranking_is_monotonic_in_each_flag() {
        let now = Utc::now();
        let storage = Arc::new(InMemoryStorage::new());
        let progress = ProgressStore::load(storage);
        let base = resolve_walkthrough(&walkthrough("w", 3, &[("a", 0, None)]), None, &progress, &ContextSnapshot::new(), now);
        let base_rank = rank_walkthrough(&base, false).unwrap();
        assert_eq!(base_rank, 3.0);

        let featured = ResolvedWalkthrough { is_featured: true, ..base.clone() };
        let new_entry = ResolvedWalkthrough { new_entry: true, ..base.clone() };
        let new_items = ResolvedWalkthrough { new_items: true, ..base.clone() };
        let fresh = ResolvedWalkthrough { recency_bonus: 0.5, ..base.clone() };
        assert_eq!(rank_walkthrough(&featured, false), Some(10.0));
        assert_eq!(rank_walkthrough(&new_entry, false), Some(6.0));
        assert_eq!(rank_walkthrough(&new_items, false), Some(5.0));
        assert_eq!(rank_walkthrough(&fresh, false), Some(5.0));
        assert_eq!(rank_walkthrough(&featured, true), None);
    }

    #[test]
    fn rank_walkthroughs_sorts_filters_and_truncates() {
        let now = Utc::now();
        let progress = ProgressStore::load(Arc::new(InMemoryStorage::new()));
        let snapshot = ContextSnapshot::new();
        let views = vec![
            resolve_walkthrough(&walkthrough("low", 1, &[]), None, &progress, &snapshot, now),
            resolve_walkthrough(&walkthrough("high", 9, &[]), None, &progress, &snapshot, now),
            resolve_walkthrough(&walkthrough("hidden", 50, &[]), None, &progress, &snapshot, now),
            resolve_walkthrough(&walkthrough("mid", 5, &[]), None, &progress, &snapshot, now),
        ];

        let ranked = rank_walkthroughs(views, |id| id == "hidden", 2);
        let ids: Vec<&str> = ranked.iter().map(|entry| entry.walkthrough.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid"]);
    }
}
