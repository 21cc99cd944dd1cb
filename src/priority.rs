use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::github::IssueSummary;

/// Priority classes for backlog issues, derived from `priority:` labels.
/// Higher base points sort earlier in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityClass {
    None = 0,
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl PriorityClass {
    /// Determine the class from issue labels. The canonical family is
    /// `priority:critical|high|medium|low`; the legacy `priority:P0..P3`
    /// convention is coerced on read. The highest class present wins.
    pub fn from_labels(labels: &[impl AsRef<str>]) -> Self {
        let mut highest = PriorityClass::None;
        for label in labels {
            let class = match label.as_ref() {
                "priority:critical" | "priority:P0" => PriorityClass::Critical,
                "priority:high" | "priority:P1" => PriorityClass::High,
                "priority:medium" | "priority:P2" => PriorityClass::Medium,
                "priority:low" | "priority:P3" => PriorityClass::Low,
                _ => continue,
            };
            if class > highest {
                highest = class;
            }
        }
        highest
    }

    /// Parse a user-supplied priority name, accepting both families.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "critical" | "p0" => Some(PriorityClass::Critical),
            "high" | "p1" => Some(PriorityClass::High),
            "medium" | "p2" => Some(PriorityClass::Medium),
            "low" | "p3" => Some(PriorityClass::Low),
            _ => None,
        }
    }

    pub fn base_points(self) -> f64 {
        match self {
            PriorityClass::Critical => 1000.0,
            PriorityClass::High => 100.0,
            PriorityClass::Medium => 10.0,
            PriorityClass::Low => 1.0,
            PriorityClass::None => 0.0,
        }
    }

    /// Canonical label name, if the class carries one.
    pub fn label(self) -> Option<&'static str> {
        match self {
            PriorityClass::Critical => Some("priority:critical"),
            PriorityClass::High => Some("priority:high"),
            PriorityClass::Medium => Some("priority:medium"),
            PriorityClass::Low => Some("priority:low"),
            PriorityClass::None => None,
        }
    }
}

impl fmt::Display for PriorityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PriorityClass::Critical => "critical",
            PriorityClass::High => "high",
            PriorityClass::Medium => "medium",
            PriorityClass::Low => "low",
            PriorityClass::None => "none",
        };
        write!(f, "{name}")
    }
}

/// Breakdown of an issue's computed priority. Pure function of its inputs:
/// same labels, creation date, relationships, and wall-clock day always
/// produce the same total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityScore {
    pub issue_number: u64,
    pub base_points: f64,
    pub age_bonus: f64,
    pub blocking_multiplier: f64,
    pub blocked_penalty: f64,
    pub total: f64,
}

/// Maximum age bonus: one point per whole day, saturating at 30.
const AGE_BONUS_CAP: i64 = 30;

/// Compute the deterministic priority score for an issue.
///
/// `total = (base + age_bonus) * blocking_multiplier * blocked_penalty`
pub fn calculate_score(
    issue: &IssueSummary,
    has_open_parent: bool,
    now: DateTime<Utc>,
) -> PriorityScore {
    let base_points = PriorityClass::from_labels(&issue.labels).base_points();

    let age_days = (now - issue.created_at).num_days().clamp(0, AGE_BONUS_CAP);
    let age_bonus = age_days as f64;

    let blocks_others = issue.has_label("blocking") || issue.has_label("blocker");
    let blocking_multiplier = if blocks_others { 1.5 } else { 1.0 };
    let blocked_penalty = if has_open_parent { 0.1 } else { 1.0 };

    PriorityScore {
        issue_number: issue.number,
        base_points,
        age_bonus,
        blocking_multiplier,
        blocked_penalty,
        total: (base_points + age_bonus) * blocking_multiplier * blocked_penalty,
    }
}

/// Candidate filters applied before scoring, in fixed order: in-progress
/// issues drop first, then assigned issues, then the include set narrows,
/// then the exclude set narrows. Order-preserving and idempotent.
#[derive(Debug, Clone, Default)]
pub struct BacklogFilter {
    pub include_types: Option<Vec<String>>,
    pub exclude_types: Option<Vec<String>>,
}

pub fn apply_filters(issues: &[IssueSummary], filter: &BacklogFilter) -> Vec<IssueSummary> {
    issues
        .iter()
        .filter(|issue| !issue.has_label("status:in-progress"))
        .filter(|issue| issue.assignees.is_empty())
        .filter(|issue| match &filter.include_types {
            Some(include) => issue
                .label_value("type:")
                .map(|t| include.iter().any(|i| i == t))
                .unwrap_or(false),
            None => true,
        })
        .filter(|issue| match &filter.exclude_types {
            Some(exclude) => issue
                .label_value("type:")
                .map(|t| !exclude.iter().any(|e| e == t))
                .unwrap_or(true),
            None => true,
        })
        .cloned()
        .collect()
}

/// Order scored candidates: descending total, ties broken by ascending issue
/// number so older issues go first. Produces a total order on any set.
pub fn rank(scored: &mut [(IssueSummary, PriorityScore)]) {
    scored.sort_by(|(_, a), (_, b)| {
        b.total
            .partial_cmp(&a.total)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.issue_number.cmp(&b.issue_number))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn issue(number: u64, labels: &[&str], age_days: i64) -> IssueSummary {
        let created = Utc::now() - Duration::days(age_days);
        IssueSummary {
            number,
            title: format!("issue {number}"),
            body: None,
            state: "open".to_string(),
            created_at: created,
            updated_at: created,
            labels: labels.iter().map(|s| s.to_string()).collect(),
            assignees: vec![],
            html_url: format!("https://github.com/o/r/issues/{number}"),
        }
    }

    #[test]
    fn class_from_canonical_labels() {
        assert_eq!(
            PriorityClass::from_labels(&["priority:critical"]),
            PriorityClass::Critical
        );
        assert_eq!(
            PriorityClass::from_labels(&["priority:low"]),
            PriorityClass::Low
        );
        assert_eq!(PriorityClass::from_labels(&["type:bug"]), PriorityClass::None);
    }

    #[test]
    fn legacy_family_is_coerced() {
        assert_eq!(
            PriorityClass::from_labels(&["priority:P0"]),
            PriorityClass::Critical
        );
        assert_eq!(
            PriorityClass::from_labels(&["priority:P2"]),
            PriorityClass::Medium
        );
        assert_eq!(PriorityClass::parse("P1"), Some(PriorityClass::High));
        assert_eq!(PriorityClass::parse("high"), Some(PriorityClass::High));
    }

    #[test]
    fn highest_class_wins() {
        assert_eq!(
            PriorityClass::from_labels(&["priority:low", "priority:critical"]),
            PriorityClass::Critical
        );
    }

    #[test]
    fn score_is_pure() {
        let now = Utc::now();
        let i = issue(42, &["priority:high"], 5);
        let a = calculate_score(&i, false, now);
        let b = calculate_score(&i, false, now);
        assert_eq!(a, b);
        assert_eq!(a.total, 105.0);
    }

    #[test]
    fn age_bonus_saturates_at_thirty() {
        let now = Utc::now();
        let old = issue(1, &["priority:low"], 400);
        let score = calculate_score(&old, false, now);
        assert_eq!(score.age_bonus, 30.0);
        assert_eq!(score.total, 31.0);
    }

    #[test]
    fn blocking_multiplier_applies() {
        let now = Utc::now();
        let i = issue(2, &["priority:medium", "blocking"], 0);
        let score = calculate_score(&i, false, now);
        assert_eq!(score.blocking_multiplier, 1.5);
        assert_eq!(score.total, 15.0);
    }

    #[test]
    fn blocked_penalty_shrinks_priority_below_lower_class() {
        // High-priority blocked issue loses to a medium unblocked one.
        let now = Utc::now();
        let blocked = calculate_score(&issue(45, &["priority:high"], 0), true, now);
        let medium = calculate_score(&issue(48, &["priority:medium"], 4), false, now);
        assert_eq!(blocked.total, 10.0);
        assert_eq!(medium.total, 14.0);
        assert!(medium.total > blocked.total);
    }

    #[test]
    fn filters_drop_in_progress_and_assigned() {
        let mut assigned = issue(3, &["priority:high"], 0);
        assigned.assignees.push("someone".to_string());
        let input = vec![
            issue(1, &["status:in-progress", "priority:high"], 0),
            issue(2, &["priority:low"], 0),
            assigned,
        ];
        let filter = BacklogFilter::default();
        let kept = apply_filters(&input, &filter);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].number, 2);
    }

    #[test]
    fn filters_preserve_order_and_are_idempotent() {
        let input = vec![
            issue(5, &["type:bug"], 0),
            issue(3, &["type:feature"], 0),
            issue(9, &["type:bug"], 0),
        ];
        let filter = BacklogFilter {
            include_types: Some(vec!["bug".to_string()]),
            exclude_types: None,
        };
        let once = apply_filters(&input, &filter);
        let numbers: Vec<u64> = once.iter().map(|i| i.number).collect();
        assert_eq!(numbers, vec![5, 9]);
        let twice = apply_filters(&once, &filter);
        assert_eq!(once.len(), twice.len());
    }

    #[test]
    fn include_requires_type_label() {
        let untyped = issue(7, &["priority:high"], 0);
        let filter = BacklogFilter {
            include_types: Some(vec!["bug".to_string()]),
            exclude_types: None,
        };
        assert!(apply_filters(&[untyped], &filter).is_empty());
    }

    #[test]
    fn exclude_drops_matching_types() {
        let input = vec![issue(1, &["type:chore"], 0), issue(2, &["type:bug"], 0)];
        let filter = BacklogFilter {
            include_types: None,
            exclude_types: Some(vec!["chore".to_string()]),
        };
        let kept = apply_filters(&input, &filter);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].number, 2);
    }

    #[test]
    fn rank_breaks_ties_by_issue_number() {
        let now = Utc::now();
        let a = issue(42, &["priority:high"], 5);
        let b = issue(41, &["priority:high"], 5);
        let mut scored = vec![
            (a.clone(), calculate_score(&a, false, now)),
            (b.clone(), calculate_score(&b, false, now)),
        ];
        rank(&mut scored);
        assert_eq!(scored[0].0.number, 41);
    }

    #[test]
    fn rank_orders_by_descending_total() {
        // Scenario from the deterministic-pick contract: older same-priority
        // issue scores higher and goes first.
        let now = Utc::now();
        let newer = issue(42, &["priority:high"], 5);
        let older = issue(41, &["priority:high"], 7);
        let mut scored = vec![
            (newer.clone(), calculate_score(&newer, false, now)),
            (older.clone(), calculate_score(&older, false, now)),
        ];
        rank(&mut scored);
        assert_eq!(scored[0].0.number, 41);
        assert_eq!(scored[0].1.total, 107.0);
        assert_eq!(scored[1].1.total, 105.0);
    }
}
