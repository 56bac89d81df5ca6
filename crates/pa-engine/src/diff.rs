//! Set-difference planning for the hot user path.
//!
//! The user loop never mirrors the whole list into the core; it applies
//! exactly the membership changes between the previous and the new user
//! generation, keyed by (inbound tag, email). Identical generations
//! therefore plan zero operations.

use pa_types::{RateLimit, User};
use std::collections::{BTreeMap, BTreeSet};

/// Planned hot mutations for one user-list transition.
#[derive(Debug, Default, PartialEq)]
pub struct MembershipDiff {
    /// (inbound tag, email) pairs to remove.
    pub removed: Vec<(String, String)>,
    /// (inbound tag, user) pairs to add.
    pub added: Vec<(String, User)>,
}

impl MembershipDiff {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

/// Compute per-inbound membership changes between two user generations.
pub fn diff_memberships(old: &[User], new: &[User]) -> MembershipDiff {
    let old_members = membership_index(old);
    let new_members = membership_index(new);

    let mut diff = MembershipDiff::default();

    for (tag, emails) in &old_members {
        let kept = new_members.get(*tag);
        for email in emails.keys() {
            if !kept.is_some_and(|m| m.contains_key(email)) {
                diff.removed.push((tag.to_string(), email.to_string()));
            }
        }
    }

    for (tag, users) in &new_members {
        let prior = old_members.get(*tag);
        for (email, user) in users {
            if !prior.is_some_and(|m| m.contains_key(email)) {
                diff.added.push((tag.to_string(), (*user).clone()));
            }
        }
    }

    diff
}

fn membership_index(users: &[User]) -> BTreeMap<&str, BTreeMap<&str, &User>> {
    let mut index: BTreeMap<&str, BTreeMap<&str, &User>> = BTreeMap::new();
    for user in users {
        for tag in &user.inbound_tags {
            index.entry(tag.as_str()).or_default().insert(&user.email, user);
        }
    }
    index
}

/// Planned rate-limit mutations for one transition.
#[derive(Debug, Default, PartialEq)]
pub struct RateLimitDiff {
    /// Limits to apply: new emails and emails whose caps changed.
    pub set: Vec<RateLimit>,
    /// Emails whose limits disappeared.
    pub removed: Vec<String>,
}

impl RateLimitDiff {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.removed.is_empty()
    }
}

pub fn diff_rate_limits(old: &[RateLimit], new: &[RateLimit]) -> RateLimitDiff {
    let old_by_email: BTreeMap<&str, &RateLimit> =
        old.iter().map(|rl| (rl.email.as_str(), rl)).collect();
    let new_emails: BTreeSet<&str> = new.iter().map(|rl| rl.email.as_str()).collect();

    let mut diff = RateLimitDiff::default();

    for rl in old {
        if !new_emails.contains(rl.email.as_str()) {
            diff.removed.push(rl.email.clone());
        }
    }

    for rl in new {
        let changed = match old_by_email.get(rl.email.as_str()) {
            Some(prev) => {
                prev.upload_bytes_per_sec != rl.upload_bytes_per_sec
                    || prev.download_bytes_per_sec != rl.download_bytes_per_sec
            }
            None => true,
        };
        if changed {
            diff.set.push(rl.clone());
        }
    }

    diff
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(email: &str, tags: &[&str]) -> User {
        User {
            email: email.into(),
            uuid: Some("3b4e2f1a-0c6d-4c58-9d2e-7f8a9b0c1d2e".into()),
            inbound_tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    fn limit(email: &str, up: i64, down: i64) -> RateLimit {
        RateLimit {
            email: email.into(),
            upload_bytes_per_sec: up,
            download_bytes_per_sec: down,
        }
    }

    #[test]
    fn identical_generations_plan_nothing() {
        let users = vec![user("a@x", &["in0"]), user("b@x", &["in0", "in1"])];
        assert!(diff_memberships(&users, &users).is_empty());
    }

    #[test]
    fn added_user_is_planned_once_per_inbound() {
        let old = vec![user("a@x", &["in0"])];
        let new = vec![user("a@x", &["in0"]), user("b@x", &["in0", "in1"])];
        let diff = diff_memberships(&old, &new);
        assert!(diff.removed.is_empty());
        let added: Vec<(&str, &str)> = diff
            .added
            .iter()
            .map(|(tag, u)| (tag.as_str(), u.email.as_str()))
            .collect();
        assert_eq!(added, vec![("in0", "b@x"), ("in1", "b@x")]);
    }

    #[test]
    fn dropped_user_is_removed_everywhere() {
        let old = vec![user("a@x", &["in0", "in1"])];
        let diff = diff_memberships(&old, &[]);
        assert_eq!(
            diff.removed,
            vec![
                ("in0".to_string(), "a@x".to_string()),
                ("in1".to_string(), "a@x".to_string())
            ]
        );
        assert!(diff.added.is_empty());
    }

    #[test]
    fn tag_migration_removes_and_adds() {
        let old = vec![user("a@x", &["in0"])];
        let new = vec![user("a@x", &["in1"])];
        let diff = diff_memberships(&old, &new);
        assert_eq!(diff.removed, vec![("in0".to_string(), "a@x".to_string())]);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].0, "in1");
    }

    #[test]
    fn credential_change_alone_is_not_a_membership_change() {
        // The hot path only tracks membership; a rotated password flows
        // through the next cold materialization.
        let old = vec![user("a@x", &["in0"])];
        let mut changed = user("a@x", &["in0"]);
        changed.password = Some("rotated".into());
        assert!(diff_memberships(&old, &[changed]).is_empty());
    }

    #[test]
    fn rate_limits_diff_on_value_changes() {
        let old = vec![limit("a@x", 100, 200), limit("b@x", 0, 0), limit("c@x", 5, 5)];
        let new = vec![limit("a@x", 100, 200), limit("b@x", 10, 0), limit("d@x", 1, 1)];
        let diff = diff_rate_limits(&old, &new);

        assert_eq!(diff.removed, vec!["c@x".to_string()]);
        let set: Vec<&str> = diff.set.iter().map(|rl| rl.email.as_str()).collect();
        assert_eq!(set, vec!["b@x", "d@x"]);
    }

    #[test]
    fn identical_rate_limits_plan_nothing() {
        let limits = vec![limit("a@x", 1, 2)];
        assert!(diff_rate_limits(&limits, &limits).is_empty());
    }
}
