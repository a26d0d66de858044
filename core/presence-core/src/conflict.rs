//! Role-conflict detection across live sessions.
//!
//! Two live sessions conflict when their roles are not declared mutually
//! compatible. Compatibility is a table, not logic: the same role is always
//! compatible with itself, and a deployment enumerates everything else —
//! either a *universal* role (a base role compatible with every other, e.g.
//! a plain viewer) or an explicit unordered pair. Nothing beyond the table
//! is assumed.
//!
//! Detection is pure and advisory: it never mutates shared state and never
//! blocks a sign-in. The facade surfaces a non-empty conflict list for the
//! user to acknowledge or act on.

use std::collections::BTreeSet;

use crate::health::ActiveSession;

/// Declarative role-compatibility whitelist.
#[derive(Debug, Clone, Default)]
pub struct RolePolicy {
    universal: BTreeSet<String>,
    pairs: BTreeSet<(String, String)>,
}

impl RolePolicy {
    /// A policy with only the inherent same-role rule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `role` compatible with every other role.
    pub fn allow_universal(mut self, role: impl Into<String>) -> Self {
        self.universal.insert(role.into());
        self
    }

    /// Declares `a` and `b` mutually compatible (symmetric).
    pub fn allow_pair(mut self, a: impl Into<String>, b: impl Into<String>) -> Self {
        self.pairs.insert(ordered(a.into(), b.into()));
        self
    }

    /// Whether two roles may coexist without an advisory.
    pub fn compatible(&self, a: &str, b: &str) -> bool {
        a == b
            || self.universal.contains(a)
            || self.universal.contains(b)
            || self
                .pairs
                .contains(&ordered(a.to_string(), b.to_string()))
    }
}

fn ordered(a: String, b: String) -> (String, String) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Live peers split by compatibility with the caller's role.
#[derive(Debug, Clone, Default)]
pub struct ConflictReport {
    pub compatible: Vec<ActiveSession>,
    pub conflicting: Vec<ActiveSession>,
}

impl ConflictReport {
    pub fn is_clear(&self) -> bool {
        self.conflicting.is_empty()
    }
}

/// Partitions the caller's live peers into compatible and conflicting.
///
/// The caller's own entry is skipped. Peers without a role carry no identity
/// to conflict with and land in the compatible bucket; a caller without a
/// role conflicts with nothing.
pub fn partition(
    own_role: Option<&str>,
    sessions: &[ActiveSession],
    policy: &RolePolicy,
) -> ConflictReport {
    let mut report = ConflictReport::default();
    for session in sessions {
        if session.is_self {
            continue;
        }
        let conflicting = match (own_role, session.record.role.as_deref()) {
            (Some(mine), Some(theirs)) => !policy.compatible(mine, theirs),
            _ => false,
        };
        if conflicting {
            report.conflicting.push(session.clone());
        } else {
            report.compatible.push(session.clone());
        }
    }
    report
}
