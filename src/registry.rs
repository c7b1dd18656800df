use std::fmt;

use serde::Deserialize;

use crate::command::{BatchItem, RuleAction, RuleKind};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
pub struct RowId(String);

impl RowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowDetail {
    Rule {
        kind: RuleKind,
        value: String,
        action: RuleAction,
    },
    /// One ACL in a group's access table. `granted` is what the user wants;
    /// `saved` is what the server last acknowledged.
    Acl {
        name: String,
        granted: bool,
        saved: AccessBaseline,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessBaseline {
    pub granted: bool,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleRow {
    pub id: RowId,
    pub detail: RowDetail,
    pub checked: bool,
    pub enabled: bool,
    pub comment: String,
}

impl RuleRow {
    pub fn rule(
        id: impl Into<String>,
        kind: RuleKind,
        value: impl Into<String>,
        action: RuleAction,
        comment: impl Into<String>,
    ) -> Self {
        Self {
            id: RowId::new(id),
            detail: RowDetail::Rule {
                kind,
                value: value.into(),
                action,
            },
            checked: false,
            enabled: true,
            comment: comment.into(),
        }
    }

    pub fn acl(
        id: impl Into<String>,
        name: impl Into<String>,
        comment: impl Into<String>,
        granted: bool,
    ) -> Self {
        let comment = comment.into();
        Self {
            id: RowId::new(id),
            detail: RowDetail::Acl {
                name: name.into(),
                granted,
                saved: AccessBaseline {
                    granted,
                    comment: comment.clone(),
                },
            },
            checked: false,
            enabled: true,
            comment,
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self.detail, RowDetail::Acl { granted: true, .. })
    }

    /// Access rows whose grant or comment differs from the saved state.
    pub fn has_unsaved_access(&self) -> bool {
        match &self.detail {
            RowDetail::Acl { granted, saved, .. } => {
                *granted != saved.granted || self.comment != saved.comment
            }
            RowDetail::Rule { .. } => false,
        }
    }
}

/// Ordered rule rows. Display position is the index into this list; the
/// check-set is the set of rows with `checked` set.
#[derive(Debug, Clone, Default)]
pub struct RowRegistry {
    rows: Vec<RuleRow>,
}

impl RowRegistry {
    pub fn new(rows: Vec<RuleRow>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[RuleRow] {
        &self.rows
    }

    pub fn get(&self, index: usize) -> Option<&RuleRow> {
        self.rows.get(index)
    }

    pub fn position(&self, id: &RowId) -> Option<usize> {
        self.rows.iter().position(|row| &row.id == id)
    }

    pub fn row(&self, id: &RowId) -> Option<&RuleRow> {
        self.rows.iter().find(|row| &row.id == id)
    }

    pub fn row_mut(&mut self, id: &RowId) -> Option<&mut RuleRow> {
        self.rows.iter_mut().find(|row| &row.id == id)
    }

    /// Checked rows in registry order, regardless of the order they were checked in.
    pub fn checked(&self) -> impl Iterator<Item = &RuleRow> {
        self.rows.iter().filter(|row| row.checked)
    }

    pub fn checked_count(&self) -> usize {
        self.checked().count()
    }

    pub fn has_checked(&self) -> bool {
        self.rows.iter().any(|row| row.checked)
    }

    pub fn toggle_checked(&mut self, id: &RowId) -> Option<bool> {
        let row = self.row_mut(id)?;
        row.checked = !row.checked;
        Some(row.checked)
    }

    pub fn clear_checks(&mut self) {
        for row in &mut self.rows {
            row.checked = false;
        }
    }

    pub fn toggle_granted(&mut self, id: &RowId) -> Option<bool> {
        match &mut self.row_mut(id)?.detail {
            RowDetail::Acl { granted, .. } => {
                *granted = !*granted;
                Some(*granted)
            }
            RowDetail::Rule { .. } => None,
        }
    }

    /// In an access table the check-set is the set of rows with unsaved
    /// changes. Rule rows keep their checks.
    pub fn mark_unsaved_access(&mut self) {
        for row in &mut self.rows {
            if matches!(row.detail, RowDetail::Acl { .. }) {
                row.checked = row.has_unsaved_access();
            }
        }
    }

    /// Records an acknowledged access save. The server replaces the group's
    /// access with exactly `sent`, so every other row is now saved as not granted.
    pub fn commit_access(&mut self, sent: &[BatchItem]) {
        for row in &mut self.rows {
            let RowDetail::Acl { saved, .. } = &mut row.detail else {
                continue;
            };
            match sent.iter().find(|item| item.id == row.id) {
                Some(item) => {
                    saved.granted = true;
                    saved.comment = item.aux.clone();
                }
                None => saved.granted = false,
            }
        }
    }

    pub fn enable_all(&mut self) {
        for row in &mut self.rows {
            row.enabled = true;
        }
    }

    pub fn enable_only(&mut self, id: &RowId) {
        for row in &mut self.rows {
            row.enabled = &row.id == id;
        }
    }

    /// Drops every row whose id is listed and returns how many went away.
    pub fn remove(&mut self, ids: &[RowId]) -> usize {
        let before = self.rows.len();
        self.rows.retain(|row| !ids.contains(&row.id));
        before - self.rows.len()
    }
}
