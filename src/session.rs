//! Rule table session: the row registry, its selection cursor and the edit
//! lock, kept together so handlers get one object to work against.
//!
//! Two operating modes share the same rows. In bulk mode rows are checked and
//! batch actions run over the check-set. In edit mode exactly one row is open
//! for editing, every other row is disabled, the check-set is empty and the
//! cursor is frozen on the edited row.
//!
//! Access tables keep the group's grants on the rows themselves. There the
//! check-set marks rows with unsaved changes and is rebuilt from the grants
//! whenever edit mode ends, so entering edit never loses a grant.

use crate::command::{BatchItem, RuleUpdate};
use crate::cursor::{ScrollBand, SelectionCursor};
use crate::registry::{RowDetail, RowId, RowRegistry, RuleRow};

#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    registry: RowRegistry,
    cursor: SelectionCursor,
    band: ScrollBand,
    editing: Option<RowId>,
}

impl RuleTable {
    pub fn new(rows: Vec<RuleRow>) -> Self {
        let mut table = Self {
            registry: RowRegistry::new(rows),
            ..Self::default()
        };
        table.cursor.sync_len(table.registry.len());
        table
    }

    pub fn registry(&self) -> &RowRegistry {
        &self.registry
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor.position()
    }

    pub fn cursor_row(&self) -> Option<&RuleRow> {
        self.cursor.position().and_then(|pos| self.registry.get(pos))
    }

    pub fn editing(&self) -> Option<&RowId> {
        self.editing.as_ref()
    }

    pub fn is_editing(&self) -> bool {
        self.editing.is_some()
    }

    pub fn editing_row(&self) -> Option<&RuleRow> {
        self.editing.as_ref().and_then(|id| self.registry.row(id))
    }

    /// `j`/`k`. Frozen while a row is being edited.
    pub fn move_cursor(&mut self, delta: isize) -> bool {
        if self.editing.is_some() {
            return false;
        }
        self.cursor.move_by(delta, self.registry.len())
    }

    /// `x`. Flips the row under the cursor and returns whether the batch
    /// trigger is now enabled. On an access row this flips the grant instead.
    pub fn toggle_checked(&mut self) -> bool {
        if self.editing.is_none()
            && let Some(id) = self.cursor_row().map(|row| row.id.clone())
            && self.registry.toggle_granted(&id).is_none()
        {
            self.registry.toggle_checked(&id);
        }
        self.registry.mark_unsaved_access();
        self.trigger_enabled()
    }

    pub fn trigger_enabled(&self) -> bool {
        self.editing.is_none() && self.registry.has_checked()
    }

    /// Takes the edit lock for `id`. Refused while another row holds it.
    pub fn enter_edit(&mut self, id: &RowId) -> bool {
        if let Some(current) = &self.editing {
            return current == id;
        }
        let Some(index) = self.registry.position(id) else {
            return false;
        };
        self.registry.clear_checks();
        self.registry.enable_only(id);
        self.cursor.jump_to(index, self.registry.len());
        self.editing = Some(id.clone());
        true
    }

    pub fn enter_edit_at_cursor(&mut self) -> bool {
        match self.cursor_row().map(|row| row.id.clone()) {
            Some(id) => self.enter_edit(&id),
            None => false,
        }
    }

    pub fn exit_edit(&mut self) -> Option<RowId> {
        self.registry.enable_all();
        self.registry.mark_unsaved_access();
        self.editing.take()
    }

    /// Sets a row's comment. Disabled rows are left alone.
    pub fn set_comment(&mut self, id: &RowId, comment: &str) -> bool {
        match self.registry.row_mut(id) {
            Some(row) if row.enabled => {
                row.comment = comment.to_string();
                true
            }
            _ => false,
        }
    }

    /// Folds an acknowledged rule edit back into its row.
    pub fn apply_update(&mut self, update: &RuleUpdate) -> bool {
        let Some(row) = self.registry.row_mut(&update.id) else {
            return false;
        };
        row.comment = update.comment.clone();
        row.detail = RowDetail::Rule {
            kind: update.kind,
            value: update.value.clone(),
            action: update.action,
        };
        true
    }

    /// The check-set in registry order, each id paired with its comment.
    pub fn checked_items(&self) -> Vec<BatchItem> {
        self.registry
            .checked()
            .map(|row| BatchItem {
                id: row.id.clone(),
                aux: row.comment.clone(),
            })
            .collect()
    }

    /// Every granted access row in registry order. An access save sends the
    /// whole set, so rows without unsaved changes are included too.
    pub fn access_items(&self) -> Vec<BatchItem> {
        self.registry
            .rows()
            .iter()
            .filter(|row| row.is_granted())
            .map(|row| BatchItem {
                id: row.id.clone(),
                aux: row.comment.clone(),
            })
            .collect()
    }

    /// Takes an acknowledged access save as the new saved state. Rows changed
    /// after the request went out stay marked.
    pub fn commit_access(&mut self, sent: &[BatchItem]) {
        self.registry.commit_access(sent);
        if self.editing.is_none() {
            self.registry.mark_unsaved_access();
        }
    }

    pub fn remove_rows(&mut self, ids: &[RowId]) -> usize {
        if self.editing.as_ref().is_some_and(|id| ids.contains(id)) {
            self.exit_edit();
        }
        let removed = self.registry.remove(ids);
        self.cursor.sync_len(self.registry.len());
        removed
    }

    /// Scrolls the cursor row into the visible band. Returns the top row.
    pub fn follow_cursor(&mut self, viewport: usize) -> usize {
        self.band
            .follow(self.cursor.position(), self.registry.len(), viewport)
    }

    #[cfg(test)]
    fn invariants_hold(&self) -> bool {
        let cursor_ok = match self.cursor.position() {
            Some(pos) => pos < self.registry.len(),
            None => self.registry.is_empty(),
        };
        let edit_ok = match &self.editing {
            Some(id) => {
                !self.registry.has_checked()
                    && self
                        .registry
                        .rows()
                        .iter()
                        .all(|row| row.enabled == (&row.id == id))
            }
            None => self.registry.rows().iter().all(|row| row.enabled),
        };
        cursor_ok && edit_ok
    }
}
