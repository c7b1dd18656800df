//! Batch command dispatcher.
//!
//! A batch request is a snapshot taken when the user confirms: the check-set
//! for a move or delete, the group's full grant set for an access save.
//! Local rows change only once the server has acknowledged that exact
//! request; a failed request leaves the table as it was.

use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::command::{BatchAction, BatchRequest, CreateRule, CreatedRule, RuleAction, RuleUpdate};
use crate::envelope::{Backend, Envelope, RequestError};
use crate::session::RuleTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("No rows checked")]
    NothingChecked,
    #[error("No unsaved changes")]
    NothingToSave,
    #[error("Finish editing the open row first")]
    EditInProgress,
    #[error("Another batch action is still running")]
    Busy,
}

/// What happened to the table after a batch request resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Removed(usize),
    Saved(usize),
}

#[derive(Debug, Default)]
pub struct Dispatcher {
    pending: bool,
}

impl Dispatcher {
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Snapshots the check-set for `action`. Only one batch may be
    /// outstanding at a time.
    pub fn prepare(
        &mut self,
        table: &RuleTable,
        action: BatchAction,
    ) -> Result<BatchRequest, DispatchError> {
        if self.pending {
            return Err(DispatchError::Busy);
        }
        if table.is_editing() {
            return Err(DispatchError::EditInProgress);
        }
        let items = match &action {
            BatchAction::Save { .. } => {
                if !table.trigger_enabled() {
                    return Err(DispatchError::NothingToSave);
                }
                table.access_items()
            }
            BatchAction::Move { .. } | BatchAction::Delete => {
                let items = table.checked_items();
                if items.is_empty() {
                    return Err(DispatchError::NothingChecked);
                }
                items
            }
        };
        self.pending = true;
        Ok(BatchRequest { action, items })
    }

    /// Applies the server's answer to `request`.
    pub fn finish(
        &mut self,
        table: &mut RuleTable,
        request: &BatchRequest,
        result: &Result<Value, RequestError>,
    ) -> Option<BatchOutcome> {
        self.pending = false;
        if result.is_err() {
            return None;
        }
        if request.action.removes_rows() {
            let removed = table.remove_rows(&request.ids());
            info!(action = request.action.label(), removed, "batch applied");
            Some(BatchOutcome::Removed(removed))
        } else {
            table.commit_access(&request.items);
            info!(action = request.action.label(), rows = request.items.len(), "batch saved");
            Some(BatchOutcome::Saved(request.items.len()))
        }
    }
}

pub async fn execute<B: Backend>(
    envelope: &Envelope<B>,
    request: &BatchRequest,
) -> Result<Value, RequestError> {
    envelope.post(&request.path(), request.form()).await
}

/// Quick action from the tail: a single-rule create. Returns the new rule id.
pub async fn create_rule<B: Backend>(
    envelope: &Envelope<B>,
    command: &CreateRule,
    action: RuleAction,
) -> Result<String, RequestError> {
    let reply = envelope.post(CreateRule::PATH, command.form(action)).await?;
    let created: CreatedRule = serde_json::from_value(reply)
        .map_err(|err| RequestError::Unknown(format!("unexpected reply to rule create: {}", err)))?;
    Ok(created.rule)
}

pub async fn save_rule<B: Backend>(
    envelope: &Envelope<B>,
    update: &RuleUpdate,
) -> Result<(), RequestError> {
    envelope.post(&update.path(), update.form()).await.map(|_| ())
}
