//! Application state: the tail, the rule table and the glue that turns key
//! presses into local transitions or background requests.
//!
//! Everything here runs on the UI task. Requests run as spawned tasks and
//! come back as a [`Completion`]; nothing touches the table until then.

use std::future::Future;
use std::time::{Duration, Instant};

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::widgets::TableState;
use tokio::sync::mpsc::UnboundedSender;

use crate::clipboard::copy_text_via_osc52;
use crate::command::{BatchAction, BatchRequest, CreateRule, RuleAction, RuleUpdate};
use crate::dispatch::{BatchOutcome, Dispatcher, create_rule, execute, save_rule};
use crate::envelope::{Backend, Envelope, ErrorLink, RequestError};
use crate::event::{LogEvent, decode_backlog};
use crate::registry::{RowDetail, RowId};
use crate::session::RuleTable;
use crate::snapshot::{Destination, Hydration, TableKind};
use crate::tail::Tail;
use crate::transport::{Connector, TransportEvent, TransportMessage};

const BACKLOG_PATH: &str = "/ajax/tail-log";
const STATUS_LIFETIME: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Focus {
    #[default]
    Tail,
    Rules,
}

impl Focus {
    fn next(self) -> Self {
        match self {
            Self::Tail => Self::Rules,
            Self::Rules => Self::Tail,
        }
    }
}

/// A finished background request, handed back to the UI task.
#[derive(Debug)]
pub enum Completion {
    Batch {
        request: BatchRequest,
        result: Result<serde_json::Value, RequestError>,
    },
    RuleCreated {
        command: CreateRule,
        action: RuleAction,
        result: Result<String, RequestError>,
    },
    RuleSaved {
        update: RuleUpdate,
        result: Result<(), RequestError>,
    },
    Backlog {
        result: Result<Vec<LogEvent>, RequestError>,
    },
}

/// Contents of the error window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub title: String,
    pub message: String,
    pub links: Vec<ErrorLink>,
}

impl From<&RequestError> for ErrorReport {
    fn from(err: &RequestError) -> Self {
        Self {
            title: err.title().to_string(),
            message: err.message(),
            links: err.links().to_vec(),
        }
    }
}

/// Field values of the row being edited, applied on save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditDraft {
    pub id: RowId,
    pub comment: String,
    pub action: Option<RuleAction>,
    /// Save sent, waiting for the server.
    pub pending: bool,
}

pub struct App<C, B> {
    pub(crate) tail: Tail<C>,
    pub(crate) table: RuleTable,
    pub(crate) kind: Option<TableKind>,
    dispatcher: Dispatcher,
    envelope: Envelope<B>,
    completions: UnboundedSender<Completion>,
    pub(crate) focus: Focus,
    pub(crate) rule_action: RuleAction,
    destination: usize,
    pub(crate) draft: Option<EditDraft>,
    pub(crate) error: Option<ErrorReport>,
    pub(crate) status: String,
    status_snapshot: String,
    status_since: Option<Instant>,
    poll_interval: Option<Duration>,
    last_poll: Instant,
    pub(crate) tail_state: TableState,
    pub(crate) rules_state: TableState,
}

impl<C: Connector, B: Backend> App<C, B> {
    pub fn new(
        tail: Tail<C>,
        hydration: Option<Hydration>,
        envelope: Envelope<B>,
        completions: UnboundedSender<Completion>,
        rule_action: RuleAction,
        poll_interval: Option<Duration>,
    ) -> Self {
        let (kind, rows) = match hydration {
            Some(hydration) => (Some(hydration.kind), hydration.rows),
            None => (None, Vec::new()),
        };
        Self {
            tail,
            table: RuleTable::new(rows),
            kind,
            dispatcher: Dispatcher::default(),
            envelope,
            completions,
            focus: Focus::Tail,
            rule_action,
            destination: 0,
            draft: None,
            error: None,
            status: String::new(),
            status_snapshot: String::new(),
            status_since: None,
            poll_interval,
            last_poll: Instant::now(),
            tail_state: TableState::default(),
            rules_state: TableState::default(),
        }
    }

    pub fn start(&mut self) {
        self.tail.start();
        if !self.tail.is_push() {
            self.refresh();
        }
    }

    /// Returns `true` when the user asked to quit.
    pub fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.kind != KeyEventKind::Press {
            return false;
        }
        if key.modifiers.contains(KeyModifiers::CONTROL)
            && matches!(key.code, KeyCode::Char('c') | KeyCode::Char('C'))
        {
            return true;
        }
        if self.error.is_some() {
            if matches!(key.code, KeyCode::Esc | KeyCode::Enter) {
                self.error = None;
            }
            return false;
        }
        if self.draft.is_some() {
            self.handle_edit_key(key.code);
            return false;
        }
        match key.code {
            KeyCode::Char('q') => return true,
            KeyCode::Tab => self.focus = self.focus.next(),
            code => match self.focus {
                Focus::Tail => self.handle_tail_key(code),
                Focus::Rules => self.handle_rules_key(code),
            },
        }
        false
    }

    fn handle_tail_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Down | KeyCode::Char('j') => {
                self.tail.view_mut().move_cursor(1);
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.tail.view_mut().move_cursor(-1);
            }
            KeyCode::Char('1') => self.quick_action("Domain"),
            KeyCode::Char('2') => self.quick_action("Host"),
            KeyCode::Char('3') => self.quick_action("Path"),
            KeyCode::Char('p') => self.toggle_pause(),
            KeyCode::Char('r') => self.refresh(),
            KeyCode::Char('c') => {
                self.tail.clear();
                self.status = "Cleared tail".to_string();
            }
            KeyCode::Char('a') => {
                self.rule_action = self.rule_action.next();
                self.status = format!("New rules will {}", self.rule_action.as_str());
            }
            KeyCode::Char('y') => self.copy_selected_url(),
            _ => {}
        }
    }

    fn handle_rules_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Down | KeyCode::Char('j') => {
                self.table.move_cursor(1);
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.table.move_cursor(-1);
            }
            KeyCode::Char('x') | KeyCode::Char(' ') => {
                self.table.toggle_checked();
            }
            KeyCode::Enter => self.start_edit(),
            KeyCode::Char(',') => self.cycle_destination(false),
            KeyCode::Char('.') => self.cycle_destination(true),
            KeyCode::Char('m') => self.submit_move(),
            KeyCode::Char('d') => self.submit_delete(),
            KeyCode::Char('s') => self.submit_save(),
            _ => {}
        }
    }

    fn handle_edit_key(&mut self, code: KeyCode) {
        let Some(draft) = self.draft.as_mut() else {
            return;
        };
        if draft.pending {
            return;
        }
        match code {
            KeyCode::Esc => self.cancel_edit(),
            KeyCode::Enter => self.save_edit(),
            KeyCode::Tab => {
                if let Some(action) = draft.action.as_mut() {
                    *action = action.next();
                }
            }
            KeyCode::Backspace => {
                draft.comment.pop();
            }
            KeyCode::Char(c) => draft.comment.push(c),
            _ => {}
        }
    }

    fn quick_action(&mut self, label: &str) {
        let Some(row) = self.tail.view().selected() else {
            self.status = "No tail row selected".to_string();
            return;
        };
        let Some(action) = row.action(label) else {
            self.status = format!("No {} action for CONNECT requests", label);
            return;
        };
        let command = action.command.clone();
        let rule_action = self.rule_action;
        self.status = format!(
            "Creating {} rule for {}",
            rule_action.as_str(),
            command.value
        );
        let envelope = self.envelope.clone();
        self.spawn(async move {
            let result = create_rule(&envelope, &command, rule_action).await;
            Completion::RuleCreated {
                command,
                action: rule_action,
                result,
            }
        });
    }

    fn toggle_pause(&mut self) {
        if !self.tail.is_push() {
            self.status = "Polling mode: press r to refresh".to_string();
            return;
        }
        self.tail.toggle_pause();
        self.status = if self.tail.is_paused() {
            "Tail paused".to_string()
        } else {
            "Tail resumed".to_string()
        };
    }

    fn refresh(&mut self) {
        if self.tail.is_push() {
            self.status = "Streaming live: nothing to refresh".to_string();
            return;
        }
        self.last_poll = Instant::now();
        if !self.tail.begin_refresh() {
            return;
        }
        let envelope = self.envelope.clone();
        self.spawn(async move {
            let result = envelope.get(BACKLOG_PATH).await.and_then(|value| {
                decode_backlog(value)
                    .map_err(|err| RequestError::Unknown(format!("unreadable backlog: {}", err)))
            });
            Completion::Backlog { result }
        });
    }

    fn copy_selected_url(&mut self) {
        let Some(url) = self
            .tail
            .view()
            .selected()
            .map(|row| row.event.url.trim().to_string())
        else {
            return;
        };
        if url.is_empty() {
            self.status = "No URL on selected row".to_string();
            return;
        }
        match copy_text_via_osc52(&url) {
            Ok(()) => self.status = format!("Copied URL: {}", url),
            Err(err) => self.status = format!("Clipboard copy failed: {}", err),
        }
    }

    fn start_edit(&mut self) {
        if !self.table.enter_edit_at_cursor() {
            return;
        }
        let Some(row) = self.table.editing_row() else {
            return;
        };
        let action = match &row.detail {
            RowDetail::Rule { action, .. } => Some(*action),
            RowDetail::Acl { .. } => None,
        };
        self.draft = Some(EditDraft {
            id: row.id.clone(),
            comment: row.comment.clone(),
            action,
            pending: false,
        });
    }

    fn cancel_edit(&mut self) {
        self.table.exit_edit();
        self.draft = None;
    }

    /// A batch can remove the row being edited. The draft goes with it.
    fn drop_orphaned_draft(&mut self) {
        let Some(draft) = &self.draft else {
            return;
        };
        if self.table.editing() == Some(&draft.id) {
            return;
        }
        self.status = format!("Row {} is gone; edit closed", draft.id);
        self.cancel_edit();
    }

    /// Rule rows go to the server and keep the lock until it answers.
    /// Access rows only update locally; the next batch save sends them.
    fn save_edit(&mut self) {
        let Some(draft) = self.draft.as_mut() else {
            return;
        };
        match self.table.editing_row().map(|row| row.detail.clone()) {
            Some(RowDetail::Rule {
                kind,
                value,
                action,
            }) => {
                let update = RuleUpdate {
                    id: draft.id.clone(),
                    kind,
                    value,
                    action: draft.action.unwrap_or(action),
                    comment: draft.comment.clone(),
                };
                draft.pending = true;
                self.status = format!("Saving rule {}", update.id);
                let envelope = self.envelope.clone();
                self.spawn(async move {
                    let result = save_rule(&envelope, &update).await;
                    Completion::RuleSaved { update, result }
                });
            }
            Some(RowDetail::Acl { .. }) => {
                let id = draft.id.clone();
                let comment = draft.comment.clone();
                self.table.set_comment(&id, &comment);
                self.cancel_edit();
                self.status = "Comment updated. Press s to save".to_string();
            }
            None => self.cancel_edit(),
        }
    }

    pub fn destination(&self) -> Option<&Destination> {
        match &self.kind {
            Some(TableKind::Acl { destinations, .. }) => destinations.get(self.destination),
            _ => None,
        }
    }

    fn cycle_destination(&mut self, forward: bool) {
        let len = match &self.kind {
            Some(TableKind::Acl { destinations, .. }) => destinations.len(),
            _ => 0,
        };
        if len == 0 {
            self.status = "No other ACL to move to".to_string();
            return;
        }
        self.destination = if forward {
            (self.destination + 1) % len
        } else {
            (self.destination + len - 1) % len
        };
        if let Some(destination) = self.destination() {
            self.status = format!("Move destination: {}", destination.name);
        }
    }

    fn submit_move(&mut self) {
        if !matches!(self.kind, Some(TableKind::Acl { .. })) {
            self.status = "Move works on ACL tables".to_string();
            return;
        }
        let Some(destination) = self.destination().map(|d| d.id.clone()) else {
            self.status = "No other ACL to move to".to_string();
            return;
        };
        self.submit(BatchAction::Move { destination });
    }

    fn submit_delete(&mut self) {
        if !matches!(self.kind, Some(TableKind::Acl { .. })) {
            self.status = "Delete works on ACL tables".to_string();
            return;
        }
        self.submit(BatchAction::Delete);
    }

    fn submit_save(&mut self) {
        let Some(TableKind::Access { group }) = &self.kind else {
            self.status = "Save works on group access tables".to_string();
            return;
        };
        let group = group.clone();
        self.submit(BatchAction::Save { group });
    }

    fn submit(&mut self, action: BatchAction) {
        match self.dispatcher.prepare(&self.table, action) {
            Ok(request) => {
                self.status = format!(
                    "Sending {} for {} rows",
                    request.action.label(),
                    request.items.len()
                );
                let envelope = self.envelope.clone();
                self.spawn(async move {
                    let result = execute(&envelope, &request).await;
                    Completion::Batch { request, result }
                });
            }
            Err(err) => self.status = err.to_string(),
        }
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let tx = self.completions.clone();
        tokio::spawn(async move {
            let _ = tx.send(task.await);
        });
    }

    pub fn on_transport(&mut self, message: TransportMessage) {
        let is_error = matches!(message.event, TransportEvent::Error(_));
        if self.tail.on_message(message) && is_error {
            self.status = "Error streaming tail log. Will re-attempt".to_string();
        }
    }

    pub fn on_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Batch { request, result } => {
                match self.dispatcher.finish(&mut self.table, &request, &result) {
                    Some(BatchOutcome::Removed(count)) => {
                        self.status = match &request.action {
                            BatchAction::Move { destination } => {
                                format!("Moved {} rules to ACL {}", count, destination)
                            }
                            _ => format!("Deleted {} rules", count),
                        };
                    }
                    Some(BatchOutcome::Saved(count)) => {
                        self.status = format!("Saved access for {} ACLs", count);
                    }
                    None => {}
                }
                if let Err(err) = &result {
                    self.show_error(err);
                }
                self.drop_orphaned_draft();
            }
            Completion::RuleCreated {
                command,
                action,
                result,
            } => match result {
                Ok(id) => {
                    self.status = format!(
                        "Created rule {}: {} {} {}",
                        id,
                        action.as_str(),
                        command.kind.as_str(),
                        command.value
                    );
                }
                Err(err) => self.show_error(&err),
            },
            Completion::RuleSaved { update, result } => {
                match result {
                    Ok(()) => {
                        self.table.apply_update(&update);
                        if self.draft.as_ref().is_some_and(|draft| draft.id == update.id) {
                            self.cancel_edit();
                        }
                        self.status = format!("Saved rule {}", update.id);
                    }
                    Err(err) => {
                        if let Some(draft) = self.draft.as_mut() {
                            draft.pending = false;
                        }
                        self.show_error(&err);
                    }
                }
                self.drop_orphaned_draft();
            }
            Completion::Backlog { result } => match result {
                Ok(events) => self.tail.finish_refresh(Some(events)),
                Err(err) => {
                    self.tail.finish_refresh(None);
                    self.show_error(&err);
                }
            },
        }
    }

    /// Periodic work between input events: the poll timer.
    pub fn on_tick(&mut self, now: Instant) {
        if let Some(interval) = self.poll_interval
            && !self.tail.is_push()
            && now.duration_since(self.last_poll) >= interval
        {
            self.refresh();
        }
    }
}

impl<C, B: Backend> App<C, B> {
    pub fn is_loading(&self) -> bool {
        self.envelope.in_flight().is_engaged()
    }

    pub fn batch_pending(&self) -> bool {
        self.dispatcher.is_pending()
    }
}

impl<C, B> App<C, B> {
    fn show_error(&mut self, err: &RequestError) {
        self.error = Some(ErrorReport::from(err));
    }

    pub(crate) fn refresh_status_lifetime(&mut self) {
        // Any status change restarts the visibility timer.
        if self.status != self.status_snapshot {
            self.status_snapshot = self.status.clone();
            self.status_since = if self.status.is_empty() {
                None
            } else {
                Some(Instant::now())
            };
        }

        if !self.status.is_empty()
            && let Some(since) = self.status_since
            && since.elapsed() >= STATUS_LIFETIME
        {
            self.status.clear();
            self.status_snapshot.clear();
            self.status_since = None;
        }
    }
}
