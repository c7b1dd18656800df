//! Typed commands sent to the admin backend.
//!
//! Every mutating request the console can issue is described here as a plain
//! value: where it goes and which form fields it carries. Rows and quick
//! actions build these up front so nothing has to be scraped back out of the
//! UI when the user confirms.

use std::fmt;

use clap::ValueEnum;
use serde::Deserialize;

use crate::envelope::FormBody;
use crate::registry::RowId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Domain,
    HttpsDomain,
    Exact,
    Regex,
}

impl RuleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Domain => "domain",
            Self::HttpsDomain => "https-domain",
            Self::Exact => "exact",
            Self::Regex => "regex",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "domain" => Some(Self::Domain),
            "https-domain" => Some(Self::HttpsDomain),
            "exact" => Some(Self::Exact),
            "regex" => Some(Self::Regex),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum RuleAction {
    #[default]
    Allow,
    Block,
    Ignore,
}

impl RuleAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Block => "block",
            Self::Ignore => "ignore",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "allow" => Some(Self::Allow),
            "block" => Some(Self::Block),
            "ignore" => Some(Self::Ignore),
            _ => None,
        }
    }

    pub fn next(self) -> Self {
        match self {
            Self::Allow => Self::Block,
            Self::Block => Self::Ignore,
            Self::Ignore => Self::Allow,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AclId(String);

impl AclId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AclId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupId(String);

impl GroupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A rule to create from a tail event. The action is chosen when the command
/// is dispatched, not when the row is rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRule {
    pub kind: RuleKind,
    pub value: String,
}

impl CreateRule {
    pub const PATH: &'static str = "/rule/new";

    pub fn form(&self, action: RuleAction) -> FormBody {
        FormBody::new()
            .field("type", self.kind.as_str())
            .field("value", self.value.as_str())
            .field("action", action.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedRule {
    pub rule: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchAction {
    Move { destination: AclId },
    Delete,
    Save { group: GroupId },
}

impl BatchAction {
    /// Move and delete take the rows out of the current list once acknowledged.
    pub fn removes_rows(&self) -> bool {
        matches!(self, Self::Move { .. } | Self::Delete)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Move { .. } => "move",
            Self::Delete => "delete",
            Self::Save { .. } => "save",
        }
    }
}

/// One row of a batch paired with its auxiliary (comment) value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub id: RowId,
    pub aux: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    pub action: BatchAction,
    pub items: Vec<BatchItem>,
}

impl BatchRequest {
    pub fn ids(&self) -> Vec<RowId> {
        self.items.iter().map(|item| item.id.clone()).collect()
    }

    pub fn path(&self) -> String {
        match &self.action {
            BatchAction::Move { .. } => "/acl/move".to_string(),
            BatchAction::Delete => "/rule/delete".to_string(),
            BatchAction::Save { group } => format!("/access/{}", group),
        }
    }

    pub fn form(&self) -> FormBody {
        let ids = self.items.iter().map(|item| item.id.as_str());
        match &self.action {
            BatchAction::Move { destination } => FormBody::new()
                .field("destination", destination.as_str())
                .list("rules", ids),
            BatchAction::Delete => FormBody::new().list("rules", ids),
            BatchAction::Save { .. } => FormBody::new()
                .list("acls", ids)
                .list("comments", self.items.iter().map(|item| item.aux.as_str())),
        }
    }
}

/// Inline edit of a single rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleUpdate {
    pub id: RowId,
    pub kind: RuleKind,
    pub value: String,
    pub action: RuleAction,
    pub comment: String,
}

impl RuleUpdate {
    pub fn path(&self) -> String {
        format!("/rule/{}", self.id)
    }

    pub fn form(&self) -> FormBody {
        FormBody::new()
            .field("action", self.action.as_str())
            .field("type", self.kind.as_str())
            .field("value", self.value.as_str())
            .field("comment", self.comment.as_str())
    }
}
