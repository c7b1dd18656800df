//! Initial table contents, loaded from a JSON snapshot of what the server
//! would otherwise render into the page.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::command::{AclId, GroupId, RuleAction, RuleKind};
use crate::registry::RuleRow;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("rule {rule} has unknown {field} '{value}'")]
    Invalid {
        rule: String,
        field: &'static str,
        value: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Snapshot {
    Acl {
        acl: String,
        #[serde(default)]
        acls: Vec<AclEntry>,
        #[serde(default)]
        rules: Vec<RuleEntry>,
    },
    Access {
        group: String,
        #[serde(default)]
        acls: Vec<AccessEntry>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AclEntry {
    #[serde(rename = "ACLID")]
    acl_id: String,
    #[serde(default)]
    comment: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RuleEntry {
    #[serde(rename = "RuleID")]
    rule_id: String,
    #[serde(rename = "Type")]
    kind: String,
    value: String,
    action: String,
    #[serde(default)]
    comment: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AccessEntry {
    #[serde(rename = "ACLID")]
    acl_id: String,
    #[serde(default)]
    comment: String,
    #[serde(default)]
    checked: bool,
    #[serde(default)]
    access_comment: String,
}

/// A move target offered by the destination selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub id: AclId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableKind {
    /// Rules of one ACL. Batch actions move or delete.
    Acl {
        acl: AclId,
        destinations: Vec<Destination>,
    },
    /// ACL membership of one group. The batch action saves.
    Access { group: GroupId },
}

impl TableKind {
    pub fn title(&self) -> String {
        match self {
            Self::Acl { acl, .. } => format!("ACL {}", acl),
            Self::Access { group } => format!("Group {} access", group),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Hydration {
    pub kind: TableKind,
    pub rows: Vec<RuleRow>,
}

pub fn load(path: &Path) -> Result<Hydration, SnapshotError> {
    let text = fs::read_to_string(path).map_err(|source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let snapshot: Snapshot = serde_json::from_str(&text).map_err(|source| SnapshotError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    hydrate(snapshot)
}

fn hydrate(snapshot: Snapshot) -> Result<Hydration, SnapshotError> {
    match snapshot {
        Snapshot::Acl { acl, acls, rules } => {
            let destinations = acls
                .into_iter()
                .filter(|entry| entry.acl_id != acl)
                .map(|entry| Destination {
                    id: AclId::new(entry.acl_id),
                    name: entry.comment,
                })
                .collect();
            let rows = rules
                .into_iter()
                .map(rule_row)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Hydration {
                kind: TableKind::Acl {
                    acl: AclId::new(acl),
                    destinations,
                },
                rows,
            })
        }
        Snapshot::Access { group, acls } => Ok(Hydration {
            kind: TableKind::Access {
                group: GroupId::new(group),
            },
            rows: acls
                .into_iter()
                .map(|entry| {
                    RuleRow::acl(entry.acl_id, entry.comment, entry.access_comment, entry.checked)
                })
                .collect(),
        }),
    }
}

fn rule_row(entry: RuleEntry) -> Result<RuleRow, SnapshotError> {
    let invalid = |field: &'static str, value: &str| SnapshotError::Invalid {
        rule: entry.rule_id.clone(),
        field,
        value: value.to_string(),
    };
    let kind = RuleKind::parse(&entry.kind).ok_or_else(|| invalid("type", &entry.kind))?;
    let action = RuleAction::parse(&entry.action).ok_or_else(|| invalid("action", &entry.action))?;
    Ok(RuleRow::rule(
        entry.rule_id,
        kind,
        entry.value,
        action,
        entry.comment,
    ))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::registry::RowDetail;

    fn write_snapshot(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write snapshot");
        file
    }

    #[test]
    fn acl_snapshot_excludes_current_acl_from_destinations() {
        let file = write_snapshot(
            r#"{"kind":"acl","acl":"3",
                "acls":[{"ACLID":"3","Comment":"ads"},{"ACLID":"7","Comment":"kids"}],
                "rules":[
                  {"RuleID":"r1","Type":"https-domain","Value":".a.com","Action":"block","Comment":"tracker"},
                  {"RuleID":"r2","Type":"regex","Value":"^x","Action":"ignore"}
                ]}"#,
        );
        let hydration = load(file.path()).expect("valid snapshot");
        assert_eq!(
            hydration.kind,
            TableKind::Acl {
                acl: AclId::new("3"),
                destinations: vec![Destination {
                    id: AclId::new("7"),
                    name: "kids".to_string(),
                }],
            }
        );
        assert_eq!(hydration.rows.len(), 2);
        assert_eq!(hydration.rows[0].comment, "tracker");
        assert_eq!(
            hydration.rows[1].detail,
            RowDetail::Rule {
                kind: RuleKind::Regex,
                value: "^x".to_string(),
                action: RuleAction::Ignore,
            }
        );
    }

    #[test]
    fn access_snapshot_keeps_granted_acls() {
        let file = write_snapshot(
            r#"{"kind":"access","group":"g1","acls":[
                {"ACLID":"a1","Comment":"kids","Checked":true,"AccessComment":"school"},
                {"ACLID":"a2","Comment":"ads"}]}"#,
        );
        let hydration = load(file.path()).expect("valid snapshot");
        assert_eq!(hydration.kind.title(), "Group g1 access");
        assert!(hydration.rows[0].is_granted());
        assert_eq!(hydration.rows[0].comment, "school");
        assert!(!hydration.rows[1].is_granted());
    }

    #[test]
    fn unknown_rule_type_is_reported() {
        let file = write_snapshot(
            r#"{"kind":"acl","acl":"1","rules":[{"RuleID":"r9","Type":"glob","Value":"*","Action":"allow"}]}"#,
        );
        let err = load(file.path()).expect_err("glob is not a rule type");
        assert_eq!(err.to_string(), "rule r9 has unknown type 'glob'");
    }

    #[test]
    fn missing_and_malformed_files_are_distinct_errors() {
        let dir = tempfile::tempdir().expect("temp dir");
        let missing = dir.path().join("absent.json");
        assert!(matches!(load(&missing), Err(SnapshotError::Io { .. })));

        let file = write_snapshot("{not json");
        assert!(matches!(load(file.path()), Err(SnapshotError::Parse { .. })));
    }
}
