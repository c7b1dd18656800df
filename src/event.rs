use serde::Deserialize;
use serde_json::Value;

use crate::command::{CreateRule, RuleKind};

const CONNECT_METHOD: &str = "CONNECT";

/// One intercepted proxy request as the backend reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LogEvent {
    pub time: String,
    pub client: String,
    pub method: String,
    pub host: String,
    pub domain: String,
    #[serde(rename = "URL")]
    pub url: String,
    pub path: String,
}

/// A "create rule for this" shortcut attached to a rendered tail row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuickAction {
    pub label: &'static str,
    pub command: CreateRule,
}

impl LogEvent {
    /// CONNECT requests establish a tunnel, so they carry no meaningful path.
    pub fn is_connect(&self) -> bool {
        self.method == CONNECT_METHOD
    }

    pub fn display_path(&self) -> &str {
        if self.is_connect() { "" } else { &self.path }
    }

    pub fn quick_actions(&self) -> Vec<QuickAction> {
        let kind = if self.is_connect() {
            RuleKind::HttpsDomain
        } else {
            RuleKind::Domain
        };
        let mut actions = vec![
            QuickAction {
                label: "Domain",
                command: CreateRule {
                    kind,
                    value: self.domain.clone(),
                },
            },
            QuickAction {
                label: "Host",
                command: CreateRule {
                    kind,
                    value: self.host.clone(),
                },
            },
        ];
        if !self.is_connect() {
            actions.push(QuickAction {
                label: "Path",
                command: CreateRule {
                    kind: RuleKind::Exact,
                    value: self.url.clone(),
                },
            });
        }
        actions
    }
}

pub fn decode_event(text: &str) -> Result<LogEvent, serde_json::Error> {
    serde_json::from_str(text)
}

/// The polling endpoint answers with the backlog as a JSON array, newest first.
pub fn decode_backlog(value: Value) -> Result<Vec<LogEvent>, serde_json::Error> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_wire_field_names() {
        let event = decode_event(
            r#"{"Time":"2016-05-01 10:00:00 UTC","Client":"10.0.0.5","Method":"GET","Host":"www.a.com","Domain":".a.com","URL":"http://www.a.com/x","Path":"/x"}"#,
        )
        .expect("valid event");
        assert_eq!(event.client, "10.0.0.5");
        assert_eq!(event.domain, ".a.com");
        assert_eq!(event.url, "http://www.a.com/x");
        assert_eq!(event.path, "/x");
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let event =
            decode_event(r#"{"Time":"10:01","Method":"CONNECT","Host":"b.com"}"#).expect("valid event");
        assert!(event.is_connect());
        assert_eq!(event.path, "");
        assert_eq!(event.display_path(), "");
    }

    #[test]
    fn plain_http_event_offers_three_actions() {
        let event = LogEvent {
            method: "GET".to_string(),
            host: "www.a.com".to_string(),
            domain: ".a.com".to_string(),
            url: "http://www.a.com/x".to_string(),
            path: "/x".to_string(),
            ..Default::default()
        };
        let actions = event.quick_actions();
        let labels: Vec<&str> = actions.iter().map(|action| action.label).collect();
        assert_eq!(labels, vec!["Domain", "Host", "Path"]);
        assert_eq!(actions[0].command.kind, RuleKind::Domain);
        assert_eq!(actions[2].command.kind, RuleKind::Exact);
        assert_eq!(actions[2].command.value, "http://www.a.com/x");
    }

    #[test]
    fn connect_event_omits_path_and_uses_tunnel_domain_type() {
        let event = LogEvent {
            method: "CONNECT".to_string(),
            host: "b.com:443".to_string(),
            domain: ".b.com".to_string(),
            url: "b.com:443".to_string(),
            ..Default::default()
        };
        let actions = event.quick_actions();
        assert_eq!(actions.len(), 2);
        assert!(
            actions
                .iter()
                .all(|action| action.command.kind == RuleKind::HttpsDomain)
        );
    }

    #[test]
    fn null_backlog_is_empty() {
        assert!(decode_backlog(Value::Null).expect("null is empty").is_empty());
        let events = decode_backlog(serde_json::json!([{"Method":"GET"},{"Method":"CONNECT"}]))
            .expect("array of events");
        assert_eq!(events.len(), 2);
    }
}
