//! Request envelope for calls to the admin backend.
//!
//! Every mutating request is form encoded, carries the anti-forgery token and
//! the `X-Requested-With` marker the backend insists on, and resolves to either
//! a JSON value or a [`RequestError`]. The in-flight indicator is engaged for
//! exactly as long as a call is outstanding.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

const CSRF_HEADER: &str = "X-CSRF-Token";
const REQUESTED_WITH_HEADER: &str = "X-Requested-With";
const REQUESTED_WITH: &str = "XMLHttpRequest";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=UTF-8";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormBody {
    fields: Vec<(String, String)>,
}

impl FormBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str, value: impl Into<String>) -> Self {
        self.fields.push((name.to_string(), value.into()));
        self
    }

    /// Appends one `name[]` field per value, the list convention the backend parses.
    pub fn list<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let key = format!("{}[]", name);
        for value in values {
            self.fields.push((key.clone(), value.into()));
        }
        self
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    #[cfg(test)]
    pub fn values(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .collect()
    }

    pub fn encode(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.fields.iter().map(|(key, value)| (key.as_str(), value.as_str())))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorLink {
    pub link: String,
    pub text: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ErrorBody {
    error: Option<String>,
    links: Option<Vec<ErrorLink>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The request never got a response.
    #[error("network error: {0}")]
    Network(String),
    /// The server answered with a non-success status.
    #[error("{message}")]
    Domain {
        status: u16,
        title: String,
        message: String,
        links: Vec<ErrorLink>,
    },
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl RequestError {
    pub fn title(&self) -> &str {
        match self {
            Self::Network(_) => "Network error",
            Self::Domain { title, .. } => title.as_str(),
            Self::Unknown(_) => "Unknown error",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Network(_) => "Network error".to_string(),
            Self::Domain { message, .. } => message.clone(),
            Self::Unknown(detail) => detail.clone(),
        }
    }

    pub fn links(&self) -> &[ErrorLink] {
        match self {
            Self::Domain { links, .. } => links.as_slice(),
            _ => &[],
        }
    }
}

/// Turns a non-success reply into a domain error, pulling the message and
/// remediation links out of a structured body when there is one.
pub fn classify_response(status: StatusCode, body: &str) -> RequestError {
    let title = status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    RequestError::Domain {
        status: status.as_u16(),
        message: parsed.error.unwrap_or_else(|| title.clone()),
        links: parsed.links.unwrap_or_default(),
        title,
    }
}

fn classify_send_failure(err: reqwest::Error) -> RequestError {
    if err.is_builder() {
        RequestError::Unknown(err.to_string())
    } else {
        RequestError::Network(err.to_string())
    }
}

/// Shared "loading" counter. Readers only care whether it is above zero.
#[derive(Debug, Clone, Default)]
pub struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    pub fn enter(&self) -> InFlightGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(Arc::clone(&self.0))
    }

    pub fn is_engaged(&self) -> bool {
        self.0.load(Ordering::SeqCst) > 0
    }
}

#[derive(Debug)]
pub struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Where requests actually go. The HTTP implementation talks to the admin
/// server; tests substitute their own.
pub trait Backend: Clone + Send + Sync + 'static {
    fn send(
        &self,
        method: Method,
        path: &str,
        form: FormBody,
    ) -> impl Future<Output = Result<Value, RequestError>> + Send;

    fn fetch(&self, path: &str) -> impl Future<Output = Result<Value, RequestError>> + Send;
}

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base: Url,
    token: String,
}

impl HttpBackend {
    pub fn new(base: Url, token: String) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(Self {
            client,
            base,
            token,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, RequestError> {
        self.base
            .join(path)
            .map_err(|err| RequestError::Unknown(format!("bad endpoint {}: {}", path, err)))
    }

    async fn read_reply(response: reqwest::Response) -> Result<Value, RequestError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| RequestError::Unknown(err.to_string()))?;
        if !status.is_success() {
            return Err(classify_response(status, &body));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body)
            .map_err(|err| RequestError::Unknown(format!("unreadable reply: {}", err)))
    }
}

impl Backend for HttpBackend {
    async fn send(&self, method: Method, path: &str, form: FormBody) -> Result<Value, RequestError> {
        let url = self.endpoint(path)?;
        let response = self
            .client
            .request(method, url)
            .header(CSRF_HEADER, self.token.as_str())
            .header(REQUESTED_WITH_HEADER, REQUESTED_WITH)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(form.encode())
            .send()
            .await
            .map_err(classify_send_failure)?;
        Self::read_reply(response).await
    }

    async fn fetch(&self, path: &str) -> Result<Value, RequestError> {
        let url = self.endpoint(path)?;
        let response = self
            .client
            .get(url)
            .header(REQUESTED_WITH_HEADER, REQUESTED_WITH)
            .send()
            .await
            .map_err(classify_send_failure)?;
        Self::read_reply(response).await
    }
}

#[derive(Debug, Clone)]
pub struct Envelope<B> {
    backend: B,
    in_flight: InFlight,
}

impl<B: Backend> Envelope<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            in_flight: InFlight::default(),
        }
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    pub async fn post(&self, path: &str, form: FormBody) -> Result<Value, RequestError> {
        self.call(Method::POST, path, form).await
    }

    pub async fn get(&self, path: &str) -> Result<Value, RequestError> {
        let _loading = self.in_flight.enter();
        debug!(path, "GET");
        let result = self.backend.fetch(path).await;
        if let Err(err) = &result {
            warn!(path, error = %err, "GET failed");
        }
        result
    }

    async fn call(&self, method: Method, path: &str, form: FormBody) -> Result<Value, RequestError> {
        let _loading = self.in_flight.enter();
        debug!(%method, path, "dispatching request");
        let result = self.backend.send(method.clone(), path, form).await;
        if let Err(err) = &result {
            warn!(%method, path, error = %err, "request failed");
        }
        result
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use tokio::sync::Notify;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub struct Recorded {
        pub method: Method,
        pub path: String,
        pub form: FormBody,
    }

    /// Backend that replays canned replies and remembers what it was sent.
    #[derive(Debug, Clone, Default)]
    pub struct FakeBackend {
        replies: Arc<Mutex<VecDeque<Result<Value, RequestError>>>>,
        sent: Arc<Mutex<Vec<Recorded>>>,
        gate: Option<Arc<Notify>>,
    }

    impl FakeBackend {
        /// Every call waits for one `notify_one` on `gate` before answering.
        pub fn gated(gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::default()
            }
        }

        pub fn reply(&self, reply: Result<Value, RequestError>) -> &Self {
            if let Ok(mut replies) = self.replies.lock() {
                replies.push_back(reply);
            }
            self
        }

        pub fn sent(&self) -> Vec<Recorded> {
            self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
        }

        fn next(&self, method: Method, path: &str, form: FormBody) -> Result<Value, RequestError> {
            if let Ok(mut sent) = self.sent.lock() {
                sent.push(Recorded {
                    method,
                    path: path.to_string(),
                    form,
                });
            }
            self.replies
                .lock()
                .ok()
                .and_then(|mut replies| replies.pop_front())
                .unwrap_or(Ok(Value::String("OK".to_string())))
        }
    }

    impl Backend for FakeBackend {
        async fn send(&self, method: Method, path: &str, form: FormBody) -> Result<Value, RequestError> {
            match &self.gate {
                Some(gate) => gate.notified().await,
                None => tokio::task::yield_now().await,
            }
            self.next(method, path, form)
        }

        async fn fetch(&self, path: &str) -> Result<Value, RequestError> {
            tokio::task::yield_now().await;
            self.next(Method::GET, path, FormBody::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::Notify;

    use super::testing::FakeBackend;
    use super::*;

    #[test]
    fn structured_error_body_yields_message_and_links() {
        let body = r#"{"error":"duplicate rule","links":[{"link":"/acl/3","text":"view ACL 3"}]}"#;
        let err = classify_response(StatusCode::CONFLICT, body);
        assert_eq!(err.title(), "Conflict");
        assert_eq!(err.message(), "duplicate rule");
        assert_eq!(
            err.links(),
            &[ErrorLink {
                link: "/acl/3".to_string(),
                text: "view ACL 3".to_string(),
            }]
        );
    }

    #[test]
    fn unstructured_error_body_falls_back_to_status_text() {
        let err = classify_response(StatusCode::FORBIDDEN, "Forbidden - CSRF token invalid\n");
        assert_eq!(err.message(), "Forbidden");
        assert!(err.links().is_empty());

        let err = classify_response(StatusCode::BAD_REQUEST, r#"{"error":"Missing parameters","links":null}"#);
        assert_eq!(err.message(), "Missing parameters");
        assert!(err.links().is_empty());
    }

    #[test]
    fn form_body_encodes_list_fields() {
        let form = FormBody::new()
            .field("destination", "a b")
            .list("rules", ["r1", "r2"]);
        assert_eq!(
            form.encode(),
            "destination=a+b&rules%5B%5D=r1&rules%5B%5D=r2"
        );
    }

    #[tokio::test]
    async fn in_flight_indicator_clears_on_success_and_failure() {
        let backend = FakeBackend::default();
        backend
            .reply(Ok(Value::String("OK".to_string())))
            .reply(Err(RequestError::Network("refused".to_string())));
        let envelope = Envelope::new(backend);

        assert!(envelope.post("/rule/delete", FormBody::new()).await.is_ok());
        assert!(!envelope.in_flight().is_engaged());

        let err = envelope.post("/rule/delete", FormBody::new()).await;
        assert_eq!(err, Err(RequestError::Network("refused".to_string())));
        assert!(!envelope.in_flight().is_engaged());
    }

    #[tokio::test]
    async fn in_flight_indicator_is_engaged_while_call_is_pending() {
        let gate = Arc::new(Notify::new());
        let envelope = Envelope::new(FakeBackend::gated(gate.clone()));
        let call = tokio::spawn({
            let envelope = envelope.clone();
            async move { envelope.post("/rule/delete", FormBody::new()).await }
        });

        tokio::time::timeout(Duration::from_secs(2), async {
            while !envelope.in_flight().is_engaged() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("call reached the backend");
        tokio::task::yield_now().await;
        assert!(envelope.in_flight().is_engaged());
        assert!(!call.is_finished());

        gate.notify_one();
        let reply = call.await.expect("call task ran");
        assert_eq!(reply, Ok(Value::String("OK".to_string())));
        assert!(!envelope.in_flight().is_engaged());
    }

    #[tokio::test]
    async fn refused_connection_is_a_network_error() {
        let base = Url::parse("http://127.0.0.1:1/").expect("static url");
        let backend = HttpBackend::new(base, "token".to_string()).expect("client builds");
        let err = Envelope::new(backend)
            .post("/rule/new", FormBody::new().field("type", "domain"))
            .await
            .expect_err("nothing listens on port 1");
        assert!(matches!(err, RequestError::Network(_)));
        assert_eq!(err.title(), "Network error");
    }
}
