use crate::constants::{default_headers, CORE_CAPABILITY, MAIL_CAPABILITY, WELL_KNOWN_PATH};
use crate::error::{Error, Result};
use crate::models::{Config, Email, FetchOutcome, SearchCriteria, Session};
use base64::prelude::*;
use reqwest::{
    header::{HeaderValue, AUTHORIZATION},
    Client, ClientBuilder, StatusCode,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, trace};

fn authorization(config: &Config) -> Result<String> {
    match (&config.token, &config.password) {
        (Some(token), _) => Ok(format!("Bearer {token}")),
        (None, Some(password)) => Ok(format!(
            "Basic {}",
            BASE64_STANDARD.encode(format!("{}:{}", config.username, password))
        )),
        (None, None) => Err(Error::Config(
            "either a password or a token must be provided".to_string(),
        )),
    }
}

fn mailbox_query_body(session: &Session, mailbox_name: &str) -> Value {
    json!({
        "using": [CORE_CAPABILITY, MAIL_CAPABILITY],
        "methodCalls": [[
            "Mailbox/query",
            {
                "accountId": session.account_id,
                "filter": { "role": mailbox_name, "hasAnyRole": true },
            },
            "a",
        ]],
    })
}

fn email_query_body(config: &Config, session: &Session, mailbox_id: &str) -> Value {
    json!({
        "using": [CORE_CAPABILITY, MAIL_CAPABILITY],
        "methodCalls": [
            [
                "Email/query",
                {
                    "accountId": session.account_id,
                    "filter": { "inMailbox": mailbox_id },
                    "sort": [{ "property": "receivedAt", "isAscending": false }],
                    "limit": config.email_query_limit,
                },
                "a",
            ],
            [
                "Email/get",
                {
                    "accountId": session.account_id,
                    "properties": config.email_get_properties,
                    "fetchHTMLBodyValues": config.email_get_fetch_html_body_values,
                    "#ids": { "resultOf": "a", "name": "Email/query", "path": "/ids/*" },
                },
                "b",
            ],
        ],
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    api_url: String,
    #[serde(default)]
    primary_accounts: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(rename = "methodResponses")]
    method_responses: Vec<(String, Value, String)>,
}

fn method_args<'a>(response: &'a ApiResponse, method: &str) -> Result<&'a Value> {
    response
        .method_responses
        .iter()
        .find(|(name, _, _)| name == method)
        .map(|(_, args, _)| args)
        .ok_or_else(|| Error::Protocol(format!("response has no {method} invocation")))
}

fn extract_mailbox_id(response: &ApiResponse, mailbox_name: &str) -> Result<String> {
    let args = method_args(response, "Mailbox/query")?;
    args.get("ids")
        .and_then(Value::as_array)
        .and_then(|ids| ids.first())
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::NotFound(format!("no mailbox with role {mailbox_name:?}")))
}

fn extract_email_batch(response: &ApiResponse) -> Result<Vec<Email>> {
    let args = method_args(response, "Email/get")?;
    let list = args
        .get("list")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Protocol(format!("message list missing or not an array: {args}")))?;
    list.iter()
        .map(|record| {
            serde_json::from_value(record.clone())
                .map_err(|e| Error::Protocol(format!("malformed message record: {e}")))
        })
        .collect()
}

#[derive(Debug)]
pub struct JmapClient {
    config: Config,
    client: Client,
}

impl JmapClient {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let mut headers = default_headers();
        let auth = authorization(&config)?;
        let auth = HeaderValue::from_str(&auth).map_err(|_| {
            Error::Config("credentials contain characters not allowed in a header".to_string())
        })?;
        headers.insert(AUTHORIZATION, auth);

        let mut builder = ClientBuilder::new()
            .timeout(config.timeout)
            .default_headers(headers);

        if let Some(proxy) = &config.proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(proxy).map_err(Error::Http)?);
        }

        let client = builder.build().map_err(Error::Http)?;

        Ok(Self { config, client })
    }

    /// Resolve the server session (API endpoint and mail account id) with a
    /// single call to the well-known discovery endpoint. Not retried.
    pub async fn authenticate(&self) -> Result<Session> {
        let url = format!("https://{}{}", self.config.hostname, WELL_KNOWN_PATH);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Auth(format!("discovery request failed: {e}")))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::Auth(format!(
                "could not authenticate against {}: status {status}",
                self.config.hostname
            )));
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| Error::Protocol(format!("invalid session response: {e}")))?;
        let account_id = session
            .primary_accounts
            .get(MAIL_CAPABILITY)
            .cloned()
            .ok_or_else(|| {
                Error::Protocol(format!("session response has no account for {MAIL_CAPABILITY}"))
            })?;

        debug!(api_url = %session.api_url, %account_id, "resolved session");
        Ok(Session {
            api_url: session.api_url,
            account_id,
        })
    }

    /// Map the configured mailbox role name to its id. A missing mailbox is
    /// a configuration problem, not a transient condition; not retried.
    pub async fn resolve_mailbox(&self, session: &Session) -> Result<String> {
        let body = mailbox_query_body(session, &self.config.mailbox_name);
        let response = self.post_api(session, &body).await?;
        let id = extract_mailbox_id(&response, &self.config.mailbox_name)?;
        debug!(mailbox = %self.config.mailbox_name, %id, "resolved mailbox");
        Ok(id)
    }

    /// Run the full workflow: authenticate, resolve the mailbox, then poll
    /// until a message matches or the retry budget runs out.
    pub async fn fetch_email(&self) -> Result<FetchOutcome> {
        let session = self.authenticate().await?;
        let mailbox_id = self.resolve_mailbox(&session).await?;
        poll_for_match(
            &self.config.criteria,
            self.config.maximum_retry_count,
            self.config.retry_delay(),
            || self.query_batch(&session, &mailbox_id),
        )
        .await
    }

    // One polling attempt: Email/query for the newest ids, chained with an
    // Email/get over exactly those ids.
    async fn query_batch(&self, session: &Session, mailbox_id: &str) -> Result<Vec<Email>> {
        let body = email_query_body(&self.config, session, mailbox_id);
        let response = self.post_api(session, &body).await?;
        extract_email_batch(&response)
    }

    async fn post_api(&self, session: &Session, body: &Value) -> Result<ApiResponse> {
        let response = self.client.post(&session.api_url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(Error::Status { status, body });
        }
        response
            .json()
            .await
            .map_err(|e| Error::Protocol(format!("invalid method response envelope: {e}")))
    }
}

pub(crate) async fn poll_for_match<F, Fut>(
    criteria: &SearchCriteria,
    maximum_retry_count: u32,
    retry_delay: Duration,
    mut fetch_batch: F,
) -> Result<FetchOutcome>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Vec<Email>>>,
{
    let mut attempt = 0;
    while attempt < maximum_retry_count {
        if attempt > 0 {
            tokio::time::sleep(retry_delay).await;
        }
        let batch = fetch_batch().await?;
        trace!(attempt, count = batch.len(), "fetched message batch");
        if let Some(email) = criteria.select(&batch) {
            debug!(id = %email.id, attempt, "found matching message");
            return Ok(FetchOutcome::Found(email));
        }
        attempt += 1;
    }
    debug!(attempts = maximum_retry_count, "no matching message within retry budget");
    Ok(FetchOutcome::TimedOut)
}

/// Authenticate, resolve the configured mailbox, and poll until a matching
/// message appears or the retry budget runs out.
pub async fn fetch_email(config: Config) -> Result<FetchOutcome> {
    let client = JmapClient::new(config)?;
    client.fetch_email().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Matcher;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn subject_email(id: &str, subject: &str) -> Email {
        Email {
            id: id.to_string(),
            subject: Some(subject.to_string()),
            received_at: None,
            sender: None,
            html_body: Vec::new(),
            body_values: HashMap::new(),
        }
    }

    fn subject_criteria(subject: &str) -> SearchCriteria {
        SearchCriteria {
            subject: Some(Matcher::exact(subject)),
            ..Default::default()
        }
    }

    #[test]
    fn basic_authorization_header() {
        let config = Config::new("mail.example.com", "user").password("pass");
        assert_eq!(authorization(&config).unwrap(), "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn token_wins_over_password() {
        let config = Config::new("mail.example.com", "user")
            .password("pass")
            .token("tok");
        assert_eq!(authorization(&config).unwrap(), "Bearer tok");
    }

    #[test]
    fn authorization_requires_a_credential() {
        let config = Config::new("mail.example.com", "user");
        assert!(matches!(authorization(&config), Err(Error::Config(_))));
    }

    #[test]
    fn new_rejects_invalid_config() {
        let err = JmapClient::new(Config::default()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn mailbox_body_shape() {
        let session = Session {
            api_url: "https://mail.example.com/api".to_string(),
            account_id: "A1".to_string(),
        };
        let body = mailbox_query_body(&session, "inbox");
        assert_eq!(body["using"][0], CORE_CAPABILITY);
        assert_eq!(body["using"][1], MAIL_CAPABILITY);
        assert_eq!(body["methodCalls"][0][0], "Mailbox/query");
        assert_eq!(body["methodCalls"][0][1]["accountId"], "A1");
        assert_eq!(body["methodCalls"][0][1]["filter"]["role"], "inbox");
        assert_eq!(body["methodCalls"][0][1]["filter"]["hasAnyRole"], true);
    }

    #[test]
    fn email_body_chains_query_and_get() {
        let config = Config::new("mail.example.com", "user").password("pass");
        let session = Session {
            api_url: "https://mail.example.com/api".to_string(),
            account_id: "A1".to_string(),
        };
        let body = email_query_body(&config, &session, "MB1");

        let query = &body["methodCalls"][0];
        assert_eq!(query[0], "Email/query");
        assert_eq!(query[1]["filter"]["inMailbox"], "MB1");
        assert_eq!(query[1]["sort"][0]["property"], "receivedAt");
        assert_eq!(query[1]["sort"][0]["isAscending"], false);
        assert_eq!(query[1]["limit"], 5);
        assert_eq!(query[2], "a");

        let get = &body["methodCalls"][1];
        assert_eq!(get[0], "Email/get");
        assert_eq!(get[1]["fetchHTMLBodyValues"], true);
        assert_eq!(get[1]["properties"][0], "id");
        assert_eq!(get[1]["#ids"]["resultOf"], "a");
        assert_eq!(get[1]["#ids"]["name"], "Email/query");
        assert_eq!(get[1]["#ids"]["path"], "/ids/*");
    }

    fn parse_response(value: Value) -> ApiResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn mailbox_id_from_response() {
        let response = parse_response(json!({
            "methodResponses": [
                ["Mailbox/query", { "accountId": "A1", "ids": ["MB1", "MB2"] }, "a"]
            ]
        }));
        assert_eq!(extract_mailbox_id(&response, "inbox").unwrap(), "MB1");
    }

    #[test]
    fn empty_mailbox_ids_is_not_found() {
        let response = parse_response(json!({
            "methodResponses": [
                ["Mailbox/query", { "accountId": "A1", "ids": [] }, "a"]
            ]
        }));
        let err = extract_mailbox_id(&response, "archive").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(err.to_string().contains("archive"));
    }

    #[test]
    fn missing_invocation_is_a_protocol_error() {
        let response = parse_response(json!({
            "methodResponses": [
                ["error", { "type": "unknownMethod" }, "a"]
            ]
        }));
        assert!(matches!(
            extract_mailbox_id(&response, "inbox"),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            extract_email_batch(&response),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn email_batch_from_response() {
        let response = parse_response(json!({
            "methodResponses": [
                ["Email/query", { "ids": ["M1", "M2"] }, "a"],
                ["Email/get", { "list": [
                    { "id": "M1", "subject": "newest" },
                    { "id": "M2", "subject": "older" }
                ] }, "b"]
            ]
        }));
        let batch = extract_email_batch(&response).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].id, "M1");
        assert_eq!(batch[0].subject.as_deref(), Some("newest"));
    }

    #[test]
    fn non_array_list_is_a_protocol_error() {
        let response = parse_response(json!({
            "methodResponses": [
                ["Email/get", { "list": "nope" }, "b"]
            ]
        }));
        assert!(matches!(
            extract_email_batch(&response),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn malformed_record_is_a_protocol_error() {
        let response = parse_response(json!({
            "methodResponses": [
                ["Email/get", { "list": [{ "subject": "no id" }] }, "b"]
            ]
        }));
        assert!(matches!(
            extract_email_batch(&response),
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn poll_returns_match_on_nth_attempt() {
        let criteria = subject_criteria("Verify your account");
        let calls = AtomicU32::new(0);
        let mut batches = vec![
            Vec::new(),
            vec![subject_email("M1", "unrelated")],
            vec![
                subject_email("M2", "unrelated"),
                subject_email("M3", "Verify your account"),
            ],
        ]
        .into_iter();

        let outcome = poll_for_match(&criteria, 10, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            let batch = batches.next().unwrap_or_default();
            async move { Ok(batch) }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.email().unwrap().id, "M3");
    }

    #[tokio::test]
    async fn poll_exhausts_budget_without_error() {
        let criteria = subject_criteria("never arrives");
        let calls = AtomicU32::new(0);

        let outcome = poll_for_match(&criteria, 3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(vec![subject_email("M1", "something else")]) }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(outcome.is_timed_out());
    }

    #[tokio::test]
    async fn poll_waits_between_attempts() {
        let criteria = subject_criteria("never arrives");
        let delay = Duration::from_millis(25);
        let started = Instant::now();

        let outcome = poll_for_match(&criteria, 3, delay, || async { Ok(Vec::new()) })
            .await
            .unwrap();

        assert!(outcome.is_timed_out());
        // Two sleeps between three attempts.
        assert!(started.elapsed() >= delay * 2);
    }

    #[tokio::test]
    async fn poll_zero_budget_makes_no_attempt() {
        let criteria = subject_criteria("anything");
        let calls = AtomicU32::new(0);

        let outcome = poll_for_match(&criteria, 0, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(Vec::new()) }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(outcome.is_timed_out());
    }

    #[tokio::test]
    async fn poll_aborts_on_protocol_error() {
        let criteria = subject_criteria("anything");
        let calls = AtomicU32::new(0);

        let result = poll_for_match(&criteria, 10, Duration::from_millis(1), || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 1 {
                    Err(Error::Protocol(
                        "message list missing or not an array".to_string(),
                    ))
                } else {
                    Ok(Vec::new())
                }
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn poll_with_declining_selector_times_out() {
        let criteria = SearchCriteria {
            find: Some(Box::new(|_: &[Email]| None)),
            ..Default::default()
        };
        let calls = AtomicU32::new(0);

        let outcome = poll_for_match(&criteria, 2, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(vec![subject_email("M1", "present")]) }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(outcome.is_timed_out());
    }
}
