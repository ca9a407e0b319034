//! Public data models used and returned by the client.

use crate::constants::{
    DEFAULT_GET_PROPERTIES, DEFAULT_MAILBOX_NAME, DEFAULT_QUERY_LIMIT, DEFAULT_RETRY_COUNT,
    DEFAULT_RETRY_DELAY_MILLIS,
};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Summary of a message as returned by `Email/get`.
///
/// Only the requested properties are populated; everything except the id is
/// optional so a caller-supplied property list deserializes cleanly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Email {
    /// Server-assigned message identifier.
    pub id: String,
    /// Message subject line.
    #[serde(default)]
    pub subject: Option<String>,
    /// When the server received the message.
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
    /// Sender addresses if available.
    #[serde(default)]
    pub sender: Option<Vec<EmailAddress>>,
    /// References to the HTML body parts of the message.
    #[serde(default)]
    pub html_body: Vec<EmailBodyPart>,
    /// Body part values keyed by part id, inlined by `fetchHTMLBodyValues`.
    #[serde(default)]
    pub body_values: HashMap<String, EmailBodyValue>,
}

impl Email {
    /// Concatenated text of the HTML body parts, in order, joined by
    /// newlines. Parts whose value is not present in the body-values map
    /// contribute an empty string.
    pub fn html_text(&self) -> String {
        self.html_body
            .iter()
            .map(|part| {
                part.part_id
                    .as_deref()
                    .and_then(|id| self.body_values.get(id))
                    .map(|value| value.value.as_str())
                    .unwrap_or_default()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A single address from an `Email` address property.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailAddress {
    /// Display name if available.
    #[serde(default)]
    pub name: Option<String>,
    /// Address in `local@domain` form.
    #[serde(default)]
    pub email: Option<String>,
}

/// Reference to one body part of a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailBodyPart {
    /// Part identifier, used to look up the value in the body-values map.
    #[serde(default)]
    pub part_id: Option<String>,
    /// Content type of the part.
    #[serde(default, rename = "type")]
    pub content_type: Option<String>,
}

/// Resolved content of one body part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailBodyValue {
    /// The part's text content.
    pub value: String,
}

/// Server session info resolved once per invocation from the discovery
/// endpoint.
#[derive(Debug, Clone)]
pub struct Session {
    /// API endpoint all method calls are posted to.
    pub api_url: String,
    /// Account identifier associated with the mail capability.
    pub account_id: String,
}

/// A criterion for matching one message field, fixed at configuration time.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Matches the exact string: byte equality for subjects, containment for
    /// body text.
    Exact(String),
    /// Matches when the compiled pattern matches the field.
    Pattern(Regex),
}

impl Matcher {
    /// Exact-string criterion.
    pub fn exact(value: impl Into<String>) -> Self {
        Matcher::Exact(value.into())
    }

    /// Pattern criterion compiled from `pattern`.
    pub fn pattern(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::Config(format!("invalid pattern {pattern:?}: {e}")))?;
        Ok(Matcher::Pattern(regex))
    }
}

/// Selector over a filtered, newest-first batch of messages. Returning
/// `None` declines the whole batch.
pub type Selector = dyn Fn(&[Email]) -> Option<Email> + Send + Sync;

/// What to look for while polling. At least one of the three criteria must
/// be supplied.
#[derive(Default)]
pub struct SearchCriteria {
    /// Subject criterion.
    pub subject: Option<Matcher>,
    /// Body criterion, applied to the derived HTML text.
    pub body: Option<Matcher>,
    /// Custom selector over the filtered batch.
    pub find: Option<Box<Selector>>,
}

impl SearchCriteria {
    pub fn is_empty(&self) -> bool {
        self.subject.is_none() && self.body.is_none() && self.find.is_none()
    }

    fn subject_matches(&self, email: &Email) -> bool {
        match (&self.subject, email.subject.as_deref()) {
            (None, _) => true,
            (Some(Matcher::Exact(want)), Some(subject)) => subject == want,
            (Some(Matcher::Pattern(regex)), Some(subject)) => regex.is_match(subject),
            (Some(_), None) => false,
        }
    }

    fn body_matches(&self, text: &str) -> bool {
        match &self.body {
            None => true,
            Some(Matcher::Exact(want)) => text.contains(want.as_str()),
            Some(Matcher::Pattern(regex)) => regex.is_match(text),
        }
    }

    /// Filter a fetched batch and pick the matching message, if any.
    ///
    /// The batch is expected newest-first; without a custom selector the
    /// first qualifying message wins.
    pub(crate) fn select(&self, batch: &[Email]) -> Option<Email> {
        let filtered: Vec<Email> = batch
            .iter()
            .filter(|email| {
                self.subject_matches(email)
                    && (self.body.is_none() || self.body_matches(&email.html_text()))
            })
            .cloned()
            .collect();

        match &self.find {
            Some(find) => find(&filtered),
            None => filtered.into_iter().next(),
        }
    }
}

impl std::fmt::Debug for SearchCriteria {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchCriteria")
            .field("subject", &self.subject)
            .field("body", &self.body)
            .field("find", &self.find.is_some())
            .finish()
    }
}

/// Outcome of a polling run: either a matched message, or an explicit
/// timed-out result once the retry budget ran out without a match.
#[derive(Debug, Clone, Serialize)]
pub enum FetchOutcome {
    /// A message satisfying the criteria.
    Found(Email),
    /// The retry budget was exhausted. Not an error.
    TimedOut,
}

impl FetchOutcome {
    /// The matched message, if one was found.
    pub fn email(&self) -> Option<&Email> {
        match self {
            FetchOutcome::Found(email) => Some(email),
            FetchOutcome::TimedOut => None,
        }
    }

    /// Consume the outcome, yielding the matched message if any.
    pub fn into_email(self) -> Option<Email> {
        match self {
            FetchOutcome::Found(email) => Some(email),
            FetchOutcome::TimedOut => None,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, FetchOutcome::TimedOut)
    }
}

/// Client configuration.
///
/// `hostname` and `username` are required, together with a password or a
/// bearer token and at least one search criterion. Everything else has a
/// default.
pub struct Config {
    /// Account username.
    pub username: String,
    /// Password for Basic authentication.
    pub password: Option<String>,
    /// Bearer token; takes precedence over the password when both are set.
    pub token: Option<String>,
    /// JMAP server hostname.
    pub hostname: String,
    /// What to look for while polling.
    pub criteria: SearchCriteria,
    /// Mailbox role to poll (default "inbox").
    pub mailbox_name: String,
    /// How many of the newest messages each attempt fetches.
    pub email_query_limit: usize,
    /// Property list passed to `Email/get`.
    pub email_get_properties: Vec<String>,
    /// Whether `Email/get` should inline HTML body values.
    pub email_get_fetch_html_body_values: bool,
    /// Maximum number of polling attempts.
    pub maximum_retry_count: u32,
    /// Delay between attempts, in milliseconds.
    pub retry_delay_millis: u64,
    /// Request timeout for every HTTP call.
    pub timeout: Duration,
    /// Optional proxy URL for all requests.
    pub proxy_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: None,
            token: None,
            hostname: String::new(),
            criteria: SearchCriteria::default(),
            mailbox_name: DEFAULT_MAILBOX_NAME.to_string(),
            email_query_limit: DEFAULT_QUERY_LIMIT,
            email_get_properties: DEFAULT_GET_PROPERTIES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            email_get_fetch_html_body_values: true,
            maximum_retry_count: DEFAULT_RETRY_COUNT,
            retry_delay_millis: DEFAULT_RETRY_DELAY_MILLIS,
            timeout: crate::constants::default_timeout(),
            proxy_url: None,
        }
    }
}

impl Config {
    pub fn new(hostname: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            username: username.into(),
            ..Self::default()
        }
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn subject(mut self, matcher: Matcher) -> Self {
        self.criteria.subject = Some(matcher);
        self
    }

    pub fn body(mut self, matcher: Matcher) -> Self {
        self.criteria.body = Some(matcher);
        self
    }

    pub fn find<F>(mut self, selector: F) -> Self
    where
        F: Fn(&[Email]) -> Option<Email> + Send + Sync + 'static,
    {
        self.criteria.find = Some(Box::new(selector));
        self
    }

    pub fn mailbox_name(mut self, name: impl Into<String>) -> Self {
        self.mailbox_name = name.into();
        self
    }

    /// Validate this configuration, returning an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.username.is_empty() {
            return Err(Error::Config("username must be provided".to_string()));
        }
        if self.hostname.is_empty() {
            return Err(Error::Config("hostname must be provided".to_string()));
        }
        if self.password.is_none() && self.token.is_none() {
            return Err(Error::Config(
                "either a password or a token must be provided".to_string(),
            ));
        }
        if self.criteria.is_empty() {
            return Err(Error::Config(
                "at least one of subject, body, and find must be provided".to_string(),
            ));
        }
        Ok(())
    }

    /// The inter-retry delay as a `Duration`.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_millis)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("username", &self.username)
            .field("hostname", &self.hostname)
            .field("criteria", &self.criteria)
            .field("mailbox_name", &self.mailbox_name)
            .field("email_query_limit", &self.email_query_limit)
            .field("maximum_retry_count", &self.maximum_retry_count)
            .field("retry_delay_millis", &self.retry_delay_millis)
            .finish()
    }
}
