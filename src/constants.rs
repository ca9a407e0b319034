use reqwest::header::{HeaderMap, HeaderValue};
use std::time::Duration;

pub const CORE_CAPABILITY: &str = "urn:ietf:params:jmap:core";
pub const MAIL_CAPABILITY: &str = "urn:ietf:params:jmap:mail";
pub const WELL_KNOWN_PATH: &str = "/.well-known/jmap";

pub const DEFAULT_MAILBOX_NAME: &str = "inbox";
pub const DEFAULT_QUERY_LIMIT: usize = 5;
pub const DEFAULT_RETRY_COUNT: u32 = 10;
pub const DEFAULT_RETRY_DELAY_MILLIS: u64 = 3000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_GET_PROPERTIES: &[&str] = &[
    "id",
    "subject",
    "receivedAt",
    "htmlBody",
    "sender",
    "bodyValues",
];

pub fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("accept", HeaderValue::from_static("application/json"));
    headers
}

pub fn default_timeout() -> Duration {
    Duration::from_secs(DEFAULT_TIMEOUT_SECS)
}
