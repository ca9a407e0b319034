pub mod client;
pub mod constants;
pub mod error;
pub mod models;

pub use client::{fetch_email, JmapClient};
pub use constants::{
    default_timeout, CORE_CAPABILITY, DEFAULT_GET_PROPERTIES, DEFAULT_MAILBOX_NAME,
    DEFAULT_QUERY_LIMIT, DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY_MILLIS, DEFAULT_TIMEOUT_SECS,
    MAIL_CAPABILITY, WELL_KNOWN_PATH,
};
pub use error::Error;
pub use models::{
    Config, Email, EmailAddress, EmailBodyPart, EmailBodyValue, FetchOutcome, Matcher,
    SearchCriteria, Selector, Session,
};
