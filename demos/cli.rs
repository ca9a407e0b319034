use clap::Parser;
use jmap_client_rs::{fetch_email, Config, Error, FetchOutcome, Matcher};

#[derive(Parser, Debug)]
#[command(
    name = "jmap-fetch",
    about = "Poll a JMAP mailbox until a matching email arrives",
    arg_required_else_help = true
)]
struct Cli {
    #[arg(short, long, required = true, help = "Account username")]
    username: String,

    #[arg(long, help = "Password (Basic authentication)")]
    password: Option<String>,

    #[arg(long, help = "Bearer token (takes precedence over --password)")]
    token: Option<String>,

    #[arg(long, required = true, help = "JMAP server hostname")]
    hostname: String,

    #[arg(long, help = "Exact subject to wait for")]
    subject: Option<String>,

    #[arg(long, help = "Subject pattern (regex)")]
    subject_pattern: Option<String>,

    #[arg(long, help = "Exact body text to wait for")]
    body: Option<String>,

    #[arg(long, help = "Body pattern (regex)")]
    body_pattern: Option<String>,

    #[arg(long, default_value = "inbox", help = "Mailbox role to poll")]
    mailbox: String,

    #[arg(long, default_value_t = 5, help = "How many of the newest messages to fetch")]
    limit: usize,

    #[arg(long, default_value_t = 10, help = "Maximum number of polling attempts")]
    retries: u32,

    #[arg(long, default_value_t = 3000, help = "Delay between attempts in milliseconds")]
    delay_millis: u64,

    #[arg(long, help = "Proxy URL (optional)")]
    proxy: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = Config::new(cli.hostname, cli.username).mailbox_name(cli.mailbox);
    config.email_query_limit = cli.limit;
    config.maximum_retry_count = cli.retries;
    config.retry_delay_millis = cli.delay_millis;
    config.proxy_url = cli.proxy;

    if let Some(password) = cli.password {
        config = config.password(password);
    }
    if let Some(token) = cli.token {
        config = config.token(token);
    }
    if let Some(subject) = cli.subject {
        config = config.subject(Matcher::exact(subject));
    }
    if let Some(pattern) = cli.subject_pattern {
        config = config.subject(Matcher::pattern(&pattern)?);
    }
    if let Some(body) = cli.body {
        config = config.body(Matcher::exact(body));
    }
    if let Some(pattern) = cli.body_pattern {
        config = config.body(Matcher::pattern(&pattern)?);
    }

    let retries = config.maximum_retry_count;
    match fetch_email(config).await? {
        FetchOutcome::Found(email) => {
            println!("Found email: {}", email.id);
            println!(
                "Subject: {}",
                email.subject.as_deref().unwrap_or("(no subject)")
            );
            if let Some(sender) = email.sender.as_ref().and_then(|s| s.first()) {
                if let Some(address) = &sender.email {
                    println!("From: {address}");
                }
            }
            if let Some(received) = email.received_at {
                println!("Received: {received}");
            }
            let text = email.html_text();
            if !text.is_empty() {
                println!();
                println!("{text}");
            }
        }
        FetchOutcome::TimedOut => {
            println!("No matching email after {retries} attempt(s).");
        }
    }

    Ok(())
}
