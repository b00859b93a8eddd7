use crate::infrastructure::command_log::{CommandLog, NoopCommandLog};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::feed_client::FeedHttpClient;
use crate::infrastructure::ics_decoder::looks_like_feed;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::time::timeout;

pub const DEFAULT_FETCH_TIMEOUT_SECONDS: u64 = 15;
pub const URL_PLACEHOLDER: &str = "{url}";

const GOOGLE_CALENDAR_HOST: &str = "calendar.google.com";
const GOOGLE_FEED_PREFIX: &str = "https://calendar.google.com/calendar/ical/";
const GOOGLE_FEED_SUFFIX: &str = "/public/basic.ics";
const LOG_SCOPE: &str = "resolve_source";

static FEED_PATH_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"calendar/ical/([^/?#]+)").expect("valid feed path regex"));
static CID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"cid=([^&]+)").expect("valid cid regex"));
static SRC_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"src=([^&]+)").expect("valid src regex"));
static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,})").expect("valid email regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayUnwrap {
    Raw,
    Envelope,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEndpoint {
    pub template: String,
    pub unwrap: RelayUnwrap,
}

impl RelayEndpoint {
    pub fn new(template: impl Into<String>, unwrap: RelayUnwrap) -> Self {
        Self {
            template: template.into(),
            unwrap,
        }
    }

    pub fn wrap(&self, feed_url: &str) -> String {
        self.template
            .replace(URL_PLACEHOLDER, &urlencoding::encode(feed_url))
    }
}

pub fn default_relays() -> Vec<RelayEndpoint> {
    vec![
        RelayEndpoint::new("https://api.allorigins.win/get?url={url}", RelayUnwrap::Envelope),
        RelayEndpoint::new("https://corsproxy.io/?{url}", RelayUnwrap::Raw),
        RelayEndpoint::new("https://api.codetabs.com/v1/proxy?quest={url}", RelayUnwrap::Raw),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub url: String,
    pub unwrap: RelayUnwrap,
}

#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch_feed(&self, url: &str) -> Result<String, InfraError>;
}

pub struct SourceResolver<C>
where
    C: FeedHttpClient,
{
    client: Arc<C>,
    relays: Vec<RelayEndpoint>,
    attempt_timeout: Duration,
    log: Arc<dyn CommandLog>,
}

impl<C> SourceResolver<C>
where
    C: FeedHttpClient,
{
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            relays: default_relays(),
            attempt_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECONDS),
            log: Arc::new(NoopCommandLog),
        }
    }

    pub fn with_relays(mut self, relays: Vec<RelayEndpoint>) -> Self {
        self.relays = relays;
        self
    }

    pub fn with_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    pub fn with_log(mut self, log: Arc<dyn CommandLog>) -> Self {
        self.log = log;
        self
    }

    pub fn candidates(&self, normalized_url: &str) -> Vec<Candidate> {
        let mut seen = HashSet::new();
        self.relays
            .iter()
            .map(|relay| Candidate {
                url: relay.wrap(normalized_url),
                unwrap: relay.unwrap,
            })
            .filter(|candidate| seen.insert(candidate.url.clone()))
            .collect()
    }

    async fn try_candidate(&self, candidate: &Candidate) -> Result<String, String> {
        let response = match timeout(
            self.attempt_timeout,
            self.client.get(&candidate.url, self.attempt_timeout),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(error)) => return Err(error.to_string()),
            Err(_) => {
                return Err(format!(
                    "timed out after {}ms",
                    self.attempt_timeout.as_millis()
                ));
            }
        };

        if !response.is_success() {
            return Err(format!("HTTP {}", response.status));
        }

        let body = match candidate.unwrap {
            RelayUnwrap::Raw => response.body,
            RelayUnwrap::Envelope => unwrap_envelope(&response.body)?,
        };

        if body.trim().is_empty() {
            return Err("Empty response".to_string());
        }
        if !looks_like_feed(&body) {
            return Err("Invalid ICS format".to_string());
        }
        Ok(body)
    }
}

#[async_trait]
impl<C> FeedFetcher for SourceResolver<C>
where
    C: FeedHttpClient,
{
    async fn fetch_feed(&self, url: &str) -> Result<String, InfraError> {
        let normalized = normalize_feed_url(url);
        let candidates = self.candidates(&normalized);
        let mut last_cause = "no relay candidates configured".to_string();

        for (index, candidate) in candidates.iter().enumerate() {
            match self.try_candidate(candidate).await {
                Ok(body) => {
                    self.log.info(
                        LOG_SCOPE,
                        &format!(
                            "fetched {normalized} via candidate {} of {}",
                            index + 1,
                            candidates.len()
                        ),
                    );
                    return Ok(body);
                }
                Err(cause) => {
                    self.log.error(
                        LOG_SCOPE,
                        &format!("candidate {} failed for {normalized}: {cause}", index + 1),
                    );
                    last_cause = cause;
                }
            }
        }

        Err(InfraError::Transport {
            url: normalized,
            attempts: candidates.len(),
            cause: last_cause,
        })
    }
}

pub fn normalize_feed_url(url: &str) -> String {
    let trimmed = url.trim();
    if !trimmed.contains(GOOGLE_CALENDAR_HOST) || is_direct_feed_link(trimmed) {
        return trimmed.to_string();
    }
    if !trimmed.contains("/calendar/") {
        return trimmed.to_string();
    }

    match extract_calendar_id(trimmed) {
        Some(calendar_id) => format!(
            "{GOOGLE_FEED_PREFIX}{}{GOOGLE_FEED_SUFFIX}",
            urlencoding::encode(&calendar_id)
        ),
        None => trimmed.to_string(),
    }
}

fn is_direct_feed_link(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    url.contains("/ical/") && path.ends_with(".ics")
}

fn extract_calendar_id(url: &str) -> Option<String> {
    [&*FEED_PATH_PATTERN, &*CID_PATTERN, &*SRC_PATTERN, &*EMAIL_PATTERN]
        .into_iter()
        .find_map(|pattern| pattern.captures(url))
        .and_then(|captures| captures.get(1))
        .and_then(|matched| urlencoding::decode(matched.as_str()).ok())
        .map(|calendar_id| calendar_id.into_owned())
        .filter(|calendar_id| !calendar_id.trim().is_empty())
}

fn unwrap_envelope(body: &str) -> Result<String, String> {
    let envelope: serde_json::Value =
        serde_json::from_str(body).map_err(|error| format!("invalid relay envelope: {error}"))?;
    Ok(envelope
        .get("contents")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::command_log::MemoryCommandLog;
    use crate::infrastructure::feed_client::FeedResponse;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const VALID_FEED: &str =
        "BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nDTSTART:20260101\r\nSUMMARY:New Year\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";

    #[derive(Debug)]
    enum FakeReply {
        Respond(u16, String),
        NetworkError,
        Hang,
    }

    #[derive(Debug)]
    struct FakeFeedClient {
        replies: Mutex<VecDeque<FakeReply>>,
        requested: Mutex<Vec<String>>,
    }

    impl FakeFeedClient {
        fn with_replies(replies: Vec<FakeReply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requested: Mutex::new(Vec::new()),
            }
        }

        fn requested(&self) -> Vec<String> {
            self.requested.lock().expect("requested lock").clone()
        }
    }

    #[async_trait]
    impl FeedHttpClient for FakeFeedClient {
        async fn get(&self, url: &str, _timeout: Duration) -> Result<FeedResponse, InfraError> {
            self.requested
                .lock()
                .expect("requested lock")
                .push(url.to_string());
            let reply = self
                .replies
                .lock()
                .expect("replies lock")
                .pop_front()
                .unwrap_or(FakeReply::NetworkError);
            match reply {
                FakeReply::Respond(status, body) => Ok(FeedResponse { status, body }),
                FakeReply::NetworkError => Err(InfraError::Transport {
                    url: url.to_string(),
                    attempts: 1,
                    cause: "network error: connection reset".to_string(),
                }),
                FakeReply::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(InfraError::Parse("unreachable".to_string()))
                }
            }
        }
    }

    #[test]
    fn normalizes_embed_link_with_holiday_calendar() {
        let url = "https://calendar.google.com/calendar/embed?src=en.usa%23holiday%40group.v.calendar.google.com&ctz=America%2FNew_York";
        assert_eq!(
            normalize_feed_url(url),
            "https://calendar.google.com/calendar/ical/en.usa%23holiday%40group.v.calendar.google.com/public/basic.ics"
        );
    }

    #[test]
    fn normalizes_cid_link() {
        let url = "https://calendar.google.com/calendar/u/0?cid=dGVhbUBleGFtcGxlLmNvbQ";
        assert_eq!(
            normalize_feed_url(url),
            "https://calendar.google.com/calendar/ical/dGVhbUBleGFtcGxlLmNvbQ/public/basic.ics"
        );
    }

    #[test]
    fn cid_takes_precedence_over_src_and_email() {
        let url = "https://calendar.google.com/calendar/r?src=other%40example.com&cid=first%40example.com";
        assert_eq!(
            normalize_feed_url(url),
            "https://calendar.google.com/calendar/ical/first%40example.com/public/basic.ics"
        );
    }

    #[test]
    fn normalizes_bare_email_identifier() {
        let url = "https://calendar.google.com/calendar/b/1/someone@example.com";
        assert_eq!(
            normalize_feed_url(url),
            "https://calendar.google.com/calendar/ical/someone%40example.com/public/basic.ics"
        );
    }

    #[test]
    fn feed_path_without_ics_suffix_is_reassembled() {
        let url = "https://calendar.google.com/calendar/ical/team%40example.com/public";
        assert_eq!(
            normalize_feed_url(url),
            "https://calendar.google.com/calendar/ical/team%40example.com/public/basic.ics"
        );
    }

    #[test]
    fn direct_feed_and_foreign_urls_are_untouched() {
        let direct = "https://calendar.google.com/calendar/ical/a%40b.com/public/basic.ics";
        assert_eq!(normalize_feed_url(direct), direct);
        assert_eq!(
            normalize_feed_url("  https://example.com/cal.ics "),
            "https://example.com/cal.ics"
        );
    }

    #[test]
    fn candidates_wrap_encoded_url_in_order_without_duplicates() {
        let client = Arc::new(FakeFeedClient::with_replies(vec![]));
        let mut relays = default_relays();
        relays.push(relays[1].clone());
        let resolver = SourceResolver::new(client).with_relays(relays);

        let candidates = resolver.candidates("https://example.com/a b.ics");
        assert_eq!(candidates.len(), 3);
        assert_eq!(
            candidates[0].url,
            "https://api.allorigins.win/get?url=https%3A%2F%2Fexample.com%2Fa%20b.ics"
        );
        assert_eq!(candidates[0].unwrap, RelayUnwrap::Envelope);
        assert!(candidates[1].url.starts_with("https://corsproxy.io/?"));
        assert!(candidates[2].url.starts_with("https://api.codetabs.com/"));
    }

    #[tokio::test]
    async fn third_candidate_succeeds_after_two_failures() {
        let client = Arc::new(FakeFeedClient::with_replies(vec![
            FakeReply::Respond(503, "unavailable".to_string()),
            FakeReply::Respond(200, "<html>blocked</html>".to_string()),
            FakeReply::Respond(200, VALID_FEED.to_string()),
        ]));
        let log = Arc::new(MemoryCommandLog::default());
        let resolver = SourceResolver::new(Arc::clone(&client)).with_log(log.clone());

        let body = resolver
            .fetch_feed("https://example.com/feed.ics")
            .await
            .expect("third candidate succeeds");

        assert_eq!(body, VALID_FEED);
        assert_eq!(client.requested().len(), 3);
        assert_eq!(log.entries().len(), 3);
    }

    #[tokio::test]
    async fn envelope_relay_is_unwrapped() {
        let envelope = serde_json::json!({ "contents": VALID_FEED, "status": { "http_code": 200 } });
        let client = Arc::new(FakeFeedClient::with_replies(vec![FakeReply::Respond(
            200,
            envelope.to_string(),
        )]));
        let resolver = SourceResolver::new(Arc::clone(&client));

        let body = resolver
            .fetch_feed("https://example.com/feed.ics")
            .await
            .expect("envelope unwrapped");
        assert_eq!(body, VALID_FEED);
        assert_eq!(client.requested().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_candidates_report_last_cause() {
        let client = Arc::new(FakeFeedClient::with_replies(vec![
            FakeReply::NetworkError,
            FakeReply::Respond(200, "   ".to_string()),
            FakeReply::Respond(404, String::new()),
        ]));
        let resolver = SourceResolver::new(client);

        let error = resolver
            .fetch_feed("https://example.com/feed.ics")
            .await
            .expect_err("all candidates fail");
        match error {
            InfraError::Transport { attempts, cause, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(cause, "HTTP 404");
            }
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unresponsive_candidate_is_bounded_by_timeout() {
        let client = Arc::new(FakeFeedClient::with_replies(vec![
            FakeReply::Hang,
            FakeReply::Respond(200, VALID_FEED.to_string()),
        ]));
        let resolver = SourceResolver::new(Arc::clone(&client))
            .with_timeout(Duration::from_millis(50));

        let body = resolver
            .fetch_feed("https://example.com/feed.ics")
            .await
            .expect("second candidate after timeout");
        assert_eq!(body, VALID_FEED);
    }

    #[test]
    fn calendar_id_with_space_stays_percent_encoded_in_feed_path() {
        let url = "https://calendar.google.com/calendar/embed?src=a%20b%40example.com";
        assert_eq!(
            normalize_feed_url(url),
            "https://calendar.google.com/calendar/ical/a%20b%40example.com/public/basic.ics"
        );
    }

    #[test]
    fn calendar_id_that_is_not_utf8_is_left_unresolved() {
        let url = "https://calendar.google.com/calendar/embed?src=%FF%FE";
        assert_eq!(normalize_feed_url(url), url);
        assert_eq!(
            extract_calendar_id("https://calendar.google.com/calendar/r?cid=a%40b.com"),
            Some("a@b.com".to_string())
        );
    }
}
