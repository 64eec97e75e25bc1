//! Turns raw portal payloads into short summaries.
//!
//! Each new post or message thread is stripped to plain text, summarized in
//! one sentence and classified as important or not. Items from the last day
//! also feed one combined summary.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::DigestConfig;
use crate::error::CoreError;
use crate::llm::{ChatSession, TextOracle, is_affirmative};
use crate::portal::{PortalPayloads, id_string};
use crate::store::SeenStore;

const SUMMARY_PROMPT: &str = "Here is a message: <begin message>{text}</end message> \
Please make a one sentence summary.";
const IMPORTANCE_PROMPT: &str =
    "Does the message contain important information? Please answer 'yes' or 'no'.";
const DAILY_PROMPT: &str = "Here are all of today's messages from the school:\n{messages}\n\
Please make a short summary of the messages.";

/// Where an item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    /// A post on the portal wall.
    Post,
    /// The latest message of a thread.
    Message,
}

/// One summarized post or message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestItem {
    /// Post or message.
    pub kind: ItemKind,
    /// Portal id, normalized to a string.
    pub id: String,
    /// Post title or thread subject.
    pub title: String,
    /// Display name of the author.
    pub sender: String,
    /// Plain text of the item.
    pub text: String,
    /// One-sentence summary from the model.
    pub summary: String,
    /// Whether the model judged the item important.
    pub important: bool,
    /// When the item was posted or sent.
    pub sent_at: DateTime<Utc>,
}

/// Result of one digest run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digest {
    /// When the digest was built.
    pub updated_at: DateTime<Utc>,
    /// Posts first, then messages, in payload order.
    pub items: Vec<DigestItem>,
    /// Combined summary of the last day's items; empty when there were none.
    #[serde(default)]
    pub daily_summary: String,
}

impl Digest {
    /// Whether any item was judged important.
    #[must_use]
    pub fn any_important(&self) -> bool {
        self.items.iter().any(|item| item.important)
    }
}

/// Why a single item was left out of the digest.
#[derive(Debug, Error)]
pub enum DigestError {
    /// A required field was missing or had the wrong type.
    #[error("{kind:?} item is missing {field}")]
    MissingField {
        /// Item kind.
        kind: ItemKind,
        /// Dotted path of the field.
        field: &'static str,
    },

    /// The timestamp could not be parsed.
    #[error("{kind:?} {id} has unreadable timestamp {raw:?}")]
    BadTimestamp {
        /// Item kind.
        kind: ItemKind,
        /// Item id.
        id: String,
        /// The raw value.
        raw: String,
    },

    /// The model failed to answer.
    #[error("{kind:?} {id}: {source}")]
    Oracle {
        /// Item kind.
        kind: ItemKind,
        /// Item id.
        id: String,
        /// Underlying error.
        source: CoreError,
    },
}

/// Fields pulled from one post or thread before summarizing.
#[derive(Debug)]
struct RawItem {
    kind: ItemKind,
    id: String,
    title: String,
    sender: String,
    html: String,
    sent_at: DateTime<Utc>,
}

impl RawItem {
    fn from_post(post: &Value) -> Result<Self, DigestError> {
        let kind = ItemKind::Post;
        Self::extract(
            kind,
            &post["id"],
            &post["title"],
            &post["ownerProfile"]["fullName"],
            &post["content"]["html"],
            &post["timestamp"],
            ["id", "title", "ownerProfile.fullName", "content.html", "timestamp"],
        )
    }

    fn from_thread(thread: &Value) -> Result<Self, DigestError> {
        let kind = ItemKind::Message;
        let latest = &thread["latestMessage"];
        Self::extract(
            kind,
            &latest["id"],
            &thread["subject"],
            &thread["creator"]["fullName"],
            &latest["text"]["html"],
            &latest["sendDateTime"],
            [
                "latestMessage.id",
                "subject",
                "creator.fullName",
                "latestMessage.text.html",
                "latestMessage.sendDateTime",
            ],
        )
    }

    fn extract(
        kind: ItemKind,
        id: &Value,
        title: &Value,
        sender: &Value,
        html: &Value,
        timestamp: &Value,
        fields: [&'static str; 5],
    ) -> Result<Self, DigestError> {
        let missing = |field| DigestError::MissingField { kind, field };
        let text = |value: &Value, field| {
            value
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| missing(field))
        };

        let id = id_string(id).ok_or_else(|| missing(fields[0]))?;
        let title = text(title, fields[1])?;
        let sender = text(sender, fields[2])?;
        let html = text(html, fields[3])?;
        let raw_time = text(timestamp, fields[4])?;
        let sent_at = parse_timestamp(&raw_time).ok_or_else(|| DigestError::BadTimestamp {
            kind,
            id: id.clone(),
            raw: raw_time,
        })?;

        Ok(Self {
            kind,
            id,
            title,
            sender,
            html,
            sent_at,
        })
    }
}

/// Builds digests with a language model.
#[derive(Debug)]
pub struct Digester<'a, O> {
    oracle: &'a O,
    config: DigestConfig,
    system_prompt: String,
}

impl<'a, O: TextOracle + Sync> Digester<'a, O> {
    /// Create a digester.
    #[must_use]
    pub fn new(oracle: &'a O, config: DigestConfig, system_prompt: &str) -> Self {
        Self {
            oracle,
            config,
            system_prompt: system_prompt.to_string(),
        }
    }

    /// Summarize every new, recent item in `payloads`.
    ///
    /// Summarized items and items older than the recency window are marked
    /// in `store`. Items the model failed on stay unmarked so the next run
    /// tries them again. The store is not saved here.
    pub async fn digest(
        &self,
        payloads: &PortalPayloads,
        store: &mut SeenStore,
        now: DateTime<Utc>,
    ) -> Digest {
        let cutoff = window_start(now, Duration::try_days(i64::from(self.config.recency_days)));
        let daily_cutoff =
            window_start(now, Duration::try_hours(i64::from(self.config.daily_window_hours)));

        let raw = payloads
            .posts()
            .iter()
            .map(RawItem::from_post)
            .chain(payloads.threads().iter().map(RawItem::from_thread));

        let mut items = Vec::new();
        let mut daily = String::new();
        for item in raw {
            let item = match item {
                Ok(item) => item,
                Err(e) => {
                    log::warn!("skipping item: {e}");
                    continue;
                }
            };

            if is_seen(store, item.kind, &item.id) {
                log::trace!("{:?} {} already seen", item.kind, item.id);
                continue;
            }
            if item.sent_at < cutoff {
                log::debug!("{:?} {} is older than the recency window", item.kind, item.id);
                mark_seen(store, item.kind, &item.id);
                continue;
            }

            match self.summarize(item).await {
                Ok(summarized) => {
                    mark_seen(store, summarized.kind, &summarized.id);
                    if summarized.sent_at > daily_cutoff {
                        daily.push_str(&format!("<begin message>{}</end message>\n", summarized.text));
                    }
                    items.push(summarized);
                }
                Err(e) => log::warn!("skipping item: {e}"),
            }
        }

        let daily_summary = if daily.is_empty() {
            String::new()
        } else {
            let mut session = ChatSession::new(self.oracle, &self.system_prompt);
            session
                .ask(&DAILY_PROMPT.replace("{messages}", &daily))
                .await
                .unwrap_or_else(|e| {
                    log::warn!("daily summary failed: {e}");
                    String::new()
                })
        };

        log::info!(
            "digest: {} new item(s), {} important",
            items.len(),
            items.iter().filter(|i| i.important).count()
        );

        Digest {
            updated_at: now,
            items,
            daily_summary,
        }
    }

    async fn summarize(&self, item: RawItem) -> Result<DigestItem, DigestError> {
        let text = strip_html(&item.html);
        let mut session = ChatSession::new(self.oracle, &self.system_prompt);

        let oracle_error = |source| DigestError::Oracle {
            kind: item.kind,
            id: item.id.clone(),
            source,
        };
        let summary = session
            .ask(&SUMMARY_PROMPT.replace("{text}", &text))
            .await
            .map_err(oracle_error)?;
        let answer = session.ask(IMPORTANCE_PROMPT).await.map_err(oracle_error)?;

        Ok(DigestItem {
            kind: item.kind,
            id: item.id,
            title: item.title,
            sender: item.sender,
            text,
            summary,
            important: is_affirmative(&answer),
            sent_at: item.sent_at,
        })
    }
}

fn is_seen(store: &SeenStore, kind: ItemKind, id: &str) -> bool {
    match kind {
        ItemKind::Post => store.contains_post(id),
        ItemKind::Message => store.contains_message(id),
    }
}

fn mark_seen(store: &mut SeenStore, kind: ItemKind, id: &str) {
    match kind {
        ItemKind::Post => store.mark_post(id),
        ItemKind::Message => store.mark_message(id),
    }
}

/// Parse the portal's ISO 8601 timestamps, with or without a colon in the offset.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z"))
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Convert message HTML to a single line of plain text.
///
/// Tags are dropped, common and numeric entities decoded, line breaks become
/// spaces and runs of whitespace collapse to one space.
#[must_use]
pub fn strip_html(html: &str) -> String {
    let mut stripped = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                // Tags separate words, e.g. `a<br>b`
                stripped.push(' ');
            }
            _ if !in_tag => stripped.push(ch),
            _ => {}
        }
    }

    let decoded = decode_numeric_entities(
        &stripped
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&nbsp;", " "),
    )
    .replace("&amp;", "&");

    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Decode numeric entities such as `&#230;` and `&#xE6;`.
fn decode_numeric_entities(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(start) = rest.find("&#") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let decoded = after.find(';').and_then(|end| {
            let digits = &after[..end];
            let code = match digits.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => digits.parse().ok(),
            };
            code.and_then(char::from_u32).map(|c| (c, end))
        });

        match decoded {
            Some((c, end)) => {
                result.push(c);
                rest = &after[end + 1..];
            }
            None => {
                result.push_str("&#");
                rest = after;
            }
        }
    }
    result.push_str(rest);
    result
}

/// Start of a window reaching `span` back from `now`. A window too wide for
/// the calendar starts at the earliest representable time.
fn window_start(now: DateTime<Utc>, span: Option<Duration>) -> DateTime<Utc> {
    span.and_then(|span| now.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use serde_json::json;
    use std::future::Future;
    use std::sync::Mutex;

    /// Answers every summary request with a fixed text and says "yes" when
    /// the summarized text mentions `important_word`. Fails for texts
    /// containing `fail_word`.
    struct FakeOracle {
        important_word: &'static str,
        fail_word: &'static str,
        calls: Mutex<u32>,
    }

    impl FakeOracle {
        fn new() -> Self {
            Self {
                important_word: "birthday",
                fail_word: "BROKEN",
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().expect("lock")
        }
    }

    impl TextOracle for FakeOracle {
        fn complete(&self, messages: &[crate::llm::ChatMessage]) -> impl Future<Output = Result<String>> + Send {
            *self.calls.lock().expect("lock") += 1;
            let first_user = messages
                .iter()
                .find(|m| m.role == "user")
                .map(|m| m.content.clone())
                .unwrap_or_default();
            let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();

            let reply = if first_user.contains(self.fail_word) {
                Err(CoreError::Model("model crashed".to_string()))
            } else if last.starts_with("Does the message") {
                Ok(if first_user.contains(self.important_word) {
                    "Yes.".to_string()
                } else {
                    "No.".to_string()
                })
            } else if last.starts_with("Here are all") {
                Ok("Busy day.".to_string())
            } else {
                Ok("A short summary. ### Human: more".to_string())
            };
            async move { reply }
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-10T12:00:00+00:00")
            .expect("time")
            .with_timezone(&Utc)
    }

    fn post(id: u64, html: &str, timestamp: &str) -> Value {
        json!({
            "id": id,
            "title": format!("Post {id}"),
            "content": {"html": html},
            "ownerProfile": {"fullName": "Mette Hansen"},
            "timestamp": timestamp
        })
    }

    fn thread(id: &str, html: &str, sent: &str) -> Value {
        json!({
            "subject": format!("Thread {id}"),
            "creator": {"fullName": "Lars Nielsen"},
            "latestMessage": {"id": id, "text": {"html": html}, "sendDateTime": sent}
        })
    }

    fn payloads(posts: Vec<Value>, threads: Vec<Value>) -> PortalPayloads {
        PortalPayloads::new(
            json!({"data": {"posts": posts}}),
            json!({"data": {"threads": threads}}),
        )
    }

    fn store() -> (tempfile::TempDir, SeenStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SeenStore::load(&dir.path().join("seen.json"));
        (dir, store)
    }

    #[tokio::test]
    async fn new_items_are_summarized_and_marked() {
        let oracle = FakeOracle::new();
        let digester = Digester::new(&oracle, DigestConfig::default(), "be brief");
        let (_dir, mut store) = store();

        let input = payloads(
            vec![post(1, "<p>Ida's birthday<br>on Friday</p>", "2024-03-10T08:00:00+01:00")],
            vec![thread("m-9", "Lost mittens", "2024-03-08T09:30:00Z")],
        );
        let digest = digester.digest(&input, &mut store, now()).await;

        assert_eq!(digest.items.len(), 2);
        let first = &digest.items[0];
        assert_eq!(first.kind, ItemKind::Post);
        assert_eq!(first.id, "1");
        assert_eq!(first.text, "Ida's birthday on Friday");
        assert_eq!(first.summary, "A short summary.");
        assert!(first.important);
        assert!(!digest.items[1].important);
        assert!(digest.any_important());

        // Only the post is within the last day
        assert_eq!(digest.daily_summary, "Busy day.");
        assert!(store.contains_post("1"));
        assert!(store.contains_message("m-9"));
    }

    #[tokio::test]
    async fn seen_items_are_skipped_without_model_calls() {
        let oracle = FakeOracle::new();
        let digester = Digester::new(&oracle, DigestConfig::default(), "be brief");
        let (_dir, mut store) = store();
        store.mark_post("1");

        let input = payloads(vec![post(1, "old news", "2024-03-10T08:00:00Z")], vec![]);
        let digest = digester.digest(&input, &mut store, now()).await;

        assert!(digest.items.is_empty());
        assert!(digest.daily_summary.is_empty());
        assert_eq!(oracle.calls(), 0);
    }

    #[tokio::test]
    async fn items_outside_recency_window_are_marked_but_not_summarized() {
        let oracle = FakeOracle::new();
        let digester = Digester::new(&oracle, DigestConfig::default(), "be brief");
        let (_dir, mut store) = store();

        let input = payloads(vec![post(5, "ancient", "2024-03-01T08:00:00Z")], vec![]);
        let digest = digester.digest(&input, &mut store, now()).await;

        assert!(digest.items.is_empty());
        assert!(store.contains_post("5"));
        assert_eq!(oracle.calls(), 0);
    }

    #[tokio::test]
    async fn malformed_items_do_not_stop_the_rest() {
        let oracle = FakeOracle::new();
        let digester = Digester::new(&oracle, DigestConfig::default(), "be brief");
        let (_dir, mut store) = store();

        let input = payloads(
            vec![
                json!({"id": 2, "title": "No content"}),
                post(3, "bad time", "last tuesday"),
                post(4, "fine", "2024-03-09T10:00:00Z"),
            ],
            vec![],
        );
        let digest = digester.digest(&input, &mut store, now()).await;

        assert_eq!(digest.items.len(), 1);
        assert_eq!(digest.items[0].id, "4");
        assert!(!store.contains_post("2"));
        assert!(!store.contains_post("3"));
    }

    #[tokio::test]
    async fn oracle_failure_leaves_item_unseen() {
        let oracle = FakeOracle::new();
        let digester = Digester::new(&oracle, DigestConfig::default(), "be brief");
        let (_dir, mut store) = store();

        let input = payloads(
            vec![],
            vec![
                thread("m-1", "BROKEN text", "2024-03-10T10:00:00Z"),
                thread("m-2", "all good", "2024-03-10T10:00:00Z"),
            ],
        );
        let digest = digester.digest(&input, &mut store, now()).await;

        assert_eq!(digest.items.len(), 1);
        assert!(!store.contains_message("m-1"));
        assert!(store.contains_message("m-2"));
    }

    #[tokio::test]
    async fn huge_windows_keep_every_item() {
        let oracle = FakeOracle::new();
        let config = DigestConfig {
            recency_days: u32::MAX,
            daily_window_hours: u32::MAX,
        };
        let digester = Digester::new(&oracle, config, "be brief");
        let (_dir, mut store) = store();

        let input = payloads(vec![post(5, "ancient", "1999-03-01T08:00:00Z")], vec![]);
        let digest = digester.digest(&input, &mut store, now()).await;

        assert_eq!(digest.items.len(), 1);
        assert_eq!(digest.daily_summary, "Busy day.");
    }

    #[test]
    fn window_start_saturates() {
        assert_eq!(window_start(now(), None), DateTime::<Utc>::MIN_UTC);
        assert_eq!(
            window_start(DateTime::<Utc>::MIN_UTC, Duration::try_hours(1)),
            DateTime::<Utc>::MIN_UTC
        );
        assert_eq!(
            window_start(now(), Duration::try_hours(2)).to_rfc3339(),
            "2024-03-10T10:00:00+00:00"
        );
    }

    #[test]
    fn strip_html_flattens_markup() {
        assert_eq!(
            strip_html("<div><p>Kære forældre,</p>\n<p>Husk &quot;madpakke&quot; &amp; t&#248;j</p></div>"),
            "Kære forældre, Husk \"madpakke\" & tøj"
        );
        assert_eq!(strip_html("a<br/>b"), "a b");
        assert_eq!(strip_html("&#xE6;ble &#bogus"), "æble &#bogus");
        assert_eq!(strip_html("&amp;lt;"), "&lt;");
    }

    #[test]
    fn timestamps_accept_common_offsets() {
        assert!(parse_timestamp("2024-03-10T08:00:00+01:00").is_some());
        assert!(parse_timestamp("2024-03-10T08:00:00+0100").is_some());
        assert!(parse_timestamp("2024-03-10T08:00:00.123+0100").is_some());
        assert!(parse_timestamp("2024-03-10").is_none());
    }

    #[test]
    fn digest_round_trips_through_json() {
        let digest = Digest {
            updated_at: now(),
            items: vec![],
            daily_summary: String::new(),
        };
        let json = serde_json::to_string(&digest).expect("serialize");
        let back: Digest = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, digest);
        assert!(!back.any_important());
    }
}
