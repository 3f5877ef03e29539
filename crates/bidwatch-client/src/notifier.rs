use std::time::Duration;

use bidwatch_core::error::AppError;
use bidwatch_core::models::Listing;
use bidwatch_core::traits::Notifier;
use reqwest::Client;
use serde::Serialize;

pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Discord rejects messages over 2000 characters; leave room for the part prefix.
pub const MESSAGE_CHUNK_LIMIT: usize = 1900;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Posts listings to a Discord channel through the bot REST API.
///
/// Each listing becomes a header message followed by its description split
/// into chunks. A fresh HTTP client is built per [`deliver`](Notifier::deliver)
/// call, so no connection outlives a batch.
#[derive(Clone)]
pub struct DiscordNotifier {
    token: String,
    channel_id: String,
    api_base: String,
    timeout: Duration,
}

impl DiscordNotifier {
    pub fn new(token: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            channel_id: channel_id.into(),
            api_base: DISCORD_API_BASE.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn send_message(&self, client: &Client, content: &str) -> Result<(), AppError> {
        let url = format!("{}/channels/{}/messages", self.api_base, self.channel_id);

        let response = client
            .post(&url)
            .header("Authorization", format!("Bot {}", self.token))
            .json(&CreateMessage { content })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout.as_secs())
                } else if e.is_connect() {
                    AppError::NetworkError(format!("Connection failed: {e}"))
                } else {
                    AppError::NotifierError(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(AppError::RateLimitExceeded);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::NotifierError(format!(
                "Discord returned HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct CreateMessage<'a> {
    content: &'a str,
}

impl Notifier for DiscordNotifier {
    async fn deliver(&self, listings: &[Listing]) -> Result<(), AppError> {
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| AppError::NotifierError(e.to_string()))?;

        let total = listings.len();
        for (i, listing) in listings.iter().enumerate() {
            let messages = listing_messages(listing);
            tracing::info!(
                listing_id = %listing.id,
                position = i + 1,
                total,
                messages = messages.len(),
                "Sending listing to Discord"
            );
            for message in &messages {
                self.send_message(&client, message).await?;
            }
        }
        Ok(())
    }
}

/// `**title** (ID: id)`, agency and status, then the detail link.
pub fn format_header(listing: &Listing) -> String {
    format!(
        "**{}** (ID: {})\nAgency: {} | Status: {}\n<{}>",
        listing.title, listing.id, listing.agency, listing.status, listing.detail_url
    )
}

/// Every message posted for one listing, in order. No message exceeds
/// [`MESSAGE_CHUNK_LIMIT`] characters plus the part prefix.
pub fn listing_messages(listing: &Listing) -> Vec<String> {
    let mut messages = split_into_chunks(&format_header(listing), MESSAGE_CHUNK_LIMIT);
    let description = listing.description.as_deref().unwrap_or_default().trim();
    if description.is_empty() {
        return messages;
    }

    let chunks = split_into_chunks(description, MESSAGE_CHUNK_LIMIT);
    let parts = chunks.len();
    if parts == 1 {
        messages.extend(chunks);
    } else {
        messages.extend(
            chunks
                .into_iter()
                .enumerate()
                .map(|(i, chunk)| format!("(part {}/{parts})\n{chunk}", i + 1)),
        );
    }
    messages
}

/// Split `text` into pieces of at most `limit` characters.
///
/// A piece ends at the last newline inside the limit unless that newline
/// sits before 60% of it, in which case the text is cut hard at the limit.
/// Newlines at the start of the following piece are dropped.
pub fn split_into_chunks(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        let Some((hard_cut, _)) = remaining.char_indices().nth(limit) else {
            chunks.push(remaining.to_string());
            break;
        };

        let window = &remaining[..hard_cut];
        let cut = match window.rfind('\n') {
            Some(at) if window[..at].chars().count() * 5 >= limit * 3 => at,
            _ => hard_cut,
        };

        chunks.push(remaining[..cut].to_string());
        remaining = remaining[cut..].trim_start_matches('\n');
    }

    chunks
}

/// Notifier for dry runs: logs what would have been sent.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn deliver(&self, listings: &[Listing]) -> Result<(), AppError> {
        for listing in listings {
            tracing::info!(
                listing_id = %listing.id,
                title = %listing.title,
                agency = %listing.agency,
                status = %listing.status,
                url = %listing.detail_url,
                has_description = listing.description.is_some(),
                "Dry run: would notify"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::serve_once;

    fn listing(description: Option<&str>) -> Listing {
        Listing::new(
            "6100059871",
            "Case Management Modernization",
            "Human Services",
            "IT",
            "Open",
            "https://portal.test/Procurement_Details.aspx?id=6100059871",
        )
        .with_description(description.map(str::to_string))
    }

    #[test]
    fn header_layout() {
        assert_eq!(
            format_header(&listing(None)),
            "**Case Management Modernization** (ID: 6100059871)\n\
             Agency: Human Services | Status: Open\n\
             <https://portal.test/Procurement_Details.aspx?id=6100059871>"
        );
    }

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_into_chunks("hello", 10), vec!["hello"]);
        assert_eq!(split_into_chunks("exactly10!", 10), vec!["exactly10!"]);
        assert!(split_into_chunks("", 10).is_empty());
    }

    #[test]
    fn prefers_late_newline() {
        // newline at 7 of 10 is past 60%
        let text = "aaaaaaa\nbbbbbbbbb";
        assert_eq!(split_into_chunks(text, 10), vec!["aaaaaaa", "bbbbbbbbb"]);
    }

    #[test]
    fn early_newline_forces_hard_cut() {
        // newline at 2 of 10 is too early
        let text = "aa\nbbbbbbbbbbbb";
        assert_eq!(split_into_chunks(text, 10), vec!["aa\nbbbbbbb", "bbbbb"]);
    }

    #[test]
    fn counts_characters_not_bytes() {
        let text = "é".repeat(25);
        let chunks = split_into_chunks(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn no_chunk_exceeds_limit() {
        let text = "word ".repeat(2000);
        let chunks = split_into_chunks(&text, MESSAGE_CHUNK_LIMIT);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= MESSAGE_CHUNK_LIMIT));
    }

    #[test]
    fn messages_without_description_is_header_only() {
        assert_eq!(listing_messages(&listing(None)).len(), 1);
        assert_eq!(listing_messages(&listing(Some("   "))).len(), 1);
    }

    #[test]
    fn single_chunk_has_no_part_prefix() {
        let messages = listing_messages(&listing(Some("A short scope of work.")));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1], "A short scope of work.");
    }

    #[test]
    fn long_description_is_numbered() {
        let long = "x".repeat(MESSAGE_CHUNK_LIMIT * 2 + 10);
        let messages = listing_messages(&listing(Some(&long)));
        assert_eq!(messages.len(), 4);
        assert!(messages[1].starts_with("(part 1/3)\n"));
        assert!(messages[3].starts_with("(part 3/3)\n"));
        assert!(messages.iter().all(|m| m.chars().count() <= 2000));
    }

    #[test]
    fn oversized_header_is_split() {
        let mut long = listing(Some("Scope of work."));
        long.title = "T".repeat(2100);

        let messages = listing_messages(&long);
        assert_eq!(messages.len(), 3);
        assert!(messages[0].starts_with("**TTT"));
        assert!(messages[1].ends_with("6100059871>"));
        assert_eq!(messages[2], "Scope of work.");
        assert!(messages.iter().all(|m| m.chars().count() <= MESSAGE_CHUNK_LIMIT));
    }

    #[tokio::test]
    async fn posts_header_to_channel() {
        let (base, request) = serve_once(200, "application/json", "{}").await;
        let notifier = DiscordNotifier::new("bot-token", "12345").with_api_base(&base);

        notifier.deliver(&[listing(None)]).await.unwrap();

        let request = request.await.unwrap();
        assert!(request.head.starts_with("POST /channels/12345/messages"));
        assert!(request.head.contains("Bot bot-token"));
        let sent: serde_json::Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(sent["content"], format_header(&listing(None)));
    }

    #[tokio::test]
    async fn rejected_message_fails_the_batch() {
        let (base, _request) = serve_once(403, "application/json", r#"{"message":"Missing Access"}"#).await;
        let notifier = DiscordNotifier::new("bot-token", "12345").with_api_base(&base);

        let err = notifier
            .deliver(&[listing(None), listing(None)])
            .await
            .unwrap_err();
        match err {
            AppError::NotifierError(msg) => assert!(msg.contains("403"), "{msg}"),
            other => panic!("expected NotifierError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rate_limited_channel_maps_to_rate_limit() {
        let (base, _request) = serve_once(429, "application/json", "{}").await;
        let notifier = DiscordNotifier::new("bot-token", "12345").with_api_base(&base);

        let err = notifier.deliver(&[listing(None)]).await.unwrap_err();
        assert!(matches!(err, AppError::RateLimitExceeded));
    }

    #[tokio::test]
    async fn empty_batch_sends_nothing() {
        let notifier = DiscordNotifier::new("bot-token", "12345").with_api_base("http://127.0.0.1:9");
        notifier.deliver(&[]).await.unwrap();
    }

    #[tokio::test]
    async fn log_notifier_always_succeeds() {
        LogNotifier.deliver(&[listing(Some("text"))]).await.unwrap();
    }
}
