// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

mod user_agent;

use anyhow::{Context, Result, anyhow, bail};
use chatsweep_app::{
    Chat, ChatId, DEFAULT_CUTOFF_DAYS, DefaultReason, Eligibility, Parsed, UserId, cutoff,
    format_timestamp, parse_tabulation, parse_timestamp,
};
use reqwest::StatusCode;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};
use url::Url;

pub use user_agent::{USER_AGENTS, UserAgentPool};

pub const DEFAULT_BASE_URL: &str = "https://api.huggy.app/v3";
pub const DEFAULT_CLOSE_COMMENT: &str = "Fechado via robô.";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_PAGES: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub page_delay: Duration,
    pub cutoff_days: i64,
    pub max_pages: u32,
    pub close_comment: String,
    pub user_agent_seed: Option<u64>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            api_key: String::new(),
            timeout: DEFAULT_TIMEOUT,
            page_delay: DEFAULT_PAGE_DELAY,
            cutoff_days: DEFAULT_CUTOFF_DAYS,
            max_pages: DEFAULT_MAX_PAGES,
            close_comment: DEFAULT_CLOSE_COMMENT.to_owned(),
            user_agent_seed: None,
        }
    }
}

/// Why pagination stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// A page decoded to zero records.
    EmptyPage { page: u32 },
    /// A page body was not a JSON array of chats. Chats from earlier pages
    /// are kept.
    MalformedPage { page: u32 },
    /// `max_pages` pages were read without reaching an empty one.
    PageLimit { pages: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatListing {
    /// Due chats in page-then-array order.
    pub chats: Vec<Chat>,
    /// Number of requests made.
    pub pages: u32,
    /// Records seen but not due (too recent, missing or unreadable time, bad id).
    pub skipped: usize,
    pub termination: Termination,
}

#[derive(Debug)]
pub struct Client {
    base_url: String,
    api_key: String,
    page_delay: Duration,
    cutoff_days: i64,
    max_pages: u32,
    close_comment: String,
    agents: UserAgentPool,
    http: HttpClient,
}

impl Client {
    pub fn new(options: ClientOptions) -> Result<Self> {
        let base_url = options.base_url.trim().trim_end_matches('/').to_owned();
        if base_url.is_empty() {
            bail!("api.base_url must not be empty");
        }
        Url::parse(&base_url).with_context(|| format!("api.base_url {base_url:?} is not a URL"))?;
        if options.max_pages == 0 {
            bail!("api.max_pages must be at least 1");
        }
        if options.api_key.is_empty() {
            warn!("API key is empty; requests will be rejected until API_KEY is set");
        }

        let http = HttpClient::builder()
            .timeout(options.timeout)
            .build()
            .context("build HTTP client")?;

        Ok(Self {
            base_url,
            api_key: options.api_key,
            page_delay: options.page_delay,
            cutoff_days: options.cutoff_days,
            max_pages: options.max_pages,
            close_comment: options.close_comment,
            agents: UserAgentPool::new(options.user_agent_seed),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn list_eligible_chats(&mut self, user: UserId) -> Result<ChatListing> {
        self.list_eligible_chats_at(user, OffsetDateTime::now_utc())
    }

    /// Pages through the user's open chats and keeps those whose last message
    /// is at or before `now - cutoff_days`.
    pub fn list_eligible_chats_at(
        &mut self,
        user: UserId,
        now: OffsetDateTime,
    ) -> Result<ChatListing> {
        let cutoff = cutoff(now, self.cutoff_days);
        info!(user_id = %user, cutoff = %format_timestamp(cutoff), "fetching chats");

        let mut chats = Vec::new();
        let mut skipped = 0;
        let mut page = 0;
        let termination = loop {
            if page >= self.max_pages {
                warn!(user_id = %user, pages = page, "page limit reached; stopping pagination");
                break Termination::PageLimit { pages: page };
            }
            if page > 0 && !self.page_delay.is_zero() {
                thread::sleep(self.page_delay);
            }

            let body = self.fetch_page(user, page)?;
            let records = match serde_json::from_str::<Vec<RawChat>>(&body) {
                Ok(records) => records,
                Err(decode_error) => {
                    error!(
                        user_id = %user,
                        page,
                        error = %decode_error,
                        bytes = body.len(),
                        "chat page could not be decoded; stopping pagination"
                    );
                    break Termination::MalformedPage { page };
                }
            };
            if records.is_empty() {
                debug!(user_id = %user, page, "empty page; pagination complete");
                break Termination::EmptyPage { page };
            }

            debug!(user_id = %user, page, records = records.len(), "chat page received");
            for record in records {
                match record.into_chat() {
                    Some(chat) => match chat.eligibility(cutoff) {
                        Eligibility::Due => {
                            note_defaulted_tabulation(&chat);
                            chats.push(chat);
                        }
                        reason => {
                            debug!(chat_id = %chat.id, reason = reason.as_str(), "chat not due");
                            skipped += 1;
                        }
                    },
                    None => skipped += 1,
                }
            }
            page += 1;
        };

        let pages = match termination {
            Termination::EmptyPage { page } | Termination::MalformedPage { page } => page + 1,
            Termination::PageLimit { pages } => pages,
        };
        info!(user_id = %user, due = chats.len(), skipped, pages, "chat listing finished");
        Ok(ChatListing {
            chats,
            pages,
            skipped,
            termination,
        })
    }

    pub fn close_chat(&mut self, chat: &Chat) -> Result<()> {
        let url = format!("{}/chats/{}/close", self.base_url, chat.id);
        let request = CloseRequest {
            tabulation: chat.tabulation_id(),
            comment: &self.close_comment,
            send_feedback: false,
        };
        let agent = self.agents.pick();
        info!(chat_id = %chat.id, tabulation = request.tabulation, "closing chat");
        debug!(user_agent = agent, "request headers chosen");

        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.api_key)
            .header(USER_AGENT, agent)
            .json(&request)
            .send()
            .map_err(|error| connection_error(&self.base_url, error))?;

        let status = response.status();
        if !is_success(status) {
            let body = response.text().unwrap_or_default();
            return Err(status_error(status, &body))
                .with_context(|| format!("close chat {}", chat.id));
        }
        info!(chat_id = %chat.id, status = status.as_u16(), "chat closed");
        Ok(())
    }

    fn fetch_page(&mut self, user: UserId, page: u32) -> Result<String> {
        let mut url = Url::parse(&format!("{}/chats", self.base_url))
            .context("build chat listing URL")?;
        url.query_pairs_mut()
            .append_pair("agent", &user.to_string())
            .append_pair("situation", "in_chat")
            .append_pair("page", &page.to_string());

        let agent = self.agents.pick();
        debug!(%url, user_agent = agent, "requesting chat page");
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, agent)
            .send()
            .map_err(|error| connection_error(&self.base_url, error))?;

        let status = response.status();
        if !is_success(status) {
            let body = response.text().unwrap_or_default();
            return Err(status_error(status, &body))
                .with_context(|| format!("list chats for user {user}, page {page}"));
        }
        response
            .text()
            .with_context(|| format!("read chat page {page} for user {user}"))
    }
}

fn note_defaulted_tabulation(chat: &Chat) {
    if let Parsed::Defaulted(reason) = &chat.tabulation {
        match reason {
            DefaultReason::Missing => {
                warn!(chat_id = %chat.id, "chat has no tabulation; using 0");
            }
            other => warn!(chat_id = %chat.id, reason = %other, "tabulation unreadable; using 0"),
        }
    }
}

fn is_success(status: StatusCode) -> bool {
    matches!(status, StatusCode::OK | StatusCode::CREATED)
}

fn connection_error(base_url: &str, error: reqwest::Error) -> anyhow::Error {
    anyhow!("cannot reach {base_url} -- check api.base_url and network access ({error})")
}

fn status_error(status: StatusCode, body: &str) -> anyhow::Error {
    if let Ok(parsed) = serde_json::from_str::<ErrorEnvelope>(body)
        && let Some(message) = parsed.message.or(parsed.error)
        && !message.is_empty()
    {
        return anyhow!("request failed with status {}: {}", status.as_u16(), message);
    }

    let body = body.trim();
    if !body.is_empty() && body.len() < 100 && !body.contains('{') {
        return anyhow!("request failed with status {}: {}", status.as_u16(), body);
    }

    anyhow!("request failed with status {}", status.as_u16())
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawChat {
    #[serde(default)]
    id: i64,
    #[serde(rename = "chatTabulation", default)]
    chat_tabulation: Option<RawTabulation>,
    #[serde(rename = "lastMessage", default)]
    last_message: Option<RawLastMessage>,
}

#[derive(Debug, Deserialize)]
struct RawTabulation {
    #[serde(default)]
    id: Option<TabulationCode>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TabulationCode {
    Text(String),
    Number(i64),
}

#[derive(Debug, Deserialize)]
struct RawLastMessage {
    #[serde(rename = "sendAt", default)]
    send_at: Option<String>,
}

impl RawChat {
    fn into_chat(self) -> Option<Chat> {
        if self.id <= 0 {
            warn!(chat_id = self.id, "chat record has a non-positive id; skipping");
            return None;
        }

        let raw_time = self.last_message.and_then(|message| message.send_at);
        let last_message = parse_timestamp(raw_time.as_deref());
        let tabulation = match self.chat_tabulation.and_then(|tabulation| tabulation.id) {
            Some(TabulationCode::Number(value)) => Parsed::Value(value),
            Some(TabulationCode::Text(raw)) => parse_tabulation(Some(&raw)),
            None => parse_tabulation(None),
        };

        Some(Chat {
            id: ChatId::new(self.id),
            last_message_raw: raw_time.unwrap_or_default(),
            last_message,
            tabulation,
        })
    }
}

#[derive(Debug, Serialize)]
struct CloseRequest<'a> {
    tabulation: i64,
    comment: &'a str,
    #[serde(rename = "sendFeedback")]
    send_feedback: bool,
}
