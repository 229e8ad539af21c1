// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use chatsweep_app::format_timestamp;
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use time::macros::datetime;
use time::{Duration, OffsetDateTime, PrimitiveDateTime, UtcOffset};

const TABULATIONS: [&str; 8] = ["101", "102", "115", "203", "204", "310", "417", "520"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRecord {
    pub id: i64,
    pub tabulation: Option<String>,
    pub sent_at: Option<String>,
}

impl ChatRecord {
    /// Shape returned by the remote `GET /chats` endpoint.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert("id".to_owned(), json!(self.id));
        object.insert("situation".to_owned(), json!("in_chat"));
        if let Some(tabulation) = &self.tabulation {
            object.insert("chatTabulation".to_owned(), json!({ "id": tabulation }));
        }
        if let Some(sent_at) = &self.sent_at {
            object.insert(
                "lastMessage".to_owned(),
                json!({ "sendAt": sent_at, "body": "ok, obrigado" }),
            );
        }
        Value::Object(object)
    }
}

#[derive(Debug, Clone)]
struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    fn new(seed: u64) -> Self {
        let mut state = seed ^ 0x9E37_79B9_7F4A_7C15;
        if state == 0 {
            state = 0xA409_3822_299F_31D0;
        }
        Self { state }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);

        let mut x = self.state;
        x ^= x >> 13;
        x ^= x << 7;
        x ^= x >> 17;
        x
    }

    fn int_n(&mut self, n: usize) -> usize {
        if n <= 1 {
            return 0;
        }
        (self.next_u64() % (n as u64)) as usize
    }
}

/// Produces reproducible chat payloads for API and worker tests.
#[derive(Debug, Clone)]
pub struct ChatFaker {
    rng: DeterministicRng,
    next_id: i64,
}

impl ChatFaker {
    pub fn new(seed: u64) -> Self {
        let normalized = if seed == 0 { 1 } else { seed };
        let mut rng = DeterministicRng::new(normalized);
        let next_id = 10_000 + rng.int_n(90_000) as i64;
        Self { rng, next_id }
    }

    pub fn int_n(&mut self, n: usize) -> usize {
        self.rng.int_n(n)
    }

    /// A chat whose last message was sent `age` before `now`.
    pub fn chat_aged(&mut self, now: OffsetDateTime, age: Duration) -> ChatRecord {
        let tabulation = TABULATIONS[self.rng.int_n(TABULATIONS.len())];
        ChatRecord {
            id: self.take_id(),
            tabulation: Some(tabulation.to_owned()),
            sent_at: Some(api_time(now - age)),
        }
    }

    pub fn chat_with_fields(&mut self, sent_at: Option<&str>, tabulation: Option<&str>) -> ChatRecord {
        ChatRecord {
            id: self.take_id(),
            tabulation: tabulation.map(str::to_owned),
            sent_at: sent_at.map(str::to_owned),
        }
    }

    fn take_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1 + self.rng.int_n(7) as i64;
        id
    }
}

pub fn page_body(records: &[ChatRecord]) -> String {
    Value::Array(records.iter().map(ChatRecord::to_json).collect()).to_string()
}

pub fn empty_page() -> String {
    "[]".to_owned()
}

/// Formats an instant the way the remote API does (UTC, no offset).
pub fn api_time(value: OffsetDateTime) -> String {
    let utc = value.to_offset(UtcOffset::UTC);
    format_timestamp(PrimitiveDateTime::new(utc.date(), utc.time()))
}

pub fn fixture_now() -> OffsetDateTime {
    datetime!(2026-10-19 12:00 UTC)
}

pub fn temp_db_path() -> Result<(tempfile::TempDir, PathBuf)> {
    let dir = tempfile::tempdir().context("create temp dir")?;
    let db_path = dir.path().join("chatsweep.db");
    Ok((dir, db_path))
}

pub fn sqlite_url(path: &Path) -> String {
    format!("sqlite:{}", path.display())
}
