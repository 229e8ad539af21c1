// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::Result;
use chatsweep_api::{ChatListing, Client};
use chatsweep_app::{Chat, UserId};
use chatsweep_db::{Gateway, Schema};
use std::thread;
use std::time::Duration;
use tracing::debug;

use crate::worker::{ChatApi, Connector, Sleeper};

/// Connects with the configured URL and schema on every cycle.
pub struct DatabaseConnector {
    url: String,
    schema: Schema,
}

impl DatabaseConnector {
    pub fn new(url: String, schema: Schema) -> Self {
        Self { url, schema }
    }
}

impl Connector for DatabaseConnector {
    fn connect(&mut self) -> Result<Box<dyn Gateway>> {
        chatsweep_db::connect(&self.url, &self.schema)
    }
}

impl ChatApi for Client {
    fn list_eligible_chats(&mut self, user: UserId) -> Result<ChatListing> {
        Client::list_eligible_chats(self, user)
    }

    fn close_chat(&mut self, chat: &Chat) -> Result<()> {
        Client::close_chat(self, chat)
    }
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        debug!(
            millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            "sleeping"
        );
        thread::sleep(duration);
    }
}
