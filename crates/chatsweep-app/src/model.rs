// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::fmt;
use time::{Duration, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::ids::*;
use crate::parse::{EPOCH_SENTINEL, Parsed, ValidationError};

pub const DEFAULT_CUTOFF_DAYS: i64 = 3;

/// Latest last-message time a chat may have and still be closed.
pub fn cutoff(now: OffsetDateTime, days: i64) -> PrimitiveDateTime {
    let now = now.to_offset(UtcOffset::UTC);
    let shifted = now - Duration::days(days);
    PrimitiveDateTime::new(shifted.date(), shifted.time())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Due,
    NotYetDue,
    MissingTimestamp,
    InvalidTimestamp,
}

impl Eligibility {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Due => "due",
            Self::NotYetDue => "last message after cutoff",
            Self::MissingTimestamp => "no last message time",
            Self::InvalidTimestamp => "unparseable last message time",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chat {
    pub id: ChatId,
    pub last_message_raw: String,
    pub last_message: Parsed<PrimitiveDateTime>,
    pub tabulation: Parsed<i64>,
}

impl Chat {
    pub fn eligibility(&self, cutoff: PrimitiveDateTime) -> Eligibility {
        match &self.last_message {
            Parsed::Value(sent_at) if *sent_at <= cutoff => Eligibility::Due,
            Parsed::Value(_) => Eligibility::NotYetDue,
            Parsed::Defaulted(crate::DefaultReason::Invalid { .. }) => {
                Eligibility::InvalidTimestamp
            }
            Parsed::Defaulted(_) => Eligibility::MissingTimestamp,
        }
    }

    pub fn tabulation_id(&self) -> i64 {
        self.tabulation.get_or(0)
    }

    pub fn last_message_or_sentinel(&self) -> PrimitiveDateTime {
        self.last_message.get_or(EPOCH_SENTINEL)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditWarning {
    NonPositiveTabulation(i64),
    SentinelTimestamp,
}

impl fmt::Display for AuditWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonPositiveTabulation(value) => write!(
                f,
                "tabulation id is {value}; the chat data may be incomplete"
            ),
            Self::SentinelTimestamp => {
                f.write_str("last message timestamp is the epoch sentinel; time data was missing")
            }
        }
    }
}

/// One row of the append-only close log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditEntry {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub tabulation_id: i64,
    pub last_message: PrimitiveDateTime,
}

impl AuditEntry {
    pub fn for_chat(chat: &Chat, user_id: UserId) -> Self {
        Self {
            chat_id: chat.id,
            user_id,
            tabulation_id: chat.tabulation_id(),
            last_message: chat.last_message_or_sentinel(),
        }
    }

    /// Hard checks fail the insert; soft findings are returned for logging.
    pub fn validate(&self) -> Result<Vec<AuditWarning>, ValidationError> {
        if !self.chat_id.is_positive() {
            return Err(ValidationError::NonPositiveChatId(self.chat_id.get()));
        }
        if !self.user_id.is_positive() {
            return Err(ValidationError::NonPositiveUserId(self.user_id.get()));
        }

        let mut warnings = Vec::new();
        if self.tabulation_id <= 0 {
            warnings.push(AuditWarning::NonPositiveTabulation(self.tabulation_id));
        }
        if self.last_message == EPOCH_SENTINEL {
            warnings.push(AuditWarning::SentinelTimestamp);
        }
        Ok(warnings)
    }
}
