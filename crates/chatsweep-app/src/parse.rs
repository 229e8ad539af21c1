// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::fmt;
use time::PrimitiveDateTime;
use time::macros::{datetime, format_description};

pub const TIMESTAMP_LAYOUT: &str = "YYYY-MM-DD HH:MM:SS";

/// Stand-in for a last-message time that was missing or unreadable.
pub const EPOCH_SENTINEL: PrimitiveDateTime = datetime!(1970-01-01 0:00);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    InvalidUserId(String),
    NonPositiveUserId(i64),
    NonPositiveChatId(i64),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUserId(raw) => write!(f, "invalid user id {raw:?}: not an integer"),
            Self::NonPositiveUserId(value) => {
                write!(f, "invalid user id {value}: must be greater than 0")
            }
            Self::NonPositiveChatId(value) => {
                write!(f, "invalid chat id {value}: must be greater than 0")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultReason {
    Missing,
    Blank,
    Invalid { raw: String },
}

impl fmt::Display for DefaultReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("value missing"),
            Self::Blank => f.write_str("value blank"),
            Self::Invalid { raw } => write!(f, "unparseable value {raw:?}"),
        }
    }
}

/// Outcome of reading a field that falls back to a default instead of failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed<T> {
    Value(T),
    Defaulted(DefaultReason),
}

impl<T> Parsed<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Value(value) => Some(value),
            Self::Defaulted(_) => None,
        }
    }

    pub fn reason(&self) -> Option<&DefaultReason> {
        match self {
            Self::Value(_) => None,
            Self::Defaulted(reason) => Some(reason),
        }
    }

    pub fn is_defaulted(&self) -> bool {
        matches!(self, Self::Defaulted(_))
    }
}

impl<T: Copy> Parsed<T> {
    pub fn get_or(&self, fallback: T) -> T {
        match self {
            Self::Value(value) => *value,
            Self::Defaulted(_) => fallback,
        }
    }
}

/// Reads a tabulation code. Codes arrive as strings and default to 0.
pub fn parse_tabulation(raw: Option<&str>) -> Parsed<i64> {
    let Some(raw) = raw else {
        return Parsed::Defaulted(DefaultReason::Missing);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Parsed::Defaulted(DefaultReason::Blank);
    }
    match trimmed.parse::<i64>() {
        Ok(value) => Parsed::Value(value),
        Err(_) => Parsed::Defaulted(DefaultReason::Invalid {
            raw: raw.to_owned(),
        }),
    }
}

/// Reads a `YYYY-MM-DD HH:MM:SS` timestamp. The remote API reports UTC.
pub fn parse_timestamp(raw: Option<&str>) -> Parsed<PrimitiveDateTime> {
    let Some(raw) = raw else {
        return Parsed::Defaulted(DefaultReason::Missing);
    };
    if raw.is_empty() {
        return Parsed::Defaulted(DefaultReason::Missing);
    }
    match PrimitiveDateTime::parse(
        raw,
        &format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    ) {
        Ok(value) => Parsed::Value(value),
        Err(_) => Parsed::Defaulted(DefaultReason::Invalid {
            raw: raw.to_owned(),
        }),
    }
}

pub fn format_timestamp(value: PrimitiveDateTime) -> String {
    value
        .format(&format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .unwrap_or_else(|_| "1970-01-01 00:00:00".to_owned())
}
