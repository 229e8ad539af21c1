// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, bail};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    Postgres(String),
    SqliteFile(PathBuf),
    SqliteMemory,
}

/// Picks a backend from a connection string.
///
/// `sqlite:` prefixed strings go to SQLite; everything else (URLs and
/// `key=value` strings) is handed to PostgreSQL.
pub fn parse_database_url(url: &str) -> Result<DatabaseTarget> {
    let url = url.trim();
    if url.is_empty() {
        bail!("database url is empty; set DB_URL or [database].url");
    }

    let Some(rest) = url.strip_prefix("sqlite:") else {
        return Ok(DatabaseTarget::Postgres(url.to_owned()));
    };

    let path = rest.strip_prefix("//").unwrap_or(rest);
    if path == ":memory:" {
        return Ok(DatabaseTarget::SqliteMemory);
    }
    if path.is_empty() {
        bail!("sqlite url {url:?} has no path; use sqlite:/path/to/file.db");
    }
    if path.contains('?') {
        bail!("sqlite url {url:?} contains '?'; remove query parameters and use a plain file path");
    }
    Ok(DatabaseTarget::SqliteFile(PathBuf::from(path)))
}

pub fn validate_identifier(kind: &str, identifier: &str) -> Result<()> {
    if !is_safe_identifier(identifier) {
        bail!("{kind} {identifier:?} is not a plain SQL identifier; use letters, digits and '_'");
    }
    Ok(())
}

/// Hides the middle of a connection string so credentials stay out of logs.
pub fn mask_database_url(url: &str) -> String {
    let chars = url.chars().collect::<Vec<_>>();
    if chars.len() <= 20 {
        return "***".to_owned();
    }
    let head = chars[..10].iter().collect::<String>();
    let tail = chars[chars.len() - 10..].iter().collect::<String>();
    format!("{head}***{tail}")
}

fn is_safe_identifier(identifier: &str) -> bool {
    !identifier.is_empty()
        && !identifier.as_bytes()[0].is_ascii_digit()
        && identifier
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || byte == b'_')
}
