// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow};
use chatsweep_app::{AuditEntry, ChatId, Parsed, UserId, format_timestamp, parse_timestamp};
use rusqlite::{Connection, OpenFlags, params};
use std::path::Path;
use tracing::{debug, info};

use crate::{Backend, Gateway, Schema, check_audit_entry};

/// SQLite-backed gateway for local runs and tests.
pub struct SqliteGateway {
    conn: Connection,
    schema: Schema,
    users_sql: String,
    insert_sql: String,
}

impl SqliteGateway {
    /// Opens an existing database file. A missing file is a connection error.
    pub fn open(path: &Path, schema: Schema) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("open database at {}", path.display()))?;
        Self::from_connection(conn, schema)
    }

    /// Opens or creates a database file and makes sure both tables exist.
    pub fn create(path: &Path, schema: Schema) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("create database at {}", path.display()))?;
        let gateway = Self::from_connection(conn, schema)?;
        gateway.bootstrap()?;
        Ok(gateway)
    }

    pub fn open_memory(schema: Schema) -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory database")?;
        Self::from_connection(conn, schema)
    }

    fn from_connection(conn: Connection, schema: Schema) -> Result<Self> {
        schema.validate()?;
        configure_connection(&conn)?;
        ping(&conn)?;
        Ok(Self {
            users_sql: schema.users_query("?1"),
            insert_sql: schema.insert_statement(["?1", "?2", "?3", "?4"]),
            conn,
            schema,
        })
    }

    pub fn raw_connection(&self) -> &Connection {
        &self.conn
    }

    pub fn bootstrap(&self) -> Result<()> {
        let ddl = format!(
            "
            CREATE TABLE IF NOT EXISTS {users} (
              {id} INTEGER,
              {role} TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS {audit} (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              chatid INTEGER NOT NULL,
              userid INTEGER NOT NULL,
              tabulation_id INTEGER NOT NULL,
              chat_last_message TEXT NOT NULL,
              created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            ",
            users = self.schema.users_table,
            id = self.schema.id_column,
            role = self.schema.role_column,
            audit = self.schema.audit_table,
        );
        self.conn.execute_batch(&ddl).context("create schema")
    }

    pub fn insert_user(&self, id: &str, role: &str) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} ({}, {}) VALUES (?1, ?2)",
            self.schema.users_table, self.schema.id_column, self.schema.role_column
        );
        self.conn
            .execute(&sql, params![id, role])
            .with_context(|| format!("insert user {id:?}"))?;
        Ok(())
    }

    pub fn audit_entries(&self) -> Result<Vec<AuditEntry>> {
        let sql = format!(
            "SELECT chatid, userid, tabulation_id, chat_last_message FROM {} ORDER BY id ASC",
            self.schema.audit_table
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("prepare audit log query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .context("query audit log")?;

        let mut entries = Vec::new();
        for row in rows {
            let (chat_id, user_id, tabulation_id, raw_time) =
                row.context("read audit log row")?;
            let Parsed::Value(last_message) = parse_timestamp(Some(&raw_time)) else {
                return Err(anyhow!(
                    "audit row for chat {chat_id} has unreadable time {raw_time:?}"
                ));
            };
            entries.push(AuditEntry {
                chat_id: ChatId::new(chat_id),
                user_id: UserId::new(user_id),
                tabulation_id,
                last_message,
            });
        }
        Ok(entries)
    }
}

impl Gateway for SqliteGateway {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    fn fetch_eligible_users(&mut self) -> Result<Vec<String>> {
        debug!(sql = %self.users_sql, role = %self.schema.role, "fetching eligible users");
        let mut stmt = self
            .conn
            .prepare(&self.users_sql)
            .context("prepare eligible users query")?;
        let rows = stmt
            .query_map(params![self.schema.role], |row| row.get::<_, String>(0))
            .context("query eligible users")?;

        let mut users = Vec::new();
        for (index, row) in rows.enumerate() {
            let user = row.with_context(|| format!("scan user row {}", index + 1))?;
            users.push(user);
        }
        info!(count = users.len(), "fetched eligible users");
        Ok(users)
    }

    fn insert_audit_log(&mut self, entry: &AuditEntry) -> Result<()> {
        check_audit_entry(entry)?;
        let inserted = self
            .conn
            .execute(
                &self.insert_sql,
                params![
                    entry.chat_id.get(),
                    entry.user_id.get(),
                    entry.tabulation_id,
                    format_timestamp(entry.last_message),
                ],
            )
            .with_context(|| format!("insert audit log for chat {}", entry.chat_id))?;
        info!(chat_id = %entry.chat_id, rows = inserted, "audit log entry inserted");
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        let gateway = *self;
        gateway
            .conn
            .close()
            .map_err(|(_, error)| error)
            .context("close sqlite connection")
    }
}

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA busy_timeout = 5000;")
        .context("configure sqlite pragmas")
}

fn ping(conn: &Connection) -> Result<()> {
    let value: i64 = conn
        .query_row("SELECT 1", [], |row| row.get(0))
        .context("ping sqlite database")?;
    debug!(value, "sqlite ping answered");
    Ok(())
}
