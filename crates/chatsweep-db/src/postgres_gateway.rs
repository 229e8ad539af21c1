// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use chatsweep_app::AuditEntry;
use native_tls::TlsConnector;
use postgres::Client;
use postgres_native_tls::MakeTlsConnector;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::{Backend, Gateway, Schema, check_audit_entry};

const PING_TIMEOUT: Duration = Duration::from_secs(10);

/// PostgreSQL-backed gateway used in production.
pub struct PgGateway {
    client: Client,
    schema: Schema,
    users_sql: String,
    insert_sql: String,
}

impl PgGateway {
    /// Connects with TLS when the server offers it (`sslmode` in `params` is
    /// honored) and pings before returning.
    pub fn connect(params: &str, schema: Schema) -> Result<Self> {
        schema.validate()?;
        let connector = TlsConnector::new().context("build TLS connector")?;
        let mut client = Client::connect(params, MakeTlsConnector::new(connector))
            .context("open postgres connection")?;

        debug!("postgres connection opened, testing connection");
        if let Err(ping_error) = client.is_valid(PING_TIMEOUT) {
            error!(error = %ping_error, "postgres ping failed");
            if let Err(close_error) = client.close() {
                debug!(error = %close_error, "closing unresponsive connection failed");
            }
            return Err(ping_error).context("connection to database failed");
        }

        Ok(Self {
            users_sql: schema.users_query("$1"),
            insert_sql: schema.insert_statement([
                "$1::BIGINT",
                "$2::BIGINT",
                "$3::BIGINT",
                "$4::TIMESTAMP",
            ]),
            client,
            schema,
        })
    }
}

impl Gateway for PgGateway {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    fn fetch_eligible_users(&mut self) -> Result<Vec<String>> {
        debug!(sql = %self.users_sql, role = %self.schema.role, "fetching eligible users");
        let rows = self
            .client
            .query(self.users_sql.as_str(), &[&self.schema.role])
            .context("query eligible users")?;

        let mut users = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            let user: String = row
                .try_get(0)
                .with_context(|| format!("scan user row {}", index + 1))?;
            users.push(user);
        }
        info!(count = users.len(), "fetched eligible users");
        Ok(users)
    }

    fn insert_audit_log(&mut self, entry: &AuditEntry) -> Result<()> {
        check_audit_entry(entry)?;
        let inserted = self
            .client
            .execute(
                self.insert_sql.as_str(),
                &[
                    &entry.chat_id.get(),
                    &entry.user_id.get(),
                    &entry.tabulation_id,
                    &entry.last_message,
                ],
            )
            .with_context(|| format!("insert audit log for chat {}", entry.chat_id))?;
        info!(chat_id = %entry.chat_id, rows = inserted, "audit log entry inserted");
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        let gateway = *self;
        gateway
            .client
            .close()
            .context("close postgres connection")
    }
}
