// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

mod postgres_gateway;
mod sqlite_gateway;
pub mod validation;

use anyhow::{Result, anyhow};
use chatsweep_app::{AuditEntry, format_timestamp};
use tracing::{error, info, warn};

pub use postgres_gateway::PgGateway;
pub use sqlite_gateway::SqliteGateway;
pub use validation::{DatabaseTarget, mask_database_url, parse_database_url};

pub const DEFAULT_USERS_TABLE: &str = "usuarios";
pub const DEFAULT_ID_COLUMN: &str = "userid";
pub const DEFAULT_ROLE_COLUMN: &str = "cargo";
pub const DEFAULT_ROLE: &str = "vendedor";
pub const DEFAULT_AUDIT_TABLE: &str = "logs_fechamento_chamados";

/// Where eligible users are read from and where closed chats are logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub users_table: String,
    pub id_column: String,
    pub role_column: String,
    pub role: String,
    pub audit_table: String,
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            users_table: DEFAULT_USERS_TABLE.to_owned(),
            id_column: DEFAULT_ID_COLUMN.to_owned(),
            role_column: DEFAULT_ROLE_COLUMN.to_owned(),
            role: DEFAULT_ROLE.to_owned(),
            audit_table: DEFAULT_AUDIT_TABLE.to_owned(),
        }
    }
}

impl Schema {
    pub fn validate(&self) -> Result<()> {
        validation::validate_identifier("users table", &self.users_table)?;
        validation::validate_identifier("id column", &self.id_column)?;
        validation::validate_identifier("role column", &self.role_column)?;
        validation::validate_identifier("audit table", &self.audit_table)?;
        Ok(())
    }

    fn users_query(&self, role_placeholder: &str) -> String {
        format!(
            "SELECT CAST({} AS TEXT) FROM {} WHERE {} = {role_placeholder}",
            self.id_column, self.users_table, self.role_column
        )
    }

    fn insert_statement(&self, placeholders: [&str; 4]) -> String {
        let [chat, user, tabulation, last_message] = placeholders;
        format!(
            "INSERT INTO {} (chatid, userid, tabulation_id, chat_last_message) VALUES ({chat}, {user}, {tabulation}, {last_message})",
            self.audit_table
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    Sqlite,
}

impl Backend {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }
}

/// An open database connection for one worker cycle.
pub trait Gateway {
    fn backend(&self) -> Backend;

    /// Identifiers of every user holding the configured role, as text, in
    /// database row order.
    fn fetch_eligible_users(&mut self) -> Result<Vec<String>>;

    /// Appends one row to the audit table.
    fn insert_audit_log(&mut self, entry: &AuditEntry) -> Result<()>;

    fn close(self: Box<Self>) -> Result<()>;
}

/// Opens a connection for `url` and confirms it answers a ping.
pub fn connect(url: &str, schema: &Schema) -> Result<Box<dyn Gateway>> {
    schema.validate()?;
    info!(url = %mask_database_url(url), "connecting to database");

    let gateway: Box<dyn Gateway> = match parse_database_url(url)? {
        DatabaseTarget::Postgres(params) => Box::new(PgGateway::connect(&params, schema.clone())?),
        DatabaseTarget::SqliteFile(path) => Box::new(SqliteGateway::open(&path, schema.clone())?),
        DatabaseTarget::SqliteMemory => {
            let gateway = SqliteGateway::open_memory(schema.clone())?;
            gateway.bootstrap()?;
            Box::new(gateway)
        }
    };

    info!(backend = gateway.backend().as_str(), "database connection established");
    Ok(gateway)
}

fn check_audit_entry(entry: &AuditEntry) -> Result<()> {
    info!(
        chat_id = %entry.chat_id,
        user_id = %entry.user_id,
        tabulation_id = entry.tabulation_id,
        last_message = %format_timestamp(entry.last_message),
        "inserting audit log entry"
    );

    let warnings = entry.validate().map_err(|validation| {
        error!(chat_id = %entry.chat_id, %validation, "audit log entry rejected");
        anyhow!(validation)
    })?;
    for warning in warnings {
        warn!(chat_id = %entry.chat_id, "{warning}; inserting anyway");
    }
    Ok(())
}
