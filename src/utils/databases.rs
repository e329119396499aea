// dbvault/src/utils/databases.rs
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection as _;
use std::time::Duration;
use tracing::{debug, info};

use super::BinaryResolver;
use super::process::ToolCommand;
use crate::config::{Connection, DatabaseKind};
use crate::errors::{AppError, Result};

pub const MONGO_SHELL_TOOL: &str = "mongosh";

/// Server-internal databases hidden from listings.
pub const MYSQL_SYSTEM_DATABASES: &[&str] = &["information_schema", "performance_schema", "mysql", "sys"];
pub const POSTGRES_SYSTEM_DATABASES: &[&str] = &["postgres"];
pub const MONGO_SYSTEM_DATABASES: &[&str] = &["admin", "local", "config"];

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const MONGO_LIST_SCRIPT: &str =
    "db.adminCommand({ listDatabases: 1, nameOnly: true }).databases.forEach(d => print(d.name))";

/// Drops system databases and sorts what is left.
pub fn user_databases(kind: DatabaseKind, names: Vec<String>) -> Vec<String> {
    let hidden = match kind {
        DatabaseKind::Mysql => MYSQL_SYSTEM_DATABASES,
        DatabaseKind::Postgres => POSTGRES_SYSTEM_DATABASES,
        DatabaseKind::Mongo => MONGO_SYSTEM_DATABASES,
    };
    let mut names: Vec<String> = names
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty() && !hidden.contains(&n.as_str()))
        .collect();
    names.sort();
    names.dedup();
    names
}

pub fn mongo_list_command(resolver: &BinaryResolver, conn: &Connection) -> ToolCommand {
    let bin = resolver.resolve(MONGO_SHELL_TOOL, conn.tools_directory.as_deref());
    let mut cmd = ToolCommand::new(MONGO_SHELL_TOOL, bin)
        .arg("--host")
        .arg(format!("{}:{}", conn.host, conn.port));
    if conn.has_username() {
        cmd = cmd
            .arg("-u")
            .arg(&conn.username)
            .arg("-p")
            .arg(conn.password_or_empty());
    }
    cmd.args(["--quiet", "--eval", MONGO_LIST_SCRIPT])
}

/// Connects to the server and lists its user databases. Succeeds only when
/// the server accepted the credentials, so it doubles as a connection test.
pub async fn list_databases(resolver: &BinaryResolver, conn: &Connection) -> Result<Vec<String>> {
    debug!(connection = %conn.id, kind = %conn.kind, host = %conn.host, "Checking connection");
    let names = match tokio::time::timeout(CONNECT_TIMEOUT, fetch_names(resolver, conn)).await {
        Ok(names) => names?,
        Err(_) => {
            return Err(check_failed(
                conn,
                format!("no answer from {}:{} within {}s", conn.host, conn.port, CONNECT_TIMEOUT.as_secs()),
            ));
        }
    };

    let databases = user_databases(conn.kind, names);
    info!(connection = %conn.name, databases = databases.len(), "Connection check succeeded");
    Ok(databases)
}

async fn fetch_names(resolver: &BinaryResolver, conn: &Connection) -> Result<Vec<String>> {
    match conn.kind {
        DatabaseKind::Mysql => {
            let options = MySqlConnectOptions::new()
                .host(&conn.host)
                .port(conn.port)
                .username(&conn.username)
                .password(conn.password_or_empty());
            let mut session = MySqlConnection::connect_with(&options)
                .await
                .map_err(|e| check_failed(conn, e.to_string()))?;
            let names = sqlx::query_scalar::<_, String>("SHOW DATABASES")
                .fetch_all(&mut session)
                .await
                .map_err(|e| check_failed(conn, e.to_string()))?;
            let _ = session.close().await;
            Ok(names)
        }
        DatabaseKind::Postgres => {
            let options = PgConnectOptions::new()
                .host(&conn.host)
                .port(conn.port)
                .username(&conn.username)
                .password(conn.password_or_empty())
                .database("postgres");
            let mut session = PgConnection::connect_with(&options)
                .await
                .map_err(|e| check_failed(conn, e.to_string()))?;
            let names = sqlx::query_scalar::<_, String>(
                "SELECT datname::text FROM pg_database WHERE datistemplate = false",
            )
            .fetch_all(&mut session)
            .await
            .map_err(|e| check_failed(conn, e.to_string()))?;
            let _ = session.close().await;
            Ok(names)
        }
        DatabaseKind::Mongo => {
            let output = mongo_list_command(resolver, conn).run().await?;
            if !output.success() {
                return Err(check_failed(conn, output.stderr));
            }
            Ok(String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(str::to_string)
                .collect())
        }
    }
}

fn check_failed(conn: &Connection, reason: String) -> AppError {
    AppError::ConnectionCheck {
        connection: conn.name.clone(),
        reason,
    }
}
