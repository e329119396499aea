// dbvault/src/backup/db_dump.rs
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::{Connection, DatabaseKind};
use crate::errors::{AppError, Result};
use crate::utils::BinaryResolver;
use crate::utils::process::ToolCommand;

pub const MYSQL_DUMP_TOOL: &str = "mysqldump";
pub const POSTGRES_DUMP_TOOL: &str = "pg_dump";
pub const MONGO_DUMP_TOOL: &str = "mongodump";

/// Prefix of the directory `mongodump --out` writes into.
pub const MONGO_DUMP_PREFIX: &str = "mongo_";
/// Prefix used by older releases; still recognised by retention.
pub const LEGACY_MONGO_DUMP_PREFIX: &str = "mongodb_";

/// Where a dump of `database` taken at `timestamp` lands under `dest_dir`.
///
/// MySQL and PostgreSQL produce a single `.sql` file; MongoDB produces a directory.
pub fn artifact_path(kind: DatabaseKind, dest_dir: &Path, database: &str, timestamp: &str) -> PathBuf {
    match kind {
        DatabaseKind::Mysql | DatabaseKind::Postgres => {
            dest_dir.join(format!("{}_{}.sql", database, timestamp))
        }
        DatabaseKind::Mongo => dest_dir.join(format!("{}{}", MONGO_DUMP_PREFIX, timestamp)),
    }
}

/// `mysqldump` writes to stdout, which is streamed straight into `backup_file`.
pub fn mysql_dump_command(
    resolver: &BinaryResolver,
    conn: &Connection,
    database: &str,
    backup_file: &Path,
) -> ToolCommand {
    let bin = resolver.resolve(MYSQL_DUMP_TOOL, conn.tools_directory.as_deref());
    ToolCommand::new(MYSQL_DUMP_TOOL, bin)
        .args(["--single-transaction", "--quick", "--skip-lock-tables", "--hex-blob"])
        .arg("-h")
        .arg(&conn.host)
        .arg("-P")
        .arg(conn.port.to_string())
        .arg("-u")
        .arg(&conn.username)
        .arg(database)
        .env("MYSQL_PWD", conn.password_or_empty())
        .stdout_to_file(backup_file)
}

pub fn postgres_dump_command(
    resolver: &BinaryResolver,
    conn: &Connection,
    database: &str,
    backup_file: &Path,
) -> ToolCommand {
    let bin = resolver.resolve(POSTGRES_DUMP_TOOL, conn.tools_directory.as_deref());
    ToolCommand::new(POSTGRES_DUMP_TOOL, bin)
        .arg("-h")
        .arg(&conn.host)
        .arg("-p")
        .arg(conn.port.to_string())
        .arg("-U")
        .arg(&conn.username)
        .arg("-d")
        .arg(database)
        .arg("-f")
        .arg(backup_file)
        .env("PGPASSWORD", conn.password_or_empty())
}

pub fn mongo_dump_command(
    resolver: &BinaryResolver,
    conn: &Connection,
    database: &str,
    out_dir: &Path,
) -> ToolCommand {
    let bin = resolver.resolve(MONGO_DUMP_TOOL, conn.tools_directory.as_deref());
    let mut cmd = ToolCommand::new(MONGO_DUMP_TOOL, bin)
        .arg("--host")
        .arg(format!("{}:{}", conn.host, conn.port));
    if conn.has_username() {
        cmd = cmd
            .arg("-u")
            .arg(&conn.username)
            .arg("-p")
            .arg(conn.password_or_empty());
    }
    cmd.arg("--db").arg(database).arg("--out").arg(out_dir)
}

/// Runs the dump strategy for `conn.kind` and returns the artifact it produced.
pub async fn dump_database(
    resolver: &BinaryResolver,
    conn: &Connection,
    database: &str,
    dest_dir: &Path,
    timestamp: &str,
) -> Result<PathBuf> {
    let artifact = artifact_path(conn.kind, dest_dir, database, timestamp);
    let command = match conn.kind {
        DatabaseKind::Mysql => mysql_dump_command(resolver, conn, database, &artifact),
        DatabaseKind::Postgres => postgres_dump_command(resolver, conn, database, &artifact),
        DatabaseKind::Mongo => mongo_dump_command(resolver, conn, database, &artifact),
    };

    info!(
        kind = %conn.kind,
        database,
        tool = command.tool(),
        target = %artifact.display(),
        "Dumping database"
    );
    let output = match command.run().await {
        Ok(output) => output,
        Err(e) => {
            discard_partial_artifact(&artifact).await;
            return Err(e);
        }
    };

    if !output.success() {
        discard_partial_artifact(&artifact).await;
        return Err(AppError::DumpFailed {
            exit_code: output.exit_code,
            stderr: output.stderr,
        });
    }

    if !output.stderr.is_empty() {
        // pg_dump and mongodump report progress on stderr even on success.
        tracing::debug!(database, stderr = %output.stderr, "Dump tool diagnostics");
    }
    Ok(artifact)
}

async fn discard_partial_artifact(artifact: &Path) {
    let removed = match tokio::fs::metadata(artifact).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(artifact).await,
        Ok(_) => tokio::fs::remove_file(artifact).await,
        Err(_) => return,
    };
    if let Err(e) = removed {
        warn!(path = %artifact.display(), error = %e, "Failed to remove partial dump");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    fn connection(kind: DatabaseKind, username: &str, password: Option<&str>) -> Connection {
        Connection {
            id: "c1".to_string(),
            name: "primary".to_string(),
            kind,
            host: "db.internal".to_string(),
            port: 4000,
            username: username.to_string(),
            password: password.map(str::to_string),
            tools_directory: Some(PathBuf::from("/opt/tools")),
            created_at: None,
        }
    }

    fn args(cmd: &ToolCommand) -> Vec<String> {
        cmd.arg_list()
            .iter()
            .map(|a: &OsString| a.to_string_lossy().into_owned())
            .collect()
    }

    fn envs(cmd: &ToolCommand) -> Vec<(String, String)> {
        cmd.env_list()
            .iter()
            .map(|(k, v)| (k.to_string_lossy().into_owned(), v.to_string_lossy().into_owned()))
            .collect()
    }

    #[test]
    fn test_artifact_paths() {
        let dest = Path::new("/backups");
        assert_eq!(
            artifact_path(DatabaseKind::Mysql, dest, "shop", "2024-05-01T10-00-00"),
            PathBuf::from("/backups/shop_2024-05-01T10-00-00.sql")
        );
        assert_eq!(
            artifact_path(DatabaseKind::Mongo, dest, "shop", "2024-05-01T10-00-00"),
            PathBuf::from("/backups/mongo_2024-05-01T10-00-00")
        );
    }

    #[test]
    fn test_mysql_dump_flags() {
        let resolver = BinaryResolver::new("/bundled");
        let conn = connection(DatabaseKind::Mysql, "root", Some("s3cret"));
        let cmd = mysql_dump_command(&resolver, &conn, "shop", Path::new("/b/shop.sql"));

        assert_eq!(cmd.program(), Path::new("/opt/tools/mysqldump"));
        let args = args(&cmd);
        assert_eq!(
            &args[..4],
            ["--single-transaction", "--quick", "--skip-lock-tables", "--hex-blob"]
        );
        assert_eq!(args.last().map(String::as_str), Some("shop"));
        assert!(!args.iter().any(|a| a.contains("s3cret")));
        assert_eq!(envs(&cmd), [("MYSQL_PWD".to_string(), "s3cret".to_string())]);
    }

    #[test]
    fn test_postgres_password_never_on_command_line() {
        let resolver = BinaryResolver::new("/bundled");
        let conn = connection(DatabaseKind::Postgres, "postgres", Some("s3cret"));
        let cmd = postgres_dump_command(&resolver, &conn, "shop", Path::new("/b/shop.sql"));

        assert_eq!(
            args(&cmd),
            ["-h", "db.internal", "-p", "4000", "-U", "postgres", "-d", "shop", "-f", "/b/shop.sql"]
        );
        assert_eq!(envs(&cmd), [("PGPASSWORD".to_string(), "s3cret".to_string())]);
    }

    #[test]
    fn test_mongo_auth_only_with_username() {
        let resolver = BinaryResolver::new("/bundled");

        let anonymous = connection(DatabaseKind::Mongo, "", None);
        let cmd = mongo_dump_command(&resolver, &anonymous, "shop", Path::new("/b/mongo_x"));
        assert_eq!(
            args(&cmd),
            ["--host", "db.internal:4000", "--db", "shop", "--out", "/b/mongo_x"]
        );

        let authed = connection(DatabaseKind::Mongo, "admin", Some("pw"));
        let cmd = mongo_dump_command(&resolver, &authed, "shop", Path::new("/b/mongo_x"));
        assert_eq!(
            args(&cmd),
            ["--host", "db.internal:4000", "-u", "admin", "-p", "pw", "--db", "shop", "--out", "/b/mongo_x"]
        );
    }
}
