// dbvault/src/restore/sql_import.rs
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{Connection as _, Executor};
use std::collections::VecDeque;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use crate::config::Connection;
use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportReport {
    pub files: usize,
    pub statements: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexState {
    Code,
    Quoted { quote: u8, escaped: bool },
    /// `keep` is set for versioned comments (`/*!40101 ... */`), which the server executes.
    BlockComment { keep: bool },
}

/// Line-at-a-time MySQL statement splitter working on raw bytes.
///
/// Understands quoted strings and identifiers, `--`/`#`/`/* */` comments and
/// `DELIMITER` directives. Statement bytes are passed through unchanged.
#[derive(Debug)]
struct StatementSplitter {
    delimiter: Vec<u8>,
    current: Vec<u8>,
    state: LexState,
}

impl StatementSplitter {
    fn new() -> Self {
        StatementSplitter {
            delimiter: b";".to_vec(),
            current: Vec::new(),
            state: LexState::Code,
        }
    }

    /// Feeds one line, trailing newline included. Completed statements go to `out`.
    fn push_line(&mut self, line: &[u8], out: &mut VecDeque<Vec<u8>>) {
        if self.state == LexState::Code && self.current.trim_ascii().is_empty() {
            if let Some(delimiter) = parse_delimiter_directive(line) {
                self.delimiter = delimiter;
                self.current.clear();
                return;
            }
        }

        let mut i = 0;
        while i < line.len() {
            let rest = &line[i..];
            let b = rest[0];
            match self.state {
                LexState::Quoted { quote, escaped } => {
                    self.current.push(b);
                    i += 1;
                    if escaped {
                        self.state = LexState::Quoted { quote, escaped: false };
                    } else if b == b'\\' && quote != b'`' {
                        self.state = LexState::Quoted { quote, escaped: true };
                    } else if b == quote {
                        if line.get(i) == Some(&quote) {
                            self.current.push(quote);
                            i += 1;
                        } else {
                            self.state = LexState::Code;
                        }
                    }
                }
                LexState::BlockComment { keep } => {
                    if rest.starts_with(b"*/") {
                        if keep {
                            self.current.extend_from_slice(b"*/");
                        } else {
                            self.current.push(b' ');
                        }
                        self.state = LexState::Code;
                        i += 2;
                    } else {
                        if keep {
                            self.current.push(b);
                        }
                        i += 1;
                    }
                }
                LexState::Code => {
                    if b == b'#' || is_dash_comment(rest) {
                        if line.ends_with(b"\n") {
                            self.current.push(b'\n');
                        }
                        break;
                    }
                    if rest.starts_with(b"/*") {
                        let keep = rest.starts_with(b"/*!");
                        if keep {
                            self.current.extend_from_slice(b"/*");
                        }
                        self.state = LexState::BlockComment { keep };
                        i += 2;
                    } else if b == b'\'' || b == b'"' || b == b'`' {
                        self.current.push(b);
                        self.state = LexState::Quoted { quote: b, escaped: false };
                        i += 1;
                    } else if rest.starts_with(&self.delimiter) {
                        i += self.delimiter.len();
                        self.emit(out);
                    } else {
                        self.current.push(b);
                        i += 1;
                    }
                }
            }
        }
    }

    /// Whatever is left once the input ends.
    fn finish(&mut self) -> Option<Vec<u8>> {
        let mut rest = VecDeque::new();
        self.emit(&mut rest);
        rest.pop_front()
    }

    fn emit(&mut self, out: &mut VecDeque<Vec<u8>>) {
        let statement = self.current.trim_ascii();
        if !statement.is_empty() {
            out.push_back(statement.to_vec());
        }
        self.current.clear();
    }
}

fn parse_delimiter_directive(line: &[u8]) -> Option<Vec<u8>> {
    let line = line.trim_ascii();
    let keyword = line.get(..9)?;
    if !keyword.eq_ignore_ascii_case(b"DELIMITER") {
        return None;
    }
    let rest = &line[9..];
    if !rest.first().is_some_and(u8::is_ascii_whitespace) {
        return None;
    }
    let delimiter = rest.trim_ascii();
    (!delimiter.is_empty()).then(|| delimiter.to_vec())
}

/// MySQL only treats `--` as a comment when followed by whitespace or end of input.
fn is_dash_comment(rest: &[u8]) -> bool {
    rest.starts_with(b"--") && rest.get(2).is_none_or(u8::is_ascii_whitespace)
}

/// Yields the statements of a SQL script one at a time, holding at most one
/// line and the statement under construction in memory.
pub struct StatementReader<R> {
    reader: R,
    splitter: StatementSplitter,
    ready: VecDeque<Vec<u8>>,
    line: Vec<u8>,
    done: bool,
}

impl<R: AsyncBufRead + Unpin> StatementReader<R> {
    pub fn new(reader: R) -> Self {
        StatementReader {
            reader,
            splitter: StatementSplitter::new(),
            ready: VecDeque::new(),
            line: Vec::new(),
            done: false,
        }
    }

    pub async fn next_statement(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(statement) = self.ready.pop_front() {
                return Ok(Some(statement));
            }
            if self.done {
                return Ok(None);
            }
            self.line.clear();
            if self.reader.read_until(b'\n', &mut self.line).await? == 0 {
                self.done = true;
                self.ready.extend(self.splitter.finish());
            } else {
                self.splitter.push_line(&self.line, &mut self.ready);
            }
        }
    }
}

/// The statement as text. Bytes are never replaced: a statement that is not
/// UTF-8 (raw binary literals) is refused.
fn statement_text(number: usize, statement: &[u8]) -> Result<&str> {
    std::str::from_utf8(statement).map_err(|e| {
        AppError::ImportFailed(format!(
            "statement {} is not valid UTF-8 at byte {}; dump binary columns with --hex-blob",
            number,
            e.valid_up_to()
        ))
    })
}

/// Replays a SQL dump against `database`, one statement at a time on a single
/// session, streaming the file as it goes.
pub async fn import_sql_file(conn: &Connection, database: &str, file: &Path) -> Result<ImportReport> {
    let mut statements = StatementReader::new(BufReader::new(tokio::fs::File::open(file).await?));

    let options = MySqlConnectOptions::new()
        .host(&conn.host)
        .port(conn.port)
        .username(&conn.username)
        .password(conn.password_or_empty())
        .database(database);
    let mut session = MySqlConnection::connect_with(&options)
        .await
        .map_err(|e| AppError::ImportFailed(format!("cannot connect to {}: {}", conn.host, e)))?;

    let mut executed = 0;
    while let Some(statement) = statements.next_statement().await? {
        let number = executed + 1;
        let sql = statement_text(number, &statement)?;
        session
            .execute(sql)
            .await
            .map_err(|e| AppError::ImportFailed(format!("statement {}: {}", number, e)))?;
        executed = number;
    }
    debug!(file = %file.display(), statements = executed, "Replayed SQL dump");

    if let Err(e) = session.close().await {
        debug!(error = %e, "Error closing import session");
    }

    let report = ImportReport {
        files: 1,
        statements: executed,
    };
    info!(
        files = report.files,
        statements = report.statements,
        "{} SQL file(s) imported",
        report.files
    );
    Ok(report)
}
