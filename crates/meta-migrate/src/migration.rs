//! Candidate migrations and their scripts.

use std::io::Read;

use chrono::{DateTime, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};

use crate::error::{MigrateError, Result};

/// A positional argument bound into a migration script.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptArg {
    /// SQL `NULL`.
    Null,
    /// Integer value.
    Integer(i64),
    /// Floating point value.
    Real(f64),
    /// Text value.
    Text(String),
    /// Binary value.
    Blob(Vec<u8>),
    /// Boolean value.
    Bool(bool),
}

impl ScriptArg {
    pub(crate) fn bind<'q>(
        &self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        match self {
            Self::Null => query.bind(None::<String>),
            Self::Integer(v) => query.bind(*v),
            Self::Real(v) => query.bind(*v),
            Self::Text(v) => query.bind(v.clone()),
            Self::Blob(v) => query.bind(v.clone()),
            Self::Bool(v) => query.bind(*v),
        }
    }
}

impl From<i64> for ScriptArg {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for ScriptArg {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<bool> for ScriptArg {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for ScriptArg {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ScriptArg {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for ScriptArg {
    fn from(value: Vec<u8>) -> Self {
        Self::Blob(value)
    }
}

/// Executable statement text plus the positional arguments bound into it.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationScript {
    /// Statement text.
    pub sql: String,
    /// Positional arguments, bound in order.
    pub args: Vec<ScriptArg>,
}

impl MigrationScript {
    /// Creates a script without arguments.
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            args: Vec::new(),
        }
    }

    /// Reads the whole statement text from a reader.
    pub fn from_reader(mut reader: impl Read) -> std::io::Result<Self> {
        let mut sql = String::new();
        reader.read_to_string(&mut sql)?;
        Ok(Self::new(sql))
    }

    /// Appends a positional argument.
    #[must_use]
    pub fn bind(mut self, arg: impl Into<ScriptArg>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Splits the text into the statements it holds, in order.
    ///
    /// A semicolon ends a statement unless it sits inside a string literal,
    /// a quoted identifier, a comment or a trigger body. Pieces holding only
    /// whitespace or comments are dropped.
    #[must_use]
    pub fn statements(&self) -> Vec<&str> {
        split_statements(&self.sql)
    }
}

fn split_statements(sql: &str) -> Vec<&str> {
    let bytes = sql.as_bytes();
    let mut statements = Vec::new();
    let mut start = 0;
    let mut has_code = false;
    let mut head: Vec<String> = Vec::with_capacity(3);
    let mut depth = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i = skip_until(bytes, i + 1, &[quote]);
                has_code = true;
            }
            b'[' => {
                i = skip_until(bytes, i + 1, b"]");
                has_code = true;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = skip_until(bytes, i + 2, b"\n");
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_until(bytes, i + 2, b"*/");
            }
            b';' if depth == 0 => {
                if has_code {
                    statements.push(sql[start..i].trim());
                }
                i += 1;
                start = i;
                has_code = false;
                head.clear();
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let end = bytes[i..]
                    .iter()
                    .position(|b| !(b.is_ascii_alphanumeric() || *b == b'_'))
                    .map_or(bytes.len(), |len| i + len);
                let word = &sql[i..end];
                if head.len() < 3 {
                    head.push(word.to_ascii_uppercase());
                }
                // BEGIN ... END and CASE ... END nest inside CREATE TRIGGER.
                if is_trigger(&head) {
                    if word.eq_ignore_ascii_case("BEGIN") || word.eq_ignore_ascii_case("CASE") {
                        depth += 1;
                    } else if word.eq_ignore_ascii_case("END") {
                        depth = depth.saturating_sub(1);
                    }
                }
                has_code = true;
                i = end;
            }
            c => {
                if !c.is_ascii_whitespace() {
                    has_code = true;
                }
                i += 1;
            }
        }
    }
    if has_code {
        statements.push(sql[start..].trim());
    }
    statements
}

/// Returns the position just past `terminator`, or the end of `bytes`.
fn skip_until(bytes: &[u8], from: usize, terminator: &[u8]) -> usize {
    bytes
        .get(from..)
        .and_then(|rest| {
            rest.windows(terminator.len())
                .position(|window| window == terminator)
        })
        .map_or(bytes.len(), |pos| from + pos + terminator.len())
}

fn is_trigger(head: &[String]) -> bool {
    match head {
        [create, kind, ..] if create == "CREATE" && kind == "TRIGGER" => true,
        [create, temp, kind] if create == "CREATE" && kind == "TRIGGER" => {
            temp == "TEMP" || temp == "TEMPORARY"
        }
        _ => false,
    }
}

/// A pending migration: version, name, declared time and script.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateMigration {
    /// Ordering key within the migration line.
    pub version: u8,
    /// Free-text description, unique together with `version`.
    pub name: String,
    /// Time the migration is considered to occur; recorded as `applied`.
    pub declared_time: DateTime<Utc>,
    /// Statement to run.
    pub script: MigrationScript,
}

impl CandidateMigration {
    /// Creates a new candidate migration.
    #[must_use]
    pub fn new(
        version: u8,
        name: impl Into<String>,
        declared_time: DateTime<Utc>,
        script: MigrationScript,
    ) -> Self {
        Self {
            version,
            name: name.into(),
            declared_time,
            script,
        }
    }

    /// Builds a batch from parallel slices, as supplied by callers that keep
    /// versions, names, times and scripts in separate lists.
    pub fn from_parallel<S: AsRef<str>>(
        versions: &[u8],
        names: &[S],
        times: &[DateTime<Utc>],
        scripts: Vec<MigrationScript>,
    ) -> Result<Vec<Self>> {
        if versions.is_empty() || names.is_empty() || times.is_empty() || scripts.is_empty() {
            return Err(MigrateError::InvalidArgument(
                "an argument passed is empty".to_string(),
            ));
        }
        if versions.len() != names.len()
            || names.len() != times.len()
            || times.len() != scripts.len()
        {
            return Err(MigrateError::InvalidArgument(format!(
                "argument lengths differ: {} versions, {} names, {} times, {} scripts",
                versions.len(),
                names.len(),
                times.len(),
                scripts.len()
            )));
        }

        Ok(versions
            .iter()
            .zip(names)
            .zip(times)
            .zip(scripts)
            .map(|(((version, name), time), script)| {
                Self::new(*version, name.as_ref(), *time, script)
            })
            .collect())
    }
}
