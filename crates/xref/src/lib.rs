//! xref: incremental source cross-reference indexing
//!
//! This crate provides the building blocks for fast code navigation without a
//! compiler toolchain:
//! - Staleness-aware discovery of source files (`queue`)
//! - Heuristic line-pattern parsers for C-family and assembly sources (`parse`)
//! - A persistent SQLite symbol store with navigation queries (`db`)
//! - An orchestrator that keeps the store in sync with the filesystem (`indexer`)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub mod config;
pub mod context;
pub mod db;
pub mod indexer;
pub mod namefile;
pub mod parse;
pub mod queue;

// Re-export main types
pub use config::{Config, ContentMode};
pub use context::ContextReader;
pub use db::SqliteStore;
pub use indexer::{CancelToken, IndexStats, Indexer};
pub use parse::{ParserRegistry, SymbolParser};
pub use queue::{FileQueue, NoMoreEntries};

/// What kind of occurrence a symbol is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Definition,
    #[serde(rename = "call", alias = "function_call")]
    FunctionCall,
    Reference,
    Include,
}

impl Category {
    /// Integer tag used in the `symbols.category` column.
    pub fn as_i64(self) -> i64 {
        match self {
            Category::Definition => 0,
            Category::FunctionCall => 1,
            Category::Reference => 2,
            Category::Include => 3,
        }
    }

    pub fn from_i64(tag: i64) -> Option<Self> {
        match tag {
            0 => Some(Category::Definition),
            1 => Some(Category::FunctionCall),
            2 => Some(Category::Reference),
            3 => Some(Category::Include),
            _ => None,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Definition => write!(f, "definition"),
            Category::FunctionCall => write!(f, "call"),
            Category::Reference => write!(f, "reference"),
            Category::Include => write!(f, "include"),
        }
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "definition" | "def" => Ok(Category::Definition),
            "call" | "function_call" => Ok(Category::FunctionCall),
            "reference" | "ref" => Ok(Category::Reference),
            "include" => Ok(Category::Include),
            other => Err(format!("unknown symbol category: {}", other)),
        }
    }
}

/// One occurrence of a definition, call, reference or include.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub category: Category,
    pub name: String,
    /// File the occurrence lives in
    pub path: PathBuf,
    /// 1-indexed line
    pub line: u32,
    /// 1-indexed column of the first character of `name`
    pub column: u32,
    /// Name of the nearest preceding definition in the same file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl Symbol {
    pub fn new(
        category: Category,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        line: u32,
        column: u32,
    ) -> Self {
        Self {
            category,
            name: name.into(),
            path: path.into(),
            line,
            column,
            parent: None,
        }
    }

    /// Create a symbol attributed to an enclosing definition
    pub fn with_parent(mut self, parent: Option<String>) -> Self {
        self.parent = parent;
        self
    }
}

/// A query match: the symbol plus the source line it sits on, when known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    pub symbol: Symbol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Identity and freshness of one indexed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub path: PathBuf,
    /// Hex digest of the file contents at index time
    pub hash: String,
    /// Modification time, seconds since the Unix epoch
    pub timestamp: i64,
}

/// Errors that can occur during indexing and querying
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to read {path}: {source}")]
    FileError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Out of memory while loading {path}")]
    OutOfMemory { path: PathBuf },

    #[error("Incompatible database {path}: {reason}")]
    IncompatibleDatabase { path: PathBuf, reason: String },

    #[error("Failed to parse {path}:{line}: {message}")]
    ParseError {
        path: PathBuf,
        line: u64,
        message: String,
    },

    #[error("Parser timed out after {timeout:?} on {path}")]
    ParserTimeout { path: PathBuf, timeout: Duration },

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("Invalid pattern: {0}")]
    PatternError(#[from] regex::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid path: {0:?}")]
    InvalidPath(PathBuf),
}

impl IndexError {
    /// Whether this failure is confined to one file.
    ///
    /// File-level failures are logged and skipped by the indexer; everything
    /// else aborts the run.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            IndexError::IoError(_)
                | IndexError::FileError { .. }
                | IndexError::OutOfMemory { .. }
                | IndexError::ParseError { .. }
                | IndexError::ParserTimeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
