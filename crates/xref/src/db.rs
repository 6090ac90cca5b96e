//! SQLite-based symbol store.
//!
//! One row in `records` per indexed file, with its symbols and (optionally)
//! its source lines hanging off it through cascading foreign keys. Removing
//! or re-indexing a file is therefore a single `DELETE` on `records`.
//!
//! # Examples
//!
//! ```
//! use xref::{Category, SqliteStore, Symbol};
//!
//! let store = SqliteStore::in_memory().unwrap();
//! store
//!     .add_symbol(&Symbol::new(Category::Definition, "main", "/src/main.c", 3, 5))
//!     .unwrap();
//!
//! let found = store.find_definition("main").unwrap();
//! assert_eq!(found.len(), 1);
//! assert_eq!(found[0].symbol.line, 3);
//! ```
//!
//! Every logical operation commits as one transaction. Writers are
//! serialized through an internal lock; coordinating several processes
//! writing the same file is left to the caller.

use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Transaction};

use crate::{Category, IndexError, QueryResult, Record, Result, Symbol};

/// Current schema version. A store with any other version is refused.
pub const SCHEMA_VERSION: i64 = 1;

/// Identifies databases written by this crate.
pub const APPLICATION_ID: &str = "xref";

/// Default database filename within .xref/
pub const DEFAULT_DB_NAME: &str = "xref.db";

/// Columns selected by every symbol query, in the order `row_to_result` expects.
const RESULT_COLUMNS: &str = "s.category, s.name, r.path, s.line, s.col, s.parent, c.body";

const RESULT_JOINS: &str = "FROM symbols s
     JOIN records r ON r.id = s.record
     LEFT JOIN content c ON c.record = s.record AND c.line = s.line";

const RESULT_ORDER: &str = "ORDER BY r.path, s.line, s.col";

/// The symbol queries, each taking the queried name as `?1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SymbolQuery {
    /// Any category, exact name
    Symbol,
    Definition,
    /// Calls *to* a name
    Caller,
    /// Calls made from *inside* a definition with the given name
    Call,
    /// Includes of a path or any `/`-delimited suffix of it
    Includer,
}

impl SymbolQuery {
    fn sql(self) -> String {
        let filter = match self {
            SymbolQuery::Symbol => "s.name = ?1".to_string(),
            SymbolQuery::Definition => {
                format!("s.category = {} AND s.name = ?1", Category::Definition.as_i64())
            }
            SymbolQuery::Caller => {
                format!("s.category = {} AND s.name = ?1", Category::FunctionCall.as_i64())
            }
            SymbolQuery::Call => {
                format!("s.category = {} AND s.parent = ?1", Category::FunctionCall.as_i64())
            }
            SymbolQuery::Includer => format!(
                "s.category = {} AND (s.name = ?1 OR substr(s.name, -length('/' || ?1)) = '/' || ?1)",
                Category::Include.as_i64()
            ),
        };
        format!("SELECT {RESULT_COLUMNS} {RESULT_JOINS} WHERE {filter} {RESULT_ORDER}")
    }
}

/// Persistent record/symbol/content store with navigation queries.
///
/// The connection sits behind a mutex, so a `SqliteStore` can be shared
/// across indexing workers by reference.
///
/// ```no_run
/// use xref::SqliteStore;
/// use std::path::Path;
///
/// // Creates the file (and parent directories) on first use
/// let store = SqliteStore::open(Path::new(".xref/xref.db")).unwrap();
/// for path in store.find_file("main.c").unwrap() {
///     println!("{}", path.display());
/// }
/// ```
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open the store at `path`, creating it if it does not exist or is an
    /// empty file.
    ///
    /// An existing store is checked before anything is written to it: a
    /// missing or mismatched schema version or application id fails with
    /// [`IndexError::IncompatibleDatabase`] and leaves the file untouched.
    pub fn open(path: &Path) -> Result<Self> {
        let fresh = match fs::metadata(path) {
            Ok(metadata) => metadata.len() == 0,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(source) => {
                return Err(IndexError::FileError {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        if fresh {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        if fresh {
            if let Err(e) = init_schema(&conn) {
                drop(conn);
                let _ = fs::remove_file(path);
                return Err(e);
            }
            tracing::info!("Created index database {:?}", path);
        } else {
            verify_metadata(&conn, path)?;
        }

        tune(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        tune(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Database file backing this store; `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Rows inserted, updated or deleted through this handle so far.
    pub fn total_changes(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let changes: i64 = conn.query_row("SELECT total_changes()", [], |row| row.get(0))?;
        Ok(changes as u64)
    }

    // =========================================================================
    // Record Operations
    // =========================================================================

    /// Insert or update the record for `path`. Existing symbols are kept.
    pub fn add_record(&self, path: &Path, hash: &str, timestamp: i64) -> Result<()> {
        let key = path_key(path)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO records (path, hash, timestamp) VALUES (?1, ?2, ?3)
             ON CONFLICT(path) DO UPDATE SET hash = excluded.hash, timestamp = excluded.timestamp",
            params![key, hash, timestamp],
        )?;
        Ok(())
    }

    /// Look up the record for `path`. `None` means it was never indexed.
    pub fn find_record(&self, path: &Path) -> Result<Option<Record>> {
        let key = path_key(path)?;
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT path, hash, timestamp FROM records WHERE path = ?1",
                params![key],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Delete the record for `path` along with all of its symbols and
    /// content lines. Removing an unknown path is not an error.
    pub fn remove(&self, path: &Path) -> Result<()> {
        let key = path_key(path)?;
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM records WHERE path = ?1", params![key])?;
        if removed > 0 {
            tracing::debug!("Removed {:?} from index", path);
        }
        Ok(())
    }

    pub fn list_records(&self) -> Result<Vec<Record>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT path, hash, timestamp FROM records ORDER BY path")?;
        let records = stmt
            .query_map([], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn count_records(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // =========================================================================
    // Symbol and Content Operations
    // =========================================================================

    /// Insert one symbol, creating a placeholder record for its file if
    /// there is none yet.
    pub fn add_symbol(&self, symbol: &Symbol) -> Result<()> {
        let key = path_key(&symbol.path)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let record = ensure_record(&tx, &key)?;
        insert_symbol(&tx, record, symbol)?;
        tx.commit()?;
        Ok(())
    }

    pub fn count_symbols(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM symbols", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Store the text of line `lineno` of `path`, replacing any earlier text.
    pub fn add_line(&self, path: &Path, lineno: u32, body: &str) -> Result<()> {
        let key = path_key(path)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let record = ensure_record(&tx, &key)?;
        tx.execute(
            "INSERT OR REPLACE INTO content (record, line, body) VALUES (?1, ?2, ?3)",
            params![record, lineno, body],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Stored text of one line, if content was recorded for it.
    pub fn get_content(&self, path: &Path, lineno: u32) -> Result<Option<String>> {
        let key = path_key(path)?;
        let conn = self.conn.lock();
        let body = conn
            .query_row(
                "SELECT c.body FROM content c JOIN records r ON r.id = c.record
                 WHERE r.path = ?1 AND c.line = ?2",
                params![key, lineno],
                |row| row.get(0),
            )
            .optional()?;
        Ok(body)
    }

    // =========================================================================
    // File-level Operations
    // =========================================================================

    /// Replace everything known about `path` in one transaction: the old
    /// record and its dependents are deleted, then the new record, its
    /// symbols and (when given) its source lines are inserted.
    ///
    /// If any step fails, nothing is committed and the previous state for
    /// `path` stays visible.
    pub fn update_file(
        &self,
        path: &Path,
        hash: &str,
        timestamp: i64,
        symbols: &[Symbol],
        content: Option<&str>,
    ) -> Result<()> {
        let key = path_key(path)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM records WHERE path = ?1", params![key])?;
        tx.execute(
            "INSERT INTO records (path, hash, timestamp) VALUES (?1, ?2, ?3)",
            params![key, hash, timestamp],
        )?;
        let record = tx.last_insert_rowid();

        for symbol in symbols {
            insert_symbol(&tx, record, symbol)?;
        }

        if let Some(text) = content {
            let mut stmt =
                tx.prepare_cached("INSERT INTO content (record, line, body) VALUES (?1, ?2, ?3)")?;
            for (index, line) in text.lines().enumerate() {
                stmt.execute(params![record, index as u32 + 1, line])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================
    //
    // Each query comes in two forms. The `_with` form streams matches to a
    // callback, which stops the scan by returning `ControlFlow::Break`. The
    // callback runs while the store is locked and must not call back into
    // the store. The plain form collects every match.

    pub fn find_symbol_with<F>(&self, name: &str, f: F) -> Result<()>
    where
        F: FnMut(QueryResult) -> ControlFlow<()>,
    {
        self.run_query(SymbolQuery::Symbol, name, f)
    }

    /// Every symbol named `name`, whatever its category.
    pub fn find_symbol(&self, name: &str) -> Result<Vec<QueryResult>> {
        self.collect_query(SymbolQuery::Symbol, name)
    }

    pub fn find_definition_with<F>(&self, name: &str, f: F) -> Result<()>
    where
        F: FnMut(QueryResult) -> ControlFlow<()>,
    {
        self.run_query(SymbolQuery::Definition, name, f)
    }

    pub fn find_definition(&self, name: &str) -> Result<Vec<QueryResult>> {
        self.collect_query(SymbolQuery::Definition, name)
    }

    pub fn find_caller_with<F>(&self, name: &str, f: F) -> Result<()>
    where
        F: FnMut(QueryResult) -> ControlFlow<()>,
    {
        self.run_query(SymbolQuery::Caller, name, f)
    }

    /// Call sites of `name`. Each result's parent is the calling function.
    pub fn find_caller(&self, name: &str) -> Result<Vec<QueryResult>> {
        self.collect_query(SymbolQuery::Caller, name)
    }

    pub fn find_call_with<F>(&self, parent: &str, f: F) -> Result<()>
    where
        F: FnMut(QueryResult) -> ControlFlow<()>,
    {
        self.run_query(SymbolQuery::Call, parent, f)
    }

    /// Calls made from within the definition named `parent`.
    pub fn find_call(&self, parent: &str) -> Result<Vec<QueryResult>> {
        self.collect_query(SymbolQuery::Call, parent)
    }

    pub fn find_includer_with<F>(&self, name: &str, f: F) -> Result<()>
    where
        F: FnMut(QueryResult) -> ControlFlow<()>,
    {
        self.run_query(SymbolQuery::Includer, name, f)
    }

    /// Include directives naming `name`, or a path ending in `/name`.
    pub fn find_includer(&self, name: &str) -> Result<Vec<QueryResult>> {
        self.collect_query(SymbolQuery::Includer, name)
    }

    pub fn find_file_with<F>(&self, name: &str, mut f: F) -> Result<()>
    where
        F: FnMut(PathBuf) -> ControlFlow<()>,
    {
        if name.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT path FROM records
             WHERE path = ?1 OR substr(path, -length('/' || ?1)) = '/' || ?1
             ORDER BY path",
        )?;
        let mut rows = stmt.query(params![name])?;
        while let Some(row) = rows.next()? {
            let path: String = row.get(0)?;
            if f(PathBuf::from(path)).is_break() {
                break;
            }
        }
        Ok(())
    }

    /// Indexed files whose path is `name` or ends with `/name`.
    pub fn find_file(&self, name: &str) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        self.find_file_with(name, |path| {
            paths.push(path);
            ControlFlow::Continue(())
        })?;
        Ok(paths)
    }

    fn run_query<F>(&self, query: SymbolQuery, name: &str, mut f: F) -> Result<()>
    where
        F: FnMut(QueryResult) -> ControlFlow<()>,
    {
        if name.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&query.sql())?;
        let mut rows = stmt.query(params![name])?;
        while let Some(row) = rows.next()? {
            if f(row_to_result(row)?).is_break() {
                break;
            }
        }
        Ok(())
    }

    fn collect_query(&self, query: SymbolQuery, name: &str) -> Result<Vec<QueryResult>> {
        let mut results = Vec::new();
        self.run_query(query, name, |result| {
            results.push(result);
            ControlFlow::Continue(())
        })?;
        Ok(results)
    }
}

// ============================================================================
// Schema
// ============================================================================

const SCHEMA_SQL: &str = r#"
-- Single row identifying the schema and the owning application
CREATE TABLE IF NOT EXISTS metadata (
    id INTEGER PRIMARY KEY CHECK (id = 0),
    schema_version INTEGER NOT NULL,
    application_id TEXT NOT NULL
);

-- One row per indexed file
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY,
    path TEXT NOT NULL UNIQUE,
    hash TEXT NOT NULL,
    timestamp INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS symbols (
    record INTEGER NOT NULL REFERENCES records(id) ON DELETE CASCADE,
    category INTEGER NOT NULL,
    name TEXT NOT NULL,
    line INTEGER NOT NULL,
    col INTEGER NOT NULL,
    parent TEXT NOT NULL DEFAULT '',
    UNIQUE (record, category, name, line, col)
);

CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);
CREATE INDEX IF NOT EXISTS idx_symbols_parent ON symbols(parent);

-- Source lines, present only for files indexed with eager content
CREATE TABLE IF NOT EXISTS content (
    record INTEGER NOT NULL REFERENCES records(id) ON DELETE CASCADE,
    line INTEGER NOT NULL,
    body TEXT NOT NULL,
    UNIQUE (record, line)
);
"#;

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT INTO metadata (id, schema_version, application_id) VALUES (0, ?1, ?2)",
        params![SCHEMA_VERSION, APPLICATION_ID],
    )?;
    Ok(())
}

/// Connection settings. Only applied once the file is known to be ours,
/// since switching journal mode writes to the database header.
fn tune(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -64000;
         PRAGMA temp_store = MEMORY;
         PRAGMA foreign_keys = ON;",
    )?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(())
}

/// Read-only compatibility check of an existing database.
fn verify_metadata(conn: &Connection, path: &Path) -> Result<()> {
    let incompatible = |reason: String| IndexError::IncompatibleDatabase {
        path: path.to_path_buf(),
        reason,
    };

    let has_metadata = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'metadata'",
        [],
        |row| row.get::<_, i64>(0),
    );
    match has_metadata {
        Ok(0) => return Err(incompatible("no metadata table".to_string())),
        Ok(_) => {}
        Err(e) if e.sqlite_error_code() == Some(ErrorCode::NotADatabase) => {
            return Err(incompatible("not a database".to_string()))
        }
        Err(e) => return Err(e.into()),
    }

    let metadata: Option<(Option<i64>, Option<String>)> = conn
        .query_row(
            "SELECT CAST(schema_version AS INTEGER), CAST(application_id AS TEXT) FROM metadata",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match metadata {
        None => Err(incompatible("metadata is empty".to_string())),
        Some((_, app)) if app.as_deref() != Some(APPLICATION_ID) => Err(incompatible(format!(
            "application id {:?}, expected {:?}",
            app.unwrap_or_default(),
            APPLICATION_ID
        ))),
        Some((None, _)) => Err(incompatible("schema version is missing".to_string())),
        Some((Some(version), _)) if version != SCHEMA_VERSION => Err(incompatible(format!(
            "schema version {}, expected {}",
            version, SCHEMA_VERSION
        ))),
        Some(_) => Ok(()),
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn path_key(path: &Path) -> Result<String> {
    if path.as_os_str().is_empty() {
        return Err(IndexError::InvalidPath(path.to_path_buf()));
    }
    Ok(path.to_string_lossy().into_owned())
}

/// Id of the record for `key`, inserting an empty one if needed.
fn ensure_record(tx: &Transaction<'_>, key: &str) -> Result<i64> {
    tx.execute(
        "INSERT INTO records (path, hash, timestamp) VALUES (?1, '', 0)
         ON CONFLICT(path) DO NOTHING",
        params![key],
    )?;
    let id = tx.query_row(
        "SELECT id FROM records WHERE path = ?1",
        params![key],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn insert_symbol(tx: &Transaction<'_>, record: i64, symbol: &Symbol) -> Result<()> {
    let mut stmt = tx.prepare_cached(
        "INSERT OR IGNORE INTO symbols (record, category, name, line, col, parent)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    stmt.execute(params![
        record,
        symbol.category.as_i64(),
        symbol.name,
        symbol.line,
        symbol.column,
        symbol.parent.as_deref().unwrap_or(""),
    ])?;
    Ok(())
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
    let path: String = row.get(0)?;
    Ok(Record {
        path: PathBuf::from(path),
        hash: row.get(1)?,
        timestamp: row.get(2)?,
    })
}

fn row_to_result(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueryResult> {
    let tag: i64 = row.get(0)?;
    let category = Category::from_i64(tag).ok_or(rusqlite::Error::IntegralValueOutOfRange(0, tag))?;
    let path: String = row.get(2)?;
    let parent: String = row.get(5)?;

    Ok(QueryResult {
        symbol: Symbol {
            category,
            name: row.get(1)?,
            path: PathBuf::from(path),
            line: row.get(3)?,
            column: row.get(4)?,
            parent: (!parent.is_empty()).then_some(parent),
        },
        context: row.get(6)?,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(category: Category, name: &str, path: &str, line: u32, parent: Option<&str>) -> Symbol {
        Symbol::new(category, name, path, line, 1).with_parent(parent.map(str::to_string))
    }

    fn names(results: &[QueryResult]) -> Vec<(&str, u32)> {
        results
            .iter()
            .map(|r| (r.symbol.name.as_str(), r.symbol.line))
            .collect()
    }

    // =========================================================================
    // Schema Tests
    // =========================================================================

    #[test]
    fn test_create_in_memory_store() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.count_records().unwrap(), 0);
        assert_eq!(store.count_symbols().unwrap(), 0);
        assert!(store.path().is_none());
    }

    #[test]
    fn test_open_creates_file_and_parents() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("nested/dir/xref.db");

        let store = SqliteStore::open(&db_path).unwrap();
        store.add_record(Path::new("/a.c"), "abc", 1).unwrap();
        drop(store);

        let store = SqliteStore::open(&db_path).unwrap();
        assert_eq!(store.count_records().unwrap(), 1);
        assert_eq!(store.path(), Some(db_path.as_path()));
    }

    #[test]
    fn test_open_empty_file_initializes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("xref.db");
        fs::write(&db_path, b"").unwrap();

        let store = SqliteStore::open(&db_path).unwrap();
        assert_eq!(store.count_records().unwrap(), 0);
    }

    #[test]
    fn test_open_rejects_foreign_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("xref.db");
        let garbage = b"this is definitely not an sqlite database, just some text".repeat(20);
        fs::write(&db_path, &garbage).unwrap();

        match SqliteStore::open(&db_path) {
            Err(IndexError::IncompatibleDatabase { path, .. }) => assert_eq!(path, db_path),
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("foreign file accepted"),
        }
        // refused stores are left exactly as they were
        assert_eq!(fs::read(&db_path).unwrap(), garbage);
    }

    #[test]
    fn test_open_rejects_database_without_metadata() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("other.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute_batch("CREATE TABLE notes (body TEXT);").unwrap();
        }

        let err = SqliteStore::open(&db_path).err().unwrap();
        assert!(matches!(err, IndexError::IncompatibleDatabase { .. }));
        assert!(err.to_string().contains("other.db"));
    }

    #[test]
    fn test_open_rejects_null_schema_version() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("xref.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute_batch(
                "CREATE TABLE metadata (id INTEGER PRIMARY KEY, schema_version INTEGER, application_id TEXT);",
            )
            .unwrap();
            conn.execute(
                "INSERT INTO metadata VALUES (0, NULL, ?1)",
                params![APPLICATION_ID],
            )
            .unwrap();
        }

        match SqliteStore::open(&db_path) {
            Err(IndexError::IncompatibleDatabase { path, reason }) => {
                assert_eq!(path, db_path);
                assert!(reason.contains("schema version"));
            }
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("store without a schema version opened"),
        }
    }

    // =========================================================================
    // Record Tests
    // =========================================================================

    #[test]
    fn test_add_and_find_record() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.find_record(Path::new("/src/a.c")).unwrap(), None);

        store.add_record(Path::new("/src/a.c"), "h1", 100).unwrap();
        store.add_record(Path::new("/src/a.c"), "h2", 200).unwrap();

        let record = store.find_record(Path::new("/src/a.c")).unwrap().unwrap();
        assert_eq!(record.hash, "h2");
        assert_eq!(record.timestamp, 200);
        assert_eq!(store.count_records().unwrap(), 1);
    }

    #[test]
    fn test_add_record_keeps_symbols() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .add_symbol(&sym(Category::Definition, "f", "/a.c", 1, None))
            .unwrap();
        store.add_record(Path::new("/a.c"), "h", 5).unwrap();
        assert_eq!(store.count_symbols().unwrap(), 1);
    }

    #[test]
    fn test_remove_cascades_and_is_idempotent() {
        let store = SqliteStore::in_memory().unwrap();
        let path = Path::new("/src/a.c");
        store
            .update_file(
                path,
                "h",
                1,
                &[sym(Category::Definition, "f", "/src/a.c", 1, None)],
                Some("int f(void) {\n}\n"),
            )
            .unwrap();
        store
            .add_symbol(&sym(Category::Definition, "g", "/src/b.c", 1, None))
            .unwrap();

        store.remove(path).unwrap();
        store.remove(path).unwrap();
        store.remove(Path::new("/never/indexed.c")).unwrap();

        assert_eq!(store.find_record(path).unwrap(), None);
        assert!(store.find_symbol("f").unwrap().is_empty());
        assert_eq!(store.get_content(path, 1).unwrap(), None);
        assert_eq!(store.count_symbols().unwrap(), 1);
    }

    #[test]
    fn test_empty_path_rejected() {
        let store = SqliteStore::in_memory().unwrap();
        let err = store.add_record(Path::new(""), "h", 0).unwrap_err();
        assert!(matches!(err, IndexError::InvalidPath(_)));
    }

    #[test]
    fn test_list_records() {
        let store = SqliteStore::in_memory().unwrap();
        store.add_record(Path::new("/b.c"), "2", 2).unwrap();
        store.add_record(Path::new("/a.c"), "1", 1).unwrap();

        let paths: Vec<_> = store
            .list_records()
            .unwrap()
            .into_iter()
            .map(|r| r.path)
            .collect();
        assert_eq!(paths, vec![PathBuf::from("/a.c"), PathBuf::from("/b.c")]);
    }

    // =========================================================================
    // Symbol Tests
    // =========================================================================

    #[test]
    fn test_add_symbol_creates_record() {
        let store = SqliteStore::in_memory().unwrap();
        let symbol = sym(Category::FunctionCall, "bar", "/src/foo.c", 6, Some("foo"));
        store.add_symbol(&symbol).unwrap();

        let record = store.find_record(Path::new("/src/foo.c")).unwrap().unwrap();
        assert_eq!(record.hash, "");

        let found = store.find_symbol("bar").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].symbol, symbol);
        assert_eq!(found[0].context, None);
    }

    #[test]
    fn test_queries_by_category() {
        let store = SqliteStore::in_memory().unwrap();
        let symbols = [
            sym(Category::Definition, "foo", "/src/a.c", 1, None),
            sym(Category::FunctionCall, "bar", "/src/a.c", 2, Some("foo")),
            sym(Category::FunctionCall, "foo", "/src/a.c", 3, Some("foo")),
            sym(Category::Reference, "foo", "/src/b.c", 4, None),
            sym(Category::Definition, "bar", "/src/b.c", 5, None),
            sym(Category::FunctionCall, "baz", "/src/b.c", 6, Some("bar")),
        ];
        for symbol in &symbols {
            store.add_symbol(symbol).unwrap();
        }

        assert_eq!(names(&store.find_symbol("foo").unwrap()), vec![("foo", 1), ("foo", 3), ("foo", 4)]);
        assert_eq!(names(&store.find_definition("bar").unwrap()), vec![("bar", 5)]);
        assert_eq!(names(&store.find_caller("foo").unwrap()), vec![("foo", 3)]);
        assert_eq!(names(&store.find_call("foo").unwrap()), vec![("bar", 2), ("foo", 3)]);
        assert_eq!(names(&store.find_call("bar").unwrap()), vec![("baz", 6)]);
        assert!(store.find_definition("nothing").unwrap().is_empty());
        assert!(store.find_symbol("").unwrap().is_empty());
    }

    #[test]
    fn test_query_callback_short_circuits() {
        let store = SqliteStore::in_memory().unwrap();
        for line in 1..=5 {
            store
                .add_symbol(&sym(Category::FunctionCall, "log", "/src/a.c", line, None))
                .unwrap();
        }

        let mut seen = Vec::new();
        store
            .find_caller_with("log", |result| {
                seen.push(result.symbol.line);
                if seen.len() == 2 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap();
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn test_find_file_suffix_matching() {
        let store = SqliteStore::in_memory().unwrap();
        store.add_record(Path::new("/foo/bar"), "", 0).unwrap();
        store.add_record(Path::new("/baz/bar"), "", 0).unwrap();
        store.add_record(Path::new("/baz/foobar"), "", 0).unwrap();

        let found = store.find_file("bar").unwrap();
        assert_eq!(found, vec![PathBuf::from("/baz/bar"), PathBuf::from("/foo/bar")]);
        assert_eq!(store.find_file("/foo/bar").unwrap(), vec![PathBuf::from("/foo/bar")]);
        assert_eq!(store.find_file("foo/bar").unwrap(), vec![PathBuf::from("/foo/bar")]);
        assert!(store.find_file("baz").unwrap().is_empty());
        // no LIKE wildcards or case folding
        assert!(store.find_file("%bar").unwrap().is_empty());
        assert!(store.find_file("BAR").unwrap().is_empty());
    }

    #[test]
    fn test_find_includer_suffix_matching() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .add_symbol(&sym(Category::Include, "sys/types.h", "/src/a.c", 1, None))
            .unwrap();
        store
            .add_symbol(&sym(Category::Include, "types.h", "/src/b.c", 1, None))
            .unwrap();
        store
            .add_symbol(&sym(Category::Include, "mytypes.h", "/src/c.c", 1, None))
            .unwrap();
        // a definition with the same name is not an include
        store
            .add_symbol(&sym(Category::Definition, "types.h", "/src/d.c", 1, None))
            .unwrap();

        let files: Vec<_> = store
            .find_includer("types.h")
            .unwrap()
            .into_iter()
            .map(|r| r.symbol.path)
            .collect();
        assert_eq!(files, vec![PathBuf::from("/src/a.c"), PathBuf::from("/src/b.c")]);
        assert_eq!(store.find_includer("sys/types.h").unwrap().len(), 1);
    }

    // =========================================================================
    // Content and File-level Tests
    // =========================================================================

    #[test]
    fn test_add_line_and_get_content() {
        let store = SqliteStore::in_memory().unwrap();
        let path = Path::new("/src/a.c");
        store.add_line(path, 3, "  bar();").unwrap();
        store.add_line(path, 3, "  baz();").unwrap();

        assert_eq!(store.get_content(path, 3).unwrap().as_deref(), Some("  baz();"));
        assert_eq!(store.get_content(path, 4).unwrap(), None);
    }

    #[test]
    fn test_update_file_replaces_previous_state() {
        let store = SqliteStore::in_memory().unwrap();
        let path = Path::new("/src/a.c");
        store
            .update_file(
                path,
                "old",
                1,
                &[sym(Category::Definition, "old_fn", "/src/a.c", 1, None)],
                Some("old_fn() {\n"),
            )
            .unwrap();
        store
            .update_file(
                path,
                "new",
                2,
                &[
                    sym(Category::Definition, "new_fn", "/src/a.c", 1, None),
                    sym(Category::FunctionCall, "helper", "/src/a.c", 2, Some("new_fn")),
                ],
                Some("new_fn() {\n  helper();\n}\n"),
            )
            .unwrap();

        assert!(store.find_symbol("old_fn").unwrap().is_empty());
        assert_eq!(store.count_symbols().unwrap(), 2);
        assert_eq!(store.find_record(path).unwrap().unwrap().hash, "new");

        let calls = store.find_call("new_fn").unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].context.as_deref(), Some("  helper();"));
    }

    #[test]
    fn test_update_file_failure_rolls_back() {
        let store = SqliteStore::in_memory().unwrap();
        let path = Path::new("/src/a.c");
        store
            .update_file(
                path,
                "old",
                1,
                &[sym(Category::Definition, "old_fn", "/src/a.c", 1, None)],
                Some("old_fn() {\n"),
            )
            .unwrap();

        store
            .conn
            .lock()
            .execute_batch(
                "CREATE TRIGGER reject_poison BEFORE INSERT ON symbols
                 WHEN NEW.name = 'poison'
                 BEGIN SELECT RAISE(ABORT, 'poisoned symbol'); END;",
            )
            .unwrap();

        let err = store
            .update_file(
                path,
                "new",
                2,
                &[
                    sym(Category::Definition, "new_fn", "/src/a.c", 1, None),
                    sym(Category::FunctionCall, "poison", "/src/a.c", 2, Some("new_fn")),
                ],
                Some("new_fn() {\n  poison();\n}\n"),
            )
            .unwrap_err();
        assert!(matches!(err, IndexError::DatabaseError(_)));

        let record = store.find_record(path).unwrap().unwrap();
        assert_eq!(record.hash, "old");
        assert_eq!(record.timestamp, 1);
        assert_eq!(store.count_records().unwrap(), 1);
        assert_eq!(store.count_symbols().unwrap(), 1);
        assert_eq!(store.find_definition("old_fn").unwrap().len(), 1);
        assert!(store.find_definition("new_fn").unwrap().is_empty());
        assert_eq!(store.get_content(path, 1).unwrap().as_deref(), Some("old_fn() {"));
        assert_eq!(store.get_content(path, 2).unwrap(), None);
    }

    #[test]
    fn test_update_file_without_content() {
        let store = SqliteStore::in_memory().unwrap();
        let path = Path::new("/src/a.c");
        store
            .update_file(path, "h", 1, &[sym(Category::Definition, "f", "/src/a.c", 1, None)], None)
            .unwrap();
        assert_eq!(store.get_content(path, 1).unwrap(), None);
        assert_eq!(store.find_definition("f").unwrap()[0].context, None);
    }

    #[test]
    fn test_total_changes_counts_writes() {
        let store = SqliteStore::in_memory().unwrap();
        let before = store.total_changes().unwrap();
        store.add_record(Path::new("/a.c"), "h", 1).unwrap();
        assert!(store.total_changes().unwrap() > before);

        let after = store.total_changes().unwrap();
        store.find_file("a.c").unwrap();
        assert_eq!(store.total_changes().unwrap(), after);
    }

    #[test]
    fn test_store_is_shareable_across_threads() {
        let store = SqliteStore::in_memory().unwrap();
        std::thread::scope(|scope| {
            for worker in 0..4 {
                let store = &store;
                scope.spawn(move || {
                    let path = format!("/src/file{worker}.c");
                    let symbols = [sym(Category::Definition, "f", &path, 1, None)];
                    store.update_file(Path::new(&path), "h", 1, &symbols, None).unwrap();
                });
            }
        });
        assert_eq!(store.count_records().unwrap(), 4);
        assert_eq!(store.find_definition("f").unwrap().len(), 4);
    }
}
