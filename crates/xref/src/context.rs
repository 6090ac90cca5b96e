//! Source lines for displaying query results.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::db::SqliteStore;
use crate::QueryResult;

/// Looks up the text of a source line, preferring content recorded in the
/// store and falling back to the file on disk.
///
/// Files read from disk are cached whole, so repeated lookups into the same
/// file cost one read. A file that cannot be read is cached as missing.
pub struct ContextReader<'a> {
    store: Option<&'a SqliteStore>,
    files: Mutex<HashMap<PathBuf, Option<Arc<Vec<String>>>>>,
}

impl<'a> ContextReader<'a> {
    pub fn new(store: Option<&'a SqliteStore>) -> Self {
        Self {
            store,
            files: Mutex::new(HashMap::new()),
        }
    }

    /// Text of line `lineno` (1-based) of `path`, or an empty string when
    /// the line is unavailable.
    pub fn get_line(&self, path: &Path, lineno: u32) -> String {
        if let Some(store) = self.store {
            match store.get_content(path, lineno) {
                Ok(Some(body)) => return body,
                Ok(None) => {}
                Err(e) => debug!("No stored content for {:?}:{}: {}", path, lineno, e),
            }
        }

        let Some(index) = (lineno as usize).checked_sub(1) else {
            return String::new();
        };
        self.file_lines(path)
            .and_then(|lines| lines.get(index).cloned())
            .unwrap_or_default()
    }

    /// Context for a query result: the joined content if the query carried
    /// it, otherwise a lookup by path and line.
    pub fn context_for(&self, result: &QueryResult) -> String {
        match &result.context {
            Some(text) => text.clone(),
            None => self.get_line(&result.symbol.path, result.symbol.line),
        }
    }

    fn file_lines(&self, path: &Path) -> Option<Arc<Vec<String>>> {
        let mut files = self.files.lock();
        files
            .entry(path.to_path_buf())
            .or_insert_with(|| match crate::parse::read_file(path) {
                Ok(bytes) => Some(Arc::new(
                    String::from_utf8_lossy(&bytes)
                        .lines()
                        .map(str::to_string)
                        .collect(),
                )),
                Err(e) => {
                    debug!("Cannot read context from {:?}: {}", path, e);
                    None
                }
            })
            .clone()
    }
}
