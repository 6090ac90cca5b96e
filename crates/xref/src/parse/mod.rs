//! Symbol extraction from source files.
//!
//! This module defines the common interface every parser backend satisfies
//! (`SymbolParser`) and the machinery shared by the built-in heuristic
//! parsers: a line classifier (`LineMatcher`) driven by `LineSymbols`, which
//! owns the flat parent attribution.
//!
//! # Examples
//!
//! ```
//! use xref::parse::asm::AsmParser;
//! use xref::Category;
//! use std::path::Path;
//!
//! let parser = AsmParser::new().unwrap();
//! let source = "foo:\n    call bar\n";
//! let symbols: Vec<_> = parser.symbols(Path::new("/src/start.s"), source).collect();
//!
//! assert_eq!(symbols[0].category, Category::Definition);
//! assert_eq!(symbols[1].name, "bar");
//! assert_eq!(symbols[1].parent.as_deref(), Some("foo"));
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use regex::Captures;

use crate::{Category, IndexError, Result, Symbol};

pub mod asm;
pub mod external;
pub mod generic;

/// Recognises a `#define NAME`
pub(crate) const DEFINE_PATTERN: &str =
    r"^[ \t]*#[ \t]*define[ \t]+([A-Za-z_][A-Za-z0-9_]*)";

/// Recognises `#include <...>` and `#include "..."`
pub(crate) const INCLUDE_PATTERN: &str = r#"^[ \t]*#[ \t]*include[ \t]*(<[^>]*>|"[^"]*")"#;

/// A parser backend: anything that turns a file into an ordered symbol list.
///
/// The built-in heuristic parsers implement this, as does
/// [`external::CommandParser`], which delegates to another process.
pub trait SymbolParser: Send + Sync {
    /// Short name used in log messages.
    fn name(&self) -> &str;

    /// Read and parse the file at `path`.
    fn parse(&self, path: &Path) -> Result<Vec<Symbol>>;

    /// Parse contents that have already been read from `path`.
    ///
    /// Backends that cannot consume in-memory contents fall back to reading
    /// the file themselves.
    fn parse_contents(&self, path: &Path, contents: &[u8]) -> Result<Vec<Symbol>> {
        let _ = contents;
        self.parse(path)
    }
}

/// Where a line matcher found a symbol name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineMatch {
    pub category: Category,
    /// Byte offset of the first character of the name
    pub start: usize,
    /// Byte offset one past the last character of the name
    pub end: usize,
}

impl LineMatch {
    pub fn new(category: Category, start: usize, end: usize) -> Self {
        Self {
            category,
            start,
            end,
        }
    }

    /// Build a match from capture group `group`.
    pub(crate) fn from_group(category: Category, caps: &Captures<'_>, group: usize) -> Option<Self> {
        caps.get(group)
            .map(|m| Self::new(category, m.start(), m.end()))
    }

    /// Build an include match from capture group `group`, dropping the
    /// surrounding `<>` or `""` delimiters.
    pub(crate) fn include(caps: &Captures<'_>, group: usize) -> Option<Self> {
        let m = caps.get(group)?;
        if m.end() - m.start() < 2 {
            return None;
        }
        Some(Self::new(Category::Include, m.start() + 1, m.end() - 1))
    }
}

/// Classifies a single line of text. At most one symbol per line.
pub trait LineMatcher {
    fn match_line(&self, line: &str) -> Option<LineMatch>;
}

/// Lazily walks a file's lines, yielding one symbol per matching line.
///
/// Parent attribution is flat: every non-definition symbol carries the name
/// of the most recent definition seen earlier in the same file, regardless
/// of actual nesting. Definitions themselves carry no parent.
pub struct LineSymbols<'a, M: LineMatcher> {
    matcher: &'a M,
    path: &'a Path,
    lines: std::str::Lines<'a>,
    lineno: u32,
    last_definition: Option<String>,
}

impl<'a, M: LineMatcher> LineSymbols<'a, M> {
    pub fn new(matcher: &'a M, path: &'a Path, source: &'a str) -> Self {
        Self {
            matcher,
            path,
            lines: source.lines(),
            lineno: 0,
            last_definition: None,
        }
    }
}

impl<M: LineMatcher> Iterator for LineSymbols<'_, M> {
    type Item = Symbol;

    fn next(&mut self) -> Option<Symbol> {
        loop {
            let line = self.lines.next()?;
            self.lineno = self.lineno.saturating_add(1);

            let Some(m) = self.matcher.match_line(line) else {
                continue;
            };
            let Some(name) = line.get(m.start..m.end).filter(|n| !n.is_empty()) else {
                continue;
            };

            let column = u32::try_from(m.start + 1).unwrap_or(u32::MAX);
            let parent = match m.category {
                Category::Definition => {
                    self.last_definition = Some(name.to_string());
                    None
                }
                _ => self.last_definition.clone(),
            };

            return Some(
                Symbol::new(m.category, name, self.path, self.lineno, column).with_parent(parent),
            );
        }
    }
}

/// Read a whole file, reporting allocation failure instead of aborting.
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    let file_error = |source| IndexError::FileError {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(file_error)?;
    let len = file.metadata().map_err(file_error)?.len();

    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(usize::try_from(len).unwrap_or(usize::MAX))
        .map_err(|_| IndexError::OutOfMemory {
            path: path.to_path_buf(),
        })?;
    file.read_to_end(&mut buffer).map_err(file_error)?;
    Ok(buffer)
}

/// Lowercased extension used for parser lookup.
pub fn extension_key(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Maps file extensions to parser backends.
///
/// An extension is "recognized" exactly when a parser is registered for it;
/// the discovery queue and the indexer both consult the same registry.
#[derive(Clone, Default)]
pub struct ParserRegistry {
    by_extension: BTreeMap<String, Arc<dyn SymbolParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in language parsers and the assembly parser
    /// on their default extensions.
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::new();
        for (extensions, language) in generic::GenericConfig::builtin() {
            registry.register(extensions, Arc::new(generic::GenericParser::new(&language)?));
        }
        registry.register(asm::DEFAULT_EXTENSIONS, Arc::new(asm::AsmParser::new()?));
        Ok(registry)
    }

    /// Register `parser` for every extension in `extensions`, replacing any
    /// earlier registration.
    pub fn register<I, S>(&mut self, extensions: I, parser: Arc<dyn SymbolParser>)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for ext in extensions {
            let key = ext.as_ref().trim_start_matches('.').to_ascii_lowercase();
            if key.is_empty() {
                continue;
            }
            self.by_extension.insert(key, Arc::clone(&parser));
        }
    }

    /// The parser responsible for `path`, if its extension is recognized.
    pub fn parser_for(&self, path: &Path) -> Option<&Arc<dyn SymbolParser>> {
        extension_key(path).and_then(|ext| self.by_extension.get(&ext))
    }

    pub fn recognizes(&self, path: &Path) -> bool {
        self.parser_for(path).is_some()
    }

    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.by_extension.keys().map(|k| k.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.by_extension.is_empty()
    }
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.by_extension.iter().map(|(ext, p)| (ext, p.name())))
            .finish()
    }
}
