//! Heuristic parser for C-family sources and other line-oriented languages.
//!
//! No grammar is involved: each line is classified by a short list of
//! patterns and the first one that applies wins. Declarations that need type
//! information to disambiguate (`a * b;`) are simply not recognised.
//!
//! A [`GenericConfig`] describes one language: its reserved words, the
//! keywords that introduce definitions, its comment markers and whether it
//! has a C preprocessor. Built-in descriptions exist for C and C++, Python,
//! TableGen and Windows module-definition files.

use std::collections::HashSet;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{
    read_file, LineMatch, LineMatcher, LineSymbols, SymbolParser, DEFINE_PATTERN, INCLUDE_PATTERN,
};
use crate::{Category, Result, Symbol};

/// Extensions handled by the C-family parser unless configured otherwise.
pub const DEFAULT_EXTENSIONS: &[&str] = &["c", "h", "cc", "cpp", "cxx", "c++", "hh", "hpp"];

pub const PYTHON_EXTENSIONS: &[&str] = &["py"];

pub const TABLEGEN_EXTENSIONS: &[&str] = &["td"];

pub const MODULE_DEFINITION_EXTENSIONS: &[&str] = &["def"];

const IDENT: &str = "[A-Za-z_][A-Za-z0-9_]*";

const C_RESERVED_WORDS: &[&str] = &[
    "alignas", "alignof", "asm", "auto", "bool", "break", "case", "catch", "char", "class",
    "const", "const_cast", "constexpr", "continue", "decltype", "default", "defined", "delete",
    "do", "double", "dynamic_cast", "else", "enum", "extern", "float", "for", "goto", "if",
    "inline", "int", "long", "namespace", "new", "noexcept", "operator", "register",
    "reinterpret_cast", "return", "short", "signed", "sizeof", "static", "static_assert",
    "static_cast", "struct", "switch", "template", "throw", "try", "typedef", "typename",
    "typeof", "union", "unsigned", "using", "void", "volatile", "while", "_Alignof",
    "_Static_assert", "__asm__", "__attribute__", "__typeof__",
];

const PYTHON_RESERVED_WORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

const TABLEGEN_RESERVED_WORDS: &[&str] = &[
    "assert", "bit", "bits", "class", "code", "dag", "def", "defm", "defset", "defvar", "else",
    "false", "field", "foreach", "if", "in", "include", "int", "let", "list", "multiclass",
    "string", "then", "true",
];

const MODULE_DEFINITION_RESERVED_WORDS: &[&str] = &[
    "APPLOADER", "BASE", "CODE", "CONFORMING", "DATA", "DESCRIPTION", "DEV386", "DISCARDABLE",
    "DYNAMIC", "EXECUTE", "EXECUTEONLY", "EXECUTEREAD", "EXETYPE", "EXPORTS", "FIXED",
    "FUNCTIONS", "HEAPSIZE", "IMPORTS", "IMPURE", "INCLUDE", "INITINSTANCE", "IOPL", "LIBRARY",
    "LOADONCALL", "LONGNAMES", "MOVABLE", "MOVEABLE", "MULTIPLE", "NAME", "NEWFILES", "NODATA",
    "NOIOPL", "NONAME", "NONCONFORMING", "NONDISCARDABLE", "NONE", "NONSHARED",
    "NOTWINDOWCOMPAT", "OBJECTS", "OLD", "ONLY", "PRELOAD", "PRIVATE", "PROTMODE", "PURE",
    "READONLY", "READWRITE", "REALMODE", "RESIDENT", "RESIDENTNAME", "SECTIONS", "SEGMENTS",
    "SHARED", "SINGLE", "STACKSIZE", "STUB", "VERSION", "WINDOWAPI", "WINDOWCOMPAT", "WINDOWS",
];

/// Leading words that make a column-0 `name(...);` a statement rather than
/// a declaration.
const STATEMENT_WORDS: &[&str] = &["return", "else", "do", "case", "goto"];

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Description of one language for the generic parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenericConfig {
    /// Words introducing a named definition (`struct foo {`)
    pub definition_keywords: Vec<String>,
    /// Characters allowed right after a name introduced by a definition
    /// keyword; the end of the line is always allowed
    pub definition_terminators: String,
    /// Words whose following identifier is a reference (`goto out;`)
    pub reference_keywords: Vec<String>,
    /// Words followed by a quoted file name (`include "x.td"`)
    pub include_keywords: Vec<String>,
    /// Words never reported as symbols
    pub reserved_words: Vec<String>,
    /// Prefixes that mark a line as a comment
    pub comment_prefixes: Vec<String>,
    /// Recognise `#define` and `#include`, and skip other `#` directives
    pub preprocessor: bool,
    /// Treat an unindented `name(...)` as a function definition
    pub column0_functions: bool,
    /// Record the first unreserved identifier of an otherwise unmatched
    /// line as a reference
    pub bare_references: bool,
}

impl Default for GenericConfig {
    fn default() -> Self {
        Self::c()
    }
}

impl GenericConfig {
    /// C, C++ and their headers.
    pub fn c() -> Self {
        Self {
            definition_keywords: strings(&["struct", "union", "enum", "class", "namespace"]),
            definition_terminators: "{:".to_string(),
            reference_keywords: strings(&["goto", "return"]),
            include_keywords: Vec::new(),
            reserved_words: strings(C_RESERVED_WORDS),
            comment_prefixes: strings(&["//", "/*", "*/", "* "]),
            preprocessor: true,
            column0_functions: true,
            bare_references: false,
        }
    }

    pub fn python() -> Self {
        Self {
            definition_keywords: strings(&["class", "def"]),
            definition_terminators: "(:".to_string(),
            reference_keywords: strings(&["return", "import"]),
            include_keywords: Vec::new(),
            reserved_words: strings(PYTHON_RESERVED_WORDS),
            comment_prefixes: strings(&["#"]),
            preprocessor: false,
            column0_functions: false,
            bare_references: false,
        }
    }

    /// LLVM TableGen (`.td`).
    pub fn tablegen() -> Self {
        Self {
            definition_keywords: strings(&[
                "bit", "class", "def", "defm", "defset", "defvar", "let", "multiclass", "string",
            ]),
            definition_terminators: "{:<;=".to_string(),
            reference_keywords: Vec::new(),
            include_keywords: strings(&["include"]),
            reserved_words: strings(TABLEGEN_RESERVED_WORDS),
            comment_prefixes: strings(&["//", "/*", "*/", "* "]),
            preprocessor: true,
            column0_functions: false,
            bare_references: false,
        }
    }

    /// Windows module-definition files: every exported or imported name is
    /// a reference.
    pub fn module_definition() -> Self {
        Self {
            definition_keywords: Vec::new(),
            definition_terminators: String::new(),
            reference_keywords: Vec::new(),
            include_keywords: Vec::new(),
            reserved_words: strings(MODULE_DEFINITION_RESERVED_WORDS),
            comment_prefixes: strings(&[";"]),
            preprocessor: false,
            column0_functions: false,
            bare_references: true,
        }
    }

    /// The built-in languages with the extensions they claim by default.
    pub fn builtin() -> Vec<(&'static [&'static str], GenericConfig)> {
        vec![
            (DEFAULT_EXTENSIONS, Self::c()),
            (PYTHON_EXTENSIONS, Self::python()),
            (TABLEGEN_EXTENSIONS, Self::tablegen()),
            (MODULE_DEFINITION_EXTENSIONS, Self::module_definition()),
        ]
    }
}

/// Pattern-based symbol extractor for one configured language.
#[derive(Debug)]
pub struct GenericParser {
    define: Option<Regex>,
    include: Option<Regex>,
    keyword_include: Option<Regex>,
    function: Option<Regex>,
    leader: Option<Regex>,
    reference: Option<Regex>,
    call: Regex,
    identifier: Option<Regex>,
    reserved: HashSet<String>,
    comments: Vec<String>,
    preprocessor: bool,
}

/// `a|b|c` with each word escaped, or `None` when there are no words
fn alternation(words: &[String]) -> Option<String> {
    let escaped: Vec<String> = words
        .iter()
        .map(|w| w.trim())
        .filter(|w| !w.is_empty())
        .map(regex::escape)
        .collect();
    if escaped.is_empty() {
        None
    } else {
        Some(escaped.join("|"))
    }
}

/// What an unindented declarator line turned out to be.
enum Declarator {
    Function(LineMatch),
    /// `int helper(int value);`
    Prototype,
}

impl GenericParser {
    pub fn new(config: &GenericConfig) -> Result<Self> {
        let terminators: String = config
            .definition_terminators
            .chars()
            .map(|c| regex::escape(&c.to_string()))
            .collect();
        let follow = if terminators.is_empty() {
            "$".to_string()
        } else {
            format!("[{terminators}]|$")
        };

        let leader = alternation(&config.definition_keywords)
            .map(|kw| {
                Regex::new(&format!(
                    r"^[ \t]*(?:{IDENT}[ \t]+)*(?:{kw})[ \t]+({IDENT})[ \t]*(?:{follow})"
                ))
            })
            .transpose()?;
        let reference = alternation(&config.reference_keywords)
            .map(|kw| Regex::new(&format!(r"^[ \t]*(?:{kw})[ \t]+({IDENT})[ \t]*(?:;|$)")))
            .transpose()?;
        let keyword_include = alternation(&config.include_keywords)
            .map(|kw| Regex::new(&format!(r#"^[ \t]*(?:{kw})[ \t]*(<[^>]*>|"[^"]*")"#)))
            .transpose()?;

        let (define, include) = if config.preprocessor {
            (Some(Regex::new(DEFINE_PATTERN)?), Some(Regex::new(INCLUDE_PATTERN)?))
        } else {
            (None, None)
        };

        let function = if config.column0_functions {
            // a column-0 declarator followed by an opening parenthesis
            Some(Regex::new(&format!(
                r"^(?:{IDENT}[ \t*&]+)*[*&]*(?:{IDENT}::)*(~?{IDENT})[ \t]*\("
            ))?)
        } else {
            None
        };

        let identifier = if config.bare_references {
            Some(Regex::new(&format!(r"\b({IDENT})"))?)
        } else {
            None
        };

        Ok(Self {
            define,
            include,
            keyword_include,
            function,
            leader,
            reference,
            call: Regex::new(&format!(r"({IDENT})[ \t]*\("))?,
            identifier,
            reserved: config.reserved_words.iter().cloned().collect(),
            comments: config
                .comment_prefixes
                .iter()
                .filter(|p| !p.trim().is_empty())
                .cloned()
                .collect(),
            preprocessor: config.preprocessor,
        })
    }

    /// Lazily extract symbols from already-decoded source text.
    pub fn symbols<'a>(&'a self, path: &'a Path, source: &'a str) -> LineSymbols<'a, Self> {
        LineSymbols::new(self, path, source)
    }

    fn is_reserved(&self, name: &str) -> bool {
        self.reserved.contains(name.trim_start_matches('~'))
    }

    fn is_comment(&self, trimmed: &str) -> bool {
        self.comments
            .iter()
            .any(|p| trimmed.starts_with(p.as_str()) || trimmed == p.trim_end())
    }

    fn declarator(&self, line: &str) -> Option<Declarator> {
        let function = self.function.as_ref()?;
        if line.starts_with([' ', '\t']) {
            return None;
        }
        let caps = function.captures(line)?;
        let m = LineMatch::from_group(Category::Definition, &caps, 1)?;
        if self.is_reserved(&line[m.start..m.end]) {
            return None;
        }

        let code = line.split("//").next().unwrap_or(line).trim_end();
        if code.ends_with(',') {
            return None;
        }
        if code.ends_with(';') {
            let prefix = line[..m.start].trim();
            let first_word = prefix.split([' ', '\t', '*', '&']).next().unwrap_or("");
            let declaration = !prefix.is_empty()
                && !code.contains('=')
                && !STATEMENT_WORDS.contains(&first_word);
            return declaration.then_some(Declarator::Prototype);
        }
        Some(Declarator::Function(m))
    }

    fn keyword_match(&self, re: &Regex, category: Category, line: &str) -> Option<LineMatch> {
        let caps = re.captures(line)?;
        let m = LineMatch::from_group(category, &caps, 1)?;
        (!self.is_reserved(&line[m.start..m.end])).then_some(m)
    }

    fn first_call(&self, line: &str) -> Option<LineMatch> {
        self.call
            .captures_iter(line)
            .filter_map(|caps| LineMatch::from_group(Category::FunctionCall, &caps, 1))
            .find(|m| !self.is_reserved(&line[m.start..m.end]))
    }

    fn first_identifier(&self, line: &str) -> Option<LineMatch> {
        self.identifier
            .as_ref()?
            .captures_iter(line)
            .filter_map(|caps| LineMatch::from_group(Category::Reference, &caps, 1))
            .find(|m| !self.is_reserved(&line[m.start..m.end]))
    }
}

impl LineMatcher for GenericParser {
    fn match_line(&self, line: &str) -> Option<LineMatch> {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || self.is_comment(trimmed) {
            return None;
        }

        if self.preprocessor {
            if let Some(caps) = self.define.as_ref().and_then(|re| re.captures(line)) {
                return LineMatch::from_group(Category::Definition, &caps, 1);
            }
            if let Some(caps) = self.include.as_ref().and_then(|re| re.captures(line)) {
                return LineMatch::include(&caps, 1);
            }
            // remaining preprocessor lines (#if, #pragma, ...) carry no symbols
            if trimmed.starts_with('#') {
                return None;
            }
        }
        if let Some(caps) = self.keyword_include.as_ref().and_then(|re| re.captures(line)) {
            return LineMatch::include(&caps, 1);
        }

        match self.declarator(line) {
            Some(Declarator::Function(m)) => return Some(m),
            Some(Declarator::Prototype) => return None,
            None => {}
        }
        if let Some(m) = self
            .leader
            .as_ref()
            .and_then(|re| self.keyword_match(re, Category::Definition, line))
        {
            return Some(m);
        }
        if let Some(m) = self
            .reference
            .as_ref()
            .and_then(|re| self.keyword_match(re, Category::Reference, line))
        {
            return Some(m);
        }
        self.first_call(line).or_else(|| self.first_identifier(line))
    }
}

impl SymbolParser for GenericParser {
    fn name(&self) -> &str {
        "generic"
    }

    fn parse(&self, path: &Path) -> Result<Vec<Symbol>> {
        let contents = read_file(path)?;
        self.parse_contents(path, &contents)
    }

    fn parse_contents(&self, path: &Path, contents: &[u8]) -> Result<Vec<Symbol>> {
        let source = String::from_utf8_lossy(contents);
        Ok(self.symbols(path, &source).collect())
    }
}
