//! Configuration for xref.
//!
//! Settings are layered with figment: built-in defaults, then `.xref.toml` in
//! the indexed root, then `XREF_*` environment variables. A configuration
//! that fails to extract is an error rather than a silent fallback.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::parse::asm::{self, AsmParser};
use crate::parse::external::CommandParser;
use crate::parse::generic::{self, GenericConfig, GenericParser};
use crate::parse::ParserRegistry;
use crate::{IndexError, Result};

/// Name of the per-project configuration file.
pub const CONFIG_FILE: &str = ".xref.toml";

/// Default directories to exclude from indexing.
pub const DEFAULT_EXCLUDE_DIRS: &[&str] =
    &[".git", ".hg", ".svn", ".xref", "node_modules", "target"];

/// When source lines are copied into the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentMode {
    /// Read lines from disk when results are displayed
    #[default]
    Lazy,
    /// Store every line while indexing
    Eager,
}

impl std::str::FromStr for ContentMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lazy" => Ok(ContentMode::Lazy),
            "eager" => Ok(ContentMode::Eager),
            other => Err(format!("unknown content mode: {} (expected lazy or eager)", other)),
        }
    }
}

/// An external command used as the parser for some extensions.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExternalParserConfig {
    /// Program and arguments; the file path is appended.
    pub command: Vec<String>,
    pub extensions: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    crate::parse::external::DEFAULT_TIMEOUT.as_secs()
}

/// A language for the generic parser described in the configuration file.
///
/// Unset parser fields take their C-family defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LanguageConfig {
    pub extensions: Vec<String>,
    #[serde(flatten)]
    pub parser: GenericConfig,
}

/// xref configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Database location; relative paths are resolved against the root.
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Indexing workers (0 = one per CPU).
    #[serde(default)]
    pub threads: usize,

    #[serde(default)]
    pub content: ContentMode,

    /// Additional directories to exclude from indexing (merged with defaults).
    #[serde(default)]
    pub exclude_dirs: Vec<String>,

    #[serde(default = "default_generic_extensions")]
    pub generic_extensions: Vec<String>,

    #[serde(default = "default_python_extensions")]
    pub python_extensions: Vec<String>,

    #[serde(default = "default_tablegen_extensions")]
    pub tablegen_extensions: Vec<String>,

    /// Windows module-definition files
    #[serde(default = "default_module_definition_extensions")]
    pub module_definition_extensions: Vec<String>,

    #[serde(default = "default_asm_extensions")]
    pub asm_extensions: Vec<String>,

    /// Keywords introducing a named definition in C-family sources.
    #[serde(default = "default_definition_keywords")]
    pub definition_keywords: Vec<String>,

    /// Keywords whose operand is recorded as a reference.
    #[serde(default = "default_reference_keywords")]
    pub reference_keywords: Vec<String>,

    /// Additional generic-parser languages, registered after the built-in ones.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub languages: Vec<LanguageConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_parser: Option<ExternalParserConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: default_database(),
            threads: 0,
            content: ContentMode::default(),
            exclude_dirs: Vec::new(),
            generic_extensions: default_generic_extensions(),
            python_extensions: default_python_extensions(),
            tablegen_extensions: default_tablegen_extensions(),
            module_definition_extensions: default_module_definition_extensions(),
            asm_extensions: default_asm_extensions(),
            definition_keywords: default_definition_keywords(),
            reference_keywords: default_reference_keywords(),
            languages: Vec::new(),
            external_parser: None,
        }
    }
}

fn default_database() -> PathBuf {
    PathBuf::from(".xref").join(crate::db::DEFAULT_DB_NAME)
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_generic_extensions() -> Vec<String> {
    strings(generic::DEFAULT_EXTENSIONS)
}

fn default_python_extensions() -> Vec<String> {
    strings(generic::PYTHON_EXTENSIONS)
}

fn default_tablegen_extensions() -> Vec<String> {
    strings(generic::TABLEGEN_EXTENSIONS)
}

fn default_module_definition_extensions() -> Vec<String> {
    strings(generic::MODULE_DEFINITION_EXTENSIONS)
}

fn default_asm_extensions() -> Vec<String> {
    strings(asm::DEFAULT_EXTENSIONS)
}

fn default_definition_keywords() -> Vec<String> {
    GenericConfig::default().definition_keywords
}

fn default_reference_keywords() -> Vec<String> {
    GenericConfig::default().reference_keywords
}

impl Config {
    /// The layered sources for `root`, before extraction.
    pub fn figment(root: &Path) -> Figment {
        let config_path = root.join(CONFIG_FILE);

        // defaults <- toml file <- environment
        let figment = Figment::from(Serialized::defaults(Config::default()));
        let figment = if config_path.exists() {
            figment.merge(Toml::file(&config_path))
        } else {
            figment
        };
        figment.merge(Env::prefixed("XREF_").split("__"))
    }

    /// Load configuration for the tree rooted at `root`.
    ///
    /// Reports parse errors with file, line, and key information.
    pub fn load(root: &Path) -> Result<Self> {
        let config: Config = Self::figment(root)
            .extract()
            .map_err(|e| IndexError::ConfigError(e.to_string()))?;

        if root.join(CONFIG_FILE).exists() {
            tracing::info!("Loaded config from {:?}", root.join(CONFIG_FILE));
        }
        Ok(config)
    }

    /// Get all directories to exclude (defaults + user-configured).
    pub fn excluded_dirs(&self) -> Vec<&str> {
        let mut dirs: Vec<&str> = DEFAULT_EXCLUDE_DIRS.to_vec();
        for dir in &self.exclude_dirs {
            if !dirs.contains(&dir.as_str()) {
                dirs.push(dir.as_str());
            }
        }
        dirs
    }

    /// Database path for the tree rooted at `root`.
    pub fn database_path(&self, root: &Path) -> PathBuf {
        if self.database.is_absolute() {
            self.database.clone()
        } else {
            root.join(&self.database)
        }
    }

    /// The C-family language with the configured keyword lists.
    pub fn generic_config(&self) -> GenericConfig {
        GenericConfig {
            definition_keywords: self.definition_keywords.clone(),
            reference_keywords: self.reference_keywords.clone(),
            ..GenericConfig::c()
        }
    }

    /// Compile the configured parsers. Later registrations win: languages
    /// from the configuration file override the built-in ones, and the
    /// external parser, when present, overrides everything for its
    /// extensions.
    pub fn parser_registry(&self) -> Result<ParserRegistry> {
        let mut registry = ParserRegistry::new();
        let builtin = [
            (&self.generic_extensions, self.generic_config()),
            (&self.python_extensions, GenericConfig::python()),
            (&self.tablegen_extensions, GenericConfig::tablegen()),
            (&self.module_definition_extensions, GenericConfig::module_definition()),
        ];
        for (extensions, language) in builtin {
            if !extensions.is_empty() {
                registry.register(extensions, Arc::new(GenericParser::new(&language)?));
            }
        }
        registry.register(&self.asm_extensions, Arc::new(AsmParser::new()?));

        for language in &self.languages {
            registry.register(
                &language.extensions,
                Arc::new(GenericParser::new(&language.parser)?),
            );
        }

        if let Some(external) = &self.external_parser {
            let parser =
                CommandParser::new(&external.command, Duration::from_secs(external.timeout_secs))?;
            registry.register(&external.extensions, Arc::new(parser));
        }

        if registry.is_empty() {
            return Err(IndexError::ConfigError(
                "no file extensions are configured for any parser".to_string(),
            ));
        }
        Ok(registry)
    }

    /// The effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| IndexError::ConfigError(e.to_string()))
    }
}
