//! Parser backend that delegates to an external command.
//!
//! The command is run with the file path appended to its arguments and must
//! print one symbol per line on stdout:
//!
//! ```text
//! category<TAB>name<TAB>line<TAB>column[<TAB>parent]
//! ```
//!
//! `category` is one of `definition`, `call`, `reference` or `include`.
//! A run that exceeds its time budget is killed and reported as a per-file
//! failure.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use super::SymbolParser;
use crate::{Category, IndexError, Result, Symbol};

/// Default time budget for one invocation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs `program args... <file>` and reads symbols from its output.
#[derive(Debug, Clone)]
pub struct CommandParser {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandParser {
    /// Build from a command line given as program followed by arguments.
    pub fn new(command: &[String], timeout: Duration) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| IndexError::ConfigError("external parser command is empty".into()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn run(&self, path: &Path) -> Result<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| IndexError::IoError(std::io::ErrorKind::BrokenPipe.into()))?;

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut output = Vec::new();
            let result = stdout.read_to_end(&mut output).map(|_| output);
            let _ = tx.send(result);
        });

        let output = match rx.recv_timeout(self.timeout) {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!("{} timed out on {:?}, killing it", self.program, path);
                let _ = child.kill();
                let _ = child.wait();
                return Err(IndexError::ParserTimeout {
                    path: path.to_path_buf(),
                    timeout: self.timeout,
                });
            }
        };

        let status = child.wait()?;
        if !status.success() {
            return Err(IndexError::ParseError {
                path: path.to_path_buf(),
                line: 0,
                message: format!("{} exited with {}", self.program, status),
            });
        }

        Ok(String::from_utf8_lossy(&output).into_owned())
    }
}

impl SymbolParser for CommandParser {
    fn name(&self) -> &str {
        &self.program
    }

    fn parse(&self, path: &Path) -> Result<Vec<Symbol>> {
        let output = self.run(path)?;
        parse_output(path, &output)
    }
}

/// Parse the tab-separated symbol listing produced by an external parser.
pub fn parse_output(path: &Path, output: &str) -> Result<Vec<Symbol>> {
    let mut symbols = Vec::new();

    for (index, line) in output.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let malformed = |message: String| IndexError::ParseError {
            path: PathBuf::from(path),
            line: index as u64 + 1,
            message,
        };

        let fields: Vec<&str> = line.split('\t').collect();
        if !(4..=5).contains(&fields.len()) {
            return Err(malformed(format!(
                "expected 4 or 5 tab-separated fields, found {}",
                fields.len()
            )));
        }

        let category: Category = fields[0].parse().map_err(malformed)?;
        let name = fields[1];
        if name.is_empty() {
            return Err(malformed("empty symbol name".to_string()));
        }
        let lineno: u32 = fields[2]
            .parse()
            .map_err(|_| malformed(format!("invalid line number {:?}", fields[2])))?;
        let column: u32 = fields[3]
            .parse()
            .map_err(|_| malformed(format!("invalid column {:?}", fields[3])))?;
        let parent = fields
            .get(4)
            .filter(|p| !p.is_empty())
            .map(|p| p.to_string());

        symbols.push(Symbol::new(category, name, path, lineno, column).with_parent(parent));
    }

    Ok(symbols)
}
