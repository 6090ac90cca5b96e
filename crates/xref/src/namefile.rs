//! Reader for name files: plain lists of source paths, such as `cscope.files`.
//!
//! Names are separated by whitespace. A name containing whitespace can be
//! wrapped in double quotes, inside which `\"` and `\\` are the only escapes.

use std::path::{Path, PathBuf};

use crate::{IndexError, Result};

/// Where and why a name file failed to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamefileError {
    pub line: u64,
    pub column: u64,
    pub message: &'static str,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Unquoted,
    Quoted,
}

fn is_separator(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r')
}

/// Split name file text into its entries.
pub fn parse_names(input: &str) -> std::result::Result<Vec<String>, NamefileError> {
    let mut names = Vec::new();
    let mut current = String::new();
    let mut state = State::Idle;
    let (mut line, mut column) = (1u64, 0u64);
    let mut chars = input.chars();

    let error = |line, column, message| NamefileError {
        line,
        column,
        message,
    };

    while let Some(c) = chars.next() {
        column += 1;

        match state {
            State::Idle if is_separator(c) => {}
            State::Idle if c == '"' => state = State::Quoted,
            State::Idle => {
                current.push(c);
                state = State::Unquoted;
            }
            State::Unquoted if is_separator(c) => {
                names.push(std::mem::take(&mut current));
                state = State::Idle;
            }
            State::Unquoted => current.push(c),
            State::Quoted if c == '"' => {
                if !current.is_empty() {
                    names.push(std::mem::take(&mut current));
                }
                state = State::Idle;
            }
            State::Quoted if c == '\\' => match chars.next() {
                Some(escaped @ ('"' | '\\')) => {
                    column += 1;
                    current.push(escaped);
                }
                _ => return Err(error(line, column, "malformed escape sequence")),
            },
            State::Quoted => current.push(c),
        }

        if c == '\n' {
            line += 1;
            column = 0;
        }
    }

    match state {
        State::Quoted => Err(error(
            line,
            column + 1,
            "unexpected end of file inside quoted name",
        )),
        State::Unquoted => {
            names.push(current);
            Ok(names)
        }
        State::Idle => Ok(names),
    }
}

/// Read the name file at `path`. Entries are returned as written; relative
/// entries are left for the caller to resolve.
pub fn read_namefile(path: &Path) -> Result<Vec<PathBuf>> {
    let text = std::fs::read_to_string(path).map_err(|source| IndexError::FileError {
        path: path.to_path_buf(),
        source,
    })?;

    let names = parse_names(&text).map_err(|e| IndexError::ParseError {
        path: path.to_path_buf(),
        line: e.line,
        message: format!("column {}: {}", e.column, e.message),
    })?;

    Ok(names.into_iter().map(PathBuf::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names() {
        let names = parse_names("a.c b.c\n\tsrc/c.h\r\n\n  last.s").unwrap();
        assert_eq!(names, vec!["a.c", "b.c", "src/c.h", "last.s"]);
    }

    #[test]
    fn test_quoted_names() {
        let names = parse_names("\"with space.c\" \"quote\\\"d.c\" \"back\\\\slash.h\" \"\"").unwrap();
        assert_eq!(names, vec!["with space.c", "quote\"d.c", "back\\slash.h"]);
    }

    #[test]
    fn test_quoted_name_spanning_lines() {
        let names = parse_names("\"odd\nname.c\" next.c").unwrap();
        assert_eq!(names, vec!["odd\nname.c", "next.c"]);
    }

    #[test]
    fn test_unterminated_quote() {
        let err = parse_names("ok.c\n\"never closed").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.column, 14);
        assert!(err.message.contains("quoted"));
    }

    #[test]
    fn test_malformed_escape() {
        let err = parse_names("a.c\nb.c \"bad\\n.c\"").unwrap_err();
        assert_eq!((err.line, err.column), (2, 9));
        assert_eq!(err.message, "malformed escape sequence");
    }

    #[test]
    fn test_read_namefile_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cscope.files");
        std::fs::write(&path, "\"oops").unwrap();

        match read_namefile(&path).unwrap_err() {
            IndexError::ParseError { line, message, .. } => {
                assert_eq!(line, 1);
                assert!(message.starts_with("column 6"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_read_namefile_missing() {
        let err = read_namefile(Path::new("/nonexistent/cscope.files")).unwrap_err();
        assert!(matches!(err, IndexError::FileError { .. }));
    }
}
