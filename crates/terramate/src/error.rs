//! error kinds, source ranges and aggregation
//!
//! Every failure the engine reports carries a [ErrorKind], a message and,
//! when the failure points at configuration text, a [SourceRange]. Parsing a
//! directory can fail for several independent reasons, so validation code
//! accumulates into an [ErrorList] and converts it to a result at the end.

use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Classification of engine failures.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    #[error("HCL syntax error")]
    HclSyntax,
    #[error("terramate schema error")]
    Schema,
    #[error("import error")]
    Import,
    #[error("parsing globals")]
    GlobalParse,
    #[error("evaluating globals")]
    GlobalEval,
    #[error("global redefined")]
    GlobalRedefined,
    #[error("parsing generate block")]
    Parsing,
    #[error("evaluating generate block")]
    Eval,
    #[error("conflicting generate blocks")]
    MultiLevelConflict,
    #[error("conflicting config detected")]
    ConflictingConfig,
    #[error("invalid file path")]
    InvalidFilePath,
    #[error("manually defined code found")]
    ManualCodeExists,
    #[error("loading globals")]
    LoadingGlobals,
    #[error("partial evaluation failed")]
    PartialEval,
    #[error("`for` expression disallows globals/terramate variables")]
    ForExprDisallowEval,
    #[error("interpolation failed")]
    InterpolationEval,
    #[error("invalid stack directory")]
    InvalidStackDir,
    #[error("filesystem error")]
    Io,
}

/// Position inside a configuration file. Lines and columns are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos {
    pub line: usize,
    pub column: usize,
    pub byte: usize,
}

/// Range of bytes inside a configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRange {
    pub path: PathBuf,
    pub start: Pos,
    pub end: Pos,
}

impl SourceRange {
    /// Computes line/column positions for a byte span of `source`.
    pub fn from_span(path: &Path, source: &str, span: Range<usize>) -> SourceRange {
        SourceRange {
            path: path.to_path_buf(),
            start: pos_at(source, span.start),
            end: pos_at(source, span.end),
        }
    }

    pub fn at_line(path: &Path, line: usize, column: usize) -> SourceRange {
        let pos = Pos {
            line,
            column,
            byte: 0,
        };
        SourceRange {
            path: path.to_path_buf(),
            start: pos,
            end: pos,
        }
    }
}

fn pos_at(source: &str, byte: usize) -> Pos {
    let byte = byte.min(source.len());
    let mut line = 1;
    let mut column = 1;
    for ch in source[..byte].chars() {
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    Pos { line, column, byte }
}

impl fmt::Display for SourceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{},{}-{},{}",
            self.path.display(),
            self.start.line,
            self.start.column,
            self.end.line,
            self.end.column
        )
    }
}

/// A single engine error.
#[derive(thiserror::Error, Debug, Clone)]
#[error("{kind}: {message}{}", range_note(.range))]
pub struct Error {
    kind: ErrorKind,
    message: String,
    range: Option<SourceRange>,
}

fn range_note(range: &Option<SourceRange>) -> String {
    match range {
        Some(range) => format!(" ({range})"),
        None => String::new(),
    }
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Error {
        Error {
            kind,
            message: message.into(),
            range: None,
        }
    }

    /// Wraps any displayable failure under the given kind.
    pub fn wrap(kind: ErrorKind, source: impl fmt::Display) -> Error {
        Error::new(kind, source.to_string())
    }

    pub fn at(mut self, range: SourceRange) -> Error {
        self.range = Some(range);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn range(&self) -> Option<&SourceRange> {
        self.range.as_ref()
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::new(ErrorKind::Io, err.to_string())
    }
}

/// Accumulates independent validation failures.
///
/// Mirrors the parse flow: callers push every error they find and convert to
/// a result once the whole scope was visited, so a single pass reports all
/// problems of a directory instead of the first one.
#[derive(Debug, Clone, Default)]
pub struct ErrorList {
    errors: Vec<Error>,
}

impl ErrorList {
    pub fn new() -> ErrorList {
        ErrorList::default()
    }

    pub fn push(&mut self, err: Error) {
        tracing::trace!(%err, "error recorded");
        self.errors.push(err);
    }

    /// Records the error of a failed result, passing values through.
    pub fn collect<T>(&mut self, res: Result<T, Error>) -> Option<T> {
        match res {
            Ok(value) => Some(value),
            Err(err) => {
                self.push(err);
                None
            }
        }
    }

    pub fn merge(&mut self, other: ErrorList) {
        self.errors.extend(other.errors);
    }

    /// Merges a failed aggregate result, re-kinding every error.
    pub fn merge_wrap(&mut self, kind: ErrorKind, res: Result<(), ErrorList>) {
        if let Err(list) = res {
            for err in list.errors {
                self.errors.push(Error {
                    kind,
                    message: err.message,
                    range: err.range,
                });
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Error> {
        self.errors.iter()
    }

    pub fn into_result(self) -> Result<(), ErrorList> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Checks that some recorded error has the given kind.
    pub fn has_kind(&self, kind: ErrorKind) -> bool {
        self.errors.iter().any(|err| err.kind == kind)
    }
}

impl From<Error> for ErrorList {
    fn from(err: Error) -> ErrorList {
        ErrorList { errors: vec![err] }
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => f.write_str("no errors"),
            [single] => single.fmt(f),
            [first, ..] => write!(f, "{} (and {} more errors)", first, self.errors.len() - 1),
        }
    }
}

impl std::error::Error for ErrorList {}

impl IntoIterator for ErrorList {
    type Item = Error;
    type IntoIter = std::vec::IntoIter<Error>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn positions_are_one_based() {
        let src = "a = 1\nbb = 2\n";
        let range = SourceRange::from_span(Path::new("f.tm"), src, 6..8);
        assert_eq!(range.start, Pos { line: 2, column: 1, byte: 6 });
        assert_eq!(range.end, Pos { line: 2, column: 3, byte: 8 });
    }

    #[test]
    fn list_aggregates_and_reports() {
        let mut errs = ErrorList::new();
        assert!(errs.clone().into_result().is_ok());

        errs.push(Error::new(ErrorKind::Schema, "attribute \"a\" redeclared"));
        errs.push(Error::new(ErrorKind::Import, "file already parsed"));

        assert!(errs.has_kind(ErrorKind::Schema));
        assert!(errs.has_kind(ErrorKind::Import));
        assert!(!errs.has_kind(ErrorKind::Eval));

        let err = errs.into_result().expect_err("must fail");
        assert_eq!(err.len(), 2);
        assert_eq!(
            err.to_string(),
            "terramate schema error: attribute \"a\" redeclared (and 1 more errors)"
        );
    }
}
