//! Error and result types shared across the whole crate.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Specialized `Result` type used throughout `xmlkit`.
pub type Result<T> = std::result::Result<T, Error>;

/// Sub-kinds of well-formedness violation (§7 `MalformedXml` subkinds).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedXmlKind {
    InvalidName,
    InvalidCharacter,
    UnclosedMarkup,
    MismatchedTags { expected: String, found: String },
    DuplicateAttribute(String),
    MalformedAttribute,
    InvalidEntityReference(String),
    RecursiveEntity(String),
    UnescapedAmpersand,
    CommentHasDoubleDash,
    PIBadTarget,
    TextOutsideRoot,
    MultipleRoots,
}

impl fmt::Display for MalformedXmlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName => write!(f, "invalid XML name"),
            Self::InvalidCharacter => write!(f, "invalid XML character"),
            Self::UnclosedMarkup => write!(f, "unclosed markup"),
            Self::MismatchedTags { expected, found } => {
                write!(f, "mismatched tags: expected </{}>, found </{}>", expected, found)
            }
            Self::DuplicateAttribute(name) => write!(f, "duplicate attribute `{}`", name),
            Self::MalformedAttribute => write!(f, "malformed attribute"),
            Self::InvalidEntityReference(r) => write!(f, "invalid entity reference `&{};`", r),
            Self::RecursiveEntity(name) => write!(f, "recursive entity reference `{}`", name),
            Self::UnescapedAmpersand => write!(f, "unescaped `&` in attribute value"),
            Self::CommentHasDoubleDash => write!(f, "comment contains `--`"),
            Self::PIBadTarget => write!(f, "processing instruction target is invalid or `xml`"),
            Self::TextOutsideRoot => write!(f, "non-whitespace text outside the root element"),
            Self::MultipleRoots => write!(f, "more than one root element"),
        }
    }
}

/// The closed set of error kinds produced by this crate (§7).
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Encoding(String),
    InvalidCatalog(String),
    CatalogResolution { what: String, detail: String },
    MalformedXml { kind: MalformedXmlKind, position: usize },
    DtdParse(String),
    SchemaParse(String),
    RelaxNgParse(String),
    Validation { context: String, messages: Vec<String> },
    UnexpectedEof(String),
}

impl Error {
    pub(crate) fn malformed(kind: MalformedXmlKind, position: usize) -> Self {
        Error::MalformedXml { kind, position }
    }

    pub(crate) fn validation(context: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            context: context.into(),
            messages: vec![message.into()],
        }
    }

    pub(crate) fn catalog_resolution(what: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::CatalogResolution {
            what: what.into(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Encoding(msg) => write!(f, "encoding error: {}", msg),
            Error::InvalidCatalog(msg) => write!(f, "invalid catalog: {}", msg),
            Error::CatalogResolution { what, detail } => {
                write!(f, "catalog resolution failed for {}: {}", what, detail)
            }
            Error::MalformedXml { kind, position } => {
                write!(f, "{} at byte offset {}", kind, position)
            }
            Error::DtdParse(msg) => write!(f, "DTD parse error: {}", msg),
            Error::SchemaParse(msg) => write!(f, "schema parse error: {}", msg),
            Error::RelaxNgParse(msg) => write!(f, "RelaxNG parse error: {}", msg),
            Error::Validation { context, messages } => {
                write!(f, "validation error in {}: {}", context, messages.join("; "))
            }
            Error::UnexpectedEof(what) => write!(f, "unexpected end of input while reading {}", what),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

/// Helper for reporting a path that could not be found/read, used by the
/// catalog and grammar loaders where a missing file is not itself fatal.
pub(crate) fn io_context(path: &PathBuf, e: io::Error) -> Error {
    Error::Io(io::Error::new(e.kind(), format!("{}: {}", path.display(), e)))
}
