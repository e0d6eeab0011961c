//! Configuration surface for [`Parser`](super::parser::Parser).
//!
//! Mirrors the teacher's `ParserBuilder`/`ReaderBuilder` chained-setter
//! shape (`examples/999eagle-quick-xml/src/reader/builder.rs`), collapsed
//! onto a single parser type since this crate's Parser always performs
//! namespace scoping (§1.1).

use std::fs::File;
use std::io::Read as IoRead;
use std::path::Path;
use std::rc::Rc;

use crate::catalog::Catalog;
use crate::char_reader::CharReader;
use crate::error::Result;
use crate::grammar::GrammarDispatcher;

use super::parser::Parser;

#[derive(Debug, Clone)]
pub(crate) struct ParserOptions {
    pub(crate) trim_text_start: bool,
    pub(crate) trim_text_end: bool,
    pub(crate) check_end_names: bool,
    pub(crate) check_comments: bool,
    pub(crate) validating: bool,
    pub(crate) silent: bool,
    pub(crate) ignore_grammars: bool,
    pub(crate) include_default_attributes: bool,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            trim_text_start: false,
            trim_text_end: false,
            check_end_names: true,
            check_comments: false,
            validating: false,
            silent: false,
            ignore_grammars: false,
            include_default_attributes: true,
        }
    }
}

/// Builder for configuring a new [`Parser`] (§6 "Flags": `validating`,
/// `silent`, `ignoreGrammars`, `includeDefaultAttributes`).
pub struct ParserBuilder {
    options: ParserOptions,
    catalog: Option<Rc<Catalog>>,
    forced_encoding: Option<String>,
}

impl Default for ParserBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ParserBuilder {
    pub fn new() -> Self {
        Self {
            options: ParserOptions::default(),
            catalog: None,
            forced_encoding: None,
        }
    }

    pub fn trim_text_start(mut self, v: bool) -> Self {
        self.options.trim_text_start = v;
        self
    }

    pub fn trim_text_end(mut self, v: bool) -> Self {
        self.options.trim_text_end = v;
        self
    }

    pub fn check_end_names(mut self, v: bool) -> Self {
        self.options.check_end_names = v;
        self
    }

    pub fn check_comments(mut self, v: bool) -> Self {
        self.options.check_comments = v;
        self
    }

    /// Enables grammar-driven attribute/element validation.
    pub fn validating(mut self, v: bool) -> Self {
        self.options.validating = v;
        self
    }

    /// Suppresses non-fatal warnings (§6 "Exit codes").
    pub fn silent(mut self, v: bool) -> Self {
        self.options.silent = v;
        self
    }

    /// Disables DOCTYPE/namespace-driven grammar loading entirely.
    pub fn ignore_grammars(mut self, v: bool) -> Self {
        self.options.ignore_grammars = v;
        self
    }

    /// Whether unspecified attributes with a grammar-declared default
    /// value should be synthesized onto `startElement` (§4.3 step 6).
    pub fn include_default_attributes(mut self, v: bool) -> Self {
        self.options.include_default_attributes = v;
        self
    }

    /// Shares a pre-built catalog with this parser's `GrammarDispatcher`.
    pub fn catalog(mut self, catalog: Rc<Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn encoding(mut self, label: impl Into<String>) -> Self {
        self.forced_encoding = Some(label.into());
        self
    }

    pub fn build_from_reader<R: IoRead>(self, source: R) -> Result<Parser<R>> {
        let char_reader = CharReader::new(source, self.forced_encoding.as_deref())?;
        let dispatcher = if self.options.ignore_grammars {
            None
        } else {
            Some(GrammarDispatcher::new(self.catalog))
        };
        Ok(Parser::from_parts(char_reader, self.options, dispatcher))
    }

    pub fn build_from_str(self, text: &str) -> Result<Parser<std::io::Cursor<Vec<u8>>>> {
        self.build_from_reader(std::io::Cursor::new(text.as_bytes().to_vec()))
    }

    pub fn build_from_file(self, path: impl AsRef<Path>) -> Result<Parser<File>> {
        let path = path.as_ref();
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let file = File::open(path)?;
        let mut parser = self.build_from_reader(file)?;
        parser.set_document_dir(dir);
        Ok(parser)
    }
}
