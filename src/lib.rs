//! `xmlkit`: a streaming, catalog-aware, validating SAX-style XML toolkit.
//!
//! The crate is organized around a single seam, [`events::ContentHandler`]:
//! [`reader::Parser`] drives one document's worth of events into whatever
//! implements it. A [`catalog::Catalog`] resolves public/system identifiers
//! and `schemaLocation`/`xml-model` URIs to local files; a
//! [`grammar::GrammarDispatcher`] loads DTD, XSD, and RelaxNG grammars
//! through that catalog and routes validation queries to whichever one
//! currently applies.

pub mod catalog;
pub mod char_reader;
pub mod error;
pub mod events;
pub mod grammar;
pub mod name;
pub mod reader;

pub use catalog::Catalog;
pub use char_reader::CharReader;
pub use error::{Error, MalformedXmlKind, Result};
pub use events::{Attribute, ContentHandler, EventCollector, RecordedEvent};
pub use grammar::{DtdComposite, ElementContent, Grammar, GrammarDispatcher, RelaxNgComposite, SchemaComposite};
pub use name::{NamespaceContext, QName, ResolvedName};
pub use reader::{Parser, ParserBuilder};
