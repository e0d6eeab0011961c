//! Event and attribute data types, and the [`ContentHandler`] contract (§6).
//!
//! This is the sole boundary the parser talks across. DOM builders, JSON
//! event writers, and XML event writers are out-of-core collaborators that
//! only need to implement [`ContentHandler`]; none of them live in this
//! crate.

use crate::error::Result;
use crate::name::QName;

/// One attribute as seen (or defaulted) on a start tag (§3 "Attribute").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
    /// `false` when this attribute was not present in the source and was
    /// added by a grammar's default/fixed value (§4.3 step 6).
    pub specified: bool,
}

impl Attribute {
    pub fn specified(name: QName, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
            specified: true,
        }
    }

    pub fn defaulted(name: QName, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
            specified: false,
        }
    }
}

/// Receives notification of the logical content of a document.
///
/// Modeled after the SAX2 `ContentHandler`/`DtdHandler` contract (see
/// `examples/compenguy-sax2_traits`): one trait, default no-op bodies, so
/// a consumer only overrides the events it cares about. The ordering
/// invariants in §6 (exactly one `xmlDeclaration`, first if present; DTD
/// events before the root `startElement`; matched start/end pairs) are
/// enforced by the parser, not by this trait.
#[allow(unused_variables)]
pub trait ContentHandler {
    fn start_document(&mut self) -> Result<()> {
        Ok(())
    }

    fn end_document(&mut self) -> Result<()> {
        Ok(())
    }

    fn xml_declaration(
        &mut self,
        version: &str,
        encoding: Option<&str>,
        standalone: Option<bool>,
    ) -> Result<()> {
        Ok(())
    }

    fn start_dtd(&mut self, name: &str, public_id: Option<&str>, system_id: Option<&str>) -> Result<()> {
        Ok(())
    }

    fn internal_subset(&mut self, text: &str) -> Result<()> {
        Ok(())
    }

    fn end_dtd(&mut self) -> Result<()> {
        Ok(())
    }

    /// Notification of a notation declaration (folded into the DTD event
    /// path rather than split into a separate `DtdHandler`, per
    /// SPEC_FULL.md's Supplemented features note).
    fn notation_decl(&mut self, name: &str, public_id: Option<&str>, system_id: Option<&str>) -> Result<()> {
        Ok(())
    }

    /// Notification of an unparsed (`NDATA`) entity declaration.
    fn unparsed_entity_decl(
        &mut self,
        name: &str,
        public_id: Option<&str>,
        system_id: &str,
        notation_name: &str,
    ) -> Result<()> {
        Ok(())
    }

    fn start_element(&mut self, name: &QName, attributes: &[Attribute]) -> Result<()> {
        Ok(())
    }

    fn end_element(&mut self, name: &QName) -> Result<()> {
        Ok(())
    }

    fn characters(&mut self, text: &str) -> Result<()> {
        Ok(())
    }

    fn ignorable_whitespace(&mut self, text: &str) -> Result<()> {
        Ok(())
    }

    fn comment(&mut self, text: &str) -> Result<()> {
        Ok(())
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<()> {
        Ok(())
    }

    fn start_cdata(&mut self) -> Result<()> {
        Ok(())
    }

    fn end_cdata(&mut self) -> Result<()> {
        Ok(())
    }

    fn skipped_entity(&mut self, name: &str) -> Result<()> {
        Ok(())
    }
}

/// An event collector usable as a lightweight [`ContentHandler`] for tests
/// and as the seam DOM builders/writers attach to. Kept minimal: this is
/// the "thin event collector" §1 names as an out-of-core collaborator, but
/// a trivial implementation is useful for exercising the parser end to end.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedEvent {
    StartDocument,
    EndDocument,
    XmlDeclaration {
        version: String,
        encoding: Option<String>,
        standalone: Option<bool>,
    },
    StartDtd {
        name: String,
        public_id: Option<String>,
        system_id: Option<String>,
    },
    InternalSubset(String),
    EndDtd,
    NotationDecl {
        name: String,
        public_id: Option<String>,
        system_id: Option<String>,
    },
    UnparsedEntityDecl {
        name: String,
        public_id: Option<String>,
        system_id: String,
        notation_name: String,
    },
    StartElement {
        name: QName,
        attributes: Vec<Attribute>,
    },
    EndElement {
        name: QName,
    },
    Characters(String),
    IgnorableWhitespace(String),
    Comment(String),
    ProcessingInstruction {
        target: String,
        data: String,
    },
    StartCData,
    EndCData,
    SkippedEntity(String),
}

#[derive(Debug, Default)]
pub struct EventCollector {
    pub events: Vec<RecordedEvent>,
}

impl ContentHandler for EventCollector {
    fn start_document(&mut self) -> Result<()> {
        self.events.push(RecordedEvent::StartDocument);
        Ok(())
    }

    fn end_document(&mut self) -> Result<()> {
        self.events.push(RecordedEvent::EndDocument);
        Ok(())
    }

    fn xml_declaration(
        &mut self,
        version: &str,
        encoding: Option<&str>,
        standalone: Option<bool>,
    ) -> Result<()> {
        self.events.push(RecordedEvent::XmlDeclaration {
            version: version.to_string(),
            encoding: encoding.map(str::to_string),
            standalone,
        });
        Ok(())
    }

    fn start_dtd(&mut self, name: &str, public_id: Option<&str>, system_id: Option<&str>) -> Result<()> {
        self.events.push(RecordedEvent::StartDtd {
            name: name.to_string(),
            public_id: public_id.map(str::to_string),
            system_id: system_id.map(str::to_string),
        });
        Ok(())
    }

    fn internal_subset(&mut self, text: &str) -> Result<()> {
        self.events.push(RecordedEvent::InternalSubset(text.to_string()));
        Ok(())
    }

    fn end_dtd(&mut self) -> Result<()> {
        self.events.push(RecordedEvent::EndDtd);
        Ok(())
    }

    fn notation_decl(&mut self, name: &str, public_id: Option<&str>, system_id: Option<&str>) -> Result<()> {
        self.events.push(RecordedEvent::NotationDecl {
            name: name.to_string(),
            public_id: public_id.map(str::to_string),
            system_id: system_id.map(str::to_string),
        });
        Ok(())
    }

    fn unparsed_entity_decl(&mut self, name: &str, public_id: Option<&str>, system_id: &str, notation_name: &str) -> Result<()> {
        self.events.push(RecordedEvent::UnparsedEntityDecl {
            name: name.to_string(),
            public_id: public_id.map(str::to_string),
            system_id: system_id.to_string(),
            notation_name: notation_name.to_string(),
        });
        Ok(())
    }

    fn start_element(&mut self, name: &QName, attributes: &[Attribute]) -> Result<()> {
        self.events.push(RecordedEvent::StartElement {
            name: name.clone(),
            attributes: attributes.to_vec(),
        });
        Ok(())
    }

    fn end_element(&mut self, name: &QName) -> Result<()> {
        self.events.push(RecordedEvent::EndElement { name: name.clone() });
        Ok(())
    }

    fn characters(&mut self, text: &str) -> Result<()> {
        self.events.push(RecordedEvent::Characters(text.to_string()));
        Ok(())
    }

    fn ignorable_whitespace(&mut self, text: &str) -> Result<()> {
        self.events.push(RecordedEvent::IgnorableWhitespace(text.to_string()));
        Ok(())
    }

    fn comment(&mut self, text: &str) -> Result<()> {
        self.events.push(RecordedEvent::Comment(text.to_string()));
        Ok(())
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<()> {
        self.events.push(RecordedEvent::ProcessingInstruction {
            target: target.to_string(),
            data: data.to_string(),
        });
        Ok(())
    }

    fn start_cdata(&mut self) -> Result<()> {
        self.events.push(RecordedEvent::StartCData);
        Ok(())
    }

    fn end_cdata(&mut self) -> Result<()> {
        self.events.push(RecordedEvent::EndCData);
        Ok(())
    }

    fn skipped_entity(&mut self, name: &str) -> Result<()> {
        self.events.push(RecordedEvent::SkippedEntity(name.to_string()));
        Ok(())
    }
}
