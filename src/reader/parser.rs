//! The streaming tokenizer/state machine (§4.3).
//!
//! Mirrors the teacher's pull-style `Reader` (`examples/999eagle-quick-xml/src/reader.rs`)
//! but is tied directly to a [`ContentHandler`] push-driven `parse()` entry
//! point rather than returning borrowed `Event`s one at a time, since every
//! collaborator here (DOM builders, the catalog loader, the RelaxNG loader)
//! consumes the full document in one pass anyway.

use std::collections::HashSet;
use std::io::Read as IoRead;
use std::path::PathBuf;
use std::rc::Rc;

use crate::char_reader::CharReader;
use crate::error::{Error, MalformedXmlKind, Result};
use crate::events::{Attribute, ContentHandler};
use crate::grammar::{ElementContent, Grammar, GrammarDispatcher};
use crate::name::{NamespaceContext, QName, ResolvedName};

use super::builder::ParserOptions;
use super::{is_name_char, is_name_start_char, is_valid_char, is_valid_name, is_xml_whitespace, ReadElementState};

/// Minimum number of decoded characters kept available in the buffer before
/// a refill is attempted (§4.3 "Buffer discipline").
const MIN_BUFFER_SIZE: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocState {
    Prolog,
    InRoot,
    Epilog,
}

struct ElementFrame {
    lexical: QName,
    resolved: ResolvedName,
    ns_context: Rc<NamespaceContext>,
    preserve_space: bool,
    children: Vec<ResolvedName>,
    has_non_whitespace_text: bool,
}

/// The streaming parser produced by [`super::ParserBuilder`]. Drives a
/// single [`ContentHandler`] through one full document.
pub struct Parser<R> {
    char_reader: CharReader<R>,
    options: ParserOptions,
    dispatcher: Option<GrammarDispatcher>,
    document_dir: PathBuf,

    buf: Vec<char>,
    pos: usize,
    position: usize,
    xml_11: bool,

    doc_state: DocState,
    root_ns_context: Rc<NamespaceContext>,
    elements: Vec<ElementFrame>,
    text_buf: String,
}

impl<R: IoRead> Parser<R> {
    pub(crate) fn from_parts(char_reader: CharReader<R>, options: ParserOptions, dispatcher: Option<GrammarDispatcher>) -> Self {
        let mut dispatcher = dispatcher;
        if let Some(d) = dispatcher.as_mut() {
            d.set_validating(options.validating);
        }
        Self {
            char_reader,
            options,
            dispatcher,
            document_dir: std::env::current_dir().unwrap_or_default(),
            buf: Vec::new(),
            pos: 0,
            position: 0,
            xml_11: false,
            doc_state: DocState::Prolog,
            root_ns_context: NamespaceContext::root(),
            elements: Vec::new(),
            text_buf: String::new(),
        }
    }

    /// Sets the directory relative `SYSTEM`/`schemaLocation`/`xml-model`
    /// references are resolved against; [`super::ParserBuilder::build_from_file`]
    /// sets this to the file's parent directory.
    pub(crate) fn set_document_dir(&mut self, dir: PathBuf) {
        self.document_dir = dir;
    }

    /// Runs the parser to completion against `handler`, emitting `startDocument`
    /// first and `endDocument` last (§6 ordering invariants).
    pub fn parse(&mut self, handler: &mut dyn ContentHandler) -> Result<()> {
        handler.start_document()?;
        self.run(handler)?;
        handler.end_document()
    }

    fn run(&mut self, handler: &mut dyn ContentHandler) -> Result<()> {
        loop {
            self.ensure_buffer(1)?;
            match self.buf.get(self.pos).copied() {
                None => break,
                Some('<') => {
                    self.flush_text(handler)?;
                    self.read_markup(handler)?;
                }
                Some('&') => {
                    if self.elements.is_empty() {
                        return Err(Error::malformed(MalformedXmlKind::TextOutsideRoot, self.position));
                    }
                    self.read_content_entity(handler)?;
                }
                Some(_) => self.read_char_run()?,
            }
        }
        self.flush_text(handler)?;
        if !self.elements.is_empty() {
            return Err(Error::malformed(MalformedXmlKind::UnclosedMarkup, self.position));
        }
        if self.doc_state != DocState::InRoot && self.doc_state != DocState::Epilog {
            return Err(Error::UnexpectedEof("document (no root element found)".to_string()));
        }
        Ok(())
    }

    // ---- buffer primitives -------------------------------------------------

    fn ensure_buffer(&mut self, need: usize) -> Result<()> {
        let want = need.max(MIN_BUFFER_SIZE);
        while self.buf.len() - self.pos < want && self.char_reader.data_available() {
            if self.pos > 0 {
                self.buf.drain(..self.pos);
                self.pos = 0;
            }
            let chunk = self.char_reader.read()?;
            if !chunk.is_empty() {
                self.buf.extend(chunk.chars());
            } else if !self.char_reader.data_available() {
                break;
            }
        }
        Ok(())
    }

    fn peek_char(&mut self) -> Result<Option<char>> {
        self.ensure_buffer(1)?;
        Ok(self.buf.get(self.pos).copied())
    }

    fn bump(&mut self) -> Result<Option<char>> {
        self.ensure_buffer(1)?;
        if self.pos < self.buf.len() {
            let c = self.buf[self.pos];
            self.pos += 1;
            self.position += 1;
            Ok(Some(c))
        } else {
            Ok(None)
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<()> {
        match self.bump()? {
            Some(c) if c == expected => Ok(()),
            _ => Err(Error::malformed(MalformedXmlKind::MalformedAttribute, self.position)),
        }
    }

    fn check_char(&self, c: char) -> Result<()> {
        if is_valid_char(c, self.xml_11) {
            Ok(())
        } else {
            Err(Error::malformed(MalformedXmlKind::InvalidCharacter, self.position))
        }
    }

    fn starts_with(&mut self, lit: &str) -> Result<bool> {
        let n = lit.chars().count();
        self.ensure_buffer(n)?;
        if self.buf.len() - self.pos < n {
            return Ok(false);
        }
        Ok(self.buf[self.pos..self.pos + n].iter().copied().eq(lit.chars()))
    }

    fn consume_literal(&mut self, lit: &str) -> Result<()> {
        let n = lit.chars().count();
        self.pos += n;
        self.position += n;
        Ok(())
    }

    fn next_is_whitespace_after(&mut self, n: usize) -> Result<bool> {
        self.ensure_buffer(n + 1)?;
        Ok(self.buf.get(self.pos + n).copied().map(is_xml_whitespace).unwrap_or(false))
    }

    fn skip_whitespace(&mut self) -> Result<()> {
        while let Some(c) = self.peek_char()? {
            if is_xml_whitespace(c) {
                self.bump()?;
            } else {
                break;
            }
        }
        Ok(())
    }

    fn read_name(&mut self) -> Result<String> {
        let mut name = String::new();
        match self.peek_char()? {
            Some(c) if is_name_start_char(c) => {
                name.push(c);
                self.bump()?;
            }
            _ => return Err(Error::malformed(MalformedXmlKind::InvalidName, self.position)),
        }
        while let Some(c) = self.peek_char()? {
            if is_name_char(c) {
                name.push(c);
                self.bump()?;
            } else {
                break;
            }
        }
        Ok(name)
    }

    /// Reads and discards characters until the literal `delim` is found,
    /// returning everything before it. Fails at end of input.
    fn read_until(&mut self, delim: &str, what: &str) -> Result<String> {
        let mut out = String::new();
        loop {
            if self.starts_with(delim)? {
                self.consume_literal(delim)?;
                return Ok(out);
            }
            match self.bump()? {
                Some(c) => {
                    self.check_char(c)?;
                    out.push(c);
                }
                None => return Err(Error::UnexpectedEof(what.to_string())),
            }
        }
    }

    fn read_quoted_value(&mut self) -> Result<String> {
        let quote = match self.bump()? {
            Some(c @ ('"' | '\'')) => c,
            _ => return Err(Error::malformed(MalformedXmlKind::MalformedAttribute, self.position)),
        };
        let mut value = String::new();
        loop {
            match self.bump()? {
                Some(c) if c == quote => return Ok(value),
                Some(c) => {
                    self.check_char(c)?;
                    value.push(c);
                }
                None => return Err(Error::UnexpectedEof("quoted literal".to_string())),
            }
        }
    }

    // ---- top-level dispatch -------------------------------------------------

    fn read_markup(&mut self, handler: &mut dyn ContentHandler) -> Result<()> {
        if self.position == 0 && self.starts_with("<?xml")? && self.next_is_whitespace_after(5)? {
            self.read_xml_declaration(handler)
        } else if self.starts_with("<!DOCTYPE")? {
            self.read_doctype(handler)
        } else if self.starts_with("<!--")? {
            self.read_comment(handler)
        } else if self.starts_with("<![CDATA[")? {
            self.read_cdata(handler)
        } else if self.starts_with("<?")? {
            self.read_pi(handler)
        } else if self.starts_with("</")? {
            self.read_end_tag(handler)
        } else {
            self.read_start_tag(handler)
        }
    }

    fn read_xml_declaration(&mut self, handler: &mut dyn ContentHandler) -> Result<()> {
        self.consume_literal("<?xml")?;
        let attrs = self.read_pseudo_attrs("?>")?;
        let version = attrs
            .iter()
            .find(|(k, _)| k == "version")
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| "1.0".to_string());
        self.xml_11 = version.trim() == "1.1";
        let declared_encoding = attrs.iter().find(|(k, _)| k == "encoding").map(|(_, v)| v.clone());
        if let Some(enc) = &declared_encoding {
            self.char_reader.set_encoding(enc)?;
        }
        let standalone = attrs.iter().find(|(k, _)| k == "standalone").map(|(_, v)| v == "yes");
        // Report the effective encoding even when the declaration omits one,
        // so `xmlDeclaration` always reflects what the document was actually
        // decoded as (§8 scenario 1).
        let effective_encoding = declared_encoding.unwrap_or_else(|| self.char_reader.encoding().name().to_string());
        handler.xml_declaration(&version, Some(&effective_encoding), standalone)
    }

    fn read_pseudo_attrs(&mut self, end: &str) -> Result<Vec<(String, String)>> {
        let mut out = Vec::new();
        loop {
            self.skip_whitespace()?;
            if self.starts_with(end)? {
                self.consume_literal(end)?;
                return Ok(out);
            }
            let name = self.read_name()?;
            self.skip_whitespace()?;
            self.expect_char('=')?;
            self.skip_whitespace()?;
            let value = self.read_quoted_value()?;
            out.push((name, value));
        }
    }

    fn read_doctype(&mut self, handler: &mut dyn ContentHandler) -> Result<()> {
        self.consume_literal("<!DOCTYPE")?;
        self.skip_whitespace()?;
        let root_name = self.read_name()?;
        self.skip_whitespace()?;

        let mut public_id = None;
        let mut system_id = None;
        if self.starts_with("PUBLIC")? {
            self.consume_literal("PUBLIC")?;
            self.skip_whitespace()?;
            public_id = Some(self.read_quoted_value()?);
            self.skip_whitespace()?;
            system_id = Some(self.read_quoted_value()?);
            self.skip_whitespace()?;
        } else if self.starts_with("SYSTEM")? {
            self.consume_literal("SYSTEM")?;
            self.skip_whitespace()?;
            system_id = Some(self.read_quoted_value()?);
            self.skip_whitespace()?;
        }

        let mut internal_subset = String::new();
        if self.peek_char()? == Some('[') {
            self.bump()?;
            internal_subset = self.read_bracketed_subset()?;
            self.skip_whitespace()?;
        }
        self.expect_char('>')?;

        handler.start_dtd(&root_name, public_id.as_deref(), system_id.as_deref())?;
        if !internal_subset.is_empty() {
            handler.internal_subset(&internal_subset)?;
        }

        if let Some(dispatcher) = self.dispatcher.as_mut() {
            dispatcher.process_doctype(&root_name, public_id.as_deref(), system_id.as_deref(), &internal_subset, &self.document_dir)?;
        }
        if let Some(dispatcher) = self.dispatcher.as_ref() {
            if let Some(dtd) = dispatcher.dtd() {
                for notation in dtd.notations() {
                    handler.notation_decl(&notation.name, notation.public_id.as_deref(), notation.system_id.as_deref())?;
                }
                for entity in dtd.unparsed_entities() {
                    if let Some(notation_name) = &entity.notation_name {
                        handler.unparsed_entity_decl(
                            &entity.name,
                            entity.public_id.as_deref(),
                            entity.system_id.as_deref().unwrap_or(""),
                            notation_name,
                        )?;
                    }
                }
            }
        }

        handler.end_dtd()
    }

    /// Quote-aware scan for the `]` that ends the internal subset, so a `]`
    /// inside a quoted entity/attribute-default value doesn't end it early.
    fn read_bracketed_subset(&mut self) -> Result<String> {
        let mut text = String::new();
        let mut quote: Option<char> = None;
        loop {
            let c = self.bump()?.ok_or_else(|| Error::UnexpectedEof("internal DTD subset".to_string()))?;
            self.check_char(c)?;
            match quote {
                Some(q) => {
                    text.push(c);
                    if c == q {
                        quote = None;
                    }
                }
                None => match c {
                    ']' => return Ok(text),
                    '\'' | '"' => {
                        quote = Some(c);
                        text.push(c);
                    }
                    _ => text.push(c),
                },
            }
        }
    }

    fn read_comment(&mut self, handler: &mut dyn ContentHandler) -> Result<()> {
        self.consume_literal("<!--")?;
        let text = self.read_until("-->", "comment")?;
        if text.contains("--") || text.ends_with('-') {
            if self.options.validating || self.options.check_comments {
                return Err(Error::malformed(MalformedXmlKind::CommentHasDoubleDash, self.position));
            } else if !self.options.silent {
                tracing::warn!(comment = %text, "comment contains `--`");
            }
        }
        handler.comment(&normalize_line_endings(&text))
    }

    fn read_cdata(&mut self, handler: &mut dyn ContentHandler) -> Result<()> {
        self.consume_literal("<![CDATA[")?;
        let text = self.read_until("]]>", "CDATA section")?;
        let normalized = normalize_line_endings(&text);
        if let Some(frame) = self.elements.last_mut() {
            if normalized.chars().any(|c| !is_xml_whitespace(c)) {
                frame.has_non_whitespace_text = true;
            }
        }
        handler.start_cdata()?;
        handler.characters(&normalized)?;
        handler.end_cdata()
    }

    fn read_pi(&mut self, handler: &mut dyn ContentHandler) -> Result<()> {
        self.consume_literal("<?")?;
        let target = self.read_name()?;
        if target.eq_ignore_ascii_case("xml") {
            return Err(Error::malformed(MalformedXmlKind::PIBadTarget, self.position));
        }
        self.skip_whitespace()?;
        let data = normalize_line_endings(&self.read_until("?>", "processing instruction")?);
        if target == "xml-model" {
            self.handle_xml_model(&data)?;
        }
        handler.processing_instruction(&target, &data)
    }

    fn handle_xml_model(&mut self, data: &str) -> Result<()> {
        let attrs = parse_pseudo_attrs(data);
        if let (Some(href), Some(schema_type_ns)) = (attrs.get("href"), attrs.get("schematypens")) {
            if let Some(dispatcher) = self.dispatcher.as_mut() {
                dispatcher.handle_relaxng_detection(href, schema_type_ns, &self.document_dir)?;
            }
        }
        Ok(())
    }

    // ---- start/end tags -----------------------------------------------------

    fn read_start_tag(&mut self, handler: &mut dyn ContentHandler) -> Result<()> {
        self.expect_char('<')?;
        let lexical_name = self.read_name()?;
        let qname = QName::new(lexical_name);
        let (tail, self_closing) = self.scan_tag_tail()?;
        let raw_pairs = split_attr_pairs(&tail, self.position)?;

        let mut seen = HashSet::new();
        let mut specified_attrs = Vec::new();
        let mut xmlns_decls = Vec::new();
        let mut default_ns_decl = None;
        for (name, raw_value) in raw_pairs {
            if !seen.insert(name.lexical().to_string()) {
                return Err(Error::malformed(MalformedXmlKind::DuplicateAttribute(name.lexical().to_string()), self.position));
            }
            let mut value = self.expand_attribute_value(&raw_value)?;
            normalize_attribute_value(&mut value);
            if name.lexical() == "xmlns" {
                default_ns_decl = Some(value.clone());
            } else if name.prefix() == Some("xmlns") {
                xmlns_decls.push((name.local_name().to_string(), value.clone()));
            }
            specified_attrs.push(Attribute::specified(name, value));
        }

        let parent_ns = self.elements.last().map(|f| f.ns_context.clone()).unwrap_or_else(|| self.root_ns_context.clone());
        let ns_context = NamespaceContext::push(&parent_ns, xmlns_decls, default_ns_decl);

        if let Some(dispatcher) = self.dispatcher.as_mut() {
            dispatcher.process_namespaces(&specified_attrs, &ns_context, &self.document_dir)?;
        }

        if self.options.include_default_attributes {
            if let Some(dispatcher) = self.dispatcher.as_ref() {
                let resolved_elem = ns_context.resolve_element(&qname);
                for default_attr in dispatcher.get_grammar().default_attributes(&resolved_elem) {
                    if !specified_attrs.iter().any(|a| a.name == default_attr.name) {
                        specified_attrs.push(default_attr);
                    }
                }
            }
        }

        let preserve_space = specified_attrs
            .iter()
            .find(|a| a.name.lexical() == "xml:space")
            .map(|a| a.value == "preserve")
            .unwrap_or_else(|| self.elements.last().map(|f| f.preserve_space).unwrap_or(false));

        if self.options.validating {
            if let Some(dispatcher) = self.dispatcher.as_ref() {
                let resolved_elem = ns_context.resolve_element(&qname);
                dispatcher.get_grammar().validate_attributes(&resolved_elem, &specified_attrs)?;
            }
        }

        let resolved = ns_context.resolve_element(&qname);
        if let Some(parent) = self.elements.last_mut() {
            parent.children.push(resolved.clone());
        } else if self.doc_state == DocState::Epilog {
            return Err(Error::malformed(MalformedXmlKind::MultipleRoots, self.position));
        }

        handler.start_element(&qname, &specified_attrs)?;

        if self_closing {
            if self.options.validating {
                if let Some(dispatcher) = self.dispatcher.as_ref() {
                    let content = ElementContent { children: &[], has_non_whitespace_text: false };
                    dispatcher.get_grammar().validate_element(&resolved, &content)?;
                }
            }
            handler.end_element(&qname)?;
            self.doc_state = if self.elements.is_empty() { DocState::Epilog } else { DocState::InRoot };
        } else {
            self.elements.push(ElementFrame {
                lexical: qname,
                resolved,
                ns_context,
                preserve_space,
                children: Vec::new(),
                has_non_whitespace_text: false,
            });
            self.doc_state = DocState::InRoot;
        }
        Ok(())
    }

    /// Quote-aware scan from just after the tag name to the `>` or `/>` that
    /// closes a start tag, tracking a single active quote so a `>` inside an
    /// attribute value doesn't end the tag early (§4.3 "Start tag" step 3).
    fn scan_tag_tail(&mut self) -> Result<(String, bool)> {
        let mut text = String::new();
        let mut state = ReadElementState::Elem;
        loop {
            let c = self.bump()?.ok_or_else(|| Error::UnexpectedEof("start tag".to_string()))?;
            self.check_char(c)?;
            match state {
                ReadElementState::Elem => match c {
                    '\'' => {
                        state = ReadElementState::SingleQ;
                        text.push(c);
                    }
                    '"' => {
                        state = ReadElementState::DoubleQ;
                        text.push(c);
                    }
                    '>' => return Ok((text, false)),
                    '/' if self.peek_char()? == Some('>') => {
                        self.bump()?;
                        return Ok((text, true));
                    }
                    _ => text.push(c),
                },
                ReadElementState::SingleQ => {
                    text.push(c);
                    if c == '\'' {
                        state = ReadElementState::Elem;
                    }
                }
                ReadElementState::DoubleQ => {
                    text.push(c);
                    if c == '"' {
                        state = ReadElementState::Elem;
                    }
                }
            }
        }
    }

    fn read_end_tag(&mut self, handler: &mut dyn ContentHandler) -> Result<()> {
        self.consume_literal("</")?;
        let name = self.read_name()?;
        self.skip_whitespace()?;
        self.expect_char('>')?;

        let frame = self.elements.pop().ok_or_else(|| {
            Error::malformed(
                MalformedXmlKind::MismatchedTags { expected: String::new(), found: name.clone() },
                self.position,
            )
        })?;
        if self.options.check_end_names && frame.lexical.lexical() != name {
            return Err(Error::malformed(
                MalformedXmlKind::MismatchedTags { expected: frame.lexical.lexical().to_string(), found: name },
                self.position,
            ));
        }

        if self.options.validating {
            if let Some(dispatcher) = self.dispatcher.as_ref() {
                let content = ElementContent {
                    children: &frame.children,
                    has_non_whitespace_text: frame.has_non_whitespace_text,
                };
                dispatcher.get_grammar().validate_element(&frame.resolved, &content)?;
            }
        }

        handler.end_element(&frame.lexical)?;
        self.doc_state = if self.elements.is_empty() { DocState::Epilog } else { DocState::InRoot };
        Ok(())
    }

    // ---- character data and entities ----------------------------------------

    fn read_char_run(&mut self) -> Result<()> {
        loop {
            self.ensure_buffer(3)?;
            match self.buf.get(self.pos).copied() {
                None | Some('<') | Some('&') => break,
                Some(_) => {
                    if self.starts_with("]]>")? {
                        // Closest-fitting shared kind; `]]>` is only
                        // well-formed inside a CDATA section.
                        return Err(Error::malformed(MalformedXmlKind::InvalidCharacter, self.position));
                    }
                    let c = self.bump()?.unwrap();
                    self.check_char(c)?;
                    self.text_buf.push(c);
                }
            }
        }
        Ok(())
    }

    fn flush_text(&mut self, handler: &mut dyn ContentHandler) -> Result<()> {
        if self.text_buf.is_empty() {
            return Ok(());
        }
        let mut normalized = normalize_line_endings(&std::mem::take(&mut self.text_buf));
        let has_non_ws = normalized.chars().any(|c| !is_xml_whitespace(c));
        match self.elements.last_mut() {
            Some(frame) => {
                if has_non_ws {
                    frame.has_non_whitespace_text = true;
                }
                if !frame.preserve_space {
                    if self.options.trim_text_start {
                        normalized = normalized.trim_start().to_string();
                    }
                    if self.options.trim_text_end {
                        normalized = normalized.trim_end().to_string();
                    }
                    if normalized.is_empty() {
                        return Ok(());
                    }
                }
                if frame.preserve_space || has_non_ws {
                    handler.characters(&normalized)
                } else {
                    handler.ignorable_whitespace(&normalized)
                }
            }
            None => {
                if has_non_ws {
                    return Err(Error::malformed(MalformedXmlKind::TextOutsideRoot, self.position));
                }
                handler.ignorable_whitespace(&normalized)
            }
        }
    }

    fn read_content_entity(&mut self, handler: &mut dyn ContentHandler) -> Result<()> {
        self.expect_char('&')?;
        let name = self.read_until(";", "entity reference")?;
        if !is_valid_entity_ref(&name) {
            return Err(Error::malformed(MalformedXmlKind::InvalidEntityReference(name), self.position));
        }
        let mut visited = HashSet::new();
        match self.expand_one_entity(&name, &mut visited)? {
            Some(text) => self.text_buf.push_str(&text),
            None => {
                self.flush_text(handler)?;
                handler.skipped_entity(&name)?;
            }
        }
        Ok(())
    }

    fn expand_attribute_value(&self, raw: &str) -> Result<String> {
        self.expand_entity_refs(raw, &mut HashSet::new())
    }

    /// Expands predefined, numeric, and custom entity references in an
    /// already-unescaped string (attribute values, and entity replacement
    /// text nested inside another entity). A custom reference that cannot
    /// be resolved here is always an error, unlike at the top level of
    /// content where it instead produces `skippedEntity` (§4.3 "Entity
    /// references in attributes").
    fn expand_entity_refs(&self, raw: &str, visited: &mut HashSet<String>) -> Result<String> {
        let mut out = String::new();
        let mut rest = raw;
        while let Some(amp_idx) = rest.find('&') {
            out.push_str(&rest[..amp_idx]);
            let after = &rest[amp_idx + 1..];
            let semi_idx = after.find(';').ok_or_else(|| Error::malformed(MalformedXmlKind::UnescapedAmpersand, self.position))?;
            let ent = &after[..semi_idx];
            if !is_valid_entity_ref(ent) {
                return Err(Error::malformed(MalformedXmlKind::UnescapedAmpersand, self.position));
            }
            match self.expand_one_entity(ent, visited)? {
                Some(text) => out.push_str(&text),
                None => return Err(Error::malformed(MalformedXmlKind::InvalidEntityReference(ent.to_string()), self.position)),
            }
            rest = &after[semi_idx + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Resolves one already-validated entity name. Returns `Ok(None)` only
    /// for an unresolvable custom (non-predefined, non-numeric) reference.
    fn expand_one_entity(&self, ent: &str, visited: &mut HashSet<String>) -> Result<Option<String>> {
        let resolved = match ent {
            "lt" => "<".to_string(),
            "gt" => ">".to_string(),
            "amp" => "&".to_string(),
            "apos" => "'".to_string(),
            "quot" => "\"".to_string(),
            _ if ent.starts_with('#') => {
                let cp = self.parse_char_ref(ent)?;
                char::from_u32(cp)
                    .filter(|c| is_valid_char(*c, self.xml_11))
                    .ok_or_else(|| Error::malformed(MalformedXmlKind::InvalidCharacter, self.position))?
                    .to_string()
            }
            _ => match self.resolve_entity_text(ent, visited)? {
                Some(text) => text,
                None => return Ok(None),
            },
        };
        Ok(Some(resolved))
    }

    fn resolve_entity_text(&self, name: &str, visited: &mut HashSet<String>) -> Result<Option<String>> {
        let Some(dispatcher) = self.dispatcher.as_ref() else { return Ok(None) };
        let Some(raw) = dispatcher.get_grammar().resolve_entity(name) else {
            return Ok(None);
        };
        if !visited.insert(name.to_string()) {
            return Err(Error::malformed(MalformedXmlKind::RecursiveEntity(name.to_string()), self.position));
        }
        let expanded = self.expand_entity_refs(&raw, visited)?;
        visited.remove(name);
        Ok(Some(expanded))
    }

    fn parse_char_ref(&self, ent: &str) -> Result<u32> {
        let rest = &ent[1..];
        let (radix, digits) = match rest.strip_prefix('x').or_else(|| rest.strip_prefix('X')) {
            Some(hex) => (16, hex),
            None => (10, rest),
        };
        u32::from_str_radix(digits, radix).map_err(|_| Error::malformed(MalformedXmlKind::InvalidEntityReference(ent.to_string()), self.position))
    }
}

/// Whether `ent` (the text between `&` and `;`, exclusive) is a
/// syntactically valid predefined/custom name or numeric character
/// reference.
fn is_valid_entity_ref(ent: &str) -> bool {
    match ent.strip_prefix('#') {
        Some(hash) => {
            let (is_hex, digits) = match hash.strip_prefix('x').or_else(|| hash.strip_prefix('X')) {
                Some(h) => (true, h),
                None => (false, hash),
            };
            !digits.is_empty() && digits.chars().all(|c| if is_hex { c.is_ascii_hexdigit() } else { c.is_ascii_digit() })
        }
        None => is_valid_name(ent),
    }
}

fn normalize_line_endings(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\r' {
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
            out.push('\n');
        } else {
            out.push(c);
        }
    }
    out
}

/// CDATA-style attribute-value normalization (§4.3 step 6): without a
/// grammar-exposed attribute type, every attribute is normalized as CDATA,
/// which matches the XML spec's own default in the absence of a DTD.
fn normalize_attribute_value(value: &mut String) {
    if value.chars().any(|c| matches!(c, '\r' | '\n' | '\t')) {
        *value = value.chars().map(|c| if matches!(c, '\r' | '\n' | '\t') { ' ' } else { c }).collect();
    }
}

/// Splits a start tag's raw tail text (attributes only, trailing `>`/`/>`
/// already removed) into `(name, unescaped-but-not-entity-expanded value)`
/// pairs (§4.3 "Start tag" step 3-4).
fn split_attr_pairs(text: &str, position: usize) -> Result<Vec<(QName, String)>> {
    let mut pairs = Vec::new();
    let mut iter = text.char_indices().peekable();
    loop {
        while matches!(iter.peek(), Some((_, c)) if is_xml_whitespace(*c)) {
            iter.next();
        }
        let Some(&(name_start, first)) = iter.peek() else { break };
        if !is_name_start_char(first) {
            return Err(Error::malformed(MalformedXmlKind::InvalidName, position));
        }
        let mut name_end = name_start;
        while let Some(&(idx, c)) = iter.peek() {
            if is_name_char(c) {
                name_end = idx + c.len_utf8();
                iter.next();
            } else {
                break;
            }
        }
        let name = text[name_start..name_end].to_string();

        while matches!(iter.peek(), Some((_, c)) if is_xml_whitespace(*c)) {
            iter.next();
        }
        match iter.next() {
            Some((_, '=')) => {}
            _ => return Err(Error::malformed(MalformedXmlKind::MalformedAttribute, position)),
        }
        while matches!(iter.peek(), Some((_, c)) if is_xml_whitespace(*c)) {
            iter.next();
        }
        let quote = match iter.next() {
            Some((_, c @ ('"' | '\''))) => c,
            _ => return Err(Error::malformed(MalformedXmlKind::MalformedAttribute, position)),
        };
        let value_start = match iter.peek() {
            Some(&(idx, _)) => idx,
            None => text.len(),
        };
        let mut value_end = None;
        while let Some(&(idx, c)) = iter.peek() {
            if c == quote {
                value_end = Some(idx);
                iter.next();
                break;
            }
            iter.next();
        }
        let value_end = value_end.ok_or_else(|| Error::malformed(MalformedXmlKind::MalformedAttribute, position))?;
        pairs.push((QName::new(name), text[value_start..value_end].to_string()));
    }
    Ok(pairs)
}

/// Ad-hoc `name="value"` scan over an already-extracted processing
/// instruction data string, used for `<?xml-model ...?>` pseudo-attributes.
fn parse_pseudo_attrs(data: &str) -> std::collections::HashMap<String, String> {
    let mut out = std::collections::HashMap::new();
    let mut rest = data;
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        let Some(eq) = rest.find('=') else { break };
        let name = rest[..eq].trim().to_string();
        rest = rest[eq + 1..].trim_start();
        let Some(quote) = rest.chars().next() else { break };
        if quote != '"' && quote != '\'' {
            break;
        }
        let after_quote = &rest[quote.len_utf8()..];
        let Some(end) = after_quote.find(quote) else { break };
        out.insert(name, after_quote[..end].to_string());
        rest = &after_quote[end + quote.len_utf8()..];
    }
    out
}
