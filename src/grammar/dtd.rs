//! DTD parsing and the [`DtdComposite`] merge/query operations (§4.5).
//!
//! Grammar comments below follow the XML 1.0 production names, the same
//! convention used by
//! `examples/other_examples/c810503b_R1tschY-xrs__components-parser-src-reader-dtd.rs.rs`.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::events::Attribute;
use crate::name::ResolvedName;

use super::{ElementContent, Grammar};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    None,
    Optional,
    ZeroMany,
    OneMany,
}

/// `cp ::= (Name | choice | seq) ('?' | '*' | '+')?`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentParticle {
    Name(String, Cardinality),
    Choice(Vec<ContentParticle>, Cardinality),
    Sequence(Vec<ContentParticle>, Cardinality),
}

/// `contentspec ::= 'EMPTY' | 'ANY' | Mixed | children`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSpec {
    Empty,
    Any,
    Mixed(Vec<String>),
    Children(ContentParticle),
}

#[derive(Debug, Clone)]
pub struct ElementDecl {
    pub name: String,
    pub content: ContentSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrType {
    CData,
    Id,
    IdRef,
    IdRefs,
    Entity,
    Entities,
    NmToken,
    NmTokens,
    Notation(Vec<String>),
    Enumeration(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrUse {
    Required,
    Implied,
    Fixed,
    None,
}

#[derive(Debug, Clone)]
pub struct AttributeDecl {
    pub name: String,
    pub ty: AttrType,
    pub use_: AttrUse,
    pub default_value: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EntityDecl {
    pub name: String,
    pub is_parameter: bool,
    pub replacement_text: String,
    pub public_id: Option<String>,
    pub system_id: Option<String>,
    pub notation_name: Option<String>,
    pub external_loaded: bool,
}

#[derive(Debug, Clone)]
pub struct NotationDecl {
    pub name: String,
    pub public_id: Option<String>,
    pub system_id: Option<String>,
}

/// `(entities, elementDecls, attributeLists, notations)` (§3 data model).
#[derive(Debug, Clone, Default)]
pub struct DtdGrammar {
    pub entities: HashMap<String, EntityDecl>,
    pub element_decls: HashMap<String, ElementDecl>,
    pub attribute_lists: HashMap<String, Vec<AttributeDecl>>,
    pub notations: HashMap<String, NotationDecl>,
}

struct SubsetScanner {
    text: String,
    pos: usize,
    params: HashMap<String, String>,
}

impl SubsetScanner {
    fn new(text: &str, seed_params: Option<&HashMap<String, String>>) -> Self {
        Self {
            text: text.to_string(),
            pos: 0,
            params: seed_params.cloned().unwrap_or_default(),
        }
    }

    fn rest(&self) -> &str {
        &self.text[self.pos..]
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.rest().chars().next() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    /// Finds the index of the declaration-closing `>`, honoring quoted
    /// literals so a `>` inside a default value doesn't end the decl early.
    fn find_decl_end(&self) -> Option<usize> {
        let bytes = self.rest().as_bytes();
        let mut quote: Option<u8> = None;
        for (i, &b) in bytes.iter().enumerate() {
            match quote {
                Some(q) if b == q => quote = None,
                Some(_) => {}
                None => match b {
                    b'\'' | b'"' => quote = Some(b),
                    b'>' => return Some(i),
                    _ => {}
                },
            }
        }
        None
    }

    /// Expands a single top-level parameter-entity reference `%name;`
    /// occurring between declarations (§4.5's parameter-entity seeding).
    fn expand_top_level_params(&mut self) {
        while self.rest().starts_with('%') {
            let start = self.pos;
            let rest = &self.rest()[1..];
            let Some(semi) = rest.find(';') else { break };
            let name = rest[..semi].to_string();
            let ref_end = start + 1 + semi + 1;
            if let Some(value) = self.params.get(&name).cloned() {
                self.text.replace_range(start..ref_end, &value);
            } else {
                self.pos = ref_end;
            }
            self.skip_ws();
        }
    }

    fn parse(mut self) -> Result<DtdGrammar> {
        let mut grammar = DtdGrammar::default();
        loop {
            self.skip_ws();
            self.expand_top_level_params();
            self.skip_ws();
            if self.rest().is_empty() {
                break;
            }
            if self.rest().starts_with("<!--") {
                let end = self.rest().find("-->").ok_or_else(|| Error::DtdParse("unterminated comment".into()))?;
                self.pos += end + 3;
                continue;
            }
            if !self.rest().starts_with("<!") {
                return Err(Error::DtdParse(format!("unexpected content in internal subset: {:?}", &self.rest()[..self.rest().len().min(20)])));
            }
            let end = self
                .find_decl_end()
                .ok_or_else(|| Error::DtdParse("unterminated markup declaration".into()))?;
            let decl = &self.rest()[..end];
            self.pos += end + 1;
            self.dispatch_decl(decl, &mut grammar)?;
        }
        Ok(grammar)
    }

    fn dispatch_decl(&mut self, decl: &str, grammar: &mut DtdGrammar) -> Result<()> {
        let body = decl[2..].trim_start();
        if let Some(rest) = body.strip_prefix("ENTITY") {
            self.parse_entity(rest.trim_start(), grammar)?;
        } else if let Some(rest) = body.strip_prefix("ELEMENT") {
            self.parse_element(rest.trim_start(), grammar)?;
        } else if let Some(rest) = body.strip_prefix("ATTLIST") {
            self.parse_attlist(rest.trim_start(), grammar)?;
        } else if let Some(rest) = body.strip_prefix("NOTATION") {
            self.parse_notation(rest.trim_start(), grammar)?;
        }
        // Unknown markup declarations are ignored (lax, out-of-core detail).
        Ok(())
    }

    fn parse_entity(&mut self, rest: &str, grammar: &mut DtdGrammar) -> Result<()> {
        let (is_parameter, rest) = match rest.strip_prefix('%') {
            Some(r) => (true, r.trim_start()),
            None => (false, rest),
        };
        let (name, rest) = take_name(rest)?;
        let rest = rest.trim_start();

        let (public_id, system_id, rest) = parse_external_id(rest)?;
        let rest = rest.trim_start();

        let (notation_name, replacement_text) = if let Some(r) = rest.strip_prefix("NDATA") {
            let (ndata, _) = take_name(r.trim_start())?;
            (Some(ndata), String::new())
        } else if let Some(literal) = take_quoted(rest) {
            (None, literal.to_string())
        } else {
            (None, String::new())
        };

        if is_parameter && !replacement_text.is_empty() {
            self.params.entry(name.to_string()).or_insert_with(|| replacement_text.clone());
        }

        grammar.entities.entry(name.to_string()).or_insert(EntityDecl {
            name: name.to_string(),
            is_parameter,
            replacement_text,
            public_id,
            system_id,
            notation_name,
            external_loaded: false,
        });
        Ok(())
    }

    fn parse_element(&mut self, rest: &str, grammar: &mut DtdGrammar) -> Result<()> {
        let (name, rest) = take_name(rest)?;
        let rest = rest.trim_start();
        let content = parse_contentspec(rest)?;
        grammar
            .element_decls
            .entry(name.to_string())
            .or_insert(ElementDecl { name: name.to_string(), content });
        Ok(())
    }

    fn parse_attlist(&mut self, rest: &str, grammar: &mut DtdGrammar) -> Result<()> {
        let (element_name, mut rest) = take_name(rest)?;
        let mut decls = Vec::new();
        loop {
            rest = rest.trim_start();
            if rest.is_empty() {
                break;
            }
            let (attr_name, r) = match take_name(rest) {
                Ok(v) => v,
                Err(_) => break,
            };
            rest = r.trim_start();
            let (ty, r) = parse_attr_type(rest)?;
            rest = r.trim_start();
            let (use_, default_value, r) = parse_attr_default(rest)?;
            rest = r;
            decls.push(AttributeDecl {
                name: attr_name.to_string(),
                ty,
                use_,
                default_value,
            });
        }
        grammar
            .attribute_lists
            .entry(element_name.to_string())
            .or_insert(Vec::new())
            .extend(decls);
        Ok(())
    }

    fn parse_notation(&mut self, rest: &str, grammar: &mut DtdGrammar) -> Result<()> {
        let (name, rest) = take_name(rest)?;
        let rest = rest.trim_start();
        let (public_id, system_id, _rest) = parse_external_id(rest)?;
        grammar.notations.entry(name.to_string()).or_insert(NotationDecl {
            name: name.to_string(),
            public_id,
            system_id,
        });
        Ok(())
    }
}

fn take_name(s: &str) -> Result<(&str, &str)> {
    let s = s.trim_start();
    let end = s
        .find(|c: char| c.is_whitespace() || c == '>' || c == '(' || c == ')' || c == ',' || c == '|')
        .unwrap_or(s.len());
    if end == 0 {
        return Err(Error::DtdParse("expected a name".to_string()));
    }
    Ok((&s[..end], &s[end..]))
}

fn take_quoted(s: &str) -> Option<&str> {
    let s = s.trim_start();
    let quote = s.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let rest = &s[quote.len_utf8()..];
    let end = rest.find(quote)?;
    Some(&rest[..end])
}

fn parse_external_id(s: &str) -> Result<(Option<String>, Option<String>, &str)> {
    if let Some(rest) = s.strip_prefix("PUBLIC") {
        let rest = rest.trim_start();
        let public_id = take_quoted(rest).ok_or_else(|| Error::DtdParse("expected PUBLIC literal".into()))?;
        let after_pub = &rest[rest.find(public_id).unwrap() + public_id.len() + 1..];
        let after_pub = after_pub.trim_start();
        let system_id = take_quoted(after_pub);
        let consumed = system_id.map(|lit| after_pub.find(lit).unwrap() + lit.len() + 1).unwrap_or(0);
        return Ok((Some(public_id.to_string()), system_id.map(str::to_string), &after_pub[consumed..]));
    }
    if let Some(rest) = s.strip_prefix("SYSTEM") {
        let rest = rest.trim_start();
        let system_id = take_quoted(rest).ok_or_else(|| Error::DtdParse("expected SYSTEM literal".into()))?;
        let consumed = rest.find(system_id).unwrap() + system_id.len() + 1;
        return Ok((None, Some(system_id.to_string()), &rest[consumed..]));
    }
    Ok((None, None, s))
}

/// `contentspec ::= 'EMPTY' | 'ANY' | Mixed | children`
fn parse_contentspec(s: &str) -> Result<ContentSpec> {
    let s = s.trim();
    let s = s.strip_suffix('>').unwrap_or(s).trim();
    if s == "EMPTY" {
        return Ok(ContentSpec::Empty);
    }
    if s == "ANY" {
        return Ok(ContentSpec::Any);
    }
    if s.contains("#PCDATA") {
        let inner = s.trim_start_matches('(').trim_end_matches(['*']).trim_end_matches(')');
        let names: Vec<String> = inner
            .split('|')
            .map(str::trim)
            .filter(|n| !n.is_empty() && *n != "#PCDATA")
            .map(str::to_string)
            .collect();
        return Ok(ContentSpec::Mixed(names));
    }
    let (particle, _) = parse_cp(s)?;
    Ok(ContentSpec::Children(particle))
}

fn parse_cardinality(s: &str) -> (Cardinality, &str) {
    match s.chars().next() {
        Some('?') => (Cardinality::Optional, &s[1..]),
        Some('*') => (Cardinality::ZeroMany, &s[1..]),
        Some('+') => (Cardinality::OneMany, &s[1..]),
        _ => (Cardinality::None, s),
    }
}

/// `cp ::= (Name | choice | seq) ('?' | '*' | '+')?`
fn parse_cp(s: &str) -> Result<(ContentParticle, &str)> {
    let s = s.trim_start();
    if let Some(rest) = s.strip_prefix('(') {
        let close = matching_paren(s).ok_or_else(|| Error::DtdParse("unbalanced parens in content model".into()))?;
        let inner = &rest[..close - 1];
        let after = &s[close..];
        let (cardinality, after) = parse_cardinality(after);
        let mut parts = Vec::new();
        for piece in split_top_level(inner) {
            let (p, _) = parse_cp(piece)?;
            parts.push(p);
        }
        let node = if inner_uses_pipe(inner) {
            ContentParticle::Choice(parts, cardinality)
        } else {
            ContentParticle::Sequence(parts, cardinality)
        };
        return Ok((node, after));
    }
    let (name, after) = take_name(s)?;
    let (cardinality, after) = parse_cardinality(after);
    Ok((ContentParticle::Name(name.to_string(), cardinality), after))
}

fn matching_paren(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn inner_uses_pipe(inner: &str) -> bool {
    let mut depth = 0i32;
    for c in inner.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            '|' if depth == 0 => return true,
            ',' if depth == 0 => return false,
            _ => {}
        }
    }
    false
}

fn split_top_level(inner: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, c) in inner.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            '|' | ',' if depth == 0 => {
                parts.push(inner[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(inner[start..].trim());
    parts.into_iter().filter(|s| !s.is_empty()).collect()
}

fn parse_attr_type(s: &str) -> Result<(AttrType, &str)> {
    let s = s.trim_start();
    if let Some(rest) = s.strip_prefix('(') {
        let close = matching_paren(s).ok_or_else(|| Error::DtdParse("unbalanced enumeration".into()))?;
        let inner = &rest[..close - 2];
        let values: Vec<String> = inner.split('|').map(|v| v.trim().to_string()).collect();
        return Ok((AttrType::Enumeration(values), &s[close..]));
    }
    for (kw, ty) in [
        ("CDATA", AttrType::CData),
        ("IDREFS", AttrType::IdRefs),
        ("IDREF", AttrType::IdRef),
        ("ID", AttrType::Id),
        ("ENTITIES", AttrType::Entities),
        ("ENTITY", AttrType::Entity),
        ("NMTOKENS", AttrType::NmTokens),
        ("NMTOKEN", AttrType::NmToken),
    ] {
        if let Some(rest) = s.strip_prefix(kw) {
            return Ok((ty, rest));
        }
    }
    if let Some(rest) = s.strip_prefix("NOTATION") {
        let rest = rest.trim_start();
        let close = matching_paren(rest).ok_or_else(|| Error::DtdParse("unbalanced NOTATION enumeration".into()))?;
        let inner = &rest[1..close - 1];
        let values: Vec<String> = inner.split('|').map(|v| v.trim().to_string()).collect();
        return Ok((AttrType::Notation(values), &rest[close..]));
    }
    Err(Error::DtdParse(format!("unrecognized attribute type near {:?}", &s[..s.len().min(20)])))
}

fn parse_attr_default(s: &str) -> Result<(AttrUse, Option<String>, &str)> {
    let s = s.trim_start();
    if let Some(rest) = s.strip_prefix("#REQUIRED") {
        return Ok((AttrUse::Required, None, rest));
    }
    if let Some(rest) = s.strip_prefix("#IMPLIED") {
        return Ok((AttrUse::Implied, None, rest));
    }
    if let Some(rest) = s.strip_prefix("#FIXED") {
        let rest = rest.trim_start();
        let literal = take_quoted(rest).ok_or_else(|| Error::DtdParse("expected #FIXED literal".into()))?;
        let consumed = rest.find(literal).unwrap() + literal.len() + 1;
        return Ok((AttrUse::Fixed, Some(literal.to_string()), &rest[consumed..]));
    }
    if let Some(literal) = take_quoted(s) {
        let consumed = s.find(literal).unwrap() + literal.len() + 1;
        return Ok((AttrUse::None, Some(literal.to_string()), &s[consumed..]));
    }
    Err(Error::DtdParse("expected attribute default clause".into()))
}

impl DtdGrammar {
    pub fn parse_subset(text: &str, seed_params: Option<&HashMap<String, String>>) -> Result<Self> {
        SubsetScanner::new(text, seed_params).parse()
    }
}

fn matches_particle(particle: &ContentParticle, children: &[String], idx: &mut usize) -> bool {
    match particle {
        ContentParticle::Name(name, cardinality) => consume_repeated(*cardinality, children, idx, |children, idx| {
            if children.get(*idx).map(String::as_str) == Some(name.as_str()) {
                *idx += 1;
                true
            } else {
                false
            }
        }),
        ContentParticle::Sequence(parts, cardinality) => {
            consume_repeated(*cardinality, children, idx, |children, idx| {
                let mut local = *idx;
                for p in parts {
                    if !matches_particle(p, children, &mut local) {
                        return false;
                    }
                }
                *idx = local;
                true
            })
        }
        ContentParticle::Choice(parts, cardinality) => consume_repeated(*cardinality, children, idx, |children, idx| {
            for p in parts {
                let mut local = *idx;
                if matches_particle(p, children, &mut local) {
                    *idx = local;
                    return true;
                }
            }
            false
        }),
    }
}

/// Repeats `one` according to `cardinality`. `one` must test whether a
/// single occurrence of the underlying particle matches starting at
/// `*idx`, advancing `*idx` past it on success and leaving `*idx`
/// untouched on failure.
fn consume_repeated(cardinality: Cardinality, children: &[String], idx: &mut usize, mut one: impl FnMut(&[String], &mut usize) -> bool) -> bool {
    match cardinality {
        Cardinality::None => one(children, idx),
        Cardinality::Optional => {
            let save = *idx;
            if !one(children, idx) {
                *idx = save;
            }
            true
        }
        Cardinality::ZeroMany => {
            loop {
                let save = *idx;
                if !one(children, idx) {
                    *idx = save;
                    break;
                }
                if *idx == save {
                    break;
                }
            }
            true
        }
        Cardinality::OneMany => {
            let save0 = *idx;
            if !one(children, idx) {
                return false;
            }
            if *idx != save0 {
                loop {
                    let save = *idx;
                    if !one(children, idx) {
                        *idx = save;
                        break;
                    }
                    if *idx == save {
                        break;
                    }
                }
            }
            true
        }
    }
}

/// Singleton per document: merges one internal and any number of external
/// DTD grammars with internal-overrides-external, first-wins-across-externals
/// semantics (§4.5).
#[derive(Debug, Default)]
pub struct DtdComposite {
    internal: Option<DtdGrammar>,
    externals: Vec<DtdGrammar>,
}

impl DtdComposite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_internal(&mut self, grammar: DtdGrammar) {
        self.internal = Some(grammar);
    }

    pub fn add_external(&mut self, grammar: DtdGrammar) {
        self.externals.push(grammar);
    }

    pub fn parameter_entities_from_internal(&self) -> HashMap<String, String> {
        self.internal
            .iter()
            .flat_map(|g| g.entities.values())
            .filter(|e| e.is_parameter)
            .map(|e| (e.name.clone(), e.replacement_text.clone()))
            .collect()
    }

    fn grammars(&self) -> impl Iterator<Item = &DtdGrammar> {
        self.internal.iter().chain(self.externals.iter())
    }

    pub fn get_element_attributes(&self, name: &str) -> Vec<&AttributeDecl> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for g in self.grammars() {
            if let Some(list) = g.attribute_lists.get(name) {
                for decl in list {
                    if seen.insert(decl.name.clone()) {
                        out.push(decl);
                    }
                }
            }
        }
        out
    }

    pub fn get_default_attributes(&self, name: &str) -> HashMap<String, String> {
        let mut out = HashMap::new();
        for decl in self.get_element_attributes(name) {
            if let Some(value) = &decl.default_value {
                out.entry(decl.name.clone()).or_insert_with(|| value.clone());
            }
        }
        out
    }

    fn element_decl(&self, name: &str) -> Option<&ElementDecl> {
        self.grammars().find_map(|g| g.element_decls.get(name))
    }

    /// All notation declarations across the internal and external subsets,
    /// for the parser's `notationDecl` event notifications.
    pub fn notations(&self) -> impl Iterator<Item = &NotationDecl> {
        self.grammars().flat_map(|g| g.notations.values())
    }

    /// Unparsed (`NDATA`) entity declarations, for `unparsedEntityDecl`.
    pub fn unparsed_entities(&self) -> impl Iterator<Item = &EntityDecl> {
        self.grammars().flat_map(|g| g.entities.values()).filter(|e| e.notation_name.is_some())
    }
}

impl Grammar for DtdComposite {
    fn validate_attributes(&self, element: &ResolvedName, attributes: &[Attribute]) -> Result<()> {
        let declared = self.get_element_attributes(&element.local);
        for attr in attributes {
            let lexical = attr.name.lexical();
            if lexical.starts_with("xml:") || lexical.starts_with("xmlns") {
                continue;
            }
            let decl = declared.iter().find(|d| d.name == lexical);
            let Some(decl) = decl else {
                return Err(Error::validation(&element.local, format!("attribute `{}` is not declared", lexical)));
            };
            match &decl.ty {
                AttrType::Enumeration(values) | AttrType::Notation(values) => {
                    if !values.iter().any(|v| v == &attr.value) {
                        return Err(Error::validation(&element.local, format!("value `{}` not in enumeration for `{}`", attr.value, lexical)));
                    }
                }
                AttrType::NmToken => {
                    if !attr.value.chars().all(crate::reader::is_name_char) {
                        return Err(Error::validation(&element.local, format!("`{}` is not a valid NMTOKEN", attr.value)));
                    }
                }
                AttrType::NmTokens => {
                    if attr.value.split_whitespace().any(|tok| !tok.chars().all(crate::reader::is_name_char)) {
                        return Err(Error::validation(&element.local, format!("`{}` is not valid NMTOKENS", attr.value)));
                    }
                }
                _ => {}
            }
        }
        for decl in declared {
            if decl.use_ == AttrUse::Required && !attributes.iter().any(|a| a.name.lexical() == decl.name) {
                return Err(Error::validation(&element.local, format!("required attribute `{}` is missing", decl.name)));
            }
        }
        Ok(())
    }

    fn validate_element(&self, element: &ResolvedName, content: &ElementContent<'_>) -> Result<()> {
        let Some(decl) = self.element_decl(&element.local) else {
            return Ok(());
        };
        match &decl.content {
            ContentSpec::Any => Ok(()),
            ContentSpec::Empty => {
                if content.children.is_empty() && !content.has_non_whitespace_text {
                    Ok(())
                } else {
                    Err(Error::validation(&element.local, "EMPTY element has content"))
                }
            }
            ContentSpec::Mixed(names) => {
                for child in content.children {
                    if !names.iter().any(|n| n == &child.local) {
                        return Err(Error::validation(&element.local, format!("`{}` not allowed in mixed content", child.local)));
                    }
                }
                Ok(())
            }
            ContentSpec::Children(particle) => {
                if content.has_non_whitespace_text {
                    return Err(Error::validation(&element.local, "non-whitespace text not allowed in element content"));
                }
                let names: Vec<String> = content.children.iter().map(|c| c.local.clone()).collect();
                let mut idx = 0;
                if matches_particle(particle, &names, &mut idx) && idx == names.len() {
                    Ok(())
                } else {
                    Err(Error::validation(&element.local, "children do not conform to the declared content model"))
                }
            }
        }
    }

    fn default_attributes(&self, element: &ResolvedName) -> Vec<Attribute> {
        self.get_default_attributes(&element.local)
            .into_iter()
            .map(|(name, value)| Attribute::defaulted(crate::name::QName::new(name), value))
            .collect()
    }

    fn resolve_entity(&self, name: &str) -> Option<String> {
        self.grammars()
            .find_map(|g| g.entities.get(name))
            .map(|e| e.replacement_text.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_element_and_attlist() {
        let subset = r#"
            <!ELEMENT book (title, author*)>
            <!ATTLIST book id ID #REQUIRED lang CDATA "en">
        "#;
        let grammar = DtdGrammar::parse_subset(subset, None).unwrap();
        assert!(matches!(grammar.element_decls["book"].content, ContentSpec::Children(_)));
        let attrs = &grammar.attribute_lists["book"];
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0].use_, AttrUse::Required);
        assert_eq!(attrs[1].default_value.as_deref(), Some("en"));
    }

    #[test]
    fn parses_general_entity() {
        let subset = r#"<!ENTITY copy "(c)">"#;
        let grammar = DtdGrammar::parse_subset(subset, None).unwrap();
        assert_eq!(grammar.entities["copy"].replacement_text, "(c)");
        assert!(!grammar.entities["copy"].is_parameter);
    }

    #[test]
    fn validates_required_attribute_presence() {
        let subset = r#"<!ELEMENT book ANY><!ATTLIST book id ID #REQUIRED>"#;
        let grammar = DtdGrammar::parse_subset(subset, None).unwrap();
        let mut composite = DtdComposite::new();
        composite.add_internal(grammar);
        let element = ResolvedName { namespace: None, local: "book".to_string() };
        assert!(composite.validate_attributes(&element, &[]).is_err());
        let attr = Attribute::specified(crate::name::QName::new("id"), "b1");
        assert!(composite.validate_attributes(&element, &[attr]).is_ok());
    }

    #[test]
    fn validates_children_content_model() {
        let subset = r#"<!ELEMENT book (title, author*)>"#;
        let grammar = DtdGrammar::parse_subset(subset, None).unwrap();
        let mut composite = DtdComposite::new();
        composite.add_internal(grammar);
        let element = ResolvedName { namespace: None, local: "book".to_string() };
        let children = vec![
            ResolvedName { namespace: None, local: "title".to_string() },
            ResolvedName { namespace: None, local: "author".to_string() },
            ResolvedName { namespace: None, local: "author".to_string() },
        ];
        let ctx = ElementContent { children: &children, has_non_whitespace_text: false };
        assert!(composite.validate_element(&element, &ctx).is_ok());

        let bad_children = vec![ResolvedName { namespace: None, local: "author".to_string() }];
        let bad_ctx = ElementContent { children: &bad_children, has_non_whitespace_text: false };
        assert!(composite.validate_element(&element, &bad_ctx).is_err());
    }
}
