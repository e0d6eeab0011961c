//! A minimal namespace-aware in-memory element tree, built by driving the
//! core parser's [`ContentHandler`] events into a DOM rather than streaming
//! them. Shared scaffolding for the RelaxNG and XSD loaders (§4.7/§4.6),
//! which both need to walk a configuration document's structure more than
//! once, instead of a dedicated ad-hoc scanner per format.

use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;
use crate::events::{Attribute, ContentHandler};
use crate::name::QName;
use crate::reader::builder::ParserBuilder;

#[derive(Debug, Default, Clone)]
pub struct XmlNode {
    pub local_name: String,
    pub namespace: Option<String>,
    pub attrs: HashMap<String, String>,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    pub fn child(&self, local_name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.local_name == local_name)
    }

    pub fn children_named<'a>(&'a self, local_name: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children.iter().filter(move |c| c.local_name == local_name)
    }
}

#[derive(Debug, Clone)]
struct NsScope {
    bindings: HashMap<String, String>,
    default_ns: Option<String>,
}

#[derive(Default)]
struct TreeBuilder {
    stack: Vec<XmlNode>,
    scopes: Vec<NsScope>,
    root: Option<XmlNode>,
}

impl TreeBuilder {
    fn current_scope(&self) -> Option<&NsScope> {
        self.scopes.last()
    }

    fn resolve_prefix(&self, prefix: &str) -> Option<String> {
        self.scopes.iter().rev().find_map(|s| s.bindings.get(prefix).cloned())
    }
}

impl ContentHandler for TreeBuilder {
    fn start_element(&mut self, name: &QName, attributes: &[Attribute]) -> Result<()> {
        let mut bindings = HashMap::new();
        let mut default_ns = self.current_scope().and_then(|s| s.default_ns.clone());
        for a in attributes {
            if a.name.lexical() == "xmlns" {
                default_ns = Some(a.value.clone());
            } else if a.name.prefix() == Some("xmlns") {
                bindings.insert(a.name.local_name().to_string(), a.value.clone());
            }
        }

        let namespace = match name.prefix() {
            Some(p) => bindings.get(p).cloned().or_else(|| self.resolve_prefix(p)),
            None => default_ns.clone(),
        };
        self.scopes.push(NsScope { bindings, default_ns });

        let mut attrs = HashMap::new();
        for a in attributes {
            attrs.insert(a.name.local_name().to_string(), a.value.clone());
        }
        self.stack.push(XmlNode {
            local_name: name.local_name().to_string(),
            namespace,
            attrs,
            text: String::new(),
            children: Vec::new(),
        });
        Ok(())
    }

    fn characters(&mut self, text: &str) -> Result<()> {
        if let Some(top) = self.stack.last_mut() {
            top.text.push_str(text);
        }
        Ok(())
    }

    fn end_element(&mut self, _name: &QName) -> Result<()> {
        self.scopes.pop();
        let node = self.stack.pop().expect("matching start_element");
        if let Some(parent) = self.stack.last_mut() {
            parent.children.push(node);
        } else {
            self.root = Some(node);
        }
        Ok(())
    }
}

/// Parses `path` into a node tree. `Ok(None)` means the document was
/// syntactically fine but had no root (the caller decides how to report that).
pub fn parse_xml_file(path: &Path) -> Result<Option<XmlNode>> {
    let mut parser = ParserBuilder::new().ignore_grammars(true).build_from_file(path)?;
    let mut builder = TreeBuilder::default();
    parser.parse(&mut builder)?;
    Ok(builder.root)
}

pub fn parse_xml_str(text: &str) -> Result<Option<XmlNode>> {
    let mut parser = ParserBuilder::new().ignore_grammars(true).build_from_str(text)?;
    let mut builder = TreeBuilder::default();
    parser.parse(&mut builder)?;
    Ok(builder.root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_default_and_prefixed_namespaces() {
        let root = parse_xml_str(r#"<a:root xmlns:a="urn:a" xmlns="urn:default"><child/><a:tagged/></a:root>"#)
            .unwrap()
            .unwrap();
        assert_eq!(root.namespace.as_deref(), Some("urn:a"));
        assert_eq!(root.child("child").unwrap().namespace.as_deref(), Some("urn:default"));
        assert_eq!(root.child("tagged").unwrap().namespace.as_deref(), Some("urn:a"));
    }
}
