//! RelaxNG flattening and default-value extraction (§4.7).
//!
//! No structurally close retrieved example exists for this subsystem (see
//! DESIGN.md); this is a direct implementation of the algorithm the
//! specification describes, built as an arena of parsed RelaxNG pattern
//! nodes the way `define` recursion in the Design Notes recommends.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::events::Attribute;
use crate::name::{QName, ResolvedName};

use super::xmltree::{parse_xml_file, XmlNode};
use super::{ElementContent, Grammar};

const RELAXNG_NS: &str = "http://relaxng.org/ns/structure/1.0";
const COMPAT_NS: &str = "http://relaxng.org/ns/compatibility/annotations/1.0";

type RngNode = XmlNode;

fn parse_rng_file(path: &Path) -> Result<RngNode> {
    parse_xml_file(path)
        .map_err(|e| Error::RelaxNgParse(format!("{}: {}", path.display(), e)))?
        .ok_or_else(|| Error::RelaxNgParse(format!("{}: empty document", path.display())))
}

/// Step 1: drops elements outside the RelaxNG/compatibility-annotation
/// namespaces, run after external refs/includes are inlined so foreign
/// content pulled in from those documents is dropped too.
fn drop_foreign_namespace_elements(node: &mut RngNode) {
    node.children.retain(|c| matches!(c.namespace.as_deref(), Some(RELAXNG_NS)) || (c.namespace.as_deref() == Some(COMPAT_NS) && c.local_name == "defaultValue"));
    for child in &mut node.children {
        drop_foreign_namespace_elements(child);
    }
}

/// Step 2: replaces `externalRef` with the parsed target's root.
fn resolve_external_refs(node: &mut RngNode, current_dir: &Path, catalog: Option<&Catalog>) -> Result<()> {
    if node.local_name == "externalRef" {
        if let Some(href) = node.attrs.get("href").cloned() {
            let candidate = current_dir.join(&href);
            let path = if candidate.exists() {
                candidate
            } else if let Some(p) = catalog.and_then(|c| c.match_system(&href).or_else(|| c.match_uri(&href))) {
                p.to_path_buf()
            } else {
                candidate
            };
            let mut inlined = parse_rng_file(&path)?;
            let next_dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| current_dir.to_path_buf());
            resolve_external_refs(&mut inlined, &next_dir, catalog)?;
            *node = inlined;
            return Ok(());
        }
    }
    for child in &mut node.children {
        resolve_external_refs(child, current_dir, catalog)?;
    }
    Ok(())
}

/// Step 3: replaces `include` with a `div` wrapping the included schema's
/// root and the include's own children.
fn resolve_includes(node: &mut RngNode, current_dir: &Path, catalog: Option<&Catalog>) -> Result<()> {
    for child in &mut node.children {
        if child.local_name == "include" {
            if let Some(href) = child.attrs.get("href").cloned() {
                let candidate = current_dir.join(&href);
                let path = if candidate.exists() {
                    candidate
                } else if let Some(p) = catalog.and_then(|c| c.match_system(&href).or_else(|| c.match_uri(&href))) {
                    p.to_path_buf()
                } else {
                    candidate
                };
                let included_root = parse_rng_file(&path)?;
                let mut div = RngNode {
                    local_name: "div".to_string(),
                    namespace: Some(RELAXNG_NS.to_string()),
                    attrs: HashMap::new(),
                    text: String::new(),
                    children: vec![included_root],
                };
                div.children.extend(child.children.drain(..));
                *child = div;
            }
        }
        resolve_includes(child, current_dir, catalog)?;
    }
    Ok(())
}

/// Step 4: repeatedly flattens `div` elements into their parent.
fn flatten_divs(node: &mut RngNode) {
    let mut flattened = Vec::new();
    for mut child in node.children.drain(..) {
        flatten_divs(&mut child);
        if child.local_name == "div" {
            flattened.extend(child.children);
        } else {
            flattened.push(child);
        }
    }
    node.children = flattened;
}

/// Step 5: synthesizes a `<name>` child for `element`/`attribute` patterns
/// carrying a `name` attribute.
fn synthesize_name_children(node: &mut RngNode, default_ns: Option<&str>) {
    if (node.local_name == "element" || node.local_name == "attribute") && node.attrs.contains_key("name") {
        let name_text = node.attrs.get("name").cloned().unwrap_or_default();
        let ns = if node.local_name == "element" {
            node.attrs.get("ns").cloned().or_else(|| default_ns.map(str::to_string))
        } else {
            node.attrs.get("ns").cloned()
        };
        let mut name_node = RngNode {
            local_name: "name".to_string(),
            namespace: Some(RELAXNG_NS.to_string()),
            attrs: HashMap::new(),
            text: name_text,
            children: Vec::new(),
        };
        if let Some(ns) = ns {
            name_node.attrs.insert("ns".to_string(), ns);
        }
        node.children.insert(0, name_node);
    }
    for child in &mut node.children {
        synthesize_name_children(child, default_ns);
    }
}

fn node_name_text(node: &RngNode) -> Option<&str> {
    node.children.iter().find(|c| c.local_name == "name").map(|c| c.text.as_str())
}

fn node_name_namespace(node: &RngNode) -> Option<String> {
    node.children.iter().find(|c| c.local_name == "name").and_then(|c| c.attrs.get("ns").cloned())
}

/// One extracted default: `{lexicalName, localName, namespace?, value}`.
#[derive(Debug, Clone)]
pub struct AttributeDefault {
    pub lexical_name: String,
    pub local_name: String,
    pub namespace: Option<String>,
    pub value: String,
}

/// Collects `define` bodies (concatenated if the same name recurs
/// multiple times), then for every `element` pattern with a `name` child,
/// walks its content for `attribute` patterns, recursing through
/// `ref`/`parentRef` with a visited set and stopping at nested `element`
/// patterns (§4.7 "Default-value extraction").
struct DefaultExtractor<'a> {
    defines: HashMap<String, Vec<&'a RngNode>>,
}

impl<'a> DefaultExtractor<'a> {
    fn new(root: &'a RngNode) -> Self {
        let mut defines: HashMap<String, Vec<&RngNode>> = HashMap::new();
        collect_defines(root, &mut defines);
        Self { defines }
    }

    fn collect_attribute_defaults(&self, element: &'a RngNode, visited: &mut HashSet<String>, out: &mut Vec<AttributeDefault>) {
        for child in &element.children {
            self.walk_for_attributes(child, visited, out);
        }
    }

    fn walk_for_attributes(&self, node: &'a RngNode, visited: &mut HashSet<String>, out: &mut Vec<AttributeDefault>) {
        match node.local_name.as_str() {
            "element" => {}
            "attribute" => {
                if let Some(local_name) = node_name_text(node) {
                    let namespace = node_name_namespace(node);
                    let default = node
                        .attrs
                        .get("defaultValue")
                        .cloned()
                        .or_else(|| node.children.iter().find(|c| c.local_name == "defaultValue" && c.namespace.as_deref() == Some(COMPAT_NS)).map(|c| c.text.clone()));
                    if let Some(value) = default {
                        let lexical_name = match &namespace {
                            Some(ns) => format!("{{{}}}{}", ns, local_name),
                            None => local_name.to_string(),
                        };
                        out.push(AttributeDefault {
                            lexical_name,
                            local_name: local_name.to_string(),
                            namespace,
                            value,
                        });
                    }
                }
            }
            "ref" | "parentRef" => {
                if let Some(name) = node.attrs.get("name") {
                    if visited.insert(name.clone()) {
                        if let Some(defs) = self.defines.get(name) {
                            for def in defs {
                                for child in &def.children {
                                    self.walk_for_attributes(child, visited, out);
                                }
                            }
                        }
                    }
                }
            }
            _ => {
                for child in &node.children {
                    self.walk_for_attributes(child, visited, out);
                }
            }
        }
    }
}

fn collect_defines<'a>(node: &'a RngNode, out: &mut HashMap<String, Vec<&'a RngNode>>) {
    if node.local_name == "define" {
        if let Some(name) = node.attrs.get("name") {
            out.entry(name.clone()).or_default().push(node);
        }
    }
    for child in &node.children {
        collect_defines(child, out);
    }
}

fn collect_elements<'a>(node: &'a RngNode, out: &mut Vec<&'a RngNode>) {
    if node.local_name == "element" {
        out.push(node);
    }
    for child in &node.children {
        collect_elements(child, out);
    }
}

/// Flattens a RelaxNG grammar and extracts per-element default attribute
/// values (§4.7).
pub struct RelaxNgLoader;

impl RelaxNgLoader {
    pub fn load(path: &Path) -> Result<RelaxNgComposite> {
        Self::load_with_catalog(path, None)
    }

    pub fn load_with_catalog(path: &Path, catalog: Option<&Catalog>) -> Result<RelaxNgComposite> {
        let mut root = parse_rng_file(path)?;
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
        resolve_external_refs(&mut root, &dir, catalog)?;
        resolve_includes(&mut root, &dir, catalog)?;
        drop_foreign_namespace_elements(&mut root);
        flatten_divs(&mut root);
        synthesize_name_children(&mut root, None);

        let mut elements_by_name: HashMap<String, HashMap<String, AttributeDefault>> = HashMap::new();
        {
            let extractor = DefaultExtractor::new(&root);
            let mut elements = Vec::new();
            collect_elements(&root, &mut elements);
            for element in elements {
                let Some(name) = node_name_text(element) else { continue };
                let mut defaults = Vec::new();
                let mut visited = HashSet::new();
                extractor.collect_attribute_defaults(element, &mut visited, &mut defaults);
                let entry = elements_by_name.entry(name.to_string()).or_default();
                for d in defaults {
                    entry.entry(d.lexical_name.clone()).or_insert(d);
                }
            }
        }

        Ok(RelaxNgComposite { elements_by_name })
    }
}

/// Implements `validateElement`/`validateAttributes` minimally: content
/// validation is delegated out of core (§4.7), but attribute defaults are
/// always supplied from the flattened grammar.
pub struct RelaxNgComposite {
    elements_by_name: HashMap<String, HashMap<String, AttributeDefault>>,
}

impl RelaxNgComposite {
    pub fn defaults_for(&self, element_name: &str) -> Option<&HashMap<String, AttributeDefault>> {
        self.elements_by_name.get(element_name)
    }
}

impl Grammar for RelaxNgComposite {
    fn validate_attributes(&self, _element: &ResolvedName, _attributes: &[Attribute]) -> Result<()> {
        Ok(())
    }

    fn validate_element(&self, _element: &ResolvedName, _content: &ElementContent<'_>) -> Result<()> {
        Ok(())
    }

    fn default_attributes(&self, element: &ResolvedName) -> Vec<Attribute> {
        let Some(defaults) = self.defaults_for(&element.local) else {
            return Vec::new();
        };
        defaults
            .values()
            .map(|d| Attribute::defaulted(QName::new(d.local_name.clone()), d.value.clone()))
            .collect()
    }

    fn resolve_entity(&self, _name: &str) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn extracts_default_attribute_value() {
        let dir = TempDir::new().unwrap();
        let rng = r#"<element name="book" xmlns="http://relaxng.org/ns/structure/1.0" xmlns:a="http://relaxng.org/ns/compatibility/annotations/1.0">
            <attribute name="lang" a:defaultValue="en">
                <text/>
            </attribute>
        </element>"#;
        let path = dir.path().join("book.rng");
        fs::write(&path, rng).unwrap();

        let composite = RelaxNgLoader::load(&path).unwrap();
        let defaults = composite.defaults_for("book").unwrap();
        assert_eq!(defaults.get("lang").unwrap().value, "en");
    }

    #[test]
    fn flatten_divs_merges_children_into_parent() {
        let mut root = RngNode {
            local_name: "grammar".to_string(),
            namespace: Some(RELAXNG_NS.to_string()),
            attrs: HashMap::new(),
            text: String::new(),
            children: vec![RngNode {
                local_name: "div".to_string(),
                namespace: Some(RELAXNG_NS.to_string()),
                attrs: HashMap::new(),
                text: String::new(),
                children: vec![RngNode {
                    local_name: "start".to_string(),
                    namespace: Some(RELAXNG_NS.to_string()),
                    attrs: HashMap::new(),
                    text: String::new(),
                    children: Vec::new(),
                }],
            }],
        };
        flatten_divs(&mut root);
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].local_name, "start");
    }
}
