//! OASIS XML Catalog resolution (§4.2).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::events::{Attribute, ContentHandler};
use crate::name::QName;
use crate::reader::builder::ParserBuilder;

/// A minimal in-memory element tree, built only to walk a catalog
/// document's structure. Not the crate's public DOM surface (§1 names
/// DOM building as an out-of-core collaborator) — this is private plumbing
/// so the catalog can be parsed with the same core parser used for regular
/// documents, per §4.2 "Construction".
#[derive(Debug, Default)]
struct CatalogNode {
    local_name: String,
    attrs: HashMap<String, String>,
    children: Vec<CatalogNode>,
}

#[derive(Default)]
struct CatalogDomBuilder {
    stack: Vec<CatalogNode>,
    root: Option<CatalogNode>,
}

impl ContentHandler for CatalogDomBuilder {
    fn start_element(&mut self, name: &QName, attributes: &[Attribute]) -> Result<()> {
        let mut attrs = HashMap::new();
        for a in attributes {
            attrs.insert(a.name.local_name().to_string(), a.value.clone());
        }
        self.stack.push(CatalogNode {
            local_name: name.local_name().to_string(),
            attrs,
            children: Vec::new(),
        });
        Ok(())
    }

    fn end_element(&mut self, _name: &QName) -> Result<()> {
        let node = self.stack.pop().expect("matching start_element");
        if let Some(parent) = self.stack.last_mut() {
            parent.children.push(node);
        } else {
            self.root = Some(node);
        }
        Ok(())
    }
}

/// Unwraps a `urn:publicid:`-encoded public identifier back to its literal
/// form (§4.2 "public" entry).
fn unwrap_urn_publicid(s: &str) -> String {
    let rest = match s.strip_prefix("urn:publicid:") {
        Some(r) => r,
        None => return s.to_string(),
    };
    let mut out = String::with_capacity(rest.len());
    let mut chars = rest.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '+' => out.push(' '),
            ':' => {
                if chars.peek() == Some(&':') {
                    chars.next();
                    out.push(';');
                } else {
                    out.push_str("//");
                }
            }
            ';' => out.push_str("::"),
            '%' => {
                let rest: String = chars.clone().take(2).collect();
                match rest.as_str() {
                    "2B" => out.push('+'),
                    "3A" => out.push(':'),
                    "2F" => out.push('/'),
                    "3B" => out.push(';'),
                    "27" => out.push('\''),
                    "3F" => out.push('?'),
                    "23" => out.push('#'),
                    "25" => out.push('%'),
                    _ => {
                        out.push('%');
                        continue;
                    }
                }
                chars.next();
                chars.next();
            }
            other => out.push(other),
        }
    }
    out
}

fn apply_rewrites(target: &str, rewrites: &[(String, String)]) -> Option<String> {
    for (prefix, replacement) in rewrites {
        if let Some(suffix) = target.strip_prefix(prefix.as_str()) {
            return Some(format!("{}{}", replacement, suffix));
        }
    }
    None
}

fn basename(s: &str) -> String {
    Path::new(s)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| s.to_string())
}

fn is_dtd_like(target: &str) -> bool {
    target.ends_with(".dtd") || target.ends_with(".ent") || target.ends_with(".mod")
}

/// An OASIS XML Catalog, loaded once and immutable thereafter (§3
/// Lifecycle). Shared read-only across grammar loads via `Rc`.
#[derive(Debug, Default)]
pub struct Catalog {
    public_catalog: HashMap<String, PathBuf>,
    system_catalog: HashMap<String, PathBuf>,
    uri_catalog: HashMap<String, PathBuf>,
    dtd_catalog: HashMap<String, PathBuf>,
    system_rewrites: Vec<(String, String)>,
    uri_rewrites: Vec<(String, String)>,
}

impl Catalog {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut catalog = Catalog::default();
        catalog.load_file(path.as_ref())?;
        Ok(catalog)
    }

    fn load_file(&mut self, path: &Path) -> Result<()> {
        let mut parser = ParserBuilder::new()
            .ignore_grammars(true)
            .build_from_file(path)
            .map_err(|e| Error::InvalidCatalog(format!("{}: {}", path.display(), e)))?;
        let mut dom = CatalogDomBuilder::default();
        parser.parse(&mut dom)?;
        let root = dom
            .root
            .ok_or_else(|| Error::InvalidCatalog(format!("{}: empty document", path.display())))?;
        if root.local_name != "catalog" {
            return Err(Error::InvalidCatalog(format!(
                "{}: root element must be `catalog`, found `{}`",
                path.display(),
                root.local_name
            )));
        }
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        self.walk(&root, &base_dir)
    }

    fn resolve_base(&self, node: &CatalogNode, current_base: &Path) -> PathBuf {
        match node.attrs.get("base") {
            Some(b) => {
                let p = PathBuf::from(b);
                if p.is_absolute() {
                    p
                } else {
                    current_base.join(p)
                }
            }
            None => current_base.to_path_buf(),
        }
    }

    fn make_absolute(&self, target: &str, base: &Path) -> PathBuf {
        let p = PathBuf::from(target);
        if p.is_absolute() {
            p
        } else {
            base.join(p)
        }
    }

    fn index_dtd_fallback(&mut self, target: &str, resolved: &Path) {
        if is_dtd_like(target) {
            self.dtd_catalog
                .entry(basename(target))
                .or_insert_with(|| resolved.to_path_buf());
        }
    }

    fn walk(&mut self, node: &CatalogNode, base: &Path) -> Result<()> {
        let base = self.resolve_base(node, base);
        for child in &node.children {
            match child.local_name.as_str() {
                "public" => {
                    if let (Some(public_id), Some(uri)) = (child.attrs.get("publicId"), child.attrs.get("uri")) {
                        let resolved = self.make_absolute(uri, &base);
                        if resolved.exists() {
                            let key = unwrap_urn_publicid(public_id);
                            self.public_catalog.entry(key).or_insert_with(|| resolved.clone());
                            self.index_dtd_fallback(uri, &resolved);
                        }
                    }
                }
                "system" => {
                    if let (Some(system_id), Some(uri)) = (child.attrs.get("systemId"), child.attrs.get("uri")) {
                        let resolved = self.make_absolute(uri, &base);
                        if resolved.exists() {
                            self.system_catalog
                                .entry(system_id.clone())
                                .or_insert_with(|| resolved.clone());
                            self.index_dtd_fallback(uri, &resolved);
                        }
                    }
                }
                "uri" => {
                    if let (Some(name), Some(uri)) = (child.attrs.get("name"), child.attrs.get("uri")) {
                        let resolved = self.make_absolute(uri, &base);
                        if resolved.exists() {
                            self.uri_catalog.entry(name.clone()).or_insert_with(|| resolved.clone());
                            self.index_dtd_fallback(uri, &resolved);
                        }
                    }
                }
                "rewriteSystem" => {
                    if let (Some(start), Some(prefix)) =
                        (child.attrs.get("systemIdStartString"), child.attrs.get("rewritePrefix"))
                    {
                        let pair = (start.clone(), prefix.clone());
                        if !self.system_rewrites.contains(&pair) {
                            self.system_rewrites.push(pair);
                        }
                    }
                }
                "rewriteURI" => {
                    if let (Some(start), Some(prefix)) =
                        (child.attrs.get("uriStartString"), child.attrs.get("rewritePrefix"))
                    {
                        let pair = (start.clone(), prefix.clone());
                        if !self.uri_rewrites.contains(&pair) {
                            self.uri_rewrites.push(pair);
                        }
                    }
                }
                "nextCatalog" => {
                    if let Some(catalog_path) = child.attrs.get("catalog") {
                        let resolved = self.make_absolute(catalog_path, &base);
                        if resolved.exists() {
                            if let Ok(next) = Catalog::from_file(&resolved) {
                                self.merge_first_wins(next);
                            }
                        }
                    }
                }
                "group" => {
                    self.walk(child, &base)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn merge_first_wins(&mut self, other: Catalog) {
        for (k, v) in other.public_catalog {
            self.public_catalog.entry(k).or_insert(v);
        }
        for (k, v) in other.system_catalog {
            self.system_catalog.entry(k).or_insert(v);
        }
        for (k, v) in other.uri_catalog {
            self.uri_catalog.entry(k).or_insert(v);
        }
        for (k, v) in other.dtd_catalog {
            self.dtd_catalog.entry(k).or_insert(v);
        }
        for pair in other.system_rewrites {
            if !self.system_rewrites.contains(&pair) {
                self.system_rewrites.push(pair);
            }
        }
        for pair in other.uri_rewrites {
            if !self.uri_rewrites.contains(&pair) {
                self.uri_rewrites.push(pair);
            }
        }
    }

    pub fn match_public(&self, public_id: &str) -> Option<&Path> {
        let key = unwrap_urn_publicid(public_id);
        self.public_catalog.get(&key).map(PathBuf::as_path)
    }

    pub fn match_system(&self, system_id: &str) -> Option<&Path> {
        if let Some(rewritten) = apply_rewrites(system_id, &self.system_rewrites) {
            if let Some(p) = self.system_catalog.get(&rewritten) {
                return Some(p);
            }
        }
        if let Some(p) = self.system_catalog.get(system_id) {
            return Some(p);
        }
        self.dtd_catalog.get(&basename(system_id)).map(PathBuf::as_path)
    }

    pub fn match_uri(&self, uri: &str) -> Option<&Path> {
        if let Some(rewritten) = apply_rewrites(uri, &self.uri_rewrites) {
            if let Some(p) = self.uri_catalog.get(&rewritten) {
                return Some(p);
            }
        }
        if let Some(p) = self.uri_catalog.get(uri) {
            return Some(p);
        }
        self.dtd_catalog.get(&basename(uri)).map(PathBuf::as_path)
    }

    pub fn resolve_entity(&self, public_id: Option<&str>, system_id: Option<&str>) -> Option<&Path> {
        if let Some(pid) = public_id {
            if let Some(p) = self.match_public(pid) {
                return Some(p);
            }
        }
        system_id.and_then(|sid| self.match_system(sid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn parses_simple_catalog_and_resolves_system_id() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("schema.xsd"), "<x/>").unwrap();
        let catalog_xml = r#"<catalog>
            <system systemId="urn:example:schema.xsd" uri="schema.xsd"/>
        </catalog>"#;
        let catalog_path = dir.path().join("catalog.xml");
        fs::write(&catalog_path, catalog_xml).unwrap();

        let catalog = Catalog::from_file(&catalog_path).unwrap();
        let resolved = catalog.match_system("urn:example:schema.xsd").unwrap();
        assert_eq!(resolved, dir.path().join("schema.xsd"));
    }

    #[test]
    fn unwraps_urn_publicid() {
        let unwrapped = unwrap_urn_publicid("urn:publicid:-:W3C:DTD+XHTML+1.0+Strict:EN");
        assert_eq!(unwrapped, "-//W3C//DTD XHTML 1.0 Strict//EN");
    }

    #[test]
    fn next_catalog_merges_first_wins() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.xsd"), "<x/>").unwrap();
        fs::write(dir.path().join("b.xsd"), "<x/>").unwrap();

        let sub_dir = dir.path().join("sub");
        fs::create_dir_all(&sub_dir).unwrap();
        fs::write(sub_dir.join("b.xsd"), "<x/>").unwrap();

        let sub_catalog = r#"<catalog>
            <system systemId="urn:shared" uri="b.xsd"/>
        </catalog>"#;
        fs::write(sub_dir.join("catalog.xml"), sub_catalog).unwrap();

        let main_catalog = format!(
            r#"<catalog>
                <system systemId="urn:main" uri="a.xsd"/>
                <system systemId="urn:shared" uri="a.xsd"/>
                <nextCatalog catalog="{}"/>
            </catalog>"#,
            sub_dir.join("catalog.xml").display()
        );
        let catalog_path = dir.path().join("catalog.xml");
        fs::write(&catalog_path, main_catalog).unwrap();

        let catalog = Catalog::from_file(&catalog_path).unwrap();
        assert_eq!(catalog.match_system("urn:main").unwrap(), dir.path().join("a.xsd"));
        // first-wins: the main catalog's own `urn:shared` mapping wins over nextCatalog's
        assert_eq!(catalog.match_system("urn:shared").unwrap(), dir.path().join("a.xsd"));
    }
}
