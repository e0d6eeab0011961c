//! Grammar loading and routing (§4.4 GrammarDispatcher).

pub mod dtd;
pub mod relaxng;
pub mod schema;
pub mod xmltree;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::catalog::Catalog;
use crate::error::Result;
use crate::events::Attribute;
use crate::name::{NamespaceContext, ResolvedName};

pub use dtd::DtdComposite;
pub use relaxng::RelaxNgComposite;
pub use schema::SchemaComposite;

/// Context passed to [`Grammar::validate_element`]: the children seen so
/// far (in document order) and whether any non-whitespace text was
/// observed (§4.5/§4.6 `validateElement`).
pub struct ElementContent<'a> {
    pub children: &'a [ResolvedName],
    pub has_non_whitespace_text: bool,
}

/// The contract a DTD/Schema/RelaxNG composite presents to the parser,
/// unifying §4.5/§4.6/§4.7's near-identical `validateAttributes`/
/// `validateElement`/default-attribute surfaces.
pub trait Grammar {
    fn validate_attributes(&self, element: &ResolvedName, attributes: &[Attribute]) -> Result<()>;
    fn validate_element(&self, element: &ResolvedName, content: &ElementContent<'_>) -> Result<()>;
    fn default_attributes(&self, element: &ResolvedName) -> Vec<Attribute>;
    fn resolve_entity(&self, name: &str) -> Option<String>;
}

/// Tracks document namespaces/DOCTYPE, loads and caches grammars through a
/// [`Catalog`], and routes validation queries to one of the three
/// composites (§4.4).
pub struct GrammarDispatcher {
    catalog: Option<Rc<Catalog>>,
    validating: bool,
    schema: SchemaComposite,
    dtd: Option<DtdComposite>,
    relaxng: Option<RelaxNgComposite>,
    /// Namespaces already routed through `processNamespaces`, so reloading
    /// a grammar for an already-seen namespace is a no-op (§4.4 "idempotent").
    seen_namespaces: HashMap<String, ()>,
}

impl GrammarDispatcher {
    pub fn new(catalog: Option<Rc<Catalog>>) -> Self {
        Self {
            catalog,
            validating: false,
            schema: SchemaComposite::new(),
            dtd: None,
            relaxng: None,
            seen_namespaces: HashMap::new(),
        }
    }

    pub fn set_validating(&mut self, validating: bool) {
        self.validating = validating;
    }

    /// Returns the currently applicable grammar, preferring RelaxNG, then
    /// DTD, then the (always-present) schema composite (§4.4 `getGrammar`).
    /// The current DTD composite, if a DOCTYPE has been seen (used by the
    /// parser to emit `notationDecl`/`unparsedEntityDecl` events).
    pub fn dtd(&self) -> Option<&DtdComposite> {
        self.dtd.as_ref()
    }

    pub fn get_grammar(&self) -> &dyn Grammar {
        if let Some(rng) = &self.relaxng {
            return rng;
        }
        if let Some(dtd) = &self.dtd {
            return dtd;
        }
        &self.schema
    }

    /// §4.4 `processDoctype`.
    pub fn process_doctype(
        &mut self,
        _root_name: &str,
        public_id: Option<&str>,
        system_id: Option<&str>,
        internal_subset: &str,
        document_dir: &Path,
    ) -> Result<()> {
        let mut composite = DtdComposite::new();
        if !internal_subset.trim().is_empty() {
            let internal = dtd::DtdGrammar::parse_subset(internal_subset, None)?;
            composite.add_internal(internal);
        }
        if public_id.is_some() || system_id.is_some() {
            let path = self
                .catalog
                .as_ref()
                .and_then(|c| public_id.and_then(|p| c.match_public(p)).or_else(|| system_id.and_then(|s| c.match_system(s))))
                .map(Path::to_path_buf)
                .or_else(|| system_id.map(|s| document_dir.join(s)));
            if let Some(path) = path {
                match std::fs::read_to_string(&path) {
                    Ok(text) => {
                        let params = composite.parameter_entities_from_internal();
                        let external = dtd::DtdGrammar::parse_subset(&text, Some(&params))?;
                        composite.add_external(external);
                    }
                    Err(e) if !self.validating => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping unreadable external DTD");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        self.dtd = Some(composite);
        Ok(())
    }

    /// §4.4 `processNamespaces`.
    pub fn process_namespaces(
        &mut self,
        attributes: &[Attribute],
        ns_context: &NamespaceContext,
        document_dir: &Path,
    ) -> Result<()> {
        let mut schema_locations: HashMap<String, String> = HashMap::new();
        let mut no_ns_location: Option<String> = None;

        for attr in attributes {
            match attr.name.lexical() {
                "xsi:schemaLocation" => {
                    let mut tokens = attr.value.split_whitespace();
                    while let (Some(ns), Some(loc)) = (tokens.next(), tokens.next()) {
                        schema_locations.insert(ns.to_string(), loc.to_string());
                    }
                }
                "xsi:noNamespaceSchemaLocation" => {
                    no_ns_location = Some(attr.value.clone());
                }
                _ => {}
            }
        }

        for (namespace, location) in &schema_locations {
            self.load_schema_namespace(Some(namespace.clone()), Some(location.clone()), document_dir)?;
        }
        if let Some(location) = no_ns_location {
            self.load_schema_namespace(None, Some(location), document_dir)?;
        }

        // Namespaces declared without an explicit location are still worth
        // tracking so a later schemaLocation for the same URI is a no-op.
        if let Some(default_ns) = ns_context.default_namespace() {
            self.seen_namespaces.entry(default_ns.to_string()).or_insert(());
        }

        Ok(())
    }

    fn load_schema_namespace(&mut self, namespace: Option<String>, location: Option<String>, document_dir: &Path) -> Result<()> {
        let key = namespace.clone().unwrap_or_default();
        if self.seen_namespaces.contains_key(&key) {
            return Ok(());
        }
        let path = match location {
            Some(loc) => {
                let p = PathBuf::from(&loc);
                if p.is_absolute() {
                    Some(p)
                } else {
                    Some(document_dir.join(p))
                }
            }
            None => self.catalog.as_ref().and_then(|c| {
                namespace
                    .as_deref()
                    .and_then(|ns| c.match_uri(ns).or_else(|| c.match_system(ns)))
                    .map(Path::to_path_buf)
            }),
        };
        let Some(path) = path else { return Ok(()) };
        match schema::XmlSchemaLoader::load(&path, namespace.as_deref()) {
            Ok(grammar) => {
                self.schema.insert_grammar(namespace.clone().unwrap_or_default(), grammar);
                self.seen_namespaces.insert(key, ());
            }
            Err(e) => {
                if self.validating {
                    return Err(e);
                }
                tracing::warn!(path = %path.display(), error = %e, "skipping unloadable schema");
            }
        }
        Ok(())
    }

    /// §4.4 `handleRelaxNGDetection`.
    pub fn handle_relaxng_detection(&mut self, href: &str, schema_type_ns: &str, document_dir: &Path) -> Result<()> {
        if schema_type_ns != "http://relaxng.org/ns/structure/1.0" {
            return Ok(());
        }
        let candidate = document_dir.join(href);
        let path = if candidate.exists() {
            candidate
        } else if let Some(p) = self.catalog.as_ref().and_then(|c| c.match_system(href).or_else(|| c.match_uri(href))) {
            p.to_path_buf()
        } else {
            candidate
        };
        let composite = relaxng::RelaxNgLoader::load(&path)?;
        self.relaxng = Some(composite);
        Ok(())
    }
}
