//! Qualified names and namespace scoping (§3 "Qualified Name" / "Namespace Context").

use std::collections::HashMap;
use std::rc::Rc;

pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";
pub const XMLNS_NS: &str = "http://www.w3.org/2000/xmlns/";

/// A lexical XML name, split at the first `:` if present.
///
/// The namespace is *not* part of this type: it's resolved against a
/// [`NamespaceContext`] on demand, since the same lexical name can resolve
/// differently at different points in the document (or not at all, if the
/// document isn't namespace-aware).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    lexical: String,
    colon: Option<usize>,
}

impl QName {
    pub fn new(lexical: impl Into<String>) -> Self {
        let lexical = lexical.into();
        let colon = lexical.find(':');
        Self { lexical, colon }
    }

    /// The full lexical name as it appeared in the source, e.g. `"x:tag"`.
    pub fn lexical(&self) -> &str {
        &self.lexical
    }

    /// The prefix, if the name was qualified (`x` in `x:tag`).
    pub fn prefix(&self) -> Option<&str> {
        self.colon.map(|i| &self.lexical[..i])
    }

    /// The local part of the name (`tag` in `x:tag`, or the whole name if
    /// unqualified).
    pub fn local_name(&self) -> &str {
        match self.colon {
            Some(i) => &self.lexical[i + 1..],
            None => &self.lexical,
        }
    }
}

impl std::fmt::Display for QName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.lexical)
    }
}

/// A resolved, namespace-qualified name: `(namespace?, local)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedName {
    pub namespace: Option<String>,
    pub local: String,
}

impl ResolvedName {
    /// The `{ns}local` Clark-notation key used for cross-grammar lookups.
    pub fn clark_key(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{{{}}}{}", ns, self.local),
            None => self.local.clone(),
        }
    }
}

/// An immutable mapping `prefix -> uri`, chained to a parent scope.
///
/// Every context (including the root) contains the two fixed bindings
/// `xml` and `xmlns`. Contexts are reference-counted so that child-element
/// frames can cheaply "clone" (really: share) their parent's bindings and
/// only materialize a new layer when the start tag itself declares new
/// `xmlns`/`xmlns:*` attributes.
#[derive(Debug, Clone)]
pub struct NamespaceContext {
    bindings: HashMap<String, String>,
    default_ns: Option<String>,
    parent: Option<Rc<NamespaceContext>>,
}

impl NamespaceContext {
    /// The base context every document starts with (§3 invariant).
    pub fn root() -> Rc<Self> {
        let mut bindings = HashMap::new();
        bindings.insert("xml".to_string(), XML_NS.to_string());
        bindings.insert("xmlns".to_string(), XMLNS_NS.to_string());
        Rc::new(Self {
            bindings,
            default_ns: None,
            parent: None,
        })
    }

    /// Builds a child scope overlaying `declared` prefix bindings (and an
    /// optional new default namespace) on top of `parent`.
    pub fn push(
        parent: &Rc<NamespaceContext>,
        declared: Vec<(String, String)>,
        default_ns: Option<String>,
    ) -> Rc<Self> {
        if declared.is_empty() && default_ns.is_none() {
            return parent.clone();
        }
        Rc::new(Self {
            bindings: declared.into_iter().collect(),
            default_ns: default_ns.or_else(|| parent.default_ns.clone()),
            parent: Some(parent.clone()),
        })
    }

    fn lookup_prefix(&self, prefix: &str) -> Option<&str> {
        if let Some(uri) = self.bindings.get(prefix) {
            return Some(uri);
        }
        self.parent.as_ref().and_then(|p| p.lookup_prefix(prefix))
    }

    pub fn default_namespace(&self) -> Option<&str> {
        self.default_ns.as_deref()
    }

    /// Resolves an element's qualified name: unqualified names inherit the
    /// in-scope default namespace.
    pub fn resolve_element(&self, name: &QName) -> ResolvedName {
        let namespace = match name.prefix() {
            Some(p) => self.lookup_prefix(p).map(|s| s.to_string()),
            None => self.default_namespace().map(|s| s.to_string()),
        };
        ResolvedName {
            namespace,
            local: name.local_name().to_string(),
        }
    }

    /// Resolves an attribute's qualified name. Unqualified attributes never
    /// inherit the default namespace (XML namespace rules, used by §4.6
    /// `validateAttributes`).
    pub fn resolve_attribute(&self, name: &QName) -> ResolvedName {
        let namespace = name
            .prefix()
            .and_then(|p| self.lookup_prefix(p))
            .map(|s| s.to_string());
        ResolvedName {
            namespace,
            local: name.local_name().to_string(),
        }
    }

    pub fn prefix_for(&self, namespace: &str) -> Option<String> {
        if self.default_ns.as_deref() == Some(namespace) {
            return Some(String::new());
        }
        let mut ctx = Some(self);
        while let Some(c) = ctx {
            for (prefix, uri) in &c.bindings {
                if uri == namespace {
                    return Some(prefix.clone());
                }
            }
            ctx = c.parent.as_deref();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unqualified_name_has_no_prefix() {
        let q = QName::new("tag");
        assert_eq!(q.prefix(), None);
        assert_eq!(q.local_name(), "tag");
    }

    #[test]
    fn qualified_name_splits_at_first_colon() {
        let q = QName::new("x:tag");
        assert_eq!(q.prefix(), Some("x"));
        assert_eq!(q.local_name(), "tag");
    }

    #[test]
    fn root_context_has_fixed_bindings() {
        let root = NamespaceContext::root();
        assert_eq!(root.lookup_prefix("xml"), Some(XML_NS));
        assert_eq!(root.lookup_prefix("xmlns"), Some(XMLNS_NS));
    }

    #[test]
    fn child_scope_inherits_and_overlays() {
        let root = NamespaceContext::root();
        let child = NamespaceContext::push(
            &root,
            vec![("x".to_string(), "urn:x".to_string())],
            Some("urn:default".to_string()),
        );
        assert_eq!(child.lookup_prefix("x"), Some("urn:x"));
        assert_eq!(child.lookup_prefix("xml"), Some(XML_NS));
        assert_eq!(child.default_namespace(), Some("urn:default"));

        let grandchild = NamespaceContext::push(&child, vec![], None);
        assert_eq!(grandchild.default_namespace(), Some("urn:default"));
    }

    #[test]
    fn resolve_attribute_does_not_inherit_default_namespace() {
        let root = NamespaceContext::root();
        let child = NamespaceContext::push(&root, vec![], Some("urn:default".to_string()));
        let resolved = child.resolve_attribute(&QName::new("attr"));
        assert_eq!(resolved.namespace, None);
        let resolved_elem = child.resolve_element(&QName::new("tag"));
        assert_eq!(resolved_elem.namespace, Some("urn:default".to_string()));
    }
}
