//! Typed components, component sets, and the seams to the metadata registry and
//! ignore rules.
//!
//! The registry and the ignore predicate are supplied by the caller; this crate only
//! defines what the engine needs from them.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ResolveError;
use crate::types::ComponentKey;

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

/// A source-backed component as resolved by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    #[serde(rename = "type")]
    pub type_name: String,
    pub full_name: String,
    /// The component's definition file, if it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xml: Option<PathBuf>,
    /// Primary content path. For a bundle this is the bundle directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<PathBuf>,
}

impl Component {
    pub fn key(&self) -> ComponentKey {
        ComponentKey::new(self.type_name.clone(), self.full_name.clone())
    }
}

/// Where the registry should look when resolving a path.
#[derive(Debug, Clone, Copy)]
pub enum ResolveTree<'a> {
    /// The real filesystem under the project root.
    Filesystem,
    /// Only the listed project-relative paths exist (e.g. files pending delete).
    Virtual(&'a [String]),
}

/// Maps file paths to typed components.
pub trait MetadataRegistry: Send + Sync {
    /// Resolve a project-relative file or directory path to the components it backs.
    ///
    /// Resolving a directory yields every component beneath it.
    fn resolve(&self, path: &str, tree: ResolveTree<'_>) -> Result<Vec<Component>, ResolveError>;

    /// Whether the component is one logical unit backed by multiple files in a directory.
    fn is_bundle(&self, component: &Component) -> bool;

    /// Every content file of the component, not including its definition file.
    fn walk_content(&self, component: &Component) -> Vec<PathBuf>;

    fn supports_type(&self, type_name: &str) -> bool;
}

/// Opaque project ignore predicate.
pub trait IgnoreRules: Send + Sync {
    /// `true` when the project-relative path must be left out of tracking.
    fn denies(&self, path: &str) -> bool;
}

/// Ignore rules that accept every path.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl IgnoreRules for AcceptAll {
    fn denies(&self, _path: &str) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// ComponentSet
// ---------------------------------------------------------------------------

/// One member of a [`ComponentSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentEntry {
    /// `None` when only the identity is known (remote adds with no local source).
    pub component: Option<Component>,
    /// Pending delete rather than a normal deploy.
    pub destructive: bool,
}

/// Components keyed by identity, each optionally flagged for destructive handling.
///
/// Adding the same identity twice keeps one entry; a non-destructive add clears an
/// earlier destructive flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentSet {
    entries: BTreeMap<ComponentKey, ComponentEntry>,
    pub source_api_version: Option<String>,
}

impl ComponentSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, component: Component) {
        self.insert(component.key(), Some(component), false);
    }

    pub fn add_destructive(&mut self, component: Component) {
        self.insert(component.key(), Some(component), true);
    }

    /// Add an identity with no source behind it.
    pub fn add_key(&mut self, key: ComponentKey) {
        self.insert(key, None, false);
    }

    fn insert(&mut self, key: ComponentKey, component: Option<Component>, destructive: bool) {
        match self.entries.get_mut(&key) {
            Some(existing) => {
                if !destructive {
                    existing.destructive = false;
                    if component.is_some() {
                        existing.component = component;
                    }
                } else if existing.component.is_none() {
                    existing.component = component;
                }
            }
            None => {
                self.entries.insert(
                    key,
                    ComponentEntry {
                        component,
                        destructive,
                    },
                );
            }
        }
    }

    pub fn has(&self, type_name: &str, full_name: &str) -> bool {
        self.entries
            .contains_key(&ComponentKey::new(type_name, full_name))
    }

    pub fn contains_key(&self, key: &ComponentKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &ComponentKey) -> Option<&ComponentEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ComponentKey, &ComponentEntry)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ComponentKey> {
        self.entries.keys()
    }

    /// Source-backed components, destructive or not.
    pub fn source_components(&self) -> impl Iterator<Item = &Component> {
        self.entries.values().filter_map(|e| e.component.as_ref())
    }

    pub fn destructive_keys(&self) -> impl Iterator<Item = &ComponentKey> {
        self.entries
            .iter()
            .filter(|(_, e)| e.destructive)
            .map(|(k, _)| k)
    }
}

impl FromIterator<Component> for ComponentSet {
    fn from_iter<I: IntoIterator<Item = Component>>(iter: I) -> Self {
        let mut set = ComponentSet::new();
        for component in iter {
            set.add(component);
        }
        set
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
