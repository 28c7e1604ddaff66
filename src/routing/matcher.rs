//! Flattened route table for "every route that applies" queries.
//!
//! # Responsibilities
//! - Flatten a [`RadixRouter`] into static / wildcard / dynamic buckets
//! - Return all payloads whose pattern space contains a path
//!
//! # Design Decisions
//! - Built on demand as a snapshot; rebuild after the trie changes
//! - Buckets are `BTreeMap`s so equal-length keys tie-break deterministically
//! - Output order: wildcard, dynamic, static; each bucket shortest key first.
//!   Callers wanting most-specific-first reverse the result.

use std::collections::BTreeMap;

use crate::routing::radix::{normalize, NodeKind, NodeRef, RadixRouter, RouterOptions};

/// Three-bucket view of a trie (sub)tree.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteTable<T> {
    /// Exact path → payload.
    pub static_routes: BTreeMap<String, T>,
    /// Prefix → payload, for `/**` patterns.
    pub wildcard: BTreeMap<String, T>,
    /// Prefix → table matched against the path after the placeholder.
    pub dynamic: BTreeMap<String, RouteTable<T>>,
}

impl<T> Default for RouteTable<T> {
    fn default() -> Self {
        Self {
            static_routes: BTreeMap::new(),
            wildcard: BTreeMap::new(),
            dynamic: BTreeMap::new(),
        }
    }
}

impl<T: Clone> RouteTable<T> {
    fn from_node(node: NodeRef<'_, T>) -> Self {
        let mut table = Self::default();
        table.add_node("", node);
        table
    }

    fn add_node(&mut self, path: &str, node: NodeRef<'_, T>) {
        if !path.is_empty() {
            match node.kind() {
                NodeKind::Static if !path.contains(['*', ':']) => {
                    if let Some(data) = node.data() {
                        self.static_routes.insert(path.to_string(), data.clone());
                    }
                }
                NodeKind::Static => {}
                NodeKind::Wildcard => {
                    if let Some(data) = node.data() {
                        self.wildcard.insert(parent_path(path).to_string(), data.clone());
                    }
                }
                NodeKind::Placeholder => {
                    let mut sub = RouteTable::from_node(node);
                    if let Some(data) = node.data() {
                        sub.static_routes.insert("/".to_string(), data.clone());
                    }
                    match self.dynamic.get_mut(parent_path(path)) {
                        Some(existing) => existing.merge(sub),
                        None => {
                            self.dynamic.insert(parent_path(path).to_string(), sub);
                        }
                    }
                    return;
                }
            }
        }

        for (segment, child) in node.children() {
            let child_path = format!("{path}/{segment}").replacen("//", "/", 1);
            self.add_node(&child_path, child);
        }
    }

    /// Sibling placeholders (`/a/:x/..`, `/a/:y`) share a prefix key.
    fn merge(&mut self, other: RouteTable<T>) {
        for (key, value) in other.static_routes {
            self.static_routes.entry(key).or_insert(value);
        }
        for (key, value) in other.wildcard {
            self.wildcard.entry(key).or_insert(value);
        }
        for (key, table) in other.dynamic {
            match self.dynamic.get_mut(&key) {
                Some(existing) => existing.merge(table),
                None => {
                    self.dynamic.insert(key, table);
                }
            }
        }
    }
}

impl<T> RouteTable<T> {
    fn collect<'a>(&'a self, path: &str, out: &mut Vec<&'a T>) {
        for (key, value) in by_key_length(&self.wildcard) {
            if path == key || path.strip_prefix(key.as_str()).is_some_and(|rest| rest.starts_with('/')) {
                out.push(value);
            }
        }

        for (key, table) in by_key_length(&self.dynamic) {
            let Some(rest) = path.strip_prefix(key.as_str()) else { continue };
            if !rest.starts_with('/') {
                continue;
            }
            // Drop the empty leading segment and the placeholder's value.
            let sub_path = format!("/{}", rest.split('/').skip(2).collect::<Vec<_>>().join("/"));
            table.collect(normalize(&sub_path, RouterOptions::default()), out);
        }

        if let Some(value) = self.static_routes.get(path) {
            out.push(value);
        }
    }
}

fn by_key_length<V>(map: &BTreeMap<String, V>) -> Vec<(&String, &V)> {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by_key(|(key, _)| key.len());
    entries
}

/// Path with its last segment removed (`/a/:id` → `/a`, `/**` → ``).
fn parent_path(path: &str) -> &str {
    path.rfind('/').map_or("", |idx| &path[..idx])
}

/// Matcher over a flattened [`RouteTable`].
#[derive(Debug, Clone)]
pub struct RouteMatcher<T> {
    table: RouteTable<T>,
    options: RouterOptions,
}

impl<T: Clone> RouteMatcher<T> {
    /// Flatten `router` into a new matcher.
    pub fn new(router: &RadixRouter<T>) -> Self {
        Self {
            table: RouteTable::from_node(router.root()),
            options: router.options(),
        }
    }
}

impl<T> RouteMatcher<T> {
    pub fn table(&self) -> &RouteTable<T> {
        &self.table
    }

    /// Every payload whose pattern could match `path`, most general first.
    pub fn match_all(&self, path: &str) -> Vec<&T> {
        let path = normalize(path, self.options);
        let mut out = Vec::new();
        self.table.collect(path, &mut out);
        out
    }
}
