//! Radix tree keyed by path segments.
//!
//! # Responsibilities
//! - Store one payload per inserted path pattern
//! - Resolve a concrete request path to its payload plus bound parameters
//! - Remove patterns and prune branches left empty
//!
//! # Segment Syntax
//! - `name`     static segment, matched literally
//! - `:name`    placeholder, binds one segment to `name`
//! - `*`        unnamed placeholder, binds to `_0`, `_1`, ...
//! - `**:name`  wildcard, binds the rest of the path to `name` (`_` if unnamed)
//!
//! # Design Decisions
//! - Nodes live in an arena; children are referenced by index so the
//!   static-route index and parent links are plain `usize`s
//! - Fully static paths are indexed by their exact string for O(1) lookup
//! - Competing placeholder branches are disambiguated by remaining depth

use std::collections::HashMap;

type NodeId = usize;

const ROOT: NodeId = 0;

/// Parameters bound during a lookup, keyed by parameter name.
pub type Params = HashMap<String, String>;

/// Segment classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Static,
    Wildcard,
    Placeholder,
}

impl NodeKind {
    pub(crate) fn of(segment: &str) -> Self {
        if segment.starts_with("**") {
            NodeKind::Wildcard
        } else if segment == "*" || segment.starts_with(':') {
            NodeKind::Placeholder
        } else {
            NodeKind::Static
        }
    }
}

/// Options shared by the router and the matchers built from it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterOptions {
    /// When false (default), a trailing `/` is ignored on every operation.
    pub strict_trailing_slash: bool,
}

#[derive(Debug)]
struct RadixNode<T> {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: HashMap<String, NodeId>,
    wildcard_child: Option<NodeId>,
    placeholder_children: Vec<NodeId>,
    param_name: Option<String>,
    max_depth: usize,
    data: Option<T>,
}

impl<T> RadixNode<T> {
    fn new(kind: NodeKind, parent: Option<NodeId>, param_name: Option<String>) -> Self {
        Self {
            kind,
            parent,
            children: HashMap::new(),
            wildcard_child: None,
            placeholder_children: Vec::new(),
            param_name,
            max_depth: 0,
            data: None,
        }
    }
}

/// A successful lookup.
#[derive(Debug, PartialEq)]
pub struct RouteMatch<'a, T> {
    /// Payload stored at the matched pattern.
    pub data: &'a T,
    /// Bound parameters; `None` when no dynamic segment took part in the match.
    pub params: Option<Params>,
}

/// Path-segment trie with static, placeholder and wildcard nodes.
#[derive(Debug)]
pub struct RadixRouter<T> {
    nodes: Vec<RadixNode<T>>,
    free: Vec<NodeId>,
    static_routes: HashMap<String, NodeId>,
    options: RouterOptions,
    len: usize,
}

impl<T> Default for RadixRouter<T> {
    fn default() -> Self {
        Self::new(RouterOptions::default())
    }
}

impl<T> RadixRouter<T> {
    /// Create an empty router.
    pub fn new(options: RouterOptions) -> Self {
        Self {
            nodes: vec![RadixNode::new(NodeKind::Static, None, None)],
            free: Vec::new(),
            static_routes: HashMap::new(),
            options,
            len: 0,
        }
    }

    /// Build a router from `(pattern, payload)` pairs. Later duplicates win.
    pub fn from_routes<I, P>(options: RouterOptions, routes: I) -> Self
    where
        I: IntoIterator<Item = (P, T)>,
        P: AsRef<str>,
    {
        let mut router = Self::new(options);
        for (path, data) in routes {
            router.insert(path.as_ref(), data);
        }
        router
    }

    pub fn options(&self) -> RouterOptions {
        self.options
    }

    /// Number of patterns currently holding a payload.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert `data` at `path`, replacing any payload already stored there.
    pub fn insert(&mut self, path: &str, data: T) {
        let path = normalize(path, self.options);
        let sections: Vec<&str> = path.split('/').collect();
        let total = sections.len();

        let mut node = ROOT;
        let mut visited = Vec::with_capacity(total + 1);
        visited.push(ROOT);
        let mut is_static = true;
        let mut unnamed = 0usize;

        for section in &sections {
            let kind = NodeKind::of(section);
            let param_name = match kind {
                NodeKind::Static => None,
                NodeKind::Placeholder if *section == "*" => {
                    let name = format!("_{unnamed}");
                    unnamed += 1;
                    Some(name)
                }
                NodeKind::Placeholder => Some(section[1..].to_string()),
                NodeKind::Wildcard => Some(wildcard_param(section)),
            };
            if kind != NodeKind::Static {
                is_static = false;
            }

            node = match self.nodes[node].children.get(*section) {
                Some(&child) => child,
                None => {
                    let child = self.alloc(RadixNode::new(kind, Some(node), param_name));
                    let parent = &mut self.nodes[node];
                    parent.children.insert((*section).to_string(), child);
                    match kind {
                        NodeKind::Placeholder => parent.placeholder_children.push(child),
                        NodeKind::Wildcard => parent.wildcard_child = Some(child),
                        NodeKind::Static => {}
                    }
                    child
                }
            };
            visited.push(node);
        }

        for (depth, id) in visited.into_iter().enumerate() {
            let visited_node = &mut self.nodes[id];
            visited_node.max_depth = visited_node.max_depth.max(total + 1 - depth);
        }

        if self.nodes[node].data.replace(data).is_none() {
            self.len += 1;
        }
        if is_static {
            self.static_routes.insert(path.to_string(), node);
        }
    }

    /// Resolve a concrete path.
    pub fn lookup(&self, path: &str) -> Option<RouteMatch<'_, T>> {
        let path = normalize(path, self.options);

        if let Some(&id) = self.static_routes.get(path) {
            if let Some(data) = self.nodes[id].data.as_ref() {
                return Some(RouteMatch { data, params: None });
            }
        }

        let sections: Vec<&str> = path.split('/').collect();
        let mut params = Params::new();
        let mut params_found = false;
        let mut wildcard: Option<(NodeId, String)> = None;
        let mut current = Some(ROOT);

        for (i, section) in sections.iter().enumerate() {
            let Some(id) = current else { break };
            let node = &self.nodes[id];

            if let Some(child) = node.wildcard_child {
                wildcard = Some((child, sections[i..].join("/")));
            }

            current = match node.children.get(*section) {
                Some(&child) => Some(child),
                None => {
                    let remaining = sections.len() - i;
                    let next = node
                        .placeholder_children
                        .iter()
                        .copied()
                        .find(|child| self.nodes[*child].max_depth == remaining)
                        .or_else(|| node.placeholder_children.first().copied());
                    if let Some(child) = next {
                        if let Some(name) = &self.nodes[child].param_name {
                            params.insert(name.clone(), (*section).to_string());
                        }
                        params_found = true;
                    }
                    next
                }
            };
        }

        let terminal = current.filter(|id| self.nodes[*id].data.is_some());
        let id = match (terminal, wildcard) {
            (Some(id), _) => id,
            (None, Some((id, rest))) => {
                let name = self.nodes[id].param_name.clone().unwrap_or_else(|| "_".into());
                params.insert(name, rest);
                params_found = true;
                id
            }
            (None, None) => return None,
        };

        let data = self.nodes[id].data.as_ref()?;
        Some(RouteMatch {
            data,
            params: params_found.then_some(params),
        })
    }

    /// Remove the payload stored at exactly `path`.
    ///
    /// Segments are matched literally (a pattern is removed by its own
    /// text, e.g. `/users/:id`). Returns whether anything was removed.
    pub fn remove(&mut self, path: &str) -> bool {
        let path = normalize(path, self.options);
        let mut node = ROOT;
        for section in path.split('/') {
            match self.nodes[node].children.get(section) {
                Some(&child) => node = child,
                None => return false,
            }
        }

        if self.nodes[node].data.take().is_none() {
            return false;
        }
        self.len -= 1;
        self.static_routes.remove(path);
        self.prune(node);
        true
    }

    pub(crate) fn root(&self) -> NodeRef<'_, T> {
        NodeRef { router: self, id: ROOT }
    }

    fn alloc(&mut self, node: RadixNode<T>) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = node;
                id
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    /// Detach empty, payload-less nodes walking up from `id`.
    fn prune(&mut self, mut id: NodeId) {
        while id != ROOT {
            let node = &self.nodes[id];
            if node.data.is_some() || !node.children.is_empty() {
                break;
            }
            let Some(parent) = node.parent else { break };

            let parent_node = &mut self.nodes[parent];
            parent_node.children.retain(|_, child| *child != id);
            parent_node.placeholder_children.retain(|child| *child != id);
            if parent_node.wildcard_child == Some(id) {
                parent_node.wildcard_child = None;
            }
            self.nodes[id] = RadixNode::new(NodeKind::Static, None, None);
            self.free.push(id);
            id = parent;
        }
    }
}

/// Read-only view of a trie node, used to flatten the tree.
pub(crate) struct NodeRef<'a, T> {
    router: &'a RadixRouter<T>,
    id: NodeId,
}

impl<T> Clone for NodeRef<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for NodeRef<'_, T> {}

impl<'a, T> NodeRef<'a, T> {
    pub(crate) fn kind(&self) -> NodeKind {
        self.router.nodes[self.id].kind
    }

    pub(crate) fn data(&self) -> Option<&'a T> {
        self.router.nodes[self.id].data.as_ref()
    }

    pub(crate) fn children(&self) -> impl Iterator<Item = (&'a str, NodeRef<'a, T>)> + 'a {
        let router = self.router;
        router.nodes[self.id]
            .children
            .iter()
            .map(move |(segment, &id)| (segment.as_str(), NodeRef { router, id }))
    }
}

fn wildcard_param(segment: &str) -> String {
    let name = segment[2..].trim_start_matches(':');
    if name.is_empty() {
        "_".to_string()
    } else {
        name.to_string()
    }
}

/// Strip one trailing slash unless strict; the root stays `/`.
pub(crate) fn normalize(path: &str, options: RouterOptions) -> &str {
    if options.strict_trailing_slash {
        return path;
    }
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}
