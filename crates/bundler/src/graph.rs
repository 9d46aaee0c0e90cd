//! Module reference graph.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use petgraph::Direction;
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};

use crate::resolver::module_id;

/// A node of the module graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModuleNode {
    /// A script file, identified by its canonical path.
    Script(PathBuf),

    /// A built-in or plugin module resolved at run time. Always a leaf.
    External(String),
}

/// Graph of `require` references between modules.
///
/// Edges point from the requiring module to the required one.
#[derive(Debug, Default)]
pub struct ModuleGraph {
    nodes: HashMap<ModuleNode, NodeIndex>,
    graph: DiGraph<ModuleNode, ()>,
    root: Option<NodeIndex>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node if it is not present and returns its index.
    pub fn add_node(&mut self, node: ModuleNode) -> NodeIndex {
        if let Some(idx) = self.nodes.get(&node) {
            return *idx;
        }
        let idx = self.graph.add_node(node.clone());
        self.nodes.insert(node, idx);
        if self.root.is_none() {
            self.root = Some(idx);
        }
        idx
    }

    /// Records that `from` requires `to`. Repeated references add one edge.
    pub fn add_edge(&mut self, from: ModuleNode, to: ModuleNode) {
        let from = self.add_node(from);
        let to = self.add_node(to);
        if self.graph.find_edge(from, to).is_none() {
            self.graph.add_edge(from, to, ());
        }
    }

    /// The entry module, which is the first node added.
    pub fn root(&self) -> Option<&ModuleNode> {
        self.root.map(|idx| &self.graph[idx])
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, node: &ModuleNode) -> bool {
        self.nodes.contains_key(node)
    }

    pub fn is_cyclic(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// Direct dependencies of a node, in the order they were first required.
    pub fn dependencies(&self, node: &ModuleNode) -> Vec<&ModuleNode> {
        let Some(idx) = self.nodes.get(node) else {
            return Vec::new();
        };
        // petgraph yields most recently added edges first
        let mut deps: Vec<_> = self
            .graph
            .neighbors_directed(*idx, Direction::Outgoing)
            .map(|n| &self.graph[n])
            .collect();
        deps.reverse();
        deps
    }

    /// Script files ordered so that every module comes after the modules it requires.
    pub fn scripts_dependencies_first(&self) -> Vec<&Path> {
        let order = toposort(&self.graph, None).unwrap_or_default();
        order
            .into_iter()
            .rev()
            .filter_map(|idx| match &self.graph[idx] {
                ModuleNode::Script(path) => Some(path.as_path()),
                ModuleNode::External(_) => None,
            })
            .collect()
    }

    /// External module names referenced anywhere in the graph.
    pub fn externals(&self) -> Vec<&str> {
        let mut names: Vec<_> = self
            .graph
            .node_weights()
            .filter_map(|n| match n {
                ModuleNode::External(name) => Some(name.as_str()),
                ModuleNode::Script(_) => None,
            })
            .collect();
        names.sort_unstable();
        names
    }

    /// Renders the graph as an indented tree starting at the entry module.
    pub fn to_ascii(&self, root_dir: &Path) -> String {
        let mut out = String::new();
        let Some(root) = self.root() else {
            return out;
        };

        let _ = writeln!(out, "● {}", self.label(root, root_dir));
        let mut seen = HashSet::new();
        seen.insert(root.clone());
        self.write_children(&mut out, root, root_dir, "", &mut seen);
        out
    }

    fn write_children(
        &self,
        out: &mut String,
        node: &ModuleNode,
        root_dir: &Path,
        indent: &str,
        seen: &mut HashSet<ModuleNode>,
    ) {
        let deps = self.dependencies(node);
        for (i, dep) in deps.iter().enumerate() {
            let last = i + 1 == deps.len();
            let branch = if last { "└─" } else { "├─" };
            let repeated = !seen.insert((*dep).clone());
            let suffix = if repeated && matches!(dep, ModuleNode::Script(_)) {
                " (shared)"
            } else {
                ""
            };
            let _ = writeln!(out, "{indent}{branch} {}{suffix}", self.label(dep, root_dir));

            if !repeated {
                let child_indent = format!("{indent}{}", if last { "   " } else { "│  " });
                self.write_children(out, dep, root_dir, &child_indent, seen);
            }
        }
    }

    /// Renders the graph in Graphviz DOT format.
    pub fn to_dot(&self, root_dir: &Path) -> String {
        let mut out = String::new();
        out.push_str("digraph luapack {\n");
        out.push_str("  rankdir=LR;\n");
        out.push_str("  node [shape=box];\n\n");

        for node in self.graph.node_weights() {
            let shape = match node {
                ModuleNode::Script(_) => "",
                ModuleNode::External(_) => ", shape=ellipse, style=dashed",
            };
            let label = self.label(node, root_dir);
            let _ = writeln!(out, "  {:?} [label={:?}{}];", label, label, shape);
        }

        if self.graph.edge_count() > 0 {
            out.push('\n');
        }
        for edge in self.graph.raw_edges() {
            let from = self.label(&self.graph[edge.source()], root_dir);
            let to = self.label(&self.graph[edge.target()], root_dir);
            let _ = writeln!(out, "  {:?} -> {:?};", from, to);
        }

        out.push_str("}\n");
        out
    }

    fn label(&self, node: &ModuleNode, root_dir: &Path) -> String {
        match node {
            ModuleNode::Script(path) => module_id(root_dir, path),
            ModuleNode::External(name) => format!("[{name}]"),
        }
    }
}
