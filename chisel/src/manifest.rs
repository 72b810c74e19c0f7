//! Route manifest pushed to clients on connect.
//!
//! A [`Manifest`] lists every namespace prefix and every route fqn of a
//! router's tree plus a random freshness token. It is advisory: dispatch
//! never consults it, and a client that missed it can still call by fqn.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::random::RandomProvider;
use crate::router::NamespaceNode;

/// Exclusive upper bound of the version token.
const VERSION_RANGE_END: u64 = 1_000_000_000;

/// One advertised route.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManifestRoute {
    /// Fully-qualified route name.
    pub fqn: String,
}

/// Snapshot of a namespace tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Namespace prefixes in first-seen depth-first order.
    pub namespaces: Vec<String>,
    /// Every route fqn.
    pub routes: Vec<ManifestRoute>,
    /// Opaque freshness token. Not monotonic across restarts.
    pub version: u64,
}

impl Manifest {
    /// Walk `root` once, depth-first, and collect its shape.
    ///
    /// The root node itself is not named in the output: root routes appear
    /// under their bare name, and top-level namespaces are listed without a
    /// prefix. Within a node, routes come before children; routes are in
    /// name order and children in registration order.
    pub fn build<R: RandomProvider>(root: &NamespaceNode, random: &R) -> Self {
        let mut walk = Walk::default();
        walk.visit(root, "");
        let manifest = Self {
            namespaces: walk.namespaces,
            routes: walk.routes,
            version: random.random_range(1..VERSION_RANGE_END),
        };
        tracing::debug!(
            namespaces = manifest.namespaces.len(),
            routes = manifest.routes.len(),
            version = manifest.version,
            "manifest built"
        );
        manifest
    }

    /// Whether `fqn` is advertised.
    pub fn contains_route(&self, fqn: &str) -> bool {
        self.routes.iter().any(|route| route.fqn == fqn)
    }

    /// Whether two manifests describe the same tree, ignoring the version.
    pub fn same_shape(&self, other: &Manifest) -> bool {
        self.namespaces == other.namespaces && self.routes == other.routes
    }
}

#[derive(Default)]
struct Walk {
    seen: HashSet<String>,
    namespaces: Vec<String>,
    routes: Vec<ManifestRoute>,
}

impl Walk {
    fn visit(&mut self, node: &NamespaceNode, prefix: &str) {
        for name in node.route_names() {
            self.routes.push(ManifestRoute {
                fqn: join(prefix, name),
            });
        }
        for child in node.children() {
            let path = join(prefix, child.name());
            if self.seen.insert(path.clone()) {
                self.namespaces.push(path.clone());
            }
            self.visit(child, &path);
        }
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}
