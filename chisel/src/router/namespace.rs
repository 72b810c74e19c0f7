//! Namespace tree and its startup-time builder.

use std::collections::BTreeMap;

use super::route::RouteDefinition;
use crate::error::RegistrationError;

/// One node of the namespace tree.
///
/// Holds named routes and an ordered list of child namespaces. Sibling names
/// are unique; the tree is built once at startup and only read afterwards.
#[derive(Debug, Clone)]
pub struct NamespaceNode {
    name: String,
    routes: BTreeMap<String, RouteDefinition>,
    children: Vec<NamespaceNode>,
}

impl NamespaceNode {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            routes: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// Name of this namespace (a single segment).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Child namespaces in registration order.
    pub fn children(&self) -> &[NamespaceNode] {
        &self.children
    }

    /// Child namespace by name.
    pub fn child(&self, name: &str) -> Option<&NamespaceNode> {
        self.children.iter().find(|child| child.name == name)
    }

    /// Route by name.
    pub fn route(&self, name: &str) -> Option<&RouteDefinition> {
        self.routes.get(name)
    }

    /// Route names in lexicographic order.
    pub fn route_names(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }
}

/// Registers namespaces and routes under one node.
///
/// Obtained from [`Router::namespace`](crate::Router::namespace) closures;
/// `prefix` is the dotted path of the node being configured.
pub struct NamespaceBuilder<'a> {
    node: &'a mut NamespaceNode,
    prefix: String,
}

impl<'a> NamespaceBuilder<'a> {
    pub(crate) fn new(node: &'a mut NamespaceNode, prefix: String) -> Self {
        Self { node, prefix }
    }

    /// Dotted path of the namespace being configured (empty at the root).
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Create a child namespace and configure it with `build`.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::InvalidName`] for empty or dotted names,
    /// [`RegistrationError::DuplicateNamespace`] if a sibling already uses
    /// `name`, and any error returned by `build`.
    pub fn namespace<F>(&mut self, name: &str, build: F) -> Result<&mut Self, RegistrationError>
    where
        F: FnOnce(&mut NamespaceBuilder<'_>) -> Result<(), RegistrationError>,
    {
        validate_name(name)?;
        let path = self.qualify(name);
        if self.node.child(name).is_some() {
            return Err(RegistrationError::DuplicateNamespace(path));
        }

        let mut child = NamespaceNode::new(name);
        build(&mut NamespaceBuilder::new(&mut child, path.clone()))?;
        tracing::debug!(namespace = %path, routes = child.routes.len(), "namespace registered");
        self.node.children.push(child);
        Ok(self)
    }

    /// Attach a route to this namespace.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::InvalidName`] for empty or dotted names and
    /// [`RegistrationError::DuplicateRoute`] if the name is taken.
    pub fn route(
        &mut self,
        name: &str,
        definition: RouteDefinition,
    ) -> Result<&mut Self, RegistrationError> {
        validate_name(name)?;
        let fqn = self.qualify(name);
        if self.node.routes.contains_key(name) {
            return Err(RegistrationError::DuplicateRoute(fqn));
        }
        tracing::trace!(route = %fqn, input = definition.input().name(), "route registered");
        self.node.routes.insert(name.to_string(), definition);
        Ok(self)
    }

    fn qualify(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix, name)
        }
    }
}

fn validate_name(name: &str) -> Result<(), RegistrationError> {
    if name.is_empty() || name.contains('.') {
        return Err(RegistrationError::InvalidName(name.to_string()));
    }
    Ok(())
}
