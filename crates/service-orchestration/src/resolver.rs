//! Dependency resolution
//!
//! Produces the order in which services start: every dependency before its
//! dependents. Traversal is depth-first over the descriptors in declaration
//! order, so the same input always yields the same order. Shutdown runs the
//! exact reverse.

use crate::descriptor::ServiceDescriptor;
use crate::{Error, Result};
use std::collections::HashMap;
use tracing::debug;

/// Visit marks for the depth-first traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    /// Not yet visited
    White,
    /// On the current traversal path
    Gray,
    /// Fully resolved
    Black,
}

/// Dependency graph over registered descriptors
#[derive(Debug)]
pub struct DependencyGraph<'a> {
    /// Descriptors in declaration order
    order: Vec<&'a ServiceDescriptor>,
    /// Name lookup into `order`
    index: HashMap<&'a str, usize>,
}

impl<'a> DependencyGraph<'a> {
    /// Build a graph, rejecting dependencies on unknown services
    pub fn new(descriptors: impl IntoIterator<Item = &'a ServiceDescriptor>) -> Result<Self> {
        let order: Vec<&ServiceDescriptor> = descriptors.into_iter().collect();
        let index = order
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.as_str(), i))
            .collect::<HashMap<_, _>>();

        for descriptor in &order {
            for dep in &descriptor.dependencies {
                if !index.contains_key(dep.as_str()) {
                    return Err(Error::Registration(format!(
                        "service '{}' depends on unregistered service '{}'",
                        descriptor.name, dep
                    )));
                }
            }
        }

        Ok(Self { order, index })
    }

    /// Start order: dependencies before dependents
    pub fn start_order(&self) -> Result<Vec<String>> {
        let mut marks = vec![Mark::White; self.order.len()];
        let mut resolved = Vec::with_capacity(self.order.len());

        for i in 0..self.order.len() {
            self.visit(i, &mut marks, &mut resolved)?;
        }

        debug!(order = ?resolved, "Resolved service start order");
        Ok(resolved)
    }

    fn visit(&self, i: usize, marks: &mut [Mark], resolved: &mut Vec<String>) -> Result<()> {
        match marks[i] {
            Mark::Black => return Ok(()),
            Mark::Gray => {
                return Err(Error::Cycle {
                    node: self.order[i].name.clone(),
                });
            }
            Mark::White => {}
        }

        marks[i] = Mark::Gray;
        for dep in &self.order[i].dependencies {
            // Presence was checked in `new`.
            if let Some(&j) = self.index.get(dep.as_str()) {
                self.visit(j, marks, resolved)?;
            }
        }
        marks[i] = Mark::Black;
        resolved.push(self.order[i].name.clone());
        Ok(())
    }
}

/// Resolve the start order of `descriptors`
pub fn resolve<'a>(
    descriptors: impl IntoIterator<Item = &'a ServiceDescriptor>,
) -> Result<Vec<String>> {
    DependencyGraph::new(descriptors)?.start_order()
}

/// Resolve the shutdown order of `descriptors` (reverse of start order)
pub fn shutdown_order<'a>(
    descriptors: impl IntoIterator<Item = &'a ServiceDescriptor>,
) -> Result<Vec<String>> {
    let mut order = resolve(descriptors)?;
    order.reverse();
    Ok(order)
}
