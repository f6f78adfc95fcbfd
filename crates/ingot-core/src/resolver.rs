//! Dependency resolver.
//!
//! Builds the directed graph "factory → factories it depends on", rejects
//! cycles and missing bindings, and computes a deterministic construction
//! order.
//!
//! 1. Cycle detection runs over **every** bound factory (depth-first, three
//!    colours) so the reported path is complete.
//! 2. Starting from the requested references (init descriptor dependencies),
//!    the reachable factories are collected.  A reachable factory with a
//!    missing binding fails resolution; an unreachable one only warns, since
//!    nothing will ever construct it.
//! 3. Kahn's algorithm orders the reachable factories.  Ties are broken by
//!    registration order, so the result is stable across runs.  Layers group
//!    factories whose dependencies all live in earlier layers; factories in
//!    the same layer are independent of each other.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};

use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult, Requester};
use crate::extension::ExtensionRegistry;
use crate::factory::ServiceFactory;
use crate::refs::{AnyServiceRef, RefKind, ServiceScope};

/// Output of a successful resolution.
///
/// Construction itself is demand-driven through the instance cache, which
/// always resolves a factory's dependencies before running it; the order
/// recorded here is what that process is guaranteed to respect, and is kept
/// for inspection and logging.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    order: Vec<AnyServiceRef>,
    layers: Vec<Vec<AnyServiceRef>>,
}

impl Resolution {
    /// Reachable services, every dependency before its dependents.
    pub fn order(&self) -> &[AnyServiceRef] {
        &self.order
    }

    /// Reachable services grouped into independent layers.
    pub fn layers(&self) -> &[Vec<AnyServiceRef>] {
        &self.layers
    }

    /// Position of `id` in [`order`](Self::order).
    pub fn position(&self, id: &str) -> Option<usize> {
        self.order.iter().position(|service| service.id() == id)
    }

    /// Number of reachable services.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` if nothing needs constructing.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Dependencies declared by one consumer (an init descriptor).
#[derive(Debug, Clone, Copy)]
pub struct DependencyRequest<'a> {
    /// Who declared the dependencies.
    pub requester: &'a Requester,
    /// The declared references.
    pub deps: &'a [AnyServiceRef],
}

/// Resolves `requests` against the bound `factories`.
///
/// When several factories provide the same id the last one is used, at the
/// registration position of the first.
pub fn resolve(
    factories: &[ServiceFactory],
    requests: &[DependencyRequest<'_>],
    extensions: &ExtensionRegistry,
) -> CoreResult<Resolution> {
    let graph = Graph::new(factories);

    if let Some(path) = graph.find_cycle() {
        return Err(CoreError::CyclicDependency { path });
    }

    let reachable = graph.reachable(requests, extensions)?;
    for (idx, factory) in graph.nodes.iter().enumerate() {
        if reachable[idx] {
            continue;
        }
        for dep in factory.deps() {
            if dep.kind() == RefKind::Service && !graph.index.contains_key(dep.id()) {
                warn!(
                    service = %factory.service(),
                    dependency = %dep,
                    "Unused factory has an unbound dependency"
                );
            }
        }
    }

    let resolution = graph.order(&reachable);
    debug!(
        services = resolution.len(),
        layers = resolution.layers.len(),
        "Dependency graph resolved"
    );
    Ok(resolution)
}

// =============================================================================
// Graph
// =============================================================================

#[derive(Clone, Copy, PartialEq, Eq)]
enum Colour {
    White,
    Grey,
    Black,
}

struct Graph<'f> {
    nodes: Vec<&'f ServiceFactory>,
    index: HashMap<&'f str, usize>,
}

impl<'f> Graph<'f> {
    fn new(factories: &'f [ServiceFactory]) -> Self {
        let mut nodes: Vec<&ServiceFactory> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();
        for factory in factories {
            match index.get(factory.service().id()) {
                Some(&idx) => nodes[idx] = factory,
                None => {
                    index.insert(factory.service().id(), nodes.len());
                    nodes.push(factory);
                }
            }
        }
        Self { nodes, index }
    }

    /// Bound factory indices `idx` depends on, in declaration order.
    fn edges(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        self.nodes[idx]
            .deps()
            .iter()
            .filter(|dep| dep.kind() == RefKind::Service)
            .filter_map(|dep| self.index.get(dep.id()).copied())
    }

    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut colour = vec![Colour::White; self.nodes.len()];
        let mut stack: Vec<usize> = Vec::new();
        for start in 0..self.nodes.len() {
            if colour[start] == Colour::White {
                if let Some(path) = self.visit(start, &mut colour, &mut stack) {
                    return Some(path);
                }
            }
        }
        None
    }

    fn visit(&self, idx: usize, colour: &mut [Colour], stack: &mut Vec<usize>) -> Option<Vec<String>> {
        colour[idx] = Colour::Grey;
        stack.push(idx);
        for next in self.edges(idx) {
            match colour[next] {
                Colour::Grey => {
                    let from = stack.iter().position(|&n| n == next).unwrap_or(0);
                    let mut path: Vec<String> = stack[from..]
                        .iter()
                        .map(|&n| self.nodes[n].service().id().to_string())
                        .collect();
                    path.push(self.nodes[next].service().id().to_string());
                    return Some(path);
                }
                Colour::White => {
                    if let Some(path) = self.visit(next, colour, stack) {
                        return Some(path);
                    }
                }
                Colour::Black => {}
            }
        }
        stack.pop();
        colour[idx] = Colour::Black;
        None
    }

    /// Marks the factories reachable from `requests`, validating every edge
    /// on the way.
    fn reachable(
        &self,
        requests: &[DependencyRequest<'_>],
        extensions: &ExtensionRegistry,
    ) -> CoreResult<Vec<bool>> {
        let mut seen = vec![false; self.nodes.len()];
        let mut queue: VecDeque<usize> = VecDeque::new();

        for request in requests {
            let scoped = request.requester.plugin_id().is_some();
            for dep in request.deps {
                if let Some(idx) = self.check_edge(dep, scoped, request.requester, extensions)? {
                    if !seen[idx] {
                        seen[idx] = true;
                        queue.push_back(idx);
                    }
                }
            }
        }

        while let Some(idx) = queue.pop_front() {
            let factory = self.nodes[idx];
            let requester = Requester::service(factory.service().id(), None);
            let scoped = factory.service().scope() == ServiceScope::Plugin;
            for dep in factory.deps() {
                if let Some(next) = self.check_edge(dep, scoped, &requester, extensions)? {
                    if !seen[next] {
                        seen[next] = true;
                        queue.push_back(next);
                    }
                }
            }
        }

        Ok(seen)
    }

    /// Validates one dependency edge; returns the bound factory index for services.
    fn check_edge(
        &self,
        dep: &AnyServiceRef,
        scoped: bool,
        requester: &Requester,
        extensions: &ExtensionRegistry,
    ) -> CoreResult<Option<usize>> {
        if dep.kind() == RefKind::ExtensionPoint {
            if !extensions.contains(dep.id()) {
                return Err(CoreError::UnresolvedDependency {
                    dependency: dep.id().to_string(),
                    required_by: requester.clone(),
                });
            }
            return Ok(None);
        }

        let idx = self
            .index
            .get(dep.id())
            .copied()
            .ok_or_else(|| CoreError::UnresolvedDependency {
                dependency: dep.id().to_string(),
                required_by: requester.clone(),
            })?;
        if !scoped && self.nodes[idx].service().scope() == ServiceScope::Plugin {
            return Err(CoreError::MissingScope {
                service: dep.id().to_string(),
                required_by: requester.clone(),
            });
        }
        Ok(Some(idx))
    }

    fn order(&self, reachable: &[bool]) -> Resolution {
        let n = self.nodes.len();
        let mut in_degree = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for idx in (0..n).filter(|&i| reachable[i]) {
            for dep in self.edges(idx) {
                dependents[dep].push(idx);
                in_degree[idx] += 1;
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
            .filter(|&i| reachable[i] && in_degree[i] == 0)
            .map(Reverse)
            .collect();
        let mut depth = vec![0usize; n];
        let mut order = Vec::new();
        let mut layers: Vec<Vec<AnyServiceRef>> = Vec::new();

        while let Some(Reverse(idx)) = ready.pop() {
            let service = self.nodes[idx].service().clone();
            if layers.len() <= depth[idx] {
                layers.resize_with(depth[idx] + 1, Vec::new);
            }
            layers[depth[idx]].push(service.clone());
            order.push(service);

            for &next in &dependents[idx] {
                depth[next] = depth[next].max(depth[idx] + 1);
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        Resolution { order, layers }
    }
}
