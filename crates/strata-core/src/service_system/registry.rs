use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::kernel::component::Service;
use crate::kernel::context::ServiceContext;
use crate::kernel::error::Result as KernelResult;
use crate::service_system::dependency::DependencyGraph;
use crate::service_system::descriptor::ServiceDescriptor;
use crate::service_system::error::RegistryError;
use crate::service_system::factory::ServiceFactory;

/// A descriptor together with the factory that builds its implementation.
#[derive(Clone)]
pub struct Registration {
    descriptor: Arc<ServiceDescriptor>,
    factory: Arc<dyn ServiceFactory>,
}

impl Registration {
    pub fn descriptor(&self) -> &Arc<ServiceDescriptor> {
        &self.descriptor
    }

    pub fn factory(&self) -> &Arc<dyn ServiceFactory> {
        &self.factory
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("descriptor", &self.descriptor)
            .field("factory", &"<ServiceFactory>")
            .finish()
    }
}

/// The result of resolving a requested set: a topological order plus the
/// same services grouped into depth levels.
#[derive(Debug, Clone)]
pub struct ResolvedPlan {
    pub order: Vec<Arc<ServiceDescriptor>>,
    pub levels: Vec<Vec<Arc<ServiceDescriptor>>>,
}

impl ResolvedPlan {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.order.iter().map(|d| d.name().to_string()).collect()
    }
}

/// Registry of every service this process knows how to build.
///
/// Registration order is significant: it is the declaration order used to
/// break ties during topological sorting.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    entries: IndexMap<String, Registration>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor with a closure factory.
    pub fn register<F>(&mut self, descriptor: ServiceDescriptor, factory: F) -> Result<(), RegistryError>
    where
        F: Fn(&ServiceContext) -> KernelResult<Box<dyn Service>> + Send + Sync + 'static,
    {
        self.register_factory(descriptor, factory)
    }

    /// Register a descriptor with any [`ServiceFactory`] implementation.
    pub fn register_factory(
        &mut self,
        descriptor: ServiceDescriptor,
        factory: impl ServiceFactory + 'static,
    ) -> Result<(), RegistryError> {
        let name = descriptor.name().to_string();

        if self.entries.contains_key(&name) {
            return Err(RegistryError::DuplicateDescriptor { name });
        }

        log::debug!("Registered service descriptor {}", descriptor);
        self.entries.insert(
            name,
            Registration {
                descriptor: Arc::new(descriptor),
                factory: Arc::new(factory),
            },
        );
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Registration> {
        self.entries.get(name)
    }

    pub fn descriptor(&self, name: &str) -> Option<&Arc<ServiceDescriptor>> {
        self.entries.get(name).map(|r| &r.descriptor)
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(name, prefix)` for every registered service that declares a route prefix.
    pub fn route_prefixes(&self) -> Vec<(String, String)> {
        self.entries
            .values()
            .filter_map(|r| {
                r.descriptor
                    .route_prefix()
                    .map(|p| (r.descriptor.name().to_string(), p.to_string()))
            })
            .collect()
    }

    /// Resolve the transitive dependency closure of `requested` into a
    /// dependencies-first order.
    pub fn resolve_order(&self, requested: &[&str]) -> Result<Vec<Arc<ServiceDescriptor>>, RegistryError> {
        let closure = self.closure(requested)?;

        // Nodes go in by registration order so ties break on declaration order,
        // independent of the order names were requested in.
        let mut graph = DependencyGraph::new();
        for (name, registration) in &self.entries {
            if closure.contains(name.as_str()) {
                graph.add_node(registration.descriptor.name());
            }
        }
        for name in self.entries.keys().filter(|n| closure.contains(n.as_str())) {
            for dep in self.entries[name].descriptor.dependency_names() {
                graph.add_edge(name, dep);
            }
        }

        if let Some(path) = graph.find_cycle(requested) {
            log::error!("Dependency cycle detected: {}", path.join(" -> "));
            return Err(RegistryError::DependencyCycle { path });
        }

        let order = graph
            .topological_order()
            .map_err(|unordered| RegistryError::DependencyCycle { path: unordered })?;

        Ok(order
            .into_iter()
            .map(|idx| self.entries[graph.node(idx)].descriptor.clone())
            .collect())
    }

    /// Resolve `requested` and group the order into depth levels.
    pub fn plan(&self, requested: &[&str]) -> Result<ResolvedPlan, RegistryError> {
        let order = self.resolve_order(requested)?;
        let levels = depth_levels(&order);
        Ok(ResolvedPlan { order, levels })
    }

    /// Breadth-first closure over declared dependencies, checking that every
    /// name exists and every version range is satisfied.
    fn closure(&self, requested: &[&str]) -> Result<HashSet<String>, RegistryError> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, Option<String>)> = requested
            .iter()
            .map(|name| (name.to_string(), None))
            .collect();

        while let Some((name, required_by)) = queue.pop_front() {
            if seen.contains(&name) {
                continue;
            }
            let registration = self
                .entries
                .get(&name)
                .ok_or_else(|| RegistryError::DescriptorNotFound {
                    name: name.clone(),
                    required_by: required_by.clone(),
                })?;

            for dependency in registration.descriptor.dependencies() {
                if let Some(found) = self.entries.get(&dependency.service) {
                    let version = found.descriptor.version();
                    if !dependency.is_satisfied_by(version) {
                        return Err(RegistryError::IncompatibleVersion {
                            service: name.clone(),
                            dependency: dependency.service.clone(),
                            required: dependency
                                .version_range
                                .as_ref()
                                .map(|r| r.constraint_string().to_string())
                                .unwrap_or_default(),
                            found: version.to_string(),
                        });
                    }
                }
                queue.push_back((dependency.service.clone(), Some(name.clone())));
            }
            seen.insert(name);
        }

        Ok(seen)
    }
}

/// Group a topological order into depth levels. Level 0 holds services with
/// no dependencies inside the set; a service sits one level above its deepest
/// dependency. Services keep their relative order within a level.
pub fn depth_levels(order: &[Arc<ServiceDescriptor>]) -> Vec<Vec<Arc<ServiceDescriptor>>> {
    let mut depth: HashMap<&str, usize> = HashMap::with_capacity(order.len());
    let mut levels: Vec<Vec<Arc<ServiceDescriptor>>> = Vec::new();

    for descriptor in order {
        let level = descriptor
            .dependency_names()
            .filter_map(|dep| depth.get(dep).map(|d| d + 1))
            .max()
            .unwrap_or(0);
        depth.insert(descriptor.name(), level);
        if levels.len() <= level {
            levels.resize_with(level + 1, Vec::new);
        }
        levels[level].push(descriptor.clone());
    }

    levels
}
