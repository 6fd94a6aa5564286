use std::str::FromStr;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::kernel::component::Service;
use crate::kernel::context::ServiceContext;
use crate::kernel::error::Result as KernelResult;
use crate::service_system::{RegistryError, ServiceDescriptor, ServiceRegistry, VersionRange};

struct Noop;

impl Service for Noop {}

fn noop(_: &ServiceContext) -> KernelResult<Box<dyn Service>> {
    Ok(Box::new(Noop))
}

fn descriptor(name: &str, deps: &[&str]) -> ServiceDescriptor {
    deps.iter()
        .fold(ServiceDescriptor::new(name, "1.0.0").unwrap(), |d, dep| d.depends_on(dep))
}

fn registry(entries: &[(&str, &[&str])]) -> ServiceRegistry {
    let mut registry = ServiceRegistry::new();
    for (name, deps) in entries {
        registry.register(descriptor(name, deps), noop).unwrap();
    }
    registry
}

fn order_names(registry: &ServiceRegistry, requested: &[&str]) -> Vec<String> {
    registry
        .resolve_order(requested)
        .unwrap()
        .iter()
        .map(|d| d.name().to_string())
        .collect()
}

#[test]
fn test_resolve_dependencies_first() {
    let registry = registry(&[
        ("push", &["counter", "storage"]),
        ("counter", &["storage"]),
        ("storage", &[]),
        ("search", &[]),
    ]);
    assert_eq!(order_names(&registry, &["push"]), vec!["storage", "counter", "push"]);
}

#[test]
fn test_closure_only_includes_reachable() {
    let registry = registry(&[("a", &["b"]), ("b", &[]), ("unrelated", &[])]);
    assert_eq!(order_names(&registry, &["a"]), vec!["b", "a"]);
}

#[test]
fn test_resolution_is_deterministic() {
    let registry = registry(&[
        ("web", &["db", "cache"]),
        ("db", &[]),
        ("cache", &[]),
        ("metrics", &[]),
        ("jobs", &["db"]),
    ]);
    let first = order_names(&registry, &["web", "jobs", "metrics"]);
    for _ in 0..10 {
        assert_eq!(order_names(&registry, &["web", "jobs", "metrics"]), first);
    }
    // Request order does not matter; registration order breaks ties.
    assert_eq!(order_names(&registry, &["metrics", "jobs", "web"]), first);
    assert_eq!(first, vec!["db", "cache", "web", "metrics", "jobs"]);
}

#[test]
fn test_cycle_reports_path() {
    let registry = registry(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]);
    let err = registry.resolve_order(&["a"]).unwrap_err();
    assert_eq!(
        err,
        RegistryError::DependencyCycle {
            path: vec!["a".into(), "b".into(), "c".into(), "a".into()]
        }
    );
    assert_eq!(err.to_string(), "Dependency cycle detected: a -> b -> c -> a");
}

#[test]
fn test_missing_dependency_names_requirer() {
    let registry = registry(&[("api", &["ghost"])]);
    assert_eq!(
        registry.resolve_order(&["api"]).unwrap_err(),
        RegistryError::DescriptorNotFound {
            name: "ghost".into(),
            required_by: Some("api".into())
        }
    );
    assert_eq!(
        registry.resolve_order(&["nope"]).unwrap_err(),
        RegistryError::DescriptorNotFound {
            name: "nope".into(),
            required_by: None
        }
    );
}

#[test]
fn test_duplicate_registration_rejected() {
    let mut registry = registry(&[("a", &[])]);
    let err = registry.register(descriptor("a", &[]), noop).unwrap_err();
    assert_eq!(err, RegistryError::DuplicateDescriptor { name: "a".into() });
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_self_dependency_is_a_cycle() {
    let mut registry = ServiceRegistry::new();
    registry.register(descriptor("loop", &["loop"]), noop).unwrap();
    let err = registry.resolve_order(&["loop"]).unwrap_err();
    match &err {
        RegistryError::DependencyCycle { path } => assert_eq!(path, &["loop", "loop"]),
        other => panic!("expected DependencyCycle, got {other}"),
    }
    assert_eq!(err.to_string(), "Dependency cycle detected: loop -> loop");
}

#[test]
fn test_invalid_descriptor_version() {
    assert!(matches!(
        ServiceDescriptor::new("a", "one"),
        Err(RegistryError::InvalidDescriptor { .. })
    ));
    assert!(matches!(
        ServiceDescriptor::new("  ", "1.0.0"),
        Err(RegistryError::InvalidDescriptor { .. })
    ));
}

#[test]
fn test_version_range_mismatch() {
    let mut registry = ServiceRegistry::new();
    registry
        .register(ServiceDescriptor::new("db", "1.5.0").unwrap(), noop)
        .unwrap();
    registry
        .register(
            ServiceDescriptor::new("api", "0.1.0")
                .unwrap()
                .depends_on_version("db", VersionRange::from_str("^2").unwrap()),
            noop,
        )
        .unwrap();

    assert_eq!(
        registry.resolve_order(&["api"]).unwrap_err(),
        RegistryError::IncompatibleVersion {
            service: "api".into(),
            dependency: "db".into(),
            required: "^2".into(),
            found: "1.5.0".into(),
        }
    );
}

#[test]
fn test_plan_levels() {
    let registry = registry(&[
        ("storage", &[]),
        ("log", &[]),
        ("counter", &["storage"]),
        ("push", &["counter", "log"]),
        ("search", &["storage"]),
    ]);
    let plan = registry.plan(&["push", "search"]).unwrap();
    let levels: Vec<Vec<&str>> = plan
        .levels
        .iter()
        .map(|level| level.iter().map(|d| d.name()).collect())
        .collect();
    assert_eq!(
        levels,
        vec![vec!["storage", "log"], vec!["counter", "search"], vec!["push"]]
    );
}

#[test]
fn test_route_prefixes() {
    let mut registry = ServiceRegistry::new();
    registry
        .register(
            ServiceDescriptor::new("counter", "1.0.0")
                .unwrap()
                .with_route_prefix("/counter"),
            noop,
        )
        .unwrap();
    registry.register(descriptor("internal", &[]), noop).unwrap();

    assert_eq!(
        registry.route_prefixes(),
        vec![("counter".to_string(), "/counter".to_string())]
    );
}

#[test]
fn test_random_dags_resolve_dependencies_first() {
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for _ in 0..150 {
        let n = rng.gen_range(1..30);
        let names: Vec<String> = (0..n).map(|i| format!("svc{}", i)).collect();
        // Edges only point to lower indices, so the graph is acyclic.
        let mut deps: Vec<Vec<String>> = vec![Vec::new(); n];
        for i in 1..n {
            for j in 0..i {
                if rng.gen_bool(0.2) {
                    deps[i].push(names[j].clone());
                }
            }
        }

        let mut registration_order: Vec<usize> = (0..n).collect();
        registration_order.shuffle(&mut rng);
        let mut registry = ServiceRegistry::new();
        for &i in &registration_order {
            let dep_refs: Vec<&str> = deps[i].iter().map(String::as_str).collect();
            registry.register(descriptor(&names[i], &dep_refs), noop).unwrap();
        }

        let requested: Vec<&str> = names.iter().map(String::as_str).collect();
        let order = order_names(&registry, &requested);
        assert_eq!(order.len(), n);

        let position = |name: &str| order.iter().position(|o| o == name).unwrap();
        for i in 0..n {
            for dep in &deps[i] {
                assert!(position(dep) < position(&names[i]), "{} before {}", dep, names[i]);
            }
        }
        assert_eq!(order, order_names(&registry, &requested));
    }
}
