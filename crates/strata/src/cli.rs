//! Commands of the `strata` host binary.
use std::path::PathBuf;
use std::time::Duration;

use strata_core::config::{ConfigError, ConfigResolver, ConfigSource};
use strata_core::kernel::constants::ENV_PREFIX;
use strata_core::service_system::RegistryError;
use strata_core::{Configuration, Kernel, KernelError, ServiceRegistry};

/// Every service this binary can host, statically registered.
pub fn registry() -> Result<ServiceRegistry, RegistryError> {
    let mut registry = ServiceRegistry::new();
    strata_counter::register(&mut registry)?;
    strata_push::register(&mut registry)?;
    Ok(registry)
}

/// Config files in the order given, then `STRATA__*` environment overrides.
pub fn load_configuration(paths: &[PathBuf]) -> Result<Configuration, ConfigError> {
    let mut resolver = ConfigResolver::new();
    for path in paths {
        resolver.add_source(ConfigSource::file(path));
    }
    resolver.add_source(ConfigSource::process_environment(ENV_PREFIX));
    resolver.resolve()
}

/// Requested names, or every registered service when none are given.
fn requested<'a>(kernel: &'a Kernel, services: &'a [String]) -> Vec<&'a str> {
    if services.is_empty() {
        kernel.registry().names()
    } else {
        services.iter().map(String::as_str).collect()
    }
}

pub fn list(kernel: &Kernel) {
    for name in kernel.registry().names() {
        if let Some(descriptor) = kernel.registry().descriptor(name) {
            println!("{}", descriptor);
        }
    }
}

pub fn plan(kernel: &Kernel, services: &[String]) -> Result<(), KernelError> {
    let plan = kernel.plan(&requested(kernel, services))?;
    println!("Start order: {}", plan.names().join(" -> "));
    for (level, descriptors) in plan.levels.iter().enumerate() {
        let names: Vec<&str> = descriptors.iter().map(|d| d.name()).collect();
        println!("  level {}: {}", level, names.join(", "));
    }
    Ok(())
}

pub struct StartOptions {
    pub services: Vec<String>,
    pub run_for: Option<Duration>,
    pub json: bool,
}

/// Start, report, wait for Ctrl-C or `run_for`, stop. `Ok(false)` when the
/// platform came up degraded or did not shut down cleanly.
pub async fn start(kernel: &Kernel, configuration: &Configuration, options: StartOptions) -> Result<bool, KernelError> {
    let requested = requested(kernel, &options.services);
    println!("Starting services: {}", requested.join(", "));
    let handle = kernel.start(&requested, configuration).await?;

    if options.json {
        match serde_json::to_string_pretty(handle.report()) {
            Ok(json) => println!("{}", json),
            Err(e) => log::error!("Cannot encode startup report: {}", e),
        }
    } else {
        print!("{}", handle.report());
    }
    for (service, prefix) in handle.route_prefixes() {
        log::info!("Service '{}' mounted at {}", service, prefix);
    }
    let ready = handle.is_ready();

    match options.run_for {
        Some(duration) => {
            tokio::select! {
                _ = tokio::time::sleep(duration) => log::info!("Run time of {:?} elapsed", duration),
                _ = tokio::signal::ctrl_c() => log::info!("Interrupted"),
            }
        }
        None => {
            println!("Running; press Ctrl-C to stop.");
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Cannot listen for Ctrl-C, stopping now: {}", e);
            }
        }
    }

    println!("Shutting down...");
    let shutdown = kernel.stop(handle).await;
    println!("{}", shutdown);
    Ok(ready && shutdown.is_clean())
}
