//! Entry point for the Matter SBMD controller daemon.
//!
//! Loads configuration, acquires the single-instance lock, loads every
//! `*.sbmd` bundle under the configured spec directory into a driver
//! registry, runs the one-time commissioner bootstrap, and prints the
//! manual pairing code for this controller's fabric. The actual Matter
//! transport (fabric management, PASE/CASE sessions, wire I/O) is supplied
//! by whatever concrete `MatterTransport` the embedding application wires
//! in — this binary has none to drive on its own, so it idles until
//! interrupted.

use std::sync::Arc;

use log::{error, info, warn};

use matter_sbmd_driver::commissioning::generate_pairing_code;
use matter_sbmd_driver::config::Config;
use matter_sbmd_driver::driver::base::Commissioner;
use matter_sbmd_driver::instance_lock::InstanceLock;
use matter_sbmd_driver::sbmd::factory::SbmdRegistry;

#[tokio::main]
async fn main() {
    matter_sbmd_driver::config::load_dotenv();
    env_logger::init();

    let _lock = match InstanceLock::acquire() {
        Ok(lock) => lock,
        Err(e) => {
            error!("failed to acquire single-instance lock: {e}");
            std::process::exit(1);
        }
    };

    let config = Config::from_env();
    info!("loading SBMD specs from {}", config.sbmd.spec_dir.display());

    let (registry, report) = match SbmdRegistry::load_dir(&config.sbmd.spec_dir) {
        Ok(result) => result,
        Err(e) => {
            error!("failed to read spec directory {}: {e}", config.sbmd.spec_dir.display());
            std::process::exit(1);
        }
    };
    info!("loaded {} spec(s)", report.loaded);
    for failure in &report.failures {
        warn!("failed to load {}: {}", failure.path, failure.error);
    }

    let commissioner = Arc::new(Commissioner::new(config.sbmd.comm_fail_timeout_secs));
    commissioner.bootstrap();

    for spec in registry.specs() {
        info!(
            "spec available: '{}' (device class {} v{}, {} device type(s))",
            spec.name,
            spec.barton_meta.device_class,
            spec.barton_meta.device_class_version,
            spec.matter_meta.device_types.len()
        );
    }
    // Building a `DriverFactory` from these specs needs a concrete
    // `MatterTransport`; none ships with this binary (see `transport`'s
    // module doc) — the embedding application constructs one and wires
    // `driver::spec_based::SpecBasedMatterDeviceDriver` instances through
    // it. This entry point proves spec loading, commissioner bootstrap,
    // and pairing-code generation end to end.

    let pairing_code = generate_pairing_code(config.matter.discriminator, config.matter.passcode);
    info!(
        "manual pairing code: {pairing_code} (vendor {:#06x}, product {:#06x}, discriminator {})",
        config.matter.vendor_id, config.matter.product_id, config.matter.discriminator
    );

    info!("controller idle; waiting for shutdown signal");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }
    info!("shutting down");
}
