//! Matter SBMD driver runtime.
//!
//! A Matter (CHIP) fabric controller core that drives commissioned devices
//! through declarative, spec-driven "schema-based Matter driver" (SBMD)
//! bundles: a YAML-described resource model, a scripted TLV<->string
//! mapping layer, a per-device attribute cache, and a backoff-driven
//! subscription state machine. Fabric management, PASE/CASE session
//! establishment, and the wire transport are the embedding Matter SDK's
//! job — see `transport` for the boundary this core expects from it.

#![allow(dead_code)]

pub mod cache;
pub mod commissioning;
pub mod config;
pub mod device;
pub mod driver;
pub mod error;
pub mod instance_lock;
pub mod providers;
pub mod sbmd;
pub mod script;
pub mod subscription;
pub mod tlv;
pub mod transport;
