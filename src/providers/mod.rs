//! Thin facades over the configuration surfaces the commissioner needs but
//! does not define (§6): device instance info, commissionable data, the
//! device attestation certificate, and the single token kind attestation
//! needs. Each is a trait so the embedding application can substitute its
//! own provider (e.g. reading from secure storage) without this crate
//! depending on how that storage works — the same boundary `transport.rs`
//! draws around the Matter SDK itself.

pub mod commissionable_data;
pub mod dac;
pub mod device_instance_info;
pub mod token;

pub use commissionable_data::{CommissionableDataProvider, StaticCommissionableDataProvider};
pub use dac::{DeviceAttestationCertificateProvider, StaticDacProvider};
pub use device_instance_info::{ConfigDeviceInstanceInfoProvider, DeviceInstanceInfoProvider};
pub use token::{StaticTokenProvider, TokenKind, TokenProvider};
