//! Device attestation certificate facade.
//!
//! Attestation *verification* is the Matter SDK's job (§1); this crate
//! only needs somewhere to read the certificate chain and certification
//! declaration a concrete session-establishment flow asks for. Signing with
//! the DAC private key likewise happens inside the SDK — this provider
//! hands back DER-encoded bytes, never a key the core could mishandle.
use crate::error::{DriverError, Result};

pub trait DeviceAttestationCertificateProvider: Send + Sync {
    /// DER-encoded Device Attestation Certificate.
    fn dac_cert(&self) -> Result<Vec<u8>>;

    /// DER-encoded Product Attestation Intermediate certificate.
    fn pai_cert(&self) -> Result<Vec<u8>>;

    /// The Certification Declaration, as issued by the Connectivity
    /// Standards Alliance for this product.
    fn certification_declaration(&self) -> Result<Vec<u8>>;

    /// Firmware information included in the attestation elements, if any.
    fn firmware_information(&self) -> Result<Option<Vec<u8>>>;
}

/// Holds a fixed chain loaded once at startup (e.g. from files under the
/// persistence directory). Returns a `Configuration` error for any
/// component that wasn't supplied — a commissioner that never completes
/// attestation simply never calls the missing accessor.
#[derive(Default)]
pub struct StaticDacProvider {
    dac_cert: Option<Vec<u8>>,
    pai_cert: Option<Vec<u8>>,
    certification_declaration: Option<Vec<u8>>,
    firmware_information: Option<Vec<u8>>,
}

impl StaticDacProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dac_cert(mut self, dac_cert: Vec<u8>) -> Self {
        self.dac_cert = Some(dac_cert);
        self
    }

    pub fn with_pai_cert(mut self, pai_cert: Vec<u8>) -> Self {
        self.pai_cert = Some(pai_cert);
        self
    }

    pub fn with_certification_declaration(mut self, cd: Vec<u8>) -> Self {
        self.certification_declaration = Some(cd);
        self
    }

    pub fn with_firmware_information(mut self, info: Vec<u8>) -> Self {
        self.firmware_information = Some(info);
        self
    }
}

impl DeviceAttestationCertificateProvider for StaticDacProvider {
    fn dac_cert(&self) -> Result<Vec<u8>> {
        self.dac_cert
            .clone()
            .ok_or_else(|| DriverError::Configuration("no DAC certificate configured".into()))
    }

    fn pai_cert(&self) -> Result<Vec<u8>> {
        self.pai_cert
            .clone()
            .ok_or_else(|| DriverError::Configuration("no PAI certificate configured".into()))
    }

    fn certification_declaration(&self) -> Result<Vec<u8>> {
        self.certification_declaration
            .clone()
            .ok_or_else(|| DriverError::Configuration("no certification declaration configured".into()))
    }

    fn firmware_information(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.firmware_information.clone())
    }
}
