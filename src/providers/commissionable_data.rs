//! Commissioning-time configuration surfaces: the PASE/CASE parameters a
//! commissioner needs to announce itself (`CommissionableDataProvider`) and
//! the network credentials it hands a newly joined node
//! (`NetworkCredentialsProvider`). Both are "consumed, not defined here"
//! per §6 — spake2p verifier computation and credential storage are
//! the embedding application's concern, this crate only reads the result.

use crate::error::{DriverError, Result};

/// Parameters needed to advertise and verify a PASE session: discriminator,
/// setup passcode, and the spake2p verifier triple. A concrete provider may
/// compute these once (e.g. via the SDK's own spake2p helpers) and cache
/// them; this crate treats them as opaque inputs.
pub trait CommissionableDataProvider: Send + Sync {
    fn discriminator(&self) -> Result<u16>;
    fn setup_passcode(&self) -> Result<u32>;
    /// Base64 spake2p salt, verifier, and iteration count, if the embedding
    /// application has computed them. `None` means the commissioner should
    /// fall back to the SDK's own default test-key derivation.
    fn spake2p_params(&self) -> Result<Option<Spake2pParams>>;
}

#[derive(Clone, Debug)]
pub struct Spake2pParams {
    pub salt_base64: String,
    pub verifier_base64: String,
    pub iteration_count: u32,
}

/// Supplies network join credentials at commissioning time. Optional by
/// design — a controller commissioning an already-networked device (e.g.
/// over an existing IP link) never calls this.
pub trait NetworkCredentialsProvider: Send + Sync {
    fn wifi_credentials(&self) -> Result<Option<WifiCredentials>>;
    fn thread_operational_dataset(&self) -> Result<Option<Vec<u8>>>;
}

#[derive(Clone, Debug)]
pub struct WifiCredentials {
    pub ssid: String,
    pub psk: String,
}

/// Reads discriminator/passcode from `config::MatterConfig`; spake2p
/// parameters and network credentials are optional overrides set up front.
pub struct StaticCommissionableDataProvider {
    discriminator: u16,
    passcode: u32,
    spake2p: Option<Spake2pParams>,
    wifi: Option<WifiCredentials>,
    thread_dataset: Option<Vec<u8>>,
}

impl StaticCommissionableDataProvider {
    pub fn new(matter: &crate::config::MatterConfig) -> Self {
        Self {
            discriminator: matter.discriminator,
            passcode: matter.passcode,
            spake2p: None,
            wifi: None,
            thread_dataset: None,
        }
    }

    pub fn with_spake2p_params(mut self, params: Spake2pParams) -> Self {
        self.spake2p = Some(params);
        self
    }

    pub fn with_wifi_credentials(mut self, ssid: impl Into<String>, psk: impl Into<String>) -> Self {
        self.wifi = Some(WifiCredentials {
            ssid: ssid.into(),
            psk: psk.into(),
        });
        self
    }

    pub fn with_thread_dataset(mut self, dataset: Vec<u8>) -> Self {
        self.thread_dataset = Some(dataset);
        self
    }
}

impl CommissionableDataProvider for StaticCommissionableDataProvider {
    fn discriminator(&self) -> Result<u16> {
        Ok(self.discriminator)
    }

    fn setup_passcode(&self) -> Result<u32> {
        if self.passcode == 0 {
            return Err(DriverError::Configuration("setup passcode must be non-zero".into()));
        }
        Ok(self.passcode)
    }

    fn spake2p_params(&self) -> Result<Option<Spake2pParams>> {
        Ok(self.spake2p.clone())
    }
}

impl NetworkCredentialsProvider for StaticCommissionableDataProvider {
    fn wifi_credentials(&self) -> Result<Option<WifiCredentials>> {
        Ok(self.wifi.clone())
    }

    fn thread_operational_dataset(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.thread_dataset.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matter_config() -> crate::config::MatterConfig {
        crate::config::MatterConfig {
            vendor_id: 0xFFF1,
            product_id: 0x8001,
            discriminator: 3840,
            passcode: 20202021,
        }
    }

    #[test]
    fn zero_passcode_is_a_configuration_error() {
        let mut matter = matter_config();
        matter.passcode = 0;
        let provider = StaticCommissionableDataProvider::new(&matter);
        assert!(provider.setup_passcode().is_err());
    }

    #[test]
    fn spake2p_params_default_to_none() {
        let provider = StaticCommissionableDataProvider::new(&matter_config());
        assert!(provider.spake2p_params().unwrap().is_none());
    }

    #[test]
    fn wifi_credentials_round_trip() {
        let provider = StaticCommissionableDataProvider::new(&matter_config())
            .with_wifi_credentials("home-ap", "hunter2");
        let creds = provider.wifi_credentials().unwrap().unwrap();
        assert_eq!(creds.ssid, "home-ap");
        assert_eq!(creds.psk, "hunter2");
    }
}
