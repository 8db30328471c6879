//! Device instance information: the static identity fields a commissioner
//! reports on its own Basic Information cluster and folds into the
//! `barton-matter-*` metadata the DeviceInstanceInfoProvider surface exposes
//! upstream. Backed by `PropertyProvider` per §6; this crate only
//! consumes the values, it does not define where they come from.

use crate::error::Result;

/// Static identity a commissioner reports about itself. Every field here
/// maps onto a `PropertyProvider` key the embedding application is expected
/// to supply; a missing required property is a `Configuration` error, never
/// guessed.
pub trait DeviceInstanceInfoProvider: Send + Sync {
    fn vendor_id(&self) -> Result<u16>;
    fn vendor_name(&self) -> Result<String>;
    fn product_id(&self) -> Result<u16>;
    fn product_name(&self) -> Result<String>;
    fn hardware_version(&self) -> Result<u16>;
    fn software_version(&self) -> Result<u32>;
    fn software_version_string(&self) -> Result<String>;
    /// `None` when the embedding application has not assigned one yet.
    fn serial_number(&self) -> Result<Option<String>>;
}

/// Reads instance info straight out of `config::MatterConfig` plus a handful
/// of build-time constants. Sufficient for a single-binary deployment where
/// the embedding application doesn't have its own property store; a richer
/// deployment swaps in its own `DeviceInstanceInfoProvider`.
pub struct ConfigDeviceInstanceInfoProvider {
    vendor_id: u16,
    product_id: u16,
    vendor_name: String,
    product_name: String,
    hardware_version: u16,
    software_version: u32,
    software_version_string: String,
    serial_number: Option<String>,
}

impl ConfigDeviceInstanceInfoProvider {
    pub fn new(matter: &crate::config::MatterConfig) -> Self {
        Self {
            vendor_id: matter.vendor_id,
            product_id: matter.product_id,
            vendor_name: "Barton".into(),
            product_name: "Matter SBMD Controller".into(),
            hardware_version: 1,
            software_version: 1,
            software_version_string: env!("CARGO_PKG_VERSION").into(),
            serial_number: None,
        }
    }

    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }
}

impl DeviceInstanceInfoProvider for ConfigDeviceInstanceInfoProvider {
    fn vendor_id(&self) -> Result<u16> {
        Ok(self.vendor_id)
    }

    fn vendor_name(&self) -> Result<String> {
        Ok(self.vendor_name.clone())
    }

    fn product_id(&self) -> Result<u16> {
        Ok(self.product_id)
    }

    fn product_name(&self) -> Result<String> {
        Ok(self.product_name.clone())
    }

    fn hardware_version(&self) -> Result<u16> {
        Ok(self.hardware_version)
    }

    fn software_version(&self) -> Result<u32> {
        Ok(self.software_version)
    }

    fn software_version_string(&self) -> Result<String> {
        Ok(self.software_version_string.clone())
    }

    fn serial_number(&self) -> Result<Option<String>> {
        Ok(self.serial_number.clone())
    }
}
