use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Load environment variables from .env file with robust parsing.
/// Handles values with spaces without requiring quotes.
pub fn load_dotenv() {
    let env_path = Path::new(".env");
    if !env_path.exists() {
        return;
    }

    let content = match fs::read_to_string(env_path) {
        Ok(c) => c,
        Err(_) => return,
    };

    for line in content.lines() {
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // Find the first '=' and split there
        if let Some(eq_pos) = line.find('=') {
            let key = line[..eq_pos].trim();
            let mut value = line[eq_pos + 1..].trim();

            // Remove surrounding quotes if present
            if (value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\''))
            {
                value = &value[1..value.len() - 1];
            }

            // Only set if not already set (env vars take precedence)
            if std::env::var(key).is_err() {
                // SAFETY: We're single-threaded at this point (called before any async runtime)
                unsafe { std::env::set_var(key, value) };
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub sbmd: SbmdConfig,
    pub matter: MatterConfig,
    pub persistence: PersistenceConfig,
}

/// Where SBMD spec bundles live and how drivers report timing to the
/// commissioning framework.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SbmdConfig {
    /// Directory enumerated for `*.sbmd` files at startup.
    pub spec_dir: PathBuf,
    /// Device-service comm-fail judgment timeout; subscription ceilings are
    /// always negotiated strictly below this value.
    pub comm_fail_timeout_secs: u16,
}

/// Manual-pairing-code fields used when no out-of-band commissionable-data
/// provider is wired in (see `providers::commissionable_data`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatterConfig {
    pub vendor_id: u16,
    pub product_id: u16,
    pub discriminator: u16,
    pub passcode: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Directory (relative to the user's home) holding fabric/ACL/node-id
    /// persisted state.
    pub dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sbmd: SbmdConfig {
                spec_dir: PathBuf::from("/etc/matter-sbmd/specs"),
                comm_fail_timeout_secs: 3600,
            },
            matter: MatterConfig {
                vendor_id: 0xFFF1,
                product_id: 0x8001,
                discriminator: 3840,
                passcode: 20202021,
            },
            persistence: PersistenceConfig {
                dir: PathBuf::from(".config/matter-sbmd-driver"),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("SBMD_SPEC_DIR") {
            config.sbmd.spec_dir = PathBuf::from(dir);
        }
        if let Ok(secs) = std::env::var("SBMD_COMM_FAIL_TIMEOUT_SECS")
            && let Ok(s) = secs.parse()
        {
            config.sbmd.comm_fail_timeout_secs = s;
        }
        if let Ok(vid) = std::env::var("MATTER_VENDOR_ID")
            && let Ok(v) = vid.parse()
        {
            config.matter.vendor_id = v;
        }
        if let Ok(pid) = std::env::var("MATTER_PRODUCT_ID")
            && let Ok(p) = pid.parse()
        {
            config.matter.product_id = p;
        }
        if let Ok(discriminator) = std::env::var("MATTER_DISCRIMINATOR")
            && let Ok(d) = discriminator.parse()
        {
            config.matter.discriminator = d;
        }
        if let Ok(passcode) = std::env::var("MATTER_PASSCODE")
            && let Ok(p) = passcode.parse()
        {
            config.matter.passcode = p;
        }
        if let Ok(dir) = std::env::var("MATTER_PERSIST_DIR") {
            config.persistence.dir = PathBuf::from(dir);
        }

        config
    }
}
