//! Loads a directory of `*.sbmd` bundles into a registry and claims
//! commissioned devices against it.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use crate::error::{DriverError, Result};
use crate::sbmd::parser::parse_spec_file;
use crate::sbmd::spec::SbmdSpec;

/// One file that failed to load, and why. Loading a directory never aborts
/// on a single bad file — broken specs are reported, not fatal.
pub struct LoadFailure {
    pub path: String,
    pub error: DriverError,
}

pub struct LoadReport {
    pub loaded: usize,
    pub failures: Vec<LoadFailure>,
}

/// All specs successfully loaded from a directory, keyed for device-type
/// claim lookups.
pub struct SbmdRegistry {
    specs: Vec<Arc<SbmdSpec>>,
}

impl SbmdRegistry {
    /// Load every `*.sbmd` file directly under `dir` (non-recursive).
    /// Two specs declaring the same `(deviceClass, deviceClassVersion)`
    /// pair is a hard conflict and rejects the second file; two specs
    /// whose device-type sets overlap are likewise rejected (spec.md
    /// §4.2: "Driver registration rejects duplicate device-class/
    /// device-type-set conflicts") since an overlapping claim is
    /// ambiguous regardless of which file happened to load first.
    pub fn load_dir(dir: &Path) -> Result<(Self, LoadReport)> {
        let mut entries: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("sbmd"))
            .collect();
        entries.sort();

        let mut specs: Vec<Arc<SbmdSpec>> = Vec::new();
        let mut failures = Vec::new();
        let mut seen_classes: HashMap<(String, u32), String> = HashMap::new();

        for path in entries {
            let display = path.display().to_string();
            let spec = match parse_spec_file(&path) {
                Ok(spec) => spec,
                Err(error) => {
                    failures.push(LoadFailure { path: display, error });
                    continue;
                }
            };

            let class_key = (spec.barton_meta.device_class.clone(), spec.barton_meta.device_class_version);
            if let Some(existing) = seen_classes.get(&class_key) {
                failures.push(LoadFailure {
                    path: display.clone(),
                    error: DriverError::ParseValidation {
                        file: display,
                        reason: format!(
                            "device class '{}' v{} already registered by {existing}",
                            class_key.0, class_key.1
                        ),
                    },
                });
                continue;
            }

            if let Some(existing) = specs
                .iter()
                .find(|existing: &&Arc<SbmdSpec>| !spec.device_type_set().is_disjoint(&existing.device_type_set()))
            {
                failures.push(LoadFailure {
                    path: display.clone(),
                    error: DriverError::ParseValidation {
                        file: display,
                        reason: format!(
                            "device type set overlaps already-registered {}",
                            existing.source_file
                        ),
                    },
                });
                continue;
            }

            seen_classes.insert(class_key, spec.source_file.clone());
            specs.push(Arc::new(spec));
        }

        let loaded = specs.len();
        Ok((Self { specs }, LoadReport { loaded, failures }))
    }

    pub fn specs(&self) -> &[Arc<SbmdSpec>] {
        &self.specs
    }

    /// Claim a device against a reported Matter device-type list: the
    /// first registered spec whose device types intersect wins.
    pub fn claim_device(&self, reported_device_types: &[u16]) -> Option<Arc<SbmdSpec>> {
        let reported: HashSet<u16> = reported_device_types.iter().copied().collect();
        self.specs
            .iter()
            .find(|spec| !spec.device_type_set().is_disjoint(&reported))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_spec(dir: &Path, name: &str, device_class: &str, device_types: &[&str]) {
        let types = device_types
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let contents = format!(
            r#"
schemaVersion: "1.0"
driverVersion: "1.0"
name: "{name}"
scriptType: "JavaScript"
bartonMeta: {{ deviceClass: "{device_class}", deviceClassVersion: 1 }}
matterMeta: {{ deviceTypes: [{types}], revision: 1 }}
reporting: {{ minSecs: 1, maxSecs: 60 }}
resources:
  - id: "isOn"
    type: "boolean"
    modes: ["read"]
    mapper:
      read:
        attribute: {{ clusterId: "0x0006", attributeId: "0x0000", name: "OnOff", type: "bool" }}
        script: "return {{output: 'x'}};"
"#
        );
        std::fs::File::create(dir.join(name))
            .unwrap()
            .write_all(contents.as_bytes())
            .unwrap();
    }

    #[test]
    fn loads_every_sbmd_file_in_directory() {
        let dir = tempdir();
        write_spec(dir.path(), "light.sbmd", "light", &["0x0100"]);
        write_spec(dir.path(), "plug.sbmd", "plug", &["0x010A"]);
        std::fs::write(dir.path().join("README.txt"), "not a spec").unwrap();

        let (registry, report) = SbmdRegistry::load_dir(dir.path()).unwrap();
        assert_eq!(report.loaded, 2);
        assert!(report.failures.is_empty());
        assert_eq!(registry.specs().len(), 2);
    }

    #[test]
    fn duplicate_device_class_version_is_a_load_failure() {
        let dir = tempdir();
        write_spec(dir.path(), "a.sbmd", "light", &["0x0100"]);
        write_spec(dir.path(), "b.sbmd", "light", &["0x0101"]);

        let (registry, report) = SbmdRegistry::load_dir(dir.path()).unwrap();
        assert_eq!(report.loaded, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(registry.specs().len(), 1);
    }

    #[test]
    fn overlapping_device_type_set_is_a_load_failure() {
        let dir = tempdir();
        write_spec(dir.path(), "a.sbmd", "light", &["0x0100"]);
        write_spec(dir.path(), "b.sbmd", "dimmer", &["0x0100", "0x0101"]);

        let (registry, report) = SbmdRegistry::load_dir(dir.path()).unwrap();
        assert_eq!(report.loaded, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(registry.specs().len(), 1);
        assert_eq!(registry.specs()[0].barton_meta.device_class, "light");
    }

    #[test]
    fn claim_device_picks_first_matching_spec() {
        let dir = tempdir();
        write_spec(dir.path(), "light.sbmd", "light", &["0x0100"]);
        write_spec(dir.path(), "plug.sbmd", "plug", &["0x010A"]);

        let (registry, _) = SbmdRegistry::load_dir(dir.path()).unwrap();
        let claimed = registry.claim_device(&[0x010A]).unwrap();
        assert_eq!(claimed.barton_meta.device_class, "plug");
        assert!(registry.claim_device(&[0x9999]).is_none());
    }

    /// Minimal temp-dir helper; avoids pulling in a dev-dependency just for
    /// directory fixtures.
    fn tempdir() -> TempDir {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!("sbmd-factory-test-{}-{n}", std::process::id()));
        std::fs::create_dir_all(&path).unwrap();
        TempDir { path }
    }

    struct TempDir {
        path: std::path::PathBuf,
    }

    impl TempDir {
        fn path(&self) -> &Path {
            &self.path
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}
