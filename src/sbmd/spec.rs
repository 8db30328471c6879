//! Typed in-memory model for a parsed SBMD bundle.
//!
//! Nothing here talks to YAML or the Matter stack; `parser.rs` builds these
//! types, `driver::spec_based` and `script` consume them.

use std::collections::HashSet;

/// Vocabulary for the `modes` field on a resource. Unknown strings are
/// tolerated by the parser (logged, not rejected) but never appear here.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ResourceMode {
    Read,
    Write,
    Execute,
    Dynamic,
    EmitEvents,
    LazySaveNext,
    Sensitive,
}

impl ResourceMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            "execute" => Some(Self::Execute),
            "dynamic" => Some(Self::Dynamic),
            "emitEvents" => Some(Self::EmitEvents),
            "lazySaveNext" => Some(Self::LazySaveNext),
            "sensitive" => Some(Self::Sensitive),
            _ => None,
        }
    }
}

bitflags::bitflags! {
    /// Bitmask form of `ResourceMode`, mirroring `ConvertModesToBitmask` in the
    /// original driver. `EXECUTABLE` is always OR'd in when an `execute`
    /// sub-mapper is bound, regardless of what `modes` spells out.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct ModeBits: u8 {
        const READABLE      = 1 << 0;
        const WRITEABLE     = 1 << 1;
        const EXECUTABLE    = 1 << 2;
        const DYNAMIC       = 1 << 3;
        const EMITS_EVENTS  = 1 << 4;
        const LAZY_SAVE     = 1 << 5;
        const SENSITIVE     = 1 << 6;
    }
}

impl From<ResourceMode> for ModeBits {
    fn from(m: ResourceMode) -> Self {
        match m {
            ResourceMode::Read => ModeBits::READABLE,
            ResourceMode::Write => ModeBits::WRITEABLE,
            ResourceMode::Execute => ModeBits::EXECUTABLE,
            ResourceMode::Dynamic => ModeBits::DYNAMIC,
            ResourceMode::EmitEvents => ModeBits::EMITS_EVENTS,
            ResourceMode::LazySaveNext => ModeBits::LAZY_SAVE,
            ResourceMode::Sensitive => ModeBits::SENSITIVE,
        }
    }
}

/// An attribute carrier: identifies one Matter attribute on one cluster.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct SbmdAttribute {
    pub cluster_id: u32,
    pub attribute_id: u32,
    pub name: String,
    pub attribute_type: String,
    pub feature_map: Option<u32>,
}

/// A single named argument to a command.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct SbmdArgument {
    pub name: String,
    pub argument_type: String,
}

/// A command carrier: identifies one Matter command on one cluster.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct SbmdCommand {
    pub cluster_id: u32,
    pub command_id: u32,
    pub name: String,
    pub timed_invoke_timeout_ms: Option<u16>,
    pub args: Vec<SbmdArgument>,
}

/// What a sub-mapper binds to. Exactly one carrier per leaf; see
/// `parser::parse_mapper_leaf` for the enforcement.
#[derive(Clone, Debug)]
pub enum MapperCarrier {
    Attribute(SbmdAttribute),
    Command(SbmdCommand),
    /// Write-command-set: a resource write chooses among several commands.
    Commands(Vec<SbmdCommand>),
}

/// One leaf of a mapper (`read`, `write`, or `execute`): a carrier plus the
/// script(s) that translate between Matter wire data and a Barton string.
#[derive(Clone, Debug)]
pub struct SbmdMapperLeaf {
    pub carrier: MapperCarrier,
    pub script: String,
    /// Only meaningful for `execute`: maps a command's reply TLV to a string.
    pub script_response: Option<String>,
}

/// The three independent sub-mappers a resource may declare.
#[derive(Clone, Debug, Default)]
pub struct SbmdMapper {
    pub read: Option<SbmdMapperLeaf>,
    pub write: Option<SbmdMapperLeaf>,
    pub execute: Option<SbmdMapperLeaf>,
}

impl SbmdMapper {
    pub fn has_read(&self) -> bool {
        self.read.is_some()
    }

    pub fn has_execute(&self) -> bool {
        self.execute.is_some()
    }

    /// True iff the read mapper is attribute-backed (drives the "always
    /// cached" caching policy).
    pub fn has_attribute_read(&self) -> bool {
        matches!(
            &self.read,
            Some(SbmdMapperLeaf {
                carrier: MapperCarrier::Attribute(_),
                ..
            })
        )
    }
}

/// One resource declaration: device-level or under an endpoint.
#[derive(Clone, Debug)]
pub struct SbmdResource {
    pub id: String,
    pub resource_type: String,
    pub modes: Vec<ResourceMode>,
    pub mapper: SbmdMapper,
    /// Inherited from the parent `SbmdEndpoint`; `None` for device-level
    /// resources.
    pub resource_endpoint_id: Option<String>,
}

impl SbmdResource {
    /// Mode bitmask per §4.3: the explicit `modes` plus the executable bit
    /// whenever an `execute` sub-mapper is bound.
    pub fn mode_bitmask(&self) -> ModeBits {
        let mut bits = self
            .modes
            .iter()
            .fold(ModeBits::empty(), |acc, m| acc | ModeBits::from(*m));
        if self.mapper.has_execute() {
            bits |= ModeBits::EXECUTABLE;
        }
        bits
    }

    /// Resource URI as constructed by `RegisterResources`/`OnAttributeChanged`.
    pub fn uri(&self, device_id: &str) -> String {
        match &self.resource_endpoint_id {
            Some(ep) => format!("{device_id}/ep/{ep}/r/{}", self.id),
            None => format!("{device_id}/r/{}", self.id),
        }
    }
}

/// One endpoint declaration grouping resources under a profile.
#[derive(Clone, Debug)]
pub struct SbmdEndpoint {
    pub id: String,
    pub profile: String,
    pub profile_version: u32,
    pub resources: Vec<SbmdResource>,
}

#[derive(Clone, Debug)]
pub struct SbmdBartonMeta {
    pub device_class: String,
    pub device_class_version: u32,
}

#[derive(Clone, Debug)]
pub struct SbmdMatterMeta {
    pub device_types: Vec<u16>,
    pub revision: u32,
    pub feature_clusters: Vec<u32>,
}

#[derive(Clone, Copy, Debug)]
pub struct SbmdReporting {
    pub min_secs: u16,
    pub max_secs: u16,
}

/// The fully parsed, immutable-after-parse spec bundle.
#[derive(Clone, Debug)]
pub struct SbmdSpec {
    pub schema_version: String,
    pub driver_version: String,
    pub name: String,
    pub script_type: String,
    pub barton_meta: SbmdBartonMeta,
    pub matter_meta: SbmdMatterMeta,
    pub reporting: SbmdReporting,
    pub resources: Vec<SbmdResource>,
    pub endpoints: Vec<SbmdEndpoint>,
    /// Source file this spec was parsed from, kept for diagnostics.
    pub source_file: String,
}

impl SbmdSpec {
    /// All resources, device-level and per-endpoint, in declaration order.
    pub fn all_resources(&self) -> impl Iterator<Item = &SbmdResource> {
        self.resources
            .iter()
            .chain(self.endpoints.iter().flat_map(|ep| ep.resources.iter()))
    }

    /// The set of Matter device types this spec claims, for driver-factory
    /// device-type intersection checks.
    pub fn device_type_set(&self) -> HashSet<u16> {
        self.matter_meta.device_types.iter().copied().collect()
    }

    /// Per §4.3's `RegisterResources`: one descriptor per resource this spec
    /// declares, device-level and per-endpoint, carrying everything the
    /// device-service needs to create its side of the resource — this core
    /// only hands over the data; the device-service itself is an external
    /// collaborator (§1) this crate doesn't model.
    pub fn resource_descriptors(&self, device_id: &str) -> Vec<ResourceDescriptor> {
        self.all_resources()
            .map(|r| ResourceDescriptor {
                uri: r.uri(device_id),
                resource_type: r.resource_type.clone(),
                modes: r.mode_bitmask(),
                always_cached: r.mapper.has_attribute_read(),
            })
            .collect()
    }
}

/// What `RegisterResources` hands to the device-service for one resource:
/// its URI, declared type, mode bitmask (with `EXECUTABLE` already OR'd in
/// per §4.3), and caching policy ("always cached" iff the resource has an
/// attribute-backed read mapper, "never cached" otherwise).
#[derive(Clone, Debug)]
pub struct ResourceDescriptor {
    pub uri: String,
    pub resource_type: String,
    pub modes: ModeBits,
    pub always_cached: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attribute_read_resource(id: &str, endpoint: Option<&str>) -> SbmdResource {
        SbmdResource {
            id: id.into(),
            resource_type: "bool".into(),
            modes: vec![ResourceMode::Read],
            mapper: SbmdMapper {
                read: Some(SbmdMapperLeaf {
                    carrier: MapperCarrier::Attribute(SbmdAttribute {
                        cluster_id: 0x0006,
                        attribute_id: 0x0000,
                        name: "OnOff".into(),
                        attribute_type: "bool".into(),
                        feature_map: None,
                    }),
                    script: "return {output: 'x'};".into(),
                    script_response: None,
                }),
                write: None,
                execute: None,
            },
            resource_endpoint_id: endpoint.map(str::to_string),
        }
    }

    fn execute_only_resource(id: &str) -> SbmdResource {
        SbmdResource {
            id: id.into(),
            resource_type: "command".into(),
            modes: vec![],
            mapper: SbmdMapper {
                read: None,
                write: None,
                execute: Some(SbmdMapperLeaf {
                    carrier: MapperCarrier::Command(SbmdCommand {
                        cluster_id: 0x0050,
                        command_id: 0x0000,
                        name: "PlayUrl".into(),
                        timed_invoke_timeout_ms: None,
                        args: vec![],
                    }),
                    script: "return {output: {}};".into(),
                    script_response: None,
                }),
            },
            resource_endpoint_id: None,
        }
    }

    #[test]
    fn execute_sub_mapper_forces_executable_bit_even_without_explicit_mode() {
        let resource = execute_only_resource("playUrl");
        assert!(resource.mode_bitmask().contains(ModeBits::EXECUTABLE));
    }

    #[test]
    fn attribute_backed_read_is_always_cached_others_are_never_cached() {
        let cached = attribute_read_resource("isOn", Some("1"));
        let uncached = execute_only_resource("playUrl");
        assert!(cached.mapper.has_attribute_read());
        assert!(!uncached.mapper.has_attribute_read());
    }

    #[test]
    fn resource_uri_nests_under_endpoint_only_when_present() {
        let device_level = attribute_read_resource("isOn", None);
        let endpoint_scoped = attribute_read_resource("isOn", Some("1"));
        assert_eq!(device_level.uri("dev-1"), "dev-1/r/isOn");
        assert_eq!(endpoint_scoped.uri("dev-1"), "dev-1/ep/1/r/isOn");
    }

    #[test]
    fn resource_descriptors_carry_caching_policy_and_mode_bitmask() {
        let spec = SbmdSpec {
            schema_version: "1".into(),
            driver_version: "1".into(),
            name: "test".into(),
            script_type: "javascript".into(),
            barton_meta: SbmdBartonMeta {
                device_class: "light".into(),
                device_class_version: 1,
            },
            matter_meta: SbmdMatterMeta {
                device_types: vec![0x0100],
                revision: 1,
                feature_clusters: vec![],
            },
            reporting: SbmdReporting {
                min_secs: 1,
                max_secs: 60,
            },
            resources: vec![attribute_read_resource("isOn", None), execute_only_resource("playUrl")],
            endpoints: vec![],
            source_file: "test.sbmd".into(),
        };

        let descriptors = spec.resource_descriptors("dev-1");
        assert_eq!(descriptors.len(), 2);

        let on_off = descriptors.iter().find(|d| d.uri == "dev-1/r/isOn").unwrap();
        assert!(on_off.always_cached);
        assert!(on_off.modes.contains(ModeBits::READABLE));

        let play_url = descriptors.iter().find(|d| d.uri == "dev-1/r/playUrl").unwrap();
        assert!(!play_url.always_cached);
        assert!(play_url.modes.contains(ModeBits::EXECUTABLE));
    }
}
