//! Parses an SBMD YAML bundle into a [`SbmdSpec`].
//!
//! Deliberately walks a `serde_yaml::Value` tree by hand instead of deriving
//! `Deserialize` on the typed model: the mapper-leaf carrier rules (§3's
//! "exactly one of attribute/command/commands") and the numeric hex/decimal
//! dual format aren't expressible as a plain derive, and every rejection
//! needs to name the offending section for the caller.

use std::path::Path;

use serde_yaml::Value;

use crate::error::{DriverError, Result};
use crate::sbmd::spec::{
    MapperCarrier, ResourceMode, SbmdArgument, SbmdAttribute, SbmdBartonMeta, SbmdCommand,
    SbmdEndpoint, SbmdMapper, SbmdMapperLeaf, SbmdMatterMeta, SbmdReporting, SbmdResource,
    SbmdSpec,
};

fn fail(file: &str, reason: impl Into<String>) -> DriverError {
    DriverError::ParseValidation {
        file: file.to_string(),
        reason: reason.into(),
    }
}

/// Parse a `0x`/`0X`-prefixed hex string or a plain decimal string into a
/// `u32`. Any other form, or a value that overflows the requested width, is
/// a hard failure (the original driver logs-and-zeroes; this design
/// tightens that into a rejection, see DESIGN.md).
fn parse_hex_or_decimal(file: &str, field: &str, s: &str) -> Result<u32> {
    let s = s.trim();
    let (digits, radix) = if let Some(rest) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))
    {
        (rest, 16)
    } else {
        (s, 10)
    };
    u32::from_str_radix(digits, radix)
        .map_err(|_| fail(file, format!("{field}: '{s}' is not valid hex or decimal")))
}

fn parse_u16_field(file: &str, field: &str, s: &str) -> Result<u16> {
    let v = parse_hex_or_decimal(file, field, s)?;
    u16::try_from(v).map_err(|_| fail(file, format!("{field}: '{s}' exceeds 16-bit range")))
}

fn value_to_numeric_string(file: &str, field: &str, v: &Value) -> Result<String> {
    match v {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(fail(file, format!("{field}: expected a string or number"))),
    }
}

fn get<'a>(file: &str, map: &'a Value, key: &str) -> Result<&'a Value> {
    map.get(key)
        .ok_or_else(|| fail(file, format!("missing required field '{key}'")))
}

fn get_str(file: &str, map: &Value, key: &str) -> Result<String> {
    get(file, map, key)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| fail(file, format!("'{key}' must be a string")))
}

fn get_opt_str(map: &Value, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}

fn get_u32(file: &str, map: &Value, key: &str) -> Result<u32> {
    let v = get(file, map, key)?;
    let s = value_to_numeric_string(file, key, v)?;
    parse_hex_or_decimal(file, key, &s)
}

fn get_u16(file: &str, map: &Value, key: &str) -> Result<u16> {
    let v = get_u32(file, map, key)?;
    u16::try_from(v).map_err(|_| fail(file, format!("'{key}' exceeds 16-bit range")))
}

fn get_opt_u16(file: &str, map: &Value, key: &str) -> Result<Option<u16>> {
    let Some(v) = map.get(key) else {
        return Ok(None);
    };
    let s = value_to_numeric_string(file, key, v)?;
    Ok(Some(parse_u16_field(file, key, &s)?))
}

fn get_opt_u32(file: &str, map: &Value, key: &str) -> Result<Option<u32>> {
    let Some(v) = map.get(key) else {
        return Ok(None);
    };
    let s = value_to_numeric_string(file, key, v)?;
    Ok(Some(parse_hex_or_decimal(file, key, &s)?))
}

/// Parse `bartonMeta`.
fn parse_barton_meta(file: &str, root: &Value) -> Result<SbmdBartonMeta> {
    let m = get(file, root, "bartonMeta")?;
    Ok(SbmdBartonMeta {
        device_class: get_str(file, m, "deviceClass")?,
        device_class_version: get_u32(file, m, "deviceClassVersion")?,
    })
}

/// Parse `matterMeta`, including the device-type list (each entry hex or
/// decimal, stored as 16-bit).
fn parse_matter_meta(file: &str, root: &Value) -> Result<SbmdMatterMeta> {
    let m = get(file, root, "matterMeta")?;
    let types_val = get(file, m, "deviceTypes")?;
    let types = types_val
        .as_sequence()
        .ok_or_else(|| fail(file, "matterMeta.deviceTypes must be a list"))?;
    let mut device_types = Vec::with_capacity(types.len());
    for t in types {
        let s = value_to_numeric_string(file, "matterMeta.deviceTypes[]", t)?;
        device_types.push(parse_u16_field(file, "matterMeta.deviceTypes[]", &s)?);
    }
    if device_types.is_empty() {
        return Err(fail(file, "matterMeta.deviceTypes must not be empty"));
    }

    let revision = get_u32(file, m, "revision")?;

    let feature_clusters = match m.get("featureClusters") {
        Some(Value::Sequence(seq)) => {
            let mut out = Vec::with_capacity(seq.len());
            for c in seq {
                let s = value_to_numeric_string(file, "matterMeta.featureClusters[]", c)?;
                out.push(parse_hex_or_decimal(
                    file,
                    "matterMeta.featureClusters[]",
                    &s,
                )?);
            }
            out
        }
        Some(_) => return Err(fail(file, "matterMeta.featureClusters must be a list")),
        None => Vec::new(),
    };

    Ok(SbmdMatterMeta {
        device_types,
        revision,
        feature_clusters,
    })
}

fn parse_reporting(file: &str, root: &Value) -> Result<SbmdReporting> {
    let m = get(file, root, "reporting")?;
    Ok(SbmdReporting {
        min_secs: get_u16(file, m, "minSecs")?,
        max_secs: get_u16(file, m, "maxSecs")?,
    })
}

fn parse_argument(file: &str, v: &Value) -> Result<SbmdArgument> {
    Ok(SbmdArgument {
        name: get_str(file, v, "name")?,
        argument_type: get_str(file, v, "type")?,
    })
}

fn parse_attribute(file: &str, v: &Value) -> Result<SbmdAttribute> {
    Ok(SbmdAttribute {
        cluster_id: get_u32(file, v, "clusterId")?,
        attribute_id: get_u32(file, v, "attributeId")?,
        name: get_str(file, v, "name")?,
        attribute_type: get_str(file, v, "type")?,
        feature_map: get_opt_u32(file, v, "featureMap")?,
    })
}

fn parse_command(file: &str, v: &Value) -> Result<SbmdCommand> {
    let timed_invoke_timeout_ms = get_opt_u16(file, v, "timedInvokeTimeoutMs")?;

    let args = match v.get("args") {
        Some(Value::Sequence(seq)) => seq
            .iter()
            .map(|a| parse_argument(file, a))
            .collect::<Result<Vec<_>>>()?,
        Some(_) => return Err(fail(file, "command.args must be a list")),
        None => Vec::new(),
    };

    Ok(SbmdCommand {
        cluster_id: get_u32(file, v, "clusterId")?,
        command_id: get_u32(file, v, "commandId")?,
        name: get_str(file, v, "name")?,
        timed_invoke_timeout_ms,
        args,
    })
}

/// Parse one mapper leaf (`read`/`write`/`execute`), enforcing the
/// exactly-one-carrier rule from §3's table and the non-empty-script
/// invariant.
fn parse_mapper_leaf(
    file: &str,
    leaf_name: &str,
    allow_commands_list: bool,
    allow_single_command: bool,
    allow_attribute: bool,
    v: &Value,
) -> Result<SbmdMapperLeaf> {
    let has_attribute = v.get("attribute").is_some();
    let has_command = v.get("command").is_some();
    let has_commands = v.get("commands").is_some();

    let carrier_count = [has_attribute, has_command, has_commands]
        .iter()
        .filter(|b| **b)
        .count();
    if carrier_count != 1 {
        return Err(fail(
            file,
            format!("{leaf_name}: exactly one of attribute/command/commands is required"),
        ));
    }

    let carrier = if has_attribute {
        if !allow_attribute {
            return Err(fail(file, format!("{leaf_name}: attribute carrier not allowed here")));
        }
        MapperCarrier::Attribute(parse_attribute(file, get(file, v, "attribute")?)?)
    } else if has_command {
        if !allow_single_command {
            return Err(fail(file, format!("{leaf_name}: command carrier not allowed here")));
        }
        MapperCarrier::Command(parse_command(file, get(file, v, "command")?)?)
    } else {
        if !allow_commands_list {
            return Err(fail(
                file,
                format!("{leaf_name}: commands carrier not allowed here"),
            ));
        }
        let seq = get(file, v, "commands")?
            .as_sequence()
            .ok_or_else(|| fail(file, format!("{leaf_name}.commands must be a list")))?;
        if seq.is_empty() {
            return Err(fail(file, format!("{leaf_name}.commands must not be empty")));
        }
        let commands = seq
            .iter()
            .map(|c| parse_command(file, c))
            .collect::<Result<Vec<_>>>()?;
        MapperCarrier::Commands(commands)
    };

    let script = get_str(file, v, "script")?;
    if script.trim().is_empty() {
        return Err(fail(file, format!("{leaf_name}: script must not be empty")));
    }
    let script_response = get_opt_str(v, "scriptResponse");

    Ok(SbmdMapperLeaf {
        carrier,
        script,
        script_response,
    })
}

fn parse_mapper(file: &str, v: &Value) -> Result<SbmdMapper> {
    let read = v
        .get("read")
        .map(|leaf| parse_mapper_leaf(file, "mapper.read", false, false, true, leaf))
        .transpose()?;

    let write = v
        .get("write")
        .map(|leaf| parse_mapper_leaf(file, "mapper.write", true, true, true, leaf))
        .transpose()?;

    let execute = v
        .get("execute")
        .map(|leaf| parse_mapper_leaf(file, "mapper.execute", false, true, false, leaf))
        .transpose()?;

    Ok(SbmdMapper {
        read,
        write,
        execute,
    })
}

fn parse_modes(file: &str, v: &Value) -> Result<Vec<ResourceMode>> {
    let Some(seq) = v.get("modes").and_then(Value::as_sequence) else {
        return Ok(Vec::new());
    };
    let mut modes = Vec::with_capacity(seq.len());
    for m in seq {
        let s = m
            .as_str()
            .ok_or_else(|| fail(file, "modes[] must be strings"))?;
        match ResourceMode::parse(s) {
            Some(mode) => modes.push(mode),
            None => log::warn!("{file}: unknown resource mode '{s}', ignoring"),
        }
    }
    Ok(modes)
}

fn parse_resource(file: &str, v: &Value, resource_endpoint_id: Option<&str>) -> Result<SbmdResource> {
    let id = get_str(file, v, "id")?;
    let resource_type = get_str(file, v, "type")?;
    let modes = parse_modes(file, v)?;
    let mapper = parse_mapper(file, get(file, v, "mapper")?)?;

    // Every populated sub-mapper must carry a non-empty script; parse_mapper_leaf
    // already enforces this per-leaf, this is the aggregate invariant check.
    if mapper.read.is_none() && mapper.write.is_none() && mapper.execute.is_none() {
        return Err(fail(file, format!("resource '{id}': mapper has no sub-mappers")));
    }

    Ok(SbmdResource {
        id,
        resource_type,
        modes,
        mapper,
        resource_endpoint_id: resource_endpoint_id.map(str::to_string),
    })
}

fn parse_resources(
    file: &str,
    v: &Value,
    resource_endpoint_id: Option<&str>,
) -> Result<Vec<SbmdResource>> {
    let Some(seq) = v.as_sequence() else {
        return Err(fail(file, "resources must be a list"));
    };
    let resources = seq
        .iter()
        .map(|r| parse_resource(file, r, resource_endpoint_id))
        .collect::<Result<Vec<_>>>()?;

    let mut seen = std::collections::HashSet::new();
    for r in &resources {
        if !seen.insert(r.id.as_str()) {
            return Err(fail(
                file,
                format!("duplicate resource id '{}' in this scope", r.id),
            ));
        }
    }
    Ok(resources)
}

fn parse_endpoint(file: &str, v: &Value) -> Result<SbmdEndpoint> {
    let id = get_str(file, v, "id")?;
    let profile = get_str(file, v, "profile")?;
    let profile_version = get_u32(file, v, "profileVersion")?;
    let resources = match v.get("resources") {
        Some(r) => parse_resources(file, r, Some(id.as_str()))?,
        None => Vec::new(),
    };

    Ok(SbmdEndpoint {
        id,
        profile,
        profile_version,
        resources,
    })
}

/// Parse a full SBMD bundle from YAML text. `source_file` is used only for
/// diagnostics and is stamped onto the resulting spec.
pub fn parse_spec(source_file: &str, yaml: &str) -> Result<SbmdSpec> {
    let root: Value = serde_yaml::from_str(yaml)?;

    let name = get_str(source_file, &root, "name")?;
    let schema_version = get_str(source_file, &root, "schemaVersion")?;
    let driver_version = get_str(source_file, &root, "driverVersion")?;
    let script_type = get_str(source_file, &root, "scriptType")?;

    let barton_meta = parse_barton_meta(source_file, &root)?;
    let matter_meta = parse_matter_meta(source_file, &root)?;
    let reporting = parse_reporting(source_file, &root)?;

    let resources = match root.get("resources") {
        Some(r) => parse_resources(source_file, r, None)?,
        None => Vec::new(),
    };

    let endpoints = match root.get("endpoints") {
        Some(Value::Sequence(seq)) => seq
            .iter()
            .map(|e| parse_endpoint(source_file, e))
            .collect::<Result<Vec<_>>>()?,
        Some(_) => return Err(fail(source_file, "endpoints must be a list")),
        None => Vec::new(),
    };

    Ok(SbmdSpec {
        schema_version,
        driver_version,
        name,
        script_type,
        barton_meta,
        matter_meta,
        reporting,
        resources,
        endpoints,
        source_file: source_file.to_string(),
    })
}

/// Parse a spec bundle from a file path on disk.
pub fn parse_spec_file(path: &Path) -> Result<SbmdSpec> {
    let file = path.to_string_lossy().to_string();
    let contents = std::fs::read_to_string(path)?;
    parse_spec(&file, &contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml(extra_resources: &str) -> String {
        format!(
            r#"
schemaVersion: "1.0"
driverVersion: "1.0"
name: "test-driver"
scriptType: "JavaScript"
bartonMeta: {{ deviceClass: "testDevice", deviceClassVersion: 1 }}
matterMeta: {{ deviceTypes: ["0x0100"], revision: 2 }}
reporting: {{ minSecs: 1, maxSecs: 60 }}
resources:
{extra_resources}
"#
        )
    }

    #[test]
    fn parses_attribute_read_resource() {
        let yaml = minimal_yaml(
            r#"  - id: "isOn"
    type: "boolean"
    modes: ["read"]
    mapper:
      read:
        attribute: { clusterId: "0x0006", attributeId: "0x0000", name: "OnOff", type: "bool" }
        script: "return {output: sbmdReadArgs.input ? 'true' : 'false'};"
"#,
        );

        let spec = parse_spec("test.sbmd", &yaml).expect("parse should succeed");
        assert_eq!(spec.resources.len(), 1);
        assert!(spec.resources[0].mapper.has_attribute_read());
        assert_eq!(spec.matter_meta.device_types, vec![0x0100]);
    }

    #[test]
    fn rejects_mapper_leaf_with_no_carrier() {
        let yaml = minimal_yaml(
            r#"  - id: "isOn"
    type: "boolean"
    modes: ["read"]
    mapper:
      read:
        script: "return {output: 'x'};"
"#,
        );
        assert!(parse_spec("test.sbmd", &yaml).is_err());
    }

    #[test]
    fn rejects_leaf_with_both_attribute_and_command() {
        let yaml = minimal_yaml(
            r#"  - id: "isOn"
    type: "boolean"
    modes: ["write"]
    mapper:
      write:
        attribute: { clusterId: "0x0006", attributeId: "0x0000", name: "OnOff", type: "bool" }
        command: { clusterId: "0x0006", commandId: "0x0001", name: "On" }
        script: "return {output: null};"
"#,
        );
        assert!(parse_spec("test.sbmd", &yaml).is_err());
    }

    #[test]
    fn accepts_write_command_set() {
        let yaml = minimal_yaml(
            r#"  - id: "isOn"
    type: "boolean"
    modes: ["write"]
    mapper:
      write:
        commands:
          - { clusterId: "0x0006", commandId: "0x0000", name: "Off" }
          - { clusterId: "0x0006", commandId: "0x0001", name: "On" }
        script: "return {command: sbmdWriteArgs.input === 'true' ? 'On' : 'Off', output: null};"
"#,
        );
        let spec = parse_spec("test.sbmd", &yaml).expect("parse should succeed");
        match &spec.resources[0].mapper.write.as_ref().unwrap().carrier {
            MapperCarrier::Commands(cmds) => assert_eq!(cmds.len(), 2),
            _ => panic!("expected Commands carrier"),
        }
    }

    #[test]
    fn rejects_timed_invoke_timeout_overflow() {
        let yaml = minimal_yaml(
            r#"  - id: "moveLevel"
    type: "number"
    modes: ["write"]
    mapper:
      write:
        command: { clusterId: "0x0008", commandId: "0x0004", name: "MoveToLevelWithOnOff", timedInvokeTimeoutMs: 70000 }
        script: "return {output: {}};"
"#,
        );
        assert!(parse_spec("test.sbmd", &yaml).is_err());
    }

    #[test]
    fn rejects_hex_with_bad_digits() {
        let yaml = minimal_yaml(
            r#"  - id: "isOn"
    type: "boolean"
    modes: ["read"]
    mapper:
      read:
        attribute: { clusterId: "0xZZ", attributeId: "0x0000", name: "OnOff", type: "bool" }
        script: "return {output: 'x'};"
"#,
        );
        assert!(parse_spec("test.sbmd", &yaml).is_err());
    }

    #[test]
    fn loading_same_spec_twice_is_deterministic() {
        let yaml = minimal_yaml(
            r#"  - id: "isOn"
    type: "boolean"
    modes: ["read"]
    mapper:
      read:
        attribute: { clusterId: "0x0006", attributeId: "0x0000", name: "OnOff", type: "bool" }
        script: "return {output: 'x'};"
"#,
        );
        let a = parse_spec("test.sbmd", &yaml).unwrap();
        let b = parse_spec("test.sbmd", &yaml).unwrap();
        assert_eq!(a.matter_meta.device_types, b.matter_meta.device_types);
        assert_eq!(a.resources.len(), b.resources.len());
    }
}
