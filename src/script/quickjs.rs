//! QuickJS-backed `SbmdScript`.
//!
//! One interpreter per device (`rquickjs::Context` isn't cheap to share):
//! every mapping call serializes its JSON context to text, assigns it to a
//! well-known global, evaluates the mapper's script body wrapped in an
//! immediately-invoked function (so a bare `return` is legal), and parses
//! the result back out of a `JSON.stringify`'d string. This mirrors the
//! original engine's contract of setting per-call globals (`sbmdReadArgs`,
//! `sbmdWriteArgs`, `sbmdCommandArgs`, `sbmdCommandResponseArgs`) without
//! clearing them between calls, and treating a thrown exception or a
//! missing `output` field as a mapping failure.

use std::collections::HashMap;

use parking_lot::Mutex;
use rquickjs::{Context, Runtime};
use serde_json::{Value as Json, json};

use super::{AttributeContext, CommandContext, MapperIdentity, SbmdScript, ScriptOutput};
use crate::error::{DriverError, Result};
use crate::sbmd::spec::SbmdCommand;

fn mapping_err(reason: impl Into<String>) -> DriverError {
    DriverError::Mapping(reason.into())
}

struct CommandsWriteEntry {
    commands: Vec<SbmdCommand>,
    script: String,
}

pub struct QuickJsScript {
    // Held for the lifetime of `context`; QuickJS contexts are tied to the
    // runtime that created them.
    _runtime: Runtime,
    context: Mutex<Context>,
    read_mappers: Mutex<HashMap<MapperIdentity, String>>,
    write_mappers: Mutex<HashMap<MapperIdentity, String>>,
    execute_mappers: Mutex<HashMap<MapperIdentity, String>>,
    execute_response_mappers: Mutex<HashMap<MapperIdentity, String>>,
    commands_write_mappers: Mutex<HashMap<MapperIdentity, CommandsWriteEntry>>,
    event_mappers: Mutex<HashMap<MapperIdentity, String>>,
}

impl QuickJsScript {
    pub fn new() -> Result<Self> {
        let runtime = Runtime::new()
            .map_err(|e| mapping_err(format!("failed to create QuickJS runtime: {e}")))?;
        let context = Context::full(&runtime)
            .map_err(|e| mapping_err(format!("failed to create QuickJS context: {e}")))?;

        Ok(Self {
            _runtime: runtime,
            context: Mutex::new(context),
            read_mappers: Mutex::new(HashMap::new()),
            write_mappers: Mutex::new(HashMap::new()),
            execute_mappers: Mutex::new(HashMap::new()),
            execute_response_mappers: Mutex::new(HashMap::new()),
            commands_write_mappers: Mutex::new(HashMap::new()),
            event_mappers: Mutex::new(HashMap::new()),
        })
    }

    /// Assign `globals[global_name] = <json>`, evaluate `script` wrapped as
    /// an IIFE, and parse the stringified result into a `ScriptOutput`.
    fn run(&self, global_name: &str, globals: &Json, script: &str) -> Result<ScriptOutput> {
        if script.trim().is_empty() {
            return Err(mapping_err("script body is empty"));
        }

        let globals_json = serde_json::to_string(globals)?;
        let code = format!(
            "(function(){{ globalThis.{global_name} = JSON.parse({globals_literal}); \
             var __sbmd_result = (function(){{ {script} }})(); \
             return JSON.stringify(__sbmd_result === undefined ? null : __sbmd_result); }})()",
            global_name = global_name,
            globals_literal = serde_json::to_string(&globals_json)?,
            script = script,
        );

        let context = self.context.lock();
        let result: std::result::Result<String, rquickjs::Error> =
            context.with(|ctx| ctx.eval(code.into_bytes()));

        let raw = result.map_err(|e| mapping_err(format!("script exception: {e}")))?;
        let value: Json = serde_json::from_str(&raw)
            .map_err(|e| mapping_err(format!("script returned non-JSON result: {e}")))?;

        if value.is_null() {
            return Err(mapping_err("script produced no return value"));
        }

        let output: ScriptOutput = serde_json::from_value(value)
            .map_err(|_| mapping_err("script result missing 'output' field"))?;
        Ok(output)
    }

    fn expect_string_output(output: ScriptOutput) -> Result<String> {
        output
            .output
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| mapping_err("mapper must return a string output"))
    }
}

impl SbmdScript for QuickJsScript {
    fn add_attribute_read_mapper(&self, id: MapperIdentity, script: String) -> Result<()> {
        if script.trim().is_empty() {
            return Err(mapping_err("attribute read script must not be empty"));
        }
        self.read_mappers.lock().insert(id, script);
        Ok(())
    }

    fn add_attribute_write_mapper(&self, id: MapperIdentity, script: String) -> Result<()> {
        if script.trim().is_empty() {
            return Err(mapping_err("attribute write script must not be empty"));
        }
        self.write_mappers.lock().insert(id, script);
        Ok(())
    }

    fn add_command_execute_mapper(&self, id: MapperIdentity, script: String) -> Result<()> {
        if script.trim().is_empty() {
            return Err(mapping_err("command execute script must not be empty"));
        }
        self.execute_mappers.lock().insert(id, script);
        Ok(())
    }

    fn add_command_execute_response_mapper(&self, id: MapperIdentity, script: String) -> Result<()> {
        if script.trim().is_empty() {
            return Err(mapping_err("command execute response script must not be empty"));
        }
        self.execute_response_mappers.lock().insert(id, script);
        Ok(())
    }

    fn add_commands_write_mapper(
        &self,
        id: MapperIdentity,
        commands: Vec<SbmdCommand>,
        script: String,
    ) -> Result<()> {
        if commands.is_empty() {
            return Err(mapping_err("write-command-set must not be empty"));
        }
        if script.trim().is_empty() {
            return Err(mapping_err("write-command-set script must not be empty"));
        }
        self.commands_write_mappers
            .lock()
            .insert(id, CommandsWriteEntry { commands, script });
        Ok(())
    }

    fn add_event_read_mapper(&self, id: MapperIdentity, script: String) -> Result<()> {
        if script.trim().is_empty() {
            return Err(mapping_err("event read script must not be empty"));
        }
        self.event_mappers.lock().insert(id, script);
        Ok(())
    }

    fn map_attribute_read(&self, id: &MapperIdentity, ctx: &AttributeContext, value: Json) -> Result<String> {
        let script = self
            .read_mappers
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| mapping_err(format!("no read mapper registered for {:?}", id)))?;

        let globals = json!({
            "input": value,
            "deviceUuid": ctx.device_uuid,
            "clusterId": ctx.cluster_id,
            "featureMap": ctx.feature_map,
            "endpointId": ctx.endpoint_id,
            "attributeId": ctx.attribute_id,
            "attributeName": ctx.attribute_name,
            "attributeType": ctx.attribute_type,
        });
        let output = self.run("sbmdReadArgs", &globals, &script)?;
        Self::expect_string_output(output)
    }

    fn map_attribute_write(&self, id: &MapperIdentity, ctx: &AttributeContext, input: &str) -> Result<Json> {
        let script = self
            .write_mappers
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| mapping_err(format!("no write mapper registered for {:?}", id)))?;

        let globals = json!({
            "input": input,
            "deviceUuid": ctx.device_uuid,
            "clusterId": ctx.cluster_id,
            "featureMap": ctx.feature_map,
            "endpointId": ctx.endpoint_id,
            "attributeId": ctx.attribute_id,
            "attributeName": ctx.attribute_name,
            "attributeType": ctx.attribute_type,
        });
        Ok(self.run("sbmdWriteArgs", &globals, &script)?.output)
    }

    fn map_command_execute(&self, id: &MapperIdentity, ctx: &CommandContext, args: &[String]) -> Result<Json> {
        let script = self
            .execute_mappers
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| mapping_err(format!("no execute mapper registered for {:?}", id)))?;

        let globals = json!({
            "input": args,
            "deviceUuid": ctx.device_uuid,
            "clusterId": ctx.cluster_id,
            "featureMap": ctx.feature_map,
            "endpointId": ctx.endpoint_id,
            "commandId": ctx.command_id,
            "commandName": ctx.command_name,
        });
        Ok(self.run("sbmdCommandArgs", &globals, &script)?.output)
    }

    fn map_command_execute_response(
        &self,
        id: &MapperIdentity,
        ctx: &CommandContext,
        value: Json,
    ) -> Result<String> {
        let script = self
            .execute_response_mappers
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| mapping_err(format!("no execute response mapper registered for {:?}", id)))?;

        let globals = json!({
            "input": value,
            "deviceUuid": ctx.device_uuid,
            "clusterId": ctx.cluster_id,
            "featureMap": ctx.feature_map,
            "endpointId": ctx.endpoint_id,
            "commandId": ctx.command_id,
            "commandName": ctx.command_name,
        });
        let output = self.run("sbmdCommandResponseArgs", &globals, &script)?;
        Self::expect_string_output(output)
    }

    fn map_write_command(
        &self,
        id: &MapperIdentity,
        device_uuid: &str,
        input: &str,
        available: &[SbmdCommand],
    ) -> Result<(Option<String>, Json)> {
        let entry_script = {
            let mappers = self.commands_write_mappers.lock();
            let entry = mappers
                .get(id)
                .ok_or_else(|| mapping_err(format!("no write-command-set mapper registered for {:?}", id)))?;
            entry.script.clone()
        };

        let names: Vec<&str> = available.iter().map(|c| c.name.as_str()).collect();
        let globals = json!({
            "input": input,
            "deviceUuid": device_uuid,
            "commands": names,
        });
        let output = self.run("sbmdWriteArgs", &globals, &entry_script)?;

        let selected = if available.len() == 1 {
            // Single command: auto-select it, ignore any `command` field.
            None
        } else {
            let name = output
                .command
                .clone()
                .ok_or_else(|| mapping_err("write-command-set with multiple commands requires 'command'"))?;
            if !available.iter().any(|c| c.name == name) {
                return Err(mapping_err(format!("unknown command '{name}' selected")));
            }
            Some(name)
        };

        let chosen = match &selected {
            Some(name) => available.iter().find(|c| &c.name == name).unwrap(),
            None => &available[0],
        };

        if output.output.is_null() && !chosen.args.is_empty() {
            return Err(mapping_err(format!(
                "command '{}' declares arguments but script returned null output",
                chosen.name
            )));
        }

        Ok((selected, output.output))
    }

    fn map_event_read(&self, id: &MapperIdentity, ctx: &AttributeContext, value: Json) -> Result<String> {
        let script = self
            .event_mappers
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| mapping_err(format!("no event mapper registered for {:?}", id)))?;

        let globals = json!({
            "input": value,
            "deviceUuid": ctx.device_uuid,
            "clusterId": ctx.cluster_id,
            "featureMap": ctx.feature_map,
            "endpointId": ctx.endpoint_id,
            "attributeId": ctx.attribute_id,
            "attributeName": ctx.attribute_name,
            "attributeType": ctx.attribute_type,
        });
        let output = self.run("sbmdEventArgs", &globals, &script)?;
        Self::expect_string_output(output)
    }
}
