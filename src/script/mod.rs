//! The scripted TLV<->string mapping layer (§4.5).
//!
//! `SbmdScript` is a trait so the engine stays swappable (QuickJS is the
//! only implementation shipped here; see `quickjs.rs`). Every public
//! operation is specified to take the instance lock for its whole
//! evaluation, so implementations are free to assume single-threaded
//! interpreter access during a call.

pub mod quickjs;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::Result;
use crate::sbmd::spec::SbmdCommand;

/// Identity a read/write/execute mapper is registered under. Equality
/// includes the owning resource's endpoint+ID (not just cluster/attribute
/// or cluster/command) so two resources may legitimately share the same
/// underlying Matter attribute or command without their scripts colliding.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct MapperIdentity {
    pub resource_endpoint_id: Option<String>,
    pub resource_id: String,
}

impl MapperIdentity {
    pub fn new(resource_endpoint_id: Option<String>, resource_id: impl Into<String>) -> Self {
        Self {
            resource_endpoint_id,
            resource_id: resource_id.into(),
        }
    }
}

/// Metadata passed into `MapAttributeRead`/`MapAttributeWrite` scripts as
/// part of the JSON global.
#[derive(Clone, Debug, Serialize)]
pub struct AttributeContext {
    pub device_uuid: String,
    pub cluster_id: u32,
    pub feature_map: u32,
    pub endpoint_id: u16,
    pub attribute_id: u32,
    pub attribute_name: String,
    pub attribute_type: String,
}

/// Metadata passed into `MapCommandExecute`/`MapCommandExecuteResponse`.
#[derive(Clone, Debug, Serialize)]
pub struct CommandContext {
    pub device_uuid: String,
    pub cluster_id: u32,
    pub feature_map: u32,
    pub endpoint_id: u16,
    pub command_id: u32,
    pub command_name: String,
}

/// The shape every mapping operation returns: `{output, command?}`. Only
/// write-command-set selection populates `command`.
#[derive(Clone, Debug, Deserialize)]
pub struct ScriptOutput {
    pub output: Json,
    #[serde(default)]
    pub command: Option<String>,
}

/// One device's private script interpreter. Strictly thread-safe: callers
/// hold the instance lock for the whole evaluation (the QuickJS
/// implementation wraps its interpreter in a mutex internally).
pub trait SbmdScript: Send + Sync {
    /// Register a read mapper for one attribute, keyed by the owning
    /// resource's identity.
    fn add_attribute_read_mapper(&self, id: MapperIdentity, script: String) -> Result<()>;

    fn add_attribute_write_mapper(&self, id: MapperIdentity, script: String) -> Result<()>;

    fn add_command_execute_mapper(&self, id: MapperIdentity, script: String) -> Result<()>;

    fn add_command_execute_response_mapper(&self, id: MapperIdentity, script: String) -> Result<()>;

    /// A write-command-set mapper: one script decides which of `commands`
    /// to invoke and what payload to send.
    fn add_commands_write_mapper(
        &self,
        id: MapperIdentity,
        commands: Vec<SbmdCommand>,
        script: String,
    ) -> Result<()>;

    fn add_event_read_mapper(&self, id: MapperIdentity, script: String) -> Result<()>;

    /// `{input: <unwrapped TLV value>, ...ctx}` -> a Barton string.
    fn map_attribute_read(&self, id: &MapperIdentity, ctx: &AttributeContext, value: Json) -> Result<String>;

    /// `{input: <Barton string>, ...ctx}` -> a JSON value for TLV encoding.
    fn map_attribute_write(&self, id: &MapperIdentity, ctx: &AttributeContext, input: &str) -> Result<Json>;

    /// `{input: [<string args>], ...ctx}` -> a JSON value for TLV encoding.
    fn map_command_execute(&self, id: &MapperIdentity, ctx: &CommandContext, args: &[String]) -> Result<Json>;

    /// `{input: <unwrapped reply TLV>, ...ctx}` -> a Barton string.
    fn map_command_execute_response(
        &self,
        id: &MapperIdentity,
        ctx: &CommandContext,
        value: Json,
    ) -> Result<String>;

    /// Write-command-set selection: returns the selected command name (if
    /// more than one is available) and its JSON output payload.
    fn map_write_command(
        &self,
        id: &MapperIdentity,
        device_uuid: &str,
        input: &str,
        available: &[SbmdCommand],
    ) -> Result<(Option<String>, Json)>;

    /// `{input: <event TLV>, ...}` -> a Barton string.
    fn map_event_read(&self, id: &MapperIdentity, ctx: &AttributeContext, value: Json) -> Result<String>;
}
