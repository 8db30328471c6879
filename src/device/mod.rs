//! One commissioned device's resource bindings.
//!
//! `MatterDevice` wires a parsed `SbmdSpec` to one live session: it builds
//! the read/write/execute binding tables `RegisterResources` describes,
//! serves resource read/write/execute off them, and turns cache
//! attribute-change callbacks into resource-update emissions. Endpoint
//! resolution (SBMD's logical, profile-scoped endpoint ids to Matter's
//! numeric endpoint ids) is supplied by the caller at construction — it
//! comes out of the device-type matching `driver::spec_based` performs
//! while claiming the device, not from anything in this module. That
//! construction-time mapping is what subscription paths are built from,
//! since nothing is in the cache yet to discover anything from; once
//! reports start arriving, write and execute dispatch prefer whatever
//! endpoint the cache has actually observed hosting the target cluster
//! over the statically-resolved one, the same cache-scan fallback the
//! original used for a descriptor that didn't pin an endpoint.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::{CacheCallback, DeviceDataCache, FEATURE_MAP_ATTRIBUTE_ID};
use crate::error::{DriverError, Result};
use crate::sbmd::spec::{MapperCarrier, SbmdResource, SbmdSpec};
use crate::script::{AttributeContext, CommandContext, MapperIdentity, SbmdScript};
use crate::tlv;
use crate::transport::{AttributePath, CommandRequest, MatterTransport, SessionHandle, WriteRequest};

/// Power Source cluster. Every device gets this cluster's attributes on its
/// subscription path list regardless of whether its SBMD spec names it, so
/// comm-fail and battery reporting work uniformly across drivers.
pub const POWER_SOURCE_CLUSTER_ID: u32 = 0x002F;
/// `BatPercentRemaining`, the representative attribute that keeps the power
/// source cluster's reports flowing without needing every optional
/// attribute on the path list.
const POWER_SOURCE_BAT_PERCENT_ATTRIBUTE_ID: u32 = 0x000C;

/// Receives Barton-string resource updates as cached attributes change.
/// Implemented by whatever owns the device's lifecycle (commonly the
/// driver registry), not by this module.
pub trait ResourceUpdateSink: Send + Sync {
    fn on_resource_value(&self, resource_uri: String, value: String);
}

struct ResourceBinding {
    resource: SbmdResource,
    endpoint_id: u16,
}

pub struct MatterDevice {
    device_id: String,
    spec: Arc<SbmdSpec>,
    script: Arc<dyn SbmdScript>,
    transport: Arc<dyn MatterTransport>,
    session: SessionHandle,
    cache: DeviceDataCache,
    resources: HashMap<String, ResourceBinding>,
    readable_attribute_lookup: HashMap<AttributePath, String>,
    update_sink: Mutex<Option<Arc<dyn ResourceUpdateSink>>>,
}

impl MatterDevice {
    pub fn new(
        device_id: String,
        spec: Arc<SbmdSpec>,
        script: Arc<dyn SbmdScript>,
        transport: Arc<dyn MatterTransport>,
        session: SessionHandle,
        cache: DeviceDataCache,
        endpoint_numbers: &HashMap<String, u16>,
    ) -> Result<Self> {
        let mut resources = HashMap::new();
        let mut readable_attribute_lookup = HashMap::new();

        for resource in spec.all_resources() {
            let endpoint_id = match &resource.resource_endpoint_id {
                Some(ep) => *endpoint_numbers.get(ep).ok_or_else(|| DriverError::Binding {
                    device_id: device_id.clone(),
                    reason: format!("no Matter endpoint resolved for SBMD endpoint '{ep}'"),
                })?,
                None => 0,
            };

            let uri = resource.uri(&device_id);
            if let Some(leaf) = &resource.mapper.read {
                if let MapperCarrier::Attribute(attr) = &leaf.carrier {
                    readable_attribute_lookup.insert(
                        AttributePath {
                            endpoint_id,
                            cluster_id: attr.cluster_id,
                            attribute_id: attr.attribute_id,
                        },
                        uri.clone(),
                    );
                }
            }

            resources.insert(
                uri,
                ResourceBinding {
                    resource: resource.clone(),
                    endpoint_id,
                },
            );
        }

        Ok(Self {
            device_id,
            spec,
            script,
            transport,
            session,
            cache,
            resources,
            readable_attribute_lookup,
            update_sink: Mutex::new(None),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn register_update_sink(&self, sink: Arc<dyn ResourceUpdateSink>) {
        *self.update_sink.lock() = Some(sink);
    }

    pub fn unregister_update_sink(&self) {
        *self.update_sink.lock() = None;
    }

    fn binding(&self, resource_uri: &str) -> Result<&ResourceBinding> {
        self.resources.get(resource_uri).ok_or_else(|| DriverError::Binding {
            device_id: self.device_id.clone(),
            reason: format!("unknown resource '{resource_uri}'"),
        })
    }

    fn mapper_identity(&self, binding: &ResourceBinding) -> MapperIdentity {
        MapperIdentity::new(
            binding.resource.resource_endpoint_id.clone(),
            binding.resource.id.clone(),
        )
    }

    /// Every distinct Matter endpoint this device's bound resources touch.
    fn known_endpoints(&self) -> HashSet<u16> {
        self.resources.values().map(|b| b.endpoint_id).collect()
    }

    /// Cluster ids any of a resource's mapper leaves reference, used to
    /// decide which feature-map attributes to prime and subscribe.
    fn resource_cluster_ids(resource: &SbmdResource) -> Vec<u32> {
        let mut ids = Vec::new();
        for leaf in [&resource.mapper.read, &resource.mapper.write, &resource.mapper.execute] {
            if let Some(leaf) = leaf {
                match &leaf.carrier {
                    MapperCarrier::Attribute(a) => ids.push(a.cluster_id),
                    MapperCarrier::Command(c) => ids.push(c.cluster_id),
                    MapperCarrier::Commands(cs) => ids.extend(cs.iter().map(|c| c.cluster_id)),
                }
            }
        }
        ids
    }

    /// Every attribute path that should sit on this device's subscription
    /// request: attribute-backed reads, feature-map attributes for any
    /// cluster this spec declares as feature-gated, and — unconditionally —
    /// the power source cluster's representative attribute on every
    /// endpoint this device exposes resources on.
    pub fn subscription_paths(&self) -> Vec<AttributePath> {
        let mut paths: HashSet<AttributePath> = HashSet::new();

        for binding in self.resources.values() {
            if let Some(leaf) = &binding.resource.mapper.read {
                if let MapperCarrier::Attribute(attr) = &leaf.carrier {
                    paths.insert(AttributePath {
                        endpoint_id: binding.endpoint_id,
                        cluster_id: attr.cluster_id,
                        attribute_id: attr.attribute_id,
                    });
                }
            }
            for cluster_id in Self::resource_cluster_ids(&binding.resource) {
                if self.spec.matter_meta.feature_clusters.contains(&cluster_id) {
                    paths.insert(AttributePath {
                        endpoint_id: binding.endpoint_id,
                        cluster_id,
                        attribute_id: FEATURE_MAP_ATTRIBUTE_ID,
                    });
                }
            }
        }

        for endpoint_id in self.known_endpoints() {
            paths.insert(AttributePath {
                endpoint_id,
                cluster_id: POWER_SOURCE_CLUSTER_ID,
                attribute_id: POWER_SOURCE_BAT_PERCENT_ATTRIBUTE_ID,
            });
        }

        paths.into_iter().collect()
    }

    /// Cached feature map for `(endpoint, cluster)`, fetching and caching it
    /// from the transport on a miss. Only used from async call paths
    /// (write/execute); reads stay synchronous and fall back to 0 on a
    /// cache miss rather than blocking on a live fetch.
    async fn resolve_feature_map(&self, endpoint_id: u16, cluster_id: u32) -> u32 {
        if let Some(fm) = self.cache.feature_map(endpoint_id, cluster_id) {
            return fm;
        }
        match self.transport.read_feature_map(&self.session, endpoint_id, cluster_id).await {
            Ok(fm) => {
                self.cache.set_feature_map(endpoint_id, cluster_id, fm);
                fm
            }
            Err(e) => {
                log::warn!("feature map read failed for {endpoint_id}/{cluster_id:#x}: {e}");
                0
            }
        }
    }

    /// Prime the feature-map cache for every feature-gated cluster this
    /// device touches. Called once a subscription first establishes.
    pub async fn prime_feature_maps(&self) {
        let mut pairs: HashSet<(u16, u32)> = HashSet::new();
        for binding in self.resources.values() {
            for cluster_id in Self::resource_cluster_ids(&binding.resource) {
                if self.spec.matter_meta.feature_clusters.contains(&cluster_id) {
                    pairs.insert((binding.endpoint_id, cluster_id));
                }
            }
        }
        for (endpoint_id, cluster_id) in pairs {
            self.resolve_feature_map(endpoint_id, cluster_id).await;
        }
    }

    /// Read one resource's current value through its attribute-backed read
    /// mapper. Serves entirely from the cache; a resource whose attribute
    /// hasn't reported yet is a mapping error, not an implicit live fetch.
    pub fn read_resource(&self, resource_uri: &str) -> Result<String> {
        let binding = self.binding(resource_uri)?;
        let leaf = binding.resource.mapper.read.as_ref().ok_or_else(|| DriverError::Binding {
            device_id: self.device_id.clone(),
            reason: format!("resource '{resource_uri}' is not readable"),
        })?;
        let MapperCarrier::Attribute(attr) = &leaf.carrier else {
            return Err(DriverError::Binding {
                device_id: self.device_id.clone(),
                reason: format!("resource '{resource_uri}' read carrier is not an attribute"),
            });
        };

        let path = AttributePath {
            endpoint_id: binding.endpoint_id,
            cluster_id: attr.cluster_id,
            attribute_id: attr.attribute_id,
        };
        let raw = self.cache.get_attribute(path).ok_or_else(|| {
            DriverError::Mapping(format!("attribute backing '{resource_uri}' has not reported yet"))
        })?;
        let value = tlv::decode(&attr.attribute_type, &raw)?;

        let id = self.mapper_identity(binding);
        let ctx = AttributeContext {
            device_uuid: self.device_id.clone(),
            cluster_id: attr.cluster_id,
            feature_map: self.cache.feature_map(binding.endpoint_id, attr.cluster_id).unwrap_or(0),
            endpoint_id: binding.endpoint_id,
            attribute_id: attr.attribute_id,
            attribute_name: attr.name.clone(),
            attribute_type: attr.attribute_type.clone(),
        };
        self.script.map_attribute_read(&id, &ctx, value)
    }

    /// The endpoint a write/execute dispatch should actually target: the
    /// cache's own record of which endpoint hosts `cluster_id` if it has
    /// one (fresher than the statically-resolved binding, and the only
    /// source of truth for a device-level resource), falling back to the
    /// binding's resolved endpoint otherwise.
    fn dispatch_endpoint(&self, binding: &ResourceBinding, cluster_id: u32) -> u16 {
        self.cache
            .endpoints_hosting(cluster_id)
            .first()
            .copied()
            .unwrap_or(binding.endpoint_id)
    }

    /// Write a resource. Attribute-backed writes send a `WriteRequest`;
    /// command-backed writes (single `command` or multi-command
    /// `commands`) invoke whichever command the script selects.
    pub async fn write_resource(&self, resource_uri: &str, input: &str) -> Result<()> {
        let binding = self.binding(resource_uri)?;
        let leaf = binding.resource.mapper.write.as_ref().ok_or_else(|| DriverError::Binding {
            device_id: self.device_id.clone(),
            reason: format!("resource '{resource_uri}' is not writeable"),
        })?;
        let id = self.mapper_identity(binding);

        match &leaf.carrier {
            MapperCarrier::Attribute(attr) => {
                let endpoint_id = self.dispatch_endpoint(binding, attr.cluster_id);
                let feature_map = self.resolve_feature_map(endpoint_id, attr.cluster_id).await;
                let ctx = AttributeContext {
                    device_uuid: self.device_id.clone(),
                    cluster_id: attr.cluster_id,
                    feature_map,
                    endpoint_id,
                    attribute_id: attr.attribute_id,
                    attribute_name: attr.name.clone(),
                    attribute_type: attr.attribute_type.clone(),
                };
                let value = self.script.map_attribute_write(&id, &ctx, input)?;
                let mut payload = Vec::new();
                tlv::encode(&mut payload, tlv::Tag::Anonymous, &attr.attribute_type, &value)?;
                self.transport
                    .send_write(
                        &self.session,
                        WriteRequest {
                            path: AttributePath {
                                endpoint_id,
                                cluster_id: attr.cluster_id,
                                attribute_id: attr.attribute_id,
                            },
                            tlv_payload: payload,
                        },
                    )
                    .await
            }
            MapperCarrier::Command(cmd) => {
                self.invoke_write_command(binding, &id, input, std::slice::from_ref(cmd)).await
            }
            MapperCarrier::Commands(cmds) => self.invoke_write_command(binding, &id, input, cmds).await,
        }
    }

    /// A write-command set's members may live on different clusters; the
    /// endpoint is resolved against whichever one the script ultimately
    /// selects, not fixed ahead of the call.
    async fn invoke_write_command(
        &self,
        binding: &ResourceBinding,
        id: &MapperIdentity,
        input: &str,
        available: &[crate::sbmd::spec::SbmdCommand],
    ) -> Result<()> {
        let (selected, output) = self.script.map_write_command(id, &self.device_id, input, available)?;
        let chosen = match &selected {
            Some(name) => available
                .iter()
                .find(|c| &c.name == name)
                .ok_or_else(|| DriverError::Mapping(format!("script selected unknown command '{name}'")))?,
            None => available.first().ok_or_else(|| {
                DriverError::Binding {
                    device_id: self.device_id.clone(),
                    reason: "write-command-set has no commands".into(),
                }
            })?,
        };
        let endpoint_id = self.dispatch_endpoint(binding, chosen.cluster_id);
        let payload = tlv::encode_command_args(&chosen.args, &output)?;
        self.transport
            .send_command(
                &self.session,
                CommandRequest {
                    endpoint_id,
                    cluster_id: chosen.cluster_id,
                    command_id: chosen.command_id,
                    timed_invoke_timeout_ms: chosen.timed_invoke_timeout_ms,
                    tlv_payload: payload,
                },
            )
            .await
            .map(|_| ())
    }

    /// Execute a resource's bound command, returning the script's mapped
    /// reply string when a response mapper is bound.
    pub async fn execute_resource(&self, resource_uri: &str, args: Vec<String>) -> Result<Option<String>> {
        let binding = self.binding(resource_uri)?;
        let leaf = binding.resource.mapper.execute.as_ref().ok_or_else(|| DriverError::Binding {
            device_id: self.device_id.clone(),
            reason: format!("resource '{resource_uri}' is not executable"),
        })?;
        let MapperCarrier::Command(cmd) = &leaf.carrier else {
            return Err(DriverError::Binding {
                device_id: self.device_id.clone(),
                reason: format!("resource '{resource_uri}' execute carrier is not a command"),
            });
        };

        let id = self.mapper_identity(binding);
        let endpoint_id = self.dispatch_endpoint(binding, cmd.cluster_id);
        let feature_map = self.resolve_feature_map(endpoint_id, cmd.cluster_id).await;
        let ctx = CommandContext {
            device_uuid: self.device_id.clone(),
            cluster_id: cmd.cluster_id,
            feature_map,
            endpoint_id,
            command_id: cmd.command_id,
            command_name: cmd.name.clone(),
        };

        let value = self.script.map_command_execute(&id, &ctx, &args)?;
        let payload = tlv::encode_command_args(&cmd.args, &value)?;
        let reply = self
            .transport
            .send_command(
                &self.session,
                CommandRequest {
                    endpoint_id,
                    cluster_id: cmd.cluster_id,
                    command_id: cmd.command_id,
                    timed_invoke_timeout_ms: cmd.timed_invoke_timeout_ms,
                    tlv_payload: payload,
                },
            )
            .await?;

        if leaf.script_response.is_none() {
            return Ok(None);
        }
        // A response mapper is bound, but the reply carries no TLV payload
        // (e.g. a command whose response cluster has no reply data): per
        // E4, the mapper is simply not invoked and the op settles success
        // with no mapped output, rather than running the script over null.
        let Some(bytes) = reply.tlv_payload.as_ref() else {
            return Ok(None);
        };
        let reply_value = tlv::decode("struct", bytes)?;
        let mapped = self.script.map_command_execute_response(&id, &ctx, reply_value)?;
        Ok(Some(mapped))
    }
}

impl CacheCallback for MatterDevice {
    fn on_attribute_changed(&self, path: AttributePath, tlv_bytes: &[u8]) {
        let Some(uri) = self.readable_attribute_lookup.get(&path) else {
            return;
        };
        let Some(binding) = self.resources.get(uri) else {
            return;
        };
        let Some(leaf) = &binding.resource.mapper.read else {
            return;
        };
        let MapperCarrier::Attribute(attr) = &leaf.carrier else {
            return;
        };

        let value = match tlv::decode(&attr.attribute_type, tlv_bytes) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("failed to decode cached attribute for '{uri}': {e}");
                return;
            }
        };

        let id = self.mapper_identity(binding);
        let ctx = AttributeContext {
            device_uuid: self.device_id.clone(),
            cluster_id: attr.cluster_id,
            feature_map: self.cache.feature_map(binding.endpoint_id, attr.cluster_id).unwrap_or(0),
            endpoint_id: binding.endpoint_id,
            attribute_id: attr.attribute_id,
            attribute_name: attr.name.clone(),
            attribute_type: attr.attribute_type.clone(),
        };

        match self.script.map_attribute_read(&id, &ctx, value) {
            Ok(mapped) => {
                if let Some(sink) = self.update_sink.lock().clone() {
                    sink.on_resource_value(uri.clone(), mapped);
                }
            }
            Err(e) => log::warn!("read mapper failed for '{uri}': {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sbmd::spec::{
        ModeBits, ResourceMode, SbmdAttribute, SbmdBartonMeta, SbmdMapper, SbmdMapperLeaf, SbmdMatterMeta,
        SbmdReporting,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoopScript;
    impl SbmdScript for NoopScript {
        fn add_attribute_read_mapper(&self, _id: MapperIdentity, _script: String) -> Result<()> {
            Ok(())
        }
        fn add_attribute_write_mapper(&self, _id: MapperIdentity, _script: String) -> Result<()> {
            Ok(())
        }
        fn add_command_execute_mapper(&self, _id: MapperIdentity, _script: String) -> Result<()> {
            Ok(())
        }
        fn add_command_execute_response_mapper(&self, _id: MapperIdentity, _script: String) -> Result<()> {
            Ok(())
        }
        fn add_commands_write_mapper(
            &self,
            _id: MapperIdentity,
            _commands: Vec<crate::sbmd::spec::SbmdCommand>,
            _script: String,
        ) -> Result<()> {
            Ok(())
        }
        fn add_event_read_mapper(&self, _id: MapperIdentity, _script: String) -> Result<()> {
            Ok(())
        }
        fn map_attribute_read(
            &self,
            _id: &MapperIdentity,
            _ctx: &AttributeContext,
            value: serde_json::Value,
        ) -> Result<String> {
            Ok(value.to_string())
        }
        fn map_attribute_write(
            &self,
            _id: &MapperIdentity,
            _ctx: &AttributeContext,
            input: &str,
        ) -> Result<serde_json::Value> {
            Ok(serde_json::Value::String(input.to_string()))
        }
        fn map_command_execute(
            &self,
            _id: &MapperIdentity,
            _ctx: &CommandContext,
            _args: &[String],
        ) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
        fn map_command_execute_response(
            &self,
            _id: &MapperIdentity,
            _ctx: &CommandContext,
            _value: serde_json::Value,
        ) -> Result<String> {
            Ok(String::new())
        }
        fn map_write_command(
            &self,
            _id: &MapperIdentity,
            _device_uuid: &str,
            _input: &str,
            _available: &[crate::sbmd::spec::SbmdCommand],
        ) -> Result<(Option<String>, serde_json::Value)> {
            Ok((None, serde_json::Value::Null))
        }
        fn map_event_read(
            &self,
            _id: &MapperIdentity,
            _ctx: &AttributeContext,
            value: serde_json::Value,
        ) -> Result<String> {
            Ok(value.to_string())
        }
    }

    struct NoopTransport;
    #[async_trait]
    impl MatterTransport for NoopTransport {
        async fn send_command(
            &self,
            _session: &SessionHandle,
            _req: CommandRequest,
        ) -> Result<crate::transport::CommandReply> {
            Ok(crate::transport::CommandReply::default())
        }
        async fn send_write(&self, _session: &SessionHandle, _req: WriteRequest) -> Result<()> {
            Ok(())
        }
        async fn subscribe(
            &self,
            _session: &SessionHandle,
            _paths: &[AttributePath],
            _events: &[crate::transport::EventPath],
            _interval: crate::transport::SubscriptionIntervalSecs,
            _sink: Arc<dyn crate::transport::SubscriptionSink>,
        ) -> Result<Arc<dyn crate::transport::SubscriptionHandle>> {
            unimplemented!()
        }
        async fn read_feature_map(&self, _session: &SessionHandle, _endpoint_id: u16, _cluster_id: u32) -> Result<u32> {
            Ok(0)
        }
    }

    /// Records the endpoint id of the last write/command sent through it,
    /// so dispatch-time endpoint resolution can be asserted on.
    #[derive(Default)]
    struct RecordingTransport {
        last_write_endpoint: Mutex<Option<u16>>,
    }
    #[async_trait]
    impl MatterTransport for RecordingTransport {
        async fn send_command(
            &self,
            _session: &SessionHandle,
            req: CommandRequest,
        ) -> Result<crate::transport::CommandReply> {
            *self.last_write_endpoint.lock() = Some(req.endpoint_id);
            Ok(crate::transport::CommandReply::default())
        }
        async fn send_write(&self, _session: &SessionHandle, req: WriteRequest) -> Result<()> {
            *self.last_write_endpoint.lock() = Some(req.path.endpoint_id);
            Ok(())
        }
        async fn subscribe(
            &self,
            _session: &SessionHandle,
            _paths: &[AttributePath],
            _events: &[crate::transport::EventPath],
            _interval: crate::transport::SubscriptionIntervalSecs,
            _sink: Arc<dyn crate::transport::SubscriptionSink>,
        ) -> Result<Arc<dyn crate::transport::SubscriptionHandle>> {
            unimplemented!()
        }
        async fn read_feature_map(&self, _session: &SessionHandle, _endpoint_id: u16, _cluster_id: u32) -> Result<u32> {
            Ok(0)
        }
    }

    fn minimal_spec() -> Arc<SbmdSpec> {
        let resource = SbmdResource {
            id: "isOn".into(),
            resource_type: "bool".into(),
            modes: vec![ResourceMode::Read, ResourceMode::Write],
            mapper: SbmdMapper {
                read: Some(SbmdMapperLeaf {
                    carrier: MapperCarrier::Attribute(SbmdAttribute {
                        cluster_id: 0x0006,
                        attribute_id: 0x0000,
                        name: "OnOff".into(),
                        attribute_type: "bool".into(),
                        feature_map: None,
                    }),
                    script: "return {output: String(sbmdReadArgs.input)};".into(),
                    script_response: None,
                }),
                write: Some(SbmdMapperLeaf {
                    carrier: MapperCarrier::Attribute(SbmdAttribute {
                        cluster_id: 0x0006,
                        attribute_id: 0x0000,
                        name: "OnOff".into(),
                        attribute_type: "bool".into(),
                        feature_map: None,
                    }),
                    script: "return {output: sbmdWriteArgs.input === 'true'};".into(),
                    script_response: None,
                }),
                execute: None,
            },
            resource_endpoint_id: Some("1".into()),
        };
        Arc::new(SbmdSpec {
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
            resources: vec![],
            endpoints: vec![crate::sbmd::spec::SbmdEndpoint {
                id: "1".into(),
                profile: "onOff".into(),
                profile_version: 1,
                resources: vec![resource],
            }],
            source_file: "test.sbmd".into(),
        })
    }

    fn device() -> MatterDevice {
        device_with(Arc::new(NoopTransport), DeviceDataCache::new())
    }

    /// Wraps `NoopScript` to count `map_command_execute_response` calls, so
    /// E4's "response mapper not invoked when the reply carries no data"
    /// rule can be asserted rather than merely inferred from the return
    /// value.
    #[derive(Default)]
    struct CountingResponseScript {
        response_calls: AtomicUsize,
    }
    impl SbmdScript for CountingResponseScript {
        fn add_attribute_read_mapper(&self, id: MapperIdentity, script: String) -> Result<()> {
            NoopScript.add_attribute_read_mapper(id, script)
        }
        fn add_attribute_write_mapper(&self, id: MapperIdentity, script: String) -> Result<()> {
            NoopScript.add_attribute_write_mapper(id, script)
        }
        fn add_command_execute_mapper(&self, id: MapperIdentity, script: String) -> Result<()> {
            NoopScript.add_command_execute_mapper(id, script)
        }
        fn add_command_execute_response_mapper(&self, id: MapperIdentity, script: String) -> Result<()> {
            NoopScript.add_command_execute_response_mapper(id, script)
        }
        fn add_commands_write_mapper(
            &self,
            id: MapperIdentity,
            commands: Vec<crate::sbmd::spec::SbmdCommand>,
            script: String,
        ) -> Result<()> {
            NoopScript.add_commands_write_mapper(id, commands, script)
        }
        fn add_event_read_mapper(&self, id: MapperIdentity, script: String) -> Result<()> {
            NoopScript.add_event_read_mapper(id, script)
        }
        fn map_attribute_read(
            &self,
            id: &MapperIdentity,
            ctx: &AttributeContext,
            value: serde_json::Value,
        ) -> Result<String> {
            NoopScript.map_attribute_read(id, ctx, value)
        }
        fn map_attribute_write(
            &self,
            id: &MapperIdentity,
            ctx: &AttributeContext,
            input: &str,
        ) -> Result<serde_json::Value> {
            NoopScript.map_attribute_write(id, ctx, input)
        }
        fn map_command_execute(
            &self,
            id: &MapperIdentity,
            ctx: &CommandContext,
            args: &[String],
        ) -> Result<serde_json::Value> {
            NoopScript.map_command_execute(id, ctx, args)
        }
        fn map_command_execute_response(
            &self,
            id: &MapperIdentity,
            ctx: &CommandContext,
            value: serde_json::Value,
        ) -> Result<String> {
            self.response_calls.fetch_add(1, Ordering::SeqCst);
            NoopScript.map_command_execute_response(id, ctx, value)
        }
        fn map_write_command(
            &self,
            id: &MapperIdentity,
            device_uuid: &str,
            input: &str,
            available: &[crate::sbmd::spec::SbmdCommand],
        ) -> Result<(Option<String>, serde_json::Value)> {
            NoopScript.map_write_command(id, device_uuid, input, available)
        }
        fn map_event_read(
            &self,
            id: &MapperIdentity,
            ctx: &AttributeContext,
            value: serde_json::Value,
        ) -> Result<String> {
            NoopScript.map_event_read(id, ctx, value)
        }
    }

    fn spec_with_execute(script_response: Option<String>) -> Arc<SbmdSpec> {
        let mut spec = (*minimal_spec()).clone();
        spec.endpoints[0].resources[0].mapper.execute = Some(SbmdMapperLeaf {
            carrier: MapperCarrier::Command(crate::sbmd::spec::SbmdCommand {
                cluster_id: 0x0003,
                command_id: 0x0001,
                name: "PlayUrl".into(),
                timed_invoke_timeout_ms: Some(3000),
                args: vec![],
            }),
            script: "return {output: null};".into(),
            script_response,
        });
        Arc::new(spec)
    }

    fn device_with(transport: Arc<dyn MatterTransport>, cache: DeviceDataCache) -> MatterDevice {
        let spec = minimal_spec();
        let mut endpoint_numbers = HashMap::new();
        endpoint_numbers.insert("1".to_string(), 2u16);
        MatterDevice::new(
            "dev-1".into(),
            spec,
            Arc::new(NoopScript),
            transport,
            SessionHandle {
                fabric_index: 1,
                node_id: 42,
            },
            cache,
            &endpoint_numbers,
        )
        .unwrap()
    }

    fn device_with_spec_and_script(spec: Arc<SbmdSpec>, script: Arc<dyn SbmdScript>) -> MatterDevice {
        let mut endpoint_numbers = HashMap::new();
        endpoint_numbers.insert("1".to_string(), 2u16);
        MatterDevice::new(
            "dev-1".into(),
            spec,
            script,
            Arc::new(NoopTransport),
            SessionHandle {
                fabric_index: 1,
                node_id: 42,
            },
            DeviceDataCache::new(),
            &endpoint_numbers,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn execute_skips_response_mapper_when_reply_has_no_payload() {
        let script = Arc::new(CountingResponseScript::default());
        let dev = device_with_spec_and_script(
            spec_with_execute(Some("return {output: String(sbmdReadArgs.input)};".into())),
            script.clone(),
        );

        let result = dev.execute_resource("dev-1/ep/1/r/isOn", vec![]).await.unwrap();

        assert_eq!(result, None);
        assert_eq!(script.response_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn execute_without_response_mapper_returns_none() {
        let script = Arc::new(CountingResponseScript::default());
        let dev = device_with_spec_and_script(spec_with_execute(None), script.clone());

        let result = dev.execute_resource("dev-1/ep/1/r/isOn", vec![]).await.unwrap();

        assert_eq!(result, None);
        assert_eq!(script.response_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn resolves_logical_endpoint_to_numeric_endpoint() {
        let dev = device();
        let uri = "dev-1/ep/1/r/isOn";
        assert!(dev.resources.contains_key(uri));
        assert_eq!(dev.resources.get(uri).unwrap().endpoint_id, 2);
    }

    #[test]
    fn read_resource_fails_before_first_report() {
        let dev = device();
        assert!(dev.read_resource("dev-1/ep/1/r/isOn").is_err());
    }

    #[test]
    fn read_resource_succeeds_once_cached() {
        let dev = device();
        dev.cache.set_attribute(
            AttributePath {
                endpoint_id: 2,
                cluster_id: 0x0006,
                attribute_id: 0x0000,
            },
            vec![0x09],
        );
        let value = dev.read_resource("dev-1/ep/1/r/isOn").unwrap();
        assert_eq!(value, "true");
    }

    #[tokio::test]
    async fn write_dispatch_prefers_cache_discovered_endpoint_over_static_binding() {
        let cache = DeviceDataCache::new();
        // The cache has actually observed the OnOff cluster reporting on
        // endpoint 5, diverging from the statically-resolved endpoint 2.
        cache.set_attribute(
            AttributePath {
                endpoint_id: 5,
                cluster_id: 0x0006,
                attribute_id: 0x0000,
            },
            vec![0x09],
        );
        let transport = Arc::new(RecordingTransport::default());
        let dev = device_with(transport.clone(), cache);

        dev.write_resource("dev-1/ep/1/r/isOn", "true").await.unwrap();

        assert_eq!(*transport.last_write_endpoint.lock(), Some(5));
    }

    #[tokio::test]
    async fn write_dispatch_falls_back_to_static_binding_when_cache_is_silent() {
        let transport = Arc::new(RecordingTransport::default());
        let dev = device_with(transport.clone(), DeviceDataCache::new());

        dev.write_resource("dev-1/ep/1/r/isOn", "true").await.unwrap();

        assert_eq!(*transport.last_write_endpoint.lock(), Some(2));
    }

    #[test]
    fn subscription_paths_always_include_power_source() {
        let dev = device();
        let paths = dev.subscription_paths();
        assert!(paths.iter().any(|p| p.cluster_id == POWER_SOURCE_CLUSTER_ID && p.endpoint_id == 2));
        assert!(paths
            .iter()
            .any(|p| p.cluster_id == 0x0006 && p.attribute_id == 0x0000));
    }

    struct RecordingSink {
        count: AtomicUsize,
    }
    impl ResourceUpdateSink for RecordingSink {
        fn on_resource_value(&self, _resource_uri: String, _value: String) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn attribute_change_emits_resource_update() {
        let dev = device();
        let sink = Arc::new(RecordingSink {
            count: AtomicUsize::new(0),
        });
        dev.register_update_sink(sink.clone());
        dev.on_attribute_changed(
            AttributePath {
                endpoint_id: 2,
                cluster_id: 0x0006,
                attribute_id: 0x0000,
            },
            &[0x09],
        );
        assert_eq!(sink.count.load(Ordering::SeqCst), 1);
    }
}
