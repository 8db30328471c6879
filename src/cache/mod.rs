//! Per-device attribute-state cache.
//!
//! Holds the latest decoded TLV for every attribute on subscribed paths,
//! plus the set of server clusters discovered per endpoint. Mutated only by
//! the subscription's delivery path; read from any context through short
//! lock-held critical sections (§5: "reads may be concurrent via cheap
//! copies").

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::tlv;
use crate::transport::AttributePath;

/// The Matter `FeatureMap` global attribute ID, present on every cluster.
pub const FEATURE_MAP_ATTRIBUTE_ID: u32 = 0xFFFC;

/// Single-callback hook driven on every attribute update. Exactly one
/// callback may be registered at a time — installed by `MatterDevice`,
/// removed on teardown before the device drops its cache reference (§9:
/// "the device de-registers its callback before dropping its reference").
pub trait CacheCallback: Send + Sync {
    fn on_attribute_changed(&self, path: AttributePath, tlv: &[u8]);
}

#[derive(Default)]
struct CacheInner {
    attributes: HashMap<AttributePath, Vec<u8>>,
    endpoint_clusters: HashMap<u16, HashSet<u32>>,
}

/// Ref-counted because both the owning `MatterDevice` and its
/// `SubscribeInteraction` can briefly outlive each other during teardown.
#[derive(Clone, Default)]
pub struct DeviceDataCache {
    inner: Arc<RwLock<CacheInner>>,
    callback: Arc<RwLock<Option<Arc<dyn CacheCallback>>>>,
}

impl DeviceDataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_callback(&self, callback: Arc<dyn CacheCallback>) {
        *self.callback.write() = Some(callback);
    }

    pub fn unregister_callback(&self) {
        *self.callback.write() = None;
    }

    /// Store a freshly received attribute report and fan it out to the
    /// registered callback, if any. Called only from the subscription's
    /// single delivery path, so per-device update ordering is preserved.
    pub fn set_attribute(&self, path: AttributePath, tlv: Vec<u8>) {
        {
            let mut inner = self.inner.write();
            inner
                .endpoint_clusters
                .entry(path.endpoint_id)
                .or_default()
                .insert(path.cluster_id);
            inner.attributes.insert(path, tlv.clone());
        }
        if let Some(cb) = self.callback.read().as_ref() {
            cb.on_attribute_changed(path, &tlv);
        }
    }

    pub fn get_attribute(&self, path: AttributePath) -> Option<Vec<u8>> {
        self.inner.read().attributes.get(&path).cloned()
    }

    /// The set of endpoints that have reported at least one attribute.
    pub fn endpoints(&self) -> Vec<u16> {
        self.inner.read().endpoint_clusters.keys().copied().collect()
    }

    /// Server clusters observed on an endpoint, from inbound reports.
    pub fn clusters_on(&self, endpoint_id: u16) -> HashSet<u32> {
        self.inner
            .read()
            .endpoint_clusters
            .get(&endpoint_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Endpoints hosting a given cluster, used to auto-resolve the endpoint
    /// for a script-produced write/invoke descriptor that didn't pin one.
    pub fn endpoints_hosting(&self, cluster_id: u32) -> Vec<u16> {
        self.inner
            .read()
            .endpoint_clusters
            .iter()
            .filter(|(_, clusters)| clusters.contains(&cluster_id))
            .map(|(ep, _)| *ep)
            .collect()
    }

    /// Cached `FeatureMap` for `(endpoint, cluster)`, if present.
    pub fn feature_map(&self, endpoint_id: u16, cluster_id: u32) -> Option<u32> {
        let path = AttributePath {
            endpoint_id,
            cluster_id,
            attribute_id: FEATURE_MAP_ATTRIBUTE_ID,
        };
        let tlv = self.get_attribute(path)?;
        tlv::decode("uint32", &tlv).ok()?.as_u64().map(|v| v as u32)
    }

    pub fn set_feature_map(&self, endpoint_id: u16, cluster_id: u32, feature_map: u32) {
        let path = AttributePath {
            endpoint_id,
            cluster_id,
            attribute_id: FEATURE_MAP_ATTRIBUTE_ID,
        };
        let mut buf = Vec::new();
        let _ = tlv::encode(&mut buf, tlv::Tag::Anonymous, "uint32", &serde_json::json!(feature_map));
        self.inner.write().attributes.insert(path, buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingCallback {
        calls: parking_lot::Mutex<Vec<AttributePath>>,
    }

    impl CacheCallback for RecordingCallback {
        fn on_attribute_changed(&self, path: AttributePath, _tlv: &[u8]) {
            self.calls.lock().push(path);
        }
    }

    #[test]
    fn set_attribute_notifies_registered_callback_exactly_once() {
        let cache = DeviceDataCache::new();
        let cb = Arc::new(RecordingCallback {
            calls: parking_lot::Mutex::new(Vec::new()),
        });
        cache.register_callback(cb.clone());

        let path = AttributePath {
            endpoint_id: 1,
            cluster_id: 0x0006,
            attribute_id: 0x0000,
        };
        cache.set_attribute(path, vec![0x09]);
        assert_eq!(cb.calls.lock().len(), 1);
        assert_eq!(cache.get_attribute(path), Some(vec![0x09]));
    }

    #[test]
    fn endpoints_hosting_finds_cluster() {
        let cache = DeviceDataCache::new();
        let path = AttributePath {
            endpoint_id: 2,
            cluster_id: 0x0008,
            attribute_id: 0x0000,
        };
        cache.set_attribute(path, vec![0x04, 0x32]);
        assert_eq!(cache.endpoints_hosting(0x0008), vec![2]);
        assert!(cache.endpoints_hosting(0x1234).is_empty());
    }

    #[test]
    fn feature_map_round_trips() {
        let cache = DeviceDataCache::new();
        cache.set_feature_map(1, 0x0006, 0b101);
        assert_eq!(cache.feature_map(1, 0x0006), Some(0b101));
    }
}
