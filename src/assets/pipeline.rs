use std::sync::Arc;
use std::sync::mpsc::Sender;

use dashmap::DashMap;
use itertools::Itertools;
use log::{debug, trace};
use quick_cache::sync::Cache;

use crate::assets::{AssetDecoder, AssetId, AssetKind, DecodeResult, DecodedAsset};
use crate::scene::entity::LocalHandle;

#[derive(Debug)]
struct PendingRequest {
    kind: AssetKind,
    consumers: Vec<LocalHandle>,
}

/// Bridges the dispatcher to the external decode collaborator. Enforces
/// at-most-one outstanding request per asset id; additional entities needing
/// the same asset attach to the existing request (multi-consumer fan-out).
pub struct AssetPipeline {
    outstanding: DashMap<AssetId, PendingRequest>,
    cache: Cache<AssetId, DecodedAsset>,
    decoder: Arc<dyn AssetDecoder>,
    /// Cache hits are replayed through the regular result queue so attachment
    /// still happens on the main-thread drain, same as a fresh decode.
    result_sender: Sender<DecodeResult>,
}

impl AssetPipeline {
    pub fn new(
        decoder: Arc<dyn AssetDecoder>,
        result_sender: Sender<DecodeResult>,
        cache_capacity: usize,
    ) -> Self {
        Self {
            outstanding: DashMap::new(),
            cache: Cache::new(cache_capacity),
            decoder,
            result_sender,
        }
    }

    /// Attaches `owner` to the request for `asset_id`, creating and forwarding
    /// it to the decode collaborator if it is the first need.
    pub fn request(&self, asset_id: AssetId, kind: AssetKind, owner: LocalHandle) {
        if let Some(mut pending) = self.outstanding.get_mut(&asset_id) {
            if !pending.consumers.contains(&owner) {
                trace!("Attaching entity {} to in-flight request for {}", owner, asset_id);
                pending.consumers.push(owner);
            }
            return;
        }

        self.outstanding.insert(
            asset_id,
            PendingRequest {
                kind,
                consumers: vec![owner],
            },
        );

        if let Some(cached) = self.cache.get(&asset_id) {
            trace!("Cache hit for {}, replaying through the result queue", asset_id);
            let _ = self.result_sender.send(DecodeResult::Decoded {
                asset_id,
                asset: cached,
            });
        } else {
            trace!("Forwarding {} ({:?}) to the decoder for entity {}", asset_id, kind, owner);
            self.decoder.decode(asset_id, kind);
        }
    }

    /// Detaches a removed entity from every pending request it was attached
    /// to. Requests are never actively cancelled: an in-flight decode with no
    /// consumers left simply delivers to nobody.
    pub fn detach(&self, owner: LocalHandle) {
        for mut entry in self.outstanding.iter_mut() {
            entry.consumers.retain(|consumer| *consumer != owner);
        }
    }

    /// Successful delivery: clears the outstanding entry, populates the cache
    /// and returns the consumers to attach the payload to.
    pub fn complete(&self, asset_id: AssetId, asset: &DecodedAsset) -> Vec<LocalHandle> {
        self.cache.insert(asset_id, asset.clone());
        match self.outstanding.remove(&asset_id) {
            Some((_, pending)) => pending.consumers,
            None => {
                debug!("Decode result for {} without an outstanding request", asset_id);
                Vec::new()
            }
        }
    }

    /// Failed delivery: clears the outstanding entry so a future need for the
    /// same asset retries naturally. Returns the consumers to flag as failed.
    pub fn fail(&self, asset_id: AssetId) -> Vec<LocalHandle> {
        self.outstanding
            .remove(&asset_id)
            .map(|(_, pending)| pending.consumers)
            .unwrap_or_default()
    }

    pub fn is_outstanding(&self, asset_id: AssetId) -> bool {
        self.outstanding.contains_key(&asset_id)
    }

    pub fn outstanding_len(&self) -> usize {
        self.outstanding.len()
    }

    pub fn consumers_of(&self, asset_id: AssetId) -> Vec<LocalHandle> {
        self.outstanding
            .get(&asset_id)
            .map(|pending| pending.consumers.iter().copied().collect_vec())
            .unwrap_or_default()
    }

    pub fn is_cached(&self, asset_id: AssetId) -> bool {
        self.cache.get(&asset_id).is_some()
    }

    pub fn clear(&self) {
        self.outstanding.clear();
        self.cache.clear();
    }
}
