use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::Sender;

use log::debug;

pub mod pipeline;

/// Stable asset key, shared by every entity that references the same mesh or
/// sculpt map. Doubles as the decoded-asset cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssetId(pub u128);

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "asset-{:x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Mesh,
    Sculpt,
    Texture,
    Animation,
}

/// Opaque decoded payload. Ownership transfers to the rendering collaborator
/// on attach; the pipeline only keeps the cached `Arc`.
#[derive(Debug, Clone)]
pub struct DecodedAsset {
    pub kind: AssetKind,
    pub payload: Arc<Vec<u8>>,
}

#[derive(Debug)]
pub enum DecodeResult {
    Decoded { asset_id: AssetId, asset: DecodedAsset },
    Failed { asset_id: AssetId, reason: String },
}

impl DecodeResult {
    pub fn asset_id(&self) -> AssetId {
        match self {
            DecodeResult::Decoded { asset_id, .. } => *asset_id,
            DecodeResult::Failed { asset_id, .. } => *asset_id,
        }
    }
}

/// Callback half handed to the decode collaborator. May be invoked from any
/// worker thread; it only ever enqueues, the registry is never touched here.
#[derive(Clone)]
pub struct DecodeResultSink {
    sender: Sender<DecodeResult>,
}

impl DecodeResultSink {
    pub fn new(sender: Sender<DecodeResult>) -> Self {
        Self { sender }
    }

    pub fn on_decoded(&self, asset_id: AssetId, asset: DecodedAsset) {
        if self
            .sender
            .send(DecodeResult::Decoded { asset_id, asset })
            .is_err()
        {
            debug!("Dropping decode result for {} after shutdown", asset_id);
        }
    }

    pub fn on_decode_failed(&self, asset_id: AssetId, reason: impl Into<String>) {
        if self
            .sender
            .send(DecodeResult::Failed {
                asset_id,
                reason: reason.into(),
            })
            .is_err()
        {
            debug!("Dropping decode failure for {} after shutdown", asset_id);
        }
    }
}

/// The external decode collaborator. `decode` is fire-and-forget; results
/// come back asynchronously through the `DecodeResultSink` the collaborator
/// was constructed with.
pub trait AssetDecoder: Send + Sync {
    fn decode(&self, asset_id: AssetId, kind: AssetKind);
}
