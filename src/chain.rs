//! Header chain collaborator
//!
//! `ChainedHeader` is an immutable, reference-counted link in a chain of
//! headers. The rule chains and the deployment cache only walk it backwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::block::hash_header;
use crate::constants::MEDIAN_TIME_SPAN;
use crate::types::*;

#[derive(Debug)]
pub struct ChainedHeader {
    header: BlockHeader,
    hash: Hash,
    height: Height,
    previous: Option<Arc<ChainedHeader>>,
}

impl ChainedHeader {
    /// Starts a chain at height zero.
    pub fn genesis(header: BlockHeader) -> Arc<Self> {
        Arc::new(Self {
            hash: hash_header(&header),
            header,
            height: 0,
            previous: None,
        })
    }

    /// Links `header` on top of `self`. The header's `prev_block_hash` is
    /// expected to be `self.hash()`; the caller owns that check.
    pub fn extend(self: &Arc<Self>, header: BlockHeader) -> Arc<Self> {
        Arc::new(Self {
            hash: hash_header(&header),
            header,
            height: self.height + 1,
            previous: Some(Arc::clone(self)),
        })
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn previous(&self) -> Option<&Arc<ChainedHeader>> {
        self.previous.as_ref()
    }

    /// Ancestor at `height`, or `self` when `height` is our own height.
    pub fn get_ancestor(self: &Arc<Self>, height: Height) -> Option<Arc<ChainedHeader>> {
        if height > self.height {
            return None;
        }
        let mut current = Arc::clone(self);
        while current.height > height {
            current = Arc::clone(current.previous.as_ref()?);
        }
        Some(current)
    }

    /// Median timestamp of this header and up to ten predecessors.
    pub fn median_time_past(&self) -> i64 {
        let mut times = Vec::with_capacity(MEDIAN_TIME_SPAN);
        let mut current = Some(self);
        while let Some(header) = current {
            if times.len() == MEDIAN_TIME_SPAN {
                break;
            }
            times.push(header.header.timestamp as i64);
            current = header.previous.as_deref();
        }
        times.sort_unstable();
        times[times.len() / 2]
    }

    /// Whether `other` is `self` or one of its ancestors.
    pub fn contains(self: &Arc<Self>, other: &ChainedHeader) -> bool {
        self.get_ancestor(other.height)
            .map(|ancestor| ancestor.hash == other.hash)
            .unwrap_or(false)
    }

    /// Finds the header with `hash` among `self` and its ancestors.
    pub fn find_ancestor_by_hash(self: &Arc<Self>, hash: &Hash) -> Option<Arc<ChainedHeader>> {
        let mut current = Some(Arc::clone(self));
        while let Some(header) = current {
            if &header.hash == hash {
                return Some(header);
            }
            current = header.previous.clone();
        }
        None
    }
}

impl Drop for ChainedHeader {
    // Unlink ancestors one at a time; the default drop recurses once per header.
    fn drop(&mut self) {
        let mut previous = self.previous.take();
        while let Some(header) = previous {
            previous = match Arc::try_unwrap(header) {
                Ok(mut owned) => owned.previous.take(),
                Err(_) => None,
            };
        }
    }
}

/// Read-only access to the node's best chain.
pub trait ChainIndexer: Send + Sync {
    fn tip(&self) -> Option<Arc<ChainedHeader>>;
}

impl ChainIndexer for Option<Arc<ChainedHeader>> {
    fn tip(&self) -> Option<Arc<ChainedHeader>> {
        self.clone()
    }
}

/// Shared, updatable chain tip for components that follow the best chain.
#[derive(Debug, Default)]
pub struct ChainTip {
    tip: RwLock<Option<Arc<ChainedHeader>>>,
}

impl ChainTip {
    pub fn new(tip: Option<Arc<ChainedHeader>>) -> Self {
        Self { tip: RwLock::new(tip) }
    }

    pub fn set_tip(&self, tip: Option<Arc<ChainedHeader>>) {
        *self.tip.write() = tip;
    }
}

impl ChainIndexer for ChainTip {
    fn tip(&self) -> Option<Arc<ChainedHeader>> {
        self.tip.read().clone()
    }
}

/// Hard-coded block hashes at given heights.
#[derive(Debug, Clone, Default)]
pub struct Checkpoints {
    enabled: bool,
    checkpoints: BTreeMap<Height, Hash>,
}

impl Checkpoints {
    pub fn new(checkpoints: BTreeMap<Height, Hash>, enabled: bool) -> Self {
        Self { enabled, checkpoints }
    }

    /// A header passes unless a checkpoint exists at its height with another hash.
    pub fn check_hardened(&self, height: Height, hash: &Hash) -> bool {
        if !self.enabled {
            return true;
        }
        match self.checkpoints.get(&height) {
            Some(expected) => expected == hash,
            None => true,
        }
    }

    pub fn last_checkpoint_height(&self) -> Option<Height> {
        if !self.enabled {
            return None;
        }
        self.checkpoints.keys().next_back().copied()
    }

    /// Whether `height` lies at or below the last checkpoint.
    pub fn is_below_last_checkpoint(&self, height: Height) -> bool {
        self.last_checkpoint_height()
            .map(|last| height <= last)
            .unwrap_or(false)
    }
}

/// The assume-valid block and the header chain leading to it.
///
/// A header is covered when it lies on the best header chain at or below the
/// assume-valid block. The chain below that block is resolved once per best
/// header, after which each lookup is a single index.
#[derive(Debug, Default)]
pub struct AssumeValid {
    hash: Option<Hash>,
    resolved: Mutex<Option<ResolvedChain>>,
}

#[derive(Debug)]
struct ResolvedChain {
    best: Hash,
    /// Hash at each height up to the assume-valid block; empty when that
    /// block is not on the best header chain.
    hashes: Vec<Hash>,
}

impl AssumeValid {
    pub fn new(hash: Option<Hash>) -> Self {
        Self {
            hash,
            resolved: Mutex::new(None),
        }
    }

    pub fn hash(&self) -> Option<&Hash> {
        self.hash.as_ref()
    }

    /// Whether `header` may skip script verification given `best_header`.
    pub fn covers(&self, header: &ChainedHeader, best_header: Option<&Arc<ChainedHeader>>) -> bool {
        let (best, assumed) = match (best_header, self.hash.as_ref()) {
            (Some(best), Some(assumed)) => (best, assumed),
            _ => return false,
        };

        let mut resolved = self.resolved.lock();
        let stale = resolved.as_ref().map(|chain| chain.best != best.hash()).unwrap_or(true);
        if stale {
            *resolved = Some(ResolvedChain {
                best: best.hash(),
                hashes: resolve_hashes(best, assumed),
            });
        }
        resolved
            .as_ref()
            .and_then(|chain| chain.hashes.get(header.height() as usize))
            .map(|hash| *hash == header.hash())
            .unwrap_or(false)
    }
}

fn resolve_hashes(best: &Arc<ChainedHeader>, assumed: &Hash) -> Vec<Hash> {
    let mut current = best.find_ancestor_by_hash(assumed);
    let mut hashes = Vec::with_capacity(current.as_ref().map(|h| h.height() as usize + 1).unwrap_or(0));
    while let Some(header) = current {
        hashes.push(header.hash());
        current = header.previous().cloned();
    }
    hashes.reverse();
    hashes
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;

    pub fn header_with(prev: Hash, version: i32, timestamp: u32, nonce: u32) -> BlockHeader {
        BlockHeader {
            version,
            prev_block_hash: prev,
            merkle_root: [0; 32],
            timestamp,
            bits: 0x207f_ffff,
            nonce,
        }
    }

    /// Builds `count` headers after `tip` (or a genesis) with the given
    /// version and timestamps spaced `spacing` seconds apart.
    pub fn build_chain(
        tip: Option<Arc<ChainedHeader>>,
        count: u32,
        version: i32,
        start_time: u32,
        spacing: u32,
    ) -> Arc<ChainedHeader> {
        let mut current = match tip {
            Some(tip) => tip,
            None => ChainedHeader::genesis(header_with([0; 32], version, start_time, 0)),
        };
        for _ in 0..count {
            let time = current.header().timestamp + spacing;
            let header = header_with(current.hash(), version, time, current.height() + 1);
            current = current.extend(header);
        }
        current
    }
}
