//! BIP9 threshold state computation
//!
//! States change only at window boundaries. The state of a block is the
//! state computed for the last header of the previous window, so all
//! memoisation is keyed by window-boundary headers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::chain::ChainedHeader;
use crate::constants::*;
use crate::error::{ConsensusError, Result};
use crate::network::{Bip9Deployment, ConsensusParams};
use crate::types::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThresholdState {
    /// First state of every deployment; the genesis block is Defined for all of them.
    Defined,
    /// Signalling window is open (median time past reached the start time).
    Started,
    /// A full window signalled above the threshold; active one window later.
    LockedIn,
    /// Terminal: rules are enforced.
    Active,
    /// Terminal: timed out before locking in.
    Failed,
}

impl ThresholdState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ThresholdState::Active | ThresholdState::Failed)
    }
}

/// Signalling statistics for the window containing a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeploymentStatistics {
    pub period: u32,
    pub threshold: u32,
    /// Blocks of the current window seen so far.
    pub elapsed: u32,
    /// Signalling blocks among them.
    pub count: u32,
    /// Whether the threshold can still be reached in this window.
    pub possible: bool,
}

#[derive(Debug, Clone, Copy)]
struct CachedState {
    height: Option<Height>,
    state: ThresholdState,
}

/// Per-deployment memo of states keyed by window-boundary header hash
/// (`None` stands for "before genesis").
type StateCache = HashMap<Option<Hash>, CachedState>;

/// Owned deployment state cache. One mutex guards the memo table; every public
/// method takes it, computes, and releases it before returning.
pub struct ThresholdConditionCache {
    params: Arc<ConsensusParams>,
    cache: Mutex<Vec<StateCache>>,
}

impl ThresholdConditionCache {
    pub fn new(params: Arc<ConsensusParams>) -> Self {
        let cache = vec![StateCache::new(); params.deployments.len()];
        Self {
            params,
            cache: Mutex::new(cache),
        }
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    /// GetStates: state of every deployment for the block following `prev`.
    ///
    /// `None` means the block being evaluated is the genesis block.
    pub fn get_states(&self, prev: Option<&Arc<ChainedHeader>>) -> Vec<ThresholdState> {
        let mut cache = self.cache.lock();
        (0..self.params.deployments.len())
            .map(|deployment| self.get_state_locked(&mut cache, prev, deployment))
            .collect()
    }

    /// State of a single deployment for the block following `prev`.
    pub fn get_state(&self, prev: Option<&Arc<ChainedHeader>>, deployment: usize) -> Result<ThresholdState> {
        self.deployment(deployment)?;
        let mut cache = self.cache.lock();
        Ok(self.get_state_locked(&mut cache, prev, deployment))
    }

    /// Height of the first block of the window in which the current state began.
    pub fn state_since_height(&self, prev: Option<&Arc<ChainedHeader>>, deployment: usize) -> Result<Height> {
        let params = self.deployment(deployment)?;
        if params.start_time == ALWAYS_ACTIVE || params.start_time == NEVER_ACTIVE {
            return Ok(0);
        }

        let mut cache = self.cache.lock();
        let initial = self.get_state_locked(&mut cache, prev, deployment);
        if initial == ThresholdState::Defined {
            return Ok(0);
        }

        let period = self.params.miner_confirmation_window as i64;
        let mut boundary = match window_boundary(prev, period) {
            Some(boundary) => boundary,
            None => return Ok(0),
        };
        while let Some(parent) = ancestor_at(&boundary, boundary.height() as i64 - period) {
            if self.get_state_locked(&mut cache, Some(&parent), deployment) != initial {
                break;
            }
            boundary = parent;
        }
        Ok(boundary.height() + 1)
    }

    /// Signalling statistics of the window containing `header`.
    pub fn statistics(&self, header: Option<&Arc<ChainedHeader>>, deployment: usize) -> Result<DeploymentStatistics> {
        let bit = self.deployment(deployment)?;
        let period = self.params.miner_confirmation_window;
        let threshold = self.params.threshold_for(deployment);
        let mut stats = DeploymentStatistics {
            period,
            threshold,
            elapsed: 0,
            count: 0,
            possible: true,
        };
        let header = match header {
            Some(header) => header,
            None => return Ok(stats),
        };

        let end_of_prev_period = window_boundary(Some(header), period as i64);
        let start_height = end_of_prev_period.as_ref().map(|h| h.height() + 1).unwrap_or(0);
        stats.elapsed = header.height() + 1 - start_height;

        let mut current = Some(Arc::clone(header));
        while let Some(h) = current {
            if h.height() < start_height {
                break;
            }
            if signals(h.header().version, bit) {
                stats.count += 1;
            }
            current = h.previous().cloned();
        }

        stats.possible = period.saturating_sub(threshold) >= stats.elapsed - stats.count;
        Ok(stats)
    }

    /// Version a block built on `prev` should carry to signal every
    /// deployment that is Started or LockedIn.
    pub fn compute_block_version(&self, prev: Option<&Arc<ChainedHeader>>) -> i32 {
        let states = self.get_states(prev);
        self.params
            .deployments
            .iter()
            .zip(states)
            .filter(|(_, state)| matches!(state, ThresholdState::Started | ThresholdState::LockedIn))
            .fold(VERSIONBITS_TOP_BITS, |version, (deployment, _)| version | deployment.mask())
    }

    /// Drops memo entries above `height`, e.g. after a reorg abandoned them.
    pub fn evict_above(&self, height: Height) {
        let mut cache = self.cache.lock();
        let mut removed = 0;
        for states in cache.iter_mut() {
            let before = states.len();
            states.retain(|_, entry| entry.height.map(|h| h <= height).unwrap_or(true));
            removed += before - states.len();
        }
        debug!(height, removed, "evicted threshold cache entries");
    }

    /// Number of memoised entries across all deployments.
    pub fn len(&self) -> usize {
        self.cache.lock().iter().map(|states| states.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn deployment(&self, deployment: usize) -> Result<&Bip9Deployment> {
        self.params
            .deployments
            .get(deployment)
            .ok_or(ConsensusError::InvalidArgument("unknown deployment"))
    }

    fn get_state_locked(
        &self,
        cache: &mut [StateCache],
        prev: Option<&Arc<ChainedHeader>>,
        deployment: usize,
    ) -> ThresholdState {
        let params = &self.params.deployments[deployment];
        if params.start_time == ALWAYS_ACTIVE {
            return ThresholdState::Active;
        }
        if params.start_time == NEVER_ACTIVE {
            return ThresholdState::Failed;
        }

        let period = self.params.miner_confirmation_window as i64;
        let threshold = self.params.threshold_for(deployment);
        let states = &mut cache[deployment];

        // Walk back one window at a time until a known state is found.
        let mut boundary = window_boundary(prev, period);
        let mut to_compute = Vec::new();
        let mut state = loop {
            let key = boundary.as_ref().map(|h| h.hash());
            if let Some(entry) = states.get(&key) {
                break entry.state;
            }
            match boundary {
                None => {
                    states.insert(None, CachedState { height: None, state: ThresholdState::Defined });
                    break ThresholdState::Defined;
                }
                Some(header) => {
                    if header.median_time_past() < params.start_time {
                        states.insert(
                            key,
                            CachedState { height: Some(header.height()), state: ThresholdState::Defined },
                        );
                        break ThresholdState::Defined;
                    }
                    boundary = ancestor_at(&header, header.height() as i64 - period);
                    to_compute.push(header);
                }
            }
        };

        // Replay forward from the known state.
        while let Some(header) = to_compute.pop() {
            let next = next_state(state, &header, params, period, threshold);
            if next != state {
                info!(
                    deployment = params.name.as_str(),
                    height = header.height() + 1,
                    from = ?state,
                    to = ?next,
                    "deployment state transition"
                );
            }
            states.insert(
                Some(header.hash()),
                CachedState { height: Some(header.height()), state: next },
            );
            state = next;
        }

        state
    }
}

/// Transition function applied at a window boundary.
fn next_state(
    state: ThresholdState,
    boundary: &Arc<ChainedHeader>,
    params: &Bip9Deployment,
    period: i64,
    threshold: u32,
) -> ThresholdState {
    let median_time = boundary.median_time_past();
    match state {
        ThresholdState::Defined => {
            if median_time >= params.timeout {
                ThresholdState::Failed
            } else if median_time >= params.start_time {
                ThresholdState::Started
            } else {
                ThresholdState::Defined
            }
        }
        ThresholdState::Started => {
            if median_time >= params.timeout {
                return ThresholdState::Failed;
            }
            if count_signalling(boundary, params, period) >= threshold {
                ThresholdState::LockedIn
            } else {
                ThresholdState::Started
            }
        }
        ThresholdState::LockedIn => {
            if boundary.height() + 1 >= params.min_activation_height {
                ThresholdState::Active
            } else {
                ThresholdState::LockedIn
            }
        }
        ThresholdState::Active | ThresholdState::Failed => state,
    }
}

/// Counts signalling headers in the window ending at `boundary`.
fn count_signalling(boundary: &Arc<ChainedHeader>, params: &Bip9Deployment, period: i64) -> u32 {
    let mut count = 0;
    let mut current = Some(Arc::clone(boundary));
    for _ in 0..period {
        let header = match current {
            Some(header) => header,
            None => break,
        };
        if signals(header.header().version, params) {
            count += 1;
        }
        current = header.previous().cloned();
    }
    count
}

/// Whether `version` signals for `deployment`.
pub fn signals(version: i32, deployment: &Bip9Deployment) -> bool {
    (version & VERSIONBITS_TOP_MASK) == VERSIONBITS_TOP_BITS && (version & deployment.mask()) != 0
}

/// Last header of the window preceding the block after `prev`.
fn window_boundary(prev: Option<&Arc<ChainedHeader>>, period: i64) -> Option<Arc<ChainedHeader>> {
    let prev = prev?;
    let height = prev.height() as i64;
    ancestor_at(prev, height - ((height + 1) % period))
}

fn ancestor_at(header: &Arc<ChainedHeader>, height: i64) -> Option<Arc<ChainedHeader>> {
    if height < 0 {
        return None;
    }
    header.get_ancestor(height as Height)
}
