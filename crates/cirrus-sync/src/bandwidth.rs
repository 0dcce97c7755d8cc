//! Bandwidth allocation across concurrent transfers
//!
//! Each direction has an optional byte-rate limit. Every active transfer
//! holds a share of it, published through an `Arc<AtomicU64>` that the
//! transport reads via [`TransferProgress::rate_limit`]. Shares are
//! recomputed whenever a transfer joins or leaves, so running transfers
//! speed up or slow down without being restarted.
//!
//! ## Sharing rule
//!
//! With `n` transfers, a limit `L` and priority weights `w_i` summing to `W`:
//!
//! - if `L >= n * 1 KiB/s`, transfer `i` gets `1 KiB/s + (L - n KiB/s) * w_i / W`
//! - otherwise every transfer gets `L / n`, and the `L % n` highest
//!   priorities get one more byte, so at least one transfer moves
//!
//! Integer division rounds down, so the sum of shares never exceeds `L`.
//!
//! [`TransferProgress::rate_limit`]: cirrus_core::ports::TransferProgress::rate_limit

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use cirrus_core::config::BandwidthConfig;
use cirrus_core::domain::TransferId;
use cirrus_core::ports::UNLIMITED_RATE;

/// Share every transfer keeps when the limit allows it (1 KiB/s)
const FLOOR_BYTES_PER_SEC: u64 = 1024;

/// Which limit a transfer draws from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Upload,
    Download,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upload => write!(f, "upload"),
            Direction::Download => write!(f, "download"),
        }
    }
}

/// Relative weight of a transfer's share
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TransferPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl TransferPriority {
    #[must_use]
    pub fn weight(&self) -> u64 {
        match self {
            TransferPriority::Low => 1,
            TransferPriority::Normal => 2,
            TransferPriority::High => 3,
        }
    }
}

#[derive(Debug)]
struct Allocation {
    direction: Direction,
    priority: TransferPriority,
    rate: Arc<AtomicU64>,
}

#[derive(Debug, Default)]
struct AllocatorState {
    upload_limit: Option<u64>,
    download_limit: Option<u64>,
    power_saving: bool,
    paused: bool,
    transfers: HashMap<TransferId, Allocation>,
}

impl AllocatorState {
    fn effective_limit(&self, direction: Direction) -> Option<u64> {
        let limit = match direction {
            Direction::Upload => self.upload_limit,
            Direction::Download => self.download_limit,
        };
        limit.map(|l| if self.power_saving { (l / 2).max(1) } else { l })
    }

    fn rebalance(&self, direction: Direction) {
        let members: Vec<&Allocation> = self
            .transfers
            .values()
            .filter(|a| a.direction == direction)
            .collect();
        if members.is_empty() {
            return;
        }

        if self.paused {
            for member in &members {
                member.rate.store(0, Ordering::Relaxed);
            }
            return;
        }

        let Some(limit) = self.effective_limit(direction) else {
            for member in &members {
                member.rate.store(UNLIMITED_RATE, Ordering::Relaxed);
            }
            return;
        };

        let n = members.len() as u64;
        let floors = n.saturating_mul(FLOOR_BYTES_PER_SEC);
        if limit >= floors {
            let spare = limit - floors;
            let total_weight: u64 = members.iter().map(|m| m.priority.weight()).sum();
            for member in &members {
                let share = spare.saturating_mul(member.priority.weight()) / total_weight;
                member.rate.store(FLOOR_BYTES_PER_SEC + share, Ordering::Relaxed);
            }
        } else {
            // The remainder goes to the highest priorities so no byte of the
            // limit is left unused
            let mut members = members;
            members.sort_by_key(|m| std::cmp::Reverse(m.priority.weight()));
            let (base, extra) = (limit / n, limit % n);
            for (i, member) in members.iter().enumerate() {
                let bonus = u64::from((i as u64) < extra);
                member.rate.store(base + bonus, Ordering::Relaxed);
            }
        }
        debug!(direction = %direction, transfers = n, limit, "Bandwidth rebalanced");
    }

    fn rebalance_all(&self) {
        self.rebalance(Direction::Upload);
        self.rebalance(Direction::Download);
    }
}

/// Hands out byte-rate shares to active transfers
#[derive(Debug, Default)]
pub struct BandwidthAllocator {
    state: Mutex<AllocatorState>,
}

impl BandwidthAllocator {
    /// Allocator with the given limits in bytes per second
    pub fn new(upload_limit: Option<u64>, download_limit: Option<u64>) -> Self {
        Self {
            state: Mutex::new(AllocatorState {
                upload_limit,
                download_limit,
                ..AllocatorState::default()
            }),
        }
    }

    pub fn from_config(config: &BandwidthConfig) -> Self {
        let allocator = Self::new(config.upload_limit_bytes(), config.download_limit_bytes());
        allocator.set_power_saving(config.power_saving);
        allocator
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut AllocatorState) -> T) -> T {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }

    /// Register a transfer and return its live rate cell
    ///
    /// Allocating an id twice returns the existing cell.
    pub fn allocate(
        &self,
        id: TransferId,
        direction: Direction,
        priority: TransferPriority,
    ) -> Arc<AtomicU64> {
        self.with_state(|state| {
            if let Some(existing) = state.transfers.get(&id) {
                return Arc::clone(&existing.rate);
            }
            let rate = Arc::new(AtomicU64::new(0));
            state.transfers.insert(
                id,
                Allocation {
                    direction,
                    priority,
                    rate: Arc::clone(&rate),
                },
            );
            state.rebalance(direction);
            rate
        })
    }

    /// Give a transfer's share back; calling it again is harmless
    pub fn release(&self, id: &TransferId) -> bool {
        self.with_state(|state| match state.transfers.remove(id) {
            Some(allocation) => {
                state.rebalance(allocation.direction);
                true
            }
            None => false,
        })
    }

    /// Change both limits; running transfers are rebalanced
    pub fn set_limits(&self, upload_limit: Option<u64>, download_limit: Option<u64>) {
        self.with_state(|state| {
            state.upload_limit = upload_limit;
            state.download_limit = download_limit;
            state.rebalance_all();
        });
        info!(?upload_limit, ?download_limit, "Bandwidth limits changed");
    }

    /// Halve the configured limits while enabled
    pub fn set_power_saving(&self, enabled: bool) {
        self.with_state(|state| {
            state.power_saving = enabled;
            state.rebalance_all();
        });
    }

    /// Set every share to zero until [`BandwidthAllocator::resume_all`]
    pub fn pause_all(&self) {
        self.with_state(|state| {
            state.paused = true;
            state.rebalance_all();
        });
    }

    pub fn resume_all(&self) {
        self.with_state(|state| {
            state.paused = false;
            state.rebalance_all();
        });
    }

    /// Current share of `id`, `None` if it holds no allocation
    pub fn allocation(&self, id: &TransferId) -> Option<u64> {
        self.with_state(|state| {
            state
                .transfers
                .get(id)
                .map(|a| a.rate.load(Ordering::Relaxed))
        })
    }

    /// Sum of the shares in `direction`
    pub fn total_allocated(&self, direction: Direction) -> u64 {
        self.with_state(|state| {
            state
                .transfers
                .values()
                .filter(|a| a.direction == direction)
                .fold(0u64, |sum, a| sum.saturating_add(a.rate.load(Ordering::Relaxed)))
        })
    }

    /// Limit in force for `direction`, after power saving
    pub fn effective_limit(&self, direction: Direction) -> Option<u64> {
        self.with_state(|state| state.effective_limit(direction))
    }

    pub fn active_transfers(&self) -> usize {
        self.with_state(|state| state.transfers.len())
    }
}
