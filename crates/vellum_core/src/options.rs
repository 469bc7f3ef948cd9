//! Runtime tunables of an open environment.

use crate::error::{CoreError, CoreResult};
use std::fmt;
use std::str::FromStr;

/// A tunable readable with `get_option` and writable with `set_option`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvOption {
    /// Unsynced bytes that trigger an automatic fsync (0 = off).
    SyncBytes,
    /// Milliseconds after which unsynced commits are fsynced (0 = off).
    SyncPeriod,
    /// Maximum number of named maps. Fixed once open.
    MaxMaps,
    /// Size of the reader table. Fixed once open.
    MaxReaders,
    /// Initial capacity of a write transaction's change buffer.
    TxnDpInitial,
    /// Soft limit of a write transaction's change buffer.
    TxnDpLimit,
    /// Reserve of reusable buffers kept between transactions.
    DpReserveLimit,
    /// Loose pages kept before returning them to the free list.
    LooseLimit,
    /// Largest spill fraction, as 1/n of the dirty set.
    SpillMaxDenominator,
    /// Smallest spill fraction, as 1/n of the dirty set.
    SpillMinDenominator,
    /// Spill fraction of a parent when a child begins.
    SpillParent4ChildDenominator,
    /// Page fill, in 1/65536 units, below which pages merge.
    MergeThreshold16Dot16Percent,
}

impl EnvOption {
    /// Every option, in declaration order.
    pub const ALL: [Self; 12] = [
        Self::SyncBytes,
        Self::SyncPeriod,
        Self::MaxMaps,
        Self::MaxReaders,
        Self::TxnDpInitial,
        Self::TxnDpLimit,
        Self::DpReserveLimit,
        Self::LooseLimit,
        Self::SpillMaxDenominator,
        Self::SpillMinDenominator,
        Self::SpillParent4ChildDenominator,
        Self::MergeThreshold16Dot16Percent,
    ];

    /// Returns the option's name as accepted by [`FromStr`].
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SyncBytes => "sync_bytes",
            Self::SyncPeriod => "sync_period",
            Self::MaxMaps => "max_maps",
            Self::MaxReaders => "max_readers",
            Self::TxnDpInitial => "txn_dp_initial",
            Self::TxnDpLimit => "txn_dp_limit",
            Self::DpReserveLimit => "dp_reserve_limit",
            Self::LooseLimit => "loose_limit",
            Self::SpillMaxDenominator => "spill_max_denominator",
            Self::SpillMinDenominator => "spill_min_denominator",
            Self::SpillParent4ChildDenominator => "spill_parent4child_denominator",
            Self::MergeThreshold16Dot16Percent => "merge_threshold_16dot16_percent",
        }
    }

    /// Accepted value range.
    #[must_use]
    pub const fn range(self) -> (u64, u64) {
        match self {
            Self::SyncBytes | Self::SyncPeriod => (0, u32::MAX as u64),
            Self::MaxMaps => (0, crate::config::MAX_MAPS_LIMIT as u64),
            Self::MaxReaders => (1, crate::config::MAX_READERS_LIMIT as u64),
            Self::TxnDpInitial | Self::TxnDpLimit => (256, PAGE_LIST_LIMIT),
            Self::DpReserveLimit => (0, PAGE_LIST_LIMIT),
            Self::LooseLimit
            | Self::SpillMaxDenominator
            | Self::SpillMinDenominator
            | Self::SpillParent4ChildDenominator => (0, 255),
            Self::MergeThreshold16Dot16Percent => (8192, 32768),
        }
    }

    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for EnvOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EnvOption {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|option| option.name() == s)
            .ok_or_else(|| CoreError::config(format!("unknown option: {s}")))
    }
}

const PAGE_LIST_LIMIT: u64 = 0x7FFF_FFFF;

const DEFAULTS: [u64; 12] = [
    0,      // sync_bytes
    0,      // sync_period
    0,      // max_maps, taken from the config
    0,      // max_readers, taken from the config
    1024,   // txn_dp_initial
    65_536, // txn_dp_limit
    1024,   // dp_reserve_limit
    64,     // loose_limit
    8,      // spill_max_denominator
    8,      // spill_min_denominator
    0,      // spill_parent4child_denominator
    16_384, // merge_threshold_16dot16_percent
];

/// Current option values of one environment.
#[derive(Debug, Clone)]
pub(crate) struct OptionTable {
    values: [u64; 12],
}

impl OptionTable {
    pub(crate) fn new(max_maps: u32, max_readers: u32) -> Self {
        let mut values = DEFAULTS;
        values[EnvOption::MaxMaps.index()] = u64::from(max_maps);
        values[EnvOption::MaxReaders.index()] = u64::from(max_readers);
        Self { values }
    }

    pub(crate) fn get(&self, option: EnvOption) -> u64 {
        self.values[option.index()]
    }

    pub(crate) fn set(&mut self, option: EnvOption, value: u64) -> CoreResult<()> {
        if matches!(option, EnvOption::MaxMaps | EnvOption::MaxReaders) {
            return Err(CoreError::config(format!(
                "{option} is fixed once the environment is open"
            )));
        }
        let (min, max) = option.range();
        if value < min || value > max {
            return Err(CoreError::config(format!(
                "{option} must be in {min}..={max}, got {value}"
            )));
        }
        let (initial, limit) = match option {
            EnvOption::TxnDpInitial => (value, self.get(EnvOption::TxnDpLimit)),
            EnvOption::TxnDpLimit => (self.get(EnvOption::TxnDpInitial), value),
            _ => (0, u64::MAX),
        };
        if initial > limit {
            return Err(CoreError::config(format!(
                "txn_dp_initial {initial} exceeds txn_dp_limit {limit}"
            )));
        }
        self.values[option.index()] = value;
        Ok(())
    }

    pub(crate) fn reset(&mut self, option: EnvOption) -> CoreResult<()> {
        if matches!(option, EnvOption::MaxMaps | EnvOption::MaxReaders) {
            return Err(CoreError::config(format!(
                "{option} is fixed once the environment is open"
            )));
        }
        self.values[option.index()] = DEFAULTS[option.index()];
        let initial = EnvOption::TxnDpInitial.index();
        let limit = self.values[EnvOption::TxnDpLimit.index()];
        self.values[initial] = self.values[initial].min(limit);
        Ok(())
    }
}
