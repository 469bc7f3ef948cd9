//! Environment configuration.

use crate::error::{CoreError, CoreResult};
use crate::limits::{self, DEFAULT_PAGE_SIZE};
use crate::options::EnvOption;

/// Default lower bound of the data file size.
pub const DEFAULT_LOWER: u64 = 1024 * 1024;

/// Default growth increment.
pub const DEFAULT_GROWTH_STEP: u64 = 1024 * 1024;

/// Default upper bound of the data file size.
pub const DEFAULT_UPPER: u64 = 64 * 1024 * 1024 * 1024;

/// Default shrink threshold.
pub const DEFAULT_SHRINK_THRESHOLD: u64 = 2 * 1024 * 1024;

/// Default maximum number of named maps.
pub const DEFAULT_MAX_MAPS: u32 = 42;

/// Default size of the reader table.
pub const DEFAULT_MAX_READERS: u32 = 126;

/// Largest reader table.
pub const MAX_READERS_LIMIT: u32 = 32767;

/// Largest number of named maps.
pub const MAX_MAPS_LIMIT: u32 = 32765;

/// The upper bound must hold at least this many pages.
const MIN_PAGES: u64 = 4;

/// Requested sizing policy of the data file.
///
/// Every field is optional; `None` keeps the value stored in an existing
/// environment, or the engine default for a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Geometry {
    /// Size below which the file is never accounted.
    pub lower: Option<u64>,
    /// Increment used when the file grows.
    pub growth_step: Option<u64>,
    /// Size the file may never exceed.
    pub upper: Option<u64>,
    /// Unused tail that triggers a shrink.
    pub shrink_threshold: Option<u64>,
    /// Page size, a power of two in `256..=65536`.
    pub page_size: Option<u32>,
}

impl Geometry {
    /// Creates a geometry with every field left to the engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lower: None,
            growth_step: None,
            upper: None,
            shrink_threshold: None,
            page_size: None,
        }
    }

    /// Sets the lower bound.
    #[must_use]
    pub const fn lower(mut self, bytes: u64) -> Self {
        self.lower = Some(bytes);
        self
    }

    /// Sets the growth increment.
    #[must_use]
    pub const fn growth_step(mut self, bytes: u64) -> Self {
        self.growth_step = Some(bytes);
        self
    }

    /// Sets the upper bound.
    #[must_use]
    pub const fn upper(mut self, bytes: u64) -> Self {
        self.upper = Some(bytes);
        self
    }

    /// Sets the shrink threshold.
    #[must_use]
    pub const fn shrink_threshold(mut self, bytes: u64) -> Self {
        self.shrink_threshold = Some(bytes);
        self
    }

    /// Sets the page size.
    #[must_use]
    pub const fn page_size(mut self, bytes: u32) -> Self {
        self.page_size = Some(bytes);
        self
    }

    /// Resolves the requested values against a stored geometry.
    ///
    /// The page size of an existing environment cannot change.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] for inconsistent values.
    pub fn resolve(&self, stored: Option<&EffectiveGeometry>) -> CoreResult<EffectiveGeometry> {
        let page_size = match (self.page_size, stored) {
            (Some(requested), Some(stored)) if requested != stored.page_size => {
                return Err(CoreError::config(format!(
                    "page size is fixed at {} for this environment, requested {requested}",
                    stored.page_size
                )));
            }
            (Some(requested), _) => requested,
            (None, Some(stored)) => stored.page_size,
            (None, None) => DEFAULT_PAGE_SIZE,
        };
        if !limits::is_valid_page_size(page_size) {
            return Err(CoreError::config(format!(
                "page size {page_size} must be a power of two between {} and {}",
                limits::MIN_PAGE_SIZE,
                limits::MAX_PAGE_SIZE
            )));
        }

        let upper = self
            .upper
            .or(stored.map(|g| g.upper))
            .unwrap_or(DEFAULT_UPPER);
        let lower = self
            .lower
            .or(stored.map(|g| g.lower))
            .unwrap_or(DEFAULT_LOWER.min(upper));
        let growth_step = self
            .growth_step
            .or(stored.map(|g| g.growth_step))
            .unwrap_or(DEFAULT_GROWTH_STEP.min(upper));
        let shrink_threshold = self
            .shrink_threshold
            .or(stored.map(|g| g.shrink_threshold))
            .unwrap_or(DEFAULT_SHRINK_THRESHOLD.min(upper));

        let geometry = EffectiveGeometry {
            lower,
            growth_step,
            upper,
            shrink_threshold,
            page_size,
        };
        geometry.validate()?;
        Ok(geometry)
    }
}

/// Geometry in force for an open environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveGeometry {
    /// Lower bound in bytes.
    pub lower: u64,
    /// Growth increment in bytes.
    pub growth_step: u64,
    /// Upper bound in bytes.
    pub upper: u64,
    /// Shrink threshold in bytes.
    pub shrink_threshold: u64,
    /// Page size in bytes.
    pub page_size: u32,
}

impl EffectiveGeometry {
    /// The geometry a fresh environment gets with nothing configured.
    #[must_use]
    pub const fn dynamic_default() -> Self {
        Self {
            lower: DEFAULT_LOWER,
            growth_step: DEFAULT_GROWTH_STEP,
            upper: DEFAULT_UPPER,
            shrink_threshold: DEFAULT_SHRINK_THRESHOLD,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Same as [`Self::dynamic_default`] but keeping this page size.
    #[must_use]
    pub const fn dynamic_with_page_size(&self) -> Self {
        let mut geometry = Self::dynamic_default();
        geometry.page_size = self.page_size;
        geometry
    }

    fn validate(&self) -> CoreResult<()> {
        let min_upper = MIN_PAGES * u64::from(self.page_size);
        if self.upper < min_upper {
            return Err(CoreError::config(format!(
                "upper bound {} is below the minimum of {min_upper} bytes",
                self.upper
            )));
        }
        if self.lower > self.upper {
            return Err(CoreError::config(format!(
                "lower bound {} exceeds upper bound {}",
                self.lower, self.upper
            )));
        }
        if self.growth_step == 0 || self.growth_step > self.upper {
            return Err(CoreError::config(format!(
                "growth step {} must be in 1..={}",
                self.growth_step, self.upper
            )));
        }
        if self.shrink_threshold > self.upper {
            return Err(CoreError::config(format!(
                "shrink threshold {} exceeds upper bound {}",
                self.shrink_threshold, self.upper
            )));
        }
        Ok(())
    }

    /// Accounted size of a data file currently `used` bytes long.
    #[must_use]
    pub fn map_size(&self, used: u64) -> u64 {
        let steps = used.div_ceil(self.growth_step);
        (steps * self.growth_step).max(self.lower).min(self.upper)
    }
}

/// What `begin_write` does while another write transaction is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriterPolicy {
    /// Fail immediately with a busy error.
    #[default]
    FailFast,
    /// Wait until the active writer finishes.
    Block,
}

/// Configuration for opening an environment.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Maximum number of named maps (the default map is not counted).
    pub max_maps: u32,

    /// Maximum number of concurrent read transactions.
    pub max_readers: u32,

    /// Requested geometry.
    pub geometry: Geometry,

    /// Behaviour of `begin_write` under contention.
    pub writer_policy: WriterPolicy,

    /// Whether write transactions and their cursors are pinned to the
    /// creating thread.
    pub thread_affinity: bool,

    /// Whether threads must call `register_thread` before reading.
    pub registered_readers: bool,

    /// Whether every commit is fsynced.
    pub sync_on_commit: bool,

    /// Open without write access.
    pub read_only: bool,

    /// Create the environment if it does not exist.
    pub create_if_missing: bool,

    /// Treat the path as the data file instead of a directory.
    pub no_subdir: bool,

    /// Reader lag, in commits, that triggers the stall handler (0 = never).
    pub stall_gap: u64,

    initial_options: [Option<u64>; EnvOption::ALL.len()],
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            max_maps: DEFAULT_MAX_MAPS,
            max_readers: DEFAULT_MAX_READERS,
            geometry: Geometry::new(),
            writer_policy: WriterPolicy::FailFast,
            thread_affinity: true,
            registered_readers: false,
            sync_on_commit: true,
            read_only: false,
            create_if_missing: true,
            no_subdir: false,
            stall_gap: 0,
            initial_options: [None; EnvOption::ALL.len()],
        }
    }
}

impl EnvConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of named maps.
    #[must_use]
    pub const fn max_maps(mut self, value: u32) -> Self {
        self.max_maps = value;
        self
    }

    /// Sets the size of the reader table.
    #[must_use]
    pub const fn max_readers(mut self, value: u32) -> Self {
        self.max_readers = value;
        self
    }

    /// Sets the requested geometry.
    #[must_use]
    pub const fn geometry(mut self, value: Geometry) -> Self {
        self.geometry = value;
        self
    }

    /// Sets the writer contention policy.
    #[must_use]
    pub const fn writer_policy(mut self, value: WriterPolicy) -> Self {
        self.writer_policy = value;
        self
    }

    /// Enables or disables thread affinity checks.
    #[must_use]
    pub const fn thread_affinity(mut self, value: bool) -> Self {
        self.thread_affinity = value;
        self
    }

    /// Requires reader threads to register first.
    #[must_use]
    pub const fn registered_readers(mut self, value: bool) -> Self {
        self.registered_readers = value;
        self
    }

    /// Sets whether every commit is fsynced.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Opens the environment read-only.
    #[must_use]
    pub const fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Sets whether a missing environment is created.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Treats the path as the data file itself.
    #[must_use]
    pub const fn no_subdir(mut self, value: bool) -> Self {
        self.no_subdir = value;
        self
    }

    /// Sets the reader lag that triggers the stall handler.
    #[must_use]
    pub const fn stall_gap(mut self, value: u64) -> Self {
        self.stall_gap = value;
        self
    }

    /// Sets a runtime option applied when the environment opens.
    ///
    /// `MaxMaps` and `MaxReaders` given here replace the fields of the same
    /// name.
    #[must_use]
    pub const fn option(mut self, option: EnvOption, value: u64) -> Self {
        self.initial_options[option.index()] = Some(value);
        self
    }

    /// Runtime options given through [`EnvConfig::option`].
    pub fn initial_options(&self) -> impl Iterator<Item = (EnvOption, u64)> + '_ {
        EnvOption::ALL
            .into_iter()
            .filter_map(|option| Some((option, self.initial_options[option.index()]?)))
    }

    /// Folds `MaxMaps` and `MaxReaders` options into the fields and checks
    /// the limits.
    pub(crate) fn resolve(mut self) -> CoreResult<Self> {
        for (option, value) in self.initial_options().collect::<Vec<_>>() {
            let narrow = || {
                u32::try_from(value)
                    .map_err(|_| CoreError::config(format!("{option} value {value} is out of range")))
            };
            match option {
                EnvOption::MaxMaps => self.max_maps = narrow()?,
                EnvOption::MaxReaders => self.max_readers = narrow()?,
                _ => {}
            }
        }
        self.validate()?;
        Ok(self)
    }

    pub(crate) fn validate(&self) -> CoreResult<()> {
        if self.max_readers == 0 || self.max_readers > MAX_READERS_LIMIT {
            return Err(CoreError::config(format!(
                "max_readers {} must be in 1..={MAX_READERS_LIMIT}",
                self.max_readers
            )));
        }
        if self.max_maps > MAX_MAPS_LIMIT {
            return Err(CoreError::config(format!(
                "max_maps {} exceeds {MAX_MAPS_LIMIT}",
                self.max_maps
            )));
        }
        Ok(())
    }
}
