use crate::bitmap::BITMAP_WIDTH;
use crate::error::{Error, Result};
use crate::node::MAX_LEVEL;

/// Publication slots reserved for each processor.
pub const DEFAULT_RECORDS_PER_PROCESSOR: usize = 10;
/// Levels used by the deadline skip list.
pub const DEFAULT_MAX_LEVEL: usize = 8;
/// Chance of promoting a node one level higher.
pub const DEFAULT_LEVEL_PROBABILITY: f64 = 0.5;

/// Construction parameters for [`Cpudl`](crate::cpudl::Cpudl).
#[derive(Debug, Clone, PartialEq)]
pub struct CpudlConfig {
    /// Number of processors tracked (at most 64).
    pub processors: usize,
    /// Size of each processor's publication ring (at most 64).
    pub records_per_processor: usize,
    /// Level ceiling of the skip list (at most [`MAX_LEVEL`]).
    pub max_level: usize,
    /// Geometric promotion probability used when drawing node heights.
    pub level_probability: f64,
    /// Fixed seed for the level generator; drawn from the thread RNG when `None`.
    pub seed: Option<u64>,
}

impl Default for CpudlConfig {
    fn default() -> Self {
        CpudlConfig {
            processors: 1,
            records_per_processor: DEFAULT_RECORDS_PER_PROCESSOR,
            max_level: DEFAULT_MAX_LEVEL,
            level_probability: DEFAULT_LEVEL_PROBABILITY,
            seed: None,
        }
    }
}

impl CpudlConfig {
    pub fn new(processors: usize) -> Self {
        CpudlConfig {
            processors,
            ..CpudlConfig::default()
        }
    }

    pub fn with_records_per_processor(mut self, records: usize) -> Self {
        self.records_per_processor = records;
        self
    }

    pub fn with_max_level(mut self, max_level: usize) -> Self {
        self.max_level = max_level;
        self
    }

    pub fn with_level_probability(mut self, probability: f64) -> Self {
        self.level_probability = probability;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.processors == 0 || self.processors > BITMAP_WIDTH {
            return Err(Error::InvalidConfig {
                field: "processors",
                reason: "must be between 1 and 64",
            });
        }
        if self.records_per_processor == 0 || self.records_per_processor > BITMAP_WIDTH {
            return Err(Error::InvalidConfig {
                field: "records_per_processor",
                reason: "must be between 1 and 64",
            });
        }
        if self.max_level == 0 || self.max_level > MAX_LEVEL {
            return Err(Error::InvalidConfig {
                field: "max_level",
                reason: "must be between 1 and 16",
            });
        }
        // Also rejects NaN
        if !(self.level_probability > 0.0 && self.level_probability < 1.0) {
            return Err(Error::InvalidConfig {
                field: "level_probability",
                reason: "must lie strictly between 0 and 1",
            });
        }
        Ok(())
    }
}
