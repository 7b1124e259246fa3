//! Tuning knobs for [`crate::Dict`].

/// Whether a full table may grow at its normal load factor.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ResizePolicy {
    /// Grow as soon as `used >= size`.
    #[default]
    Allow,
    /// Grow only once the load ratio exceeds
    /// [`DictConfig::force_resize_ratio`]. Useful while a snapshot shares
    /// pages with the table and copying them should be kept to a minimum.
    Avoid,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DictConfig {
    /// Bucket count of the first slot array. Rounded up to a power of two,
    /// never below 4.
    pub initial_size: usize,
    pub resize_policy: ResizePolicy,
    /// Load ratio (`used / size`) above which the table grows even under
    /// [`ResizePolicy::Avoid`].
    pub force_resize_ratio: usize,
    /// Non-empty buckets migrated by each mutating call during a rehash.
    pub rehash_buckets_per_step: usize,
}

pub(crate) const MIN_TABLE_SIZE: usize = 4;

impl Default for DictConfig {
    fn default() -> Self {
        Self {
            initial_size: MIN_TABLE_SIZE,
            resize_policy: ResizePolicy::Allow,
            force_resize_ratio: 5,
            rehash_buckets_per_step: 1,
        }
    }
}

impl DictConfig {
    pub fn with_initial_size(mut self, size: usize) -> Self {
        self.initial_size = size;
        self
    }

    pub fn with_resize_policy(mut self, policy: ResizePolicy) -> Self {
        self.resize_policy = policy;
        self
    }

    pub fn with_force_resize_ratio(mut self, ratio: usize) -> Self {
        self.force_resize_ratio = ratio;
        self
    }

    pub fn with_rehash_buckets_per_step(mut self, buckets: usize) -> Self {
        self.rehash_buckets_per_step = buckets.max(1);
        self
    }
}

/// Smallest power of two that is `>= max(requested, 4)`.
pub(crate) fn table_size_for(requested: usize) -> usize {
    let want = requested.max(MIN_TABLE_SIZE);
    want.checked_next_power_of_two().unwrap_or(1 << (usize::BITS - 1))
}
