//! Subsystem Configuration
//!
//! Capacity limits for every bounded structure in the core. All of them are
//! fixed when the [`AuthCore`](crate::AuthCore) is constructed; nothing grows
//! past its configured bound at runtime.

/// Default number of live capabilities in the registry.
pub const DEFAULT_MAX_CAPABILITIES: usize = 4096;

/// Default number of slots in a per-owner capability table.
pub const DEFAULT_TABLE_CAPACITY: usize = 64;

/// Default number of ACL allow entries.
pub const DEFAULT_ACL_CAPACITY: usize = 256;

/// Default number of audit records retained by the ring.
pub const DEFAULT_AUDIT_CAPACITY: usize = 128;

/// Default bucket count of the capability cache.
pub const DEFAULT_CACHE_BUCKETS: usize = 64;

/// Default number of entries the capability cache holds before evicting.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Capacity settings for one core instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub max_capabilities: usize,
    pub table_capacity: usize,
    pub acl_capacity: usize,
    pub audit_capacity: usize,
    pub cache_buckets: usize,
    pub cache_capacity: usize,
}

impl Config {
    /// Built-in defaults, usable in `const` context.
    pub const fn default() -> Self {
        Self {
            max_capabilities: DEFAULT_MAX_CAPABILITIES,
            table_capacity: DEFAULT_TABLE_CAPACITY,
            acl_capacity: DEFAULT_ACL_CAPACITY,
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
            cache_buckets: DEFAULT_CACHE_BUCKETS,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }

    pub const fn with_max_capabilities(mut self, n: usize) -> Self {
        self.max_capabilities = n;
        self
    }

    pub const fn with_table_capacity(mut self, n: usize) -> Self {
        self.table_capacity = n;
        self
    }

    pub const fn with_acl_capacity(mut self, n: usize) -> Self {
        self.acl_capacity = n;
        self
    }

    pub const fn with_audit_capacity(mut self, n: usize) -> Self {
        self.audit_capacity = n;
        self
    }

    pub const fn with_cache_buckets(mut self, n: usize) -> Self {
        self.cache_buckets = n;
        self
    }

    pub const fn with_cache_capacity(mut self, n: usize) -> Self {
        self.cache_capacity = n;
        self
    }

    /// Clamp every bound to at least one slot.
    ///
    /// A zero-sized ring or bucket array has no meaningful behavior, so the
    /// core never sees one.
    pub const fn normalized(self) -> Self {
        Self {
            max_capabilities: at_least_one(self.max_capabilities),
            table_capacity: at_least_one(self.table_capacity),
            acl_capacity: at_least_one(self.acl_capacity),
            audit_capacity: at_least_one(self.audit_capacity),
            cache_buckets: at_least_one(self.cache_buckets),
            cache_capacity: at_least_one(self.cache_capacity),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::default()
    }
}

const fn at_least_one(n: usize) -> usize {
    if n == 0 {
        1
    } else {
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides_defaults() {
        let cfg = Config::default().with_audit_capacity(4).with_acl_capacity(2);
        assert_eq!(cfg.audit_capacity, 4);
        assert_eq!(cfg.acl_capacity, 2);
        assert_eq!(cfg.table_capacity, DEFAULT_TABLE_CAPACITY);
    }

    #[test]
    fn test_normalized_clamps_zero() {
        let cfg = Config::default().with_cache_buckets(0).normalized();
        assert_eq!(cfg.cache_buckets, 1);
    }
}
