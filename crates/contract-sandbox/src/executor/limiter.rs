use tracing::debug;
use wasmtime::ResourceLimiter;

use crate::MemoryLimit;

/// Caps the size of every linear memory of a store and remembers whether it denied growth.
#[derive(Debug)]
pub(crate) struct MemoryLimiter {
    limit: Option<usize>,
    denied: bool,
}

impl MemoryLimiter {
    pub(crate) fn new(limit: MemoryLimit) -> Self {
        let limit = limit.as_bytes().map(|bytes| usize::try_from(bytes).unwrap_or(usize::MAX));
        Self { limit, denied: false }
    }

    /// Returns `true` if a memory growth was denied.
    pub(crate) const fn denied(&self) -> bool {
        self.denied
    }
}

impl ResourceLimiter for MemoryLimiter {
    fn memory_growing(
        &mut self,
        current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        match self.limit {
            Some(limit) if desired > limit => {
                debug!(current, desired, limit, "Memory growth denied");
                self.denied = true;
                Ok(false)
            }
            _ => Ok(true),
        }
    }

    fn table_growing(
        &mut self,
        _current: usize,
        _desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_is_inclusive() {
        let mut limiter = MemoryLimiter::new(MemoryLimit::pages(2));
        assert!(limiter.memory_growing(0, 2 * 65_536, None).unwrap());
        assert!(!limiter.denied());
        assert!(!limiter.memory_growing(0, 3 * 65_536, None).unwrap());
        assert!(limiter.denied());
    }

    #[test]
    fn test_unlimited() {
        let mut limiter = MemoryLimiter::new(MemoryLimit::Unlimited);
        assert!(limiter.memory_growing(0, usize::MAX, None).unwrap());
        assert!(!limiter.denied());
    }
}
