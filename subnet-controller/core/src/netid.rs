use std::collections::BTreeSet;
use tracing::debug;


/// The global network identifier. Namespaces holding it reach, and are
/// reachable from, every namespace.
pub const ADMIN_VNID: u32 = 0;

/// The lowest identifier handed out to tenants. Identifiers below it are
/// reserved.
pub const MIN_VNID: u32 = 10;

/// The largest identifier that fits in a 24-bit tunnel key.
pub const MAX_VNID: u32 = (1 << 24) - 1;

/// Hands out unique network identifiers from `[min, max]`.
#[derive(Debug)]
pub struct NetIdAllocator {
    min: u32,
    max: u32,
    allocated: BTreeSet<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum NetIdError {
    #[error("invalid NetID range [{min}, {max}]")]
    InvalidRange { min: u32, max: u32 },

    #[error("no NetIDs available")]
    Exhausted,

    #[error("NetID {0} is out of range")]
    OutOfRange(u32),

    #[error("NetID {0} is not allocated")]
    NotInUse(u32),

    #[error("NetID {0} is already allocated")]
    InUse(u32),
}

// === impl NetIdAllocator ===

impl NetIdAllocator {
    /// Builds an allocator over `[min, max]` with `in_use` already taken.
    ///
    /// In-use identifiers outside of the range (e.g. the admin identifier) are
    /// ignored.
    pub fn new(
        min: u32,
        max: u32,
        in_use: impl IntoIterator<Item = u32>,
    ) -> Result<Self, NetIdError> {
        if max < min {
            return Err(NetIdError::InvalidRange { min, max });
        }

        let allocated = in_use
            .into_iter()
            .filter(|&id| {
                let in_range = (min..=max).contains(&id);
                if !in_range {
                    debug!(id, "Ignoring NetID outside of the allocation range");
                }
                in_range
            })
            .collect();
        Ok(Self {
            min,
            max,
            allocated,
        })
    }

    pub fn allocated(&self) -> usize {
        self.allocated.len()
    }

    /// Returns the lowest free identifier and marks it allocated.
    pub fn allocate(&mut self) -> Result<u32, NetIdError> {
        let mut next = u64::from(self.min);
        for &id in self.allocated.iter() {
            if u64::from(id) != next {
                break;
            }
            next += 1;
        }
        if next > u64::from(self.max) {
            return Err(NetIdError::Exhausted);
        }

        let id = next as u32;
        self.allocated.insert(id);
        Ok(id)
    }

    /// Marks an identifier that was assigned elsewhere as allocated.
    pub fn claim(&mut self, id: u32) -> Result<(), NetIdError> {
        self.check_range(id)?;
        if !self.allocated.insert(id) {
            return Err(NetIdError::InUse(id));
        }
        Ok(())
    }

    /// Returns an identifier to the pool. Unlike subnet release, releasing an
    /// identifier that is not allocated is an error.
    pub fn release(&mut self, id: u32) -> Result<(), NetIdError> {
        self.check_range(id)?;
        if !self.allocated.remove(&id) {
            return Err(NetIdError::NotInUse(id));
        }
        Ok(())
    }

    fn check_range(&self, id: u32) -> Result<(), NetIdError> {
        if !(self.min..=self.max).contains(&id) {
            return Err(NetIdError::OutOfRange(id));
        }
        Ok(())
    }
}
