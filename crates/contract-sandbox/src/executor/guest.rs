use core::fmt;

use wasmtime::{AsContext, AsContextMut, Instance, Memory, TypedFunc};

use crate::{
    constants::abi::{ALLOC_EXPORT, MEMORY_EXPORT, REALLOC_EXPORT},
    HostError,
};

#[derive(Clone)]
enum Allocator {
    /// `alloc(len) -> ptr`
    Alloc(TypedFunc<i32, i32>),
    /// `canonical_abi_realloc(old_ptr, old_len, align, new_len) -> ptr`
    Realloc(TypedFunc<(i32, i32, i32, i32), i32>),
}

impl fmt::Debug for Allocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alloc(_) => f.write_str(ALLOC_EXPORT),
            Self::Realloc(_) => f.write_str(REALLOC_EXPORT),
        }
    }
}

/// The linear memory and allocator used to exchange bytes with sandboxed code.
#[derive(Clone, Debug)]
pub(crate) struct GuestMemory {
    memory: Memory,
    allocator: Allocator,
}

impl GuestMemory {
    /// Resolves a memory and an allocator exported by the same instance, trying `instances` in
    /// order.
    pub(crate) fn resolve(
        mut store: impl AsContextMut,
        instances: &[Instance],
    ) -> Option<Self> {
        instances.iter().find_map(|instance| {
            let memory = instance.get_memory(&mut store, MEMORY_EXPORT)?;
            let allocator = instance
                .get_typed_func::<i32, i32>(&mut store, ALLOC_EXPORT)
                .map(Allocator::Alloc)
                .or_else(|_| {
                    instance
                        .get_typed_func::<(i32, i32, i32, i32), i32>(&mut store, REALLOC_EXPORT)
                        .map(Allocator::Realloc)
                })
                .ok()?;
            Some(Self { memory, allocator })
        })
    }

    /// Copies `len` bytes at `ptr` out of guest memory.
    pub(crate) fn read(&self, store: impl AsContext, ptr: i32, len: i32) -> Result<Vec<u8>, HostError> {
        let (start, len) = (ptr as u32, len as u32);
        let err = || HostError::MemoryAccess { ptr: start, len };
        let begin = start as usize;
        let end = begin.checked_add(len as usize).ok_or_else(err)?;
        let data = self.memory.data(&store);
        data.get(begin..end).map(<[u8]>::to_vec).ok_or_else(err)
    }

    /// Allocates guest memory for `bytes`, copies them in and returns `(ptr, len)`.
    ///
    /// Empty input is not allocated and yields `(0, 0)`.
    pub(crate) fn write(
        &self,
        mut store: impl AsContextMut,
        bytes: &[u8],
    ) -> Result<(u32, u32), HostError> {
        if bytes.is_empty() {
            return Ok((0, 0));
        }
        let len = i32::try_from(bytes.len())
            .map_err(|_| HostError::Allocation(format!("{} bytes exceed guest range", bytes.len())))?;
        let ptr = match &self.allocator {
            Allocator::Alloc(alloc) => alloc.call(&mut store, len),
            Allocator::Realloc(realloc) => realloc.call(&mut store, (0, 0, 1, len)),
        }
        .map_err(|err| HostError::Allocation(format!("{err:#}")))?;
        self.memory
            .write(&mut store, ptr as u32 as usize, bytes)
            .map_err(|_| HostError::MemoryAccess { ptr: ptr as u32, len: len as u32 })?;
        Ok((ptr as u32, len as u32))
    }
}
