//! Size-tracked allocation adapter.
//!
//! Every byte the dictionary and the compact list hold is reported to a
//! [`UsageRecorder`]. The recorder is injected through an [`Allocator`]
//! handle; [`Allocator::default`] hands out a process-wide instance that is
//! created on first use and never torn down.
//!
//! Allocation failure is not a recoverable error. It is routed to a single
//! global hook (see [`set_oom_handler`]) that must diverge; the default one
//! logs and aborts the process.

use core::mem::size_of;
use core::ops::{Deref, Range};
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

/// Sink for allocation accounting. `delta` is positive on allocation and
/// negative on release.
pub trait UsageRecorder: Send + Sync {
    fn record(&self, delta: isize);

    /// Bytes currently accounted for.
    fn used(&self) -> usize;
}

/// Atomic byte counter, safe to share between threads.
#[derive(Debug, Default)]
pub struct UsedMemory {
    used: AtomicUsize,
}

impl UsedMemory {
    pub const fn new() -> Self {
        Self {
            used: AtomicUsize::new(0),
        }
    }
}

impl UsageRecorder for UsedMemory {
    #[inline]
    fn record(&self, delta: isize) {
        if delta >= 0 {
            self.used.fetch_add(delta as usize, Ordering::Relaxed);
        } else {
            self.used.fetch_sub(delta.unsigned_abs(), Ordering::Relaxed);
        }
    }

    fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }
}

static OOM_HANDLER: RwLock<fn(usize) -> !> = RwLock::new(default_oom_handler as fn(usize) -> !);

fn default_oom_handler(size: usize) -> ! {
    log::error!("out of memory trying to allocate {size} bytes");
    std::process::abort()
}

/// Install the function called when an allocation of `size` bytes fails.
pub fn set_oom_handler(handler: fn(usize) -> !) {
    let mut slot = OOM_HANDLER.write().unwrap_or_else(|e| e.into_inner());
    *slot = handler;
}

pub(crate) fn out_of_memory(size: usize) -> ! {
    let handler = *OOM_HANDLER.read().unwrap_or_else(|e| e.into_inner());
    handler(size)
}

/// Cloneable handle to a usage recorder. All memory obtained through it is
/// accounted against that recorder.
#[derive(Clone)]
pub struct Allocator {
    recorder: Arc<dyn UsageRecorder>,
}

impl core::fmt::Debug for Allocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Allocator")
            .field("used", &self.recorder.used())
            .finish()
    }
}

impl Default for Allocator {
    /// The process-wide allocator.
    fn default() -> Self {
        static GLOBAL: OnceLock<Allocator> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Allocator::new(Arc::new(UsedMemory::new())))
            .clone()
    }
}

impl Allocator {
    pub fn new(recorder: Arc<dyn UsageRecorder>) -> Self {
        Self { recorder }
    }

    /// Allocator backed by a fresh private counter.
    pub fn isolated() -> Self {
        Self::new(Arc::new(UsedMemory::new()))
    }

    pub fn used_memory(&self) -> usize {
        self.recorder.used()
    }

    /// Allocate a block of `size` bytes. The contents are unspecified.
    pub fn alloc(&self, size: usize) -> Block {
        self.alloc_zeroed(size)
    }

    /// Allocate a block of `size` zero bytes.
    pub fn alloc_zeroed(&self, size: usize) -> Block {
        let mut bytes = Vec::new();
        if bytes.try_reserve_exact(size).is_err() {
            out_of_memory(size);
        }
        bytes.resize(size, 0);
        self.track(size);
        Block {
            bytes,
            alloc: self.clone(),
        }
    }

    /// Resize `block` to `new_size` bytes, keeping the common prefix.
    /// `block` must come from this allocator (checked in debug builds).
    pub fn realloc(&self, block: &mut Block, new_size: usize) {
        debug_assert!(self.owns(block), "realloc of a block from another allocator");
        block.resize(new_size);
    }

    pub fn free(&self, block: Block) {
        debug_assert!(self.owns(&block), "free of a block from another allocator");
        drop(block);
    }

    fn owns(&self, block: &Block) -> bool {
        core::ptr::addr_eq(Arc::as_ptr(&self.recorder), Arc::as_ptr(&block.alloc.recorder))
    }

    /// Typed array of `len` copies of `fill`, accounted as
    /// `len * size_of::<T>()` bytes.
    pub(crate) fn alloc_array<T: Clone>(&self, len: usize, fill: T) -> Vec<T> {
        let mut v = Vec::new();
        if v.try_reserve_exact(len).is_err() {
            out_of_memory(len.saturating_mul(size_of::<T>()));
        }
        v.resize(len, fill);
        self.track(len * size_of::<T>());
        v
    }

    pub(crate) fn free_array<T>(&self, v: Vec<T>) {
        self.untrack(v.len() * size_of::<T>());
        drop(v);
    }

    #[inline]
    pub(crate) fn track(&self, bytes: usize) {
        self.recorder.record(bytes as isize);
    }

    #[inline]
    pub(crate) fn untrack(&self, bytes: usize) {
        self.recorder.record(-(bytes as isize));
    }
}

/// Owned byte block. Its length is the size tag used for accounting, so
/// freeing or resizing never needs the caller to repeat the old size.
pub struct Block {
    bytes: Vec<u8>,
    alloc: Allocator,
}

impl Block {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn allocator(&self) -> &Allocator {
        &self.alloc
    }

    /// Grow with zeros or truncate to `new_size` bytes.
    pub fn resize(&mut self, new_size: usize) {
        let old = self.bytes.len();
        if new_size > old {
            self.reserve(new_size - old);
        }
        self.bytes.resize(new_size, 0);
        self.account(old);
    }

    /// Replace `range` with `with`, shifting the tail of the block.
    pub fn splice(&mut self, range: Range<usize>, with: &[u8]) {
        let old = self.bytes.len();
        let removed = range.end - range.start;
        if with.len() > removed {
            self.reserve(with.len() - removed);
        }
        self.bytes.splice(range, with.iter().copied());
        self.account(old);
    }

    pub fn into_vec(mut self) -> Vec<u8> {
        self.alloc.untrack(self.bytes.len());
        core::mem::take(&mut self.bytes)
    }

    /// Adopt `bytes`, accounting for them from now on.
    pub(crate) fn from_vec(bytes: Vec<u8>, alloc: &Allocator) -> Self {
        alloc.track(bytes.len());
        Self {
            bytes,
            alloc: alloc.clone(),
        }
    }

    fn reserve(&mut self, additional: usize) {
        if self.bytes.try_reserve_exact(additional).is_err() {
            out_of_memory(self.bytes.len().saturating_add(additional));
        }
    }

    fn account(&self, old: usize) {
        let new = self.bytes.len();
        if new > old {
            self.alloc.track(new - old);
        } else if old > new {
            self.alloc.untrack(old - new);
        }
    }
}

impl Deref for Block {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl Clone for Block {
    fn clone(&self) -> Self {
        let mut copy = self.alloc.alloc(self.bytes.len());
        copy.bytes.copy_from_slice(&self.bytes);
        copy
    }
}

impl core::fmt::Debug for Block {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Block").field("len", &self.bytes.len()).finish()
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        self.alloc.untrack(self.bytes.len());
    }
}
