// crates/bfsht-plan/src/sync.rs

//! Concurrency primitives backing the execute protocol.
//!
//! Safety in this module rests on two plan-level invariants the planner
//! upholds by construction (spec'd in the crate docs):
//!
//! 1. every mutable slab (work_q region, output ring range) has exactly one
//!    writer within a stage, and
//! 2. the inter-stage barrier orders all stage-N writes before any stage-N+1
//!    reads.

use std::cell::UnsafeCell;
use std::sync::{Condvar, Mutex, MutexGuard};

/// Counting semaphore bounding concurrent bandwidth-heavy streams per node.
#[derive(Debug)]
pub(crate) struct Semaphore {
    permits: Mutex<usize>,
    cv: Condvar,
}

impl Semaphore {
    pub(crate) fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            cv: Condvar::new(),
        }
    }

    /// Block until a permit is free; the guard returns it on drop.
    pub(crate) fn acquire(&self) -> SemGuard<'_> {
        let mut p = self.permits.lock().unwrap_or_else(|e| e.into_inner());
        while *p == 0 {
            p = self.cv.wait(p).unwrap_or_else(|e| e.into_inner());
        }
        *p -= 1;
        SemGuard { sem: self }
    }
}

/// RAII permit of a [`Semaphore`].
pub(crate) struct SemGuard<'a> {
    sem: &'a Semaphore,
}

impl Drop for SemGuard<'_> {
    fn drop(&mut self) {
        let mut p = self
            .sem
            .permits
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *p += 1;
        self.sem.cv.notify_one();
    }
}

/// Lock a mutex, ignoring poisoning (workers abort on corruption; a poisoned
/// plan mutex cannot be observed in a live process).
pub(crate) fn lock_unpoisoned<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Node semaphore + per-CPU lock, taken scoped around the butterfly engine's
/// bandwidth-heavy leaf step.
pub(crate) struct BusThrottle<'a> {
    pub(crate) sem: &'a Semaphore,
    pub(crate) cpu_lock: &'a Mutex<()>,
}

impl bfsht_butterfly::StreamThrottle for BusThrottle<'_> {
    fn with<R>(&self, f: impl FnOnce() -> R) -> R {
        let _permit = self.sem.acquire();
        let _cpu = lock_unpoisoned(self.cpu_lock);
        f()
    }
}

/// Shared slab of doubles written by workers under the plan invariants.
#[derive(Debug)]
pub(crate) struct SharedF64s {
    data: UnsafeCell<Box<[f64]>>,
    len: usize,
}

// SAFETY: access goes through the raw-slice methods below, whose contracts
// push the aliasing discipline (single writer per disjoint region, barrier
// ordering between writers and readers) onto the planner invariants.
unsafe impl Send for SharedF64s {}
unsafe impl Sync for SharedF64s {}

impl SharedF64s {
    /// Zero-filled slab of `len` doubles, first-touched by the caller.
    pub(crate) fn new(len: usize) -> Self {
        Self {
            data: UnsafeCell::new(vec![0.0; len].into_boxed_slice()),
            len,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Borrow `start .. start + len` mutably.
    ///
    /// # Safety
    ///
    /// The region must not overlap any concurrently borrowed region, and the
    /// caller must be the region's unique writer for the current stage.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn slice_mut(&self, start: usize, len: usize) -> &mut [f64] {
        debug_assert!(start + len <= self.len);
        let base = (*self.data.get()).as_mut_ptr();
        std::slice::from_raw_parts_mut(base.add(start), len)
    }

    /// Borrow `start .. start + len` immutably.
    ///
    /// # Safety
    ///
    /// No thread may write the region during the borrow (the inter-stage
    /// barrier provides this).
    pub(crate) unsafe fn slice(&self, start: usize, len: usize) -> &[f64] {
        debug_assert!(start + len <= self.len);
        let base = (*self.data.get()).as_ptr();
        std::slice::from_raw_parts(base.add(start), len)
    }
}

/// Input/output pointers of the execute call in flight.
///
/// The driver stores them before tripping the start barrier and the barrier
/// protocol guarantees workers only dereference them while `execute` is
/// blocked, so the borrows cannot outlive the caller's slices.
#[derive(Debug)]
pub(crate) struct ExecIo {
    cell: UnsafeCell<IoPtrs>,
}

#[derive(Clone, Copy, Debug)]
struct IoPtrs {
    input: *const f64,
    input_len: usize,
    output: *mut f64,
    output_len: usize,
}

// SAFETY: written only by the driver outside the worker window (see type
// docs); reads are data-race free by barrier ordering.
unsafe impl Send for ExecIo {}
unsafe impl Sync for ExecIo {}

impl ExecIo {
    pub(crate) fn new() -> Self {
        Self {
            cell: UnsafeCell::new(IoPtrs {
                input: std::ptr::null(),
                input_len: 0,
                output: std::ptr::null_mut(),
                output_len: 0,
            }),
        }
    }

    /// Publish the buffers for one execute call. Driver-only, pre-barrier.
    pub(crate) fn set(&self, input: &[f64], output: &mut [f64]) {
        let ptrs = IoPtrs {
            input: input.as_ptr(),
            input_len: input.len(),
            output: output.as_mut_ptr(),
            output_len: output.len(),
        };
        // SAFETY: no worker reads the cell outside the barrier window.
        unsafe { *self.cell.get() = ptrs };
    }

    /// Clear the buffers after the final barrier. Driver-only.
    pub(crate) fn clear(&self) {
        // SAFETY: as in `set`.
        unsafe {
            *self.cell.get() = IoPtrs {
                input: std::ptr::null(),
                input_len: 0,
                output: std::ptr::null_mut(),
                output_len: 0,
            };
        }
    }

    /// The input coefficients of the in-flight execute.
    ///
    /// # Safety
    ///
    /// Only between the start and done barriers of an execute call.
    pub(crate) unsafe fn input<'a>(&self) -> &'a [f64] {
        let p = *self.cell.get();
        debug_assert!(!p.input.is_null());
        std::slice::from_raw_parts(p.input, p.input_len)
    }

    /// A disjoint region of the output map.
    ///
    /// # Safety
    ///
    /// Only between the barriers, and regions handed to different workers
    /// must not overlap (ring assignment guarantees this).
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn output_region<'a>(&self, start: usize, len: usize) -> &'a mut [f64] {
        let p = *self.cell.get();
        debug_assert!(!p.output.is_null());
        debug_assert!(start + len <= p.output_len);
        std::slice::from_raw_parts_mut(p.output.add(start), len)
    }
}
