//! The live set of oscillators.
//!
//! Storage is never edited in place while it is visible to the mixer: every
//! mutation allocates a fresh slice of the exact new size, copies the survivors
//! and swaps it in under the table lock. The retired slice is released after
//! the lock is dropped. An empty table owns no allocation at all.

use std::ops::{Deref, DerefMut};
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::{SynthError, SynthResult};
use crate::wave::Wave;

type Storage = Option<Box<[Wave]>>;

/// Result of a removal: how many entries matched and how many are left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveOutcome {
    pub removed: usize,
    pub remaining: usize,
}

impl RemoveOutcome {
    /// True when nothing matched and the table was left as it was.
    pub fn is_unaffected(&self) -> bool {
        self.removed == 0
    }
}

/// Ordered collection of packed oscillators shared between control callers and the mixer.
#[derive(Debug)]
pub struct WaveTable {
    waves: Mutex<Storage>,
    /// Largest table the tests allow to be allocated.
    #[cfg(test)]
    alloc_limit: AtomicUsize,
}

impl Default for WaveTable {
    fn default() -> Self {
        Self::new()
    }
}

impl WaveTable {
    pub fn new() -> Self {
        Self {
            waves: Mutex::new(None),
            #[cfg(test)]
            alloc_limit: AtomicUsize::new(usize::MAX),
        }
    }

    /// Build a table already holding `waves`, in order.
    pub fn with_waves(waves: &[Wave]) -> SynthResult<Self> {
        let table = Self::new();
        for &wave in waves {
            table.add(wave)?;
        }
        Ok(table)
    }

    /// Append one oscillator. Returns the new count.
    ///
    /// Duplicate frequencies are accepted; they can only be removed together.
    pub fn add(&self, wave: Wave) -> SynthResult<usize> {
        let mut guard = self.waves.lock();
        let current = guard.as_deref().unwrap_or_default();
        let new_count = current.len() + 1;

        let mut next = self.allocate(new_count)?;
        next.extend_from_slice(current);
        next.push(wave);

        let retired = guard.replace(next.into_boxed_slice());
        drop(guard);
        drop(retired);

        info!(%wave, count = new_count, "wave added");
        Ok(new_count)
    }

    /// Remove every oscillator whose frequency equals `frequency`.
    ///
    /// A key that matches nothing leaves the table untouched and is not an error.
    /// On allocation failure the old table stays published; removal never happens
    /// partially.
    pub fn remove_by_frequency(&self, frequency: u16) -> SynthResult<RemoveOutcome> {
        let mut guard = self.waves.lock();
        let current = guard.as_deref().unwrap_or_default();
        let old_count = current.len();
        let survivors = current
            .iter()
            .filter(|wave| wave.frequency() != frequency)
            .count();

        let retired = if survivors == 0 {
            guard.take()
        } else if survivors < old_count {
            let mut next = self.allocate(survivors)?;
            next.extend(
                current
                    .iter()
                    .copied()
                    .filter(|wave| wave.frequency() != frequency),
            );
            guard.replace(next.into_boxed_slice())
        } else {
            None
        };
        drop(guard);
        drop(retired);

        let outcome = RemoveOutcome {
            removed: old_count - survivors,
            remaining: survivors,
        };
        if outcome.is_unaffected() {
            debug!(frequency, count = old_count, "no wave with that frequency");
        } else {
            info!(
                frequency,
                removed = outcome.removed,
                count = outcome.remaining,
                "waves removed"
            );
        }
        Ok(outcome)
    }

    /// Drop every oscillator and release the storage.
    pub fn clear(&self) {
        let retired = self.waves.lock().take();
        drop(retired);
    }

    /// Hold the table lock for one mix pass.
    ///
    /// The guard hands out the descriptors mutably so the mixer can store the
    /// advanced phases. No mutation can run until the guard is dropped, so keep
    /// it for exactly one pass.
    pub fn lock_for_synthesis(&self) -> SynthesisGuard<'_> {
        SynthesisGuard(self.waves.lock())
    }

    pub fn len(&self) -> usize {
        self.waves.lock().as_deref().map_or(0, <[Wave]>::len)
    }

    pub fn is_empty(&self) -> bool {
        self.waves.lock().is_none()
    }

    /// Copy of the current descriptors, for inspection outside the audio path.
    pub fn snapshot(&self) -> Vec<Wave> {
        self.waves.lock().as_deref().unwrap_or_default().to_vec()
    }

    #[cfg(not(test))]
    #[inline]
    fn allocate(&self, count: usize) -> SynthResult<Vec<Wave>> {
        allocate(count)
    }

    #[cfg(test)]
    fn allocate(&self, count: usize) -> SynthResult<Vec<Wave>> {
        if count > self.alloc_limit.load(Ordering::Relaxed) {
            return Err(SynthError::OutOfMemory { requested: count });
        }
        allocate(count)
    }

    #[cfg(test)]
    fn limit_allocations(&self, max_entries: usize) {
        self.alloc_limit.store(max_entries, Ordering::Relaxed);
    }
}

/// Exclusive access to the table for the duration of one synthesis pass.
pub struct SynthesisGuard<'a>(MutexGuard<'a, Storage>);

impl Deref for SynthesisGuard<'_> {
    type Target = [Wave];

    fn deref(&self) -> &[Wave] {
        self.0.as_deref().unwrap_or_default()
    }
}

impl DerefMut for SynthesisGuard<'_> {
    fn deref_mut(&mut self) -> &mut [Wave] {
        self.0.as_deref_mut().unwrap_or_default()
    }
}

fn allocate(count: usize) -> SynthResult<Vec<Wave>> {
    let mut storage = Vec::new();
    storage
        .try_reserve_exact(count)
        .map_err(|_| SynthError::OutOfMemory { requested: count })?;
    Ok(storage)
}
