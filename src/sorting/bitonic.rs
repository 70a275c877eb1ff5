// bitonic merge sort, usable for any input length
use std::sync::atomic::{AtomicU32, Ordering::Relaxed};

use rayon::prelude::*;

use crate::Error;

/// Sorts parallel `(items, keys)` arrays in ascending key order with an
/// oblivious compare-exchange network. Unlike [`CountSort`] the key
/// domain is unbounded, at `O(n log^2 n)` cost.
///
/// Input length is not restricted to powers of two: indices past the
/// end are treated as infinitely large, so no padding storage is
/// needed. Each step's swap pairs are disjoint; a barrier separates
/// consecutive steps.
///
/// [`CountSort`]: crate::sorting::count_sort::CountSort
pub struct BitonicSort {
    items_buffer: Vec<AtomicU32>,
    keys_buffer: Vec<AtomicU32>,
}

fn atomic_buffer(len: usize) -> Vec<AtomicU32> {
    (0..len).map(|_| AtomicU32::new(0)).collect()
}

impl BitonicSort {
    pub fn new(count: usize) -> Self {
        Self {
            items_buffer: atomic_buffer(count),
            keys_buffer: atomic_buffer(count),
        }
    }

    pub fn sort(&mut self, items: &mut [u32], keys: &mut [u32]) -> Result<(), Error> {
        if items.len() != keys.len() {
            return Err(Error::LengthMismatch {
                expected: items.len(),
                got: keys.len(),
            });
        }
        if items.len() != self.items_buffer.len() {
            return Err(Error::LengthMismatch {
                expected: self.items_buffer.len(),
                got: items.len(),
            });
        }

        let n = keys.len();
        if n <= 1 {
            return Ok(());
        }

        self.items_buffer
            .par_iter()
            .zip(items.par_iter())
            .for_each(|(dst, &src)| dst.store(src, Relaxed));
        self.keys_buffer
            .par_iter()
            .zip(keys.par_iter())
            .for_each(|(dst, &src)| dst.store(src, Relaxed));

        // Number of steps = log2(p) * (log2(p) + 1) / 2, where p is the
        // nearest power of two >= n. Stage s runs s + 1 steps.
        let padded = n.next_power_of_two();
        let num_stages = padded.trailing_zeros() as usize;

        for stage in 0..num_stages {
            for step in 0..=stage {
                let group_width = 1usize << (stage - step);
                let group_height = 2 * group_width - 1;

                (0..padded / 2).into_par_iter().for_each(|thread| {
                    let h_index = thread & (group_width - 1);
                    let left = h_index + (group_height + 1) * (thread / group_width);
                    let right_step = if step == 0 {
                        group_height - 2 * h_index
                    } else {
                        (group_height + 1) / 2
                    };
                    let right = left + right_step;
                    if right >= n {
                        return;
                    }

                    let key_left = self.keys_buffer[left].load(Relaxed);
                    let key_right = self.keys_buffer[right].load(Relaxed);
                    if key_left > key_right {
                        self.keys_buffer[left].store(key_right, Relaxed);
                        self.keys_buffer[right].store(key_left, Relaxed);

                        let item_left = self.items_buffer[left].load(Relaxed);
                        let item_right = self.items_buffer[right].load(Relaxed);
                        self.items_buffer[left].store(item_right, Relaxed);
                        self.items_buffer[right].store(item_left, Relaxed);
                    }
                });
            }
        }

        items
            .par_iter_mut()
            .zip(self.items_buffer.par_iter())
            .for_each(|(dst, src)| *dst = src.load(Relaxed));
        keys.par_iter_mut()
            .zip(self.keys_buffer.par_iter())
            .for_each(|(dst, src)| *dst = src.load(Relaxed));

        Ok(())
    }

    /// Sorts, then writes the start slot of each key's contiguous run
    /// into `offsets` (indexed by key value). Slots whose key does not
    /// occur are left untouched; callers wanting a sentinel there must
    /// clear `offsets` beforehand.
    pub fn sort_and_calculate_offsets(
        &mut self,
        items: &mut [u32],
        keys: &mut [u32],
        offsets: &[AtomicU32],
    ) -> Result<(), Error> {
        self.sort(items, keys)?;

        let keys: &[u32] = keys;
        keys.par_iter().enumerate().for_each(|(i, &key)| {
            if i == 0 || keys[i - 1] != key {
                offsets[key as usize].store(i as u32, Relaxed);
            }
        });

        Ok(())
    }
}
