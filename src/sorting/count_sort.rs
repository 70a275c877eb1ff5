// counting sort over bounded integer keys, prefix-sum based
use std::sync::atomic::{AtomicU32, Ordering::Relaxed};

use rayon::prelude::*;

use crate::Error;
use crate::sorting::scan::Scan;

/// Sorts parallel `(items, keys)` arrays by key in four phases with a
/// barrier between each: clear counts, count (atomic increment),
/// exclusive scan of counts into per-key start offsets, then scatter
/// through atomic write cursors. A final copy-back overwrites the
/// callers' buffers with the sorted data.
///
/// The maximum possible key must be known ahead of time (memory is
/// allocated for every possible key), and preferably not be too large.
/// Equal keys may land in any relative order; stability is not
/// promised.
pub struct CountSort {
    scan: Scan,
    counts: Vec<AtomicU32>,
    scan_buffer: Vec<u32>,
    sorted_items: Vec<AtomicU32>,
    sorted_keys: Vec<AtomicU32>,
    max_key: u32,
}

fn atomic_buffer(len: usize) -> Vec<AtomicU32> {
    (0..len).map(|_| AtomicU32::new(0)).collect()
}

impl CountSort {
    pub fn new(count: usize, max_key: u32) -> Self {
        let num_keys = max_key as usize + 1;
        Self {
            scan: Scan::new(),
            counts: atomic_buffer(num_keys),
            scan_buffer: vec![0; num_keys],
            sorted_items: atomic_buffer(count),
            sorted_keys: atomic_buffer(count),
            max_key,
        }
    }

    pub fn max_key(&self) -> u32 {
        self.max_key
    }

    pub fn run(&mut self, items: &mut [u32], keys: &mut [u32]) -> Result<(), Error> {
        if items.len() != keys.len() {
            return Err(Error::LengthMismatch {
                expected: items.len(),
                got: keys.len(),
            });
        }
        if items.len() != self.sorted_items.len() {
            return Err(Error::LengthMismatch {
                expected: self.sorted_items.len(),
                got: items.len(),
            });
        }
        // An underestimated max key would scatter out of bounds;
        // abort instead.
        if let Some(&bad) = keys.iter().find(|&&k| k > self.max_key) {
            return Err(Error::KeyOutOfRange {
                key: bad,
                max_key: self.max_key,
            });
        }

        // Phase 1: clear counts.
        self.counts.par_iter().for_each(|c| c.store(0, Relaxed));

        // Phase 2: histogram of key occurrences.
        keys.par_iter().for_each(|&k| {
            self.counts[k as usize].fetch_add(1, Relaxed);
        });

        // Phase 3: exclusive scan turns counts into start offsets.
        self.scan_buffer
            .par_iter_mut()
            .zip(self.counts.par_iter())
            .for_each(|(dst, c)| *dst = c.load(Relaxed));
        self.scan.run(&mut self.scan_buffer);
        self.counts
            .par_iter()
            .zip(self.scan_buffer.par_iter())
            .for_each(|(c, &offset)| c.store(offset, Relaxed));

        // Phase 4: scatter. The counts now hold the running write
        // cursor for each key; fetch-add claims a unique slot.
        items
            .par_iter()
            .zip(keys.par_iter())
            .for_each(|(&item, &key)| {
                let dst = self.counts[key as usize].fetch_add(1, Relaxed) as usize;
                self.sorted_items[dst].store(item, Relaxed);
                self.sorted_keys[dst].store(key, Relaxed);
            });

        // Copy back so callers see sorted data in the buffers they passed.
        items
            .par_iter_mut()
            .zip(self.sorted_items.par_iter())
            .for_each(|(dst, src)| *dst = src.load(Relaxed));
        keys.par_iter_mut()
            .zip(self.sorted_keys.par_iter())
            .for_each(|(dst, src)| *dst = src.load(Relaxed));

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_reference_key_set() {
        let mut keys: Vec<u32> = vec![6, 9, 2, 2, 6, 3, 9, 9, 3, 2];
        let mut items: Vec<u32> = (0..10).collect();

        let mut sort = CountSort::new(keys.len(), 9);
        sort.run(&mut items, &mut keys).unwrap();

        assert_eq!(keys, vec![2, 2, 2, 3, 3, 6, 6, 9, 9, 9]);
        // Items still pair with their original keys.
        let original = [6u32, 9, 2, 2, 6, 3, 9, 9, 3, 2];
        for (&item, &key) in items.iter().zip(&keys) {
            assert_eq!(original[item as usize], key);
        }
    }

    #[test]
    fn rejects_underestimated_max_key() {
        let mut keys = vec![1u32, 5, 0];
        let mut items = vec![0u32, 1, 2];

        let mut sort = CountSort::new(3, 4);
        assert_eq!(
            sort.run(&mut items, &mut keys),
            Err(Error::KeyOutOfRange { key: 5, max_key: 4 })
        );
    }

    #[test]
    fn rejects_mismatched_lengths() {
        let mut keys = vec![1u32, 2];
        let mut items = vec![0u32, 1, 2];

        let mut sort = CountSort::new(3, 4);
        assert!(matches!(
            sort.run(&mut items, &mut keys),
            Err(Error::LengthMismatch { .. })
        ));
    }
}
