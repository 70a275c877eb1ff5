// uniform spatial hash over grid cells, backed by a key sort + offsets lookup
use std::sync::atomic::{AtomicU32, Ordering::Relaxed};

use glam::{IVec2, IVec3, Vec2, Vec3};
use rayon::prelude::*;

use crate::Error;
use crate::sorting::bitonic::BitonicSort;
use crate::sorting::count_sort::CountSort;

/// Sentinel stored in the offsets array for keys with no entries.
/// Larger than any valid slot index, consistent across the crate.
pub const NO_OFFSET: u32 = u32::MAX;

// Large primes for hash mixing.
const HASH_P1: u32 = 73856093;
const HASH_P2: u32 = 19349663;
const HASH_P3: u32 = 83492791;

#[inline]
pub fn cell_coord_2d(position: Vec2, cell_size: f32) -> IVec2 {
    (position / cell_size).floor().as_ivec2()
}

#[inline]
pub fn cell_coord_3d(position: Vec3, cell_size: f32) -> IVec3 {
    (position / cell_size).floor().as_ivec3()
}

#[inline]
pub fn hash_cell_2d(cell: IVec2, table_size: u32) -> u32 {
    let x = cell.x as u32;
    let y = cell.y as u32;
    (x.wrapping_mul(HASH_P1) ^ y.wrapping_mul(HASH_P2)) % table_size
}

#[inline]
pub fn hash_cell_3d(cell: IVec3, table_size: u32) -> u32 {
    let x = cell.x as u32;
    let y = cell.y as u32;
    let z = cell.z as u32;
    (x.wrapping_mul(HASH_P1) ^ y.wrapping_mul(HASH_P2) ^ z.wrapping_mul(HASH_P3)) % table_size
}

/// Which sorting algorithm orders the key table.
///
/// Counting sort exploits the bounded key domain (`table_size - 1`);
/// bitonic accepts any key range and fuses the offsets pass into its
/// final dispatch. Both produce the same external contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBackend {
    #[default]
    Count,
    Bitonic,
}

enum Sorter {
    Count(CountSort),
    Bitonic(BitonicSort),
}

/// Writes, for each key present in a sorted key array, the index of
/// the first slot holding that key.
///
/// Offsets for absent keys are only meaningful if the array was
/// initialized to [`NO_OFFSET`]; `needs_init` controls whether that
/// clearing pass runs here. Skipping it is sound only when every entry
/// has been cleared at least once and no stale offsets remain.
pub struct SpatialOffsets;

impl SpatialOffsets {
    pub fn run(
        sorted_keys: &[u32],
        offsets: &[AtomicU32],
        needs_init: bool,
    ) -> Result<(), Error> {
        if sorted_keys.len() != offsets.len() {
            return Err(Error::LengthMismatch {
                expected: sorted_keys.len(),
                got: offsets.len(),
            });
        }

        if needs_init {
            offsets.par_iter().for_each(|o| o.store(NO_OFFSET, Relaxed));
        }

        sorted_keys.par_iter().enumerate().for_each(|(i, &key)| {
            if i == 0 || sorted_keys[i - 1] != key {
                offsets[key as usize].store(i as u32, Relaxed);
            }
        });

        Ok(())
    }
}

/// Spatial hash table over grid cells.
///
/// After [`run`], `keys` is sorted ascending, `indices[i]` holds the
/// original slot whose key now occupies sorted position `i` (so any
/// per-particle buffer can be reordered as `sorted[i] =
/// unsorted[indices[i]]`), and `offsets[k]` is the first sorted slot
/// with key `k`, or [`NO_OFFSET`].
///
/// The table size equals the particle count; keys are cell hashes
/// wrapped into that range, so distinct cells sharing a key is
/// expected and must be tolerated by distance-filtering lookups.
///
/// [`run`]: SpatialHash::run
pub struct SpatialHash {
    keys: Vec<u32>,
    indices: Vec<u32>,
    offsets_scratch: Vec<AtomicU32>,
    offsets: Vec<u32>,
    backend: SortBackend,
    sorter: Sorter,
}

impl SpatialHash {
    pub fn new(count: usize, backend: SortBackend) -> Self {
        let sorter = match backend {
            SortBackend::Count => {
                Sorter::Count(CountSort::new(count, count.saturating_sub(1) as u32))
            }
            SortBackend::Bitonic => Sorter::Bitonic(BitonicSort::new(count)),
        };
        Self {
            keys: vec![0; count],
            indices: vec![0; count],
            offsets_scratch: (0..count).map(|_| AtomicU32::new(NO_OFFSET)).collect(),
            offsets: vec![NO_OFFSET; count],
            backend,
            sorter,
        }
    }

    /// Reallocates every table for a new particle count. Only valid
    /// between frames.
    pub fn resize(&mut self, count: usize) {
        *self = Self::new(count, self.backend);
    }

    pub fn table_size(&self) -> u32 {
        self.keys.len() as u32
    }

    pub fn keys(&self) -> &[u32] {
        &self.keys
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    /// Rebuilds keys (cell hash per position) and resets the index
    /// permutation to identity, ready for [`run`].
    pub fn update_keys_2d(&mut self, positions: &[Vec2], cell_size: f32) -> Result<(), Error> {
        if positions.len() != self.keys.len() {
            return Err(Error::LengthMismatch {
                expected: self.keys.len(),
                got: positions.len(),
            });
        }
        let table_size = self.table_size();
        self.keys
            .par_iter_mut()
            .zip(positions.par_iter())
            .for_each(|(key, &pos)| *key = hash_cell_2d(cell_coord_2d(pos, cell_size), table_size));
        self.reset_indices();
        Ok(())
    }

    pub fn update_keys_3d(&mut self, positions: &[Vec3], cell_size: f32) -> Result<(), Error> {
        if positions.len() != self.keys.len() {
            return Err(Error::LengthMismatch {
                expected: self.keys.len(),
                got: positions.len(),
            });
        }
        let table_size = self.table_size();
        self.keys
            .par_iter_mut()
            .zip(positions.par_iter())
            .for_each(|(key, &pos)| *key = hash_cell_3d(cell_coord_3d(pos, cell_size), table_size));
        self.reset_indices();
        Ok(())
    }

    fn reset_indices(&mut self) {
        self.indices
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, index)| *index = i as u32);
    }

    /// Sorts the key table and recomputes the offsets lookup. Offsets
    /// are always cleared to the sentinel first; correctness never
    /// depends on state left over from a previous frame.
    pub fn run(&mut self) -> Result<(), Error> {
        match &mut self.sorter {
            Sorter::Count(sort) => {
                sort.run(&mut self.indices, &mut self.keys)?;
                SpatialOffsets::run(&self.keys, &self.offsets_scratch, true)?;
            }
            Sorter::Bitonic(sort) => {
                self.offsets_scratch
                    .par_iter()
                    .for_each(|o| o.store(NO_OFFSET, Relaxed));
                sort.sort_and_calculate_offsets(
                    &mut self.indices,
                    &mut self.keys,
                    &self.offsets_scratch,
                )?;
            }
        }

        self.offsets
            .par_iter_mut()
            .zip(self.offsets_scratch.par_iter())
            .for_each(|(dst, src)| *dst = src.load(Relaxed));

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_match_sorted_runs() {
        // Sorted keys {2,2,2,3,3,6,6,9,9,9} -> offsets 2:0, 3:3, 6:5, 9:7.
        let sorted = vec![2u32, 2, 2, 3, 3, 6, 6, 9, 9, 9];
        let offsets: Vec<AtomicU32> = (0..sorted.len()).map(|_| AtomicU32::new(0)).collect();

        SpatialOffsets::run(&sorted, &offsets, true).unwrap();

        assert_eq!(offsets[2].load(Relaxed), 0);
        assert_eq!(offsets[3].load(Relaxed), 3);
        assert_eq!(offsets[6].load(Relaxed), 5);
        assert_eq!(offsets[9].load(Relaxed), 7);
        for absent in [0usize, 1, 4, 5, 7, 8] {
            assert_eq!(offsets[absent].load(Relaxed), NO_OFFSET);
        }
    }

    #[test]
    fn offsets_reject_length_mismatch() {
        let sorted = vec![0u32, 1];
        let offsets: Vec<AtomicU32> = (0..3).map(|_| AtomicU32::new(0)).collect();
        assert!(matches!(
            SpatialOffsets::run(&sorted, &offsets, true),
            Err(Error::LengthMismatch { .. })
        ));
    }

    #[test]
    fn backends_agree_on_lookup_structure() {
        let positions: Vec<Vec2> = (0..64)
            .map(|i| Vec2::new((i % 8) as f32 * 0.11, (i / 8) as f32 * 0.09))
            .collect();

        for backend in [SortBackend::Count, SortBackend::Bitonic] {
            let mut hash = SpatialHash::new(positions.len(), backend);
            hash.update_keys_2d(&positions, 0.25).unwrap();
            hash.run().unwrap();

            assert!(hash.keys().windows(2).all(|w| w[0] <= w[1]));

            // Every slot is reachable through its key's offset run.
            for slot in 0..positions.len() {
                let key = hash.keys()[slot];
                let start = hash.offsets()[key as usize] as usize;
                assert!(start <= slot);
                assert!(hash.keys()[start..=slot].iter().all(|&k| k == key));
            }

            // Indices are a permutation of 0..n.
            let mut seen = vec![false; positions.len()];
            for &index in hash.indices() {
                assert!(!seen[index as usize]);
                seen[index as usize] = true;
            }
        }
    }
}
