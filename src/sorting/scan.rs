// parallel exclusive prefix sum (work-efficient, block-recursive)
use std::collections::HashMap;

use rayon::prelude::*;

/// Elements folded per group. Matches a 256-wide dispatch with two
/// values processed per thread.
pub const GROUP_SIZE: usize = 512;

/// Computes exclusive prefix sums in place: `out[i] = sum(in[0..i])`,
/// `out[0] = 0`.
///
/// The array is split into groups of [`GROUP_SIZE`]; each group is
/// scanned locally and its total written to a group-sums buffer. With
/// more than one group, the group sums are themselves scanned
/// (recursively, on a strictly smaller problem) and added back as the
/// per-group base offset. Group-sum scratch buffers are cached by
/// group count and reused across calls of the same size class.
pub struct Scan {
    free_buffers: HashMap<usize, Vec<u32>>,
}

impl Scan {
    pub fn new() -> Self {
        Self {
            free_buffers: HashMap::new(),
        }
    }

    pub fn run(&mut self, elements: &mut [u32]) {
        if elements.len() <= 1 {
            if let Some(first) = elements.first_mut() {
                *first = 0;
            }
            return;
        }

        let num_groups = elements.len().div_ceil(GROUP_SIZE);
        let mut group_sums = self
            .free_buffers
            .remove(&num_groups)
            .unwrap_or_else(|| vec![0u32; num_groups]);

        elements
            .par_chunks_mut(GROUP_SIZE)
            .zip(group_sums.par_iter_mut())
            .for_each(|(group, total)| {
                let mut sum = 0u32;
                for value in group.iter_mut() {
                    let v = *value;
                    *value = sum;
                    sum += v;
                }
                *total = sum;
            });

        // A single group needs no combine pass. Otherwise scan the
        // group sums and add each group's base offset onto its elements.
        if num_groups > 1 {
            self.run(&mut group_sums);

            elements
                .par_chunks_mut(GROUP_SIZE)
                .zip(group_sums.par_iter())
                .for_each(|(group, &base)| {
                    for value in group.iter_mut() {
                        *value += base;
                    }
                });
        }

        self.free_buffers.insert(num_groups, group_sums);
    }
}

impl Default for Scan {
    fn default() -> Self {
        Self::new()
    }
}
