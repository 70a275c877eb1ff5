use std::sync::atomic::{AtomicU32, Ordering::Relaxed};

use sph_fluid::sorting::bitonic::BitonicSort;
use sph_fluid::sorting::count_sort::CountSort;
use sph_fluid::sorting::scan::Scan;
use sph_fluid::spatial::hash_grid::{NO_OFFSET, SpatialOffsets};

fn pseudo_random_keys(n: usize, max_key: u32) -> Vec<u32> {
    // Deterministic low-quality mix; plenty of duplicate keys.
    (0..n)
        .map(|i| {
            let x = (i as u32).wrapping_mul(2654435761).rotate_left(7) ^ 0x5bd1e995;
            x % (max_key + 1)
        })
        .collect()
}

fn key_histogram(keys: &[u32], max_key: u32) -> Vec<u32> {
    let mut counts = vec![0u32; max_key as usize + 1];
    for &k in keys {
        counts[k as usize] += 1;
    }
    counts
}

#[test]
fn scan_matches_running_total() {
    let mut scan = Scan::new();

    let input = pseudo_random_keys(10_000, 97);
    let mut data = input.clone();
    scan.run(&mut data);

    let mut sum = 0u32;
    for (i, &v) in input.iter().enumerate() {
        assert_eq!(data[i], sum, "index {i}");
        sum += v;
    }
}

#[test]
fn count_sort_orders_large_key_sets() {
    let max_key = 499;
    let mut keys = pseudo_random_keys(20_000, max_key);
    let mut items: Vec<u32> = (0..keys.len() as u32).collect();
    let before = key_histogram(&keys, max_key);
    let original = keys.clone();

    let mut sort = CountSort::new(keys.len(), max_key);
    sort.run(&mut items, &mut keys).unwrap();

    assert!(keys.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(key_histogram(&keys, max_key), before);
    for (&item, &key) in items.iter().zip(&keys) {
        assert_eq!(original[item as usize], key);
    }
}

#[test]
fn bitonic_agrees_with_count_sort() {
    let max_key = 63;
    let keys = pseudo_random_keys(777, max_key);
    let items: Vec<u32> = (0..keys.len() as u32).collect();

    let mut keys_a = keys.clone();
    let mut items_a = items.clone();
    CountSort::new(keys.len(), max_key)
        .run(&mut items_a, &mut keys_a)
        .unwrap();

    let mut keys_b = keys.clone();
    let mut items_b = items;
    BitonicSort::new(keys.len())
        .sort(&mut items_b, &mut keys_b)
        .unwrap();

    // Keys agree exactly; item order among equal keys may not.
    assert_eq!(keys_a, keys_b);
    for (&item, &key) in items_b.iter().zip(&keys_b) {
        assert_eq!(keys[item as usize], key);
    }
}

#[test]
fn offsets_delimit_key_runs_after_either_sort() {
    let raw_keys = vec![6u32, 9, 2, 2, 6, 3, 9, 9, 3, 2];
    let n = raw_keys.len();

    for use_bitonic in [false, true] {
        let mut keys = raw_keys.clone();
        let mut items: Vec<u32> = (0..n as u32).collect();
        let offsets: Vec<AtomicU32> = (0..n).map(|_| AtomicU32::new(0)).collect();

        if use_bitonic {
            let mut sort = BitonicSort::new(n);
            offsets.iter().for_each(|o| o.store(NO_OFFSET, Relaxed));
            sort.sort_and_calculate_offsets(&mut items, &mut keys, &offsets)
                .unwrap();
        } else {
            let mut sort = CountSort::new(n, 9);
            sort.run(&mut items, &mut keys).unwrap();
            SpatialOffsets::run(&keys, &offsets, true).unwrap();
        }

        assert_eq!(keys, vec![2, 2, 2, 3, 3, 6, 6, 9, 9, 9]);
        assert_eq!(offsets[2].load(Relaxed), 0);
        assert_eq!(offsets[3].load(Relaxed), 3);
        assert_eq!(offsets[6].load(Relaxed), 5);
        assert_eq!(offsets[9].load(Relaxed), 7);
        for absent in [0usize, 1, 4, 5, 7, 8] {
            assert_eq!(offsets[absent].load(Relaxed), NO_OFFSET);
        }
    }
}
