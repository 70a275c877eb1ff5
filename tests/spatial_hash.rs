use glam::{IVec2, Vec2};
use rand::{Rng, SeedableRng, rngs::StdRng};

use sph_fluid::spatial::hash_grid::{
    SortBackend, SpatialHash, cell_coord_2d, hash_cell_2d,
};

/// Full 3x3 cell scan through the hash, mapped back to original
/// particle indices and filtered by true distance.
fn hash_neighbours(hash: &SpatialHash, positions: &[Vec2], sample: Vec2, radius: f32) -> Vec<usize> {
    let centre = cell_coord_2d(sample, radius);
    let table_size = hash.table_size();
    let radius_sqr = radius * radius;

    let mut cell_keys = Vec::with_capacity(9);
    for ox in -1..=1 {
        for oy in -1..=1 {
            let key = hash_cell_2d(centre + IVec2::new(ox, oy), table_size);
            if !cell_keys.contains(&key) {
                cell_keys.push(key);
            }
        }
    }

    let mut found = Vec::new();
    for key in cell_keys {
        let mut slot = hash.offsets()[key as usize] as usize;
        while slot < hash.keys().len() && hash.keys()[slot] == key {
            let original = hash.indices()[slot] as usize;
            if (positions[original] - sample).length_squared() <= radius_sqr {
                found.push(original);
            }
            slot += 1;
        }
    }
    found.sort_unstable();
    found
}

fn brute_force_neighbours(positions: &[Vec2], sample: Vec2, radius: f32) -> Vec<usize> {
    let radius_sqr = radius * radius;
    positions
        .iter()
        .enumerate()
        .filter(|&(_, &p)| (p - sample).length_squared() <= radius_sqr)
        .map(|(i, _)| i)
        .collect()
}

#[test]
fn neighbour_search_is_complete() {
    let mut rng = StdRng::seed_from_u64(7);
    let radius = 0.5;
    let positions: Vec<Vec2> = (0..300)
        .map(|_| Vec2::new(rng.r#gen::<f32>() * 6.0 - 3.0, rng.r#gen::<f32>() * 6.0 - 3.0))
        .collect();

    for backend in [SortBackend::Count, SortBackend::Bitonic] {
        let mut hash = SpatialHash::new(positions.len(), backend);
        hash.update_keys_2d(&positions, radius).unwrap();
        hash.run().unwrap();

        for (i, &sample) in positions.iter().enumerate() {
            let expected = brute_force_neighbours(&positions, sample, radius);
            let found = hash_neighbours(&hash, &positions, sample, radius);
            assert_eq!(found, expected, "particle {i} ({backend:?})");
        }
    }
}

#[test]
fn every_particle_is_reachable_through_offsets() {
    let mut rng = StdRng::seed_from_u64(99);
    let positions: Vec<Vec2> = (0..128)
        .map(|_| Vec2::new(rng.r#gen::<f32>() * 2.0, rng.r#gen::<f32>() * 2.0))
        .collect();

    let mut hash = SpatialHash::new(positions.len(), SortBackend::Count);
    hash.update_keys_2d(&positions, 0.25).unwrap();
    hash.run().unwrap();

    // Walking each key's run from its offset must visit every sorted
    // slot exactly once.
    let mut visited = vec![false; positions.len()];
    for key in 0..hash.table_size() {
        let start = hash.offsets()[key as usize];
        if start == sph_fluid::spatial::hash_grid::NO_OFFSET {
            continue;
        }
        let mut slot = start as usize;
        while slot < hash.keys().len() && hash.keys()[slot] == key {
            assert!(!visited[slot]);
            visited[slot] = true;
            slot += 1;
        }
    }
    assert!(visited.iter().all(|&v| v));
}

#[test]
fn rebuild_discards_stale_offsets() {
    // First build puts everything in one corner; second build moves
    // it far away. Keys from the first build must not leak through.
    let near: Vec<Vec2> = (0..32).map(|i| Vec2::splat(i as f32 * 0.01)).collect();
    let far: Vec<Vec2> = (0..32).map(|i| Vec2::splat(100.0 + i as f32 * 0.01)).collect();

    let mut hash = SpatialHash::new(near.len(), SortBackend::Count);
    hash.update_keys_2d(&near, 0.5).unwrap();
    hash.run().unwrap();
    hash.update_keys_2d(&far, 0.5).unwrap();
    hash.run().unwrap();

    for (i, &sample) in far.iter().enumerate() {
        let expected = brute_force_neighbours(&far, sample, 0.5);
        let found = hash_neighbours(&hash, &far, sample, 0.5);
        assert_eq!(found, expected, "particle {i}");
    }
}
