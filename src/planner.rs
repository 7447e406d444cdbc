use crate::state::{Part, StateStore};

/// Splits a resource of `total_size` bytes into `parallelism` contiguous parts.
///
/// Part `j` spans `[(S/par)*j, (S/par)*(j+1) - 1]`, except the last one whose
/// upper bound is `S` itself. The fetch layer compensates by requesting the
/// last part open-ended, so it still receives exactly the remaining bytes.
///
/// An unknown or empty size collapses the plan to a single part. Parallelism
/// is also capped at the size so no part is left with an empty range.
pub fn plan(store: &StateStore, name: &str, total_size: Option<u64>, parallelism: usize) -> Vec<Part> {
    let size = match total_size {
        Some(size) if size > 0 => size,
        other => return vec![Part::new(store.part_path(name, 0), 0, other)],
    };

    let par = (parallelism.max(1) as u64).min(size);
    let chunk = size / par;

    (0..par)
        .map(|j| {
            let from = chunk * j;
            let to = if j < par - 1 { chunk * (j + 1) - 1 } else { size };
            Part::new(store.part_path(name, j as usize), from, Some(to))
        })
        .collect()
}
