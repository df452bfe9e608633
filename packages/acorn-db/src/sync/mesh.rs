//! Mesh topology builder over in-process collections.
//!
//! [`entangle_all`] wires a full mesh: for n collections it creates
//! n·(n−1)/2 pairwise bidirectional entanglements. The builder is
//! idempotent -- a second call over the same set adds zero peers -- and
//! convergence under the mesh is guaranteed by change-id loop prevention,
//! not by topology: every mutation applies exactly once per other member
//! regardless of propagation order.

use crate::collection::{Collection, Document};

/// Fully meshes `collections` with pairwise bidirectional entanglements.
///
/// Returns the number of new pairs created; re-running over an existing
/// mesh returns 0.
pub fn entangle_all<T: Document>(collections: &[&Collection<T>]) -> usize {
    let mut created = 0_usize;
    for (i, left) in collections.iter().enumerate() {
        for right in &collections[i + 1..] {
            if left.entangle_with(right) {
                created += 1;
            }
        }
    }
    created
}

/// Star topology: every spoke entangles bidirectionally with the hub only.
///
/// Returns the number of new entanglements created.
pub fn entangle_star<T: Document>(hub: &Collection<T>, spokes: &[&Collection<T>]) -> usize {
    spokes
        .iter()
        .filter(|spoke| hub.entangle_with(spoke))
        .count()
}
