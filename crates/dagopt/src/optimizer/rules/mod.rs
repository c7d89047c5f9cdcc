//! Rewrite rules run by the DFS optimizer.

mod transpose_chain;
mod transpose_matmul;

pub use transpose_chain::EliminateTransposeChain;
pub use transpose_matmul::FuseTransposeMatMul;

pub(crate) fn is_identity_perm(perm: &[usize]) -> bool {
    perm.iter().copied().eq(0..perm.len())
}

/// Composes `first` followed by `second`: output axis `i` reads input axis
/// `first[second[i]]`.
pub(crate) fn compose_perms(first: &[usize], second: &[usize]) -> Option<Vec<usize>> {
    if first.len() != second.len() {
        return None;
    }
    let mut result = Vec::with_capacity(first.len());
    for &axis in second {
        if axis >= first.len() {
            return None;
        }
        result.push(first[axis]);
    }
    Some(result)
}

/// Whether `perm` swaps the last two axes and fixes every other one.
pub(crate) fn swaps_last_two(perm: &[usize]) -> bool {
    let rank = perm.len();
    if rank < 2 {
        return false;
    }
    perm[..rank - 2].iter().copied().eq(0..rank - 2)
        && perm[rank - 2] == rank - 1
        && perm[rank - 1] == rank - 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composition_applies_first_then_second() {
        assert_eq!(compose_perms(&[1, 2, 0], &[2, 0, 1]), Some(vec![0, 1, 2]));
        assert_eq!(compose_perms(&[1, 0, 2], &[0, 2, 1]), Some(vec![1, 2, 0]));
        assert_eq!(compose_perms(&[1, 0], &[0, 1, 2]), None);
    }

    #[test]
    fn identity_and_last_two_swap_detection() {
        assert!(is_identity_perm(&[0, 1, 2]));
        assert!(!is_identity_perm(&[1, 0]));
        assert!(swaps_last_two(&[0, 2, 1]));
        assert!(swaps_last_two(&[1, 0]));
        assert!(!swaps_last_two(&[1, 0, 2]));
        assert!(!swaps_last_two(&[2, 1, 0]));
        assert!(!swaps_last_two(&[0]));
    }
}
