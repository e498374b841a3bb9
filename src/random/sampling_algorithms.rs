//! Algorithms for uniform random sampling without replacement, used to pick the
//! individuals screened on a periodic round or seeded with an introduced infection.

use crate::rand::seq::index::sample as choose_range;
use crate::rand::Rng;

/// Sample multiple random elements uniformly without replacement from a container of known
/// length. If more samples are requested than are available, every element is returned.
///
/// The selected elements keep the iteration order of `iter`, which keeps callers that act on
/// the selection in turn independent of the order the indices were drawn in.
pub fn sample_multiple_from_known_length<I, R, T>(rng: &mut R, iter: I, requested: usize) -> Vec<T>
where
    R: Rng,
    I: IntoIterator<Item = T>,
    I::IntoIter: ExactSizeIterator,
{
    let iter = iter.into_iter();
    let length = iter.len();
    if requested >= length {
        return iter.collect();
    }
    if requested == 0 {
        return Vec::new();
    }

    let mut indexes: Vec<usize> = choose_range(rng, length, requested).into_vec();
    indexes.sort_unstable();
    let mut index_iterator = indexes.into_iter();
    let mut next_idx = index_iterator.next();
    let mut selected = Vec::with_capacity(requested);

    for (idx, item) in iter.enumerate() {
        if Some(idx) == next_idx {
            selected.push(item);
            next_idx = index_iterator.next();
            if next_idx.is_none() {
                break;
            }
        }
    }

    selected
}

/// Sample multiple random elements uniformly without replacement from an iterator of unknown
/// length. If more samples are requested than are in the set, the function returns as many
/// items as it can.
///
/// This function implements "Algorithm L" from KIM-HUNG LI
/// Reservoir-Sampling Algorithms of Time Complexity O(n(1 + log(N/n)))
/// <https://dl.acm.org/doi/pdf/10.1145/198429.198435>
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn sample_multiple_l_reservoir<I, R, T>(rng: &mut R, iter: I, requested: usize) -> Vec<T>
where
    R: Rng,
    I: IntoIterator<Item = T>,
{
    if requested == 0 {
        return Vec::new();
    }
    let mut weight: f64 = rng.random_range(0.0..1.0);
    weight = weight.powf(1.0 / requested as f64);
    let mut position: usize = 0;
    let mut next_pick_position: usize = 1;
    let mut reservoir = Vec::with_capacity(requested);

    for item in iter {
        position += 1;
        if position != next_pick_position {
            continue;
        }
        if reservoir.len() == requested {
            let to_remove = rng.random_range(0..reservoir.len());
            reservoir.swap_remove(to_remove);
        }
        reservoir.push(item);

        if reservoir.len() == requested {
            next_pick_position +=
                (f64::ln(rng.random_range(0.0..1.0)) / f64::ln(1.0 - weight)).floor() as usize + 1;
            let uniform_random: f64 = rng.random_range(0.0..1.0);
            weight *= uniform_random.powf(1.0 / requested as f64);
        } else {
            next_pick_position += 1;
        }
    }

    reservoir
}
