use std::any::TypeId;
use std::cell::RefMut;

use log::trace;

use crate::hashing::hash_str;
use crate::rand::distr::uniform::{SampleRange, SampleUniform};
use crate::rand::distr::Distribution;
use crate::rand::seq::SliceRandom;
use crate::rand::{Rng, SeedableRng};
use crate::random::{sample_multiple_l_reservoir, RngHolder, RngId, RngPlugin};
use crate::Context;

/// Gets a mutable reference to the random number generator associated with the given
/// [`RngId`]. If the Rng has not been used before, one will be created with the base seed
/// you defined in `init_random`. Note that this will panic if `init_random` was not called yet.
fn get_rng<R: RngId + 'static>(context: &Context) -> RefMut<R::RngType> {
    let data_container = context
        .try_get_data::<RngPlugin>()
        .expect("You must initialize the random number generator with a base seed");

    let rng_holders = data_container.rng_holders.try_borrow_mut().unwrap();
    RefMut::map(rng_holders, |holders| {
        holders
            .entry(TypeId::of::<R>())
            .or_insert_with(|| {
                trace!(
                    "creating new RNG (seed={}) for stream {}",
                    data_container.base_seed,
                    R::get_name()
                );
                let seed_offset = hash_str(R::get_name());
                RngHolder {
                    rng: Box::new(R::RngType::seed_from_u64(
                        data_container.base_seed.wrapping_add(seed_offset),
                    )),
                }
            })
            .rng
            .downcast_mut::<R::RngType>()
            .unwrap()
    })
}

// This is a trait extension on Context for
// random number generation functionality.
pub trait ContextRandomExt {
    /// Initializes the `RngPlugin` data container to store rngs as well as a base
    /// seed. Note that rngs are created lazily when they are first sampled.
    fn init_random(&mut self, base_seed: u64);

    /// The base seed this context was initialised with.
    fn get_base_seed(&self) -> u64;

    /// Gets a random sample from the random number generator associated with the given
    /// [`RngId`] by applying the specified sampler function.
    fn sample<R: RngId + 'static, T>(
        &self,
        rng_id: R,
        sampler: impl FnOnce(&mut R::RngType) -> T,
    ) -> T;

    /// Gets a random sample from the specified distribution.
    fn sample_distr<R: RngId + 'static, T>(&self, rng_id: R, distribution: impl Distribution<T>) -> T
    where
        R::RngType: Rng;

    /// Gets a random sample within the range provided by `range`.
    fn sample_range<R: RngId + 'static, S, T>(&self, rng_id: R, range: S) -> T
    where
        R::RngType: Rng,
        S: SampleRange<T>,
        T: SampleUniform;

    /// A uniform draw on `[0, 1)`.
    fn sample_uniform<R: RngId + 'static>(&self, rng_id: R) -> f64
    where
        R::RngType: Rng;

    /// Gets a random boolean value which is true with probability `p`. The
    /// probability is clamped into `[0, 1]`, and a probability at or beyond
    /// either bound decides the outcome without consuming a draw.
    fn sample_bool<R: RngId + 'static>(&self, rng_id: R, p: f64) -> bool
    where
        R::RngType: Rng;

    /// Selects an index from a cumulative probability table: the first entry
    /// whose cumulative probability exceeds a uniform draw. Falls back to the
    /// last entry if the table does not reach one.
    fn sample_cumulative<R: RngId + 'static>(&self, rng_id: R, cumulative: &[f64]) -> usize
    where
        R::RngType: Rng;

    /// Shuffles `items` in place.
    fn shuffle<R: RngId + 'static, T>(&self, rng_id: R, items: &mut [T])
    where
        R::RngType: Rng;

    /// Picks up to `requested` items uniformly without replacement.
    fn sample_without_replacement<R: RngId + 'static, T>(
        &self,
        rng_id: R,
        items: impl IntoIterator<Item = T>,
        requested: usize,
    ) -> Vec<T>
    where
        R::RngType: Rng;
}

impl ContextRandomExt for Context {
    fn init_random(&mut self, base_seed: u64) {
        trace!("initializing random module");
        let data_container = self.get_data_mut(RngPlugin);
        data_container.base_seed = base_seed;

        // Clear any existing Rngs to ensure they get re-seeded
        let mut rng_map = data_container.rng_holders.try_borrow_mut().unwrap();
        rng_map.clear();
    }

    fn get_base_seed(&self) -> u64 {
        self.try_get_data::<RngPlugin>()
            .map_or(0, |data| data.base_seed)
    }

    fn sample<R: RngId + 'static, T>(
        &self,
        _rng_id: R,
        sampler: impl FnOnce(&mut R::RngType) -> T,
    ) -> T {
        let mut rng = get_rng::<R>(self);
        sampler(&mut rng)
    }

    fn sample_distr<R: RngId + 'static, T>(&self, _rng_id: R, distribution: impl Distribution<T>) -> T
    where
        R::RngType: Rng,
    {
        let mut rng = get_rng::<R>(self);
        distribution.sample::<R::RngType>(&mut rng)
    }

    fn sample_range<R: RngId + 'static, S, T>(&self, rng_id: R, range: S) -> T
    where
        R::RngType: Rng,
        S: SampleRange<T>,
        T: SampleUniform,
    {
        self.sample(rng_id, |rng| rng.random_range(range))
    }

    fn sample_uniform<R: RngId + 'static>(&self, rng_id: R) -> f64
    where
        R::RngType: Rng,
    {
        self.sample(rng_id, |rng| rng.random::<f64>())
    }

    fn sample_bool<R: RngId + 'static>(&self, rng_id: R, p: f64) -> bool
    where
        R::RngType: Rng,
    {
        if p.is_nan() || p <= 0.0 {
            return false;
        }
        if p >= 1.0 {
            return true;
        }
        self.sample_uniform(rng_id) < p
    }

    fn sample_cumulative<R: RngId + 'static>(&self, rng_id: R, cumulative: &[f64]) -> usize
    where
        R::RngType: Rng,
    {
        if cumulative.len() <= 1 {
            return 0;
        }
        let draw = self.sample_uniform(rng_id);
        cumulative
            .iter()
            .position(|&bound| draw < bound)
            .unwrap_or(cumulative.len() - 1)
    }

    fn shuffle<R: RngId + 'static, T>(&self, rng_id: R, items: &mut [T])
    where
        R::RngType: Rng,
    {
        self.sample(rng_id, |rng| items.shuffle(rng));
    }

    fn sample_without_replacement<R: RngId + 'static, T>(
        &self,
        rng_id: R,
        items: impl IntoIterator<Item = T>,
        requested: usize,
    ) -> Vec<T>
    where
        R::RngType: Rng,
    {
        self.sample(rng_id, |rng| {
            sample_multiple_l_reservoir(rng, items, requested)
        })
    }
}
