use crate::corpus::Seed;
use rand::Rng;
use rand_core::RngCore;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Cannot schedule from an empty corpus")]
    CorpusEmpty,
}

/// Picks the next seed to mutate from a candidate slice.
pub trait Scheduler {
    fn select<'a>(
        &mut self,
        seeds: &[&'a Seed],
        rng: &mut dyn RngCore,
    ) -> Result<&'a Seed, SchedulerError>;
}

/// Energy-proportional random selection: a seed's chance of being picked is
/// its energy over the total energy of the candidate set. Candidates are
/// walked in id order so the same RNG stream always yields the same pick.
#[derive(Debug, Default)]
pub struct EnergyScheduler;

impl EnergyScheduler {
    pub fn new() -> Self {
        EnergyScheduler
    }
}

impl Scheduler for EnergyScheduler {
    fn select<'a>(
        &mut self,
        seeds: &[&'a Seed],
        rng: &mut dyn RngCore,
    ) -> Result<&'a Seed, SchedulerError> {
        if seeds.is_empty() {
            return Err(SchedulerError::CorpusEmpty);
        }

        let mut ordered: Vec<&Seed> = seeds.to_vec();
        ordered.sort_by(|a, b| a.id.cmp(&b.id));

        // Energies are clamped to a positive band upstream, but guard anyway
        // so a zero-energy slice degrades to uniform choice.
        let total: u64 = ordered.iter().map(|s| s.energy as u64).sum();
        if total == 0 {
            let idx = rng.random_range(0..ordered.len());
            return Ok(ordered[idx]);
        }

        let mut ticket = rng.random_range(0..total);
        for seed in &ordered {
            let weight = seed.energy as u64;
            if ticket < weight {
                return Ok(seed);
            }
            ticket -= weight;
        }
        // Unreachable with a correct total, but the last candidate is the
        // right answer for any rounding at the top of the range.
        Ok(ordered[ordered.len() - 1])
    }
}
