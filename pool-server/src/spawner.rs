//! Generates random in-prefix addresses, screens them for uniqueness and
//! usability, and inserts survivors into `GlobalDB`.

use std::sync::Arc;

use ipv6_pool_core::{Address, PoolError};

use crate::checker::Checker;
use crate::global_db::GlobalDb;
use crate::prefixer::Prefixer;

pub struct Spawner {
    prefixer: Arc<Prefixer>,
    checker: Arc<Checker>,
    collision_retries: u32,
}

impl Spawner {
    pub fn new(prefixer: Arc<Prefixer>, checker: Arc<Checker>, collision_retries: u32) -> Self {
        Self {
            prefixer,
            checker,
            collision_retries,
        }
    }

    /// One spawn attempt: find a non-colliding candidate (bounded retry),
    /// probe it once, and insert on success. `Ok(None)` means this attempt
    /// produced nothing usable -- not an error, just nothing to show for it.
    pub async fn spawn(&self, global: &GlobalDb) -> Result<Option<Address>, PoolError> {
        let prefix = self.prefixer.current_prefix().map_err(|_| PoolError::NoPrefix)?;

        let mut candidate = None;
        for _ in 0..self.collision_retries {
            let c = {
                let mut rng = rand::thread_rng();
                prefix.random_candidate(&mut rng)
            };
            if !global.has_addr(c) {
                candidate = Some(c);
                break;
            }
        }
        let Some(candidate) = candidate else {
            return Ok(None);
        };

        if !self.checker.check(candidate).await {
            return Ok(None);
        }

        match global.add_addr(&prefix, candidate) {
            Ok(()) => Ok(Some(candidate)),
            // The prefix moved between the probe and the insert; the
            // candidate belongs to a pool generation that no longer exists.
            Err(PoolError::NoPrefix) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Repeatedly calls `spawn` until `n` addresses are accepted or an
    /// overall attempt budget (`n * budget_factor`) is exhausted. Returns
    /// `(accepted, complete)` where `complete` iff exactly `n` were
    /// accepted without exhausting the budget.
    pub async fn spawns(
        &self,
        global: &GlobalDb,
        n: usize,
        budget_factor: u32,
    ) -> Result<(Vec<Address>, bool), PoolError> {
        let mut accepted = Vec::with_capacity(n);
        if n == 0 {
            return Ok((accepted, true));
        }
        let budget = n as u64 * budget_factor as u64;
        let mut attempts = 0u64;
        while (accepted.len() as usize) < n && attempts < budget {
            attempts += 1;
            match self.spawn(global).await {
                Ok(Some(addr)) => accepted.push(addr),
                Ok(None) => {}
                Err(e) => return Err(e),
            }
        }
        let complete = accepted.len() == n;
        Ok((accepted, complete))
    }
}
