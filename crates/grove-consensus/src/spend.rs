//! Spend execution and bundle-level checks.
//!
//! A standard coin is locked to one BLS public key: the puzzle reveal is
//! the 48-byte key, the coin's puzzle hash is its SHA-256, and the
//! solution is a bincode-encoded list of [`Condition`]s. The key owner
//! authorizes a spend by signing [`spend_message`] over the solution.

use std::collections::HashSet;

use grove_core::constants::ConsensusConstants;
use grove_core::crypto::{parse_public_key, puzzle_hash_for_pk, spend_message, verify_aggregate};
use grove_core::error::{GroveError, SpendError};
use grove_core::traits::{BundleConditions, CoinView, PuzzleRunner, SpendConditions};
use grove_core::types::{Coin, CoinSpend, Condition, Hash256, SpendBundle};

/// Encode conditions as a standard-puzzle solution.
pub fn standard_solution(conditions: &[Condition]) -> Result<Vec<u8>, bincode::error::EncodeError> {
    bincode::encode_to_vec(conditions, bincode::config::standard())
}

/// Runs the pay-to-public-key puzzle.
#[derive(Clone, Debug)]
pub struct StandardPuzzleRunner {
    genesis_challenge: Hash256,
    cost_per_byte: u64,
    cost_agg_sig: u64,
    cost_create_coin: u64,
}

impl StandardPuzzleRunner {
    pub fn new(constants: &ConsensusConstants) -> Self {
        Self {
            genesis_challenge: constants.genesis_challenge,
            cost_per_byte: constants.cost_per_byte,
            cost_agg_sig: constants.cost_agg_sig,
            cost_create_coin: constants.cost_create_coin,
        }
    }

    fn charge(cost: &mut u64, amount: u64, max_cost: u64) -> Result<(), SpendError> {
        *cost = cost.saturating_add(amount);
        if *cost > max_cost {
            return Err(SpendError::CostExceeded { cost: *cost, max: max_cost });
        }
        Ok(())
    }
}

impl PuzzleRunner for StandardPuzzleRunner {
    fn run_spend(&self, spend: &CoinSpend, max_cost: u64) -> Result<SpendConditions, SpendError> {
        let coin_id = spend.coin.coin_id();
        let mut cost = 0u64;

        let bytes = (spend.puzzle_reveal.len() as u64).saturating_add(spend.solution.len() as u64);
        Self::charge(&mut cost, self.cost_per_byte.saturating_mul(bytes), max_cost)?;

        if puzzle_hash_for_pk(&spend.puzzle_reveal) != spend.coin.puzzle_hash {
            return Err(SpendError::WrongPuzzleHash(coin_id));
        }
        let public_key =
            parse_public_key(&spend.puzzle_reveal).ok_or(SpendError::InvalidPuzzle(coin_id))?;

        let (conditions, read): (Vec<Condition>, usize) =
            bincode::decode_from_slice(&spend.solution, bincode::config::standard())
                .map_err(|_| SpendError::InvalidSolution(coin_id))?;
        if read != spend.solution.len() {
            return Err(SpendError::InvalidSolution(coin_id));
        }

        Self::charge(&mut cost, self.cost_agg_sig, max_cost)?;

        let mut out = SpendConditions {
            coin_id,
            created: Vec::new(),
            reserve_fee: 0,
            assert_height: None,
            assert_seconds: None,
            agg_sig: Vec::with_capacity(1),
            cost: 0,
        };
        for condition in conditions {
            match condition {
                Condition::CreateCoin { puzzle_hash, amount } => {
                    Self::charge(&mut cost, self.cost_create_coin, max_cost)?;
                    out.created.push(Coin::new(coin_id, puzzle_hash, amount));
                }
                Condition::ReserveFee(amount) => {
                    out.reserve_fee =
                        out.reserve_fee.checked_add(amount).ok_or(SpendError::ValueOverflow)?;
                }
                Condition::AssertHeightAbsolute(h) => {
                    out.assert_height = Some(out.assert_height.map_or(h, |cur| cur.max(h)));
                }
                Condition::AssertSecondsAbsolute(t) => {
                    out.assert_seconds = Some(out.assert_seconds.map_or(t, |cur| cur.max(t)));
                }
            }
        }

        out.agg_sig.push((public_key, spend_message(&spend.solution, &coin_id, &self.genesis_challenge)));
        out.cost = cost;
        Ok(out)
    }
}

/// Validate a bundle against `coins`. See [`run_spends`].
pub fn run_spend_bundle<V: CoinView + ?Sized>(
    runner: &dyn PuzzleRunner,
    bundle: &SpendBundle,
    coins: &V,
    max_cost: u64,
) -> Result<BundleConditions, GroveError> {
    run_spends(runner, &bundle.coin_spends, &bundle.aggregated_signature, coins, max_cost)
}

/// Run every spend and check the set as a whole.
///
/// Checks, in order: non-empty, no coin spent twice, each spend runs within
/// the remaining cost budget, no coin created twice, every removal exists
/// unspent in `coins` or is created by the same set, created value does not
/// exceed spent value, reserved fees are covered, and the aggregated
/// signature verifies over every required `(key, message)` pair.
///
/// Height and time assertions are collected, not enforced.
pub fn run_spends<V: CoinView + ?Sized>(
    runner: &dyn PuzzleRunner,
    coin_spends: &[CoinSpend],
    aggregated_signature: &[u8],
    coins: &V,
    max_cost: u64,
) -> Result<BundleConditions, GroveError> {
    if coin_spends.is_empty() {
        return Err(SpendError::EmptyBundle.into());
    }

    let mut removal_ids = HashSet::with_capacity(coin_spends.len());
    for spend in coin_spends {
        let id = spend.coin.coin_id();
        if !removal_ids.insert(id) {
            return Err(SpendError::DuplicateSpend(id).into());
        }
    }

    let mut cost = 0u64;
    let mut additions = Vec::new();
    let mut reserve_fee = 0u64;
    let mut assert_height = 0u64;
    let mut assert_seconds = 0u64;
    let mut pairs = Vec::with_capacity(coin_spends.len());
    for spend in coin_spends {
        let conditions = runner.run_spend(spend, max_cost - cost)?;
        cost = cost
            .checked_add(conditions.cost)
            .filter(|c| *c <= max_cost)
            .ok_or(SpendError::CostExceeded { cost: cost.saturating_add(conditions.cost), max: max_cost })?;
        additions.extend(conditions.created);
        reserve_fee = reserve_fee
            .checked_add(conditions.reserve_fee)
            .ok_or(SpendError::ValueOverflow)?;
        assert_height = assert_height.max(conditions.assert_height.unwrap_or(0));
        assert_seconds = assert_seconds.max(conditions.assert_seconds.unwrap_or(0));
        pairs.extend(conditions.agg_sig);
    }

    let mut addition_ids = HashSet::with_capacity(additions.len());
    for coin in &additions {
        let id = coin.coin_id();
        if !addition_ids.insert(id) {
            return Err(SpendError::DuplicateOutput(id).into());
        }
    }

    for spend in coin_spends {
        let id = spend.coin.coin_id();
        if addition_ids.contains(&id) {
            continue;
        }
        match coins.get_coin_record(&id)? {
            None => return Err(SpendError::UnknownCoin(id).into()),
            Some(record) if record.is_spent() => return Err(SpendError::CoinAlreadySpent(id).into()),
            Some(_) => {}
        }
    }

    let spent = sum_amounts(coin_spends.iter().map(|s| &s.coin))?;
    let created = sum_amounts(additions.iter())?;
    if created > spent {
        return Err(SpendError::MintingCoin { spent, created }.into());
    }
    let fee = spent - created;
    if reserve_fee > fee {
        return Err(SpendError::ReserveFeeTooHigh { reserved: reserve_fee, fee }.into());
    }

    if !verify_aggregate(aggregated_signature, &pairs) {
        return Err(SpendError::BadAggregateSignature.into());
    }

    Ok(BundleConditions {
        removals: coin_spends.iter().map(|s| s.coin).collect(),
        additions,
        fee,
        cost,
        assert_height,
        assert_seconds,
    })
}

fn sum_amounts<'a>(mut coins: impl Iterator<Item = &'a Coin>) -> Result<u64, SpendError> {
    coins.try_fold(0u64, |acc, c| acc.checked_add(c.amount).ok_or(SpendError::ValueOverflow))
}
