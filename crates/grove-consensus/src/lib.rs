//! # grove-consensus: Spend execution, block validation, and proof-of-work.
//!
//! [`ConsensusEngine`] implements
//! [`ConsensusValidator`](grove_core::traits::ConsensusValidator) on top of
//! a [`PuzzleRunner`](grove_core::traits::PuzzleRunner). The bundled
//! [`StandardPuzzleRunner`] locks coins to a single BLS public key.

pub mod engine;
pub mod genesis;
pub mod spend;

pub use engine::{check_proof, mine_block, reward_parent, ConsensusEngine};
pub use genesis::{genesis_block, genesis_hash};
pub use spend::{run_spend_bundle, run_spends, standard_solution, StandardPuzzleRunner};
