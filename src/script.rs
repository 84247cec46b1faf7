//! Script verification boundary
//!
//! The interpreter lives in the cryptographic primitive library; rules only
//! see this trait.

use crate::deployments::ScriptFlags;
use crate::types::*;

/// Verifies that input `input_index` of `tx` satisfies the locking script of `spent`.
pub trait ScriptVerifier: Send + Sync {
    fn verify_input(&self, tx: &Transaction, input_index: usize, spent: &Coin, flags: ScriptFlags) -> bool;
}

/// Accepts every input. Used for regtest and rule tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllScripts;

impl ScriptVerifier for AcceptAllScripts {
    fn verify_input(&self, _tx: &Transaction, _input_index: usize, _spent: &Coin, _flags: ScriptFlags) -> bool {
        true
    }
}

/// Matches the unlocking script byte-for-byte against the locking script.
///
/// Stands in for a real interpreter when tests need scripts that can fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptEquality;

impl ScriptVerifier for ScriptEquality {
    fn verify_input(&self, tx: &Transaction, input_index: usize, spent: &Coin, _flags: ScriptFlags) -> bool {
        tx.inputs
            .get(input_index)
            .map(|input| input.script_sig == spent.script_pubkey)
            .unwrap_or(false)
    }
}
