//! Ledger capability: ERC-20 token transfers on an EVM chain.

mod rpc;
mod tx;

pub use rpc::RpcLedger;
pub use tx::{
    address_of, erc20_balance_of_calldata, erc20_transfer_calldata, format_address, keccak256,
    parse_address, signing_key, usdc_units, LegacyTransaction, USDC_DECIMALS,
};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected RPC response: {0}")]
    Parse(String),

    #[error("insufficient token balance: have {balance}, need {required}")]
    InsufficientFunds { balance: u128, required: u128 },

    #[error("transaction {0} reverted")]
    Reverted(String),

    #[error("transaction {0} not confirmed in time")]
    Timeout(String),
}

/// Confirmation of a successful transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReceipt {
    pub tx_hash: String,
    pub block_number: Option<u64>,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Transfer `amount` token units to `to` and wait for confirmation.
    async fn transfer(&self, to: &str, amount: u128) -> Result<TransferReceipt, LedgerError>;

    /// Token balance of the paying account, in token units.
    async fn token_balance(&self) -> Result<u128, LedgerError>;

    /// Drop connection state so the next call starts fresh.
    async fn reconnect(&self);
}

#[cfg(test)]
pub(crate) mod fake {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Fails the first `failures` transfers, then succeeds.
    #[derive(Default)]
    pub struct FlakyLedger {
        pub failures: u32,
        pub attempts: Mutex<Vec<(String, u128)>>,
        pub reconnects: AtomicU32,
    }

    impl FlakyLedger {
        pub fn failing(failures: u32) -> Self {
            Self {
                failures,
                ..Default::default()
            }
        }

        pub fn attempt_count(&self) -> usize {
            self.attempts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Ledger for FlakyLedger {
        async fn transfer(&self, to: &str, amount: u128) -> Result<TransferReceipt, LedgerError> {
            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                attempts.push((to.to_string(), amount));
                attempts.len() as u32
            };
            if attempt <= self.failures {
                return Err(LedgerError::Network("nonce too low".to_string()));
            }
            Ok(TransferReceipt {
                tx_hash: format!("0x{:064x}", attempt),
                block_number: Some(1),
            })
        }

        async fn token_balance(&self) -> Result<u128, LedgerError> {
            Ok(u128::MAX)
        }

        async fn reconnect(&self) {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
        }
    }
}
