//! Candidate recipients for punishment transfers.

use std::path::Path;

use rand::seq::SliceRandom;

use super::EnforcementError;
use crate::ledger::parse_address;

/// Fixed, pre-validated list of recipient addresses.
#[derive(Debug, Clone)]
pub struct AddressPool {
    addresses: Vec<String>,
}

impl AddressPool {
    pub fn new(addresses: Vec<String>) -> Result<Self, EnforcementError> {
        if addresses.is_empty() {
            return Err(EnforcementError::EmptyPool);
        }
        for address in &addresses {
            parse_address(address)
                .map_err(|_| EnforcementError::InvalidAddress(address.clone()))?;
        }
        Ok(Self { addresses })
    }

    /// One address per line; blank lines are ignored.
    pub fn load(path: &Path) -> Result<Self, EnforcementError> {
        let content = std::fs::read_to_string(path).map_err(|source| EnforcementError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let addresses = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        let pool = Self::new(addresses)?;
        tracing::info!(path = %path.display(), size = pool.len(), "Loaded address pool");
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.addresses.iter().any(|a| a == address)
    }

    /// Uniformly random address.
    pub fn sample(&self) -> &str {
        // The pool is never empty after construction
        self.addresses
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or_default()
    }
}
