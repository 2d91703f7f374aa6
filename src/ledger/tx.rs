//! Legacy transaction encoding and EIP-155 signing.

use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use sha3::{Digest, Keccak256};

use super::LedgerError;

/// `transfer(address,uint256)`
const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// `balanceOf(address)`
const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];

/// Token decimals of USDC.
pub const USDC_DECIMALS: u32 = 6;

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// Scale a human USDC amount to token units.
pub fn usdc_units(amount: f64) -> u128 {
    (amount * 10f64.powi(USDC_DECIMALS as i32)).round().max(0.0) as u128
}

pub fn parse_address(text: &str) -> Result<[u8; 20], LedgerError> {
    let trimmed = text.trim();
    let bytes = hex::decode(trimmed.strip_prefix("0x").unwrap_or(trimmed))
        .map_err(|_| LedgerError::InvalidAddress(text.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| LedgerError::InvalidAddress(text.to_string()))
}

pub fn format_address(address: &[u8; 20]) -> String {
    format!("0x{}", hex::encode(address))
}

pub fn signing_key(private_key: &str) -> Result<SigningKey, LedgerError> {
    let trimmed = private_key.trim();
    let bytes = hex::decode(trimmed.strip_prefix("0x").unwrap_or(trimmed))
        .map_err(|e| LedgerError::InvalidKey(e.to_string()))?;
    SigningKey::from_slice(&bytes).map_err(|e| LedgerError::InvalidKey(e.to_string()))
}

/// Account address of a key: last 20 bytes of keccak(uncompressed pubkey).
pub fn address_of(key: &SigningKey) -> [u8; 20] {
    let public = k256::PublicKey::from(key.verifying_key());
    let point = public.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    address
}

fn word_from_address(address: &[u8; 20]) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address);
    word
}

fn word_from_u128(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

pub fn erc20_transfer_calldata(to: &[u8; 20], amount: u128) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 64);
    data.extend_from_slice(&TRANSFER_SELECTOR);
    data.extend_from_slice(&word_from_address(to));
    data.extend_from_slice(&word_from_u128(amount));
    data
}

pub fn erc20_balance_of_calldata(owner: &[u8; 20]) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 32);
    data.extend_from_slice(&BALANCE_OF_SELECTOR);
    data.extend_from_slice(&word_from_address(owner));
    data
}

// RLP

fn trimmed_be(value: u128) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[first..].to_vec()
}

fn rlp_length_prefix(len: usize, short_base: u8, long_base: u8) -> Vec<u8> {
    if len <= 55 {
        vec![short_base + len as u8]
    } else {
        let len_bytes = trimmed_be(len as u128);
        let mut out = vec![long_base + len_bytes.len() as u8];
        out.extend(len_bytes);
        out
    }
}

pub fn rlp_bytes(data: &[u8]) -> Vec<u8> {
    if data.len() == 1 && data[0] < 0x80 {
        return data.to_vec();
    }
    let mut out = rlp_length_prefix(data.len(), 0x80, 0xb7);
    out.extend_from_slice(data);
    out
}

pub fn rlp_uint(value: u128) -> Vec<u8> {
    rlp_bytes(&trimmed_be(value))
}

pub fn rlp_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload: Vec<u8> = items.concat();
    let mut out = rlp_length_prefix(payload.len(), 0xc0, 0xf7);
    out.extend(payload);
    out
}

/// A pre-London transaction with an explicit gas price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: [u8; 20],
    pub value: u128,
    pub data: Vec<u8>,
    pub chain_id: u64,
}

impl LegacyTransaction {
    fn base_fields(&self) -> Vec<Vec<u8>> {
        vec![
            rlp_uint(self.nonce as u128),
            rlp_uint(self.gas_price),
            rlp_uint(self.gas_limit as u128),
            rlp_bytes(&self.to),
            rlp_uint(self.value),
            rlp_bytes(&self.data),
        ]
    }

    /// Keccak of the EIP-155 signing payload.
    pub fn signing_hash(&self) -> [u8; 32] {
        let mut fields = self.base_fields();
        fields.push(rlp_uint(self.chain_id as u128));
        fields.push(rlp_uint(0));
        fields.push(rlp_uint(0));
        keccak256(&rlp_list(&fields))
    }

    /// Sign and return the raw transaction bytes.
    pub fn sign(&self, key: &SigningKey) -> Result<Vec<u8>, LedgerError> {
        let (signature, recovery_id) = key
            .sign_prehash_recoverable(&self.signing_hash())
            .map_err(|e| LedgerError::InvalidKey(format!("signing failed: {}", e)))?;

        let v = recovery_id.to_byte() as u128 + self.chain_id as u128 * 2 + 35;
        let signature_bytes = signature.to_bytes();
        let (r, s) = signature_bytes.split_at(32);

        let mut fields = self.base_fields();
        fields.push(rlp_uint(v));
        fields.push(rlp_bytes(strip_leading_zeros(r)));
        fields.push(rlp_bytes(strip_leading_zeros(s)));
        Ok(rlp_list(&fields))
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}
