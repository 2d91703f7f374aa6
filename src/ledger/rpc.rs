//! Ethereum JSON-RPC ledger.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::tx::{
    address_of, erc20_balance_of_calldata, erc20_transfer_calldata, format_address, parse_address,
    signing_key, LegacyTransaction,
};
use super::{Ledger, LedgerError, TransferReceipt};
use crate::config::LedgerConfig;

/// Used when gas estimation fails.
const FALLBACK_GAS_LIMIT: u64 = 500_000;

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);

/// Gas price and gas limit both get a 20% buffer.
fn with_buffer(value: u128) -> u128 {
    value * 12 / 10
}

pub struct RpcLedger {
    client: RwLock<Client>,
    rpc_url: url::Url,
    key: SigningKey,
    from: [u8; 20],
    token: [u8; 20],
    chain_id: u64,
    request_id: AtomicU64,
    in_flight: Mutex<Option<InFlight>>,
    receipt_poll: Duration,
    receipt_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    status: Option<String>,
    block_number: Option<String>,
}

impl RawReceipt {
    fn into_receipt(self, tx_hash: &str) -> Result<TransferReceipt, LedgerError> {
        if self.status.as_deref() != Some("0x1") {
            return Err(LedgerError::Reverted(tx_hash.to_string()));
        }
        let block_number = self
            .block_number
            .as_deref()
            .and_then(|b| parse_quantity(b).ok())
            .and_then(|b| u64::try_from(b).ok());
        Ok(TransferReceipt {
            tx_hash: tx_hash.to_string(),
            block_number,
        })
    }
}

/// Transfers sent under one nonce whose receipt has not been seen.
///
/// Every retry reuses the nonce, so at most one of `tx_hashes` can land.
#[derive(Debug, Clone)]
struct InFlight {
    nonce: u64,
    gas_price: u128,
    tx_hashes: Vec<String>,
}

/// A replacement must outbid the pending transaction by at least 10%.
fn replacement_gas_price(current: u128, pending: Option<u128>) -> u128 {
    match pending {
        Some(previous) => current.max(previous + previous / 10 + 1),
        None => current,
    }
}

pub fn parse_quantity(text: &str) -> Result<u128, LedgerError> {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    if digits.is_empty() {
        return Ok(0);
    }
    // ABI words are 64 digits; anything above u128 is out of range for us
    let significant = digits.trim_start_matches('0');
    if significant.len() > 32 {
        return Err(LedgerError::Parse(format!("quantity out of range: {}", text)));
    }
    if significant.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(significant, 16)
        .map_err(|_| LedgerError::Parse(format!("invalid quantity: {}", text)))
}

impl RpcLedger {
    pub fn new(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let key = signing_key(&config.private_key)?;
        let from = address_of(&key);
        Ok(Self {
            client: RwLock::new(Client::new()),
            rpc_url: config.rpc_url.clone(),
            key,
            from,
            token: parse_address(&config.token_contract)?,
            chain_id: config.chain_id,
            request_id: AtomicU64::new(1),
            in_flight: Mutex::new(None),
            receipt_poll: RECEIPT_POLL_INTERVAL,
            receipt_timeout: RECEIPT_TIMEOUT,
        })
    }

    pub fn address(&self) -> String {
        format_address(&self.from)
    }

    fn client(&self) -> Client {
        match self.client.read() {
            Ok(client) => client.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn in_flight(&self) -> Option<InFlight> {
        match self.in_flight.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_in_flight(&self, value: Option<InFlight>) {
        match self.in_flight.lock() {
            Ok(mut guard) => *guard = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, LedgerError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .client()
            .post(self.rpc_url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::Network(format!("{}: {}", method, e)))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(LedgerError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: RpcResponse = serde_json::from_str(&text)
            .map_err(|e| LedgerError::Parse(format!("{}: {} ({})", method, e, text)))?;
        if let Some(error) = parsed.error {
            return Err(LedgerError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        serde_json::from_value(parsed.result)
            .map_err(|e| LedgerError::Parse(format!("{}: {}", method, e)))
    }

    async fn gas_price(&self) -> Result<u128, LedgerError> {
        let raw: String = self.call("eth_gasPrice", json!([])).await?;
        Ok(with_buffer(parse_quantity(&raw)?))
    }

    /// Nonce after the last mined transaction. A still-pending send is
    /// replaced rather than queued behind.
    async fn latest_nonce(&self) -> Result<u64, LedgerError> {
        let raw: String = self
            .call("eth_getTransactionCount", json!([self.address(), "latest"]))
            .await?;
        u64::try_from(parse_quantity(&raw)?)
            .map_err(|_| LedgerError::Parse(format!("nonce out of range: {}", raw)))
    }

    async fn estimate_gas(&self, data: &[u8]) -> u64 {
        let params = json!([{
            "from": self.address(),
            "to": format_address(&self.token),
            "data": format!("0x{}", hex::encode(data)),
        }]);
        let estimate = match self.call::<String>("eth_estimateGas", params).await {
            Ok(raw) => parse_quantity(&raw),
            Err(e) => Err(e),
        };
        match estimate {
            Ok(gas) => u64::try_from(with_buffer(gas)).unwrap_or(FALLBACK_GAS_LIMIT),
            Err(e) => {
                tracing::warn!(error = %e, "Gas estimation failed, using fallback limit");
                FALLBACK_GAS_LIMIT
            }
        }
    }

    async fn receipt(&self, tx_hash: &str) -> Result<Option<TransferReceipt>, LedgerError> {
        let raw: Option<RawReceipt> = self
            .call("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        raw.map(|r| r.into_receipt(tx_hash)).transpose()
    }

    /// First confirmed receipt among transactions sharing one nonce.
    async fn confirmed(&self, tx_hashes: &[String]) -> Result<Option<TransferReceipt>, LedgerError> {
        for tx_hash in tx_hashes {
            if let Some(receipt) = self.receipt(tx_hash).await? {
                return Ok(Some(receipt));
            }
        }
        Ok(None)
    }

    /// Poll until one of `tx_hashes` is mined. Lookup failures are retried
    /// until the timeout; the transaction may still land.
    async fn wait_for_receipt(&self, tx_hashes: &[String]) -> Result<TransferReceipt, LedgerError> {
        let start = Instant::now();
        loop {
            match self.confirmed(tx_hashes).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {}
                Err(e @ LedgerError::Reverted(_)) => return Err(e),
                Err(e) => tracing::warn!(error = %e, "Receipt lookup failed, still waiting"),
            }

            if start.elapsed() >= self.receipt_timeout {
                let latest = tx_hashes.last().cloned().unwrap_or_default();
                return Err(LedgerError::Timeout(latest));
            }
            tokio::time::sleep(self.receipt_poll).await;
        }
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    async fn transfer(&self, to: &str, amount: u128) -> Result<TransferReceipt, LedgerError> {
        let recipient = parse_address(to)?;

        let mut pending = self.in_flight();
        if let Some(earlier) = pending.clone() {
            match self.confirmed(&earlier.tx_hashes).await {
                Ok(Some(receipt)) => {
                    tracing::info!(
                        tx_hash = %receipt.tx_hash,
                        "Earlier transfer confirmed, not sending another"
                    );
                    self.set_in_flight(None);
                    return Ok(receipt);
                }
                Ok(None) => {}
                Err(LedgerError::Reverted(tx_hash)) => {
                    tracing::warn!(tx_hash = %tx_hash, "Earlier transfer reverted");
                    self.set_in_flight(None);
                    pending = None;
                }
                Err(e) => return Err(e),
            }
        }

        let balance = self.token_balance().await?;
        if balance < amount {
            return Err(LedgerError::InsufficientFunds {
                balance,
                required: amount,
            });
        }

        let nonce = match &pending {
            Some(earlier) => earlier.nonce,
            None => self.latest_nonce().await?,
        };
        let gas_price = replacement_gas_price(
            self.gas_price().await?,
            pending.as_ref().map(|earlier| earlier.gas_price),
        );
        let data = erc20_transfer_calldata(&recipient, amount);
        let tx = LegacyTransaction {
            nonce,
            gas_price,
            gas_limit: self.estimate_gas(&data).await,
            to: self.token,
            value: 0,
            data,
            chain_id: self.chain_id,
        };
        tracing::debug!(
            to = %to,
            nonce = tx.nonce,
            gas_price = tx.gas_price,
            gas_limit = tx.gas_limit,
            replacing = pending.is_some(),
            "Sending token transfer"
        );

        let raw = tx.sign(&self.key)?;
        let tx_hash: String = self
            .call(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw))]),
            )
            .await?;

        let mut sent = pending.unwrap_or(InFlight {
            nonce,
            gas_price,
            tx_hashes: Vec::new(),
        });
        sent.gas_price = gas_price;
        sent.tx_hashes.push(tx_hash);
        self.set_in_flight(Some(sent.clone()));

        let outcome = self.wait_for_receipt(&sent.tx_hashes).await;
        if !matches!(outcome, Err(LedgerError::Timeout(_))) {
            self.set_in_flight(None);
        }
        outcome
    }

    async fn token_balance(&self) -> Result<u128, LedgerError> {
        let params = json!([
            {
                "to": format_address(&self.token),
                "data": format!("0x{}", hex::encode(erc20_balance_of_calldata(&self.from))),
            },
            "latest"
        ]);
        let raw: String = self.call("eth_call", params).await?;
        parse_quantity(&raw)
    }

    async fn reconnect(&self) {
        match self.client.write() {
            Ok(mut client) => *client = Client::new(),
            Err(poisoned) => *poisoned.into_inner() = Client::new(),
        }
        tracing::debug!("Ledger connection reset");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};

    use super::*;

    fn config() -> LedgerConfig {
        LedgerConfig {
            rpc_url: url::Url::parse("http://localhost:8545").unwrap(),
            private_key: "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318"
                .to_string(),
            token_contract: "0xaf88d065e77c8cC2239327C5EDb3A432268e5831".to_string(),
            chain_id: 42161,
        }
    }

    #[test]
    fn parses_quantities_and_abi_words() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x").unwrap(), 0);
        assert_eq!(parse_quantity("0x2710").unwrap(), 10_000);
        let word = format!("0x{:064x}", 1_500_000u64);
        assert_eq!(parse_quantity(&word).unwrap(), 1_500_000);
        assert!(parse_quantity(&format!("0x1{}", "0".repeat(40))).is_err());
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn gas_buffer_is_twenty_percent() {
        assert_eq!(with_buffer(100), 120);
        assert_eq!(with_buffer(10_000_000), 12_000_000);
    }

    #[test]
    fn builds_from_config() {
        let ledger = RpcLedger::new(&config()).unwrap();
        assert_eq!(ledger.address(), "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23");
        assert_eq!(ledger.chain_id, 42161);

        let mut bad = config();
        bad.token_contract = "usdc".to_string();
        assert!(matches!(RpcLedger::new(&bad), Err(LedgerError::InvalidAddress(_))));
    }

    #[test]
    fn replacement_outbids_pending_transfer() {
        assert_eq!(replacement_gas_price(120, None), 120);
        assert_eq!(replacement_gas_price(120, Some(120)), 133);
        assert_eq!(replacement_gas_price(500, Some(120)), 500);
    }

    #[test]
    fn null_receipt_means_not_mined() {
        let body = r#"{"jsonrpc":"2.0","id":3,"result":null}"#;
        let parsed: RpcResponse = serde_json::from_str(body).unwrap();
        let receipt: Option<RawReceipt> = serde_json::from_value(parsed.result).unwrap();
        assert!(receipt.is_none());

        let reverted = RawReceipt {
            status: Some("0x0".to_string()),
            block_number: Some("0x10".to_string()),
        };
        assert!(matches!(reverted.into_receipt("0xab"), Err(LedgerError::Reverted(_))));
    }

    /// In-memory JSON-RPC node: fixed balance, nonce 7, gas price 100.
    #[derive(Default)]
    struct StubChain {
        sent: Vec<String>,
        nonce_tags: Vec<String>,
        receipts: HashMap<String, Value>,
        failing_receipt_lookups: u32,
    }

    type SharedChain = Arc<Mutex<StubChain>>;

    fn tx_hash(n: usize) -> String {
        format!("0x{:064x}", n)
    }

    fn mined() -> Value {
        json!({"status": "0x1", "blockNumber": "0x10"})
    }

    async fn handle_rpc(
        State(chain): State<SharedChain>,
        Json(request): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        let mut chain = chain.lock().unwrap();
        let params = &request["params"];
        let result = match request["method"].as_str().unwrap_or_default() {
            "eth_call" => json!(format!("0x{:064x}", 1_000_000u64)),
            "eth_getTransactionCount" => {
                let tag = params[1].as_str().unwrap_or_default().to_string();
                chain.nonce_tags.push(tag);
                json!("0x7")
            }
            "eth_gasPrice" => json!("0x64"),
            "eth_estimateGas" => json!("0x5208"),
            "eth_sendRawTransaction" => {
                let raw = params[0].as_str().unwrap_or_default().to_string();
                chain.sent.push(raw);
                json!(tx_hash(chain.sent.len()))
            }
            "eth_getTransactionReceipt" => {
                if chain.failing_receipt_lookups > 0 {
                    chain.failing_receipt_lookups -= 1;
                    return (StatusCode::BAD_GATEWAY, Json(json!({})));
                }
                let hash = params[0].as_str().unwrap_or_default();
                chain.receipts.get(hash).cloned().unwrap_or(Value::Null)
            }
            _ => return (StatusCode::BAD_REQUEST, Json(json!({}))),
        };
        let body = json!({"jsonrpc": "2.0", "id": request["id"], "result": result});
        (StatusCode::OK, Json(body))
    }

    async fn spawn_stub(chain: SharedChain) -> url::Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/", post(handle_rpc)).with_state(chain);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        url::Url::parse(&format!("http://{}/", addr)).unwrap()
    }

    async fn stub_ledger(chain: SharedChain) -> RpcLedger {
        let mut config = config();
        config.rpc_url = spawn_stub(chain).await;
        let mut ledger = RpcLedger::new(&config).unwrap();
        ledger.receipt_poll = Duration::from_millis(10);
        ledger.receipt_timeout = Duration::from_millis(150);
        ledger
    }

    const RECIPIENT: &str = "0x1111111111111111111111111111111111111111";

    #[tokio::test]
    async fn receipt_lookup_errors_do_not_abandon_a_sent_transfer() {
        let chain = SharedChain::default();
        {
            let mut stub = chain.lock().unwrap();
            stub.failing_receipt_lookups = 2;
            stub.receipts.insert(tx_hash(1), mined());
        }
        let ledger = stub_ledger(chain.clone()).await;

        let receipt = ledger.transfer(RECIPIENT, 10_000).await.unwrap();
        assert_eq!(receipt.tx_hash, tx_hash(1));
        assert_eq!(receipt.block_number, Some(16));

        let stub = chain.lock().unwrap();
        assert_eq!(stub.sent.len(), 1);
        assert_eq!(stub.nonce_tags, vec!["latest".to_string()]);
        assert!(ledger.in_flight().is_none());
    }

    #[tokio::test]
    async fn unconfirmed_transfer_is_replaced_not_duplicated() {
        let chain = SharedChain::default();
        let ledger = stub_ledger(chain.clone()).await;

        let first = ledger.transfer(RECIPIENT, 10_000).await;
        assert!(matches!(first, Err(LedgerError::Timeout(_))));

        // Retry reuses the nonce with a higher bid
        let second = ledger.transfer(RECIPIENT, 10_000).await;
        assert!(matches!(second, Err(LedgerError::Timeout(_))));
        let pending = ledger.in_flight().unwrap();
        assert_eq!(pending.nonce, 7);
        assert_eq!(pending.gas_price, 133);
        assert_eq!(pending.tx_hashes, vec![tx_hash(1), tx_hash(2)]);
        assert_eq!(chain.lock().unwrap().nonce_tags.len(), 1);

        // The first send lands late: no third transaction goes out
        chain.lock().unwrap().receipts.insert(tx_hash(1), mined());
        let third = ledger.transfer(RECIPIENT, 10_000).await.unwrap();
        assert_eq!(third.tx_hash, tx_hash(1));
        assert_eq!(chain.lock().unwrap().sent.len(), 2);
        assert!(ledger.in_flight().is_none());
    }

    #[test]
    fn rpc_error_body_deserializes() {
        let body = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"nonce too low"}}"#;
        let parsed: RpcResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.result.is_null());
        assert_eq!(parsed.error.unwrap().message, "nonce too low");
    }
}
