//! Typed JSON-RPC client for the blockchain node, grounded on the
//! source's `rpc.py` (a single `send_command(method, params)` helper shared
//! by every call site). Here each method family gets its own typed wrapper
//! instead of callers building parameter lists by hand.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use bigdecimal::BigDecimal;
use domain::error::DomainError;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use url::Url;

use crate::{error_codes, types::*};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, serde::Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, serde::Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

/// Shared, thread-safe client over the node's JSON-RPC endpoint.
///
/// Safe to clone and hand to every concurrent caller (monitor, order
/// manager, payout engine): `reqwest::Client` pools connections internally
/// and request IDs are a monotonic atomic counter.
#[derive(Clone)]
pub struct NodeRpcClient {
    http: reqwest::Client,
    url: Url,
    user: String,
    password: String,
    next_id: std::sync::Arc<AtomicU64>,
}

impl NodeRpcClient {
    pub fn new(url: Url, user: String, password: String) -> Result<Self, DomainError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| DomainError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self {
            http,
            url,
            user,
            password,
            next_id: std::sync::Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn from_node_conf(conf: &settings::NodeConf) -> Result<Self, DomainError> {
        let url = format!("http://{}:{}/", conf.rpc_bind, conf.rpc_port)
            .parse()
            .map_err(|e| DomainError::Config(format!("invalid rpc url: {e}")))?;
        Self::new(url, conf.rpc_user.clone(), conf.rpc_password.clone())
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Value,
    ) -> Result<T, DomainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(self.url.clone())
            .basic_auth(&self.user, Some(&self.password))
            .json(&payload)
            .send()
            .await
            .map_err(|e| DomainError::NodeConnection(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(DomainError::NodeAuth);
        }

        let body: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| DomainError::NodeConnection(format!("invalid JSON-RPC response: {e}")))?;

        if let Some(err) = body.error {
            return Err(DomainError::NodeError {
                code: err.code,
                method,
                message: err.message,
            });
        }

        body.result
            .ok_or_else(|| DomainError::NodeError {
                code: error_codes::GENERAL,
                method,
                message: "missing result in RPC response".to_string(),
            })
    }

    fn params(values: impl Serialize) -> Value {
        serde_json::to_value(values).expect("rpc params are always serializable")
    }

    // -- Blockchain --

    pub async fn getblockcount(&self) -> Result<i64, DomainError> {
        self.call("getblockcount", json!([])).await
    }

    pub async fn getblockhash(&self, height: i64) -> Result<String, DomainError> {
        self.call("getblockhash", Self::params((height,))).await
    }

    pub async fn getblock(&self, hash: &str) -> Result<BlockResult, DomainError> {
        self.call("getblock", Self::params((hash,))).await
    }

    pub async fn getbestblockhash(&self) -> Result<String, DomainError> {
        self.call("getbestblockhash", json!([])).await
    }

    // -- Wallet --

    pub async fn getnewaddress(&self) -> Result<String, DomainError> {
        self.call("getnewaddress", json!([])).await
    }

    pub async fn getbalance(&self) -> Result<BigDecimal, DomainError> {
        self.call("getbalance", json!([])).await
    }

    /// Fails with a `NodeError` whose message contains "not a wallet
    /// transaction" when `txid` isn't wallet-relevant; callers should treat
    /// that specific case as "drop it".
    pub async fn gettransaction(&self, txid: &str) -> Result<GetTransactionResult, DomainError> {
        self.call("gettransaction", Self::params((txid,))).await
    }

    pub async fn sendtoaddress(&self, address: &str, amount: &BigDecimal) -> Result<String, DomainError> {
        self.call("sendtoaddress", Self::params((address, amount.to_string())))
            .await
    }

    pub async fn signmessage(&self, address: &str, message: &str) -> Result<String, DomainError> {
        self.call("signmessage", Self::params((address, message))).await
    }

    pub async fn verifymessage(
        &self,
        address: &str,
        signature: &str,
        message: &str,
    ) -> Result<bool, DomainError> {
        self.call("verifymessage", Self::params((address, signature, message)))
            .await
    }

    // -- Raw transactions --

    pub async fn getrawtransaction(&self, txid: &str) -> Result<RawTransactionResult, DomainError> {
        self.call("getrawtransaction", Self::params((txid, true))).await
    }

    pub async fn createrawtransaction(
        &self,
        inputs: &[RawTxInput],
        outputs: &Value,
    ) -> Result<String, DomainError> {
        self.call("createrawtransaction", Self::params((inputs, outputs)))
            .await
    }

    pub async fn signrawtransaction(
        &self,
        hex: &str,
    ) -> Result<SignRawTransactionResult, DomainError> {
        self.call("signrawtransaction", Self::params((hex,))).await
    }

    pub async fn sendrawtransaction(&self, hex: &str) -> Result<String, DomainError> {
        self.call("sendrawtransaction", Self::params((hex,))).await
    }

    pub async fn fundrawtransaction(
        &self,
        hex: &str,
        options: &Value,
    ) -> Result<FundRawTransactionResult, DomainError> {
        self.call("fundrawtransaction", Self::params((hex, options)))
            .await
    }

    // -- Address index --

    pub async fn getaddressbalance(&self, addresses: &[String]) -> Result<Vec<AssetBalance>, DomainError> {
        self.call(
            "getaddressbalance",
            Self::params(([json!({ "addresses": addresses })], true)),
        )
        .await
    }

    pub async fn getaddressmempool(&self, addresses: &[String]) -> Result<Vec<Value>, DomainError> {
        self.call("getaddressmempool", Self::params(([json!({ "addresses": addresses })],)))
            .await
    }

    pub async fn getaddressutxos(
        &self,
        addresses: &[String],
        asset_name: Option<&str>,
    ) -> Result<Vec<AddressUtxo>, DomainError> {
        let mut query = json!({ "addresses": addresses });
        if let Some(asset) = asset_name {
            query["assetName"] = json!(asset);
        }
        self.call("getaddressutxos", Self::params(([query],))).await
    }

    pub async fn validateaddress(&self, address: &str) -> Result<ValidateAddressResult, DomainError> {
        self.call("validateaddress", Self::params((address,))).await
    }

    // -- Assets --

    pub async fn transfer(
        &self,
        asset_name: &str,
        amount: &BigDecimal,
        to_address: &str,
    ) -> Result<Vec<String>, DomainError> {
        self.call(
            "transfer",
            Self::params((asset_name, amount.to_string(), to_address)),
        )
        .await
    }

    pub async fn transferfromaddress(
        &self,
        asset_name: &str,
        from_address: &str,
        amount: &BigDecimal,
        to_address: &str,
        change_address: Option<&str>,
    ) -> Result<Vec<String>, DomainError> {
        self.call(
            "transferfromaddress",
            Self::params((
                asset_name,
                from_address,
                amount.to_string(),
                to_address,
                "",
                0,
                change_address.unwrap_or(""),
                change_address.unwrap_or(from_address),
            )),
        )
        .await
    }

    pub async fn getassetdata(&self, name: &str) -> Result<AssetData, DomainError> {
        self.call("getassetdata", Self::params((name,))).await
    }

    pub async fn listassetbalancesbyaddress(
        &self,
        address: &str,
    ) -> Result<std::collections::HashMap<String, BigDecimal>, DomainError> {
        self.call("listassetbalancesbyaddress", Self::params((address,)))
            .await
    }

    // -- Util --

    pub async fn uptime(&self) -> Result<i64, DomainError> {
        self.call("uptime", json!([])).await
    }
}

/// True when a `gettransaction` error indicates "not a wallet transaction",
/// the signal the monitor uses to drop an irrelevant `hashtx` notification.
pub fn is_not_wallet_transaction(err: &DomainError) -> bool {
    matches!(
        err,
        DomainError::NodeError { message, .. }
            if message.to_lowercase().contains("not a wallet transaction")
                || message.to_lowercase().contains("invalid or non-wallet")
    )
}

/// True when `getrawtransaction`/`gettransaction` reports the hash isn't
/// known to the node at all (already evicted from mempool, never mined).
pub fn is_unknown_transaction(err: &DomainError) -> bool {
    matches!(
        err,
        DomainError::NodeError { message, .. }
            if message.to_lowercase().contains("no such mempool or blockchain transaction")
    )
}
