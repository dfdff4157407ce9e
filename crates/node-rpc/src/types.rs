//! Typed request/response shapes for the node RPC families.
//! Every amount field is decoded through [`decimal_from_json`] instead of
//! `f64`, since the node serializes amounts as JSON numbers and floating
//! point would silently lose precision on the 8th decimal digit.

use std::str::FromStr;

use bigdecimal::BigDecimal;
use serde::{de::Error as _, Deserialize, Deserializer};
use serde_json::Value;

pub(crate) fn decimal_from_json<'de, D>(deserializer: D) -> Result<BigDecimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    amount_from_value(&value).map_err(D::Error::custom)
}

pub(crate) fn opt_decimal_from_json<'de, D>(
    deserializer: D,
) -> Result<Option<BigDecimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<Value> = Option::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => amount_from_value(&v).map(Some).map_err(D::Error::custom),
    }
}

fn amount_from_value(value: &Value) -> Result<BigDecimal, String> {
    match value {
        Value::Number(n) => BigDecimal::from_str(&n.to_string())
            .map_err(|e| format!("invalid numeric amount {n}: {e}")),
        Value::String(s) => {
            BigDecimal::from_str(s).map_err(|e| format!("invalid string amount {s}: {e}"))
        }
        other => Err(format!("expected a numeric amount, got {other}")),
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct WalletTxDetail {
    pub address: Option<String>,
    pub category: String,
    #[serde(deserialize_with = "decimal_from_json")]
    pub amount: BigDecimal,
    pub vout: Option<i64>,
    #[serde(default)]
    pub abandoned: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AssetTxDetail {
    pub destination: Option<String>,
    pub category: String,
    #[serde(rename = "assetName")]
    pub asset_name: Option<String>,
    #[serde(deserialize_with = "decimal_from_json")]
    pub amount: BigDecimal,
    #[serde(rename = "assetType")]
    pub asset_type: Option<String>,
    pub message: Option<String>,
    pub vout: Option<i64>,
    #[serde(default)]
    pub abandoned: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GetTransactionResult {
    #[serde(default)]
    pub confirmations: i64,
    pub time: Option<i64>,
    #[serde(default)]
    pub trusted: bool,
    #[serde(rename = "bip125-replaceable", default)]
    pub bip125_replaceable: Option<String>,
    #[serde(default, deserialize_with = "opt_decimal_from_json")]
    pub fee: Option<BigDecimal>,
    #[serde(default)]
    pub details: Vec<WalletTxDetail>,
    #[serde(default, rename = "asset_details")]
    pub asset_details: Vec<AssetTxDetail>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RawTransactionResult {
    pub txid: String,
    pub hex: String,
    #[serde(default)]
    pub confirmations: i64,
    pub time: Option<i64>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BlockResult {
    pub hash: String,
    pub height: i64,
    pub time: i64,
    #[serde(default)]
    pub tx: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AssetBalance {
    #[serde(rename = "assetName")]
    pub asset_name: String,
    #[serde(deserialize_with = "decimal_from_json")]
    pub balance: BigDecimal,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AddressUtxo {
    pub txid: String,
    pub vout: i64,
    pub address: String,
    #[serde(rename = "assetName")]
    pub asset_name: Option<String>,
    #[serde(deserialize_with = "decimal_from_json")]
    pub satoshis: BigDecimal,
    pub height: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AssetData {
    pub name: String,
    #[serde(deserialize_with = "decimal_from_json")]
    pub amount: BigDecimal,
    pub units: i32,
    pub reissuable: bool,
    #[serde(rename = "hasIPFS", default)]
    pub has_ipfs: bool,
    #[serde(rename = "ipfs_hash", default)]
    pub ipfs_hash: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SignRawTransactionResult {
    pub hex: String,
    pub complete: bool,
    #[serde(default)]
    pub errors: Vec<Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FundRawTransactionResult {
    pub hex: String,
    #[serde(deserialize_with = "decimal_from_json")]
    pub fee: BigDecimal,
    pub changepos: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ValidateAddressResult {
    pub isvalid: bool,
    pub address: Option<String>,
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct RawTxInput {
    pub txid: String,
    pub vout: i64,
}
