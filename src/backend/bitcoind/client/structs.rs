use bitcoin::{amount::Denomination, Amount, BlockHash, Txid};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{BlockData, InputData, OutputData, TransactionData};

const CLIENT_ID: &str = "balance-monitor";

#[derive(Debug, Serialize)]
pub struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: &'static str,
    pub method: &'a str,
    pub params: Vec<Value>,
}

impl<'a> RpcRequest<'a> {
    pub fn new(method: &'a str, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "1.0",
            id: CLIENT_ID,
            method,
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RpcResponse<T> {
    pub result: Option<T>,
    pub error: Option<RpcErrorResponse>,
}

#[derive(Debug, Deserialize)]
pub struct RpcErrorResponse {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct BlockResponse {
    pub hash: BlockHash,
    pub height: u64,
    pub confirmations: i64,
    pub nextblockhash: Option<BlockHash>,
    pub tx: Vec<TransactionResponse>,
}

impl From<BlockResponse> for BlockData {
    fn from(value: BlockResponse) -> Self {
        Self {
            blkhash: value.hash,
            height: value.height,
            confirmations: value.confirmations,
            next_blkhash: value.nextblockhash,
            txs: value.tx.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TransactionResponse {
    pub txid: Txid,
    pub vin: Vec<VinResponse>,
    pub vout: Vec<VoutResponse>,
}

impl From<TransactionResponse> for TransactionData {
    fn from(value: TransactionResponse) -> Self {
        Self {
            txid: value.txid,
            inputs: value.vin.into_iter().map(Into::into).collect(),
            outputs: value.vout.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct VinResponse {
    pub txid: Option<Txid>,
    pub vout: Option<u32>,
}

impl From<VinResponse> for InputData {
    fn from(value: VinResponse) -> Self {
        Self {
            txid: value.txid,
            vout: value.vout,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct VoutResponse {
    #[serde(deserialize_with = "deserialize_btc")]
    pub value: Amount,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: ScriptPubKeyResponse,
}

impl From<VoutResponse> for OutputData {
    fn from(value: VoutResponse) -> Self {
        let ScriptPubKeyResponse { address, addresses } = value.script_pub_key;
        Self {
            value: value.value,
            // pre-22.0 nodes only report the `addresses` array
            address: address.or_else(|| addresses.into_iter().next()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ScriptPubKeyResponse {
    pub address: Option<String>,
    #[serde(default)]
    pub addresses: Vec<String>,
}

/// Parses a coin amount from the exact decimal text on the wire.
///
/// Relies on serde_json's `arbitrary_precision` so that numbers reach us as
/// written by the node and never pass through an `f64`.
fn deserialize_btc<'de, D>(deserializer: D) -> Result<Amount, D::Error>
where
    D: Deserializer<'de>,
{
    let text = match Value::deserialize(deserializer)? {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s,
        other => {
            return Err(de::Error::custom(format!(
                "expected a decimal amount, got {other}"
            )))
        }
    };

    Amount::from_str_in(&text, Denomination::Bitcoin).map_err(de::Error::custom)
}
