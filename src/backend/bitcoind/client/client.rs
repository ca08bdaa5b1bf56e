use std::{fmt, time::Duration};

use bitcoin::{BlockHash, Txid};
use log::debug;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::error::RpcError;

use super::structs::{BlockResponse, RpcRequest, RpcResponse, TransactionResponse};

/// Verbosity at which `getblock` inlines decoded transactions.
const BLOCK_VERBOSITY: u8 = 2;
const TX_VERBOSITY: u8 = 2;

/// JSON-RPC 1.0 client for a bitcoind-compatible node.
#[derive(Clone)]
pub struct BitcoindClient {
    http: reqwest::Client,
    url: Url,
    username: String,
    password: String,
}

impl fmt::Debug for BitcoindClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitcoindClient")
            .field("url", &self.url.as_str())
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl BitcoindClient {
    pub fn new(url: Url, username: String, password: String, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            url,
            username,
            password,
        })
    }

    pub async fn get_best_block_hash(&self) -> Result<BlockHash, RpcError> {
        self.call("getbestblockhash", vec![]).await
    }

    pub async fn get_block(&self, blkhash: &BlockHash) -> Result<BlockResponse, RpcError> {
        self.call(
            "getblock",
            vec![Value::from(blkhash.to_string()), Value::from(BLOCK_VERBOSITY)],
        )
        .await
    }

    pub async fn get_block_hash(&self, height: u64) -> Result<BlockHash, RpcError> {
        self.call("getblockhash", vec![Value::from(height)]).await
    }

    pub async fn get_raw_transaction(&self, txid: &Txid) -> Result<TransactionResponse, RpcError> {
        self.call(
            "getrawtransaction",
            vec![Value::from(txid.to_string()), Value::from(TX_VERBOSITY)],
        )
        .await
    }

    pub async fn get_block_count(&self) -> Result<u64, RpcError> {
        self.call("getblockcount", vec![]).await
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T, RpcError> {
        let request = RpcRequest::new(method, params);
        debug!("rpc {} params {:?}", request.method, request.params);

        let response = self
            .http
            .post(self.url.clone())
            .basic_auth(&self.username, Some(&self.password))
            .json(&request)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let body = response.bytes().await.map_err(classify)?;
        debug!("rpc {} status {} ({} bytes)", method, status, body.len());

        interpret(method, status, &body)
    }
}

/// Anything that went wrong on the wire is retryable: the node may be
/// restarting and drop connections it already accepted.
fn classify(err: reqwest::Error) -> RpcError {
    if err.is_connect() || err.is_timeout() || err.is_request() || err.is_body() {
        RpcError::Transient(err.to_string())
    } else {
        RpcError::Protocol(err.to_string())
    }
}

/// bitcoind answers RPC-level failures with a 500 and a JSON error body, so
/// the body is inspected before the status.
fn interpret<T: DeserializeOwned>(method: &str, status: StatusCode, body: &[u8]) -> Result<T, RpcError> {
    let parsed = serde_json::from_slice::<RpcResponse<T>>(body);

    if let Ok(RpcResponse { error: Some(err), .. }) = parsed {
        return Err(RpcError::Node {
            code: err.code,
            message: err.message,
        });
    }

    if status == StatusCode::SERVICE_UNAVAILABLE {
        return Err(RpcError::Transient(format!("{method}: node unavailable ({status})")));
    }
    if !status.is_success() {
        return Err(RpcError::Protocol(format!("{method}: http status {status}")));
    }

    match parsed {
        Ok(RpcResponse { result: Some(result), .. }) => Ok(result),
        Ok(_) => Err(RpcError::Protocol(format!("{method}: response carries no result"))),
        Err(e) => Err(RpcError::Protocol(format!("{method}: malformed response: {e}"))),
    }
}
