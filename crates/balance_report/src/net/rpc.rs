use alloy_primitives::{Address, U64, U256};
use block_locator::{Record, RecordSource};
use reqwest::{Client, StatusCode, Url, header};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use tracing::trace;

use crate::report::BalanceSource;

/// Errors that can occur when talking to an Ethereum JSON-RPC endpoint.
#[derive(Debug)]
pub enum RpcError {
    NonHttpUrl,
    Client(String),
    Json(serde_json::Error),
    Status(StatusCode),
    Rpc { code: i64, message: String },
    MissingResult { method: String },
    UnknownBlock(BlockTag),
    TimestampOverflow { number: u64 },
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::NonHttpUrl => write!(f, "only http:// and https:// URLs are supported"),
            RpcError::Client(e) => write!(f, "client error: {e}"),
            RpcError::Json(e) => write!(f, "JSON error: {e}"),
            RpcError::Status(status) => write!(f, "unexpected HTTP status: {status}"),
            RpcError::Rpc { code, message } => {
                write!(f, "RPC error {code}: {message}")
            }
            RpcError::MissingResult { method } => {
                write!(f, "missing result field in {method} response")
            }
            RpcError::UnknownBlock(tag) => write!(f, "node does not know block {tag}"),
            RpcError::TimestampOverflow { number } => {
                write!(f, "timestamp of block {number} does not fit in i64")
            }
        }
    }
}

impl std::error::Error for RpcError {}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        RpcError::Json(e)
    }
}

/// Block selector accepted by `eth_getBlockByNumber` and `eth_getBalance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Number(u64),
}

impl fmt::Display for BlockTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockTag::Latest => f.write_str("latest"),
            BlockTag::Number(n) => write!(f, "{n:#x}"),
        }
    }
}

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    #[serde(borrow)]
    params: &'a [Value],
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Value,
    error: Option<JsonRpcError>,
}

/// The two block fields the locator needs; everything else is ignored.
#[derive(Deserialize)]
struct BlockSummary {
    number: U64,
    timestamp: U64,
}

/// Minimal JSON-RPC client for an Ethereum execution node over HTTP(S).
///
/// Only the handful of read-only methods the report needs are implemented.
/// There is no retry logic; a failed call fails the operation that issued it.
pub struct RpcClient {
    client: Client,
    url: Url,
}

impl RpcClient {
    /// Creates a new client for the given JSON-RPC endpoint, such as
    /// `http://127.0.0.1:8545` or a hosted `https://` provider URL.
    pub fn new(url: &str) -> Result<Self, RpcError> {
        let url = Url::parse(url).map_err(|e| RpcError::Client(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => {}
            _ => {
                return Err(RpcError::NonHttpUrl);
            }
        }

        let client = Client::new();

        Ok(RpcClient { client, url })
    }

    /// Sends one request and returns the raw `result` (JSON `null` if absent).
    async fn request(&self, method: &str, params: &[Value]) -> Result<Value, RpcError> {
        let request_body = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };
        trace!(method, "JSON-RPC request");

        let res = self
            .client
            .post(self.url.clone())
            .header(header::CONTENT_TYPE, "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| RpcError::Client(e.to_string()))?;

        if !res.status().is_success() {
            return Err(RpcError::Status(res.status()));
        }

        let bytes = res
            .bytes()
            .await
            .map_err(|e| RpcError::Client(e.to_string()))?;
        let rpc_response: JsonRpcResponse = serde_json::from_slice(&bytes)?;

        if let Some(err) = rpc_response.error {
            return Err(RpcError::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        Ok(rpc_response.result)
    }

    async fn call<T>(&self, method: &str, params: &[Value]) -> Result<T, RpcError>
    where
        T: DeserializeOwned,
    {
        let result = self.request(method, params).await?;
        if result.is_null() {
            return Err(RpcError::MissingResult {
                method: method.to_string(),
            });
        }
        Ok(serde_json::from_value(result)?)
    }

    /// Returns the number of the most recent block (`eth_blockNumber`).
    pub async fn get_block_number(&self) -> Result<u64, RpcError> {
        let number: U64 = self.call("eth_blockNumber", &[]).await?;
        Ok(number.to::<u64>())
    }

    /// Returns the number and timestamp of a block (`eth_getBlockByNumber`
    /// without transaction bodies).
    pub async fn get_block(&self, tag: BlockTag) -> Result<Record, RpcError> {
        let result = self
            .request("eth_getBlockByNumber", &[json!(tag.to_string()), json!(false)])
            .await?;
        if result.is_null() {
            return Err(RpcError::UnknownBlock(tag));
        }
        let summary: BlockSummary = serde_json::from_value(result)?;
        let number = summary.number.to::<u64>();
        let timestamp = i64::try_from(summary.timestamp.to::<u64>())
            .map_err(|_| RpcError::TimestampOverflow { number })?;
        Ok(Record::new(number, timestamp))
    }

    /// Returns the wei balance of `address` as of `tag` (`eth_getBalance`).
    pub async fn get_balance(&self, address: Address, tag: BlockTag) -> Result<U256, RpcError> {
        self.call("eth_getBalance", &[json!(address), json!(tag.to_string())])
            .await
    }
}

impl RecordSource for RpcClient {
    type Error = RpcError;

    async fn fetch_by_number(&self, number: u64) -> Result<Record, RpcError> {
        self.get_block(BlockTag::Number(number)).await
    }

    async fn fetch_head(&self) -> Result<Record, RpcError> {
        self.get_block(BlockTag::Latest).await
    }
}

impl BalanceSource for RpcClient {
    type Error = RpcError;

    async fn balance_at(&self, address: Address, block: u64) -> Result<U256, RpcError> {
        self.get_balance(address, BlockTag::Number(block)).await
    }
}
