//! # bitcoind JSON-RPC Adapter
//!
//! `ChainBackend` over bitcoind's HTTP JSON-RPC interface, with basic auth
//! and optional TLS.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bitcoin::consensus::Decodable;
use bitcoin::{Block, BlockHash, Network, Transaction, Txid};
use reqwest::{Certificate, Client};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::trace;

use crate::config::BackendConfig;
use crate::domain::{BlockStamp, ChainConnError, Result};
use crate::ports::ChainBackend;

/// JSON-RPC request envelope (bitcoind speaks version 1.0).
#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

/// JSON-RPC response envelope.
#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Subset of `getblockchaininfo`.
#[derive(Debug, Deserialize)]
struct BlockchainInfo {
    chain: String,
    blocks: u32,
    #[serde(rename = "bestblockhash")]
    best_block_hash: BlockHash,
}

/// bitcoind RPC client.
pub struct BitcoindRpcClient {
    client: Client,
    url: String,
    user: String,
    pass: String,
    request_id: AtomicU64,
}

impl BitcoindRpcClient {
    /// Build an HTTP client for the endpoint in `config`.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let mut builder = Client::builder().timeout(config.rpc_timeout());

        if !config.disable_tls {
            if let Some(pem) = &config.certificates {
                let cert = Certificate::from_pem(pem)
                    .map_err(|e| ChainConnError::InvalidConfig(format!("bad certificate: {}", e)))?;
                builder = builder.add_root_certificate(cert);
            }
        }

        let client = builder
            .build()
            .map_err(|e| ChainConnError::InvalidConfig(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            url: config.rpc_url(),
            user: config.user.clone(),
            pass: config.pass.clone(),
            request_id: AtomicU64::new(1),
        })
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Call a JSON-RPC method.
    async fn call<R: DeserializeOwned>(&self, method: &'static str, params: Value) -> Result<R> {
        let request = JsonRpcRequest {
            jsonrpc: "1.0",
            id: self.next_id(),
            method,
            params,
        };
        trace!("[conn] RPC {} id={}", method, request.id);

        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.pass))
            .json(&request)
            .send()
            .await
            .map_err(|e| ChainConnError::rpc(method, e))?;

        // bitcoind reports RPC errors with a 500 and a JSON body, but auth
        // failures come back as a bare 401.
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ChainConnError::rpc(method, format!("HTTP {}", status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ChainConnError::rpc(method, e))?;
        parse_response(method, &body)
    }

    async fn call_hex<T: Decodable>(&self, method: &'static str, params: Value) -> Result<T> {
        let hex: String = self.call(method, params).await?;
        decode_hex(method, &hex)
    }
}

fn parse_response<R: DeserializeOwned>(method: &'static str, body: &str) -> Result<R> {
    let response: JsonRpcResponse<R> = serde_json::from_str(body)
        .map_err(|e| ChainConnError::rpc(method, format!("bad response: {}", e)))?;

    if let Some(error) = response.error {
        return Err(ChainConnError::rpc(
            method,
            format!("{} (code {})", error.message, error.code),
        ));
    }

    response
        .result
        .ok_or_else(|| ChainConnError::rpc(method, "missing result"))
}

fn decode_hex<T: Decodable>(method: &'static str, hex: &str) -> Result<T> {
    let bytes = hex::decode(hex).map_err(|e| ChainConnError::rpc(method, e))?;
    bitcoin::consensus::deserialize(&bytes).map_err(|e| ChainConnError::rpc(method, e))
}

/// Map bitcoind's `chain` field to a network.
fn network_from_chain(chain: &str) -> Result<Network> {
    match chain {
        "main" => Ok(Network::Bitcoin),
        "test" => Ok(Network::Testnet),
        "signet" => Ok(Network::Signet),
        "regtest" => Ok(Network::Regtest),
        other => Err(ChainConnError::rpc(
            "getblockchaininfo",
            format!("unknown chain {:?}", other),
        )),
    }
}

#[async_trait]
impl ChainBackend for BitcoindRpcClient {
    async fn get_network(&self) -> Result<Network> {
        let info: BlockchainInfo = self.call("getblockchaininfo", json!([])).await?;
        network_from_chain(&info.chain)
    }

    async fn get_best_block(&self) -> Result<BlockStamp> {
        let info: BlockchainInfo = self.call("getblockchaininfo", json!([])).await?;
        Ok(BlockStamp::new(info.blocks, info.best_block_hash))
    }

    async fn get_block_by_height(&self, height: u32) -> Result<Block> {
        let hash: BlockHash = self.call("getblockhash", json!([height])).await?;
        self.call_hex("getblock", json!([hash, 0])).await
    }

    async fn get_raw_mempool(&self) -> Result<Vec<Txid>> {
        self.call("getrawmempool", json!([])).await
    }

    async fn get_raw_transaction(&self, txid: &Txid) -> Result<Transaction> {
        self.call_hex("getrawtransaction", json!([txid, false])).await
    }

    fn backend_id(&self) -> &str {
        &self.url
    }
}
