use std::time::Duration;

use async_trait::async_trait;
use forwarder_domain::config::ForwardingConfig;
use forwarder_domain::model::{
    AccountPermissions, BroadcastReceipt, FullySignedTx, PartiallySignedTx, PermissionKey,
    UnsignedTx,
};
use forwarder_domain::{LedgerAddress, LedgerClient, LedgerError, LedgerResult, SigningCredential};
use reqwest::{header, Client};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::debug;

mod types;

pub use types::{
    AccountRequest, AccountResponse, BroadcastResponse, CreateTransactionRequest,
    PermissionKeyResponse, PermissionResponse,
};

const RPC_TIMEOUT: Duration = Duration::from_secs(15);
const API_KEY_HEADER: &str = "tron-pro-api-key";

/// `LedgerClient` backed by the node's HTTP wallet API.
#[derive(Clone)]
pub struct TronHttpLedger {
    http: Client,
    endpoint: String,
}

impl TronHttpLedger {
    pub fn new(endpoint: &str, api_key: Option<&str>) -> Result<Self, LedgerError> {
        let mut headers = header::HeaderMap::new();
        if let Some(key) = api_key {
            let value = header::HeaderValue::from_str(key)
                .map_err(|err| LedgerError::Transport(format!("invalid api key header: {err}")))?;
            headers.insert(API_KEY_HEADER, value);
        }
        let http = Client::builder()
            .timeout(RPC_TIMEOUT)
            .default_headers(headers)
            .build()
            .map_err(LedgerError::transport)?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &ForwardingConfig) -> Result<Self, LedgerError> {
        Self::new(config.ledger_endpoint(), config.ledger_api_key())
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> LedgerResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.endpoint, path);
        debug!(%url, "ledger request");
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(LedgerError::transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(LedgerError::Transport(format!("{path} returned http {status}")));
        }
        response
            .json::<T>()
            .await
            .map_err(|err| LedgerError::Decode(format!("{path}: {err}")))
    }

    async fn account(&self, address: &LedgerAddress) -> LedgerResult<AccountResponse> {
        self.post(
            "/wallet/getaccount",
            &AccountRequest {
                address: address.as_str(),
                visible: true,
            },
        )
        .await
    }
}

#[async_trait]
impl LedgerClient for TronHttpLedger {
    async fn get_balance(&self, address: &LedgerAddress) -> LedgerResult<u64> {
        Ok(self.account(address).await?.balance.unwrap_or(0))
    }

    async fn get_account_permissions(
        &self,
        address: &LedgerAddress,
    ) -> LedgerResult<AccountPermissions> {
        convert_permissions(self.account(address).await?, address)
    }

    async fn build_transfer(
        &self,
        to: &LedgerAddress,
        amount: u64,
        from: &LedgerAddress,
    ) -> LedgerResult<UnsignedTx> {
        let raw: Value = self
            .post(
                "/wallet/createtransaction",
                &CreateTransactionRequest {
                    owner_address: from.as_str(),
                    to_address: to.as_str(),
                    amount,
                    visible: true,
                },
            )
            .await?;
        convert_transaction(raw)
    }

    async fn apply_local_signature(
        &self,
        tx: UnsignedTx,
        credential: &SigningCredential,
        key_index: usize,
    ) -> LedgerResult<PartiallySignedTx> {
        let signature = credential
            .sign_tx_id(&tx.id)
            .map_err(|err| LedgerError::Signing(err.to_string()))?;
        Ok(PartiallySignedTx {
            tx,
            signatures: vec![signature],
            local_key_index: key_index,
        })
    }

    async fn broadcast(&self, tx: &FullySignedTx) -> LedgerResult<BroadcastReceipt> {
        let body = signed_transaction_body(tx)?;
        let response: BroadcastResponse =
            self.post("/wallet/broadcasttransaction", &body).await?;
        Ok(convert_broadcast(response, &tx.tx.id))
    }
}

fn parse_key_address(raw: &str) -> LedgerResult<LedgerAddress> {
    LedgerAddress::parse(raw)
        .or_else(|_| LedgerAddress::from_hex(raw))
        .map_err(|err| LedgerError::Decode(format!("permission key `{raw}`: {err}")))
}

/// Accounts without an explicit owner permission are controlled by their own
/// key alone.
fn convert_permissions(
    account: AccountResponse,
    address: &LedgerAddress,
) -> LedgerResult<AccountPermissions> {
    let Some(permission) = account.owner_permission else {
        return Ok(AccountPermissions {
            threshold: 1,
            keys: vec![PermissionKey {
                address: address.clone(),
                weight: 1,
            }],
        });
    };

    let keys = permission
        .keys
        .iter()
        .map(|key| {
            Ok(PermissionKey {
                address: parse_key_address(&key.address)?,
                weight: key.weight,
            })
        })
        .collect::<LedgerResult<Vec<_>>>()?;

    Ok(AccountPermissions {
        threshold: permission.threshold,
        keys,
    })
}

fn convert_transaction(raw: Value) -> LedgerResult<UnsignedTx> {
    if let Some(error) = raw.get("Error").and_then(Value::as_str) {
        return Err(LedgerError::Rejected(error.to_string()));
    }
    let id = raw
        .get("txID")
        .and_then(Value::as_str)
        .ok_or_else(|| LedgerError::Decode("transaction response missing txID".to_string()))?;
    if id.len() != 64 || hex::decode(id).is_err() {
        return Err(LedgerError::Decode(format!("malformed txID `{id}`")));
    }
    Ok(UnsignedTx {
        id: id.to_string(),
        payload: raw,
    })
}

fn signed_transaction_body(tx: &FullySignedTx) -> LedgerResult<Value> {
    let mut body = tx.tx.payload.clone();
    let object = body
        .as_object_mut()
        .ok_or_else(|| LedgerError::Decode("transaction payload is not an object".to_string()))?;
    object.insert("txID".to_string(), Value::from(tx.tx.id.clone()));
    object.insert("signature".to_string(), Value::from(tx.signatures.clone()));
    object.insert("visible".to_string(), Value::Bool(true));
    Ok(body)
}

fn convert_broadcast(response: BroadcastResponse, tx_id: &str) -> BroadcastReceipt {
    let message = response.message.map(|raw| decode_message(&raw));
    let message = match (response.code, message) {
        (Some(code), Some(message)) => Some(format!("{code}: {message}")),
        (Some(code), None) => Some(code),
        (None, message) => message,
    };
    BroadcastReceipt {
        accepted: response.result,
        tx_id: response.txid.unwrap_or_else(|| tx_id.to_string()),
        message,
    }
}

/// Rejection messages arrive hex-encoded; fall back to the raw text.
fn decode_message(raw: &str) -> String {
    hex::decode(raw)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| raw.to_string())
}
