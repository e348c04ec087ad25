// Wire types for the ledger node's HTTP wallet API. Requests always set
// `visible: true` so addresses travel in base58 form.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct AccountRequest<'a> {
    pub address: &'a str,
    pub visible: bool,
}

/// `/wallet/getaccount` response. An unactivated account comes back as `{}`.
#[derive(Debug, Deserialize, Default)]
pub struct AccountResponse {
    #[serde(default)]
    pub address: Option<String>,
    /// Balance in SUN; omitted by the node when zero.
    #[serde(default)]
    pub balance: Option<u64>,
    #[serde(default)]
    pub owner_permission: Option<PermissionResponse>,
}

#[derive(Debug, Deserialize)]
pub struct PermissionResponse {
    #[serde(default)]
    pub permission_name: Option<String>,
    #[serde(default = "default_threshold")]
    pub threshold: u32,
    #[serde(default)]
    pub keys: Vec<PermissionKeyResponse>,
}

#[derive(Debug, Deserialize)]
pub struct PermissionKeyResponse {
    pub address: String,
    #[serde(default)]
    pub weight: u64,
}

fn default_threshold() -> u32 {
    1
}

#[derive(Debug, Serialize)]
pub struct CreateTransactionRequest<'a> {
    pub owner_address: &'a str,
    pub to_address: &'a str,
    pub amount: u64,
    pub visible: bool,
}

/// `/wallet/broadcasttransaction` response. Rejections carry a `code` and a
/// hex-encoded `message`.
#[derive(Debug, Deserialize, Default)]
pub struct BroadcastResponse {
    #[serde(default)]
    pub result: bool,
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
