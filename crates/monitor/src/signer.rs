//! External co-signer adapters.
//!
//! The co-signer may hold a request until a human approves it, so the HTTP
//! client carries no request timeout of its own. Deadlines are layered on
//! with [`TimedSigner`].

use std::time::Duration;

use async_trait::async_trait;
use forwarder_domain::config::SignerSettings;
use forwarder_domain::model::{FullySignedTx, PartiallySignedTx};
use forwarder_domain::{ExternalSigner, SignerError, SignerOutcome};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct SignRequest {
    transaction: Value,
    local_key_index: usize,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum SignStatus {
    Signed,
    Cancelled,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    status: SignStatus,
    #[serde(default)]
    transaction: Option<SignedBody>,
}

#[derive(Debug, Deserialize)]
struct SignedBody {
    #[serde(rename = "txID")]
    tx_id: String,
    #[serde(default)]
    signature: Vec<String>,
}

/// Delegates the second signature to a remote co-signer service.
#[derive(Clone)]
pub struct HttpExternalSigner {
    http: Client,
    url: String,
}

impl HttpExternalSigner {
    pub fn new(url: &str) -> Result<Self, SignerError> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|err| SignerError::Transport(err.to_string()))?;
        Ok(Self {
            http,
            url: format!("{}/sign", url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl ExternalSigner for HttpExternalSigner {
    async fn sign(&self, tx: PartiallySignedTx) -> Result<SignerOutcome, SignerError> {
        let mut transaction = tx.tx.payload.clone();
        if let Some(object) = transaction.as_object_mut() {
            object.insert("txID".to_string(), Value::from(tx.tx.id.clone()));
            object.insert("signature".to_string(), Value::from(tx.signatures.clone()));
        }
        let response = self
            .http
            .post(&self.url)
            .json(&SignRequest {
                transaction,
                local_key_index: tx.local_key_index,
            })
            .send()
            .await
            .map_err(|err| SignerError::Transport(err.to_string()))?;
        if !response.status().is_success() {
            return Err(SignerError::Transport(format!(
                "co-signer returned http {}",
                response.status()
            )));
        }
        let body: SignResponse = response
            .json()
            .await
            .map_err(|err| SignerError::Malformed(err.to_string()))?;
        convert_response(tx, body)
    }
}

fn convert_response(
    partial: PartiallySignedTx,
    response: SignResponse,
) -> Result<SignerOutcome, SignerError> {
    if response.status == SignStatus::Cancelled {
        return Ok(SignerOutcome::Cancelled);
    }
    let body = response
        .transaction
        .ok_or_else(|| SignerError::Malformed("signed response without transaction".to_string()))?;
    if body.tx_id != partial.tx.id {
        return Err(SignerError::Malformed(format!(
            "co-signer returned txID {} for {}",
            body.tx_id, partial.tx.id
        )));
    }
    if body.signature.iter().any(|sig| hex::decode(sig).is_err()) {
        return Err(SignerError::Malformed("signature is not hex".to_string()));
    }
    Ok(SignerOutcome::Signed(FullySignedTx {
        tx: partial.tx,
        signatures: body.signature,
    }))
}

/// Bounds a signer with an optional deadline. An elapsed deadline is reported
/// as a cancellation.
pub struct TimedSigner<S> {
    inner: S,
    timeout: Option<Duration>,
}

impl<S> TimedSigner<S> {
    pub fn new(inner: S, timeout: Option<Duration>) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl TimedSigner<HttpExternalSigner> {
    pub fn from_settings(settings: &SignerSettings) -> Result<Self, SignerError> {
        Ok(Self::new(HttpExternalSigner::new(&settings.url)?, settings.timeout))
    }
}

#[async_trait]
impl<S> ExternalSigner for TimedSigner<S>
where
    S: ExternalSigner,
{
    async fn sign(&self, tx: PartiallySignedTx) -> Result<SignerOutcome, SignerError> {
        let Some(limit) = self.timeout else {
            return self.inner.sign(tx).await;
        };
        match tokio::time::timeout(limit, self.inner.sign(tx)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(?limit, "external signer timed out");
                Ok(SignerOutcome::Cancelled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forwarder_domain::model::UnsignedTx;
    use serde_json::json;

    fn partial() -> PartiallySignedTx {
        PartiallySignedTx {
            tx: UnsignedTx {
                id: "ab".repeat(32),
                payload: json!({ "raw_data": {} }),
            },
            signatures: vec!["11".repeat(65)],
            local_key_index: 0,
        }
    }

    fn response(value: Value) -> SignResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn cancelled_status_maps_to_cancelled() {
        let outcome = convert_response(partial(), response(json!({ "status": "cancelled" })));
        assert_eq!(outcome, Ok(SignerOutcome::Cancelled));
    }

    #[test]
    fn signed_response_carries_all_signatures() {
        let body = json!({
            "status": "signed",
            "transaction": { "txID": "ab".repeat(32), "signature": ["11".repeat(65), "22".repeat(65)] }
        });
        let Ok(SignerOutcome::Signed(tx)) = convert_response(partial(), response(body)) else {
            panic!("expected signed outcome");
        };
        assert_eq!(tx.signatures.len(), 2);
        assert_eq!(tx.tx.id, "ab".repeat(32));
    }

    #[test]
    fn mismatched_tx_id_is_malformed() {
        let body = json!({
            "status": "signed",
            "transaction": { "txID": "cd".repeat(32), "signature": [] }
        });
        assert!(matches!(
            convert_response(partial(), response(body)),
            Err(SignerError::Malformed(_))
        ));
    }

    #[test]
    fn signed_without_transaction_is_malformed() {
        assert!(matches!(
            convert_response(partial(), response(json!({ "status": "signed" }))),
            Err(SignerError::Malformed(_))
        ));
    }

    struct SlowSigner;

    #[async_trait]
    impl ExternalSigner for SlowSigner {
        async fn sign(&self, _tx: PartiallySignedTx) -> Result<SignerOutcome, SignerError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(SignerOutcome::Cancelled)
        }
    }

    #[tokio::test]
    async fn deadline_reports_cancellation() {
        let signer = TimedSigner::new(SlowSigner, Some(Duration::from_millis(10)));
        let outcome = signer.sign(partial()).await;
        assert_eq!(outcome, Ok(SignerOutcome::Cancelled));
    }
}
