use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::credential::SIGNATURE_LEN;

/// Transfer built by the ledger node, not yet signed.
///
/// `payload` keeps the node's own JSON so it can be echoed back on
/// broadcast without re-encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsignedTx {
    pub id: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartiallySignedTx {
    pub tx: UnsignedTx,
    pub signatures: Vec<String>,
    /// Index of the local key inside the account permission.
    pub local_key_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullySignedTx {
    pub tx: UnsignedTx,
    pub signatures: Vec<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureFormatError {
    #[error("signature is not hex: {0}")]
    NotHex(String),
}

impl FullySignedTx {
    /// Number of signatures carried, measured as total payload bytes divided
    /// by the fixed single-signature length.
    pub fn signature_count(&self) -> Result<usize, SignatureFormatError> {
        let mut total = 0usize;
        for signature in &self.signatures {
            let bytes = hex::decode(signature)
                .map_err(|err| SignatureFormatError::NotHex(err.to_string()))?;
            total += bytes.len();
        }
        Ok(total / SIGNATURE_LEN)
    }
}

/// Ledger verdict on a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastReceipt {
    pub accepted: bool,
    pub tx_id: String,
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed(signatures: Vec<String>) -> FullySignedTx {
        FullySignedTx {
            tx: UnsignedTx {
                id: "ab".repeat(32),
                payload: serde_json::Value::Null,
            },
            signatures,
        }
    }

    #[test]
    fn counts_two_full_signatures() {
        let tx = signed(vec!["11".repeat(SIGNATURE_LEN), "22".repeat(SIGNATURE_LEN)]);
        assert_eq!(tx.signature_count(), Ok(2));
    }

    #[test]
    fn truncated_signature_does_not_count() {
        let tx = signed(vec!["11".repeat(SIGNATURE_LEN), "22".repeat(10)]);
        assert_eq!(tx.signature_count(), Ok(1));
    }

    #[test]
    fn non_hex_signature_is_rejected() {
        let tx = signed(vec!["zz".repeat(SIGNATURE_LEN)]);
        assert!(tx.signature_count().is_err());
    }
}
