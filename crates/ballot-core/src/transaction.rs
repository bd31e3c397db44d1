//! Transaction wire types shared by the submitter, signer and gateway.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

/// Human-readable strings shown while a submission is processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayInfo {
    pub processing_message: String,
    pub error_message: String,
    pub success_message: String,
}

impl DisplayInfo {
    /// Standard strings for an action label such as "Register Election".
    #[must_use]
    pub fn for_action(label: &str) -> Self {
        Self {
            processing_message: format!("Processing {label} transaction"),
            error_message: format!("An error has occurred during {label}"),
            success_message: format!("{label} transaction successful"),
        }
    }
}

/// Transaction ready to be signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedTransaction {
    pub nonce: u64,
    /// Transferred amount in the smallest denomination, as a decimal string.
    pub value: String,
    pub receiver: String,
    pub sender: String,
    pub gas_price: u64,
    pub gas_limit: u64,
    /// Base64 of the call data.
    pub data: String,
    #[serde(rename = "chainID")]
    pub chain_id: String,
    pub version: u32,
}

impl UnsignedTransaction {
    /// Encode raw call data into the `data` field.
    #[must_use]
    pub fn encode_data(call_data: &str) -> String {
        BASE64.encode(call_data.as_bytes())
    }

    /// Decoded call data, if the field is valid base64 UTF-8.
    #[must_use]
    pub fn call_data(&self) -> Option<String> {
        BASE64
            .decode(&self.data)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    }

    /// Attach a signature produced by a signer.
    #[must_use]
    pub fn with_signature(self, signature: impl Into<String>) -> SignedTransaction {
        SignedTransaction {
            transaction: self,
            signature: signature.into(),
        }
    }
}

/// Transaction plus its hex signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    #[serde(flatten)]
    pub transaction: UnsignedTransaction,
    pub signature: String,
}

/// Hash of a broadcast transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(pub String);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
