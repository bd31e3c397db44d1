//! Wallet/signer boundary.
//!
//! Signing is interactive: it may wait indefinitely for the user and may be
//! declined. Key management lives entirely behind this trait.

use async_trait::async_trait;
use thiserror::Error;

use crate::transaction::{SignedTransaction, UnsignedTransaction};

#[derive(Debug, Error)]
pub enum SignerError {
    /// The user declined (or abandoned) the signature request.
    #[error("user rejected the signature request: {0}")]
    Rejected(String),

    /// The signer itself failed.
    #[error("{0}")]
    Failed(String),
}

#[async_trait]
pub trait Signer: Send + Sync {
    /// Sign every transaction in order; all or nothing.
    async fn sign(
        &self,
        transactions: Vec<UnsignedTransaction>,
    ) -> Result<Vec<SignedTransaction>, SignerError>;
}
