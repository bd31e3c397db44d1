//! Terminal signer: shows the payload and reads signatures from stdin.
//!
//! Keys never touch this process. The user signs the printed payload with
//! their wallet and pastes the hex signature back; an empty line declines.

use std::io::{BufRead, Write};

use async_trait::async_trait;
use ballot_core::signer::{Signer, SignerError};
use ballot_core::transaction::{SignedTransaction, UnsignedTransaction};

#[derive(Debug, Default)]
pub struct PromptSigner;

impl PromptSigner {
    fn prompt(transactions: Vec<UnsignedTransaction>) -> Result<Vec<SignedTransaction>, SignerError> {
        let stdin = std::io::stdin();
        let mut stderr = std::io::stderr().lock();
        let total = transactions.len();
        let mut signed = Vec::with_capacity(total);

        for (index, tx) in transactions.into_iter().enumerate() {
            let payload = serde_json::to_string_pretty(&tx)
                .map_err(|err| SignerError::Failed(format!("cannot render payload: {err}")))?;
            let call = tx.call_data().unwrap_or_default();
            writeln!(stderr, "Transaction {}/{total}: {call}", index + 1)
                .and_then(|()| writeln!(stderr, "{payload}"))
                .and_then(|()| write!(stderr, "Signature (hex, empty to reject): "))
                .and_then(|()| stderr.flush())
                .map_err(|err| SignerError::Failed(err.to_string()))?;

            let mut line = String::new();
            let read = stdin
                .lock()
                .read_line(&mut line)
                .map_err(|err| SignerError::Failed(format!("cannot read signature: {err}")))?;
            let signature = line.trim();
            if read == 0 || signature.is_empty() {
                return Err(SignerError::Rejected("no signature entered".to_string()));
            }
            if signature.len() % 2 != 0 || !signature.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(SignerError::Failed(format!(
                    "signature must be hex, got {signature:?}"
                )));
            }
            signed.push(tx.with_signature(signature.to_ascii_lowercase()));
        }
        Ok(signed)
    }
}

#[async_trait]
impl Signer for PromptSigner {
    async fn sign(
        &self,
        transactions: Vec<UnsignedTransaction>,
    ) -> Result<Vec<SignedTransaction>, SignerError> {
        tokio::task::spawn_blocking(move || Self::prompt(transactions))
            .await
            .map_err(|err| SignerError::Failed(format!("signing prompt aborted: {err}")))?
    }
}
