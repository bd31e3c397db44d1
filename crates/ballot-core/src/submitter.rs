//! Build, sign and broadcast one contract call.
//!
//! Every submission first clears the queued sessions in the registry, then
//! walks `pending -> signed -> broadcast`, recording each step under a fresh
//! [`SessionId`]. Failures stop the walk in a terminal state and surface as a
//! typed [`Error`]; nothing is retried.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{Instrument, Span, debug, info, warn};

use crate::codec::ContractCall;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::gateway::Gateway;
use crate::registry::SessionRegistry;
use crate::session::SessionId;
use crate::signer::{Signer, SignerError};
use crate::tracker::TransactionStatus;
use crate::transaction::{DisplayInfo, SignedTransaction, UnsignedTransaction};

/// One contract call to submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub call: ContractCall,
    /// Sender account (bech32).
    pub sender: String,
    /// Transferred amount in the smallest denomination.
    #[serde(default)]
    pub value: u128,
    pub gas_limit: u64,
    pub chain_id: String,
    pub display: DisplayInfo,
}

impl SubmitRequest {
    pub fn validate(&self) -> Result<()> {
        self.call.validate()?;
        if self.sender.trim().is_empty() {
            return Err(Error::InvalidArguments("sender address is empty".to_string()));
        }
        if self.gas_limit == 0 {
            return Err(Error::InvalidArguments("gas limit must be positive".to_string()));
        }
        if self.chain_id.trim().is_empty() {
            return Err(Error::InvalidArguments("chain id is empty".to_string()));
        }
        Ok(())
    }
}

/// Values shared by every transaction a submitter builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitterSettings {
    /// Contract address every call goes to.
    pub receiver: String,
    pub gas_price: u64,
    pub version: u32,
    /// Give up on the signer after this long.
    pub sign_timeout: Option<Duration>,
}

impl SubmitterSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            receiver: config.network.contract_address(),
            gas_price: config.transactions.gas_price,
            version: config.transactions.version,
            sign_timeout: config.transactions.sign_timeout(),
        }
    }
}

pub struct TransactionSubmitter {
    gateway: Arc<dyn Gateway>,
    signer: Arc<dyn Signer>,
    registry: Arc<SessionRegistry>,
    settings: SubmitterSettings,
}

impl TransactionSubmitter {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        signer: Arc<dyn Signer>,
        registry: Arc<SessionRegistry>,
        settings: SubmitterSettings,
    ) -> Self {
        Self {
            gateway,
            signer,
            registry,
            settings,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn settings(&self) -> &SubmitterSettings {
        &self.settings
    }

    /// Submit `request` and return the id of its session once broadcast.
    pub async fn submit(&self, request: SubmitRequest) -> Result<SessionId> {
        let span = crate::session_span!(
            "submit",
            function = %request.call.function,
            session_id = tracing::field::Empty
        );
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: SubmitRequest) -> Result<SessionId> {
        let dropped = self.registry.clear_all();
        if dropped > 0 {
            debug!(dropped, "cleared queued sessions");
        }

        request.validate()?;
        let nonce = self.gateway.account_nonce(&request.sender).await?;
        let transaction = self.build(&request, nonce);

        let id = SessionId::generate();
        Span::current().record("session_id", tracing::field::display(&id));
        let function = request.call.function.as_str();
        self.registry.begin(&id, function, request.display.clone());
        debug!(nonce, status = %TransactionStatus::Pending, "awaiting signature");

        let signed = match self.sign(vec![transaction]).await {
            Ok(signed) => signed,
            Err(SignerError::Rejected(reason)) => {
                info!(status = %TransactionStatus::Cancelled, %reason, "signing rejected");
                self.finish(&id, &request, TransactionStatus::Cancelled, &reason);
                return Err(Error::UserRejectedSigning(reason));
            }
            Err(SignerError::Failed(reason)) => {
                warn!(status = %TransactionStatus::Failed, %reason, "signer failed");
                self.finish(&id, &request, TransactionStatus::Failed, &reason);
                return Err(Error::Signer(reason));
            }
        };
        self.registry.advance(&id, TransactionStatus::Signed, None);

        let hashes = match self.gateway.send_transactions(&signed).await {
            Ok(hashes) => hashes,
            Err(err) => {
                let reason = match err {
                    Error::BroadcastFailed(reason) => reason,
                    other => other.to_string(),
                };
                warn!(status = %TransactionStatus::Failed, %reason, "broadcast failed");
                self.finish(&id, &request, TransactionStatus::Failed, &reason);
                return Err(Error::BroadcastFailed(reason));
            }
        };
        for hash in &hashes {
            info!(tx_hash = %hash, status = %TransactionStatus::Broadcast, "transaction broadcast");
        }
        self.registry
            .record_broadcast(&id, function, &request.display, hashes);
        Ok(id)
    }

    fn finish(
        &self,
        id: &SessionId,
        request: &SubmitRequest,
        status: TransactionStatus,
        reason: &str,
    ) {
        self.registry.finish(
            id,
            &request.call.function,
            &request.display,
            status,
            reason.to_string(),
        );
    }

    fn build(&self, request: &SubmitRequest, nonce: u64) -> UnsignedTransaction {
        UnsignedTransaction {
            nonce,
            value: request.value.to_string(),
            receiver: self.settings.receiver.clone(),
            sender: request.sender.clone(),
            gas_price: self.settings.gas_price,
            gas_limit: request.gas_limit,
            data: UnsignedTransaction::encode_data(&request.call.data()),
            chain_id: request.chain_id.clone(),
            version: self.settings.version,
        }
    }

    async fn sign(
        &self,
        transactions: Vec<UnsignedTransaction>,
    ) -> std::result::Result<Vec<SignedTransaction>, SignerError> {
        let expected = transactions.len();
        let signing = self.signer.sign(transactions);
        let signed = match self.settings.sign_timeout {
            Some(limit) => tokio::time::timeout(limit, signing).await.unwrap_or_else(|_| {
                Err(SignerError::Rejected(format!(
                    "no signature within {}s",
                    limit.as_secs()
                )))
            })?,
            None => signing.await?,
        };
        if signed.len() != expected {
            return Err(SignerError::Failed(format!(
                "signer returned {} transactions, expected {expected}",
                signed.len()
            )));
        }
        Ok(signed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::TypedValue;
    use crate::gateway::{ChainTxStatus, VmQuery, VmQueryResult};
    use crate::transaction::TxHash;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingGateway {
        sent: Mutex<Vec<SignedTransaction>>,
        refuse: bool,
    }

    #[async_trait]
    impl Gateway for RecordingGateway {
        async fn account_nonce(&self, _address: &str) -> Result<u64> {
            Ok(7)
        }

        async fn send_transactions(
            &self,
            transactions: &[SignedTransaction],
        ) -> Result<Vec<TxHash>> {
            if self.refuse {
                return Err(Error::BroadcastFailed("lowerNonceInTx".into()));
            }
            self.sent.lock().unwrap().extend_from_slice(transactions);
            Ok(vec![TxHash("abc".into())])
        }

        async fn transaction_status(&self, _hash: &TxHash) -> Result<ChainTxStatus> {
            Ok(ChainTxStatus::Pending)
        }

        async fn query(&self, _query: &VmQuery) -> Result<VmQueryResult> {
            Ok(VmQueryResult::default())
        }
    }

    /// Signs instantly, or never answers.
    struct TestSigner {
        hang: bool,
    }

    #[async_trait]
    impl Signer for TestSigner {
        async fn sign(
            &self,
            transactions: Vec<UnsignedTransaction>,
        ) -> std::result::Result<Vec<SignedTransaction>, SignerError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(transactions
                .into_iter()
                .map(|tx| tx.with_signature("5ig"))
                .collect())
        }
    }

    fn settings() -> SubmitterSettings {
        SubmitterSettings {
            receiver: "erd1contract".into(),
            gas_price: 1_000_000_000,
            version: 1,
            sign_timeout: None,
        }
    }

    fn request() -> SubmitRequest {
        SubmitRequest {
            call: ContractCall::new("endElection", vec![TypedValue::U64(3)]),
            sender: "erd1sender".into(),
            value: 0,
            gas_limit: 60_000_000,
            chain_id: "D".into(),
            display: DisplayInfo::for_action("End Election"),
        }
    }

    /// Declines after another submission cleared the registry mid-signature.
    struct ClearingSigner {
        registry: Arc<SessionRegistry>,
    }

    #[async_trait]
    impl Signer for ClearingSigner {
        async fn sign(
            &self,
            _transactions: Vec<UnsignedTransaction>,
        ) -> std::result::Result<Vec<SignedTransaction>, SignerError> {
            self.registry.clear_all();
            Err(SignerError::Rejected("closed the popup".into()))
        }
    }

    fn submitter(gateway: Arc<RecordingGateway>, hang: bool) -> TransactionSubmitter {
        TransactionSubmitter::new(
            gateway,
            Arc::new(TestSigner { hang }),
            Arc::new(SessionRegistry::new()),
            settings(),
        )
    }

    #[tokio::test]
    async fn builds_transaction_from_request_and_settings() {
        let gateway = Arc::new(RecordingGateway::default());
        let submitter = submitter(gateway.clone(), false);
        let mut req = request();
        req.value = 1_500;

        let id = submitter.submit(req).await.unwrap();

        let sent = gateway.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        let tx = &sent[0].transaction;
        assert_eq!(tx.nonce, 7);
        assert_eq!(tx.value, "1500");
        assert_eq!(tx.receiver, "erd1contract");
        assert_eq!(tx.call_data().as_deref(), Some("endElection@03"));
        assert_eq!(sent[0].signature, "5ig");

        let entry = submitter.registry().get(&id).unwrap();
        assert_eq!(entry.status, TransactionStatus::Broadcast);
        assert_eq!(entry.hashes, vec![TxHash("abc".into())]);
    }

    #[tokio::test]
    async fn invalid_requests_never_reach_the_network() {
        let gateway = Arc::new(RecordingGateway::default());
        let submitter = submitter(gateway.clone(), false);

        for broken in [
            SubmitRequest {
                call: ContractCall::new("", vec![]),
                ..request()
            },
            SubmitRequest {
                sender: " ".into(),
                ..request()
            },
            SubmitRequest {
                gas_limit: 0,
                ..request()
            },
            SubmitRequest {
                chain_id: String::new(),
                ..request()
            },
        ] {
            let err = submitter.submit(broken).await.unwrap_err();
            assert!(matches!(err, Error::InvalidArguments(_)), "{err}");
        }
        assert!(gateway.sent.lock().unwrap().is_empty());
        assert!(submitter.registry().is_empty());
    }

    #[tokio::test]
    async fn refused_broadcast_fails_the_session() {
        let gateway = Arc::new(RecordingGateway {
            refuse: true,
            ..Default::default()
        });
        let submitter = submitter(gateway, false);

        let err = submitter.submit(request()).await.unwrap_err();
        assert!(matches!(err, Error::BroadcastFailed(ref reason) if reason == "lowerNonceInTx"));

        let notices = submitter.registry().active_notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].status, TransactionStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn sign_timeout_counts_as_rejection() {
        let gateway = Arc::new(RecordingGateway::default());
        let submitter = TransactionSubmitter::new(
            gateway,
            Arc::new(TestSigner { hang: true }),
            Arc::new(SessionRegistry::new()),
            SubmitterSettings {
                sign_timeout: Some(Duration::from_secs(30)),
                ..settings()
            },
        );

        let err = submitter.submit(request()).await.unwrap_err();
        assert!(matches!(err, Error::UserRejectedSigning(ref reason) if reason.contains("30s")));
        let notices = submitter.registry().active_notices();
        assert_eq!(notices[0].status, TransactionStatus::Cancelled);
    }

    #[tokio::test]
    async fn rejection_after_concurrent_clear_still_cancels() {
        let registry = Arc::new(SessionRegistry::new());
        let submitter = TransactionSubmitter::new(
            Arc::new(RecordingGateway::default()),
            Arc::new(ClearingSigner {
                registry: Arc::clone(&registry),
            }),
            Arc::clone(&registry),
            settings(),
        );

        let err = submitter.submit(request()).await.unwrap_err();
        assert!(matches!(err, Error::UserRejectedSigning(_)), "{err}");

        let notices = registry.active_notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].status, TransactionStatus::Cancelled);
        assert_eq!(notices[0].function, "endElection");
        assert_eq!(notices[0].reason.as_deref(), Some("closed the popup"));
    }
}
