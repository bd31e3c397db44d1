//! Shared fakes for ballot-core integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ballot_core::config::Config;
use ballot_core::contract::View;
use ballot_core::error::{Error, Result};
use ballot_core::gateway::{ChainTxStatus, Gateway, VmQuery, VmQueryResult};
use ballot_core::registry::SessionRegistry;
use ballot_core::session::{MemorySessionStore, SessionStore};
use ballot_core::signer::{Signer, SignerError};
use ballot_core::transaction::{SignedTransaction, TxHash, UnsignedTransaction};
use ballot_core::BallotContext;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

/// In-memory chain: hands out hashes on broadcast and reports whatever
/// outcome the test settles them to. Views answer from a per-call table;
/// anything unscripted returns no data.
#[derive(Default)]
pub struct FakeChain {
    nonce: AtomicU64,
    next_hash: AtomicU64,
    refuse_broadcast: AtomicBool,
    outcomes: Mutex<HashMap<TxHash, ChainTxStatus>>,
    sent: Mutex<Vec<SignedTransaction>>,
    views: Mutex<HashMap<(String, Vec<String>), VmQueryResult>>,
}

impl FakeChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refuse_broadcast(&self, refuse: bool) {
        self.refuse_broadcast.store(refuse, Ordering::SeqCst);
    }

    /// Settle every broadcast transaction to `status`.
    pub fn settle_all(&self, status: ChainTxStatus) {
        let mut outcomes = self.outcomes.lock().unwrap();
        for outcome in outcomes.values_mut() {
            *outcome = status;
        }
    }

    pub fn settle(&self, hash: &TxHash, status: ChainTxStatus) {
        self.outcomes.lock().unwrap().insert(hash.clone(), status);
    }

    pub fn sent(&self) -> Vec<SignedTransaction> {
        self.sent.lock().unwrap().clone()
    }

    /// Answer `view` with these raw entries.
    pub fn answer(&self, view: View, entries: &[Vec<u8>]) {
        let result = VmQueryResult {
            return_data: entries.iter().map(|entry| BASE64.encode(entry)).collect(),
            return_code: "ok".to_string(),
            return_message: String::new(),
        };
        self.views.lock().unwrap().insert(view_key(view), result);
    }

    /// Make `view` fail with a contract return code.
    pub fn refuse(&self, view: View, code: &str, message: &str) {
        let result = VmQueryResult {
            return_data: Vec::new(),
            return_code: code.to_string(),
            return_message: message.to_string(),
        };
        self.views.lock().unwrap().insert(view_key(view), result);
    }
}

fn view_key(view: View) -> (String, Vec<String>) {
    let call = view.call();
    let args = call.hex_args();
    (call.function, args)
}

#[async_trait]
impl Gateway for FakeChain {
    async fn account_nonce(&self, _address: &str) -> Result<u64> {
        Ok(self.nonce.load(Ordering::SeqCst))
    }

    async fn send_transactions(&self, transactions: &[SignedTransaction]) -> Result<Vec<TxHash>> {
        if self.refuse_broadcast.load(Ordering::SeqCst) {
            return Err(Error::BroadcastFailed("insufficient funds".to_string()));
        }
        let mut outcomes = self.outcomes.lock().unwrap();
        let hashes: Vec<TxHash> = transactions
            .iter()
            .map(|_| {
                let n = self.next_hash.fetch_add(1, Ordering::SeqCst);
                let hash = TxHash(format!("{n:064x}"));
                outcomes.insert(hash.clone(), ChainTxStatus::Pending);
                hash
            })
            .collect();
        self.nonce.fetch_add(transactions.len() as u64, Ordering::SeqCst);
        self.sent.lock().unwrap().extend_from_slice(transactions);
        Ok(hashes)
    }

    async fn transaction_status(&self, hash: &TxHash) -> Result<ChainTxStatus> {
        Ok(self
            .outcomes
            .lock()
            .unwrap()
            .get(hash)
            .copied()
            .unwrap_or(ChainTxStatus::Pending))
    }

    async fn query(&self, query: &VmQuery) -> Result<VmQueryResult> {
        let key = (query.func_name.clone(), query.args.clone());
        Ok(self
            .views
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletMode {
    Approve,
    Reject,
    Fail,
}

/// Wallet whose answer the test controls.
pub struct FakeWallet {
    mode: Mutex<WalletMode>,
}

impl FakeWallet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(WalletMode::Approve),
        })
    }

    pub fn set_mode(&self, mode: WalletMode) {
        *self.mode.lock().unwrap() = mode;
    }
}

#[async_trait]
impl Signer for FakeWallet {
    async fn sign(
        &self,
        transactions: Vec<UnsignedTransaction>,
    ) -> std::result::Result<Vec<SignedTransaction>, SignerError> {
        let mode = *self.mode.lock().unwrap();
        match mode {
            WalletMode::Approve => Ok(transactions
                .into_iter()
                .map(|tx| tx.with_signature("ab".repeat(64)))
                .collect()),
            WalletMode::Reject => Err(SignerError::Rejected("closed the wallet popup".to_string())),
            WalletMode::Fail => Err(SignerError::Failed("device disconnected".to_string())),
        }
    }
}

pub struct Harness {
    pub chain: Arc<FakeChain>,
    pub wallet: Arc<FakeWallet>,
    pub store: Arc<dyn SessionStore>,
    pub registry: Arc<SessionRegistry>,
    pub context: BallotContext,
}

impl Harness {
    /// In-memory store and registry.
    pub fn new() -> Self {
        Self::with(
            Arc::new(MemorySessionStore::new()),
            Arc::new(SessionRegistry::new()),
            FakeChain::new(),
        )
    }

    pub fn with(
        store: Arc<dyn SessionStore>,
        registry: Arc<SessionRegistry>,
        chain: Arc<FakeChain>,
    ) -> Self {
        let wallet = FakeWallet::new();
        let context = BallotContext::new(
            Config::default(),
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&chain) as Arc<dyn Gateway>,
            Arc::clone(&wallet) as Arc<dyn Signer>,
        );
        Self {
            chain,
            wallet,
            store,
            registry,
            context,
        }
    }
}

pub const SENDER: &str = "erd1qyu5wthldzr8wx5c9ucg8kjagg0jfs53s8nr3zpz3hypefsdd8ssycr6th";
