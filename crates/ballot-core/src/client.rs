//! Election client: one flow's view of the contract.
//!
//! A [`BallotContext`] holds what every flow shares (store, registry,
//! gateway, signer, status ledger). Each [`ElectionClient`] it hands out owns
//! exactly one [`SessionType`] and its own [`StatusTracker`], so two flows
//! never displace each other's tracked session. Two clients created for the
//! same type share a store slot, and the last submission wins.

use std::sync::Arc;

use tracing::{Instrument, debug, info};

use crate::codec::Address;
use crate::config::Config;
use crate::contract::{
    self, Candidate, CandidateId, Dispute, DisputeId, ElectionAction, ElectionData, ElectionId,
    View, Vote,
};
use crate::error::{Error, Result};
use crate::gateway::{Gateway, HttpGateway, VmQuery};
use crate::registry::SessionRegistry;
use crate::session::{FileSessionStore, SessionId, SessionStore, SessionType};
use crate::signer::Signer;
use crate::submitter::{SubmitRequest, SubmitterSettings, TransactionSubmitter};
use crate::tracker::{ChainStatusSource, StatusFeed, StatusLedger, StatusTracker, TransactionStatus};

/// Collaborators shared by every client of one process.
#[derive(Clone)]
pub struct BallotContext {
    config: Config,
    store: Arc<dyn SessionStore>,
    registry: Arc<SessionRegistry>,
    gateway: Arc<dyn Gateway>,
    submitter: Arc<TransactionSubmitter>,
    ledger: Arc<StatusLedger>,
}

impl BallotContext {
    pub fn new(
        config: Config,
        store: Arc<dyn SessionStore>,
        registry: Arc<SessionRegistry>,
        gateway: Arc<dyn Gateway>,
        signer: Arc<dyn Signer>,
    ) -> Self {
        registry.keep_stored(Arc::clone(&store));
        let submitter = Arc::new(TransactionSubmitter::new(
            Arc::clone(&gateway),
            signer,
            Arc::clone(&registry),
            SubmitterSettings::from_config(&config),
        ));
        Self {
            config,
            store,
            registry,
            gateway,
            submitter,
            ledger: Arc::new(StatusLedger::new()),
        }
    }

    /// File-backed store and registry plus the HTTP gateway, all from `config`.
    pub fn from_config(config: Config, signer: Arc<dyn Signer>) -> Result<Self> {
        let store = FileSessionStore::open(config.store_path())?;
        let registry = SessionRegistry::open(config.registry_path())?;
        let gateway = HttpGateway::new(
            config.network.gateway_url(),
            config.tracking.request_timeout(),
        )?;
        debug!(
            gateway = gateway.base_url(),
            contract = %config.network.contract_address(),
            "ballot context ready"
        );
        Ok(Self::new(
            config,
            Arc::new(store),
            Arc::new(registry),
            Arc::new(gateway),
            signer,
        ))
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Client for one flow. Nothing is tracked until [`ElectionClient::resume`]
    /// or a submission.
    #[must_use]
    pub fn client(&self, session_type: SessionType) -> ElectionClient {
        let source = Arc::new(ChainStatusSource::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.gateway),
        ));
        let tracker = StatusTracker::new(source, self.config.tracking.backoff())
            .with_ledger(Arc::clone(&self.ledger));
        ElectionClient {
            session_type,
            context: self.clone(),
            tracker,
        }
    }
}

pub struct ElectionClient {
    session_type: SessionType,
    context: BallotContext,
    tracker: StatusTracker,
}

impl ElectionClient {
    #[must_use]
    pub fn session_type(&self) -> SessionType {
        self.session_type
    }

    #[must_use]
    pub fn tracker(&self) -> &StatusTracker {
        &self.tracker
    }

    /// Last session recorded for this flow.
    #[must_use]
    pub fn last_session(&self) -> Option<SessionId> {
        self.context.store.get(self.session_type)
    }

    /// Start tracking the last recorded session, if any.
    pub fn resume(&self) -> Option<SessionId> {
        let last = self.last_session();
        if let Some(id) = &last {
            debug!(session_type = %self.session_type, session_id = %id, "resuming session");
        }
        self.tracker.track(last.clone());
        last
    }

    /// Submit `request`. On success the id is stored for this flow and
    /// tracked; on failure the store and tracker keep their previous state.
    pub async fn submit(&self, request: SubmitRequest) -> Result<SessionId> {
        let span = crate::session_span!("flow", session_type = %self.session_type);
        async {
            let id = self.context.submitter.submit(request).await?;
            self.context.store.set(self.session_type, id.clone());
            self.tracker.track(Some(id.clone()));
            info!(session_id = %id, "session recorded");
            Ok::<_, Error>(id)
        }
        .instrument(span)
        .await
    }

    /// Submit one of the contract's actions from `sender`.
    pub async fn submit_action(&self, sender: &str, action: &ElectionAction) -> Result<SessionId> {
        let config = &self.context.config;
        let request = SubmitRequest {
            call: action.call(),
            sender: sender.to_string(),
            value: action.value(),
            gas_limit: config.transactions.gas_limit,
            chain_id: config.network.chain_id(),
            display: action.display_info(),
        };
        self.submit(request).await
    }

    /// Submit a candidacy paying the fee currently set on the contract.
    pub async fn submit_candidacy(
        &self,
        sender: &str,
        election_id: ElectionId,
        name: &str,
        description: &str,
    ) -> Result<SessionId> {
        let fee = self.candidate_fee().await?;
        let action = ElectionAction::SubmitCandidacy {
            election_id,
            name: name.to_string(),
            description: description.to_string(),
            fee,
        };
        self.submit_action(sender, &action).await
    }

    /// Status of the tracked session.
    #[must_use]
    pub fn status(&self) -> TransactionStatus {
        self.tracker.current()
    }

    pub fn subscribe(&self) -> StatusFeed {
        self.tracker.subscribe()
    }

    /// Status of any session id.
    pub async fn status_of(&self, id: &SessionId) -> Result<TransactionStatus> {
        self.tracker.status_of(id).await
    }

    // -------------------------------------------------------------------------
    // Views
    // -------------------------------------------------------------------------

    async fn query(&self, view: View) -> Result<Vec<Vec<u8>>> {
        let call = view.call();
        let query = VmQuery {
            sc_address: self.context.config.network.contract_address(),
            func_name: call.function.clone(),
            args: call.hex_args(),
            caller: None,
        };
        debug!(function = %call.function, "running view");
        let result = self.context.gateway.query(&query).await?;
        contract::return_entries(&call.function, &result)
    }

    /// Fee in the smallest denomination.
    pub async fn candidate_fee(&self) -> Result<u128> {
        contract::decode_fee(&self.query(View::CandidateFee).await?)
    }

    pub async fn election_ids(&self) -> Result<Vec<ElectionId>> {
        contract::decode_u64_list(&self.query(View::ElectionIdList).await?)
    }

    /// Every election, as returned by the contract's list view.
    pub async fn elections(&self) -> Result<Vec<ElectionData>> {
        self.query(View::ElectionList)
            .await?
            .iter()
            .map(|entry| ElectionData::decode(entry))
            .collect()
    }

    pub async fn election(&self, id: ElectionId) -> Result<Option<ElectionData>> {
        let entries = self.query(View::ElectionData(id)).await?;
        contract::single_entry(&entries)
            .map(ElectionData::decode)
            .transpose()
    }

    pub async fn registered_voters(&self, election: ElectionId) -> Result<Vec<Address>> {
        contract::decode_address_list(&self.query(View::RegisteredVoters(election)).await?)
    }

    pub async fn is_registered_voter(&self, election: ElectionId, voter: &Address) -> Result<bool> {
        Ok(self.registered_voters(election).await?.contains(voter))
    }

    pub async fn candidate_ids(&self, election: ElectionId) -> Result<Vec<CandidateId>> {
        contract::decode_u16_list(&self.query(View::CandidateIds(election)).await?)
    }

    pub async fn potential_candidate_ids(&self, election: ElectionId) -> Result<Vec<CandidateId>> {
        contract::decode_u16_list(&self.query(View::PotentialCandidateIds(election)).await?)
    }

    pub async fn candidate(
        &self,
        election: ElectionId,
        candidate: CandidateId,
    ) -> Result<Option<Candidate>> {
        let entries = self.query(View::Candidate(election, candidate)).await?;
        contract::single_entry(&entries)
            .map(Candidate::decode)
            .transpose()
    }

    /// Registered candidates with their details.
    pub async fn candidates(&self, election: ElectionId) -> Result<Vec<Candidate>> {
        let ids = self.candidate_ids(election).await?;
        self.candidates_by_id(election, &ids).await
    }

    /// Candidacies awaiting registration, with their details.
    pub async fn potential_candidates(&self, election: ElectionId) -> Result<Vec<Candidate>> {
        let ids = self.potential_candidate_ids(election).await?;
        self.candidates_by_id(election, &ids).await
    }

    async fn candidates_by_id(
        &self,
        election: ElectionId,
        ids: &[CandidateId],
    ) -> Result<Vec<Candidate>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(candidate) = self.candidate(election, *id).await? {
                out.push(candidate);
            }
        }
        Ok(out)
    }

    pub async fn votes(&self, election: ElectionId) -> Result<Vec<Vote>> {
        self.query(View::Votes(election))
            .await?
            .iter()
            .map(|entry| Vote::decode(entry))
            .collect()
    }

    pub async fn dispute_ids(&self, election: ElectionId) -> Result<Vec<DisputeId>> {
        contract::decode_u16_list(&self.query(View::DisputeIdList(election)).await?)
    }

    pub async fn dispute(&self, election: ElectionId, dispute: DisputeId) -> Result<Option<Dispute>> {
        let entries = self.query(View::Dispute(election, dispute)).await?;
        contract::single_entry(&entries)
            .map(Dispute::decode)
            .transpose()
    }

    pub async fn disputes(&self, election: ElectionId) -> Result<Vec<Dispute>> {
        let mut out = Vec::new();
        for id in self.dispute_ids(election).await? {
            if let Some(dispute) = self.dispute(election, id).await? {
                out.push(dispute);
            }
        }
        Ok(out)
    }

    /// Winning candidate of a finished election, if anyone received votes.
    pub async fn winner(&self, election: ElectionId) -> Result<Option<Candidate>> {
        let entries = self.query(View::Results(election)).await?;
        match contract::decode_winner(&entries)? {
            Some(id) => self.candidate(election, id).await,
            None => Ok(None),
        }
    }
}
