//! Surface of the election contract: endpoints, views and their result types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::codec::{
    Address, ArgKind, ContractCall, NestedReader, TypedValue, decode_return_entry,
    top_decode_biguint, top_decode_u16, top_decode_u64,
};
use crate::error::{Error, Result};
use crate::gateway::VmQueryResult;
use crate::transaction::DisplayInfo;

pub type ElectionId = u64;
pub type CandidateId = u16;
pub type DisputeId = u16;

// =============================================================================
// Result types
// =============================================================================

/// Counting rule of an election.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ElectionType {
    /// One vote per voter, most votes wins.
    #[default]
    Plurality,
    /// Any number of candidates per vote, most votes wins.
    Approval,
    /// Ranked ballots with elimination and transfer.
    SingleTransferableVote,
}

impl ElectionType {
    #[must_use]
    pub const fn discriminant(self) -> u8 {
        match self {
            Self::Plurality => 0,
            Self::Approval => 1,
            Self::SingleTransferableVote => 2,
        }
    }

    pub fn from_discriminant(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Plurality),
            1 => Ok(Self::Approval),
            2 => Ok(Self::SingleTransferableVote),
            other => Err(Error::Decode(format!("unknown election type {other}"))),
        }
    }
}

impl fmt::Display for ElectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Plurality => "plurality",
            Self::Approval => "approval",
            Self::SingleTransferableVote => "single-transferable-vote",
        })
    }
}

impl FromStr for ElectionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "plurality" | "0" => Ok(Self::Plurality),
            "approval" | "1" => Ok(Self::Approval),
            "single-transferable-vote" | "singletransferablevote" | "stv" | "2" => {
                Ok(Self::SingleTransferableVote)
            }
            _ => Err(Error::InvalidArguments(format!(
                "unknown election type {s:?} (expected plurality, approval or stv)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionData {
    pub id: ElectionId,
    pub name: String,
    pub description: String,
    /// Unix seconds.
    pub start_time: u64,
    /// Unix seconds.
    pub end_time: u64,
    pub election_type: ElectionType,
    pub ended: bool,
    pub admin: Address,
}

impl ElectionData {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = NestedReader::new(bytes);
        let data = Self {
            id: reader.read_u64()?,
            name: reader.read_string()?,
            description: reader.read_string()?,
            start_time: reader.read_u64()?,
            end_time: reader.read_u64()?,
            election_type: ElectionType::from_discriminant(reader.read_u8()?)?,
            ended: reader.read_bool()?,
            admin: reader.read_address()?,
        };
        reader.finish("ElectionData")?;
        Ok(data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub name: String,
    pub description: String,
    pub creator: Address,
}

impl Candidate {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = NestedReader::new(bytes);
        let candidate = Self {
            id: reader.read_u16()?,
            name: reader.read_string()?,
            description: reader.read_string()?,
            creator: reader.read_address()?,
        };
        reader.finish("Candidate")?;
        Ok(candidate)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    pub id: DisputeId,
    pub name: String,
    pub description: String,
    pub creator: Address,
    pub resolved: bool,
    pub result_adjusted: bool,
}

impl Dispute {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = NestedReader::new(bytes);
        let dispute = Self {
            id: reader.read_u16()?,
            name: reader.read_string()?,
            description: reader.read_string()?,
            creator: reader.read_address()?,
            resolved: reader.read_bool()?,
            result_adjusted: reader.read_bool()?,
        };
        reader.finish("Dispute")?;
        Ok(dispute)
    }
}

/// One ballot: candidate ids in preference order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub candidates: Vec<CandidateId>,
}

impl Vote {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = NestedReader::new(bytes);
        let candidates = reader.read_list(NestedReader::read_u16)?;
        reader.finish("Vote")?;
        Ok(Self { candidates })
    }
}

// =============================================================================
// Endpoints
// =============================================================================

/// A state-changing call on the election contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum ElectionAction {
    RegisterElection {
        name: String,
        description: String,
        election_type: ElectionType,
        start_time: u64,
        end_time: u64,
    },
    /// Payable: `fee` is sent as the transaction value.
    SubmitCandidacy {
        election_id: ElectionId,
        name: String,
        description: String,
        fee: u128,
    },
    RegisterCandidate {
        election_id: ElectionId,
        candidate_id: CandidateId,
    },
    RegisterSelf {
        election_id: ElectionId,
        verification_data: String,
    },
    RegisterVoter {
        election_id: ElectionId,
        voter: Address,
    },
    Vote {
        election_id: ElectionId,
        candidate_ids: Vec<CandidateId>,
    },
    EndElection {
        election_id: ElectionId,
    },
    MakeDispute {
        election_id: ElectionId,
        name: String,
        description: String,
    },
    ResolveDispute {
        election_id: ElectionId,
        dispute_id: DisputeId,
        valid: bool,
    },
}

impl ElectionAction {
    /// Action names accepted by [`ElectionAction::parse`].
    pub const NAMES: [&'static str; 9] = [
        "register-election",
        "submit-candidacy",
        "register-candidate",
        "register-self",
        "register-voter",
        "vote",
        "end-election",
        "make-dispute",
        "resolve-dispute",
    ];

    /// Contract endpoint name.
    #[must_use]
    pub const fn function(&self) -> &'static str {
        match self {
            Self::RegisterElection { .. } => "registerElection",
            // The deployed contract spells it this way.
            Self::SubmitCandidacy { .. } => "submitCandidancy",
            Self::RegisterCandidate { .. } => "registerCandidate",
            Self::RegisterSelf { .. } => "registerSelf",
            Self::RegisterVoter { .. } => "registerVoter",
            Self::Vote { .. } => "vote",
            Self::EndElection { .. } => "endElection",
            Self::MakeDispute { .. } => "makeDispute",
            Self::ResolveDispute { .. } => "resolveDispute",
        }
    }

    /// Human label used in display strings.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::RegisterElection { .. } => "Register Election",
            Self::SubmitCandidacy { .. } => "Submit Candidacy",
            Self::RegisterCandidate { .. } => "Register Candidate",
            Self::RegisterSelf { .. } => "Register Self",
            Self::RegisterVoter { .. } => "Register Voter",
            Self::Vote { .. } => "Vote",
            Self::EndElection { .. } => "End Election",
            Self::MakeDispute { .. } => "Make Dispute",
            Self::ResolveDispute { .. } => "Resolve Dispute",
        }
    }

    #[must_use]
    pub fn display_info(&self) -> DisplayInfo {
        DisplayInfo::for_action(self.label())
    }

    /// Amount transferred with the call.
    #[must_use]
    pub const fn value(&self) -> u128 {
        match self {
            Self::SubmitCandidacy { fee, .. } => *fee,
            _ => 0,
        }
    }

    #[must_use]
    pub fn call(&self) -> ContractCall {
        let args = match self {
            Self::RegisterElection {
                name,
                description,
                election_type,
                start_time,
                end_time,
            } => vec![
                TypedValue::Bytes(name.clone()),
                TypedValue::Bytes(description.clone()),
                TypedValue::U64(u64::from(election_type.discriminant())),
                TypedValue::U64(*start_time),
                TypedValue::U64(*end_time),
            ],
            Self::SubmitCandidacy {
                election_id,
                name,
                description,
                ..
            }
            | Self::MakeDispute {
                election_id,
                name,
                description,
            } => vec![
                TypedValue::U64(*election_id),
                TypedValue::Bytes(name.clone()),
                TypedValue::Bytes(description.clone()),
            ],
            Self::RegisterCandidate {
                election_id,
                candidate_id,
            } => vec![TypedValue::U64(*election_id), TypedValue::U16(*candidate_id)],
            Self::RegisterSelf {
                election_id,
                verification_data,
            } => vec![
                TypedValue::U64(*election_id),
                TypedValue::Bytes(verification_data.clone()),
            ],
            Self::RegisterVoter { election_id, voter } => {
                vec![TypedValue::U64(*election_id), TypedValue::Address(*voter)]
            }
            Self::Vote {
                election_id,
                candidate_ids,
            } => std::iter::once(TypedValue::U64(*election_id))
                .chain(candidate_ids.iter().copied().map(TypedValue::U16))
                .collect(),
            Self::EndElection { election_id } => vec![TypedValue::U64(*election_id)],
            Self::ResolveDispute {
                election_id,
                dispute_id,
                valid,
            } => vec![
                TypedValue::U64(*election_id),
                TypedValue::U16(*dispute_id),
                TypedValue::Bool(*valid),
            ],
        };
        ContractCall::new(self.function(), args)
    }

    /// Build an action from its kebab-case name and positional arguments.
    pub fn parse(name: &str, args: &[String]) -> Result<Self> {
        let mut args = Args::new(name, args);
        let action = match name {
            "register-election" => Self::RegisterElection {
                name: args.text("name")?,
                description: args.text("description")?,
                election_type: args.next("election type")?.parse()?,
                start_time: args.u64("start time")?,
                end_time: args.u64("end time")?,
            },
            "submit-candidacy" => Self::SubmitCandidacy {
                election_id: args.u64("election id")?,
                name: args.text("name")?,
                description: args.text("description")?,
                fee: args.biguint("fee")?,
            },
            "register-candidate" => Self::RegisterCandidate {
                election_id: args.u64("election id")?,
                candidate_id: args.u16("candidate id")?,
            },
            "register-self" => Self::RegisterSelf {
                election_id: args.u64("election id")?,
                verification_data: args.text("verification data")?,
            },
            "register-voter" => Self::RegisterVoter {
                election_id: args.u64("election id")?,
                voter: Address::from_hex(args.next("voter address")?)?,
            },
            "vote" => {
                let election_id = args.u64("election id")?;
                let candidate_ids = args.rest_u16("candidate id")?;
                if candidate_ids.is_empty() {
                    return Err(Error::InvalidArguments(
                        "vote needs at least one candidate id".to_string(),
                    ));
                }
                Self::Vote {
                    election_id,
                    candidate_ids,
                }
            }
            "end-election" => Self::EndElection {
                election_id: args.u64("election id")?,
            },
            "make-dispute" => Self::MakeDispute {
                election_id: args.u64("election id")?,
                name: args.text("name")?,
                description: args.text("description")?,
            },
            "resolve-dispute" => Self::ResolveDispute {
                election_id: args.u64("election id")?,
                dispute_id: args.u16("dispute id")?,
                valid: matches!(ArgKind::Bool.parse(args.next("valid")?)?, TypedValue::Bool(true)),
            },
            other => {
                return Err(Error::InvalidArguments(format!(
                    "unknown action {other:?}; expected one of: {}",
                    Self::NAMES.join(", ")
                )));
            }
        };
        args.finish()?;
        Ok(action)
    }
}

/// Positional argument cursor for [`ElectionAction::parse`].
struct Args<'a> {
    action: &'a str,
    items: std::slice::Iter<'a, String>,
}

impl<'a> Args<'a> {
    fn new(action: &'a str, items: &'a [String]) -> Self {
        Self {
            action,
            items: items.iter(),
        }
    }

    fn next(&mut self, what: &str) -> Result<&'a str> {
        self.items.next().map(String::as_str).ok_or_else(|| {
            Error::InvalidArguments(format!("{}: missing {what}", self.action))
        })
    }

    fn text(&mut self, what: &str) -> Result<String> {
        self.next(what).map(str::to_string)
    }

    fn number<T: FromStr>(&mut self, what: &str) -> Result<T> {
        let raw = self.next(what)?;
        raw.trim().parse().map_err(|_| {
            Error::InvalidArguments(format!("{}: {raw:?} is not a valid {what}", self.action))
        })
    }

    fn u64(&mut self, what: &str) -> Result<u64> {
        self.number(what)
    }

    fn u16(&mut self, what: &str) -> Result<u16> {
        self.number(what)
    }

    fn biguint(&mut self, what: &str) -> Result<u128> {
        self.number(what)
    }

    fn rest_u16(&mut self, what: &str) -> Result<Vec<u16>> {
        let mut out = Vec::new();
        while self.items.len() > 0 {
            out.push(self.u16(what)?);
        }
        Ok(out)
    }

    fn finish(self) -> Result<()> {
        let extra = self.items.len();
        if extra > 0 {
            return Err(Error::InvalidArguments(format!(
                "{}: {extra} unexpected extra argument(s)",
                self.action
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Views
// =============================================================================

/// A read-only query on the election contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    CandidateFee,
    ElectionIdList,
    ElectionList,
    ElectionData(ElectionId),
    RegisteredVoters(ElectionId),
    PotentialCandidateIds(ElectionId),
    CandidateIds(ElectionId),
    Candidate(ElectionId, CandidateId),
    Votes(ElectionId),
    DisputeIdList(ElectionId),
    Dispute(ElectionId, DisputeId),
    Results(ElectionId),
}

impl View {
    #[must_use]
    pub const fn function(self) -> &'static str {
        match self {
            Self::CandidateFee => "getCandidateFee",
            Self::ElectionIdList => "getElectionIDList",
            Self::ElectionList => "electionList",
            Self::ElectionData(_) => "getElectionData",
            Self::RegisteredVoters(_) => "getRegisteredVoters",
            Self::PotentialCandidateIds(_) => "getPotentialCandidateIDs",
            Self::CandidateIds(_) => "getCandidateIDs",
            Self::Candidate(..) => "getCandidate",
            Self::Votes(_) => "getVotes",
            Self::DisputeIdList(_) => "getDisputeIDList",
            Self::Dispute(..) => "getDispute",
            Self::Results(_) => "results",
        }
    }

    #[must_use]
    pub fn call(self) -> ContractCall {
        let args = match self {
            Self::CandidateFee | Self::ElectionIdList | Self::ElectionList => Vec::new(),
            Self::ElectionData(election)
            | Self::RegisteredVoters(election)
            | Self::PotentialCandidateIds(election)
            | Self::CandidateIds(election)
            | Self::Votes(election)
            | Self::DisputeIdList(election)
            | Self::Results(election) => vec![TypedValue::U64(election)],
            Self::Candidate(election, item) | Self::Dispute(election, item) => {
                vec![TypedValue::U64(election), TypedValue::U16(item)]
            }
        };
        ContractCall::new(self.function(), args)
    }
}

/// Decode every `returnData` entry of a successful view.
pub fn return_entries(function: &str, result: &VmQueryResult) -> Result<Vec<Vec<u8>>> {
    if !result.is_ok() {
        return Err(Error::Query {
            function: function.to_string(),
            code: result.return_code.clone(),
            message: result.return_message.clone(),
        });
    }
    result
        .return_data
        .iter()
        .map(String::as_str)
        .map(decode_return_entry)
        .collect()
}

/// First entry, or `None` when the view returned nothing (or an empty value).
#[must_use]
pub fn single_entry(entries: &[Vec<u8>]) -> Option<&[u8]> {
    entries
        .first()
        .map(Vec::as_slice)
        .filter(|bytes| !bytes.is_empty())
}

pub fn decode_u64_list(entries: &[Vec<u8>]) -> Result<Vec<u64>> {
    entries.iter().map(|entry| top_decode_u64(entry)).collect()
}

pub fn decode_u16_list(entries: &[Vec<u8>]) -> Result<Vec<u16>> {
    entries.iter().map(|entry| top_decode_u16(entry)).collect()
}

pub fn decode_address_list(entries: &[Vec<u8>]) -> Result<Vec<Address>> {
    entries
        .iter()
        .map(|entry| {
            Address::from_slice(entry).ok_or_else(|| {
                Error::Decode(format!("address: expected 32 bytes, got {}", entry.len()))
            })
        })
        .collect()
}

/// Zero (empty) when the fee was never set.
pub fn decode_fee(entries: &[Vec<u8>]) -> Result<u128> {
    entries
        .first()
        .map_or(Ok(0), |entry| top_decode_biguint(entry))
}

/// Winning candidate id; the contract answers 0 when no candidate has votes.
pub fn decode_winner(entries: &[Vec<u8>]) -> Result<Option<CandidateId>> {
    let winner = entries
        .first()
        .map_or(Ok(0), |entry| top_decode_u16(entry))?;
    Ok((winner != 0).then_some(winner))
}
