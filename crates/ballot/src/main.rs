//! ballot CLI
//!
//! Thin wrapper over ballot-core: list sessions, follow their status, run
//! contract views and submit election actions.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ballot_core::config::Config;
use ballot_core::contract::{Candidate, ElectionAction, ElectionData};
use ballot_core::error::ErrorClass;
use ballot_core::logging::init_logging;
use ballot_core::{BallotContext, ElectionClient, SessionType, TransactionStatus};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

mod prompt_signer;

use prompt_signer::PromptSigner;

#[derive(Parser)]
#[command(name = "ballot", version, about = "Submit and track election contract transactions")]
struct Cli {
    /// Config file (defaults to $BALLOT_CONFIG, then ./ballot.toml)
    #[arg(long, global = true, env = "BALLOT_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Plain)]
    format: OutputFormat,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Plain,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// List the last session of every flow
    Sessions,

    /// Show the status of a flow's last session
    Status {
        session_type: SessionType,

        /// Follow the session until it finishes
        #[arg(long)]
        watch: bool,

        /// Give up following after this many seconds
        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,
    },

    /// Run a read-only contract view
    Query {
        #[command(subcommand)]
        view: QueryCommand,
    },

    /// Sign and broadcast an election action
    Submit {
        session_type: SessionType,

        /// Sender account (bech32)
        #[arg(long)]
        sender: String,

        /// One of: register-election, submit-candidacy, register-candidate,
        /// register-self, register-voter, vote, end-election, make-dispute,
        /// resolve-dispute
        action: String,

        /// Positional action arguments
        args: Vec<String>,

        /// Return right after broadcast instead of following the status
        #[arg(long)]
        no_watch: bool,

        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,
    },
}

#[derive(Subcommand)]
enum QueryCommand {
    /// All elections
    Elections,
    /// One election
    Election { id: u64 },
    /// Registered candidates of an election
    Candidates { id: u64 },
    /// Candidacies awaiting registration
    PotentialCandidates { id: u64 },
    /// Ballots cast in an election
    Votes { id: u64 },
    /// Registered voter addresses
    Voters { id: u64 },
    /// Winner of a finished election
    Results { id: u64 },
    /// Current candidacy fee
    Fee,
    /// Disputes raised on an election
    Disputes { id: u64 },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report(&err),
    }
}

fn report(err: &anyhow::Error) -> ExitCode {
    eprintln!("error: {err:#}");
    let Some(core) = err.downcast_ref::<ballot_core::Error>() else {
        return ExitCode::FAILURE;
    };
    if let Some(remediation) = core.remediation() {
        eprint!("{}", remediation.render_plain());
    }
    match core.class() {
        ErrorClass::Config => ExitCode::from(3),
        ErrorClass::UserAction => ExitCode::from(4),
        ErrorClass::Transient => ExitCode::from(5),
        ErrorClass::TerminalData => ExitCode::from(6),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let mut log_config = config.log_config();
    if let Some(level) = &cli.log_level {
        log_config.level.clone_from(level);
    }
    init_logging(&log_config)?;
    tracing::debug!(version = ballot_core::VERSION, "ballot starting");

    let context = BallotContext::from_config(config, Arc::new(PromptSigner))?;
    let format = cli.format;

    match cli.command {
        Commands::Sessions => list_sessions(&context, format),
        Commands::Status {
            session_type,
            watch,
            timeout_secs,
        } => {
            let client = context.client(session_type);
            show_status(&client, watch, Duration::from_secs(timeout_secs), format).await
        }
        Commands::Query { view } => {
            let client = context.client(SessionType::ElectionFlow);
            run_query(&client, view, format).await
        }
        Commands::Submit {
            session_type,
            sender,
            action,
            args,
            no_watch,
            timeout_secs,
        } => {
            let client = context.client(session_type);
            let id = if action == "submit-candidacy" && args.len() == 3 {
                let election_id = args[0]
                    .parse()
                    .map_err(|_| ballot_core::Error::InvalidArguments(format!(
                        "submit-candidacy: {:?} is not a valid election id",
                        args[0]
                    )))?;
                client
                    .submit_candidacy(&sender, election_id, &args[1], &args[2])
                    .await?
            } else {
                let action = ElectionAction::parse(&action, &args)?;
                client.submit_action(&sender, &action).await?
            };
            let status = context.registry().status(&id);
            let row = SessionRow::new(session_type, Some(id.to_string()), status);
            emit(format, &row, SessionRow::plain)?;
            if no_watch {
                return Ok(());
            }
            follow(&client, Duration::from_secs(timeout_secs), format).await
        }
    }
}

// =============================================================================
// Sessions and status
// =============================================================================

#[derive(Serialize)]
struct SessionRow {
    session_type: SessionType,
    session_id: Option<String>,
    status: TransactionStatus,
}

impl SessionRow {
    fn new(session_type: SessionType, session_id: Option<String>, status: TransactionStatus) -> Self {
        Self {
            session_type,
            session_id,
            status,
        }
    }

    fn plain(&self) -> String {
        match &self.session_id {
            Some(id) => format!("{}\t{id}\t{}", self.session_type, self.status),
            None => format!("{}\t-\tno session", self.session_type),
        }
    }
}

fn list_sessions(context: &BallotContext, format: OutputFormat) -> Result<()> {
    let rows: Vec<SessionRow> = context
        .store()
        .entries()
        .into_iter()
        .map(|(ty, id)| {
            let status = context.registry().status(&id);
            SessionRow::new(ty, Some(id.to_string()), status)
        })
        .collect();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Plain if rows.is_empty() => println!("No sessions recorded."),
        OutputFormat::Plain => {
            for row in &rows {
                println!("{}", row.plain());
            }
        }
    }
    Ok(())
}

async fn show_status(
    client: &ElectionClient,
    watch: bool,
    timeout: Duration,
    format: OutputFormat,
) -> Result<()> {
    let Some(id) = client.last_session() else {
        let row = SessionRow::new(client.session_type(), None, TransactionStatus::None);
        return emit(format, &row, SessionRow::plain);
    };
    let status = client
        .status_of(&id)
        .await
        .with_context(|| format!("looking up session {id}"))?;
    if !watch || status.is_terminal() {
        let row = SessionRow::new(client.session_type(), Some(id.to_string()), status);
        return emit(format, &row, SessionRow::plain);
    }
    client.resume();
    follow(client, timeout, format).await
}

/// Print every status change of the tracked session until it finishes.
async fn follow(client: &ElectionClient, timeout: Duration, format: OutputFormat) -> Result<()> {
    let mut feed = client.subscribe();
    let session_id = feed.session_id().map(ToString::to_string);
    let print = |status: TransactionStatus| {
        let row = SessionRow::new(client.session_type(), session_id.clone(), status);
        emit(format, &row, SessionRow::plain)
    };
    if let Some(status) = feed.current().filter(|s| *s != TransactionStatus::None) {
        print(status)?;
        if status.is_terminal() {
            return Ok(());
        }
    }
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match tokio::time::timeout_at(deadline, feed.next()).await {
            Ok(Some(status)) => {
                print(status)?;
                if status.is_terminal() {
                    return Ok(());
                }
            }
            Ok(None) => return Ok(()),
            Err(_) => {
                return Err(ballot_core::Error::Timeout(format!(
                    "session still {} after {}s",
                    client.status(),
                    timeout.as_secs()
                ))
                .into());
            }
        }
    }
}

// =============================================================================
// Views
// =============================================================================

async fn run_query(client: &ElectionClient, view: QueryCommand, format: OutputFormat) -> Result<()> {
    match view {
        QueryCommand::Elections => {
            let elections = client.elections().await?;
            emit_list(format, &elections, election_line)
        }
        QueryCommand::Election { id } => match client.election(id).await? {
            Some(election) => emit(format, &election, election_details),
            None => emit_missing(format, &format!("election {id}")),
        },
        QueryCommand::Candidates { id } => {
            emit_list(format, &client.candidates(id).await?, candidate_line)
        }
        QueryCommand::PotentialCandidates { id } => {
            emit_list(format, &client.potential_candidates(id).await?, candidate_line)
        }
        QueryCommand::Votes { id } => {
            let votes = client.votes(id).await?;
            emit_list(format, &votes, |vote| {
                vote.candidates
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            })
        }
        QueryCommand::Voters { id } => {
            emit_list(format, &client.registered_voters(id).await?, ToString::to_string)
        }
        QueryCommand::Results { id } => match client.winner(id).await? {
            Some(candidate) => emit(format, &candidate, |c| format!("winner: {}", candidate_line(c))),
            None => emit_missing(format, &format!("winner for election {id}")),
        },
        QueryCommand::Fee => {
            let fee = client.candidate_fee().await?;
            emit(format, &fee.to_string(), Clone::clone)
        }
        QueryCommand::Disputes { id } => {
            emit_list(format, &client.disputes(id).await?, |dispute| {
                format!(
                    "{}\t{}\tresolved={}\tadjusted={}",
                    dispute.id, dispute.name, dispute.resolved, dispute.result_adjusted
                )
            })
        }
    }
}

fn election_line(election: &ElectionData) -> String {
    format!(
        "{}\t{}\t{}\t{}",
        election.id,
        election.name,
        election.election_type,
        if election.ended { "ended" } else { "open" }
    )
}

fn election_details(election: &ElectionData) -> String {
    format!(
        "id: {}\nname: {}\ndescription: {}\ntype: {}\nstart: {}\nend: {}\nended: {}\nadmin: {}",
        election.id,
        election.name,
        election.description,
        election.election_type,
        election.start_time,
        election.end_time,
        election.ended,
        election.admin
    )
}

fn candidate_line(candidate: &Candidate) -> String {
    format!("{}\t{}\t{}", candidate.id, candidate.name, candidate.description)
}

// =============================================================================
// Output
// =============================================================================

fn emit<T: Serialize>(format: OutputFormat, value: &T, plain: impl Fn(&T) -> String) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(value)?),
        OutputFormat::Plain => println!("{}", plain(value)),
    }
    Ok(())
}

fn emit_list<T: Serialize>(
    format: OutputFormat,
    items: &[T],
    line: impl Fn(&T) -> String,
) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(items)?),
        OutputFormat::Plain if items.is_empty() => println!("(none)"),
        OutputFormat::Plain => {
            for item in items {
                println!("{}", line(item));
            }
        }
    }
    Ok(())
}

fn emit_missing(format: OutputFormat, what: &str) -> Result<()> {
    match format {
        OutputFormat::Json => println!("null"),
        OutputFormat::Plain => println!("no {what}"),
    }
    Ok(())
}
