//! Token bridge deployer
//!
//! Deploys the token bridge creator and its templates on the parent chain,
//! then asks it to create the bridge for a rollup. The child chain half is
//! delivered through two retryable tickets which the deployer follows until
//! they are redeemed.

use alloy::primitives::B256;
use clap::{Parser, Subcommand};
use std::path::Path;
use std::process::ExitCode;
use tracing::{error, info, warn};

use bridge_deployer::artifact::ArtifactStore;
use bridge_deployer::config::Config;
use bridge_deployer::coordinator::DeploymentCoordinator;
use bridge_deployer::error::{RunFailure, Step};
use bridge_deployer::evm::client::{connect_readonly, connect_with_signer, ChainClient};
use bridge_deployer::record::DeploymentRecord;
use bridge_deployer::retryable::CrossChainDispatcher;
use bridge_deployer::run_state::RunStateStore;
use bridge_deployer::verification::EtherscanVerifier;

#[derive(Parser)]
#[command(name = "bridge-deployer")]
#[command(about = "Deploy a token bridge across a parent and child chain")]
#[command(version)]
struct Cli {
    /// Reuse the partial record a failed run left next to the deployment record
    #[arg(long, global = true)]
    resume: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy the token bridge creator and all templates
    DeployCreator,

    /// Create the token bridge through an existing creator
    CreateBridge,

    /// Deploy the creator, then create the token bridge
    Full,

    /// Print the status of a retryable ticket
    Status {
        /// Ticket creation id (0x-prefixed)
        ticket_id: B256,
    },
}

fn main() -> eyre::Result<ExitCode> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<ExitCode> {
    init_logging();

    let cli = Cli::parse();
    let config = Config::load()?;
    info!(
        parent_rpc = %config.parent_rpc_url,
        child_rpc = %config.child_rpc_url,
        "Configuration loaded"
    );

    if let Commands::Status { ticket_id } = cli.command {
        return print_status(&config, ticket_id).await;
    }

    let source = connect_with_signer(
        &config.parent_rpc_url,
        config.deployer_key.expose(),
        config.tx_timeout,
    )
    .await?;
    let destination = connect_readonly(&config.child_rpc_url).await?;

    let partial_path = DeploymentRecord::partial_path(&config.record_path);
    let record = DeploymentRecord::open(&config.record_path, cli.resume)?;

    let mut coordinator = DeploymentCoordinator::new(
        source.clone(),
        destination,
        ArtifactStore::new(&config.artifacts_dir),
        RunStateStore::new(&config.run_state_dir),
        config.coordinator_settings(),
    )
    .with_record(record);

    let result = match run_command(&mut coordinator, &config, cli.command, source.as_ref()).await
    {
        Ok(()) => coordinator.persist(&config.record_path).map(|()| {
            if partial_path.exists() {
                if let Err(e) = std::fs::remove_file(&partial_path) {
                    warn!(path = %partial_path.display(), error = %e, "Failed to remove partial record");
                }
            }
        }),
        Err(failure) => {
            // The last complete record stays untouched
            if let Err(e) = failure.partial.save(&partial_path) {
                error!(error = %e, "Failed to write partial deployment record");
            }
            Err(failure)
        }
    };

    drain_verification(&coordinator, &config).await;

    match result {
        Ok(()) => {
            info!(path = %config.record_path.display(), "Deployment complete");
            Ok(ExitCode::SUCCESS)
        }
        Err(failure) => {
            report_failure(&failure, &config.record_path);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run_command(
    coordinator: &mut DeploymentCoordinator,
    config: &Config,
    command: Commands,
    source: &dyn ChainClient,
) -> Result<(), RunFailure> {
    let owner = config.rollup_owner.unwrap_or_else(|| source.sender());

    match command {
        Commands::DeployCreator => {
            let deployed = coordinator.deploy_creator().await?;
            info!(
                creator = %deployed.creator,
                retryable_sender = %deployed.retryable_sender,
                proxy_admin = %deployed.proxy_admin,
                "Creator deployed"
            );
        }
        Commands::CreateBridge => {
            let (creator, inbox) = match (config.require_creator(), config.require_inbox()) {
                (Ok(creator), Ok(inbox)) => (creator, inbox),
                (Err(e), _) | (_, Err(e)) => {
                    return Err(RunFailure::new(
                        Step::Preconditions,
                        e,
                        coordinator.record().clone(),
                    ))
                }
            };
            coordinator.create_token_bridge(creator, inbox, owner).await?;
        }
        Commands::Full => {
            let inbox = config.require_inbox().map_err(|e| {
                RunFailure::new(
                    Step::Preconditions,
                    e,
                    coordinator.record().clone(),
                )
            })?;
            coordinator.run(inbox, owner).await?;
        }
        Commands::Status { .. } => {}
    }
    Ok(())
}

async fn print_status(config: &Config, ticket_id: B256) -> eyre::Result<ExitCode> {
    let source = connect_readonly(&config.parent_rpc_url).await?;
    let destination = connect_readonly(&config.child_rpc_url).await?;
    let dispatcher = CrossChainDispatcher::new(source, destination, config.message_poll_interval);

    let status = dispatcher.status(ticket_id).await?;
    println!("{ticket_id}: {}", status.status);
    if let Some(receipt) = status.redeem_receipt {
        println!("  redeemed in {}", receipt.tx_hash);
        if let Some(created) = receipt.contract_address {
            println!("  created {created}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn drain_verification(coordinator: &DeploymentCoordinator, config: &Config) {
    let queue = coordinator.verification_queue();
    if queue.is_empty() {
        return;
    }

    match EtherscanVerifier::new(config.etherscan()) {
        Ok(verifier) => {
            let summary = queue.drain(&verifier).await;
            info!(
                submitted = summary.submitted,
                failed = summary.failed,
                dropped = summary.dropped,
                "Verification finished"
            );
        }
        Err(e) => warn!(error = %e, pending = queue.len(), "Verification skipped"),
    }
}

fn report_failure(failure: &RunFailure, record_path: &Path) {
    error!(step = %failure.step, "Deployment failed");
    eprintln!("Deployment failed at step `{}`", failure.step);
    eprintln!("{:?}", failure.error);
    if let Some(tx_hash) = failure.tx_hash {
        eprintln!("Dispatch transaction: {tx_hash}");
    }
    if !failure.message_ids.is_empty() {
        eprintln!("Retryable tickets needing attention:");
        for id in &failure.message_ids {
            eprintln!("  {id}");
        }
    }
    if !failure.partial.is_empty() {
        eprintln!(
            "{} record entries saved to {}; re-run with --resume to reuse them",
            failure.partial.len(),
            DeploymentRecord::partial_path(record_path).display()
        );
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bridge_deployer=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}
