//! `minipay` developer CLI.
//!
//! Drives the core library against a local cache directory and, when
//! `MINIPAY_DURABLE_URL` and `MINIPAY_DURABLE_KEY` are set, the remote durable
//! backend.
//!
//! ```text
//! minipay derive --credential <ID>
//! minipay identity bind --nullifier 12345 --address G...
//! minipay vault upload --nullifier 12345 --credential <ID> --handle alice
//! minipay recover --proof proof.json
//! ```

mod app;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use eyre::{bail, WrapErr as _};
use minipay_core::handles::{is_handle, HANDLE_SUFFIX};
use minipay_core::payments::PaymentUri;
use minipay_core::recovery::ProofStatus;
use minipay_core::{derive_keypair, MiniPayConfig, MiniPayError, RecoveryState};
use secrecy::ExposeSecret;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

use crate::app::App;

#[derive(Parser)]
#[command(name = "minipay", version, about = "MiniPay wallet developer CLI")]
struct Cli {
    /// Directory of the on-device cache. Defaults to `MINIPAY_DATA_DIR`, then
    /// the platform data directory.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Derive the wallet keypair of a passkey credential
    Derive {
        #[arg(long, env = "MINIPAY_CREDENTIAL_ID")]
        credential: String,
        /// Also print the secret seed
        #[arg(long)]
        reveal: bool,
    },
    /// Identity bindings
    #[command(subcommand)]
    Identity(IdentityCommand),
    /// Encrypted wallet vaults
    #[command(subcommand)]
    Vault(VaultCommand),
    /// Payment handles
    #[command(subcommand)]
    Handle(HandleCommand),
    /// Recover a wallet from a proof file
    Recover {
        /// JSON proof as emitted by the proof widget
        #[arg(long)]
        proof: PathBuf,
        #[arg(long)]
        reveal: bool,
    },
    /// Build a USDC payment request URI
    PaymentUri {
        /// Address or handle of the recipient
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: String,
        #[arg(long)]
        memo: Option<String>,
    },
    /// Decode a payment request URI
    ParseUri { uri: String },
}

#[derive(Args)]
struct BindArgs {
    #[arg(long)]
    nullifier: String,
    #[arg(long)]
    address: String,
    #[arg(long)]
    handle: Option<String>,
}

#[derive(Subcommand)]
enum IdentityCommand {
    /// Bind a nullifier to a wallet
    Bind(BindArgs),
    /// Move a nullifier to another wallet
    Relink(BindArgs),
    /// Find the wallet bound to a nullifier
    Lookup {
        #[arg(long)]
        nullifier: String,
    },
    /// Show the identity verified on this device
    Local,
}

#[derive(Subcommand)]
enum VaultCommand {
    /// Encrypt the credential's secret and back it up
    Upload {
        #[arg(long)]
        nullifier: String,
        #[arg(long, env = "MINIPAY_CREDENTIAL_ID")]
        credential: String,
        #[arg(long)]
        handle: Option<String>,
    },
    /// Download and decrypt a vault
    Download {
        #[arg(long)]
        nullifier: String,
        #[arg(long)]
        reveal: bool,
    },
    /// Check whether a vault exists
    Exists {
        #[arg(long)]
        nullifier: String,
    },
}

#[derive(Subcommand)]
enum HandleCommand {
    /// Claim a handle for an address
    Register {
        handle: String,
        #[arg(long)]
        address: String,
    },
    /// Resolve a handle to its address
    Resolve { handle: String },
    /// Find the handle of an address
    Whois { address: String },
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let app = App::open(MiniPayConfig::from_env()?, cli.data_dir)?;
    tracing::info!(mode = %app.config.storage_mode(), "minipay");

    let result = run(&app, cli.command).await;
    app.finish().await;
    result
}

async fn run(app: &App, command: Command) -> eyre::Result<()> {
    match command {
        Command::Derive { credential, reveal } => {
            let keypair = derive_keypair(&credential)?;
            let mut out = json!({ "address": keypair.public_address() });
            if reveal {
                out["secret"] = keypair.secret_seed().expose_secret().into();
            }
            print_json(&out)
        }
        Command::Identity(command) => run_identity(app, command).await,
        Command::Vault(command) => run_vault(app, command).await,
        Command::Handle(command) => run_handle(app, command).await,
        Command::Recover { proof, reveal } => {
            let raw = std::fs::read_to_string(&proof)
                .wrap_err_with(|| format!("reading {}", proof.display()))?;
            let proof: serde_json::Value =
                serde_json::from_str(&raw).wrap_err("proof is not JSON")?;

            let orchestrator = app.orchestrator();
            let state = orchestrator
                .on_proof_event(ProofStatus::Proven, Some(&proof))
                .await;
            match state {
                RecoveryState::Matched(wallet) => {
                    let mut out = json!({
                        "address": wallet.wallet_address,
                        "handle": wallet.handle,
                        "source": format!("{:?}", wallet.source),
                    });
                    if let (true, Some(secret)) = (reveal, wallet.secret.as_ref()) {
                        out["secret"] = secret.expose_secret().into();
                    }
                    print_json(&out)
                }
                other => bail!(
                    "{}",
                    other.user_message().unwrap_or("recovery did not complete")
                ),
            }
        }
        Command::PaymentUri { to, amount, memo } => {
            let destination = if is_handle(&to) {
                match app.handles.resolve_durable(&to).await? {
                    Some(address) => address,
                    None => bail!("no wallet for {to}"),
                }
            } else {
                to
            };
            let request = PaymentUri::usdc(&destination, &amount, memo.as_deref())?
                .on_network(app.config.environment);
            println!("{}", request.to_uri()?);
            Ok(())
        }
        Command::ParseUri { uri } => {
            let request = PaymentUri::parse(&uri)?;
            let recipient = app.handles.format_recipient(&request.destination);
            let network = request.environment().map(|env| env.to_string());
            print_json(&json!({
                "destination": request.destination,
                "recipient": recipient,
                "amount": request.amount,
                "asset_code": request.asset_code,
                "asset_issuer": request.asset_issuer,
                "network": network,
                "memo": request.memo,
            }))
        }
    }
}

async fn run_identity(app: &App, command: IdentityCommand) -> eyre::Result<()> {
    let receipt = match command {
        IdentityCommand::Bind(args) => {
            app.identities
                .bind(&args.nullifier, &args.address, args.handle.as_deref())
                .await?
        }
        IdentityCommand::Relink(args) => {
            app.identities
                .relink(&args.nullifier, &args.address, args.handle.as_deref())
                .await?
        }
        IdentityCommand::Lookup { nullifier } => {
            let binding = app.identities.lookup(&nullifier).await?;
            return print_json(&json!({
                "address": binding.wallet_address,
                "handle": binding.handle,
                "verified_at": binding.verified_at,
            }));
        }
        IdentityCommand::Local => {
            let Some(binding) = app.identities.local_identity()? else {
                bail!("no identity verified on this device");
            };
            return print_json(&json!({
                "address": binding.wallet_address,
                "handle": binding.handle,
                "verified_at": binding.verified_at,
            }));
        }
    };

    if !receipt.durable_synced {
        tracing::warn!("binding saved on this device only; durable store did not accept it");
    }
    print_json(&json!({
        "address": receipt.binding.wallet_address,
        "handle": receipt.binding.handle,
        "status": format!("{:?}", receipt.status),
        "durable_synced": receipt.durable_synced,
    }))
}

async fn run_vault(app: &App, command: VaultCommand) -> eyre::Result<()> {
    match command {
        VaultCommand::Upload {
            nullifier,
            credential,
            handle,
        } => {
            let keypair = derive_keypair(&credential)?;
            let address = keypair.public_address();
            app.vaults
                .upload(
                    &nullifier,
                    &keypair.secret_seed(),
                    &address,
                    handle.as_deref(),
                )
                .await?;
            print_json(&json!({ "uploaded": true, "address": address }))
        }
        VaultCommand::Download { nullifier, reveal } => {
            let vault = app.vaults.download(&nullifier).await?;
            let mut out = json!({
                "address": vault.wallet_address,
                "handle": vault.handle,
            });
            if reveal {
                out["secret"] = vault.secret.expose_secret().into();
            }
            print_json(&out)
        }
        VaultCommand::Exists { nullifier } => {
            let exists = app.vaults.exists(&nullifier).await?;
            print_json(&json!({ "exists": exists }))
        }
    }
}

async fn run_handle(app: &App, command: HandleCommand) -> eyre::Result<()> {
    match command {
        HandleCommand::Register { handle, address } => {
            let outcome = app.handles.register(&handle, &address)?;
            print_json(&json!({ "handle": handle, "outcome": format!("{outcome:?}") }))
        }
        HandleCommand::Resolve { handle } => match app.handles.resolve_durable(&handle).await {
            Ok(Some(address)) => print_json(&json!({ "handle": handle, "address": address })),
            Ok(None) => Err(MiniPayError::NotFound(format!("{handle}{HANDLE_SUFFIX}")).into()),
            Err(err) => Err(err.into()),
        },
        HandleCommand::Whois { address } => {
            let handle = app.handles.reverse_lookup(&address)?;
            print_json(&json!({
                "address": address,
                "handle": handle,
                "display": app.handles.format_recipient(&address),
            }))
        }
    }
}

fn print_json(value: &serde_json::Value) -> eyre::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
