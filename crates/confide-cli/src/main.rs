mod output;

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use confide_engine::{EngineConfig, Email, ShareService, ShareToken, SqliteStore, SweepRuntime};
use output::Output;

#[derive(Parser)]
#[command(name = "confide", about = "Split secrets and scatter the shares among other users", version)]
struct Cli {
    /// SQLite database file.
    #[arg(long, env = "CONFIDE_DB", default_value = "confide.db")]
    db: PathBuf,

    /// Shares per secret (overrides CONFIDE_SHARE_COUNT).
    #[arg(long)]
    shares: Option<usize>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Print engine counters to stderr when the command finishes.
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a user.
    Signup {
        email: String,
        /// Display name.
        #[arg(long, default_value = "")]
        name: String,
    },

    /// Change a user's display name and/or email.
    Rename {
        email: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long = "new-email")]
        new_email: Option<String>,
    },

    /// Split a secret and queue its shares. Reads stdin when SECRET is omitted.
    Submit {
        email: String,
        secret: Option<String>,
        /// Run distribution rounds right after queueing.
        #[arg(long)]
        distribute: bool,
    },

    /// Run distribution rounds over a user's queue.
    Distribute {
        email: String,
        /// Run a single round for the head of the queue.
        #[arg(long)]
        once: bool,
    },

    /// Show how far each of a user's secrets has been distributed.
    Progress { email: String },

    /// List the shares a user holds, as word sequences.
    Shares { email: String },

    /// Delete an account, relocating the shares it holds.
    Delete { email: String },

    /// Sweep the deletion ledger.
    Sweep {
        /// Visit every ledger entry instead of one.
        #[arg(long)]
        all: bool,
    },

    /// Keep sweeping the ledger in the background until Ctrl-C.
    Watch {
        /// Seconds between sweeps (overrides CONFIDE_SWEEP_INTERVAL_SECS).
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Rebuild a secret from all of its shares.
    Combine {
        /// One word sequence per share.
        #[arg(required = true)]
        shares: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = EngineConfig::new();
    if let Some(n) = cli.shares {
        config = config.share_count(n);
    }
    if let Command::Watch {
        interval: Some(secs),
    } = &cli.command
    {
        config = config.sweep_interval(Duration::from_secs(*secs));
    }

    let store = SqliteStore::open(&cli.db)
        .with_context(|| format!("opening database {}", cli.db.display()))?;
    let service = Arc::new(ShareService::new(Arc::new(store), config)?);
    let out = Output::new(cli.json);

    run(&service, cli.command, &out).await?;

    if cli.metrics {
        out.metrics(&service.metrics())?;
    }
    Ok(())
}

async fn run(
    service: &Arc<ShareService<SqliteStore>>,
    command: Command,
    out: &Output,
) -> anyhow::Result<()> {
    match command {
        Command::Signup { email, name } => {
            let email = Email::new(email);
            service.register(&email, &name).await?;
            out.emit(&email, || format!("registered {email}"))?;
        }

        Command::Rename {
            email,
            name,
            new_email,
        } => {
            if name.is_none() && new_email.is_none() {
                bail!("nothing to change: pass --name and/or --new-email");
            }
            let email = Email::new(email);
            let new_email = new_email.map(Email::new);
            service
                .update_profile(&email, name.as_deref(), new_email.as_ref())
                .await?;
            let current = new_email.unwrap_or(email);
            let user = service.user(&current).await?;
            out.emit(&serde_json::json!({ "email": user.email, "name": user.name }), || {
                format!("{} ({})", user.email, user.name)
            })?;
        }

        Command::Submit {
            email,
            secret,
            distribute,
        } => {
            let email = Email::new(email);
            let secret = match secret {
                Some(text) => text.into_bytes(),
                None => {
                    let mut buf = Vec::new();
                    std::io::stdin()
                        .read_to_end(&mut buf)
                        .context("reading secret from stdin")?;
                    buf
                }
            };
            let secret_id = service.submit_secret(&email, &secret).await?;
            let outcomes = if distribute {
                service.distribute_all(&email).await?
            } else {
                Vec::new()
            };
            out.emit(
                &serde_json::json!({ "secret_id": secret_id, "rounds": outcomes }),
                || {
                    let mut text = format!("queued {secret_id}");
                    if distribute {
                        text.push('\n');
                        text.push_str(&output::rounds(&outcomes));
                    }
                    text
                },
            )?;
        }

        Command::Distribute { email, once } => {
            let email = Email::new(email);
            let outcomes = if once {
                vec![service.distribute_one(&email).await?]
            } else {
                service.distribute_all(&email).await?
            };
            out.emit(&outcomes, || output::rounds(&outcomes))?;
        }

        Command::Progress { email } => {
            let entries = service.all_progress(&Email::new(email)).await?;
            out.emit(&entries, || output::progress(&entries))?;
        }

        Command::Shares { email } => {
            let held = service.held_shares(&Email::new(email)).await?;
            out.emit(&held, || output::shares(&held))?;
        }

        Command::Delete { email } => {
            let report = service.delete_account(&Email::new(email)).await?;
            out.emit(&report, || output::reclaim(&report))?;
        }

        Command::Sweep { all } => {
            let outcomes = if all {
                service.sweep_all().await?
            } else {
                vec![service.sweep_once().await?]
            };
            out.emit(&outcomes, || output::sweeps(&outcomes))?;
        }

        Command::Watch { .. } => {
            let period = service.config().get_sweep_interval();
            eprintln!("sweeping every {period:?}, Ctrl-C to stop");
            let handle = SweepRuntime::spawn(Arc::clone(service));
            tokio::signal::ctrl_c()
                .await
                .context("waiting for Ctrl-C")?;
            handle.shutdown().await;
            eprintln!("stopped");
        }

        Command::Combine { shares } => {
            let tokens = shares
                .iter()
                .map(|words| ShareToken::from_words(words))
                .collect::<Result<Vec<_>, _>>()
                .context("decoding share words")?;
            let secret = service.recover(&tokens)?;
            let text = String::from_utf8_lossy(&secret).into_owned();
            out.emit(&serde_json::json!({ "secret": text }), || text.clone())?;
        }
    }
    Ok(())
}
