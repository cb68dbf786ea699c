use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::{FaceLocalizer, HaarLocalizer, DESCRIPTOR_DIM};
use facegate_engine::{frame, spawn_engine, Config, DefaultEngine, EngineHandle};
use facegate_store::{IdentityStore, NpyStore};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "facegate", about = "facegate face enrollment and verification CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll the single face in an image under a new name
    Enroll {
        /// Name to register the face under
        #[arg(short, long)]
        name: String,
        /// Image file containing exactly one face
        image: PathBuf,
    },
    /// Identify the face in an image against enrolled identities
    Verify {
        /// Image file containing exactly one face
        image: PathBuf,
    },
    /// List enrolled identities
    List,
    /// Remove an enrolled identity
    Remove {
        /// Name of the identity to remove
        name: String,
    },
    /// Print the face regions found in an image (detector diagnostics)
    Detect {
        image: PathBuf,
    },
    /// Show effective configuration
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("failed to load configuration")?;

    match cli.command {
        Commands::Enroll { name, image } => {
            let frame = frame::load(&image)?;
            connect(&config)?.register(name.as_str(), frame).await?;
            println!("Enrolled {name}");
        }
        Commands::Verify { image } => {
            let frame = frame::load(&image)?;
            let best = connect(&config)?.authenticate(frame).await?;
            println!(
                "{}",
                serde_json::json!({ "name": best.name, "similarity": best.similarity })
            );
        }
        Commands::List => {
            let names = connect(&config)?.identities().await?;
            if names.is_empty() {
                println!("No identities enrolled");
            }
            for name in names {
                println!("{name}");
            }
        }
        Commands::Remove { name } => {
            if connect(&config)?.remove(name.as_str()).await? {
                println!("Removed {name}");
            } else {
                anyhow::bail!("no identity named {name:?}");
            }
        }
        Commands::Detect { image } => {
            let frame = frame::load(&image)?;
            let localizer = HaarLocalizer::load(&config.cascade_path, config.localizer_params())
                .with_context(|| format!("loading {}", config.cascade_path.display()))?;
            let regions = localizer.locate(&frame);
            println!("{}", serde_json::to_string_pretty(&regions)?);
        }
        Commands::Status => {
            let enrolled = NpyStore::open(&config.store_dir, DESCRIPTOR_DIM)
                .and_then(|store| store.load_all())
                .map(|snapshot| snapshot.len());
            let enrolled = match enrolled {
                Ok(count) => serde_json::json!(count),
                Err(err) => {
                    tracing::warn!(error = %err, "identity store unreadable");
                    serde_json::Value::Null
                }
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "config": config,
                    "enrolled": enrolled,
                }))?
            );
        }
    }

    Ok(())
}

/// Build the engine from `config` and start its thread.
fn connect(config: &Config) -> Result<EngineHandle> {
    let engine = DefaultEngine::from_config(config).context("failed to start engine")?;
    Ok(spawn_engine(engine)?)
}
