use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tanker::{
    CreateEnvironment, Environment, LifecycleEvent, LifecycleManager,
    api::{FixedPicker, RequestHandler},
    config::TankerConfig,
    logger,
    probe::check_availability,
    runtime::docker_runtime,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, broadcast};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "tanker")]
#[command(about = "Template-based development environments on Docker Compose")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List available templates
    Templates {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// List registered environments
    #[command(alias = "ls")]
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Create an environment from a template
    Create {
        /// Display name
        #[arg(short, long)]
        name: String,
        /// Template id (see `tanker templates`)
        #[arg(short, long)]
        template: String,
        /// Project directory; created if missing
        #[arg(short, long)]
        path: PathBuf,
    },
    /// Start an environment and wait until it is up
    Start { id: Uuid },
    /// Stop an environment and wait until it is down
    Stop { id: Uuid },
    /// Delete an environment, stopping it first if needed
    #[command(alias = "rm")]
    Delete { id: Uuid },
    /// Check whether the container runtime is reachable
    CheckDocker {
        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Answer JSON requests on stdin, one per line
    Serve {
        /// Directory returned by select-project-directory (omit to report cancellation)
        #[arg(long)]
        project_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        unsafe {
            std::env::set_var("RUST_LOG", "tanker=debug");
        }
    }
    logger::init_logger();

    let config = load_config(cli.config.as_deref())?;
    let manager = LifecycleManager::from_config(&config)?;

    match cli.command {
        Commands::Templates { json } => {
            let templates = manager.list_templates();
            if json {
                println!("{}", serde_json::to_string_pretty(&templates)?);
                return Ok(());
            }

            println!("{:<18} {:<24} {:<24} {:<20}", "ID", "NAME", "SERVICES", "TAGS");
            println!("{}", "=".repeat(86));
            for template in &templates {
                let services: Vec<&str> =
                    template.services.iter().map(|s| s.name.as_str()).collect();
                println!(
                    "{:<18} {:<24} {:<24} {:<20}",
                    template.id,
                    template.name,
                    services.join(","),
                    template.tags.join(",")
                );
            }
        }
        Commands::List { json } => {
            let environments = manager.list_environments()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&environments)?);
                return Ok(());
            }

            if environments.is_empty() {
                println!("No environments. Create one with `tanker create`.");
                return Ok(());
            }
            println!(
                "{:<38} {:<20} {:<14} {:<10} {:<20}",
                "ID", "NAME", "TEMPLATE", "STATUS", "LAST USED"
            );
            println!("{}", "=".repeat(104));
            for env in &environments {
                println!(
                    "{:<38} {:<20} {:<14} {:<10} {:<20}",
                    env.id,
                    env.display_name(),
                    env.template_id,
                    env.status.to_string(),
                    env.last_used.format("%Y-%m-%d %H:%M:%S").to_string()
                );
            }
        }
        Commands::Create {
            name,
            template,
            path,
        } => {
            let project_path = absolute(&path)?;
            let env = manager
                .create(CreateEnvironment {
                    name,
                    template_id: template,
                    project_path,
                })
                .await?;
            println!("Environment '{}' created", env.name);
            println!("  id:       {}", env.id);
            println!("  template: {}", env.template_id);
            println!("  path:     {}", env.project_path.display());
        }
        Commands::Start { id } => {
            let mut events = manager.subscribe();
            let ack = manager.start(id).await?;
            println!("{}", ack.message);
            report(&await_update(&mut events, id).await?)?;
        }
        Commands::Stop { id } => {
            let mut events = manager.subscribe();
            let ack = manager.stop(id).await?;
            println!("{}", ack.message);
            report(&await_update(&mut events, id).await?)?;
        }
        Commands::Delete { id } => {
            let ack = manager.delete(id).await?;
            println!("{}", ack.message);
        }
        Commands::CheckDocker { json } => {
            let availability = check_availability(&docker_runtime(&config)).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&availability)?);
            } else {
                print!("{}", availability);
            }
        }
        Commands::Serve { project_dir } => {
            let picker = Arc::new(FixedPicker::new(project_dir));
            let docker = Arc::new(docker_runtime(&config));
            serve(RequestHandler::new(manager, picker, docker)).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<TankerConfig> {
    match path {
        Some(path) => TankerConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => match TankerConfig::default_path() {
            Some(default) => Ok(TankerConfig::load_or_default(default)?),
            None => {
                logger::warn!("No configuration directory on this system, using defaults");
                Ok(TankerConfig::default())
            }
        },
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to resolve the current directory")?;
    Ok(cwd.join(path))
}

/// Block until the transition for `id` reports back.
async fn await_update(
    events: &mut broadcast::Receiver<LifecycleEvent>,
    id: Uuid,
) -> Result<Environment> {
    loop {
        match events.recv().await {
            Ok(LifecycleEvent::EnvironmentUpdated { environment }) if environment.id == id => {
                return Ok(environment);
            }
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                logger::debug!("Skipped {} lifecycle events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => {
                bail!("Lifecycle events closed before environment {} settled", id)
            }
        }
    }
}

fn report(env: &Environment) -> Result<()> {
    match &env.last_error {
        Some(error) => bail!("Environment '{}' is in error: {}", env.name, error),
        None => {
            println!("Environment '{}' is {}", env.name, env.status);
            Ok(())
        }
    }
}

async fn serve(handler: RequestHandler) -> Result<()> {
    let stdout = Arc::new(Mutex::new(tokio::io::stdout()));

    let mut events = handler.manager().subscribe();
    let event_out = stdout.clone();
    let forwarder = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let line = match serde_json::to_string(&event) {
                        Ok(line) => line,
                        Err(e) => {
                            logger::error!("Failed to encode event: {}", e);
                            continue;
                        }
                    };
                    if write_line(&event_out, &line).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    logger::warn!("Event stream lagged, {} events dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    logger::info!("Serving requests on stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = handler.handle_line(&line).await?;
        write_line(&stdout, &reply).await?;
    }

    logger::info!("stdin closed, shutting down");
    forwarder.abort();
    Ok(())
}

async fn write_line(out: &Mutex<tokio::io::Stdout>, line: &str) -> std::io::Result<()> {
    let mut out = out.lock().await;
    out.write_all(line.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await
}
