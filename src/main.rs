//! Clusterforge - cluster provisioning from cloud VMs and edge devices
//!
//! This is the main CLI entry point for Clusterforge.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use clusterforge::config::ForgeConfig;
use clusterforge::model::{CloudCredential, ClusterRequest, EdgeDevice, Provider};
use clusterforge::provider::ProviderSet;
use clusterforge::provision::{Decommissioner, Orchestrator, ProvisionQueue, RunOutcome};
use clusterforge::remote::SshExecutor;
use clusterforge::store::{FileStore, StateStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Clusterforge - provision clusters from cloud VMs and edge devices
#[derive(Parser)]
#[command(name = "clusterforge")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Provision compute clusters and bootstrap cluster software over SSH", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Owning user for created records
    #[arg(long, global = true, default_value = "local")]
    owner: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage cloud credentials
    Credential {
        #[command(subcommand)]
        command: CredentialCommands,
    },

    /// Manage edge devices
    Edge {
        #[command(subcommand)]
        command: EdgeCommands,
    },

    /// Create a cluster from a request file and provision it
    Create {
        /// Cluster request (YAML)
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Provision (or resume provisioning of) a cluster
    Provision {
        /// Cluster ID
        cluster: String,
    },

    /// Show cluster and node status
    Status {
        /// Cluster ID
        cluster: String,
    },

    /// Tear down a cluster's machines
    Delete {
        /// Cluster ID
        cluster: String,
    },

    /// Provision every cluster still pending
    Resume,
}

#[derive(Subcommand)]
enum CredentialCommands {
    /// Store a credential
    Add {
        /// Provider (aws, gcp)
        #[arg(long)]
        provider: Provider,
        /// Default region
        #[arg(long)]
        region: String,
        /// Access key ID, or GCP access token
        #[arg(long, required_unless_present = "access_key_file")]
        access_key: Option<String>,
        /// Read the access key from a file (GCP service-account JSON)
        #[arg(long, conflicts_with = "access_key")]
        access_key_file: Option<PathBuf>,
        /// AWS secret access key
        #[arg(long)]
        secret_key: Option<String>,
        /// GCP project
        #[arg(long)]
        project_id: Option<String>,
    },

    /// List credentials
    #[command(alias = "ls")]
    List,
}

#[derive(Subcommand)]
enum EdgeCommands {
    /// Register a device
    Add {
        /// Device name
        #[arg(long)]
        name: String,
        /// Reachable address
        #[arg(long)]
        ip: String,
        /// Login account
        #[arg(long, default_value = "root")]
        user: String,
    },

    /// List devices
    #[command(alias = "ls")]
    List,
}

fn init_logging(debug: bool, config: &ForgeConfig) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn orchestrator(config: &ForgeConfig, store: Arc<dyn StateStore>) -> Result<Arc<Orchestrator>> {
    let executor = Arc::new(SshExecutor::new(&config.ssh));
    let orchestrator = Orchestrator::from_config(config, store, executor)
        .context("failed to set up provisioning")?;
    Ok(Arc::new(orchestrator))
}

fn print_outcomes(outcomes: &[RunOutcome]) -> Result<()> {
    let mut aborted = 0;
    for outcome in outcomes {
        match &outcome.result {
            Ok(report) => println!("{}", report),
            Err(e) => {
                aborted += 1;
                eprintln!("cluster {}: provisioning aborted: {}", outcome.cluster_id, e);
            }
        }
    }
    if aborted > 0 {
        bail!("{} provisioning run(s) aborted", aborted);
    }
    Ok(())
}

async fn print_status(store: &FileStore, cluster_id: &str) -> Result<()> {
    let snapshot = store.load_cluster(cluster_id).await?;
    let cluster = &snapshot.cluster;

    println!("Cluster:  {} ({})", cluster.name, cluster.id);
    println!("Software: {}", cluster.software);
    println!("Status:   {}", cluster.status);
    if let Some(stage) = cluster.provision_stage {
        println!("Stage:    {}", stage);
    }
    println!();
    println!(
        "{:<24} {:<6} {:<13} {:<7} {:<22} {:<16} {}",
        "NAME", "SOURCE", "STATUS", "MASTER", "MACHINE ID", "PUBLIC IP", "ERROR"
    );
    for node in &snapshot.nodes {
        println!(
            "{:<24} {:<6} {:<13} {:<7} {:<22} {:<16} {}",
            node.name,
            node.provider.to_string(),
            node.status.to_string(),
            if node.is_master { "yes" } else { "no" },
            node.machine_id.as_deref().unwrap_or("-"),
            node.public_ip.as_deref().unwrap_or("-"),
            node.last_error.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ForgeConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    init_logging(cli.debug, &config);

    let store = Arc::new(
        FileStore::open(&config.state_dir)
            .await
            .with_context(|| format!("failed to open state at {}", config.state_dir.display()))?,
    );

    match cli.command {
        Commands::Credential { command } => match command {
            CredentialCommands::Add {
                provider,
                region,
                access_key,
                access_key_file,
                secret_key,
                project_id,
            } => {
                if !provider.is_cloud() {
                    bail!("credentials are only used by cloud providers");
                }
                let access_key = match (access_key, access_key_file) {
                    (Some(key), _) => key,
                    (None, Some(path)) => std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?,
                    (None, None) => bail!("--access-key or --access-key-file is required"),
                };

                let mut credential = CloudCredential::new(&cli.owner, provider, &region, &access_key);
                if let Some(secret) = secret_key {
                    credential = credential.secret_key(&secret);
                }
                if let Some(project) = project_id {
                    credential = credential.project_id(&project);
                }
                let id = credential.id.clone();
                store.insert_credential(credential).await?;
                println!("{}", id);
            }
            CredentialCommands::List => {
                println!("{:<38} {:<8} {:<16} {}", "CREDENTIAL ID", "PROVIDER", "REGION", "PROJECT");
                for c in store.credentials().await {
                    println!(
                        "{:<38} {:<8} {:<16} {}",
                        c.id,
                        c.provider.to_string(),
                        c.region,
                        c.project_id.as_deref().unwrap_or("-")
                    );
                }
            }
        },

        Commands::Edge { command } => match command {
            EdgeCommands::Add { name, ip, user } => {
                let device = EdgeDevice::new(&cli.owner, &name, &ip, &user);
                let id = device.id.clone();
                store.insert_edge_device(device).await?;
                println!("{}", id);
            }
            EdgeCommands::List => {
                println!("{:<38} {:<20} {:<16} {}", "DEVICE ID", "NAME", "ADDRESS", "USER");
                for d in store.edge_devices().await {
                    println!("{:<38} {:<20} {:<16} {}", d.id, d.name, d.ip_address, d.ssh_user);
                }
            }
        },

        Commands::Create { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let request = ClusterRequest::from_yaml(&content)?;
            let (cluster, nodes) = request.build(&cli.owner, &store.edge_devices().await)?;
            let cluster_id = cluster.id.clone();
            store.insert_cluster(cluster, nodes).await?;
            println!("Cluster {} created, provisioning started", cluster_id);

            let queue = ProvisionQueue::start(orchestrator(&config, store.clone())?);
            queue.enqueue(&cluster_id).await?;
            print_outcomes(&queue.drain().await?)?;
        }

        Commands::Provision { cluster } => {
            let queue = ProvisionQueue::start(orchestrator(&config, store.clone())?);
            queue.enqueue(&cluster).await?;
            print_outcomes(&queue.drain().await?)?;
        }

        Commands::Status { cluster } => {
            print_status(&store, &cluster).await?;
        }

        Commands::Delete { cluster } => {
            let decommissioner = Decommissioner::new(store.clone(), ProviderSet::from_config(&config)?);
            let report = decommissioner.decommission(&cluster).await?;
            println!("Released {} machine(s) of cluster {}", report.released, report.cluster_id);
            for (node, reason) in &report.failures {
                eprintln!("  {}: {}", node, reason);
            }
        }

        Commands::Resume => {
            let queue = ProvisionQueue::start(orchestrator(&config, store.clone())?);
            let queued = queue.recover_pending().await?;
            println!("Resuming {} pending cluster(s)", queued);
            print_outcomes(&queue.drain().await?)?;
        }
    }

    Ok(())
}
