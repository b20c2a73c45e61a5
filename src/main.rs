//! kinder - local Kubernetes development environments with private trust

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kinder::commands::components::{self, ArtifactSet};
use kinder::commands::environment::StartOptions;
use kinder::commands::{self, ca, diagnostics, environment, settings, Overrides};
use kinder::config::KinderConfig;
use kinder::orchestrator::Component;

/// kinder - local Kubernetes development environments with private trust
#[derive(Parser, Debug)]
#[command(name = "kinder", version, about, long_about = None)]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/kinder/config.yaml)
    #[arg(long, global = true, env = "KINDER_CONFIG")]
    config: Option<PathBuf>,

    /// Prefix for container names and the cluster name
    #[arg(long, global = true, env = "KINDER_APP_NAME")]
    app_name: Option<String>,

    /// Directory for generated certificates and service configs
    #[arg(long, global = true, env = "KINDER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Base domain routed by the proxy
    #[arg(long, global = true, env = "KINDER_DOMAIN")]
    domain: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Warnings and errors only
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bring up the CA, registry, dashboard, proxy, cluster and ArgoCD
    Start(StartArgs),

    /// Tear down the cluster and every service container
    Stop {
        /// Leave the container network in place
        #[arg(long)]
        keep_network: bool,
    },

    /// Stop (keeping the network) and start again
    Restart(StartArgs),

    /// Show CA validity, network, containers, cluster and endpoints
    Status,

    /// Remove the data directory; containers must be stopped first
    Clean,

    /// Manage the root CA
    #[command(subcommand)]
    Ca(CaCommands),

    /// Inspect the configuration
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Step CA container
    #[command(subcommand)]
    Stepca(ServiceCommands),

    /// Zot registry container
    #[command(subcommand)]
    Zot(ServiceCommands),

    /// Gatus dashboard container
    #[command(subcommand)]
    Gatus(ServiceCommands),

    /// Traefik proxy container
    #[command(subcommand)]
    Traefik(ServiceCommands),

    /// Container network
    #[command(subcommand)]
    Network(NetworkCommands),

    /// kind cluster
    #[command(subcommand)]
    Kind(KindCommands),

    /// Root CA bundle and trust-manager artifacts
    #[command(subcommand)]
    TrustBundle(ArtifactCommands),

    /// cert-manager ClusterIssuer artifact
    #[command(subcommand)]
    CertIssuer(ArtifactCommands),

    /// ArgoCD in the kind cluster
    #[command(subcommand)]
    Argocd(ArgocdCommands),

    /// Check connectivity, containers, endpoints and registry pulls
    Diagnostics,
}

/// Start and restart arguments
#[derive(Args, Debug)]
struct StartArgs {
    /// Skip the ArgoCD bootstrap
    #[arg(long)]
    no_argocd: bool,

    /// Do not append public CAs to the trust bundle
    #[arg(long)]
    no_public_cas: bool,
}

impl From<&StartArgs> for StartOptions {
    fn from(args: &StartArgs) -> Self {
        StartOptions {
            no_argocd: args.no_argocd,
            no_public_cas: args.no_public_cas,
        }
    }
}

#[derive(Subcommand, Debug)]
enum CaCommands {
    /// Generate the root CA
    Generate {
        /// Replace an existing CA
        #[arg(long)]
        force: bool,
    },
    /// Print details of the root CA
    Show,
    /// Print the root CA certificate path
    Path,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Print the config file path
    Path,
    /// Write a config file with the defaults
    Init {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ServiceCommands {
    /// Create or start the container
    Start,
    /// Stop and remove the container
    Stop,
}

#[derive(Subcommand, Debug)]
enum NetworkCommands {
    /// Create the network
    Create,
    /// Remove the network
    Remove,
}

#[derive(Subcommand, Debug)]
enum KindCommands {
    /// Create the cluster against the existing root CA
    Start,
    /// Delete the cluster
    Stop,
    /// Show the cluster and its nodes
    Status,
    /// Print the kubeconfig
    Kubeconfig,
}

#[derive(Subcommand, Debug)]
enum ArtifactCommands {
    /// Build and push to the local registry
    Push,
    /// Print the files that would be pushed
    Show,
}

#[derive(Subcommand, Debug)]
enum ArgocdCommands {
    /// Install ArgoCD into the running cluster
    Bootstrap,
    /// Print the manifests bootstrap applies
    Show,
    /// Print the initial admin password
    Password,
}

async fn service(config: &KinderConfig, component: Component, command: &ServiceCommands) -> anyhow::Result<()> {
    let backends = commands::backends(config)?;
    match command {
        ServiceCommands::Start => components::start_service(config, backends, component).await?,
        ServiceCommands::Stop => components::stop_service(config, backends, component).await?,
    }
    Ok(())
}

async fn artifacts(config: &KinderConfig, set: ArtifactSet, command: &ArtifactCommands) -> anyhow::Result<()> {
    let backends = commands::backends(config)?;
    match command {
        ArtifactCommands::Push => {
            for url in components::push(config, backends, set).await? {
                println!("{}", url);
            }
        }
        ArtifactCommands::Show => {
            let artifacts = components::artifacts(config, backends, set).await?;
            print!("{}", components::render_artifacts(&artifacts));
        }
    }
    Ok(())
}

fn init_tracing(cli: &Cli) {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    if let Commands::Config(ConfigCommands::Init { force }) = &cli.command {
        let path = settings::init(cli.config.as_deref(), *force)?;
        println!("{}", path.display());
        return Ok(());
    }

    let (mut config, source) = KinderConfig::load(cli.config.as_deref())?;
    Overrides {
        app_name: cli.app_name.clone(),
        data_dir: cli.data_dir.clone(),
        domain: cli.domain.clone(),
    }
    .apply(&mut config);
    config.validate()?;

    match &cli.command {
        Commands::Start(args) => {
            environment::start(&config, commands::backends(&config)?, args.into()).await?
        }
        Commands::Stop { keep_network } => {
            environment::stop(&config, commands::backends(&config)?, *keep_network).await?
        }
        Commands::Restart(args) => {
            environment::restart(&config, commands::backends(&config)?, args.into()).await?
        }
        Commands::Status => environment::status(&config, commands::backends(&config)?).await?,
        Commands::Clean => environment::clean(&config, commands::backends(&config)?).await?,
        Commands::Ca(CaCommands::Generate { force }) => {
            let info = ca::generate(&config, *force)?;
            print!("{}", ca::render(&info));
        }
        Commands::Ca(CaCommands::Show) => print!("{}", ca::render(&ca::load(&config)?)),
        Commands::Ca(CaCommands::Path) => println!("{}", config.ca_cert_path()?.display()),
        Commands::Config(ConfigCommands::Show) => {
            print!("{}", settings::show(&config, source.as_deref())?)
        }
        Commands::Config(ConfigCommands::Path) => {
            println!("{}", settings::path(cli.config.as_deref())?.display())
        }
        Commands::Config(ConfigCommands::Init { .. }) => {}
        Commands::Stepca(command) => service(&config, Component::StepCa, command).await?,
        Commands::Zot(command) => service(&config, Component::Zot, command).await?,
        Commands::Gatus(command) => service(&config, Component::Gatus, command).await?,
        Commands::Traefik(command) => service(&config, Component::Traefik, command).await?,
        Commands::Network(NetworkCommands::Create) => {
            components::create_network(&config, commands::backends(&config)?).await?
        }
        Commands::Network(NetworkCommands::Remove) => {
            components::remove_network(&config, commands::backends(&config)?).await?
        }
        Commands::Kind(KindCommands::Start) => {
            components::start_kind(&config, commands::backends(&config)?).await?
        }
        Commands::Kind(KindCommands::Stop) => {
            components::stop_kind(&config, commands::backends(&config)?).await?
        }
        Commands::Kind(KindCommands::Status) => {
            print!("{}", components::kind_status(&config, commands::backends(&config)?).await?)
        }
        Commands::Kind(KindCommands::Kubeconfig) => {
            print!("{}", components::kubeconfig(&config, commands::backends(&config)?).await?)
        }
        Commands::TrustBundle(command) => artifacts(&config, ArtifactSet::TrustBundle, command).await?,
        Commands::CertIssuer(command) => artifacts(&config, ArtifactSet::CertIssuer, command).await?,
        Commands::Argocd(ArgocdCommands::Bootstrap) => {
            components::bootstrap_argocd(&config, commands::backends(&config)?).await?
        }
        Commands::Argocd(ArgocdCommands::Show) => print!("{}", components::preview_argocd(&config)?),
        Commands::Argocd(ArgocdCommands::Password) => println!(
            "{}",
            components::argocd_password(&config, commands::backends(&config)?).await?
        ),
        Commands::Diagnostics => {
            diagnostics::run(&config, commands::backends(&config)?, diagnostics::tools(&config)?).await?
        }
    }

    Ok(())
}
