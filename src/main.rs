use clap::{Parser, Subcommand};
use site_router::{deploy, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "site_router")]
#[command(version)]
#[command(about = "Route a subdomain through a public load balancer to a private S3 endpoint", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Default, Clone, Copy, Debug, PartialEq)]
enum Command {
    /// Write the template and manifest to router.out/
    #[default]
    Synth,
    /// Synthesize, deploy the stack, then upload ./site into the bucket
    Deploy,
    /// Delete the stack
    Destroy,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // nothing touches AWS or the filesystem until the environment is complete
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };
    let sdk_config = deploy::load_sdk_config(&config).await;
    let res = match cli.command.unwrap_or_default() {
        Command::Synth => deploy::synth(&config, &sdk_config).await,
        Command::Deploy => deploy::deploy(&config, &sdk_config).await.map(|_| ()),
        Command::Destroy => deploy::destroy(&sdk_config).await,
    };
    if let Err(e) = res {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
