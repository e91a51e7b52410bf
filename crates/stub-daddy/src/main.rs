use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stub_daddy::api::{DefaultValidator, PayloadValidator};
use stub_daddy::config::Config;
use stub_daddy::dispatch::{DispatchContext, DispatchServer};
use stub_daddy::engine::StubEngine;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "stub-daddy", about = "HTTP stub daemon for test fixtures")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = "STUB_DADDY_CONFIG")]
    config: Option<PathBuf>,
    /// Listen port; overrides the config file.
    #[arg(short, long, env = "STUB_DADDY_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(port) = args.port {
        config.listen.port = port;
    }
    config.validate()?;

    let validator: Arc<dyn PayloadValidator> = Arc::new(DefaultValidator);
    let engine = Arc::new(StubEngine::new(&config.matching));

    if let Some(path) = &config.seed_stubs {
        let seeded = seed_stubs(path, &engine, validator.as_ref())
            .with_context(|| format!("failed to seed stubs from {}", path.display()))?;
        info!(count = seeded, "seeded stubs from {}", path.display());
    }

    let addr: SocketAddr = format!("{}:{}", config.listen.host, config.listen.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                config.listen.host, config.listen.port
            )
        })?;

    let ctx = Arc::new(DispatchContext {
        engine,
        validator,
        management_prefix: config.management_prefix.clone(),
    });
    let server = DispatchServer::bind(addr, ctx).await?;
    info!(
        "management plane at http://{}{}",
        server.local_addr()?,
        config.management_prefix
    );

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("shutting down");
            Ok(())
        }
    }
}

/// Register stub payloads from a YAML/JSON file at startup. Each entry goes
/// through the same validator as a live registration; the first invalid
/// entry aborts startup.
fn seed_stubs(
    path: &Path,
    engine: &StubEngine,
    validator: &dyn PayloadValidator,
) -> Result<usize, anyhow::Error> {
    let contents = std::fs::read_to_string(path)?;
    let payloads: Vec<serde_json::Value> = serde_yaml::from_str(&contents)?;

    for (index, payload) in payloads.iter().enumerate() {
        validator.validate(payload).map_err(|failure| {
            let detail = failure
                .errors
                .iter()
                .map(|e| e.message.clone())
                .collect::<Vec<_>>()
                .join("; ");
            anyhow::anyhow!("seed stub {index} is invalid: {detail}")
        })?;
        let spec = serde_json::from_value(payload.clone())
            .with_context(|| format!("seed stub {index} is malformed"))?;
        engine
            .register(spec)
            .with_context(|| format!("seed stub {index} was rejected"))?;
    }

    Ok(payloads.len())
}
