use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
    time::Duration,
};

use ::tracing::{error, info, info_span, warn};
use anyhow::{anyhow, Result};
use blob_store::BlobStorageConfig;
use clap::{Parser, Subcommand};
use config::ServerConfig;
use registry::ServerRegistry;
use service::{dump_registry, Service};

mod client;
mod config;
mod http_objects;
mod middleware;
mod proxy;
mod registry;
mod replication;
mod routes;
mod service;
mod tracing;
use tracing::setup_tracing;

#[cfg(test)]
mod testing;

#[derive(Parser)]
#[command(version, about = "Content-addressed object storage", long_about = None)]
struct Cli {
    #[arg(
        short,
        long,
        global = true,
        value_name = "config file",
        help = "Path to config file"
    )]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve objects from local storage.
    BlobServer {
        #[arg(long, help = "Address to listen on")]
        host: Option<String>,
        #[arg(long, help = "Port to listen on")]
        port: Option<u16>,
        #[arg(long, value_name = "dir", help = "Storage directory, or memory://")]
        store: Option<String>,
    },
    /// Accept uploads and serve downloads on behalf of the blob-servers.
    ApiServer {
        #[arg(long, help = "Address to listen on")]
        api_host: Option<String>,
        #[arg(
            long,
            value_name = "locations",
            help = "Comma-separated blob-server URLs added to the default group"
        )]
        blob_server: Option<String>,
        #[arg(long)]
        upload_port: Option<u16>,
        #[arg(long)]
        download_port: Option<u16>,
        #[arg(long, help = "Print the blob-server registry and exit")]
        dump: bool,
        #[arg(short, long)]
        verbose: bool,
    },
    /// Copy objects between the members of each group.
    Replicate {
        #[arg(
            long,
            value_name = "locations",
            help = "Comma-separated blob-server URLs added to the default group"
        )]
        blob_server: Option<String>,
        #[arg(short, long)]
        verbose: bool,
        #[arg(long, help = "Repeat the pass every N seconds until interrupted")]
        interval_secs: Option<u64>,
    },
    /// Print version information.
    Version {
        #[arg(short, long)]
        verbose: bool,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::BlobServer { .. } => "blob-server",
            Command::ApiServer { .. } => "api-server",
            Command::Replicate { .. } => "replicate",
            Command::Version { .. } => "version",
        }
    }

    /// Command-line flags win over the config file.
    fn apply_overrides(&self, config: &mut ServerConfig) {
        match self {
            Command::BlobServer { host, port, store } => {
                if let Some(host) = host {
                    config.blob_server.host = host.clone();
                }
                if let Some(port) = port {
                    config.blob_server.port = *port;
                }
                if let Some(store) = store {
                    config.blob_storage = BlobStorageConfig::new(store);
                }
            }
            Command::ApiServer {
                api_host,
                upload_port,
                download_port,
                ..
            } => {
                if let Some(host) = api_host {
                    config.api_server.host = host.clone();
                }
                if let Some(port) = upload_port {
                    config.api_server.upload_port = *port;
                }
                if let Some(port) = download_port {
                    config.api_server.download_port = *port;
                }
            }
            Command::Replicate { .. } | Command::Version { .. } => {}
        }
    }
}

fn print_version(verbose: bool) {
    println!("sos {}", env!("CARGO_PKG_VERSION"));
    if verbose {
        println!(
            "Built with rustc {} ({})",
            env!("VERGEN_RUSTC_SEMVER"),
            env!("VERGEN_BUILD_TIMESTAMP")
        );
    }
}

fn load_config(path: Option<&Path>) -> (ServerConfig, Option<anyhow::Error>) {
    let Some(path) = path else {
        return (ServerConfig::default(), None);
    };
    let loaded = path
        .to_str()
        .ok_or_else(|| anyhow!("config path is not valid UTF-8: {}", path.display()))
        .and_then(ServerConfig::from_path);
    match loaded {
        Ok(config) => (config, None),
        Err(e) => (ServerConfig::default(), Some(e)),
    }
}

/// Each role validates only the settings it binds, after `--dump` has had
/// its chance to run.
async fn run(command: Command, config: ServerConfig) -> Result<()> {
    match command {
        Command::BlobServer { .. } => {
            config.validate_blob_server()?;
            Service::new(config).start_blob_server().await
        }
        Command::ApiServer {
            blob_server,
            dump,
            verbose,
            ..
        } => {
            let registry = ServerRegistry::from_sources(&config.servers, blob_server.as_deref());
            if dump {
                print!("{}", dump_registry(&registry)?);
                return Ok(());
            }
            config.validate_api_server()?;
            Service::new(config)
                .start_api_server(Arc::new(registry), verbose)
                .await
        }
        Command::Replicate {
            blob_server,
            verbose,
            interval_secs,
        } => {
            let registry = ServerRegistry::from_sources(&config.servers, blob_server.as_deref());
            let interval = interval_secs.filter(|s| *s > 0).map(Duration::from_secs);
            Service::new(config)
                .replicate(Arc::new(registry), verbose, interval)
                .await?;
            Ok(())
        }
        Command::Version { verbose } => {
            print_version(verbose);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Command::Version { verbose } = cli.command {
        print_version(verbose);
        return ExitCode::SUCCESS;
    }

    let (mut config, config_error) = load_config(cli.config.as_deref());
    cli.command.apply_overrides(&mut config);

    let tracing_provider = match setup_tracing(&config) {
        Ok(provider) => provider,
        Err(e) => {
            eprintln!("Error setting up tracing: {:?}", e);
            None
        }
    };
    if let Some(e) = config_error {
        warn!("error reading config file, using defaults: {:?}", e);
    }

    let meter_provider = if config.telemetry.enable_metrics {
        metrics::init_provider(config.telemetry.endpoint.as_deref())
            .inspect_err(|e| error!("Error setting up metrics: {:?}", e))
            .ok()
    } else {
        None
    };

    let command_name = cli.command.name();
    let root_span = info_span!("sos", env = config.env, command = command_name);
    let _guard = root_span.enter();

    let result = run(cli.command, config).await;
    let exit_code = match &result {
        Ok(()) => {
            info!("{} finished", command_name);
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{} failed: {:?}", command_name, err);
            ExitCode::FAILURE
        }
    };

    // export telemetry before shutdown
    if let Some(meter_provider) = meter_provider {
        if let Err(err) = meter_provider.shutdown() {
            error!("Error shutting down meter provider: {:?}", err);
        }
    }
    if let Some(tracer_provider) = tracing_provider {
        if let Err(err) = tracer_provider.force_flush() {
            error!("Error flushing traces: {:?}", err);
        }
        if let Err(err) = tracer_provider.shutdown() {
            error!("Error shutting down tracer provider: {:?}", err);
        }
    }
    exit_code
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflicting_ports() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.api_server.upload_port = 9992;
        config.api_server.download_port = 9992;
        config
    }

    #[tokio::test]
    async fn test_dump_ignores_listener_settings() {
        let command = Command::ApiServer {
            api_host: None,
            blob_server: Some("http://127.0.0.1:1".to_string()),
            upload_port: Some(9992),
            download_port: None,
            dump: true,
            verbose: false,
        };
        let mut config = ServerConfig::default();
        command.apply_overrides(&mut config);
        assert!(config.validate_api_server().is_err());
        run(command, config).await.unwrap();
    }

    #[tokio::test]
    async fn test_api_server_rejects_conflicting_ports() {
        let command = Command::ApiServer {
            api_host: None,
            blob_server: None,
            upload_port: None,
            download_port: None,
            dump: false,
            verbose: false,
        };
        let err = run(command, conflicting_ports()).await.unwrap_err();
        assert!(err.to_string().contains("ports must differ"));
    }

    #[tokio::test]
    async fn test_replicate_ignores_api_server_settings() {
        let mut config = conflicting_ports();
        config.blob_storage = BlobStorageConfig::new("s3://bucket");
        let command = Command::Replicate {
            blob_server: None,
            verbose: false,
            interval_secs: None,
        };
        run(command, config).await.unwrap();
    }

    #[test]
    fn test_load_config_keeps_file_with_unusable_storage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "servers:\n  east:\n    - http://10.0.0.1:3001\nblob_storage:\n  path: s3://bucket\n",
        )
        .unwrap();

        let (config, error) = load_config(Some(path.as_path()));
        assert!(error.is_none());
        assert_eq!(config.servers["east"].len(), 1);

        let (config, error) = load_config(Some(dir.path().join("missing.yaml").as_path()));
        assert!(error.is_some());
        assert!(config.servers.is_empty());
    }
}
