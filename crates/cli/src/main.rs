mod doctor_commands;
mod sign_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    nexza_config::NexzaConfig,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "nexza", about = "Nexza: multi-channel AI relay", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to load instead of searching the standard locations.
    #[arg(long, global = true, env = "NEXZA_CONFIG")]
    config: Option<PathBuf>,

    // Gateway arguments (used when no subcommand is provided, or with `gateway` subcommand)
    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server (default when no subcommand is provided).
    Gateway,
    /// Validate the configuration and report errors/warnings.
    Doctor {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
    /// Print the telephony webhook signature for a URL and form parameters.
    Sign(sign_commands::SignArgs),
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// File (explicit or discovered), then environment, then CLI flags.
fn load_config(cli: &Cli) -> anyhow::Result<NexzaConfig> {
    let mut config = match cli.config {
        Some(ref path) => nexza_config::load_config(path)?,
        None => nexza_config::discover_and_load(),
    };
    nexza_config::apply_env_overrides(&mut config)?;

    if let Some(ref bind) = cli.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    let config = load_config(&cli)?;

    match cli.command {
        // Default: start gateway when no subcommand is provided
        None | Some(Commands::Gateway) => {
            info!(version = env!("CARGO_PKG_VERSION"), "nexza starting");
            let report = nexza_config::validate::validate(&config);
            if report.has_errors() {
                doctor_commands::print_diagnostics(&report, false);
                anyhow::bail!("configuration has errors; run `nexza doctor` for details");
            }
            nexza_gateway::start_gateway(config).await
        },
        Some(Commands::Doctor { verbose }) => {
            doctor_commands::run(&config, cli.config.as_deref(), verbose)
        },
        Some(Commands::Sign(args)) => sign_commands::run(&config, &args),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, clap::CommandFactory, std::io::Write};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn gateway_is_the_default_command() {
        let cli = Cli::try_parse_from(["nexza", "--port", "8080"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.port, Some(8080));
    }

    #[test]
    fn flags_override_config_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[server]\nbind = \"10.1.2.3\"\nport = 5500").unwrap();
        let path = file.path().to_str().unwrap();

        let cli = Cli::try_parse_from(["nexza", "gateway", "--config", path, "--port", "7000"])
            .unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.server.bind, "10.1.2.3");
        assert_eq!(config.server.port, 7000);

        let cli = Cli::try_parse_from(["nexza", "--config", path, "--bind", "0.0.0.0"]).unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.server.port, 5500);
    }

    #[test]
    fn sign_collects_repeated_params() {
        let cli = Cli::try_parse_from([
            "nexza",
            "sign",
            "--url",
            "https://example.com/twilio/sms",
            "--param",
            "From=+15550001111",
            "--param",
            "Body=hi there",
        ])
        .unwrap();
        let Some(Commands::Sign(args)) = cli.command else {
            panic!("expected sign");
        };
        assert_eq!(args.params, vec![
            ("From".to_string(), "+15550001111".to_string()),
            ("Body".to_string(), "hi there".to_string()),
        ]);
    }
}
