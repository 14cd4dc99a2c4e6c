use switchboard::cli::{commands, output::Output, Cli};
use switchboard::utils::{LogFormat, SwitchboardConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(config: &SwitchboardConfig, verbose: bool) {
    let default_level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("switchboard={},warn", default_level)));

    let registry = tracing_subscriber::registry().with(filter);
    match config.logging.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse_args();
    let output = if cli.no_color {
        Output::no_color()
    } else {
        Output::new()
    };

    let config = match commands::load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            output.error(&format!("{:#}", e));
            std::process::exit(2);
        }
    };
    init_tracing(&config, cli.verbose);

    if let Err(e) = commands::run(cli, config, &output).await {
        output.error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}
