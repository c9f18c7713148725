use clap::Parser;
use tracing_subscriber::EnvFilter;
use vat_player::cli::CliArgs;
use vat_player::config::AppConfig;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = CliArgs::parse();
    let mut config = AppConfig::load_or_default(&args.config);
    let overrides = args.into_config_overrides();
    if !overrides.is_empty() {
        tracing::info!(fields = ?overrides.applied_fields(), "applying command-line overrides");
    }
    config.apply_overrides(&overrides);

    if let Err(err) = vat_player::run(config) {
        tracing::error!("Application error: {err:?}");
        std::process::exit(1);
    }
}
