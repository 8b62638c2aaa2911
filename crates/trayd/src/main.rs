use anyhow::{Context, Result};
use sni_host::config::TrayConfig;

mod client;
mod headless;
mod opts;
mod paths;

fn main() {
    let opts: opts::Opt = opts::Opt::from_env();

    let log_level_filter = if opts.log_debug { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    if std::env::var("RUST_LOG").is_ok() {
        pretty_env_logger::init_timed();
    } else {
        pretty_env_logger::formatted_timed_builder()
            .filter(Some("trayd"), log_level_filter)
            .filter(Some("sni_host"), log_level_filter)
            .init();
    }

    if let Err(err) = run(opts) {
        eprintln!("Error: {:?}", err);
        std::process::exit(1);
    }
}

fn run(opts: opts::Opt) -> Result<()> {
    let config_path = match opts.config_path {
        Some(path) => path,
        None => paths::default_config_file().context("Failed to find the configuration file")?,
    };
    let config = TrayConfig::load(&config_path)
        .with_context(|| format!("Failed to load the configuration from {}", config_path.display()))?;
    log::debug!("using configuration {:?}", config);

    let rt = tokio::runtime::Builder::new_current_thread()
        .thread_name("trayd")
        .enable_all()
        .build()
        .context("Failed to initialize tokio runtime")?;
    rt.block_on(client::run(opts.action, config))
}
