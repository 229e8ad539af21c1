// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

mod config;
mod runtime;
mod worker;

use anyhow::{Context, Result, anyhow};
use chatsweep_api::Client;
use config::Config;
use runtime::{DatabaseConnector, ThreadSleeper};
use std::env;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use worker::{Connector, Worker};

fn main() {
    if let Err(error) = run() {
        eprintln!("{error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = parse_cli_args(env::args().skip(1), Config::default_path()?)?;
    if options.show_help {
        print_help();
        return Ok(());
    }

    if options.print_config_path {
        println!("{}", options.config_path.display());
        return Ok(());
    }

    if options.print_example {
        print!("{}", Config::example_config(&options.config_path));
        return Ok(());
    }

    let config = Config::load(&options.config_path).with_context(|| {
        format!(
            "load config {}; run `chatsweep --print-example-config` to generate a template",
            options.config_path.display()
        )
    })?;
    init_tracing(config.log_level());
    info!(
        config = %options.config_path.display(),
        version = env!("CARGO_PKG_VERSION"),
        "chatsweep starting"
    );

    let secrets = config.secrets();
    secrets.log_summary();

    let client_options = config.client_options(secrets.api_key.clone())?;
    let client = Client::new(client_options).with_context(|| {
        format!(
            "invalid [api] config in {}; fix base_url/timeout/max_pages values",
            options.config_path.display()
        )
    })?;
    let mut connector = DatabaseConnector::new(secrets.database_url.clone(), config.schema());

    if options.check_only {
        let gateway = connector.connect().context(
            "database check failed -- set DB_URL or [database].url to a reachable database",
        )?;
        gateway.close()?;
        info!(api = client.base_url(), "configuration, database and API client look good");
        return Ok(());
    }

    let mut worker = Worker::new(connector, client, ThreadSleeper, config.pacing()?);
    if options.once {
        let report = worker.run_cycle()?;
        info!(?report, "single cycle finished");
        return Ok(());
    }

    worker.run(None);
    Ok(())
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliOptions {
    config_path: PathBuf,
    print_config_path: bool,
    print_example: bool,
    check_only: bool,
    once: bool,
    show_help: bool,
}

fn parse_cli_args<I, S>(args: I, default_config_path: PathBuf) -> Result<CliOptions>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut options = CliOptions {
        config_path: default_config_path,
        print_config_path: false,
        print_example: false,
        check_only: false,
        once: false,
        show_help: false,
    };

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_ref() {
            "--config" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("--config requires a file path"))?;
                options.config_path = PathBuf::from(value.as_ref());
            }
            "--print-config-path" => {
                options.print_config_path = true;
            }
            "--print-example-config" => {
                options.print_example = true;
            }
            "--check" => {
                options.check_only = true;
            }
            "--once" => {
                options.once = true;
            }
            "--help" | "-h" => {
                options.show_help = true;
            }
            unknown => {
                return Err(anyhow!(
                    "unknown argument {unknown:?}; run with --help to see supported options"
                ));
            }
        }
    }

    Ok(options)
}

fn print_help() {
    println!("chatsweep - closes stale support chats and records each close");
    println!("  --config <path>          Use a specific config path");
    println!("  --print-config-path      Print resolved config path");
    println!("  --print-example-config   Print a config template");
    println!("  --check                  Validate config, connect to the database, then exit");
    println!("  --once                   Run a single cycle and exit");
    println!("  --help                   Show this help");
    println!();
    println!("Environment: DB_URL and API_KEY override the config file; RUST_LOG overrides [log].level.");
}
