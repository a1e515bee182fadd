// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use env_logger::{Target, WriteStyle};
use log::{debug, error, LevelFilter};

use upsguard::config::{Config, ConfigError};
use upsguard::events::{Event, EventCode, EventSink, LogSink};
use upsguard::service;

#[derive(Parser, Debug)]
#[command(name = "upsguard", version)]
#[command(about = "Shuts the host down when its UPS runs low, using a NUT server")]
struct Cli {
    /// Path to config.json (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Append log output to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Monitor the UPS until stopped
    Run {
        /// Log the shutdown command instead of running it
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate the configuration and print it
    CheckConfig,
    /// Print the current variables of the configured UPS
    Status {
        /// Print only this variable, e.g. battery.runtime
        #[arg(long)]
        var: Option<String>,
    },
}

fn init_logging(cli: &Cli) -> io::Result<()> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
    // RUST_LOG wins over the flags
    builder.parse_default_env();

    if let Some(path) = &cli.log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(Target::Pipe(Box::new(file)));
        builder.write_style(WriteStyle::Never);
    }

    builder.init();
    Ok(())
}

fn load_config(path: Option<&Path>, sink: &mut dyn EventSink) -> Result<Config, ConfigError> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => Config::default_path()?,
    };
    debug!("Loading configuration from {}", path.display());
    let config = Config::load(&path)?;
    sink.report(&Event::info(
        EventCode::Lifecycle,
        format!("Config loaded successfully from {}", path.display()),
    ));
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli) {
        eprintln!("Cannot open log file: {e}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(cli.config.as_deref(), &mut LogSink) {
        Ok(config) => config,
        Err(e) => {
            LogSink.report(&Event::error(
                EventCode::ConfigFailed,
                format!("Failed to load configuration: {e}"),
            ));
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Run { dry_run } => {
            service::run(&config, dry_run).await;
            ExitCode::SUCCESS
        }
        Command::CheckConfig => match serde_json::to_string_pretty(&config.redacted()) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Cannot print configuration: {}", e);
                ExitCode::FAILURE
            }
        },
        Command::Status { var: Some(name) } => {
            match service::query_variable(&config, &name).await {
                Ok(value) => {
                    println!("{name}: {value}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    error!("Cannot read {}: {}", name, e);
                    ExitCode::FAILURE
                }
            }
        }
        Command::Status { var: None } => match service::query_status(&config).await {
            Ok(snapshot) => {
                println!("UPS {} on {}", config.nut_server.ups_name, config.connection().address());
                for (name, value) in snapshot.iter() {
                    println!("  {name}: {value}");
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Cannot read UPS status: {}", e);
                ExitCode::FAILURE
            }
        },
    }
}
