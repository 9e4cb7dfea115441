//! Main entry point for the order lifecycle service.
//!
//! Loads configuration, builds the order system with the configured storage
//! backend and either serves JSON requests from stdin or executes a single
//! order operation. The status worker runs alongside in both modes and is
//! drained before exit, so placed orders finish moving to processing.

use clap::Parser;
use order_config::Config;
use std::path::PathBuf;

mod commands;
mod factory_registry;
mod serve;

use commands::{execute, Command};
use factory_registry::build_system_from_config;

/// Command-line arguments for the order service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml", env = "ORDERS_CONFIG")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,

	/// Operation to run; without one requests are served from stdin
	#[command(subcommand)]
	command: Option<Command>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	// Initialize tracing with env filter
	use tracing_subscriber::{fmt, EnvFilter};

	let default_directive = args.log_level.to_string();
	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

	// Logs go to stderr so command output on stdout stays parseable
	fmt()
		.with_env_filter(env_filter)
		.with_writer(std::io::stderr)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	let config = Config::from_file(&args.config).await?;
	tracing::info!("Loaded configuration [{}]", config.service.id);

	let system = build_system_from_config(config)?;

	let worker = system.start_worker();

	match args.command.unwrap_or(Command::Serve).into_operation().await {
		Ok(None) => {
			tracing::info!("Started order service, reading requests from stdin");
			let stdin = tokio::io::BufReader::new(tokio::io::stdin());
			tokio::select! {
				result = serve::serve(system.service(), stdin, tokio::io::stdout()) => {
					let answered = result?;
					tracing::info!(answered, "Input closed");
				},
				_ = tokio::signal::ctrl_c() => {
					tracing::info!("Received shutdown signal");
				},
			}
			worker.shutdown().await?;
			tracing::info!("Stopped order service");
		},
		Ok(Some(operation)) => {
			let result = execute(system.service(), operation).await;
			worker.shutdown().await?;

			match result {
				Ok(output) => println!("{}", serde_json::to_string_pretty(&output)?),
				Err(e) => {
					eprintln!("{}", serde_json::to_string_pretty(&e.to_json())?);
					return Err(e.into());
				},
			}
		},
		Err(e) => {
			worker.shutdown().await?;
			eprintln!("{}", serde_json::to_string_pretty(&e.to_json())?);
			return Err(e.into());
		},
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults_to_serve() {
		let args = Args::try_parse_from(["orders"]).unwrap();
		assert_eq!(args.config, PathBuf::from("config.toml"));
		assert_eq!(args.log_level, "info");
		assert!(args.command.is_none());
	}

	#[test]
	fn test_parses_update_fields() {
		let args = Args::try_parse_from([
			"orders",
			"--config",
			"orders.toml",
			"update",
			"5",
			"status=shipped",
			"customerName=Alicia Smith",
		])
		.unwrap();
		assert_eq!(
			args.command,
			Some(Command::Update {
				id: "5".to_string(),
				fields: vec![
					("status".to_string(), "shipped".to_string()),
					("customerName".to_string(), "Alicia Smith".to_string()),
				],
			})
		);
	}

	#[test]
	fn test_parses_list_options() {
		let args = Args::try_parse_from(["orders", "list", "--page", "2"]).unwrap();
		assert_eq!(
			args.command,
			Some(Command::List {
				page: 2,
				size: None
			})
		);
		assert!(Args::try_parse_from(["orders", "update", "5", "status"]).is_err());
	}
}
