mod args;
mod config;
mod mq;
mod services;

use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
	init_tracing();

	let args: Vec<String> = std::env::args().skip(1).collect();
	if args.is_empty() {
		print_usage();
		return;
	}

	let config = config::load_config();
	let result = match args[0].as_str() {
		"help" | "--help" | "-h" => {
			print_usage();
			Ok(())
		}
		"version" | "--version" | "-V" => {
			println!("patrol {}", env!("CARGO_PKG_VERSION"));
			Ok(())
		}
		"add" => services::cmd_add(&config, &args[1..]).await,
		"rm" | "remove" => services::cmd_remove(&config, &args[1..]).await,
		"list" | "ls" => services::cmd_list(&config).await,
		"show" => services::cmd_show(&config, &args[1..]).await,
		"port" => services::cmd_port(&config, &args[1..]).await,
		"pin" => services::cmd_pin(&config, &args[1..]).await,
		"config-file" => services::cmd_config_file(&config, &args[1..]).await,
		"run" => services::cmd_run(&config, &args[1..]).await,
		"mq" => mq::cmd_mq(&config, &args[1..]),
		other => {
			eprintln!("unknown command: {}", other);
			eprintln!("run 'patrol help' for usage");
			std::process::exit(1);
		}
	};

	if let Err(e) = result {
		eprintln!("{} {:#}", "error:".red().bold(), e);
		std::process::exit(1);
	}
}

fn init_tracing() {
	let filter = EnvFilter::try_from_env("PATROL_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(false)
		.with_writer(std::io::stderr)
		.init();
}

fn print_usage() {
	eprintln!("{} {} - script supervisor and event queue", "patrol".bold(), env!("CARGO_PKG_VERSION"));
	eprintln!();
	eprintln!("usage: {} <command> [args]", "patrol".bold());
	eprintln!();

	eprintln!("{}", "processes".cyan().bold());
	eprintln!("  {} <script> [name]              Register a script", "add".bold());
	eprintln!("  {} <id>                          Unregister (stops it first)", "rm".bold());
	eprintln!("  {}                             List registered scripts", "list".bold());
	eprintln!("  {} <id>                        Show one record as JSON", "show".bold());
	eprintln!("  {} <id> <port>                 Set the advisory port", "port".bold());
	eprintln!("  {} <id> [on|off]                Pin or unpin", "pin".bold());
	eprintln!("  {} <id> <path>          Attach a config file", "config-file".bold());
	eprintln!("  {} [id...]                      Run in the foreground and tail output", "run".bold());
	eprintln!();

	eprintln!("{}", "queue".cyan().bold());
	eprintln!("  {} <source> <title> [--type T] [--detail D] [--meta k=v]...", "mq publish".bold());
	eprintln!("  {} [--status S] [--source S] [--limit N] [--offset N] [--json]", "mq list".bold());
	eprintln!("  {} <id>                      Show one message", "mq get".bold());
	eprintln!("  {} <id>                      Acknowledge", "mq ack".bold());
	eprintln!("  {} <id>                     Resolve", "mq done".bold());
	eprintln!("  {} <id>               Resolve everything up to <id>", "mq batch-done".bold());
	eprintln!("  {}                    Acknowledge every new message", "mq batch-ack".bold());
	eprintln!("  {}                        Counts by status", "mq stats".bold());
	eprintln!("  {} [--ack]                 Report new events as JSON", "mq scan".bold());
	eprintln!();

	eprintln!("{}", "ids".cyan().bold());
	eprintln!("  Any unique prefix of an id works, and processes also match by name.");
	eprintln!();

	eprintln!("{}", "environment".cyan().bold());
	eprintln!("  PATROL_CATALOG   catalog file (default: $XDG_STATE_HOME/patrol/services.json)");
	eprintln!("  PATROL_QUEUE     queue file (default: $XDG_STATE_HOME/patrol/mq.json)");
	eprintln!("  PATROL_LOG       log filter (default: info)");
}
