use clap::{Arg, ArgAction, ArgMatches, Command};
use std::error::Error;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use dotsync::build_info;
use dotsync::config::{Config, ConfigError, StorageDriver};
use dotsync::logging::*;
use dotsync::server;
use dotsync::storage::DiskBackend;
use dotsync::transfer::Transfer;
use dotsync::types::ChangeKind;
use dotsync::validation::Validator;

///////////////////////
// Utility functions //
///////////////////////

/// Explicit `--config`, else the search path, else built-in defaults.
///
/// Also returns the search miss, if any, so it can be logged once tracing
/// is set up with the configured level.
fn load_config(matches: &ArgMatches) -> Result<(Config, Option<ConfigError>), Box<dyn Error>> {
	let explicit = matches.get_one::<String>("config").map(PathBuf::from);
	let (mut config, missing) = match Config::discover(explicit.as_deref()) {
		Ok(config) => (config, None),
		Err(e @ ConfigError::NotFound { .. }) => (Config::default(), Some(e)),
		Err(e) => return Err(e.into()),
	};
	if let Some(level) = matches.get_one::<String>("log-level") {
		config.log_level = level.clone();
	}
	config.validate()?;
	Ok((config, missing))
}

fn gzip_by_name(path: &Path, flag: bool) -> bool {
	flag || path
		.extension()
		.map(|e| e.eq_ignore_ascii_case("gz") || e.eq_ignore_ascii_case("tgz"))
		.unwrap_or(false)
}

fn change_label(kind: ChangeKind) -> &'static str {
	match kind {
		ChangeKind::Add => "add",
		ChangeKind::Modify => "modify",
		ChangeKind::Delete => "delete",
		ChangeKind::Same => "same",
	}
}

fn cli() -> Command {
	Command::new("dotsync")
		.version(build_info::VERSION)
		.author("Szilard Hajba <szilu@symbion.hu>")
		.about("Dotfile synchronization server and client")
		.subcommand_required(true)
		.arg(
			Arg::new("config")
				.short('c')
				.long("config")
				.value_name("FILE")
				.global(true)
				.help("Config file (.json5 or .toml)"),
		)
		.arg(
			Arg::new("log-level")
				.long("log-level")
				.value_name("LEVEL")
				.global(true)
				.help("Log filter when RUST_LOG is not set"),
		)
		.subcommand(
			Command::new("serve").about("Run the API server").arg(
				Arg::new("addr").long("addr").value_name("ADDR").help("Listen address (default :7099)"),
			),
		)
		.subcommand(
			Command::new("compare").about("Show differences against the server").arg(
				Arg::new("all")
					.long("all")
					.action(ArgAction::SetTrue)
					.help("Also list unchanged files"),
			),
		)
		.subcommand(
			Command::new("publish")
				.about("Upload local changes to the server")
				.arg(Arg::new("per-file").long("per-file").action(ArgAction::SetTrue))
				.arg(
					Arg::new("prune")
						.long("prune")
						.action(ArgAction::SetTrue)
						.help("Delete server files missing locally"),
				)
				.arg(Arg::new("no-compress").long("no-compress").action(ArgAction::SetTrue)),
		)
		.subcommand(
			Command::new("install")
				.about("Write server files into local homes")
				.arg(Arg::new("per-file").long("per-file").action(ArgAction::SetTrue))
				.arg(Arg::new("no-compress").long("no-compress").action(ArgAction::SetTrue)),
		)
		.subcommand(
			Command::new("upload")
				.about("Upload a single file")
				.arg(Arg::new("user").required(true))
				.arg(Arg::new("path").required(true).help("Path relative to the user's home")),
		)
		.subcommand(
			Command::new("download")
				.about("Download a single file")
				.arg(Arg::new("user").required(true))
				.arg(Arg::new("path").required(true))
				.arg(Arg::new("out").long("out").short('o').value_name("FILE")),
		)
		.subcommand(Command::new("status").about("Show server totals and activity"))
		.subcommand(Command::new("health").about("Check that the server is up"))
		.subcommand(Command::new("version").about("Print version information"))
		.subcommand(
			Command::new("backup")
				.about("Write the disk store to a tar archive")
				.arg(Arg::new("file").required(true))
				.arg(Arg::new("gzip").long("gzip").action(ArgAction::SetTrue)),
		)
		.subcommand(
			Command::new("restore")
				.about("Load a tar archive into the disk store")
				.arg(Arg::new("file").required(true))
				.arg(Arg::new("gzip").long("gzip").action(ArgAction::SetTrue)),
		)
}

fn disk_store(config: &Config) -> Result<DiskBackend, Box<dyn Error>> {
	if config.storage.driver != StorageDriver::Disk {
		return Err("backup and restore need the disk storage driver".into());
	}
	Ok(DiskBackend::new(&config.server.data_dir)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	let matches = cli().get_matches();

	if matches.subcommand_matches("version").is_some() {
		println!("{}", build_info::summary());
		return Ok(());
	}

	let (mut config, missing) = load_config(&matches)?;
	dotsync::logging::init_tracing(&config.log_level);
	if let Some(e) = missing {
		warn!("{}, using defaults", e);
	}

	match matches.subcommand() {
		Some(("serve", sub)) => {
			if let Some(addr) = sub.get_one::<String>("addr") {
				config.server.listen_addr = addr.clone();
			}
			server::serve(&config).await?;
		}
		Some(("compare", sub)) => {
			let transfer = Transfer::from_config(&config)?;
			let (_, changes) = transfer.compare(sub.get_flag("all")).await?;
			for change in &changes {
				println!("{:<7} {}/{}", change_label(change.kind), change.user, change.path);
			}
			info!("{} change(s)", changes.len());
		}
		Some(("publish", sub)) => {
			if sub.get_flag("per-file") {
				config.transfer.bulk = false;
			}
			if sub.get_flag("prune") {
				config.transfer.prune = true;
			}
			if sub.get_flag("no-compress") {
				config.transfer.compress = false;
			}
			let report = Transfer::from_config(&config)?.publish().await?;
			println!(
				"scanned {} file(s), uploaded {}, pruned {}",
				report.scanned, report.uploaded, report.pruned
			);
		}
		Some(("install", sub)) => {
			if sub.get_flag("per-file") {
				config.transfer.bulk = false;
			}
			if sub.get_flag("no-compress") {
				config.transfer.compress = false;
			}
			let report = Transfer::from_config(&config)?.install().await?;
			println!("installed {} of {} file(s)", report.written, report.planned);
		}
		Some(("upload", sub)) => {
			let user = sub.get_one::<String>("user").ok_or("upload: user argument required")?;
			let path = sub.get_one::<String>("path").ok_or("upload: path argument required")?;
			Transfer::from_config(&config)?.upload_one(user, path).await?;
			println!("uploaded {}/{}", user, path);
		}
		Some(("download", sub)) => {
			let user = sub.get_one::<String>("user").ok_or("download: user argument required")?;
			let path = sub.get_one::<String>("path").ok_or("download: path argument required")?;
			let out = sub.get_one::<String>("out").map(PathBuf::from);
			let transfer = Transfer::from_config(&config)?;
			if !transfer.download_one(user, path, out.as_deref()).await? {
				return Err(format!("{}/{} not found on server", user, path).into());
			}
			println!("downloaded {}/{}", user, path);
		}
		Some(("status", _)) => {
			let status = dotsync::client::Client::from_config(&config)?.status().await?;
			println!("{}", serde_json::to_string_pretty(&status)?);
		}
		Some(("health", _)) => {
			let health = dotsync::client::Client::from_config(&config)?.health().await?;
			println!("{}", serde_json::to_string_pretty(&health)?);
		}
		Some(("backup", sub)) => {
			let file = PathBuf::from(sub.get_one::<String>("file").ok_or("backup: file argument required")?);
			let store = disk_store(&config)?;
			let gzip = gzip_by_name(&file, sub.get_flag("gzip"));
			let writer = BufWriter::new(File::create(&file)?);
			let count = tokio::task::spawn_blocking(move || store.backup(writer, gzip)).await??;
			println!("backed up {} file(s) to {}", count, file.display());
		}
		Some(("restore", sub)) => {
			let file = PathBuf::from(sub.get_one::<String>("file").ok_or("restore: file argument required")?);
			let store = disk_store(&config)?;
			let gzip = gzip_by_name(&file, sub.get_flag("gzip"));
			let reader = BufReader::new(File::open(&file)?);
			let count = tokio::task::spawn_blocking(move || store.restore(reader, gzip)).await??;
			println!("restored {} file(s) from {}", count, file.display());
		}
		_ => unreachable!("subcommand_required"),
	}

	Ok(())
}

// vim: ts=4
