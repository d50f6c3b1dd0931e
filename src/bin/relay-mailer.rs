//! Relay Mailer CLI
//!
//! Command-line front end for sending single messages and paced bulk runs
//! through the relay configured in `MAIL_SERVICE*` variables.
//!
//! ## Usage
//!
//! ```bash
//! relay-mailer send --to a@x.com --subject Hi --body "<b>hi</b>" --html --alt-body hi
//! relay-mailer bulk newsletter.json --continue-on-error
//! relay-mailer config --check
//! ```

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use relay_mailer::{
	AddressSpec, BulkError, BulkOptions, BulkReport, BulkRequest, ConfigError, ConsoleBackend,
	Mailer, MessageRequest, OnError, Pacing, Priority, RequestError, SendError, SmtpBackend,
	TransportConfig, TransportError,
};
use std::path::PathBuf;
use std::process;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relay-mailer")]
#[command(about = "Send mail through an environment-configured SMTP relay", long_about = None)]
#[command(version)]
struct Cli {
	#[command(subcommand)]
	command: Commands,

	/// Verbosity level (can be repeated)
	#[arg(short, long, action = clap::ArgAction::Count, global = true)]
	verbosity: u8,
}

#[derive(Subcommand)]
enum Commands {
	/// Send one message
	Send(SendArgs),

	/// Send one message per recipient of a JSON request document
	Bulk {
		#[arg(value_name = "REQUEST.json")]
		request: PathBuf,

		/// Record failures and keep sending instead of stopping
		#[arg(long)]
		continue_on_error: bool,

		/// Skip the pause between sends
		#[arg(long)]
		no_pacing: bool,

		/// Print the messages instead of sending them
		#[arg(long)]
		dry_run: bool,
	},

	/// Show the transport settings read from the environment
	Config {
		/// Also open a connection to the relay
		#[arg(long)]
		check: bool,
	},
}

#[derive(Args)]
struct SendArgs {
	/// Recipient address (can be repeated)
	#[arg(long, value_name = "ADDR", required = true)]
	to: Vec<String>,

	#[arg(short, long)]
	subject: String,

	/// Message body
	#[arg(short, long, conflicts_with = "body_file", required_unless_present = "body_file")]
	body: Option<String>,

	/// Read the message body from a file
	#[arg(long, value_name = "PATH")]
	body_file: Option<PathBuf>,

	/// Treat the body as HTML
	#[arg(long)]
	html: bool,

	/// Plain-text alternative for HTML bodies
	#[arg(long, value_name = "TEXT")]
	alt_body: Option<String>,

	#[arg(long, value_name = "ADDR")]
	cc: Vec<String>,

	#[arg(long, value_name = "ADDR")]
	bcc: Vec<String>,

	#[arg(long, value_name = "ADDR")]
	reply_to: Vec<String>,

	/// Sender address (defaults to the relay username)
	#[arg(long, value_name = "ADDR")]
	from: Option<String>,

	#[arg(long, value_name = "NAME")]
	from_name: Option<String>,

	/// high, normal or low
	#[arg(long)]
	priority: Option<Priority>,

	/// Print the message instead of sending it
	#[arg(long)]
	dry_run: bool,
}

#[derive(Debug, Error)]
enum CliError {
	#[error(transparent)]
	Config(#[from] ConfigError),

	#[error(transparent)]
	Request(#[from] RequestError),

	#[error(transparent)]
	Send(#[from] SendError),

	#[error(transparent)]
	Bulk(#[from] BulkError),

	#[error(transparent)]
	Transport(#[from] TransportError),

	#[error("Cannot read {}: {source}", .path.display())]
	BodyFile {
		path: PathBuf,
		source: std::io::Error,
	},
}

type CliResult<T> = Result<T, CliError>;

#[tokio::main]
async fn main() {
	dotenv::dotenv().ok();
	let cli = Cli::parse();
	init_tracing(cli.verbosity);

	let result = match cli.command {
		Commands::Send(args) => run_send(args).await,
		Commands::Bulk {
			request,
			continue_on_error,
			no_pacing,
			dry_run,
		} => run_bulk(request, continue_on_error, no_pacing, dry_run).await,
		Commands::Config { check } => run_config(check).await,
	};

	if let Err(e) = result {
		eprintln!("{}: {}", "Error".red().bold(), e);
		if let CliError::Bulk(error) = &e {
			print_report(error.report());
		}
		process::exit(1);
	}
}

fn init_tracing(verbosity: u8) {
	let default_level = match verbosity {
		0 => "warn",
		1 => "info",
		2 => "debug",
		_ => "trace",
	};
	let filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.init();
}

fn build_mailer(dry_run: bool) -> CliResult<Mailer> {
	let config = TransportConfig::from_env()?;
	if dry_run {
		config.validate()?;
		return Ok(Mailer::new(config, Box::new(ConsoleBackend::new())));
	}
	Ok(Mailer::smtp(config)?)
}

impl SendArgs {
	fn into_request(self) -> CliResult<MessageRequest> {
		let body = match (self.body, self.body_file) {
			(Some(body), _) => body,
			(None, Some(path)) => std::fs::read_to_string(&path)
				.map_err(|source| CliError::BodyFile { path, source })?,
			(None, None) => String::new(),
		};

		let mut builder = MessageRequest::builder()
			.subject(self.subject)
			.body(body)
			.html(self.html);
		for address in self.to {
			builder = builder.to(address);
		}
		if let Some(alt_body) = self.alt_body {
			builder = builder.alt_body(alt_body);
		}
		if !self.cc.is_empty() {
			builder = builder.cc(AddressSpec::from(self.cc));
		}
		if !self.bcc.is_empty() {
			builder = builder.bcc(AddressSpec::from(self.bcc));
		}
		if !self.reply_to.is_empty() {
			builder = builder.reply_to(AddressSpec::from(self.reply_to));
		}
		if let Some(from) = self.from {
			builder = builder.from(from);
		}
		if let Some(from_name) = self.from_name {
			builder = builder.from_name(from_name);
		}
		if let Some(priority) = self.priority {
			builder = builder.priority(priority);
		}
		Ok(builder.build())
	}
}

async fn run_send(args: SendArgs) -> CliResult<()> {
	let dry_run = args.dry_run;
	let request = args.into_request()?;
	let mut mailer = build_mailer(dry_run)?;
	mailer.send(&request).await?;

	if !dry_run {
		println!("{} {}", "Sent:".green(), request.subject);
	}
	Ok(())
}

async fn run_bulk(
	path: PathBuf,
	continue_on_error: bool,
	no_pacing: bool,
	dry_run: bool,
) -> CliResult<()> {
	let request = BulkRequest::from_path(&path)?;
	let mut mailer = build_mailer(dry_run)?;

	let token = CancellationToken::new();
	let on_interrupt = token.clone();
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			eprintln!("{}", "Interrupted, stopping after the current message".yellow());
			on_interrupt.cancel();
		}
	});

	let mut options = BulkOptions::new().with_cancellation(token);
	if continue_on_error {
		options = options.with_on_error(OnError::CollectAndContinue);
	}
	if no_pacing || dry_run {
		options = options.with_pacing(Pacing::disabled());
	}

	let report = mailer.send_bulk(&request, &options).await?;
	print_report(&report);
	Ok(())
}

fn print_report(report: &BulkReport) {
	for (key, delivered) in &report.results {
		if *delivered {
			println!("  {} {}", "ok".green(), key);
		} else {
			let reason = report
				.failures
				.get(key)
				.map(ToString::to_string)
				.unwrap_or_default();
			println!("  {} {} {}", "failed".red(), key, reason.dimmed());
		}
	}

	let summary = format!(
		"{} delivered, {} failed",
		report.delivered(),
		report.failed()
	);
	if report.all_delivered() {
		println!("{}", summary.green());
	} else {
		println!("{}", summary.red());
	}
}

async fn run_config(check: bool) -> CliResult<()> {
	let config = TransportConfig::from_env()?;

	println!("{}", "Transport settings".bold());
	println!("  host:       {}", config.host());
	println!("  port:       {}", config.port());
	println!("  encryption: {}", config.encryption());
	println!("  username:   {}", config.username());
	println!("  password:   {}", "********".dimmed());
	println!("  charset:    {}", config.charset());
	println!("  timeout:    {}s", config.timeout().as_secs());

	if check {
		let backend = SmtpBackend::new(&config)?;
		if backend.test_connection().await? {
			println!("{} {}", "Connected:".green(), config.host());
		} else {
			println!("{} {}", "Unreachable:".red(), config.host());
		}
	}
	Ok(())
}
