//! Contact Form - spreadsheet-backed contact submissions
//!
//! This tool:
//! - Validates a contact message (name, email, optional phone, subject, message)
//! - Forwards it to a spreadsheet web app with an opaque POST
//! - Keeps local counts of today's and all-time submissions
//! - Optionally serves the same flow as a local JSON API for a browser form

mod api;
mod api_routes;
mod config;
mod controller;
mod counters;
mod form;
mod server;
mod storage;

use crate::api::SheetClient;
use crate::config::Config;
use crate::controller::{SubmissionController, SubmissionFailure, SubmissionState};
use crate::counters::CounterStore;
use crate::form::{FormInput, Subject};
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use colored::*;
use std::io::{self, IsTerminal};
use tracing_subscriber::EnvFilter;

const DEFAULT_API_PORT: u16 = 3000;

type CliController = SubmissionController<SheetClient, Box<dyn CounterStore>>;

/// Contact Form - send messages to your spreadsheet
#[derive(Parser)]
#[command(name = "contact-form")]
#[command(version)]
#[command(about = "Validate contact messages and forward them to a spreadsheet web app")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fill in and send the contact form (default; prompts for missing fields)
    Submit(SubmitArgs),

    /// Show today's and total submission counts
    Counters,

    /// Reset local submission counters
    Reset {
        /// Skip the confirmation prompt
        #[arg(short, long, default_value_t = false)]
        yes: bool,
    },

    /// Show whether the spreadsheet endpoint is configured
    Status,

    /// Check that the spreadsheet endpoint is reachable
    Check,

    /// Show configuration, data paths and counts
    Config,

    /// List the subjects a message can be filed under
    Subjects,

    /// Serve the form API locally for a browser front end
    Serve {
        /// Port to run the server on
        #[arg(short, long, default_value_t = DEFAULT_API_PORT)]
        port: u16,
    },
}

#[derive(Args, Default)]
struct SubmitArgs {
    /// Your name
    #[arg(long)]
    name: Option<String>,

    /// Email address to reply to
    #[arg(long)]
    email: Option<String>,

    /// Phone number (optional)
    #[arg(long)]
    phone: Option<String>,

    /// Subject (see `contact-form subjects`)
    #[arg(long)]
    subject: Option<String>,

    /// Message text (10-500 characters)
    #[arg(long)]
    message: Option<String>,
}

impl From<SubmitArgs> for FormInput {
    fn from(args: SubmitArgs) -> Self {
        FormInput {
            name: args.name.unwrap_or_default(),
            email: args.email.unwrap_or_default(),
            phone: args.phone,
            subject: args.subject.unwrap_or_default(),
            message: args.message.unwrap_or_default(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Commands::Submit(SubmitArgs::default()));

    init_logging(match command {
        Commands::Serve { .. } => "contact_form=info,tower_http=info",
        _ => "contact_form=warn",
    });

    let config = config::init_config()?;

    match command {
        Commands::Submit(args) => run_submit(&config, args)?,
        Commands::Counters => show_counters(&config)?,
        Commands::Reset { yes } => run_reset(&config, yes)?,
        Commands::Status => show_status(&config),
        Commands::Check => run_check(&config)?,
        Commands::Config => show_config_info(&config)?,
        Commands::Subjects => print_subjects(),
        Commands::Serve { port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(server::start_server(port, &config))?;
        }
    }

    Ok(())
}

fn init_logging(default_directives: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn build_controller(config: &Config) -> Result<CliController> {
    Ok(SubmissionController::new(
        SheetClient::from_config(&config.endpoint)?,
        counters::open_counters(config.counters.reset_scope),
        (&config.feedback).into(),
    ))
}

fn run_submit(config: &Config, args: SubmitArgs) -> Result<()> {
    if !config.endpoint.is_configured() {
        print_not_configured();
        return Ok(());
    }

    let input = form::cli::complete_input(args.into())?;
    let controller = build_controller(config)?;
    let rt = tokio::runtime::Runtime::new()?;

    println!();
    let outcome = rt.block_on(async {
        let mut states = controller.subscribe();
        let submit = controller.submit(&input);
        tokio::pin!(submit);
        loop {
            tokio::select! {
                outcome = &mut submit => break outcome,
                Ok(()) = states.changed() => {
                    if matches!(*states.borrow_and_update(), SubmissionState::Sending { .. }) {
                        println!("{}", "Sending to the spreadsheet...".bright_cyan());
                    }
                }
            }
        }
    });

    match outcome {
        Ok(receipt) => {
            println!("{}", format!("✓ {}", receipt.acknowledgment.text).bright_green());
            if !receipt.dispatch.server_confirmed {
                println!(
                    "  {}",
                    "The endpoint does not report back; check your sheet to confirm the row arrived."
                        .bright_black()
                );
            }
            match receipt.counters {
                Some(counts) => println!(
                    "  {} {}   {} {}",
                    "Today:".bright_white(),
                    counts.today.to_string().bright_cyan(),
                    "Total:".bright_white(),
                    counts.total.to_string().bright_cyan()
                ),
                None => println!(
                    "  {}",
                    "Local counters could not be updated.".bright_yellow()
                ),
            }
            println!(
                "  {} {}",
                "Submission ID:".bright_black(),
                receipt.submission_id.to_string().bright_black()
            );
        }
        Err(SubmissionFailure::Validation(result)) => {
            println!("{}", "Validation issues:".bright_red());
            for violation in &result.violations {
                println!("  - {}", violation.description().bright_red());
            }
            if !io::stdin().is_terminal() {
                println!(
                    "{} {}",
                    "Tip:".bright_black(),
                    "Pass every required field as a flag, e.g. --name --email --subject --message"
                        .bright_black()
                );
            }
        }
        Err(failure) => {
            println!("{} {}", "✗".bright_red(), failure.advisory().bright_red());
            if let SubmissionFailure::Transport(err) = &failure {
                println!("{} {}", "Reason:".bright_yellow(), err.to_string().bright_black());
            }
        }
    }

    Ok(())
}

fn show_counters(config: &Config) -> Result<()> {
    let controller = build_controller(config)?;
    let counts = controller.counts()?;

    println!();
    println!("{}", "Submissions".bright_cyan().bold());
    println!(
        "  {:<8} {}  ({})",
        "Today:".bright_white(),
        counts.today.to_string().bright_cyan(),
        counts.day
    );
    println!(
        "  {:<8} {}",
        "Total:".bright_white(),
        counts.total.to_string().bright_cyan()
    );
    Ok(())
}

fn run_reset(config: &Config, assume_yes: bool) -> Result<()> {
    if !assume_yes {
        if !io::stdin().is_terminal() {
            println!(
                "{}",
                "Refusing to reset without confirmation. Re-run with --yes.".bright_yellow()
            );
            return Ok(());
        }
        let scope = match config.counters.reset_scope {
            config::ResetScope::All => "today's and total counts",
            config::ResetScope::DaysOnly => "daily counts (the total is kept)",
        };
        let confirmed =
            form::cli::prompt_yes_no(&format!("Reset {scope}? [y/N]: "), false)?;
        if !confirmed {
            println!("{}", "Nothing changed.".bright_black());
            return Ok(());
        }
    }

    let controller = build_controller(config)?;
    let counts = controller.reset_counters()?;
    println!("{}", "✓ Local counters reset.".bright_green());
    println!(
        "  {} {}   {} {}",
        "Today:".bright_white(),
        counts.today,
        "Total:".bright_white(),
        counts.total
    );
    Ok(())
}

fn show_status(config: &Config) {
    if config.endpoint.is_configured() {
        println!(
            "{} {}",
            "● Configured".bright_green(),
            config.endpoint.url.bright_black()
        );
    } else {
        print_not_configured();
    }
}

fn print_not_configured() {
    println!("{}", "▲ Not configured".bright_red());
    println!(
        "  {}",
        "Set endpoint.url in the config file (or CONTACT_FORM_ENDPOINT_URL) to your deployed web app URL."
            .bright_white()
    );
    if let Ok(path) = config::get_config_path() {
        println!("  {} {}", "Config file:".bright_black(), path.bright_black());
    }
}

fn run_check(config: &Config) -> Result<()> {
    let client = SheetClient::from_config(&config.endpoint)?;
    let rt = tokio::runtime::Runtime::new()?;

    println!("{} {}", "Checking".bright_cyan(), client.url().bright_white());
    match rt.block_on(client.probe()) {
        Ok(()) => println!("{}", "✓ The endpoint is reachable.".bright_green()),
        Err(err) => {
            println!("{} {}", "✗".bright_red(), err.advisory().bright_red());
            println!("{} {}", "Reason:".bright_yellow(), err.to_string().bright_black());
        }
    }
    Ok(())
}

fn show_config_info(config: &Config) -> Result<()> {
    println!();
    println!("{}", "Configuration".bright_cyan().bold());
    println!(
        "  {:<22} {}",
        "Config file:".bright_white(),
        config::get_config_path()?
    );
    match storage::init_storage() {
        Ok(storage) => println!(
            "  {:<22} {}",
            "Data directory:".bright_white(),
            storage.data_dir().display()
        ),
        Err(err) => println!(
            "  {:<22} {}",
            "Data directory:".bright_white(),
            format!("unavailable ({err})").bright_yellow()
        ),
    }
    println!(
        "  {:<22} {}",
        "Endpoint URL:".bright_white(),
        config.endpoint.url
    );
    println!(
        "  {:<22} {}",
        "Endpoint status:".bright_white(),
        if config.endpoint.is_configured() {
            "configured".bright_green()
        } else {
            "not configured".bright_red()
        }
    );
    println!(
        "  {:<22} {}",
        "Request timeout:".bright_white(),
        config
            .endpoint
            .timeout_seconds
            .map(|s| format!("{s}s"))
            .unwrap_or_else(|| "transport default".to_string())
    );
    println!(
        "  {:<22} {}s",
        "Acknowledgment:".bright_white(),
        config.feedback.acknowledgment_secs
    );
    println!(
        "  {:<22} {}s",
        "Resubmit cool-down:".bright_white(),
        config.feedback.resubmit_cooldown_secs
    );
    println!(
        "  {:<22} {:?}",
        "Reset scope:".bright_white(),
        config.counters.reset_scope
    );

    let counts = build_controller(config)?.counts()?;
    println!(
        "  {:<22} {}",
        "Today's submissions:".bright_white(),
        counts.today
    );
    println!(
        "  {:<22} {}",
        "Total submissions:".bright_white(),
        counts.total
    );
    Ok(())
}

fn print_subjects() {
    println!();
    println!("{}", "Subjects".bright_cyan().bold());
    for subject in Subject::ALL {
        println!(
            "  {:<12} {}",
            subject.label().bright_white(),
            subject.description().bright_black()
        );
    }
}
