use colored::Colorize;
use commands::command_argument_builder;
use gridrank::handlers::*;
use tracing_subscriber::EnvFilter;

mod commands;

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");
    let json = chosen_command.get_flag("json");

    // The scheduler is long-running, so it logs its activity by default
    let default_level = match chosen_command.subcommand_name() {
        Some("serve") => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let data_dir = chosen_command
        .get_one::<String>("data-dir")
        .map(String::as_str)
        .unwrap_or("~/.config/gridrank/");
    let dir = DataDir::resolve(data_dir);

    if let Err(e) = dispatch(&chosen_command, &dir, json, quiet).await {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}

async fn dispatch(
    chosen_command: &clap::ArgMatches,
    dir: &DataDir,
    json: bool,
    quiet: bool,
) -> anyhow::Result<()> {
    if let Some(("init", primary_command)) = chosen_command.subcommand() {
        return handle_init(dir, primary_command.get_flag("force"));
    }

    let service = open_service(dir)?;
    match chosen_command.subcommand() {
        Some(("create", primary_command)) => {
            handle_create(&service, primary_command, json, quiet).await
        }
        Some(("show", primary_command)) => handle_show(&service, primary_command, json),
        Some(("list", _)) => handle_list(&service, json),
        Some(("update", primary_command)) => handle_update(&service, primary_command, json),
        Some(("delete", primary_command)) => handle_delete(&service, primary_command, json),
        Some(("rerun", primary_command)) => {
            handle_rerun(&service, primary_command, json, quiet).await
        }
        Some(("stop", primary_command)) => handle_stop(&service, primary_command, json),
        Some(("run", _)) => handle_run_due(&service, json, quiet).await,
        Some(("serve", primary_command)) => {
            let interval = primary_command.get_one::<u64>("interval").copied();
            handle_serve(&service, interval).await
        }
        Some(("logs", primary_command)) => handle_logs(&service, primary_command, json),
        Some(("proxies", primary_command)) => match primary_command.subcommand() {
            Some(("validate", secondary_command)) => {
                handle_proxies_validate(&service, secondary_command, json, quiet).await
            }
            _ => unreachable!("clap should ensure we don't get here"),
        },
        _ => unreachable!("clap should ensure we don't get here"),
    }
}

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);
