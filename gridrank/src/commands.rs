use crate::CLAP_STYLING;
use clap::{arg, command};
use std::path::PathBuf;

fn scan_id_arg() -> clap::Arg {
    arg!(<SCAN_ID>).required(true).help("The id of the scan")
}

fn format_arg() -> clap::Arg {
    arg!(-f --"format" <FORMAT>)
        .required(false)
        .help("Report format: text, json")
        .value_parser(["text", "json"])
        .default_value("text")
}

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("gridrank")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("gridrank")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress non-essential output").required(false))
        .arg(
            arg!(-d --"data-dir" <PATH>)
                .required(false)
                .global(true)
                .help("Directory holding config.json and gridrank.db")
                .default_value("~/.config/gridrank/"),
        )
        .arg(
            arg!(--"json")
                .required(false)
                .global(true)
                .help("Print responses as a JSON envelope")
                .action(clap::ArgAction::SetTrue),
        )
        .subcommand_required(true)
        .subcommand(
            command!("init")
                .about("Initializes the gridrank config and database on your filesystem")
                .arg(
                    arg!(-f --"force")
                        .help("Overwrite any existing config and database without asking")
                        .required(false),
                ),
        )
        .subcommand(
            command!("create")
                .about("Creates a scan and runs it once")
                .arg(
                    arg!(-k --"keyword" <KEYWORD>)
                        .required(true)
                        .help("Search term to rank for"),
                )
                .arg(
                    arg!(-b --"business" <NAME>)
                        .required(false)
                        .help("Business to look for in the results"),
                )
                .arg(
                    arg!(--"lat" <LAT>)
                        .required(false)
                        .help("Latitude of the grid center")
                        .allow_negative_numbers(true),
                )
                .arg(
                    arg!(--"lng" <LNG>)
                        .required(false)
                        .help("Longitude of the grid center")
                        .allow_negative_numbers(true),
                )
                .arg(
                    arg!(-r --"radius" <KM>)
                        .required(false)
                        .help("Half-width of the grid in kilometres"),
                )
                .arg(
                    arg!(-g --"grid-size" <N>)
                        .required(false)
                        .help("Points per side of a square grid"),
                )
                .arg(
                    arg!(-s --"shape" <SHAPE>)
                        .required(false)
                        .help("Point layout: square, smart, custom")
                        .value_parser(["square", "smart", "custom"]),
                )
                .arg(
                    arg!(--"frequency" <FREQUENCY>)
                        .required(false)
                        .help("Recurrence: once, daily, weekly, monthly")
                        .value_parser(["once", "daily", "weekly", "monthly"]),
                )
                .arg(
                    arg!(-p --"points-file" <PATH>)
                        .required(false)
                        .help("JSON array or lat,lng lines of custom sample points")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    arg!(--"no-run")
                        .required(false)
                        .help("Store the scan without running it")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(format_arg()),
        )
        .subcommand(
            command!("show")
                .about("Shows a scan with its latest results and alerts")
                .arg(scan_id_arg())
                .arg(format_arg())
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Save report to file (default: display to screen)")
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
        .subcommand(command!("list").about("Lists all scans, newest first"))
        .subcommand(
            command!("update")
                .about("Updates fields of a scan")
                .arg(scan_id_arg())
                .arg(arg!(-k --"keyword" <KEYWORD>).required(false))
                .arg(arg!(-b --"business" <NAME>).required(false))
                .arg(
                    arg!(--"lat" <LAT>)
                        .required(false)
                        .value_parser(clap::value_parser!(f64))
                        .allow_negative_numbers(true),
                )
                .arg(
                    arg!(--"lng" <LNG>)
                        .required(false)
                        .value_parser(clap::value_parser!(f64))
                        .allow_negative_numbers(true),
                )
                .arg(
                    arg!(-r --"radius" <KM>)
                        .required(false)
                        .value_parser(clap::value_parser!(f64)),
                )
                .arg(
                    arg!(-g --"grid-size" <N>)
                        .required(false)
                        .value_parser(clap::value_parser!(i64)),
                )
                .arg(
                    arg!(-s --"shape" <SHAPE>)
                        .required(false)
                        .value_parser(["square", "smart", "custom"]),
                )
                .arg(
                    arg!(--"frequency" <FREQUENCY>)
                        .required(false)
                        .value_parser(["once", "daily", "weekly", "monthly"]),
                )
                .arg(
                    arg!(-p --"points-file" <PATH>)
                        .required(false)
                        .value_parser(clap::value_parser!(PathBuf))
                        .conflicts_with("clear-points"),
                )
                .arg(
                    arg!(--"clear-points")
                        .required(false)
                        .help("Remove stored custom points")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            command!("delete")
                .about("Deletes a scan with its results and alerts")
                .arg(scan_id_arg()),
        )
        .subcommand(
            command!("rerun")
                .about("Clears a scan's results and runs it again")
                .arg(scan_id_arg())
                .arg(format_arg()),
        )
        .subcommand(
            command!("stop")
                .about("Stops a scan and cancels its scheduling")
                .arg(scan_id_arg()),
        )
        .subcommand(command!("run").about("Runs every scheduled scan that is due, then exits"))
        .subcommand(
            command!("serve")
                .about("Runs the scheduler until interrupted")
                .arg(
                    arg!(-i --"interval" <SECONDS>)
                        .required(false)
                        .help("Polling interval (default: from config)")
                        .value_parser(clap::value_parser!(u64)),
                ),
        )
        .subcommand(
            command!("logs")
                .about("Shows or clears the event log")
                .arg(
                    arg!(-l --"level" <LEVEL>)
                        .required(false)
                        .value_parser(["debug", "info", "warn", "error"]),
                )
                .arg(arg!(-s --"source" <SOURCE>).required(false))
                .arg(
                    arg!(-n --"limit" <NUM>)
                        .required(false)
                        .value_parser(clap::value_parser!(usize))
                        .default_value("100"),
                )
                .arg(
                    arg!(--"clear")
                        .required(false)
                        .help("Delete every log entry")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            command!("proxies")
                .about("Manage probe proxies")
                .subcommand_required(true)
                .subcommand(
                    command!("validate")
                        .about("Checks which proxies can reach the test URL")
                        .arg(
                            arg!(-F --"file" <PATH>)
                                .required(false)
                                .help("Proxy list: JSON array or host:port[:user:pass] lines (default: configured proxies)")
                                .value_parser(clap::value_parser!(PathBuf)),
                        )
                        .arg(
                            arg!(-t --"threads" <NUM_WORKERS>)
                                .required(false)
                                .help("How many proxies to check at once")
                                .value_parser(clap::value_parser!(usize))
                                .default_value("10"),
                        ),
                ),
        )
}
