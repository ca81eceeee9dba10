use clap::{Arg, ArgAction, Command};
use tracing::Level;

pub fn cli() -> Command {
    Command::new("rede_splitter")
        .about("Acquirer settlement splitter and pull-transfer service")
        .arg(
            Arg::new("log.level")
                .long("log.level")
                .default_value(Level::INFO.as_str())
                .value_name("LOG_LEVEL")
                .action(ArgAction::Set),
        )
        .subcommand(
            Command::new("split")
                .about("Split a mother file into per-PV children and reconcile the totals")
                .arg(
                    Arg::new("input")
                        .long("input")
                        .value_name("MOTHER_FILE")
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("input-dir")
                        .long("input-dir")
                        .value_name("INPUT_DIR")
                        .conflicts_with("input")
                        .help("Process every recognizable mother file in the directory")
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("kind")
                        .long("kind")
                        .default_value("auto")
                        .value_name("auto|eevc|eevd|eefi")
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("output")
                        .long("output")
                        .default_value("output")
                        .value_name("OUTPUT_DIR")
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("tolerance")
                        .long("tolerance")
                        .default_value("0")
                        .value_name("CENTS")
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("integrity")
                        .long("integrity")
                        .help("Run the record-count integrity pass after splitting")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("validate")
                .about("Independent record-count check of a mother file against its children")
                .arg(
                    Arg::new("input")
                        .long("input")
                        .required(true)
                        .value_name("MOTHER_FILE")
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("children")
                        .long("children")
                        .required(true)
                        .value_name("LOTE_DIR")
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("kind")
                        .long("kind")
                        .default_value("auto")
                        .value_name("auto|eevc|eevd|eefi")
                        .action(ArgAction::Set),
                ),
        )
        .subcommand(
            Command::new("serve")
                .about("Serve the pull API over the processed output tree")
                .arg(
                    Arg::new("http.addr")
                        .long("http.addr")
                        .default_value("0.0.0.0")
                        .value_name("ADDRESS")
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("http.port")
                        .long("http.port")
                        .default_value("8080")
                        .value_name("PORT")
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("output")
                        .long("output")
                        .default_value("output")
                        .value_name("OUTPUT_DIR")
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("input")
                        .long("input")
                        .value_name("INPUT_DIR")
                        .action(ArgAction::Set),
                ),
        )
        .subcommand(
            Command::new("agent")
                .about("Remote pull agent")
                .subcommand(Command::new("run").about("Run one pull cycle and exit"))
                .subcommand(
                    Command::new("serve")
                        .about("Serve the agent trigger API")
                        .arg(
                            Arg::new("http.addr")
                                .long("http.addr")
                                .default_value("0.0.0.0")
                                .value_name("ADDRESS")
                                .action(ArgAction::Set),
                        )
                        .arg(
                            Arg::new("http.port")
                                .long("http.port")
                                .default_value("10000")
                                .value_name("PORT")
                                .action(ArgAction::Set),
                        ),
                ),
        )
}
