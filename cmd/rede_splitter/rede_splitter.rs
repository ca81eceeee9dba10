use rede_splitter_agent::api::{start_agent_api, AgentApiContext};
use rede_splitter_agent::{run_cycle, AgentConfig};
use rede_splitter_common::FileKind;
use rede_splitter_engine::{integrity, split_file, writer, SplitOptions};
use rede_splitter_rpc::{start_api, ApiConfig, ApiContext};
use rede_splitter_storage::{EngineType, Store};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod cli;

// Exit codes of the split entry point.
const EXIT_DIVERGENCE: i32 = 2;
const EXIT_IO: i32 = 3;
const EXIT_MALFORMED: i32 = 4;

#[tokio::main]
async fn main() {
    let matches = cli::cli().get_matches();

    let log_level = matches
        .get_one::<String>("log.level")
        .expect("log.level has a default value");
    let log_filter = EnvFilter::builder()
        .with_default_directive(
            Directive::from_str(log_level).expect("Not supported log level provided"),
        )
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(log_filter)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    match matches.subcommand() {
        Some(("split", sub)) => {
            let code = run_split(sub).await;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Some(("validate", sub)) => {
            let code = run_validate(sub);
            if code != 0 {
                std::process::exit(code);
            }
        }
        Some(("serve", sub)) => run_serve(sub).await,
        Some(("agent", sub)) => run_agent(sub).await,
        _ => {
            cli::cli().print_help().expect("failed to print help");
        }
    }
}

fn parse_kind(matches: &clap::ArgMatches) -> Result<Option<FileKind>, i32> {
    match matches.get_one::<String>("kind").map(String::as_str) {
        Some("auto") | None => Ok(None),
        Some(other) => match FileKind::from_str(other) {
            Ok(kind) => Ok(Some(kind)),
            Err(err) => {
                error!(%err, "invalid --kind");
                Err(EXIT_MALFORMED)
            }
        },
    }
}

async fn run_split(matches: &clap::ArgMatches) -> i32 {
    let kind = match parse_kind(matches) {
        Ok(kind) => kind,
        Err(code) => return code,
    };
    let output = matches.get_one::<String>("output").expect("output has a default");
    let tolerance: i64 = match matches
        .get_one::<String>("tolerance")
        .expect("tolerance has a default")
        .parse()
    {
        Ok(t) => t,
        Err(_) => {
            error!("--tolerance must be an integer number of cents");
            return EXIT_MALFORMED;
        }
    };

    let mut opts = SplitOptions::new(output);
    opts.tolerance_cents = tolerance;
    let check_integrity = matches.get_flag("integrity");

    let inputs = match collect_inputs(matches) {
        Ok(inputs) => inputs,
        Err(code) => return code,
    };

    // Mother files are independent; each one runs on its own worker.
    let mut handles = Vec::with_capacity(inputs.len());
    for input in inputs {
        let opts = opts.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            split_one(&input, kind, &opts, check_integrity)
        }));
    }

    let mut worst = 0;
    for handle in handles {
        let code = handle.await.expect("split worker panicked");
        worst = worst.max(code);
    }
    worst
}

fn collect_inputs(matches: &clap::ArgMatches) -> Result<Vec<PathBuf>, i32> {
    if let Some(input) = matches.get_one::<String>("input") {
        return Ok(vec![PathBuf::from(input)]);
    }
    let Some(dir) = matches.get_one::<String>("input-dir") else {
        error!("either --input or --input-dir is required");
        return Err(EXIT_MALFORMED);
    };
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            error!(%err, %dir, "cannot read the input directory");
            return Err(EXIT_IO);
        }
    };
    let mut inputs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if path.is_file() && FileKind::from_filename(&name).is_some() {
            inputs.push(path);
        }
    }
    if inputs.is_empty() {
        info!(%dir, "no recognizable mother files found");
    }
    inputs.sort();
    Ok(inputs)
}

fn split_one(input: &Path, kind: Option<FileKind>, opts: &SplitOptions, check_integrity: bool) -> i32 {
    let outcome = match split_file(input, kind, opts) {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(file = %input.display(), %err, "split failed");
            return if err.is_malformed_input() {
                EXIT_MALFORMED
            } else {
                EXIT_IO
            };
        }
    };

    for dim in &outcome.verdict.dimensions {
        info!(
            file = %outcome.mother.source,
            dimension = dim.name,
            expected = dim.expected,
            computed = dim.computed,
            detail = %dim.detail,
            "reconciliation"
        );
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&outcome.verdict).expect("verdict serializes")
    );

    if check_integrity {
        let lote = writer::lote_dir(&opts.output_root, &outcome.mother.nsa);
        match integrity::validate_children(input, Some(outcome.mother.kind), &lote) {
            Ok(report) => {
                let report_path = lote.join("integridade.csv");
                if let Err(err) = std::fs::write(&report_path, report.to_csv()) {
                    error!(%err, "could not write the integrity report");
                    return EXIT_IO;
                }
                info!(report = %report_path.display(), ok = report.is_ok(), "integrity report written");
            }
            Err(err) => {
                error!(%err, "integrity validation failed");
                return EXIT_IO;
            }
        }
    }

    if outcome.verdict.is_ok() {
        0
    } else {
        EXIT_DIVERGENCE
    }
}

fn run_validate(matches: &clap::ArgMatches) -> i32 {
    let kind = match parse_kind(matches) {
        Ok(kind) => kind,
        Err(code) => return code,
    };
    let input = matches.get_one::<String>("input").expect("input is required");
    let children = matches
        .get_one::<String>("children")
        .expect("children is required");

    match integrity::validate_children(Path::new(input), kind, Path::new(children)) {
        Ok(report) => {
            print!("{}", report.to_csv());
            if report.is_ok() {
                0
            } else {
                EXIT_DIVERGENCE
            }
        }
        Err(err) => {
            error!(%err, "integrity validation failed");
            if err.is_malformed_input() {
                EXIT_MALFORMED
            } else {
                EXIT_IO
            }
        }
    }
}

async fn run_serve(matches: &clap::ArgMatches) {
    let addr = matches.get_one::<String>("http.addr").expect("http.addr has a default");
    let port = matches.get_one::<String>("http.port").expect("http.port has a default");
    let addr = parse_socket_addr(addr, port).expect("Failed to parse http address and port");

    let output = matches.get_one::<String>("output").expect("output has a default");
    let mut config = ApiConfig::new(output);
    config.input_dir = matches.get_one::<String>("input").map(Into::into);
    // the CLI bootstrap is the only place the environment is consulted
    config.api_key = std::env::var("SPLITTER_API_KEY").ok().filter(|k| !k.is_empty());

    let store = Store::new(EngineType::InMemory);
    start_api(addr, ApiContext::new(store, config)).await;
}

async fn run_agent(matches: &clap::ArgMatches) {
    let config = match AgentConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "invalid agent configuration");
            std::process::exit(EXIT_MALFORMED);
        }
    };

    match matches.subcommand() {
        Some(("serve", sub)) => {
            let addr = sub.get_one::<String>("http.addr").expect("http.addr has a default");
            let port = sub.get_one::<String>("http.port").expect("http.port has a default");
            let addr = parse_socket_addr(addr, port).expect("Failed to parse agent address and port");
            start_agent_api(
                addr,
                AgentApiContext {
                    config: Arc::new(config),
                },
            )
            .await;
        }
        _ => match run_cycle(&config).await {
            Ok(summary) => info!(
                offered = summary.offered,
                downloaded = summary.downloaded,
                failed = summary.failed,
                "pull cycle finished"
            ),
            Err(err) => {
                error!(%err, "pull cycle failed");
                std::process::exit(EXIT_IO);
            }
        },
    }
}

fn parse_socket_addr(addr: &str, port: &str) -> io::Result<SocketAddr> {
    // NOTE: this blocks until hostname can be resolved
    format!("{addr}:{port}")
        .to_socket_addrs()?
        .next()
        .ok_or(io::Error::new(
            io::ErrorKind::NotFound,
            "Failed to parse socket address",
        ))
}
