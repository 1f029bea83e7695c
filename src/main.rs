//! kvdb - a transactional key-value store
//!
//! This is the main entry point for the kvdb command-line interface.

use std::path::PathBuf;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use kvdb::db::{Backend, Database, DatabaseConfig, Repl, Reply};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    // Parse simple command line args.
    let mut path: Option<PathBuf> = None;
    let mut config_file: Option<PathBuf> = None;
    let mut table: Option<String> = None;
    let mut memory = false;
    let mut verbose = false;
    let mut execute: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-m" | "--memory" => {
                memory = true;
            }
            "-t" | "--table" => {
                i += 1;
                if i < args.len() {
                    table = Some(args[i].clone());
                }
            }
            "-c" | "--config" => {
                i += 1;
                if i < args.len() {
                    config_file = Some(PathBuf::from(&args[i]));
                }
            }
            "-v" | "--verbose" => {
                verbose = true;
            }
            "-e" | "--execute" => {
                i += 1;
                if i < args.len() {
                    execute = Some(args[i].clone());
                }
            }
            "-h" | "--help" => {
                print_help();
                return ExitCode::SUCCESS;
            }
            "--version" => {
                println!("kvdb v{}", env!("CARGO_PKG_VERSION"));
                return ExitCode::SUCCESS;
            }
            arg => {
                // Treat as database path if no flag.
                if !arg.starts_with('-') {
                    path = Some(PathBuf::from(arg));
                } else {
                    eprintln!("Unknown option: {}", arg);
                    return ExitCode::FAILURE;
                }
            }
        }
        i += 1;
    }

    let mut config = match config_file {
        Some(file) => match DatabaseConfig::from_file(&file) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading config: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => DatabaseConfig::default(),
    };
    if let Some(path) = path {
        config.path = path;
    }
    if let Some(table) = table {
        config = config.table(table);
    }
    if memory {
        config = config.backend(Backend::Memory);
    }
    if verbose {
        config = config.verbose(true);
    }

    init_logging(config.verbose);

    let db = match Database::open_with_config(config) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Error opening database: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Execute single command or run REPL.
    let result = match execute {
        Some(cmd) => execute_command(db, &cmd),
        None => run_repl(db),
    };
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "kvdb=debug" } else { "kvdb=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_help() {
    println!("kvdb - a transactional key-value store");
    println!();
    println!("Usage: kvdb [OPTIONS] [PATH]");
    println!();
    println!("Options:");
    println!("  -m, --memory           Use the volatile in-memory backend");
    println!("  -t, --table NAME       Table holding the records (default: records)");
    println!("  -c, --config FILE      Load configuration from a JSON file");
    println!("  -e, --execute CMD      Execute one command and exit");
    println!("  -v, --verbose          Enable debug logging");
    println!("  -h, --help             Show this help message");
    println!("  --version              Show version");
    println!();
    println!("PATH is the Git repository directory (default: .kvdb).");
    println!("RUST_LOG overrides the log filter.");
    println!();
    println!("Examples:");
    println!("  kvdb                                   Start REPL with default database");
    println!("  kvdb mydb                              Start REPL with 'mydb' database");
    println!("  kvdb -e '.get user:1'                  Read a record and exit");
    println!(r#"  kvdb -e '.tx {{"strListCreates": ["feed"]}}'  Apply a transaction and exit"#);
}

fn execute_command(db: Database, cmd: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut repl = Repl::new(db);
    if let Reply::Output(text) = repl.evaluate(cmd)? {
        println!("{}", text);
    }
    Ok(())
}

fn run_repl(db: Database) -> Result<(), Box<dyn std::error::Error>> {
    let mut repl = Repl::new(db);
    repl.run()?;
    Ok(())
}
