use easysql::config::{default_config_path, load_config};
use easysql::{ConnectOptions, ErrorMode, SqlDatabase, Transaction, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: easysql [--config FILE] [--silent] <database> <statement>...";

/// Parsed command line.
#[derive(Debug, Default)]
struct Args {
    config: Option<String>,
    silent: bool,
    database: Option<String>,
    statements: Vec<String>,
}

fn parse_args(mut raw: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut args = Args::default();
    while let Some(arg) = raw.next() {
        match arg.as_str() {
            "--config" => {
                args.config = Some(raw.next().ok_or("--config needs a file")?);
            }
            "--silent" => args.silent = true,
            "-h" | "--help" => return Err(USAGE.to_string()),
            _ if args.database.is_none() => args.database = Some(arg),
            _ => args.statements.push(arg),
        }
    }
    if args.database.is_none() || args.statements.is_empty() {
        return Err(USAGE.to_string());
    }
    Ok(args)
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(t) => t.clone(),
        Value::Blob(b) => format!("<BLOB: {} bytes>", b.len()),
    }
}

fn run(args: Args) -> easysql::Result<bool> {
    let mut mode = if args.silent { ErrorMode::Silent } else { ErrorMode::Raise };

    let config_path = args
        .config
        .map(PathBuf::from)
        .or_else(|| default_config_path().filter(|p| p.exists()));
    if let Some(path) = config_path {
        info!("Loading configuration from {:?}", path);
        let config = load_config(&path)?;
        config.register();
        if !args.silent {
            mode = config.error_mode();
        }
    }

    let database = args.database.unwrap_or_default();
    let handle = SqlDatabase::database(&database)
        .unwrap_or_else(|| SqlDatabase::new(ConnectOptions::new(database.as_str())));

    let mut transaction = Transaction::new(Some(handle), mode)?;
    let mut ok = transaction.started();
    for sql in &args.statements {
        let mut result = transaction.exec_query(sql)?;
        if let Some(e) = result.last_error() {
            eprintln!("{}: {}", sql, e);
            ok = false;
            continue;
        }
        if !result.columns().is_empty() {
            println!("{}", result.columns().join("\t"));
            while result.next() {
                let line: Vec<String> = result.to_list().iter().map(format_value).collect();
                println!("{}", line.join("\t"));
            }
        } else {
            println!("{} row(s) affected", result.rows_affected());
        }
    }

    if ok {
        ok = transaction.commit()?;
    }
    Ok(ok)
}

fn main() -> ExitCode {
    // Initialize the logging system using tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(usage) => {
            eprintln!("{}", usage);
            return ExitCode::from(2);
        }
    };

    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            eprintln!("Transaction rolled back");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{}", e);
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
