use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use qlrt::db::ConnectionSet;
use qlrt::RuntimeConfig;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "QLRT_LOG";

#[derive(Parser)]
#[command(name = "qlrt-dbinit")]
#[command(about = "Open the databases a compiled program declares, in order.", long_about = None)]
struct Cli {
    /// Database files, in declaration order. `:memory:` opens a private
    /// in-memory database.
    paths: Vec<PathBuf>,

    /// Number of databases the program declares. Defaults to every path
    /// given; extra paths beyond it are ignored.
    #[arg(long)]
    expect: Option<usize>,

    /// SQL script executed on every connection once all are open.
    #[arg(long)]
    schema: Option<PathBuf>,
}

#[derive(Serialize)]
struct Report {
    ok: bool,
    connections: Vec<ConnectionReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorReport>,
}

#[derive(Serialize)]
struct ConnectionReport {
    index: usize,
    path: String,
}

#[derive(Serialize)]
struct ErrorReport {
    code: u32,
    message: String,
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    init_logging();
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = RuntimeConfig::from_env();
    let schema = match &cli.schema {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("read schema: {}", path.display()))?,
        ),
        None => None,
    };
    let expected = cli.expect.unwrap_or(cli.paths.len());

    let report = match bootstrap(&cli.paths, expected, schema.as_deref(), &config) {
        Ok(connections) => Report {
            ok: true,
            connections,
            error: None,
        },
        Err(err) => {
            tracing::error!(code = err.code(), "{err}");
            Report {
                ok: false,
                connections: Vec::new(),
                error: Some(ErrorReport {
                    code: err.code(),
                    message: err.to_string(),
                }),
            }
        }
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(if report.ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn bootstrap(
    paths: &[PathBuf],
    expected: usize,
    schema: Option<&str>,
    config: &RuntimeConfig,
) -> qlrt::Result<Vec<ConnectionReport>> {
    let set = ConnectionSet::from_args(paths.iter().cloned(), expected, config)?;
    if let Some(sql) = schema {
        let result = set.iter().try_for_each(|conn| conn.execute_batch(sql));
        if let Err(err) = result {
            close_quietly(set);
            return Err(err);
        }
    }
    let connections = set
        .iter()
        .enumerate()
        .map(|(index, conn)| ConnectionReport {
            index,
            path: conn.path().display().to_string(),
        })
        .collect();
    set.close_all()?;
    Ok(connections)
}

fn close_quietly(set: ConnectionSet) {
    if let Err(err) = set.close_all() {
        tracing::warn!(code = err.code(), "close after failure: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qlrt::RuntimeError;

    #[test]
    fn cli_parses_paths_and_flags() {
        let cli = Cli::try_parse_from(["qlrt-dbinit", "--expect", "1", "a.db", "b.db"])
            .expect("parse");
        assert_eq!(cli.paths, vec![PathBuf::from("a.db"), PathBuf::from("b.db")]);
        assert_eq!(cli.expect, Some(1));
        assert!(cli.schema.is_none());
    }

    #[test]
    fn bootstrap_reports_missing_databases() {
        let err = bootstrap(
            &[PathBuf::from(":memory:")],
            2,
            None,
            &RuntimeConfig::default(),
        )
        .err()
        .expect("too few paths");
        assert!(matches!(
            err,
            RuntimeError::MissingDatabases {
                expected: 2,
                got: 1
            }
        ));
    }

    #[test]
    fn bootstrap_runs_schema_on_every_connection() {
        let paths = vec![PathBuf::from(":memory:"), PathBuf::from(":memory:")];
        let conns = bootstrap(
            &paths,
            2,
            Some("CREATE TABLE t (x INTEGER);"),
            &RuntimeConfig::default(),
        )
        .expect("bootstrap");
        assert_eq!(conns.len(), 2);
        assert_eq!(conns[1].index, 1);
        assert_eq!(conns[0].path, ":memory:");
    }
}
