use std::path::{Path, PathBuf};

use crate::config::RuntimeConfig;
use crate::db::engine::{RawConnection, RawStatement};
use crate::error::{Result, RuntimeError};

#[derive(Debug)]
pub struct Connection {
    raw: RawConnection,
    path: PathBuf,
}

impl Connection {
    pub fn open(path: impl AsRef<Path>, config: &RuntimeConfig) -> Result<Self> {
        let path = path.as_ref();
        let raw = RawConnection::open(path)?;
        if config.busy_timeout_ms != 0 {
            raw.busy_timeout(config.busy_timeout_ms);
        }
        tracing::debug!(path = %path.display(), "opened database");
        Ok(Connection {
            raw,
            path: path.to_path_buf(),
        })
    }

    pub fn open_in_memory(config: &RuntimeConfig) -> Result<Self> {
        Connection::open(":memory:", config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a semicolon-separated script (schema setup, fixtures).
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.raw.execute_batch(sql)
    }

    pub(crate) fn prepare_raw(&self, sql: &str) -> Result<RawStatement> {
        self.raw.prepare(sql)
    }

    pub fn close(self) -> Result<()> {
        tracing::debug!(path = %self.path.display(), "closing database");
        self.raw.close()
    }
}

/// The databases a program declared, opened once at startup and passed by
/// reference to every query operation.
#[derive(Debug, Default)]
pub struct ConnectionSet {
    conns: Vec<Connection>,
}

impl ConnectionSet {
    /// Open every path in order. On the first failure the connections
    /// already opened are closed, in opening order, before the error is
    /// returned.
    pub fn open_all<P: AsRef<Path>>(paths: &[P], config: &RuntimeConfig) -> Result<Self> {
        let mut conns: Vec<Connection> = Vec::with_capacity(paths.len());
        for path in paths {
            match Connection::open(path, config) {
                Ok(conn) => conns.push(conn),
                Err(err) => {
                    for conn in conns {
                        if let Err(close_err) = conn.close() {
                            tracing::warn!("{close_err}");
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(ConnectionSet { conns })
    }

    /// Bootstrap from command-line arguments (program name already
    /// stripped). The first `expected` arguments name the databases.
    pub fn from_args<I, S>(args: I, expected: usize, config: &RuntimeConfig) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<PathBuf>,
    {
        let paths: Vec<PathBuf> = args.into_iter().map(Into::into).collect();
        if paths.len() < expected {
            return Err(RuntimeError::MissingDatabases {
                expected,
                got: paths.len(),
            });
        }
        ConnectionSet::open_all(&paths[..expected], config)
    }

    pub fn get(&self, index: usize) -> Option<&Connection> {
        self.conns.get(index)
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.conns.iter()
    }

    /// Close every connection, reporting the first failure.
    pub fn close_all(self) -> Result<()> {
        let mut first_err = None;
        for conn in self.conns {
            if let Err(err) = conn.close() {
                tracing::warn!("{err}");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
