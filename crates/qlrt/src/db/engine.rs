//! Thin safe wrappers over the SQLite C API. Every `unsafe` block of the
//! crate lives in this file.

use std::ffi::{c_char, c_int, CStr, CString};
use std::path::Path;

use libsqlite3_sys as sqlite;

use crate::error::{Result, RuntimeError};

const SQLITE_OK: c_int = sqlite::SQLITE_OK as c_int;
const SQLITE_ROW: c_int = sqlite::SQLITE_ROW as c_int;
const SQLITE_DONE: c_int = sqlite::SQLITE_DONE as c_int;
pub(crate) const SQLITE_TOOBIG: c_int = sqlite::SQLITE_TOOBIG as c_int;
pub(crate) const SQLITE_MISMATCH: c_int = sqlite::SQLITE_MISMATCH as c_int;
pub(crate) const SQLITE_MISUSE: c_int = sqlite::SQLITE_MISUSE as c_int;

// Left out of the libsqlite3-sys bindings; the bundled library exports it.
extern "C" {
    fn sqlite3_close_v2(db: *mut sqlite::sqlite3) -> c_int;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Blob,
    Null,
}

unsafe fn last_errmsg(db: *mut sqlite::sqlite3) -> String {
    if db.is_null() {
        return String::new();
    }
    let msg = sqlite::sqlite3_errmsg(db);
    if msg.is_null() {
        return String::new();
    }
    CStr::from_ptr(msg).to_string_lossy().into_owned()
}

fn c_text(op: &'static str, text: &str) -> Result<CString> {
    CString::new(text).map_err(|_| RuntimeError::Statement {
        op,
        rc: SQLITE_MISUSE,
        message: "embedded NUL in statement text".to_string(),
    })
}

#[derive(Debug)]
pub(crate) struct RawConnection {
    db: *mut sqlite::sqlite3,
}

impl RawConnection {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let conn_err = |message: String| RuntimeError::Connection {
            path: path.to_path_buf(),
            message,
        };
        let text = path
            .to_str()
            .ok_or_else(|| conn_err("path is not valid UTF-8".to_string()))?;
        let cpath = CString::new(text).map_err(|_| conn_err("path contains NUL".to_string()))?;

        let mut db: *mut sqlite::sqlite3 = std::ptr::null_mut();
        let flags = sqlite::SQLITE_OPEN_READWRITE | sqlite::SQLITE_OPEN_CREATE;
        let rc = unsafe { sqlite::sqlite3_open_v2(cpath.as_ptr(), &mut db, flags, std::ptr::null()) };
        if rc != SQLITE_OK || db.is_null() {
            let msg = unsafe { last_errmsg(db) };
            if !db.is_null() {
                unsafe {
                    let _ = sqlite::sqlite3_close(db);
                }
            }
            return Err(conn_err(msg));
        }
        Ok(RawConnection { db })
    }

    pub(crate) fn busy_timeout(&self, ms: u32) {
        let ms = ms.min(c_int::MAX as u32) as c_int;
        unsafe {
            let _ = sqlite::sqlite3_busy_timeout(self.db, ms);
        }
    }

    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        let csql = c_text("exec", sql)?;
        let mut errmsg: *mut c_char = std::ptr::null_mut();
        let rc = unsafe {
            sqlite::sqlite3_exec(self.db, csql.as_ptr(), None, std::ptr::null_mut(), &mut errmsg)
        };
        if rc == SQLITE_OK {
            return Ok(());
        }
        let message = if errmsg.is_null() {
            unsafe { last_errmsg(self.db) }
        } else {
            let m = unsafe { CStr::from_ptr(errmsg).to_string_lossy().into_owned() };
            unsafe { sqlite::sqlite3_free(errmsg.cast()) };
            m
        };
        Err(RuntimeError::Statement {
            op: "exec",
            rc,
            message,
        })
    }

    pub(crate) fn prepare(&self, sql: &str) -> Result<RawStatement> {
        let csql = c_text("prepare", sql)?;
        let mut stmt: *mut sqlite::sqlite3_stmt = std::ptr::null_mut();
        let rc = unsafe {
            sqlite::sqlite3_prepare_v2(self.db, csql.as_ptr(), -1, &mut stmt, std::ptr::null_mut())
        };
        if rc != SQLITE_OK || stmt.is_null() {
            let message = unsafe { last_errmsg(self.db) };
            if !stmt.is_null() {
                unsafe {
                    let _ = sqlite::sqlite3_finalize(stmt);
                }
            }
            return Err(RuntimeError::Statement {
                op: "prepare",
                rc,
                message,
            });
        }
        Ok(RawStatement { stmt })
    }

    pub(crate) fn close(mut self) -> Result<()> {
        let db = std::mem::replace(&mut self.db, std::ptr::null_mut());
        let rc = unsafe { sqlite3_close_v2(db) };
        if rc != SQLITE_OK {
            return Err(RuntimeError::Statement {
                op: "close",
                rc,
                message: unsafe { last_errmsg(db) },
            });
        }
        Ok(())
    }
}

impl Drop for RawConnection {
    fn drop(&mut self) {
        if self.db.is_null() {
            return;
        }
        // close_v2 defers the real close until outstanding statements are
        // finalized, so statements may outlive their connection value.
        unsafe {
            let _ = sqlite3_close_v2(self.db);
        }
    }
}

#[derive(Debug)]
pub(crate) struct RawStatement {
    stmt: *mut sqlite::sqlite3_stmt,
}

impl RawStatement {
    fn error(&self, op: &'static str, rc: c_int) -> RuntimeError {
        let message = unsafe { last_errmsg(sqlite::sqlite3_db_handle(self.stmt)) };
        RuntimeError::Statement { op, rc, message }
    }

    fn check(&self, op: &'static str, rc: c_int) -> Result<()> {
        if rc != SQLITE_OK {
            return Err(self.error(op, rc));
        }
        Ok(())
    }

    pub(crate) fn bind_int(&mut self, position: u32, v: i32) -> Result<()> {
        let rc = unsafe { sqlite::sqlite3_bind_int(self.stmt, position as c_int, v) };
        self.check("bind", rc)
    }

    /// Binds a private copy of `text` (`SQLITE_TRANSIENT`).
    pub(crate) fn bind_text(&mut self, position: u32, text: &[u8]) -> Result<()> {
        let Ok(len) = c_int::try_from(text.len()) else {
            return Err(RuntimeError::Statement {
                op: "bind",
                rc: SQLITE_TOOBIG,
                message: format!("{} byte text value", text.len()),
            });
        };
        let rc = unsafe {
            sqlite::sqlite3_bind_text(
                self.stmt,
                position as c_int,
                text.as_ptr() as *const c_char,
                len,
                sqlite::SQLITE_TRANSIENT(),
            )
        };
        self.check("bind", rc)
    }

    pub(crate) fn bind_parameter_count(&self) -> usize {
        let n = unsafe { sqlite::sqlite3_bind_parameter_count(self.stmt) };
        n.max(0) as usize
    }

    /// `Ok(true)` when a row is available, `Ok(false)` when done.
    pub(crate) fn step(&mut self) -> Result<bool> {
        let rc = unsafe { sqlite::sqlite3_step(self.stmt) };
        match rc {
            SQLITE_ROW => Ok(true),
            SQLITE_DONE => Ok(false),
            _ => Err(self.error("step", rc)),
        }
    }

    pub(crate) fn reset(&mut self) {
        // The return code repeats the last step's error, already reported.
        unsafe {
            let _ = sqlite::sqlite3_reset(self.stmt);
        }
    }

    pub(crate) fn column_count(&self) -> usize {
        let n = unsafe { sqlite::sqlite3_column_count(self.stmt) };
        n.max(0) as usize
    }

    pub(crate) fn column_type(&self, i: usize) -> ColumnType {
        match unsafe { sqlite::sqlite3_column_type(self.stmt, i as c_int) } {
            sqlite::SQLITE_INTEGER => ColumnType::Integer,
            sqlite::SQLITE_FLOAT => ColumnType::Float,
            sqlite::SQLITE_TEXT => ColumnType::Text,
            sqlite::SQLITE_BLOB => ColumnType::Blob,
            _ => ColumnType::Null,
        }
    }

    pub(crate) fn column_int(&self, i: usize) -> i32 {
        unsafe { sqlite::sqlite3_column_int(self.stmt, i as c_int) }
    }

    pub(crate) fn column_text(&self, i: usize) -> Vec<u8> {
        unsafe {
            let ptr = sqlite::sqlite3_column_text(self.stmt, i as c_int);
            let n = sqlite::sqlite3_column_bytes(self.stmt, i as c_int);
            if ptr.is_null() || n <= 0 {
                return Vec::new();
            }
            std::slice::from_raw_parts(ptr, n as usize).to_vec()
        }
    }
}

impl Drop for RawStatement {
    fn drop(&mut self) {
        unsafe {
            let _ = sqlite::sqlite3_finalize(self.stmt);
        }
    }
}
