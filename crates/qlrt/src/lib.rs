//! Runtime support for compiled QL programs.
//!
//! Generated code calls into this crate for every heap value it touches
//! (strings, dynamic arrays, closures) and for every database statement it
//! issues. Values are byte images shaped by a [`TypeDescriptor`]; handles
//! inside those images point into the slot tables of a [`Runtime`].

pub mod array;
pub mod callable;
pub mod config;
pub mod db;
pub mod descriptor;
pub mod error;
mod heap;
mod runtime;
pub mod string;
pub mod value;

pub use callable::{ClosureKind, EntryPoint};
pub use config::RuntimeConfig;
pub use descriptor::{StructBuilder, StructLayout, TypeDescriptor, TypeTag};
pub use error::{or_trap, trap, Result, RuntimeError};
pub use heap::{ArrayRef, CallableRef, StrRef};
pub use runtime::{ReleaseEvent, Runtime};
pub use value::Value;
