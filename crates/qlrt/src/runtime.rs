use crate::array::ArrayObj;
use crate::callable::{CallableObj, ClosureKind};
use crate::config::RuntimeConfig;
use crate::db::StatementKind;
use crate::descriptor::TypeDescriptor;
use crate::error::{Result, RuntimeError};
use crate::heap::{ArrayRef, CallableRef, Slots, StrRef};
use crate::string::StringObj;

/// One object freed by the runtime, recorded when
/// [`RuntimeConfig::trace_releases`] is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseEvent {
    String { handle: StrRef, freed_backing: bool },
    Array { handle: ArrayRef, len: usize },
    Callable { handle: CallableRef, kind: ClosureKind },
    Statement { kind: StatementKind },
}

/// Owner of every reference-counted object created by generated code.
///
/// Single-threaded: the runtime is neither `Send` nor `Sync` once a
/// callable holds a prepared statement, and nothing in it locks.
#[derive(Debug)]
pub struct Runtime {
    pub(crate) strings: Slots<StringObj>,
    pub(crate) arrays: Slots<ArrayObj>,
    pub(crate) callables: Slots<CallableObj>,
    config: RuntimeConfig,
    trace: Vec<ReleaseEvent>,
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::new(RuntimeConfig::default())
    }
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        Runtime {
            strings: Slots::new(StrRef::KIND),
            arrays: Slots::new(ArrayRef::KIND),
            callables: Slots::new(CallableRef::KIND),
            config,
            trace: Vec::new(),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn live_strings(&self) -> usize {
        self.strings.live()
    }

    pub fn live_arrays(&self) -> usize {
        self.arrays.live()
    }

    pub fn live_callables(&self) -> usize {
        self.callables.live()
    }

    pub fn take_release_trace(&mut self) -> Vec<ReleaseEvent> {
        std::mem::take(&mut self.trace)
    }

    pub(crate) fn record(&mut self, event: ReleaseEvent) {
        tracing::trace!(?event, "free");
        if self.config.trace_releases {
            self.trace.push(event);
        }
    }

    /// Release everything `bytes` owns according to `ty`.
    ///
    /// Strings, arrays and callables lose one strong reference (and are
    /// freed at zero); structs recurse field by field in declaration order;
    /// ints and bools own nothing. Null handles are skipped. A failing field
    /// does not stop the others; the first error is returned.
    pub fn drop_value(&mut self, ty: &TypeDescriptor, bytes: &[u8]) -> Result<()> {
        if bytes.len() != ty.size() {
            return Err(RuntimeError::compiler_logic(format!(
                "dropping {}-byte image as {} ({} bytes)",
                bytes.len(),
                ty.tag().as_str(),
                ty.size()
            )));
        }
        match ty {
            TypeDescriptor::Int | TypeDescriptor::Bool => Ok(()),
            TypeDescriptor::String => {
                let h = StrRef::from_bytes(bytes)?;
                if h.is_null() {
                    return Ok(());
                }
                self.string_release(h)
            }
            TypeDescriptor::Array => {
                let h = ArrayRef::from_bytes(bytes)?;
                if h.is_null() {
                    return Ok(());
                }
                self.array_release(h)
            }
            TypeDescriptor::Callable => {
                let h = CallableRef::from_bytes(bytes)?;
                if h.is_null() {
                    return Ok(());
                }
                self.callable_release(h)
            }
            TypeDescriptor::Struct(layout) => {
                let mut first_err = None;
                for field in layout.fields() {
                    if let Err(err) = self.drop_value(field.ty, &bytes[field.range()]) {
                        first_err.get_or_insert(err);
                    }
                }
                first_err.map_or(Ok(()), Err)
            }
        }
    }
}
