use crate::db::{PreparedStatement, StatementKind};
use crate::descriptor::TypeDescriptor;
use crate::error::{Result, RuntimeError};
use crate::heap::CallableRef;
use crate::runtime::{ReleaseEvent, Runtime};
use crate::value::Value;

/// Compiled function body behind a callable. It receives the callable
/// itself so it can reach its environment and bound statement.
pub type EntryPoint = fn(&mut Runtime, CallableRef, &[Value]) -> Result<Option<Value>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClosureKind {
    Procedural,
    Select,
    Insert,
    Update,
    Delete,
}

impl ClosureKind {
    pub fn statement_kind(self) -> Option<StatementKind> {
        match self {
            ClosureKind::Procedural => None,
            ClosureKind::Select => Some(StatementKind::Select),
            ClosureKind::Insert => Some(StatementKind::Insert),
            ClosureKind::Update => Some(StatementKind::Update),
            ClosureKind::Delete => Some(StatementKind::Delete),
        }
    }
}

#[derive(Debug)]
struct Environment {
    ty: &'static TypeDescriptor,
    blob: Vec<u8>,
}

#[derive(Debug)]
pub(crate) struct CallableObj {
    entry: EntryPoint,
    kind: ClosureKind,
    env: Option<Environment>,
    stmt: Option<PreparedStatement>,
    strong: u32,
}

impl Runtime {
    /// Allocate a callable. The environment blob, when `env_ty` is given,
    /// starts zeroed (every handle field null) until values are captured.
    pub fn callable_new(
        &mut self,
        entry: EntryPoint,
        kind: ClosureKind,
        env_ty: Option<&'static TypeDescriptor>,
    ) -> Result<CallableRef> {
        let env = match env_ty {
            Some(ty) => {
                ty.expect_struct("closure environment")?;
                Some(Environment {
                    ty,
                    blob: vec![0u8; ty.size()],
                })
            }
            None => None,
        };
        let raw = self.callables.insert(CallableObj {
            entry,
            kind,
            env,
            stmt: None,
            strong: 1,
        });
        Ok(CallableRef::from_raw(raw))
    }

    fn callable_obj(&self, c: CallableRef) -> Result<&CallableObj> {
        self.callables.get(c.raw()).ok_or_else(|| c.dangling())
    }

    fn callable_obj_mut(&mut self, c: CallableRef) -> Result<&mut CallableObj> {
        self.callables.get_mut(c.raw()).ok_or_else(|| c.dangling())
    }

    /// Copy a value image into environment field `index`. Ownership moves
    /// with the bytes; no reference count is touched here.
    pub fn callable_capture(&mut self, c: CallableRef, index: usize, value: &[u8]) -> Result<()> {
        let obj = self.callable_obj_mut(c)?;
        let Some(env) = obj.env.as_mut() else {
            return Err(RuntimeError::compiler_logic(format!(
                "capture into callable #{} without an environment",
                c.slot()
            )));
        };
        let ty: &'static TypeDescriptor = env.ty;
        let field = ty.expect_struct("closure environment")?.field(index)?;
        if value.len() != field.ty.size() {
            return Err(RuntimeError::compiler_logic(format!(
                "capture of {} bytes into {}-byte field `{}`",
                value.len(),
                field.ty.size(),
                field.name
            )));
        }
        env.blob[field.range()].copy_from_slice(value);
        Ok(())
    }

    pub fn callable_capture_value(
        &mut self,
        c: CallableRef,
        index: usize,
        value: &Value,
    ) -> Result<()> {
        let Some(env_ty) = self.callable_environment_type(c)? else {
            return Err(RuntimeError::compiler_logic(format!(
                "capture into callable #{} without an environment",
                c.slot()
            )));
        };
        let field = env_ty.expect_struct("closure environment")?.field(index)?;
        let image = value.encode(field.ty)?;
        self.callable_capture(c, index, &image)
    }

    pub fn callable_bind_statement(&mut self, c: CallableRef, stmt: PreparedStatement) -> Result<()> {
        let obj = self.callable_obj_mut(c)?;
        if obj.kind.statement_kind() != Some(stmt.kind()) {
            return Err(RuntimeError::compiler_logic(format!(
                "{:?} statement bound to {:?} callable",
                stmt.kind(),
                obj.kind
            )));
        }
        if obj.stmt.is_some() {
            return Err(RuntimeError::compiler_logic(format!(
                "callable #{} already has a bound statement",
                c.slot()
            )));
        }
        obj.stmt = Some(stmt);
        Ok(())
    }

    pub fn callable_entry_point(&self, c: CallableRef) -> Result<EntryPoint> {
        Ok(self.callable_obj(c)?.entry)
    }

    pub fn callable_kind(&self, c: CallableRef) -> Result<ClosureKind> {
        Ok(self.callable_obj(c)?.kind)
    }

    pub fn callable_environment(&self, c: CallableRef) -> Result<Option<&[u8]>> {
        Ok(self.callable_obj(c)?.env.as_ref().map(|e| e.blob.as_slice()))
    }

    pub fn callable_environment_type(
        &self,
        c: CallableRef,
    ) -> Result<Option<&'static TypeDescriptor>> {
        Ok(self.callable_obj(c)?.env.as_ref().map(|e| e.ty))
    }

    pub fn callable_statement(&self, c: CallableRef) -> Result<Option<&PreparedStatement>> {
        Ok(self.callable_obj(c)?.stmt.as_ref())
    }

    /// Run `f` with the callable's bound statement lent out next to the
    /// runtime. The callable is kept alive for the duration.
    pub fn with_statement<R>(
        &mut self,
        c: CallableRef,
        f: impl FnOnce(&mut Runtime, &mut PreparedStatement) -> Result<R>,
    ) -> Result<R> {
        let obj = self.callable_obj_mut(c)?;
        let Some(mut stmt) = obj.stmt.take() else {
            return Err(RuntimeError::compiler_logic(format!(
                "callable #{} has no bound statement",
                c.slot()
            )));
        };
        obj.strong += 1;
        let out = f(self, &mut stmt);
        self.callable_obj_mut(c)?.stmt = Some(stmt);
        self.callable_release(c)?;
        out
    }

    pub fn invoke(&mut self, c: CallableRef, args: &[Value]) -> Result<Option<Value>> {
        let entry = self.callable_entry_point(c)?;
        entry(self, c, args)
    }

    pub fn callable_ref_count(&self, c: CallableRef) -> Result<u32> {
        Ok(self.callable_obj(c)?.strong)
    }

    pub fn callable_add_ref(&mut self, c: CallableRef) -> Result<()> {
        self.callable_obj_mut(c)?.strong += 1;
        Ok(())
    }

    /// Drop one reference. At zero the environment is dropped field by
    /// field, then the bound statement is finalized.
    pub fn callable_release(&mut self, c: CallableRef) -> Result<()> {
        let obj = self.callable_obj_mut(c)?;
        obj.strong -= 1;
        if obj.strong > 0 {
            return Ok(());
        }
        let Some(obj) = self.callables.take(c.raw()) else {
            return Err(c.dangling());
        };
        let env_res = match &obj.env {
            Some(env) => self.drop_value(env.ty, &env.blob),
            None => Ok(()),
        };
        if let Some(stmt) = obj.stmt {
            let kind = stmt.kind();
            stmt.finalize();
            self.record(ReleaseEvent::Statement { kind });
        }
        self.record(ReleaseEvent::Callable {
            handle: c,
            kind: obj.kind,
        });
        env_res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::descriptor::{StructBuilder, ARRAY, INT, STRING};

    fn noop(_: &mut Runtime, _: CallableRef, _: &[Value]) -> Result<Option<Value>> {
        Ok(None)
    }

    fn add_captured(rt: &mut Runtime, this: CallableRef, args: &[Value]) -> Result<Option<Value>> {
        let ty = rt
            .callable_environment_type(this)?
            .and_then(|t| t.as_struct())
            .ok_or_else(|| RuntimeError::compiler_logic("no environment"))?;
        let env = rt.callable_environment(this)?.unwrap_or_default();
        let base = ty.read_field(env, 0)?.as_int().unwrap_or_default();
        let arg = args.first().and_then(Value::as_int).unwrap_or_default();
        Ok(Some(Value::Int(base + arg)))
    }

    #[test]
    fn capture_writes_at_field_offset() {
        let mut rt = Runtime::default();
        let env = StructBuilder::new()
            .field("n", &INT)
            .field("label", &STRING)
            .leak();
        let c = rt
            .callable_new(add_captured, ClosureKind::Procedural, Some(env))
            .expect("new");
        assert_eq!(rt.callable_environment(c).expect("env"), Some(&[0u8; 8][..]));
        rt.callable_capture(c, 0, &40i32.to_le_bytes()).expect("capture");
        assert_eq!(
            rt.invoke(c, &[Value::Int(2)]).expect("invoke"),
            Some(Value::Int(42))
        );
        assert!(matches!(
            rt.callable_capture(c, 2, &[0; 4]),
            Err(RuntimeError::OutOfRange { index: 2, len: 2 })
        ));
        assert!(rt.callable_capture(c, 1, &[0; 2]).is_err());
    }

    #[test]
    fn no_environment_means_no_capture() {
        let mut rt = Runtime::default();
        let c = rt
            .callable_new(noop, ClosureKind::Procedural, None)
            .expect("new");
        assert_eq!(rt.callable_environment(c).expect("env"), None);
        assert!(rt.callable_capture_value(c, 0, &Value::Int(1)).is_err());
        assert!(rt.callable_new(noop, ClosureKind::Procedural, Some(&INT)).is_err());
    }

    #[test]
    fn release_drops_environment_recursively() {
        let mut rt = Runtime::new(RuntimeConfig::default().with_release_trace());
        let env = StructBuilder::new()
            .field("name", &STRING)
            .field("items", &ARRAY)
            .leak();
        let c = rt
            .callable_new(noop, ClosureKind::Procedural, Some(env))
            .expect("new");
        let name = rt.string_from_vec(b"captured".to_vec());
        let items = rt.array_from_values(&INT, &[Value::Int(1)]).expect("array");
        rt.callable_capture_value(c, 0, &Value::Str(name))
            .expect("capture name");
        rt.callable_capture_value(c, 1, &Value::Array(items))
            .expect("capture items");

        rt.callable_add_ref(c).expect("add_ref");
        rt.callable_release(c).expect("release");
        assert_eq!(rt.callable_ref_count(c).expect("rc"), 1);
        assert_eq!(rt.live_strings(), 1);

        rt.callable_release(c).expect("release");
        assert_eq!(
            rt.take_release_trace(),
            vec![
                ReleaseEvent::String {
                    handle: name,
                    freed_backing: true
                },
                ReleaseEvent::Array {
                    handle: items,
                    len: 1
                },
                ReleaseEvent::Callable {
                    handle: c,
                    kind: ClosureKind::Procedural
                },
            ]
        );
        assert_eq!(rt.live_callables(), 0);
    }

    #[test]
    fn failed_environment_field_still_frees_the_callable() {
        let mut rt = Runtime::new(RuntimeConfig::default().with_release_trace());
        let env = StructBuilder::new()
            .field("gone", &STRING)
            .field("kept", &STRING)
            .leak();
        let c = rt
            .callable_new(noop, ClosureKind::Procedural, Some(env))
            .expect("new");
        let gone = rt.string_from_vec(b"gone".to_vec());
        rt.string_release(gone).expect("release");
        let kept = rt.string_from_vec(b"kept".to_vec());
        rt.callable_capture_value(c, 0, &Value::Str(gone))
            .expect("capture gone");
        rt.callable_capture_value(c, 1, &Value::Str(kept))
            .expect("capture kept");
        rt.take_release_trace();

        let err = rt.callable_release(c).expect_err("stale capture");
        assert!(matches!(err, RuntimeError::DanglingHandle { .. }));
        assert_eq!(
            rt.take_release_trace(),
            vec![
                ReleaseEvent::String {
                    handle: kept,
                    freed_backing: true
                },
                ReleaseEvent::Callable {
                    handle: c,
                    kind: ClosureKind::Procedural
                },
            ]
        );
        assert_eq!(rt.live_strings(), 0);
        assert_eq!(rt.live_callables(), 0);
    }

    #[test]
    fn nested_callables_are_released() {
        let mut rt = Runtime::default();
        let env = StructBuilder::new().field("inner", &crate::descriptor::CALLABLE).leak();
        let inner = rt
            .callable_new(noop, ClosureKind::Procedural, None)
            .expect("inner");
        let outer = rt
            .callable_new(noop, ClosureKind::Procedural, Some(env))
            .expect("outer");
        rt.callable_capture_value(outer, 0, &Value::Callable(inner))
            .expect("capture");
        rt.callable_release(outer).expect("release");
        assert_eq!(rt.live_callables(), 0);
    }

    #[test]
    fn statement_kinds() {
        assert_eq!(ClosureKind::Procedural.statement_kind(), None);
        assert_eq!(
            ClosureKind::Update.statement_kind(),
            Some(StatementKind::Update)
        );
    }

    #[test]
    fn with_statement_requires_a_bound_statement() {
        let mut rt = Runtime::default();
        let c = rt.callable_new(noop, ClosureKind::Select, None).expect("new");
        let err = rt
            .with_statement(c, |_, _| Ok(()))
            .expect_err("nothing bound");
        assert!(matches!(err, RuntimeError::CompilerLogic(_)));
        assert_eq!(rt.callable_ref_count(c).expect("rc"), 1);
    }
}
