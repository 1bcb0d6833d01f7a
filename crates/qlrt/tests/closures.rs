use qlrt::db::{Connection, DeletePlan, InsertPlan, QueryValue, SelectPlan, StatementKind};
use qlrt::descriptor::{INT, STRING};
use qlrt::{
    CallableRef, ClosureKind, ReleaseEvent, Result, Runtime, RuntimeConfig, RuntimeError,
    StructBuilder, TypeDescriptor, Value,
};

fn item_row() -> &'static TypeDescriptor {
    StructBuilder::new()
        .field("id", &INT)
        .field("label", &STRING)
        .leak()
}

fn setup() -> (Runtime, Connection) {
    let cfg = RuntimeConfig::default().with_release_trace();
    let conn = Connection::open_in_memory(&cfg).expect("open");
    conn.execute_batch(
        "CREATE TABLE items (id INTEGER, label TEXT);
         INSERT INTO items VALUES (1, 'one');
         INSERT INTO items VALUES (2, 'two');
         INSERT INTO items VALUES (3, 'three');",
    )
    .expect("schema");
    (Runtime::new(cfg), conn)
}

/// Entry point of a generated `select ... where id = $0` query function.
fn select_by_id(rt: &mut Runtime, this: CallableRef, args: &[Value]) -> Result<Option<Value>> {
    rt.with_statement(this, |rt, stmt| {
        for (i, arg) in args.iter().enumerate() {
            stmt.bind_param(rt, i as u32, arg)?;
        }
        Ok(stmt.execute(rt)?.map(Value::Array))
    })
}

/// Entry point of a generated `delete ... where id = $0` query function.
fn delete_by_id(rt: &mut Runtime, this: CallableRef, args: &[Value]) -> Result<Option<Value>> {
    rt.with_statement(this, |rt, stmt| {
        stmt.bind_param(rt, 0, &args[0])?;
        stmt.execute(rt)?;
        Ok(None)
    })
}

fn labels(rt: &Runtime, out: &Value) -> Vec<String> {
    let a = out.as_array().expect("array result");
    (0..rt.array_len(a).expect("len"))
        .map(|i| {
            let fields = rt.array_get(a, i).expect("row").into_fields().expect("fields");
            let label = fields[1].as_str().expect("label");
            String::from_utf8_lossy(rt.string_bytes(label).expect("bytes")).into_owned()
        })
        .collect()
}

#[test]
fn query_closure_runs_its_bound_statement() {
    let (mut rt, conn) = setup();
    let mut plan = SelectPlan::new("items", item_row(), 1);
    plan.set_where("id", QueryValue::param(0));
    let stmt = plan.prepare(&rt, &conn).expect("prepare");

    let f = rt
        .callable_new(select_by_id, ClosureKind::Select, None)
        .expect("callable");
    rt.callable_bind_statement(f, stmt).expect("bind statement");
    assert_eq!(
        rt.callable_statement(f).expect("live").map(|s| s.kind()),
        Some(StatementKind::Select)
    );

    for (id, want) in [(2, "two"), (3, "three")] {
        let out = rt
            .invoke(f, &[Value::Int(id)])
            .expect("invoke")
            .expect("result");
        assert_eq!(labels(&rt, &out), vec![want.to_string()]);
        rt.array_release(out.as_array().expect("array")).expect("release");
    }
    assert_eq!(rt.callable_ref_count(f).expect("rc"), 1);
    assert!(rt.callable_statement(f).expect("live").is_some());

    rt.take_release_trace();
    rt.callable_release(f).expect("release");
    assert_eq!(
        rt.take_release_trace(),
        vec![
            ReleaseEvent::Statement {
                kind: StatementKind::Select
            },
            ReleaseEvent::Callable {
                handle: f,
                kind: ClosureKind::Select
            },
        ]
    );
    assert_eq!(rt.live_callables(), 0);
    assert_eq!(rt.live_strings(), 0);
}

#[test]
fn mutation_closure_changes_the_table() {
    let (mut rt, conn) = setup();
    let mut plan = DeletePlan::new("items", 1);
    plan.set_where("id", QueryValue::param(0));
    let del = rt
        .callable_new(delete_by_id, ClosureKind::Delete, None)
        .expect("callable");
    rt.callable_bind_statement(del, plan.prepare(&rt, &conn).expect("prepare"))
        .expect("bind");
    assert_eq!(rt.invoke(del, &[Value::Int(1)]).expect("invoke"), None);

    let all = SelectPlan::new("items", item_row(), 0)
        .prepare(&rt, &conn)
        .expect("prepare select");
    let sel = rt
        .callable_new(select_by_id, ClosureKind::Select, None)
        .expect("callable");
    rt.callable_bind_statement(sel, all).expect("bind");
    let out = rt.invoke(sel, &[]).expect("invoke").expect("rows");
    assert_eq!(labels(&rt, &out), vec!["two".to_string(), "three".to_string()]);

    rt.array_release(out.as_array().expect("array")).expect("release");
    rt.callable_release(sel).expect("release sel");
    rt.callable_release(del).expect("release del");
    assert_eq!(rt.live_callables(), 0);
}

#[test]
fn statement_kind_must_match_closure_kind() {
    let (mut rt, conn) = setup();
    let insert = InsertPlan::new("items", item_row(), 0)
        .prepare(&rt, &conn)
        .expect("prepare");
    let f = rt
        .callable_new(select_by_id, ClosureKind::Select, None)
        .expect("callable");
    let err = rt.callable_bind_statement(f, insert).expect_err("mismatch");
    assert!(matches!(err, RuntimeError::CompilerLogic(_)));
    assert!(rt.callable_statement(f).expect("live").is_none());

    let proc_ = rt
        .callable_new(select_by_id, ClosureKind::Procedural, None)
        .expect("callable");
    let err = rt.invoke(proc_, &[]).expect_err("nothing bound");
    assert!(matches!(err, RuntimeError::CompilerLogic(_)));
    // The failed lookup must not leak a reference.
    assert_eq!(rt.callable_ref_count(proc_).expect("rc"), 1);

    rt.callable_release(f).expect("release");
    rt.callable_release(proc_).expect("release");
}

#[test]
fn statement_outlives_its_connection_inside_a_closure() {
    let (mut rt, conn) = setup();
    let mut plan = SelectPlan::new("items", item_row(), 1);
    plan.set_where("id", QueryValue::param(0));
    let stmt = plan.prepare(&rt, &conn).expect("prepare");
    let f = rt
        .callable_new(select_by_id, ClosureKind::Select, None)
        .expect("callable");
    rt.callable_bind_statement(f, stmt).expect("bind");

    conn.close().expect("close defers while statements live");
    let out = rt
        .invoke(f, &[Value::Int(1)])
        .expect("invoke")
        .expect("rows");
    assert_eq!(labels(&rt, &out), vec!["one".to_string()]);
    rt.array_release(out.as_array().expect("array")).expect("release");
    rt.callable_release(f).expect("release");
}

#[test]
fn environment_drops_before_statement_finalizes() {
    let (mut rt, conn) = setup();
    let env = StructBuilder::new().field("tag", &STRING).leak();
    let stmt = SelectPlan::new("items", item_row(), 0)
        .prepare(&rt, &conn)
        .expect("prepare");
    let f = rt
        .callable_new(select_by_id, ClosureKind::Select, Some(env))
        .expect("callable");
    let tag = rt.string_from_vec(b"captured".to_vec());
    rt.callable_capture_value(f, 0, &Value::Str(tag)).expect("capture");
    rt.callable_bind_statement(f, stmt).expect("bind");

    rt.take_release_trace();
    rt.callable_release(f).expect("release");
    assert_eq!(
        rt.take_release_trace(),
        vec![
            ReleaseEvent::String {
                handle: tag,
                freed_backing: true
            },
            ReleaseEvent::Statement {
                kind: StatementKind::Select
            },
            ReleaseEvent::Callable {
                handle: f,
                kind: ClosureKind::Select
            },
        ]
    );
}
