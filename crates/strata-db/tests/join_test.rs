//! Stream-table joins over a relational table.

use std::collections::BTreeMap;
use std::time::Duration;

use strata_core::join::{JoinOutput, OutputEventType, ProjectionItem};
use strata_core::window::WindowSpec;
use strata_core::{AttributeType, AttributeValue, ConditionExpr, StreamDefinition, StreamEvent, TableDefinition};
use strata_db::{ExecutionPlan, ExecutionPlanBuilder, JoinSpec, PlanError};
use strata_rdbms::StoreConfig;
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn foo_stream() -> StreamDefinition {
    StreamDefinition::new("FooStream")
        .attribute("name", AttributeType::String)
        .attribute("category", AttributeType::String)
        .attribute("volume", AttributeType::Long)
}

fn stock_stream() -> StreamDefinition {
    StreamDefinition::new("StockStream")
        .attribute("itemId", AttributeType::String)
        .attribute("type", AttributeType::String)
        .attribute("volume", AttributeType::Long)
}

fn stock_table() -> TableDefinition {
    TableDefinition::new("StockTable")
        .attribute("itemId", AttributeType::String)
        .attribute("type", AttributeType::String)
        .attribute("volume", AttributeType::Long)
}

fn store(dir: &TempDir) -> StoreConfig {
    StoreConfig::new("rdbms")
        .option(
            "jdbc.url",
            format!("sqlite:{}", dir.path().join("join.db").display()),
        )
        .option("field.length", "itemId:100")
}

fn on_item_id() -> ConditionExpr {
    ConditionExpr::eq(
        ConditionExpr::attr("FooStream", "name"),
        ConditionExpr::attr("StockTable", "itemId"),
    )
}

fn projection() -> Vec<ProjectionItem> {
    vec![
        ProjectionItem::stream("name").alias("checkName"),
        ProjectionItem::table("type").alias("checkCategory"),
        ProjectionItem::table("volume").alias("checkVolume"),
    ]
}

fn plan(dir: &TempDir, window: WindowSpec, output: OutputEventType) -> ExecutionPlan {
    ExecutionPlanBuilder::new()
        .define_stream(foo_stream())
        .define_stream(stock_stream())
        .define_table(stock_table(), store(dir))
        .insert_into("StockStream", "StockTable")
        .join(
            JoinSpec::new("FooStream", "StockTable", window)
                .on(on_item_id())
                .select(projection())
                .output(output),
        )
        .build()
        .unwrap()
}

fn stock(plan: &ExecutionPlan, ts: i64, item: &str, kind: &str, volume: i64) {
    let event = StreamEvent::new(
        "StockStream",
        ts,
        vec![item.into(), kind.into(), volume.into()],
    );
    assert!(plan.send("StockStream", event).unwrap().is_empty());
}

fn foo(plan: &ExecutionPlan, ts: i64, name: &str) -> JoinOutput {
    let event = StreamEvent::new("FooStream", ts, vec![name.into(), "".into(), 0i64.into()]);
    let mut outputs = plan.send("FooStream", event).unwrap();
    assert_eq!(outputs.len(), 1);
    outputs.remove(0)
}

fn expected(name: &str, kind: &str, volume: i64) -> Vec<AttributeValue> {
    vec![name.into(), kind.into(), volume.into()]
}

#[test]
fn test_length_one_window_join() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let plan = plan(&dir, WindowSpec::Length(1), OutputEventType::Current);
    stock(&plan, 0, "WSO2", "type1", 100);
    stock(&plan, 1, "CSC", "type2", 10);
    stock(&plan, 2, "IBM", "type3", 10);

    let mut current = Vec::new();
    let mut expired = 0;
    for (ts, name) in [(3, "WSO2"), (4, "IBM")] {
        let out = foo(&plan, ts, name);
        current.extend(out.current);
        expired += out.expired.len();
    }
    assert_eq!(
        current,
        vec![expected("WSO2", "type1", 100), expected("IBM", "type3", 10)]
    );
    assert_eq!(expired, 0);
    plan.shutdown();
}

#[test]
fn test_length_five_window_join() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let plan = plan(&dir, WindowSpec::Length(5), OutputEventType::Current);
    let rows = [
        ("WSO2", "type1", 100),
        ("CSC", "type2", 10),
        ("IBM", "type3", 10),
        ("MSFT", "type4", 10),
        ("MIT", "type5", 10),
    ];
    for (i, (item, kind, volume)) in rows.iter().enumerate() {
        stock(&plan, i as i64, item, kind, *volume);
    }
    let mut current = Vec::new();
    for (i, (item, _, _)) in rows.iter().enumerate() {
        let out = foo(&plan, 10 + i as i64, item);
        assert!(out.expired.is_empty());
        current.extend(out.current);
    }
    let want: Vec<_> = rows
        .iter()
        .map(|(item, kind, volume)| expected(item, kind, *volume))
        .collect();
    assert_eq!(current, want);
}

#[test]
fn test_time_window_join() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let plan = plan(
        &dir,
        WindowSpec::Time(Duration::from_secs(5)),
        OutputEventType::Current,
    );
    stock(&plan, 0, "WSO2", "type1", 100);
    stock(&plan, 0, "CSC", "type2", 10);
    stock(&plan, 0, "IBM", "type3", 10);

    let mut count = 0;
    let mut expired = 0;
    for (ts, name) in [
        (0, "WSO2"),
        (1_000, "CSC"),
        (7_000, "IBM"),
        (8_000, "MSFT"),
        (14_000, "MIT"),
    ] {
        let out = foo(&plan, ts, name);
        count += out.current.len();
        expired += out.expired.len();
    }
    assert_eq!(count, 3);
    assert_eq!(expired, 0);
}

#[test]
fn test_expired_events_joined_when_requested() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let plan = plan(
        &dir,
        WindowSpec::Time(Duration::from_secs(5)),
        OutputEventType::All,
    );
    stock(&plan, 0, "WSO2", "type1", 100);
    stock(&plan, 0, "CSC", "type2", 10);

    assert!(foo(&plan, 0, "WSO2").expired.is_empty());
    assert!(foo(&plan, 1_000, "CSC").expired.is_empty());
    let out = foo(&plan, 7_000, "IBM");
    assert!(out.current.is_empty());
    assert_eq!(
        out.expired,
        vec![expected("WSO2", "type1", 100), expected("CSC", "type2", 10)]
    );
}

#[test]
fn test_event_leaving_time_window_is_not_matched_again() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let plan = plan(
        &dir,
        WindowSpec::Time(Duration::from_secs(5)),
        OutputEventType::All,
    );
    stock(&plan, 0, "WSO2", "type1", 100);

    let first = foo(&plan, 0, "WSO2");
    assert_eq!(first.current, vec![expected("WSO2", "type1", 100)]);
    assert!(first.expired.is_empty());

    stock(&plan, 1_000, "IBM", "type3", 10);
    let out = foo(&plan, 7_000, "IBM");
    assert_eq!(out.current, vec![expected("IBM", "type3", 10)]);
    assert_eq!(out.expired, vec![expected("WSO2", "type1", 100)]);

    // a second WSO2 row does not revive the expired event
    stock(&plan, 7_500, "WSO2", "type9", 5);
    let out = foo(&plan, 8_000, "MSFT");
    assert!(out.current.is_empty());
    assert!(out.expired.is_empty());

    let out = foo(&plan, 13_000, "MSFT");
    assert!(out.current.is_empty());
    assert_eq!(out.expired, vec![expected("IBM", "type3", 10)]);
}

#[test]
fn test_engine_side_aggregation_over_unconditioned_join() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let plan = ExecutionPlanBuilder::new()
        .define_stream(foo_stream())
        .define_stream(stock_stream())
        .define_table(stock_table(), store(&dir))
        .insert_into("StockStream", "StockTable")
        .join(
            JoinSpec::new("FooStream", "StockTable", WindowSpec::Length(1)).select([
                ProjectionItem::stream("name"),
                ProjectionItem::table("itemId"),
                ProjectionItem::table("type"),
                ProjectionItem::table("volume"),
            ]),
        )
        .build()
        .unwrap();
    stock(&plan, 0, "WSO2", "type1", 100);
    stock(&plan, 1, "WSO2", "type1", 200);
    stock(&plan, 2, "IBM", "type2", 30);

    let out = foo(&plan, 3, "WSO2");
    assert_eq!(out.current.len(), 3);

    // avg(volume) group by itemId having avg > 50
    let mut groups: BTreeMap<String, (AttributeValue, AttributeValue, f64, u32)> = BTreeMap::new();
    for row in &out.current {
        let key = row[1].as_str().unwrap().to_string();
        let entry = groups
            .entry(key)
            .or_insert_with(|| (row[0].clone(), row[2].clone(), 0.0, 0));
        entry.2 += row[3].as_f64().unwrap();
        entry.3 += 1;
    }
    let results: Vec<Vec<AttributeValue>> = groups
        .into_values()
        .map(|(name, kind, sum, n)| (name, kind, sum / f64::from(n)))
        .filter(|(_, _, avg)| *avg > 50.0)
        .map(|(name, kind, avg)| vec![name, kind, AttributeValue::Double(avg)])
        .collect();
    assert_eq!(
        results,
        vec![vec!["WSO2".into(), "type1".into(), AttributeValue::Double(150.0)]]
    );
}

#[test]
fn test_join_on_undeclared_table_fails_at_build() {
    let dir = tempfile::tempdir().unwrap();
    let err = ExecutionPlanBuilder::new()
        .define_stream(foo_stream())
        .define_table(stock_table(), store(&dir))
        .join(JoinSpec::new("FooStream", "FooTable", WindowSpec::Length(1)).on(on_item_id()))
        .build()
        .unwrap_err();
    assert!(matches!(err, PlanError::TableNotFound(ref t) if t == "FooTable"));
    assert!(err.is_compile_time());
    assert!(!dir.path().join("join.db").exists());
}

#[test]
fn test_join_from_undeclared_stream_fails_at_build() {
    let dir = tempfile::tempdir().unwrap();
    let err = ExecutionPlanBuilder::new()
        .define_stream(stock_stream())
        .define_table(stock_table(), store(&dir))
        .join(JoinSpec::new("FooStream", "StockTable", WindowSpec::Length(1)).on(on_item_id()))
        .build()
        .unwrap_err();
    assert!(matches!(err, PlanError::StreamNotFound(ref s) if s == "FooStream"));
}

#[test]
fn test_function_condition_rejected_at_build() {
    let dir = tempfile::tempdir().unwrap();
    let on = ConditionExpr::compare(
        strata_core::CompareOp::Gt,
        ConditionExpr::function("avg", vec![ConditionExpr::attr("StockTable", "volume")]),
        ConditionExpr::lit(50i64),
    );
    let err = ExecutionPlanBuilder::new()
        .define_stream(foo_stream())
        .define_table(stock_table(), store(&dir))
        .join(JoinSpec::new("FooStream", "StockTable", WindowSpec::Length(1)).on(on))
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        PlanError::Store(strata_rdbms::StoreError::UnsupportedCondition(_))
    ));
    assert!(err.is_compile_time());
}

#[test]
fn test_send_after_shutdown_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let plan = plan(&dir, WindowSpec::Length(1), OutputEventType::Current);
    plan.shutdown();
    assert!(plan.is_shut_down());
    let event = StreamEvent::new("FooStream", 0, vec!["WSO2".into(), "".into(), 0i64.into()]);
    assert!(matches!(plan.send("FooStream", event), Err(PlanError::Shutdown)));
}

#[test]
fn test_send_to_unknown_stream() {
    let dir = tempfile::tempdir().unwrap();
    let plan = plan(&dir, WindowSpec::Length(1), OutputEventType::Current);
    let event = StreamEvent::new("BarStream", 0, vec![]);
    assert!(matches!(
        plan.send("BarStream", event),
        Err(PlanError::StreamNotFound(_))
    ));
}
