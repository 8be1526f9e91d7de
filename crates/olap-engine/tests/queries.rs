mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{database, session, session_without_statistics, set, unit_sales};
use olap_engine::{EngineConfig, ExecutionHandle, Exp, OlapError, Query};
use olap_model::Value;
use pretty_assertions::assert_eq;

fn year_by_country() -> Query {
    Query::new("Sales")
        .on_axis(set(&["[Measures].[Unit Sales]"]))
        .on_axis(Exp::set(vec![Exp::tuple(vec![
            Exp::name("[Time].[1997]"),
            Exp::name("[Store].[USA]"),
        ])]))
}

#[test]
fn one_cell_takes_one_batch_and_one_statement() {
    let db = database("ANSI");
    let session = session(&db, EngineConfig::default());
    let query = session.compile(&year_by_country()).unwrap();
    let cells = session.execute(&query, &ExecutionHandle::new()).unwrap();

    let expected = unit_sales(|r| r.year() == 1997 && r.country() == "USA");
    assert_eq!(cells.cell(&[0, 0]).unwrap().value, Value::from(expected));
    assert_eq!(db.statement_count(), 1);
    assert_eq!(session.statement_count(), 1);
    assert_eq!(db.open_connections(), 0);
}

#[test]
fn repeated_execution_is_answered_from_the_cache() {
    let db = database("ANSI");
    let session = session(&db, EngineConfig::default());
    let query = session.compile(&year_by_country()).unwrap();
    let first = session.execute(&query, &ExecutionHandle::new()).unwrap();
    let second = session.execute(&query, &ExecutionHandle::new()).unwrap();
    assert_eq!(first, second);
    assert_eq!(db.statement_count(), 1);

    session.flush("Sales").unwrap();
    let third = session.execute(&query, &ExecutionHandle::new()).unwrap();
    assert_eq!(first, third);
    assert_eq!(db.statement_count(), 2);
}

#[test]
fn concurrent_queries_share_one_statement() {
    let db = database("ANSI");
    db.set_latency(Duration::from_millis(150));
    let session = Arc::new(session(&db, EngineConfig::default()));
    let query = Arc::new(session.compile(&year_by_country()).unwrap());

    let results: Vec<_> = thread::scope(|scope| {
        let workers: Vec<_> = (0..2)
            .map(|_| {
                let session = Arc::clone(&session);
                let query = Arc::clone(&query);
                scope.spawn(move || session.execute(&query, &ExecutionHandle::new()))
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    let expected = Value::from(unit_sales(|r| r.year() == 1997 && r.country() == "USA"));
    for result in results {
        assert_eq!(result.unwrap().cell(&[0, 0]).unwrap().value, expected);
    }
    assert_eq!(db.statement_count(), 1);
}

#[test]
fn a_hierarchy_on_two_axes_does_not_compile() {
    let db = database("ANSI");
    let session = session(&db, EngineConfig::default());
    let query = Query::new("Sales")
        .on_axis(set(&["[Time].[1997]"]))
        .on_axis(set(&["[Time].[1998]"]));
    let err = session.compile(&query).unwrap_err();
    assert!(
        matches!(err, OlapError::HierarchyOnMultipleAxes { .. }),
        "{err:?}"
    );

    let with_slicer = Query::new("Sales")
        .on_axis(set(&["[Store].[USA]"]))
        .with_slicer(Exp::name("[Store].[Canada]"));
    assert!(matches!(
        session.compile(&with_slicer),
        Err(OlapError::HierarchyOnMultipleAxes { .. })
    ));
    assert_eq!(db.statement_count(), 0);
}

#[test]
fn unknown_statistics_select_the_fact_table() {
    let db = database("ANSI");
    let session = session_without_statistics(&db);
    let query = Query::new("Sales")
        .on_axis(set(&["[Measures].[Unit Sales]"]))
        .on_axis(set(&["[Time].[1997]", "[Time].[1998]"]));
    let cells = session
        .execute(&session.compile(&query).unwrap(), &ExecutionHandle::new())
        .unwrap();

    assert_eq!(
        cells.values(),
        vec![
            Value::from(unit_sales(|r| r.year() == 1997)),
            Value::from(unit_sales(|r| r.year() == 1998)),
        ]
    );
    let statements = db.executed_statements();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].contains("\"sales_fact\""), "{}", statements[0]);
    assert!(!statements[0].contains("agg_sales_by_year"));
}

#[test]
fn cancelling_a_waiter_leaves_the_computation_alone() {
    let db = database("ANSI");
    db.set_latency(Duration::from_millis(600));
    let session = Arc::new(session(&db, EngineConfig::default()));
    let query = Arc::new(session.compile(&year_by_country()).unwrap());
    let waiter_handle = ExecutionHandle::new();

    let (owner, waiter) = thread::scope(|scope| {
        let owner = {
            let (session, query) = (Arc::clone(&session), Arc::clone(&query));
            scope.spawn(move || session.execute(&query, &ExecutionHandle::new()))
        };
        thread::sleep(Duration::from_millis(100));
        let waiter = {
            let (session, query) = (Arc::clone(&session), Arc::clone(&query));
            let handle = waiter_handle.clone();
            scope.spawn(move || session.execute(&query, &handle))
        };
        thread::sleep(Duration::from_millis(100));
        waiter_handle.cancel();
        (owner.join().unwrap(), waiter.join().unwrap())
    });

    assert_eq!(waiter, Err(OlapError::QueryCancelled));
    let expected = Value::from(unit_sales(|r| r.year() == 1997 && r.country() == "USA"));
    assert_eq!(owner.unwrap().cell(&[0, 0]).unwrap().value, expected);
    assert_eq!(db.statement_count(), 1);

    // The segment is cached for later callers.
    let again = session.execute(&query, &ExecutionHandle::new()).unwrap();
    assert_eq!(again.cell(&[0, 0]).unwrap().value, expected);
    assert_eq!(db.statement_count(), 1);
}

#[test]
fn timeouts_fail_the_query() {
    let db = database("ANSI");
    db.set_latency(Duration::from_millis(300));
    let session = session(&db, EngineConfig::default());
    let query = session.compile(&year_by_country()).unwrap();
    let handle = ExecutionHandle::new();
    handle.set_timeout(50);
    assert!(matches!(
        session.execute(&query, &handle),
        Err(OlapError::QueryTimeout { millis: 50 })
    ));
}

#[test]
fn higher_solve_order_is_computed_last() {
    let db = database("ANSI");
    let session = session(&db, EngineConfig::default());
    let plus_one = Exp::name("[Measures].[Unit Sales]").infix("+", Exp::number(1.0));
    let delta = Exp::name("[Time].[1998]").infix("-", Exp::name("[Time].[1997]"));
    let query = |plus_one_order: i32| {
        Query::new("Sales")
            .with_member("[Measures]", "Plus One", plus_one.clone(), plus_one_order)
            .with_member("[Time]", "Delta", delta.clone(), 10)
            .on_axis(set(&["[Measures].[Plus One]"]))
            .on_axis(set(&["[Time].[Delta]"]))
    };
    let growth = unit_sales(|r| r.year() == 1998) - unit_sales(|r| r.year() == 1997);

    let delta_last = session
        .execute(&session.compile(&query(0)).unwrap(), &ExecutionHandle::new())
        .unwrap();
    assert_eq!(delta_last.values(), vec![Value::from(growth)]);

    let plus_one_last = session
        .execute(&session.compile(&query(20)).unwrap(), &ExecutionHandle::new())
        .unwrap();
    assert_eq!(plus_one_last.values(), vec![Value::from(growth + 1.0)]);
    assert_eq!(
        plus_one_last.axes[1].member_names(),
        vec![vec!["[Time].[Delta]"]]
    );
}

#[test]
fn runaway_recursion_is_a_cell_error() {
    let db = database("ANSI");
    let looping = Query::new("Sales")
        .with_member(
            "[Measures]",
            "Loop",
            Exp::name("[Measures].[Loop]").infix("+", Exp::number(1.0)),
            0,
        )
        .on_axis(set(&["[Measures].[Unit Sales]", "[Measures].[Loop]"]));

    let lenient = session(&db, EngineConfig::default());
    let cells = lenient
        .execute(&lenient.compile(&looping).unwrap(), &ExecutionHandle::new())
        .unwrap();
    assert_eq!(cells.cells[0].value, Value::from(unit_sales(|_| true)));
    assert!(cells.cells[1].is_error());

    let strict = session(
        &db,
        EngineConfig {
            fail_fast: true,
            ..EngineConfig::default()
        },
    );
    assert!(matches!(
        strict.execute(&strict.compile(&looping).unwrap(), &ExecutionHandle::new()),
        Err(OlapError::RecursionLimit { .. })
    ));
}

#[test]
fn non_empty_axes_drop_empty_positions() {
    let db = database("ANSI");
    let session = session(&db, EngineConfig::default());
    let query = Query::new("Sales")
        .on_axis(set(&["[Measures].[Unit Sales]"]))
        .on_non_empty_axis(Exp::name("[Store].[State]").property("Members"))
        .with_slicer(Exp::name("[Time].[1998]"));
    let cells = session
        .execute(&session.compile(&query).unwrap(), &ExecutionHandle::new())
        .unwrap();

    assert_eq!(
        cells.axes[1].member_names(),
        vec![
            vec!["[Store].[USA].[CA]"],
            vec!["[Store].[USA].[OR]"],
            vec!["[Store].[USA].[WA]"],
        ]
    );
    let expected: Vec<Value> = ["CA", "OR", "WA"]
        .iter()
        .map(|state| Value::from(unit_sales(|r| r.year() == 1998 && r.state() == *state)))
        .collect();
    assert_eq!(cells.values(), expected);
}

#[test]
fn too_few_passes_is_an_error() {
    let db = database("ANSI");
    let session = session(
        &db,
        EngineConfig {
            max_eval_passes: 1,
            ..EngineConfig::default()
        },
    );
    let query = session.compile(&year_by_country()).unwrap();
    assert_eq!(
        session.execute(&query, &ExecutionHandle::new()),
        Err(OlapError::TooManyPasses { passes: 1 })
    );
}

#[test]
fn loading_cells_one_by_one_gives_the_same_answers() {
    let query = Query::new("Sales")
        .on_axis(set(&["[Measures].[Unit Sales]", "[Measures].[Store Sales]"]))
        .on_axis(Exp::name("[Time].[Year]").property("Members"));

    let batched_db = database("ANSI");
    let batched = session(&batched_db, EngineConfig::default());
    let direct_db = database("ANSI");
    let direct = session(
        &direct_db,
        EngineConfig {
            batch_cell_requests: false,
            ..EngineConfig::default()
        },
    );
    let a = batched
        .execute(&batched.compile(&query).unwrap(), &ExecutionHandle::new())
        .unwrap();
    let b = direct
        .execute(&direct.compile(&query).unwrap(), &ExecutionHandle::new())
        .unwrap();
    assert_eq!(a, b);
    assert_eq!(batched_db.statement_count(), 2);
    assert!(direct_db.statement_count() >= 2);
}

#[test]
fn filter_reads_cells_before_the_axis_is_known() {
    let db = database("ANSI");
    let session = session(&db, EngineConfig::default());
    let threshold = unit_sales(|r| r.year() == 1997 && r.quarter() == "Q2");
    let query = Query::new("Sales")
        .on_axis(set(&["[Measures].[Unit Sales]"]))
        .on_axis(Exp::function(
            "Filter",
            vec![
                Exp::name("[Time].[Quarter]").property("Members"),
                Exp::name("[Measures].[Unit Sales]").infix(">", Exp::number(threshold)),
            ],
        ));
    let cells = session
        .execute(&session.compile(&query).unwrap(), &ExecutionHandle::new())
        .unwrap();
    let names = cells.axes[1].member_names();
    assert!(names.contains(&vec!["[Time].[1997].[Q3]"]), "{names:?}");
    assert!(!names.contains(&vec!["[Time].[1997].[Q1]"]));
    assert!(!names.contains(&vec!["[Time].[1997].[Q2]"]));
}
