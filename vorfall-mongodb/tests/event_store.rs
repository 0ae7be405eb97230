//! Integration tests for the MongoDB event store.
//!
//! These tests require Docker to be running and will spin up a single-node
//! MongoDB replica set using testcontainers (transactions are unavailable on
//! standalone deployments).

use serde_json::{Value, json};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::mongo::Mongo;
use vorfall_core::{
    event::{BatchError, DomainEvent},
    projection::ProjectionDefinition,
    subject::{StreamSubject, Subject},
};
use vorfall_mongodb::{
    Error, EventStore, FindProjectionsOptions, ProjectionQuery, StoreConfig, StreamStateSpec,
    handle_command,
};

/// Test helper to set up a MongoDB replica-set container.
struct TestDb {
    _container: ContainerAsync<Mongo>,
    connection_string: String,
}

impl TestDb {
    async fn new() -> Self {
        let container = Mongo::repl_set().start().await.unwrap();
        let host = container.get_host().await.unwrap();
        let port = container.get_host_port_ipv4(27017).await.unwrap();

        Self {
            _container: container,
            connection_string: format!("mongodb://{host}:{port}/?directConnection=true"),
        }
    }

    async fn store(&self, projections: Vec<ProjectionDefinition>) -> EventStore {
        EventStore::connect(
            StoreConfig::new(&self.connection_string)
                .database_name("vorfall-test")
                .projections(projections),
        )
        .await
        .unwrap()
    }
}

fn subject(s: &str) -> Subject {
    Subject::parse(s).unwrap()
}

fn stream_subject(s: &str) -> StreamSubject {
    StreamSubject::parse(s).unwrap()
}

/// Counts `veranstaltung.erstellt` events per stream.
fn counting_projection() -> ProjectionDefinition {
    ProjectionDefinition::new(
        "TestProjection",
        ["veranstaltung.erstellt"],
        || json!({ "count": 0 }),
        |state, _event| json!({ "count": state["count"].as_i64().unwrap_or(0) + 1 }),
    )
}

/// Mirrors the event payload's `amount` into the projection state.
fn salt_projection() -> ProjectionDefinition {
    ProjectionDefinition::new(
        "SaltAdded",
        ["recepie.salted"],
        || Value::Null,
        |_state, event| {
            let amount = event
                .data
                .as_ref()
                .and_then(|data| data.get("amount"))
                .and_then(Value::as_i64)
                .unwrap_or(0);
            json!({ "saltAdded": amount })
        },
    )
}

#[tokio::test]
async fn first_append_creates_the_stream() {
    let db = TestDb::new().await;
    let store = db.store(Vec::new()).await;

    let event = DomainEvent::new(
        "veranstaltung.erstellt",
        subject("veranstaltung/123/erstellt"),
    )
    .data(json!({ "test": "data" }));
    let event_id = event.id;

    let result = store.append_or_create_stream(vec![event]).await.unwrap();
    assert_eq!(result.total_events_appended, 1);
    assert_eq!(result.streams.len(), 1);
    assert_eq!(
        result.stream_subjects,
        vec![stream_subject("veranstaltung/123")]
    );

    let stream = store.read_stream(&subject("veranstaltung/123")).await.unwrap();
    assert!(stream.stream_exists);
    assert_eq!(stream.events.len(), 1);
    assert_eq!(stream.events[0].id, event_id);
    assert_eq!(stream.events[0].kind, "veranstaltung.erstellt");
    assert_eq!(stream.events[0].data, Some(json!({ "test": "data" })));
}

#[tokio::test]
async fn empty_batches_are_rejected_before_any_write() {
    let db = TestDb::new().await;
    let store = db.store(Vec::new()).await;

    let result = store.append_or_create_stream(Vec::new()).await;
    assert!(matches!(result, Err(Error::Batch(BatchError::Empty))));
}

#[tokio::test]
async fn reading_an_absent_stream_reports_nonexistence() {
    let db = TestDb::new().await;
    let store = db.store(Vec::new()).await;

    let stream = store.read_stream(&subject("user/does-not-exist")).await.unwrap();
    assert!(!stream.stream_exists);
    assert!(stream.events.is_empty());
}

#[tokio::test]
async fn successive_appends_keep_the_projection_slot_coherent() {
    let db = TestDb::new().await;
    let store = db.store(vec![counting_projection()]).await;

    for _ in 0..2 {
        let event = DomainEvent::new(
            "veranstaltung.erstellt",
            subject("veranstaltung/123/erstellt"),
        );
        store.append_or_create_stream(vec![event]).await.unwrap();
    }

    let document = store
        .find_one_projection(
            &stream_subject("veranstaltung/123"),
            &ProjectionQuery::new("TestProjection"),
        )
        .await
        .unwrap()
        .expect("projection slot should exist");

    let slot = document
        .projections
        .as_ref()
        .and_then(|slots| slots.get_document("TestProjection").ok())
        .expect("slot should hold the folded state");
    assert_eq!(slot.get_i64("count").unwrap(), 2);
}

#[tokio::test]
async fn null_projection_states_are_prior_state_not_absence() {
    let projection = ProjectionDefinition::new(
        "Nullable",
        ["thing.changed"],
        || json!(0),
        |state, event| {
            let clear = event
                .data
                .as_ref()
                .and_then(|data| data.get("clear"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if clear {
                Value::Null
            } else if state.is_null() {
                json!(100)
            } else {
                json!(state.as_i64().unwrap_or(0) + 1)
            }
        },
    );
    let db = TestDb::new().await;
    let store = db.store(vec![projection]).await;

    let changed = |clear: bool| {
        DomainEvent::new("thing.changed", subject("thing/1/changed"))
            .data(json!({ "clear": clear }))
    };

    // Absent slot folds from the initial state, then a clear stores null.
    store.append_or_create_stream(vec![changed(false)]).await.unwrap();
    store.append_or_create_stream(vec![changed(true)]).await.unwrap();

    // The stored null is prior state: the next fold starts from it rather
    // than from a fresh initial state.
    let result = store.append_or_create_stream(vec![changed(false)]).await.unwrap();
    let slot = result.streams[0]
        .projections
        .as_ref()
        .and_then(|slots| slots.get("Nullable"))
        .cloned()
        .expect("slot should exist");
    assert_eq!(slot.as_i64(), Some(100));
}

#[tokio::test]
async fn unrelated_event_types_leave_projection_slots_untouched() {
    let db = TestDb::new().await;
    let store = db.store(vec![counting_projection()]).await;

    let event = DomainEvent::new("veranstaltung.abgesagt", subject("veranstaltung/7/abgesagt"));
    let result = store.append_or_create_stream(vec![event]).await.unwrap();
    assert!(result.streams[0].projections.is_none());
}

#[tokio::test]
async fn single_stream_appends_enforce_the_single_stream_promise() {
    let db = TestDb::new().await;
    let store = db.store(Vec::new()).await;

    let mixed = store
        .append_to_stream(vec![
            DomainEvent::new("user.created", subject("user/1/created")),
            DomainEvent::new("user.created", subject("user/2/created")),
        ])
        .await;
    assert!(matches!(
        mixed,
        Err(Error::Batch(BatchError::MixedStreamSubjects { .. }))
    ));

    let result = store
        .append_to_stream(vec![
            DomainEvent::new("user.created", subject("user/1/created")),
            DomainEvent::new("user.updated", subject("user/1/updated")),
        ])
        .await
        .unwrap();
    assert_eq!(result.total_events_appended, 2);
    assert_eq!(result.stream_subjects, vec![stream_subject("user/1")]);

    let stream = store.read_stream(&subject("user/1")).await.unwrap();
    assert_eq!(stream.events.len(), 2);
}

#[tokio::test]
async fn multi_stream_batches_commit_atomically_in_caller_order() {
    let db = TestDb::new().await;
    let store = db.store(Vec::new()).await;

    let events = vec![
        DomainEvent::new("user.created", subject("user/123/created")),
        DomainEvent::new("user.created", subject("user/456/created")),
        DomainEvent::new("user.updated", subject("user/123/updated")),
    ];
    let ids: Vec<_> = events.iter().map(|event| event.id).collect();

    let result = store.append_or_create_stream(events).await.unwrap();
    assert_eq!(result.streams.len(), 2);
    assert_eq!(result.total_events_appended, 3);
    assert_eq!(
        result.stream_subjects,
        vec![stream_subject("user/123"), stream_subject("user/456")]
    );

    let first = store.read_stream(&subject("user/123")).await.unwrap();
    assert_eq!(
        first.events.iter().map(|event| event.id).collect::<Vec<_>>(),
        vec![ids[0], ids[2]]
    );

    let second = store.read_stream(&subject("user/456")).await.unwrap();
    assert_eq!(second.events.len(), 1);
    assert_eq!(second.events[0].id, ids[1]);
}

#[tokio::test]
async fn aggregating_an_absent_stream_returns_the_initial_state() {
    let db = TestDb::new().await;
    let store = db.store(Vec::new()).await;

    let state = store
        .aggregate_stream(
            &stream_subject("test/non-existent-aggregate"),
            || json!({ "count": 0, "events": [] }),
            |state, _event| state,
        )
        .await
        .unwrap();
    assert_eq!(state, json!({ "count": 0, "events": [] }));
}

#[tokio::test]
async fn aggregation_folds_events_in_stored_order() {
    let db = TestDb::new().await;
    let store = db.store(Vec::new()).await;

    let events = vec![
        DomainEvent::new("konto.deposited", subject("konto/1/deposited")).data(json!({ "amount": 10 })),
        DomainEvent::new("konto.deposited", subject("konto/1/deposited")).data(json!({ "amount": 32 })),
    ];
    store.append_or_create_stream(events).await.unwrap();

    let balance = store
        .aggregate_stream(
            &stream_subject("konto/1"),
            || 0i64,
            |balance, event| {
                balance
                    + event
                        .data
                        .as_ref()
                        .and_then(|data| data.get("amount"))
                        .and_then(Value::as_i64)
                        .unwrap_or(0)
            },
        )
        .await
        .unwrap();
    assert_eq!(balance, 42);
}

#[tokio::test]
async fn find_projections_supports_pagination_and_sorting() {
    let db = TestDb::new().await;
    let store = db.store(vec![salt_projection()]).await;

    for amount in 1..=30i64 {
        let event = DomainEvent::new("recepie.salted", subject(&format!("recepie/{amount}/salted")))
            .data(json!({ "amount": amount }));
        store.append_or_create_stream(vec![event]).await.unwrap();
    }

    let query = ProjectionQuery::new("SaltAdded");

    let page = store
        .find_projections(
            "recepie",
            &query,
            &FindProjectionsOptions::default().skip(10).limit(20),
        )
        .await
        .unwrap();
    assert_eq!(page.len(), 20);
    assert_eq!(page[0]["saltAdded"], json!(11));

    let sorted = store
        .find_projections(
            "recepie",
            &query,
            &FindProjectionsOptions::default()
                .sort(mongodb::bson::doc! { "saltAdded": -1 })
                .limit(40),
        )
        .await
        .unwrap();
    assert_eq!(sorted.len(), 30);
    assert_eq!(sorted[0]["saltAdded"], json!(30));

    let filtered = store
        .find_projections(
            "recepie",
            &ProjectionQuery::new("SaltAdded").filter(mongodb::bson::doc! { "saltAdded": { "$gt": 25 } }),
            &FindProjectionsOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(filtered.len(), 5);

    let count = store
        .count_projections(
            "recepie",
            &ProjectionQuery::new("SaltAdded").filter(mongodb::bson::doc! { "saltAdded": { "$lte": 10 } }),
        )
        .await
        .unwrap();
    assert_eq!(count, 10);
}

#[tokio::test]
async fn find_projections_rejects_entities_containing_slashes() {
    let db = TestDb::new().await;
    let store = db.store(Vec::new()).await;

    let result = store
        .find_projections(
            "recepie/1",
            &ProjectionQuery::new("SaltAdded"),
            &FindProjectionsOptions::default(),
        )
        .await;
    assert!(matches!(result, Err(Error::InvalidEntity { .. })));
}

#[tokio::test]
async fn find_one_projection_applies_the_rewritten_filter() {
    let db = TestDb::new().await;
    let store = db.store(vec![counting_projection()]).await;

    let event = DomainEvent::new(
        "veranstaltung.erstellt",
        subject("veranstaltung/9/erstellt"),
    );
    store.append_or_create_stream(vec![event]).await.unwrap();

    let matching = store
        .find_one_projection(
            &stream_subject("veranstaltung/9"),
            &ProjectionQuery::new("TestProjection").filter(mongodb::bson::doc! { "count": { "$gte": 1 } }),
        )
        .await
        .unwrap();
    assert!(matching.is_some());

    let non_matching = store
        .find_one_projection(
            &stream_subject("veranstaltung/9"),
            &ProjectionQuery::new("TestProjection").filter(mongodb::bson::doc! { "count": { "$gt": 1 } }),
        )
        .await
        .unwrap();
    assert!(non_matching.is_none());
}

#[tokio::test]
async fn handle_command_folds_state_and_appends_the_result() {
    let db = TestDb::new().await;
    let store = db.store(Vec::new()).await;

    let deposit = |stream: &str, amount: i64| {
        DomainEvent::new("konto.deposited", subject(&format!("{stream}/deposited")))
            .data(json!({ "amount": amount }))
    };
    store
        .append_or_create_stream(vec![deposit("konto/1", 30)])
        .await
        .unwrap();

    let balance_spec = || {
        StreamStateSpec::new(
            stream_subject("konto/1"),
            || json!({ "balance": 0 }),
            |state, event| {
                let amount = event
                    .data
                    .as_ref()
                    .and_then(|data| data.get("amount"))
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                json!({ "balance": state["balance"].as_i64().unwrap_or(0) + amount })
            },
        )
    };

    let result = handle_command(
        &store,
        vec![balance_spec()],
        json!({ "withdraw": 12 }),
        |command, states| async move {
            let balance = states.get("konto/1").unwrap()["balance"].as_i64().unwrap();
            let requested = command["withdraw"].as_i64().unwrap();
            if requested > balance {
                return Err("insufficient funds".into());
            }
            Ok(DomainEvent::new("konto.withdrawn", subject("konto/1/withdrawn"))
                .data(json!({ "amount": requested })))
        },
    )
    .await
    .unwrap();
    assert_eq!(result.total_events_appended, 1);
    assert_eq!(result.stream_subjects, vec![stream_subject("konto/1")]);

    let rejected = handle_command(
        &store,
        vec![balance_spec()],
        json!({ "withdraw": 100 }),
        |command, states| async move {
            let balance = states.get("konto/1").unwrap()["balance"].as_i64().unwrap();
            let requested = command["withdraw"].as_i64().unwrap();
            if requested > balance {
                return Err("insufficient funds".into());
            }
            Ok(DomainEvent::new("konto.withdrawn", subject("konto/1/withdrawn"))
                .data(json!({ "amount": requested })))
        },
    )
    .await;
    assert!(matches!(rejected, Err(Error::CommandHandler(_))));

    let stream = store.read_stream(&subject("konto/1")).await.unwrap();
    assert_eq!(stream.events.len(), 2);
}

#[tokio::test]
async fn empty_handler_results_surface_as_empty_batches() {
    let db = TestDb::new().await;
    let store = db.store(Vec::new()).await;

    let result = handle_command(&store, Vec::new(), (), |(), _states| async move {
        Ok(Vec::<DomainEvent>::new())
    })
    .await;
    assert!(matches!(result, Err(Error::Batch(BatchError::Empty))));
}

#[tokio::test]
async fn handlers_may_emit_events_for_undeclared_streams() {
    let db = TestDb::new().await;
    let store = db.store(Vec::new()).await;

    let result = handle_command(
        &store,
        vec![StreamStateSpec::new(
            stream_subject("order/1"),
            || Value::Null,
            |state, _event| state,
        )],
        (),
        |(), _states| async move {
            Ok(vec![
                DomainEvent::new("order.placed", subject("order/1/placed")),
                DomainEvent::new("audit.recorded", subject("audit/order-1/recorded")),
            ])
        },
    )
    .await
    .unwrap();

    assert_eq!(result.streams.len(), 2);
    assert_eq!(
        result.stream_subjects,
        vec![stream_subject("order/1"), stream_subject("audit/order-1")]
    );
}
