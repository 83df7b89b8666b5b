//! Dispatcher behaviour: batching, fail-fast, atomic commits, nested
//! dispatch and the action completion stream.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;
use strata_store::{
    Action, ActionStatus, NoopExecutionStrategy, StateContext, StateDefinition, Store, StoreConfig,
    StoreError,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn counter(calls: Arc<AtomicUsize>) -> StateDefinition {
    StateDefinition::new("counter")
        .defaults(json!({"value": 0, "label": "clicks"}))
        .on("counter:add", move |ctx, action| {
            calls.fetch_add(1, Ordering::SeqCst);
            let by = action.payload["by"].as_i64().unwrap_or(1);
            let value = ctx.get_state()["value"].as_i64().unwrap_or(0);
            ctx.patch_state(json!({"value": value + by}))?;
            Ok(())
        })
        .on("counter:fail", |ctx, _action| {
            ctx.patch_state(json!({"value": -1}))?;
            Err(anyhow::anyhow!("counter refused"))
        })
}

fn add(by: i64) -> Action {
    Action::new("counter:add").with_payload(json!({"by": by}))
}

async fn store_with_counter() -> (Store, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let store = Store::builder()
        .config(
            StoreConfig::builder()
                .execution_strategy(Arc::new(NoopExecutionStrategy))
                .build(),
        )
        .build();
    store
        .register_root(vec![counter(calls.clone())])
        .await
        .unwrap();
    (store, calls)
}

async fn save_with_record(ctx: StateContext, _action: Action) -> anyhow::Result<()> {
    ctx.dispatch(Action::new("audit:record")).await?;
    ctx.patch_state(json!({"saved": true}))?;
    Ok(())
}

async fn save_ignoring_rejected_audit(ctx: StateContext, _action: Action) -> anyhow::Result<()> {
    let _ = ctx.dispatch(Action::new("audit:reject")).await;
    ctx.patch_state(json!({"saved": true}))?;
    Ok(())
}

async fn record_then_fail(ctx: StateContext, _action: Action) -> anyhow::Result<()> {
    ctx.dispatch(Action::new("audit:record")).await?;
    anyhow::bail!("disk full")
}

// =========================================================================
// Batches
// =========================================================================

#[tokio::test]
async fn empty_batch_completes_without_running_anything() {
    let (store, calls) = store_with_counter().await;
    let before = store.snapshot();
    let mut actions = store.actions();

    store.dispatch(Vec::<Action>::new()).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(store.snapshot().same_snapshot(&before));
    assert!(actions.try_recv().is_err());
}

#[tokio::test]
async fn single_action_updates_tree() {
    let (store, _) = store_with_counter().await;
    store.dispatch(add(3)).await.unwrap();
    assert_eq!(store.select("counter.value"), json!(3));
}

#[tokio::test]
async fn batch_runs_sequentially_in_order() {
    let (store, calls) = store_with_counter().await;
    store.dispatch(vec![add(1), add(10), add(100)]).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(store.select("counter.value"), json!(111));
}

#[tokio::test]
async fn failing_first_action_skips_the_rest_and_keeps_tree() {
    let (store, calls) = store_with_counter().await;
    let before = store.snapshot();

    let err = store
        .dispatch(vec![Action::new("counter:fail"), add(5)])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        StoreError::Handler { ref action_type, ref path, .. }
            if action_type == "counter:fail" && path == "counter"
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.snapshot(), before);
}

#[tokio::test]
async fn failure_mid_batch_keeps_earlier_commits_only() {
    let (store, calls) = store_with_counter().await;

    let result = store
        .dispatch(vec![add(2), Action::new("counter:fail"), add(7)])
        .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.select("counter.value"), json!(2));
}

#[tokio::test]
async fn same_actions_from_same_tree_are_deterministic() {
    let (a, _) = store_with_counter().await;
    let (b, _) = store_with_counter().await;
    let sequence = vec![add(4), add(-1), add(9)];

    a.dispatch(sequence.clone()).await.unwrap();
    b.dispatch(sequence).await.unwrap();

    assert_eq!(a.snapshot(), b.snapshot());
}

#[tokio::test]
async fn unhandled_action_type_is_a_successful_no_op() {
    let (store, _) = store_with_counter().await;
    let before = store.snapshot();
    store.dispatch(Action::new("nobody:listens")).await.unwrap();
    assert_eq!(store.snapshot(), before);
}

// =========================================================================
// StateContext
// =========================================================================

#[tokio::test]
async fn patch_then_get_keeps_sibling_keys() {
    let (store, _) = store_with_counter().await;
    store.dispatch(add(1)).await.unwrap();
    assert_eq!(store.select("counter"), json!({"value": 1, "label": "clicks"}));
}

#[tokio::test]
async fn set_state_with_operator_sees_existing_value() {
    let store = Store::builder().build();
    store
        .register_root(vec![StateDefinition::new("tags")
            .defaults(json!([]))
            .on("tags:push", |ctx, action| {
                ctx.set_state_with(|existing| {
                    let mut tags = existing.as_array().cloned().unwrap_or_default();
                    tags.push(action.payload.clone());
                    json!(tags)
                });
                Ok(())
            })])
        .await
        .unwrap();

    store
        .dispatch(vec![
            Action::new("tags:push").with_payload(json!("a")),
            Action::new("tags:push").with_payload(json!("b")),
        ])
        .await
        .unwrap();

    assert_eq!(store.select("tags"), json!(["a", "b"]));
}

#[tokio::test]
async fn set_state_with_operator_can_read_the_context() {
    let store = Store::builder().build();
    store
        .register_root(vec![StateDefinition::new("tally")
            .defaults(json!({"count": 1}))
            .on("tally:double", |ctx, _| {
                let view = ctx.clone();
                ctx.set_state_with(|existing| {
                    let current = view.get_state()["count"].as_i64().unwrap_or(0);
                    let seen = view.root_state().value_at(&"tally.count".into());
                    assert_eq!(seen, json!(current));
                    json!({"count": existing["count"].as_i64().unwrap_or(0) + current})
                });
                Ok(())
            })])
        .await
        .unwrap();

    store.dispatch(Action::new("tally:double")).await.unwrap();
    assert_eq!(store.select("tally.count"), json!(2));
}

#[tokio::test]
async fn handlers_on_disjoint_paths_merge_into_one_tree() {
    let store = Store::builder().build();
    store
        .register_root(vec![
            StateDefinition::new("left").on("both", |ctx, _| {
                ctx.set_state(json!("L"));
                Ok(())
            }),
            StateDefinition::new("right").on("both", |ctx, _| {
                ctx.set_state(json!("R"));
                Ok(())
            }),
        ])
        .await
        .unwrap();

    store.dispatch(Action::new("both")).await.unwrap();
    assert_eq!(store.select("left"), json!("L"));
    assert_eq!(store.select("right"), json!("R"));
}

#[tokio::test]
async fn overlapping_paths_apply_in_registration_order() {
    let store = Store::builder()
        .config(StoreConfig::builder().development_mode(true).build())
        .build();
    store
        .register_root(vec![StateDefinition::new("app")
            .on("rename", |ctx, _| {
                ctx.patch_state(json!({"child": {"name": "from-parent"}}))?;
                Ok(())
            })
            .child(StateDefinition::new("child").on("rename", |ctx, _| {
                ctx.patch_state(json!({"name": "from-child"}))?;
                Ok(())
            }))])
        .await
        .unwrap();

    store.dispatch(Action::new("rename")).await.unwrap();
    assert_eq!(store.select("app.child.name"), json!("from-child"));
}

#[tokio::test]
async fn nested_dispatch_runs_inside_the_outer_commit() {
    let store = Store::builder().build();
    store
        .register_root(vec![StateDefinition::new("audit")
            .defaults(json!({"entries": 0, "saved": false}))
            .on_async("audit:save", save_with_record)
            .on("audit:record", |ctx, _| {
                let entries = ctx.get_state()["entries"].as_i64().unwrap_or(0);
                ctx.patch_state(json!({"entries": entries + 1}))?;
                Ok(())
            })])
        .await
        .unwrap();

    let mut actions = store.actions();
    store.dispatch(Action::new("audit:save")).await.unwrap();

    assert_eq!(store.select("audit"), json!({"entries": 1, "saved": true}));

    let first = actions.recv().await.unwrap();
    let second = actions.recv().await.unwrap();
    assert_eq!(first.action.action_type, "audit:record");
    assert_eq!(second.action.action_type, "audit:save");
    assert_eq!(first.dispatch_id, second.dispatch_id);
}

#[tokio::test]
async fn failed_outer_dispatch_discards_nested_writes() {
    let store = Store::builder().build();
    store
        .register_root(vec![StateDefinition::new("audit")
            .defaults(json!({"entries": 0}))
            .on_async("audit:save", record_then_fail)
            .on("audit:record", |ctx, _| {
                ctx.patch_state(json!({"entries": 1}))?;
                Ok(())
            })])
        .await
        .unwrap();

    let mut actions = store.actions();
    let err = store.dispatch(Action::new("audit:save")).await.unwrap_err();

    assert!(err.to_string().contains("disk full"));
    assert_eq!(store.select("audit.entries"), json!(0));

    let only = actions.recv().await.unwrap();
    assert_eq!(only.action.action_type, "audit:save");
    assert_eq!(only.status, ActionStatus::Errored);
}

#[tokio::test]
async fn swallowed_nested_failure_is_still_reported() {
    let store = Store::builder().build();
    store
        .register_root(vec![StateDefinition::new("audit")
            .defaults(json!({"saved": false}))
            .on_async("audit:save", save_ignoring_rejected_audit)
            .on("audit:reject", |_, _| Err(anyhow::anyhow!("audit rejected")))])
        .await
        .unwrap();

    let mut actions = store.actions();
    store.dispatch(Action::new("audit:save")).await.unwrap();
    assert_eq!(store.select("audit.saved"), json!(true));

    let nested = actions.recv().await.unwrap();
    assert_eq!(nested.action.action_type, "audit:reject");
    assert_eq!(nested.status, ActionStatus::Errored);
    assert!(nested.error.unwrap().contains("audit rejected"));

    let outer = actions.recv().await.unwrap();
    assert_eq!(outer.action.action_type, "audit:save");
    assert_eq!(outer.status, ActionStatus::Successful);
    assert_eq!(nested.dispatch_id, outer.dispatch_id);
}

// =========================================================================
// Observation
// =========================================================================

#[tokio::test]
async fn completion_stream_reports_success_and_failure() {
    let (store, _) = store_with_counter().await;
    let mut actions = store.actions();

    store.dispatch(add(1)).await.unwrap();
    let _ = store.dispatch(Action::new("counter:fail")).await;

    let ok = actions.recv().await.unwrap();
    assert_eq!(ok.status, ActionStatus::Successful);
    assert!(ok.error.is_none());

    let failed = actions.recv().await.unwrap();
    assert_eq!(failed.status, ActionStatus::Errored);
    assert!(failed.error.unwrap().contains("counter refused"));
}

#[tokio::test]
async fn state_subscribers_see_each_commit() {
    let (store, _) = store_with_counter().await;
    let mut states = store.subscribe();

    store.dispatch(add(2)).await.unwrap();

    states.changed().await.unwrap();
    let latest = states.borrow_and_update().clone();
    assert_eq!(latest.value_at(&"counter.value".into()), json!(2));
}

#[tokio::test]
async fn earlier_snapshots_stay_valid_after_dispatch() {
    let (store, _) = store_with_counter().await;
    let before = store.snapshot();

    store.dispatch(add(8)).await.unwrap();

    assert_eq!(before.value_at(&"counter.value".into()), json!(0));
    assert_eq!(store.select("counter.value"), json!(8));
}

#[tokio::test]
async fn reset_replaces_whole_tree() {
    let (store, _) = store_with_counter().await;
    store
        .reset(json!({"counter": {"value": 42}}).into())
        .await
        .unwrap();

    let value: i64 = store.select_as("counter.value").unwrap();
    assert_eq!(value, 42);
}
