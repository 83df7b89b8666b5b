use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use strata_store::{Action, LoggerPlugin, StateContext, StateDefinition, Store, StoreConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Todo {
    title: String,
    done: bool,
}

fn todos_state() -> StateDefinition {
    StateDefinition::new("todos")
        .defaults(json!({"items": [], "loaded": false}))
        .on("todos:add", |ctx, action| {
            let title: String = action.payload_as()?;
            let mut items: Vec<Todo> = serde_json::from_value(ctx.get_state()["items"].clone())?;
            items.push(Todo { title, done: false });
            ctx.patch_state(json!({"items": items}))?;
            Ok(())
        })
        .on("todos:complete", |ctx, action| {
            let index = action.payload["index"].as_u64().unwrap_or(0) as usize;
            let mut items: Vec<Todo> = serde_json::from_value(ctx.get_state()["items"].clone())?;
            if let Some(todo) = items.get_mut(index) {
                todo.done = true;
            }
            ctx.patch_state(json!({"items": items}))?;
            Ok(())
        })
        .on_init(mark_loaded)
}

async fn mark_loaded(ctx: StateContext) -> Result<()> {
    ctx.patch_state(json!({"loaded": true}))?;
    Ok(())
}

fn preferences_state() -> StateDefinition {
    StateDefinition::new("preferences")
        .defaults(json!({"theme": "light"}))
        .on("preferences:theme", |ctx, action| {
            ctx.patch_state(json!({"theme": action.payload}))?;
            Ok(())
        })
        .after_bootstrap(announce_theme)
}

async fn announce_theme(ctx: StateContext) -> Result<()> {
    info!(theme = %ctx.get_state()["theme"], "Preferences ready");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("strata=info".parse()?))
        .init();

    info!("strata demo starting...");

    let config = StoreConfig::from_env()?;
    config.log_summary();

    let store = Store::builder()
        .config(config)
        .plugin(LoggerPlugin::new())
        .build();

    store.register_root(vec![todos_state()]).await?;
    store.notify_app_bootstrapped().await?;
    store
        .register_feature(vec![vec![preferences_state()]])
        .await?;

    let mut completions = store.actions();

    store
        .dispatch(vec![
            Action::new("todos:add").with_payload(json!("write the store")),
            Action::new("todos:add").with_payload(json!("ship it")),
            Action::new("todos:complete").with_payload(json!({"index": 0})),
            Action::new("preferences:theme").with_payload(json!("dark")),
        ])
        .await?;

    let mut completed = 0;
    while completions.try_recv().is_ok() {
        completed += 1;
    }
    info!(completed, "Batch dispatched");

    println!("{}", serde_json::to_string_pretty(store.snapshot().as_value())?);
    Ok(())
}
