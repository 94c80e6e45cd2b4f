//! End-to-end tests for the effect engine: policies, routing, enhancer
//! composition, and the error boundary.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::action::Action;
use crate::app::App;
use crate::error::ModelError;
use crate::model::{EffectMap, Model};
use crate::plugin::Plugin;
use crate::policy::Policy;

async fn delay(ms: u64) -> anyhow::Result<()> {
    sleep(Duration::from_millis(ms)).await;
    Ok(())
}

/// `add(state, { payload }) -> state + payload` (payload defaults to 1).
fn add(state: Value, action: &Action) -> Value {
    let n = state.as_i64().unwrap_or(0);
    let step = action
        .payload
        .as_ref()
        .and_then(Value::as_i64)
        .unwrap_or(1);
    json!(n + step)
}

#[tokio::test]
async fn test_effects_field_must_be_a_map() {
    let mut app = App::new();
    let err = app
        .model(Model::new("count", 0).effects_any(Box::new(vec!["addDelay"])))
        .unwrap_err();
    assert_eq!(err.to_string(), "app.model: effects should be Object");

    let err = app
        .model(Model::new("count", 0).effects_any(Box::new("addDelay".to_string())))
        .unwrap_err();
    assert_eq!(err.to_string(), "app.model: effects should be Object");

    // An empty map is a perfectly fine effects field.
    app.model(Model::new("count", 0).effects_any(Box::new(EffectMap::new())))
        .unwrap();
}

#[tokio::test]
async fn test_take_every_applies_put_after_the_delay() {
    let mut app = App::new();
    app.model(
        Model::new("count", 0)
            .reducer("add", add)
            .effect("addDelay", |action, ctx| async move {
                let payload = action.payload;
                ctx.call(delay(100)).await?;
                ctx.put(Action {
                    kind: "add".to_string(),
                    payload,
                });
                Ok(())
            }),
    )
    .unwrap();
    let store = app.start().unwrap();

    store.dispatch(Action::with_payload("count/addDelay", 2));
    // The routine suspends at its delay before putting anything: state is
    // untouched until the delay elapses.
    assert_eq!(store.slice("count"), Some(json!(0)));

    sleep(Duration::from_millis(200)).await;
    assert_eq!(store.slice("count"), Some(json!(2)));
}

#[tokio::test]
async fn test_qualified_and_bare_puts_reach_the_same_reducer() {
    let mut app = App::new();
    app.model(
        Model::new("count", 0)
            .reducer("add", add)
            .effect("addBare", |_, ctx| async move {
                ctx.put("add");
                Ok(())
            })
            .effect("addQualified", |_, ctx| async move {
                ctx.put("count/add");
                Ok(())
            }),
    )
    .unwrap();
    let store = app.start().unwrap();

    store.dispatch("count/addBare");
    store.dispatch("count/addQualified");
    sleep(Duration::from_millis(50)).await;

    assert_eq!(store.slice("count"), Some(json!(2)));
}

#[tokio::test]
async fn test_cross_namespace_put_updates_the_owning_slice() {
    let mut app = App::new();
    app.model(
        Model::new("count", 0).effect("showLoading", |_, ctx| async move {
            ctx.put("loading/show");
            Ok(())
        }),
    )
    .unwrap();
    app.model(Model::new("loading", false).reducer("show", |_, _| json!(true)))
        .unwrap();
    let store = app.start().unwrap();

    store.dispatch("count/showLoading");
    sleep(Duration::from_millis(50)).await;

    assert_eq!(store.slice("loading"), Some(json!(true)));
    assert_eq!(store.slice("count"), Some(json!(0)));
}

#[tokio::test]
async fn test_effect_failure_reaches_the_hook_exactly_once() {
    let messages: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = messages.clone();

    let mut app = App::new().on_error(move |failure| {
        sink.lock().unwrap().push(failure.message());
    });
    app.model(
        Model::new("count", 0).effect("boom", |_, _| async move {
            Err(anyhow!("effect failed"))
        }),
    )
    .unwrap();
    let store = app.start().unwrap();

    // Dispatch must not raise; the boundary swallows the failure.
    store.dispatch("count/boom");
    sleep(Duration::from_millis(50)).await;

    assert_eq!(*messages.lock().unwrap(), vec!["effect failed".to_string()]);
}

#[tokio::test]
async fn test_panicking_effect_reaches_the_hook() {
    let messages: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = messages.clone();

    let mut app = App::new().on_error(move |failure| {
        sink.lock().unwrap().push(failure.message());
    });
    app.model(Model::new("count", 0).effect("kaboom", |_, _| async move {
        panic!("routine blew up");
    }))
    .unwrap();
    let store = app.start().unwrap();

    store.dispatch("count/kaboom");
    sleep(Duration::from_millis(50)).await;

    let messages = messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("routine blew up"));
}

#[tokio::test]
async fn test_take_latest_keeps_only_the_second_dispatch() {
    let mut app = App::new();
    app.model(
        Model::new("count", 0).reducer("add", add).effect_with(
            "addDelay",
            |action, ctx| async move {
                let payload = action.payload;
                ctx.call(delay(100)).await?;
                ctx.put(Action {
                    kind: "add".to_string(),
                    payload,
                });
                Ok(())
            },
            Policy::TakeLatest,
        ),
    )
    .unwrap();
    let store = app.start().unwrap();

    store.dispatch(Action::with_payload("count/addDelay", 2));
    sleep(Duration::from_millis(20)).await;
    store.dispatch(Action::with_payload("count/addDelay", 3));

    sleep(Duration::from_millis(300)).await;
    // The first execution was superseded mid-delay; its put is discarded.
    assert_eq!(store.slice("count"), Some(json!(3)));
}

#[tokio::test]
async fn test_watcher_serializes_on_its_own_take_loop() {
    let mut app = App::new();
    app.model(
        Model::new("count", 0).reducer("add", add).effect_with(
            "watch",
            |_, ctx| async move {
                loop {
                    let action = ctx.take("count/addWatcher").await?;
                    let payload = action.payload;
                    ctx.call(delay(100)).await?;
                    ctx.put(Action {
                        kind: "add".to_string(),
                        payload,
                    });
                }
            },
            Policy::Watcher,
        ),
    )
    .unwrap();
    let store = app.start().unwrap();

    store.dispatch(Action::with_payload("count/addWatcher", 2));
    sleep(Duration::from_millis(10)).await;
    // The watcher's current take was consumed by the first action; the
    // second is never observed by a later take's fresh subscription.
    store.dispatch(Action::with_payload("count/addWatcher", 3));

    sleep(Duration::from_millis(300)).await;
    assert_eq!(store.slice("count"), Some(json!(2)));
}

#[tokio::test]
async fn test_watcher_sees_action_dispatched_right_after_start() {
    let mut app = App::new().with_bus_capacity(64);
    app.model(
        Model::new("count", 0).reducer("add", add).effect_with(
            "watch",
            |_, ctx| async move {
                loop {
                    let action = ctx.take("count/addWatcher").await?;
                    let payload = action.payload;
                    ctx.call(delay(100)).await?;
                    ctx.put(Action {
                        kind: "add".to_string(),
                        payload,
                    });
                }
            },
            Policy::Watcher,
        ),
    )
    .unwrap();
    let store = app.start().unwrap();

    // No settling sleep: the subscription the first take consumes was
    // opened before start() returned, so both actions are buffered. The
    // first is applied; the second is gone by the next take.
    store.dispatch(Action::with_payload("count/addWatcher", 2));
    store.dispatch(Action::with_payload("count/addWatcher", 3));

    sleep(Duration::from_millis(300)).await;
    assert_eq!(store.slice("count"), Some(json!(2)));
}

#[tokio::test]
async fn test_enhancer_composition_is_first_registered_outermost() {
    let counter = Arc::new(AtomicI64::new(0));

    let mut app = App::new();

    let c1 = counter.clone();
    app.plug(Plugin::new().on_effect(move |effect, _, _, _| {
        let c1 = c1.clone();
        Arc::new(move |action, ctx| {
            let effect = effect.clone();
            let c1 = c1.clone();
            Box::pin(async move {
                c1.fetch_add(1, Ordering::SeqCst);
                effect(action, ctx).await?;
                // c == 5 here; outermost "after" runs last
                let c = c1.load(Ordering::SeqCst);
                c1.store(c * 2, Ordering::SeqCst);
                Ok(())
            })
        })
    }))
    .unwrap();

    let c2 = counter.clone();
    app.plug(Plugin::new().on_effect(move |effect, _, _, _| {
        let c2 = c2.clone();
        Arc::new(move |action, ctx| {
            let effect = effect.clone();
            let c2 = c2.clone();
            Box::pin(async move {
                let c = c2.load(Ordering::SeqCst);
                c2.store(c * 3, Ordering::SeqCst);
                effect(action, ctx).await?;
                c2.fetch_add(2, Ordering::SeqCst);
                Ok(())
            })
        })
    }))
    .unwrap();

    app.model(Model::new("count", 0).effect("run", |_, _| async { Ok(()) }))
        .unwrap();
    let store = app.start().unwrap();

    store.dispatch("count/run");
    sleep(Duration::from_millis(50)).await;

    // E1 outermost: (((0 + 1) * 3) + 2) * 2 = 10. The reverse nesting
    // would produce ((0 * 3 + 1) + ...) = 4 instead.
    assert_eq!(counter.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn test_unknown_policy_fails_start_naming_the_valid_kinds() {
    use crate::model::EffectEntry;

    let mut app = App::new();
    app.model(Model::new("count", 0).effect_entry(
        "addDelay",
        EffectEntry::with_policy(|_, _| async { Ok(()) }, "nonvalid"),
    ))
    .unwrap();

    let err = app.start().unwrap_err();
    assert!(matches!(err, ModelError::InvalidEffectDescriptor { ref key } if key == "count/addDelay"));
    assert_eq!(
        err.to_string(),
        "app.start: `count/addDelay`: effect type should be takeEvery, takeLatest or watcher"
    );
}

#[tokio::test]
async fn test_put_triggers_put_re_entrantly() {
    let mut app = App::new();
    app.model(
        Model::new("count", 0)
            .reducer("add", add)
            .effect("outer", |_, ctx| async move {
                ctx.put("inner");
                Ok(())
            })
            .effect("inner", |_, ctx| async move {
                ctx.put("add");
                Ok(())
            }),
    )
    .unwrap();
    let store = app.start().unwrap();

    store.dispatch("count/outer");
    sleep(Duration::from_millis(50)).await;

    assert_eq!(store.slice("count"), Some(json!(1)));
}

#[tokio::test]
async fn test_loading_plugin_round_trip() {
    // The canonical onEffect use case: flip a shared loading flag around
    // every effect execution.
    let mut app = App::new();
    app.plug(
        Plugin::new()
            .extra_reducer("loading", |state, action| match action.kind.as_str() {
                "@@LOADING/SHOW" => json!(true),
                "@@LOADING/HIDE" => json!(false),
                _ if state.is_null() => json!(false),
                _ => state,
            })
            .on_effect(|effect, ctx, _, _| {
                Arc::new(move |action, ectx| {
                    let effect = effect.clone();
                    let ctx = ctx.clone();
                    Box::pin(async move {
                        ctx.put("@@LOADING/SHOW");
                        let result = effect(action, ectx).await;
                        ctx.put("@@LOADING/HIDE");
                        result
                    })
                })
            }),
    )
    .unwrap();

    app.model(
        Model::new("count", 0)
            .reducer("add", add)
            .effect("addDelay", |_, ctx| async move {
                ctx.call(delay(50)).await?;
                ctx.put("add");
                Ok(())
            }),
    )
    .unwrap();
    let store = app.start().unwrap();

    store.dispatch("count/addDelay");
    // The enhancer's SHOW put runs before the wrapped routine suspends,
    // so it is visible as soon as dispatch returns.
    assert_eq!(store.slice("loading"), Some(json!(true)));

    sleep(Duration::from_millis(200)).await;
    assert_eq!(store.slice("loading"), Some(json!(false)));
    assert_eq!(store.slice("count"), Some(json!(1)));
}

#[tokio::test]
async fn test_puts_before_first_suspension_land_before_dispatch_returns() {
    let mut app = App::new();
    app.model(
        Model::new("count", 0)
            .reducer("add", add)
            .effect("addEager", |_, ctx| async move {
                ctx.put("add");
                ctx.call(delay(50)).await?;
                ctx.put("add");
                Ok(())
            }),
    )
    .unwrap();
    let store = app.start().unwrap();

    // The routine runs to its first await inside dispatch.
    store.dispatch("count/addEager");
    assert_eq!(store.slice("count"), Some(json!(1)));

    sleep(Duration::from_millis(200)).await;
    assert_eq!(store.slice("count"), Some(json!(2)));
}
