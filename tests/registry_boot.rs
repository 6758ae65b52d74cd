//! Integration tests for the Registry/Runner boot sequence: dependency-ordered
//! initialization (sequential and parallel), lock-after-boot, and dispose-in-reverse.

use std::sync::Arc;

use weft::{
    DependencyMap, DependencyRef, Id, InitMode, ResourceDef, RunOptions, Runner, Registry,
    TaskDef, TaskRunner,
};
use weft::EventManager;

fn resource(id: &str, deps: DependencyMap, init: impl Fn() -> i32 + Send + Sync + 'static) -> ResourceDef {
    let init = Arc::new(init);
    ResourceDef {
        id: id.into(),
        dependencies: deps,
        register: vec![],
        overrides: vec![],
        middleware: vec![],
        tags: vec![],
        config: serde_json::Value::Null,
        init: Arc::new(move |_config, _deps| {
            let init = init.clone();
            Box::pin(async move { Ok(serde_json::json!({ "n": init() })) })
        }),
        dispose: None,
        result_schema: None,
    }
}

#[tokio::test]
async fn sequential_boot_respects_a_diamond_dependency_graph() {
    let registry = Arc::new(Registry::new());
    let events = Arc::new(EventManager::new());

    registry.register_resource(resource("resource.base", DependencyMap::new(), || 1)).await.unwrap();

    let mut deps_left = DependencyMap::new();
    deps_left.insert("base".into(), DependencyRef::Resource("resource.base".into()));
    registry.register_resource(resource("resource.left", deps_left, || 2)).await.unwrap();

    let mut deps_right = DependencyMap::new();
    deps_right.insert("base".into(), DependencyRef::Resource("resource.base".into()));
    registry.register_resource(resource("resource.right", deps_right, || 3)).await.unwrap();

    let mut deps_top = DependencyMap::new();
    deps_top.insert("left".into(), DependencyRef::Resource("resource.left".into()));
    deps_top.insert("right".into(), DependencyRef::Resource("resource.right".into()));
    registry.register_resource(resource("resource.top", deps_top, || 4)).await.unwrap();

    let handle = Runner::run("resource.top".into(), registry.clone(), events.clone(), RunOptions::default())
        .await
        .unwrap();

    let order = handle.engine.registry.init_order().await;
    let pos = |id: &str| order.iter().position(|i| i.as_str() == id).unwrap();
    assert!(pos("resource.base") < pos("resource.left"));
    assert!(pos("resource.base") < pos("resource.right"));
    assert!(pos("resource.left") < pos("resource.top"));
    assert!(pos("resource.right") < pos("resource.top"));

    assert_eq!(handle.value().await, Some(serde_json::json!({"n": 4})));
}

#[tokio::test]
async fn parallel_boot_initializes_independent_resources_concurrently() {
    let registry = Arc::new(Registry::new());
    let events = Arc::new(EventManager::new());

    for name in ["resource.a", "resource.b", "resource.c"] {
        registry.register_resource(resource(name, DependencyMap::new(), || 0)).await.unwrap();
    }

    let handle = Runner::run(
        "resource.a".into(),
        registry.clone(),
        events,
        RunOptions {
            init_mode: InitMode::Parallel,
            error_reporter: None,
        },
    )
    .await
    .unwrap();

    for name in ["resource.a", "resource.b", "resource.c"] {
        assert!(registry.is_resource_initialized(name).await, "{name} should be initialized");
    }
    assert!(registry.is_locked());
}

#[tokio::test]
async fn boot_failure_disposes_already_initialized_resources() {
    let registry = Arc::new(Registry::new());
    let events = Arc::new(EventManager::new());
    let disposed = Arc::new(tokio::sync::Mutex::new(Vec::new()));

    let disposed_clone = disposed.clone();
    let mut ok_resource = resource("resource.ok", DependencyMap::new(), || 1);
    ok_resource.dispose = Some(Arc::new(move |_v| {
        let disposed_clone = disposed_clone.clone();
        Box::pin(async move {
            disposed_clone.lock().await.push("resource.ok".to_string());
            Ok(())
        })
    }));
    registry.register_resource(ok_resource).await.unwrap();

    let mut deps_failing = DependencyMap::new();
    deps_failing.insert("ok".into(), DependencyRef::Resource("resource.ok".into()));
    let failing = ResourceDef {
        id: "resource.failing".into(),
        dependencies: deps_failing,
        register: vec![],
        overrides: vec![],
        middleware: vec![],
        tags: vec![],
        config: serde_json::Value::Null,
        init: Arc::new(|_config, _deps| {
            Box::pin(async move {
                Err(weft::RuntimeError {
                    kind: weft::RuntimeErrorKind::Init,
                    source_id: "resource.failing".to_string(),
                    message: "boom".to_string(),
                })
            })
        }),
        dispose: None,
        result_schema: None,
    };
    registry.register_resource(failing).await.unwrap();

    let result = Runner::run("resource.failing".into(), registry, events, RunOptions::default()).await;
    assert!(result.is_err());
    assert_eq!(*disposed.lock().await, vec!["resource.ok".to_string()]);
}

#[tokio::test]
async fn locked_registry_rejects_registration_after_boot() {
    let registry = Arc::new(Registry::new());
    let events = Arc::new(EventManager::new());
    registry.register_resource(resource("resource.only", DependencyMap::new(), || 1)).await.unwrap();

    Runner::run("resource.only".into(), registry.clone(), events, RunOptions::default())
        .await
        .unwrap();

    let err = registry.register_resource(resource("resource.late", DependencyMap::new(), || 2)).await;
    assert!(err.is_err());
}

#[tokio::test]
async fn task_depending_on_a_booted_resource_reads_its_value() {
    let registry = Arc::new(Registry::new());
    let events = Arc::new(EventManager::new());
    registry.register_resource(resource("resource.config", DependencyMap::new(), || 42)).await.unwrap();

    let mut task_deps = DependencyMap::new();
    task_deps.insert("config".into(), DependencyRef::Resource("resource.config".into()));
    let task = TaskDef {
        id: "task.read_config".into(),
        dependencies: task_deps,
        middleware: vec![],
        tags: vec![],
        throws: vec![],
        input_schema: None,
        result_schema: None,
        run: Arc::new(|_input, deps| {
            Box::pin(async move {
                let config = deps.resource_value("config")?;
                Ok(config)
            })
        }),
    };
    registry.register_task(task).await.unwrap();

    let handle = Runner::run("resource.config".into(), registry, events, RunOptions::default())
        .await
        .unwrap();

    let out = TaskRunner::run(&handle.engine, &"task.read_config".into(), serde_json::Value::Null)
        .await
        .unwrap();
    assert_eq!(out, serde_json::json!({"n": 42}));
}

#[tokio::test]
async fn dispose_runs_in_reverse_initialization_order() {
    let registry = Arc::new(Registry::new());
    let events = Arc::new(EventManager::new());
    let disposed = Arc::new(tokio::sync::Mutex::new(Vec::new()));

    let mut prev_deps = DependencyMap::new();
    for (i, name) in ["resource.r1", "resource.r2", "resource.r3"].iter().enumerate() {
        let mut def = resource(name, prev_deps.clone(), move || i as i32);
        let disposed_clone = disposed.clone();
        let name_owned = name.to_string();
        def.dispose = Some(Arc::new(move |_v| {
            let disposed_clone = disposed_clone.clone();
            let name_owned = name_owned.clone();
            Box::pin(async move {
                disposed_clone.lock().await.push(name_owned);
                Ok(())
            })
        }));
        registry.register_resource(def).await.unwrap();
        prev_deps = DependencyMap::new();
        prev_deps.insert("prev".into(), DependencyRef::Resource(Id::from(*name)));
    }

    let handle = Runner::run("resource.r3".into(), registry, events, RunOptions::default())
        .await
        .unwrap();
    handle.dispose().await.unwrap();

    assert_eq!(
        *disposed.lock().await,
        vec!["resource.r3".to_string(), "resource.r2".to_string(), "resource.r1".to_string()]
    );
}
