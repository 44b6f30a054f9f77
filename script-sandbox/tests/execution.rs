use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use script_sandbox::{
    CollectingSink, ConsoleLevel, HostMap, InvocationRequest, ResultType,
    SandboxConfig, SandboxError, ScriptExecutor,
};
use serde_json::{Value, json};
use tool_registry::{ToolMetadata, ToolRegistry, ToolResult};

fn single_worker() -> SandboxConfig {
    SandboxConfig::new().with_workers(NonZeroUsize::new(1).unwrap())
}

fn executor_with(config: SandboxConfig, tools: Arc<ToolRegistry>) -> Arc<ScriptExecutor> {
    ScriptExecutor::new(config, tools).unwrap()
}

fn executor() -> Arc<ScriptExecutor> {
    executor_with(single_worker(), Arc::new(ToolRegistry::new()))
}

#[test]
fn guest_writes_are_visible_to_the_host() {
    let executor = executor();
    let context = HostMap::from_value(json!({"args": {"name": "Alice"}}));
    executor
        .run(
            "context.args.name = 'Bob'; context.args.tags = ['a', {deep: true}]; delete context.args.missing;",
            "writer",
            Some(context.clone()),
        )
        .unwrap();

    let args = context.get("args").and_then(|value| value.as_map().cloned()).unwrap();
    assert_eq!(args.get("name").map(|value| value.to_json()), Some(json!("Bob")));
    assert_eq!(context.to_json()["args"]["tags"], json!(["a", {"deep": true}]));
}

#[test]
fn host_writes_during_a_run_are_visible_to_the_guest() {
    let tools = Arc::new(ToolRegistry::new());
    let context = HostMap::from_value(json!({"args": {"counter": 1}}));
    let shared = context.clone();
    tools
        .register_tool(ToolMetadata::new("bump").unwrap(), move |_input: Value| -> ToolResult<Value> {
            if let Some(args) = shared.get("args").and_then(|value| value.as_map().cloned()) {
                args.insert("counter", 2_i64);
            }
            Ok(Value::Null)
        })
        .unwrap();
    let executor = executor_with(single_worker(), tools);

    let execution = executor
        .run(
            "const before = context.args.counter; callTool('bump', {}); return [before, context.args.counter];",
            "reader",
            Some(context),
        )
        .unwrap();
    assert_eq!(execution.result, json!([1, 2]));
}

#[test]
fn proxies_keep_identity_within_a_run() {
    let executor = executor();
    let context = HostMap::from_value(json!({"args": {"nested": {"x": 1}}}));
    let execution = executor
        .run(
            "context.args.made = {a: 1};
             return [
               context.args === context.args,
               context.args.nested === context.args.nested,
               context.args.made === context.args.made,
               'x' in context.args.nested,
               Object.keys(context.args)
             ];",
            "identity",
            Some(context),
        )
        .unwrap();
    assert_eq!(execution.result, json!([true, true, true, true, ["nested", "made"]]));
    assert!(executor.registry().is_empty());
}

#[test]
fn exposed_mappings_are_live_and_released() {
    let executor = executor();
    let user_data = HostMap::from_value(json!({"name": "Alice"}));
    let request = InvocationRequest::new("userData.name = 'Bob'; userData.seen = true; 'ok'", "expose")
        .expose("userData", user_data.clone());

    let execution = executor.invoke(request).unwrap();
    assert_eq!(execution.result, json!("ok"));
    assert_eq!(execution.result_type, ResultType::String);
    assert_eq!(user_data.to_json(), json!({"name": "Bob", "seen": true}));
    assert!(executor.registry().is_empty());

    let execution = executor.run("typeof userData", "after", None).unwrap();
    assert_eq!(execution.result, json!("undefined"));
}

#[test]
fn interpreter_and_callbacks_are_reused_per_worker() {
    let executor = executor();
    for n in 0..3 {
        let execution = executor.run(&format!("{n} + 1"), "reuse", None).unwrap();
        assert_eq!(execution.result, json!(n + 1));
    }
    let stats = executor.stats();
    assert_eq!(stats.interpreters_created, 1);
    assert_eq!(stats.callback_registrations, 1);
    assert_eq!(stats.invocations, 3);
    assert_eq!(stats.failures, 0);
}

#[test]
fn reports_result_types() {
    let executor = executor();
    let cases = [
        ("({a: 1})", ResultType::Object, json!({"a": 1})),
        ("[1, 'two']", ResultType::Array, json!([1, "two"])),
        ("'text'", ResultType::String, json!("text")),
        ("1.5", ResultType::Number, json!(1.5)),
        ("false", ResultType::Boolean, json!(false)),
        ("undefined", ResultType::Null, Value::Null),
        ("() => 1", ResultType::Object, Value::Null),
        ("return Promise.resolve({done: true});", ResultType::Object, json!({"done": true})),
    ];
    for (code, expected_type, expected) in cases {
        let execution = executor.run(code, "types", None).unwrap();
        assert_eq!(execution.result_type, expected_type, "{code}");
        assert_eq!(execution.result, expected, "{code}");
    }
}

#[test]
fn quote_in_a_regex_does_not_hide_a_top_level_return() {
    let executor = executor();
    let code = r#"const s = "it's".replace(/'/g, ""); return s;"#;
    let execution = executor.run(code, "regex", None).unwrap();
    assert_eq!(execution.result, json!("its"));
    assert_eq!(execution.code, code);
    assert!(execution.prepared.starts_with("(function () {"));
}

#[test]
fn prepared_source_is_reported_alongside_the_submission() {
    let executor = executor();
    let execution = executor.run("1 + 2", "sum", None).unwrap();
    assert_eq!(execution.code, "1 + 2");
    assert_eq!(execution.prepared, "{\n1 + 2\n}");
    assert_eq!(execution.result, json!(3));
}

#[test]
fn context_proxy_result_is_exported_as_json() {
    let executor = executor();
    let context = HostMap::from_value(json!({"args": {"a": [1, 2]}}));
    let execution = executor.run("context.args", "export", Some(context)).unwrap();
    assert_eq!(execution.result, json!({"a": [1, 2]}));
    assert_eq!(execution.result_type, ResultType::Object);
}

#[test]
fn failures_are_classified() {
    let executor = executor();
    let err = executor.run("let = 1;", "broken", None).unwrap_err();
    assert_eq!(err.kind(), "SyntaxError");

    let err = executor.run("null.field", "broken", None).unwrap_err();
    assert!(matches!(err, SandboxError::Runtime { ref message, .. } if message.starts_with("TypeError")));

    let err = executor
        .run("return Promise.reject(new RangeError('nope'));", "broken", None)
        .unwrap_err();
    assert!(err.to_string().contains("RangeError: nope"));

    let execution = executor.run("'still alive'", "after", None).unwrap();
    assert_eq!(execution.result, json!("still alive"));
    assert_eq!(executor.stats().failures, 3);
}

#[test]
fn runaway_scripts_time_out_and_the_worker_recovers() {
    let config = single_worker().with_timeout(Some(Duration::from_millis(200)));
    let executor = executor_with(config, Arc::new(ToolRegistry::new()));
    let context = HostMap::from_value(json!({"args": {}}));

    let err = executor
        .run("while (true) {}", "spin", Some(context))
        .unwrap_err();
    assert!(matches!(err, SandboxError::Timeout { limit } if limit == Duration::from_millis(200)));
    assert!(executor.registry().is_empty());

    let execution = executor.run("40 + 2", "after", None).unwrap();
    assert_eq!(execution.result, json!(42));
    assert_eq!(executor.stats().interpreters_created, 1);
}

#[test]
fn console_and_events_reach_the_sink() {
    let executor = executor();
    let sink = CollectingSink::new();
    let request = InvocationRequest::new(
        "console.log('hello', {n: 1}, null);
         console.warn('careful');
         ssePush('progress', {pct: 50});
         pushContent('chunk');
         pushDone();
         return ssePush('raw', 7);",
        "reporter",
    )
    .with_sink(sink.clone());

    let execution = executor.invoke(request).unwrap();
    assert_eq!(execution.result, json!(true));

    let records = sink.console_records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].level, ConsoleLevel::Info);
    assert_eq!(records[0].message, r#"hello {"n":1} null"#);
    assert_eq!(records[0].tool_name, "reporter");
    assert_eq!(records[1].level, ConsoleLevel::Warn);
    assert!(records[1].timestamp > 0.0);

    let pushed: Vec<(String, String)> = sink
        .events()
        .into_iter()
        .filter(|event| event.event != "console")
        .map(|event| (event.event, event.data))
        .collect();
    assert_eq!(
        pushed,
        vec![
            ("progress".to_owned(), r#"{"pct":50}"#.to_owned()),
            ("content".to_owned(), "chunk".to_owned()),
            ("done".to_owned(), String::new()),
            ("raw".to_owned(), "7".to_owned()),
        ]
    );
}

#[test]
fn push_without_sink_reports_false() {
    let executor = executor();
    let execution = executor.run("console.error('nobody listens'); ssePush('x', 1)", "quiet", None).unwrap();
    assert_eq!(execution.result, json!(false));
}

#[test]
fn surface_globals_cannot_be_replaced() {
    let executor = executor();
    executor.run("try { callTool = null; } catch (e) {} console = 1;", "vandal", None).unwrap();
    let execution = executor
        .run(
            "[typeof callTool, typeof console.log, typeof __host_call_tool, typeof __scriptBridge]",
            "check",
            None,
        )
        .unwrap();
    assert_eq!(execution.result, json!(["function", "function", "undefined", "undefined"]));
}

#[test]
fn concurrent_invocations_use_every_worker() {
    let config = SandboxConfig::new().with_workers(NonZeroUsize::new(3).unwrap());
    let executor = executor_with(config, Arc::new(ToolRegistry::new()));
    let handles: Vec<_> = (0..6)
        .map(|n| {
            let executor = Arc::clone(&executor);
            std::thread::spawn(move || {
                let context = HostMap::from_value(json!({"args": {"n": n}}));
                executor.run("context.args.n * 10", "parallel", Some(context)).unwrap().result
            })
        })
        .collect();
    let mut results: Vec<Value> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();
    results.sort_by_key(|value| value.as_i64());
    assert_eq!(results, (0..6).map(|n| json!(n * 10)).collect::<Vec<_>>());
    assert!(executor.stats().interpreters_created <= 3);
    assert!(executor.registry().is_empty());
}

#[test]
fn shutdown_drains_and_rejects() {
    let executor = executor();
    executor.run("1", "warm", None).unwrap();
    executor.shutdown();
    assert!(executor.is_closed());
    assert!(matches!(executor.run("1", "late", None), Err(SandboxError::PoolClosed)));
}

#[tokio::test]
async fn invoke_async_suspends_instead_of_blocking() {
    let executor = executor();
    let context = HostMap::from_value(json!({"args": {"items": [1, 2, 3]}}));
    let request = InvocationRequest::new(
        "return context.args.items.reduce((sum, n) => sum + n, 0);",
        "async",
    )
    .with_context(context);
    let execution = executor.invoke_async(request).await.unwrap();
    assert_eq!(execution.result, json!(6));
    assert_eq!(execution.result_type, ResultType::Number);
}
