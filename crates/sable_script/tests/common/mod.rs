//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sable_script::{Module, NativeModule, Script, ScriptResult, Table, Value};

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn source(name: &str) -> String {
    std::fs::read_to_string(fixture(name)).unwrap()
}

/// Host functions every fixture may `require("test")`.
pub fn test_module() -> Arc<NativeModule> {
    let module = NativeModule::new("test", "1.0.0");
    module.register("hash", hash).unwrap();
    module
        .register("echo", |s: String| Ok::<_, String>(s))
        .unwrap();
    module
        .register("sum", |a: f64, b: f64| Ok::<_, String>(a + b))
        .unwrap();
    module
        .register("join", |items: Vec<String>| Ok::<_, String>(items.join(", ")))
        .unwrap();
    module
        .register("sleep", |ms: f64| {
            std::thread::sleep(Duration::from_millis(ms as u64));
            Ok::<_, String>(())
        })
        .unwrap();
    module.register("enrich", enrich).unwrap();
    module
        .register("error", |input: String| {
            Err::<String, _>(format!("error with input ({})", input))
        })
        .unwrap();
    module
        .register("error1", |_: Table| Err::<String, _>("throwing error"))
        .unwrap();
    module
        .register("toNumbers", |v: Value| match v {
            Value::Numbers(numbers) => Ok(numbers),
            other => Err(format!("unsupported type {}", other.kind())),
        })
        .unwrap();
    Arc::new(module)
}

/// Build a script from a fixture with the test module plus `extra`.
pub fn script(name: &str, extra: Vec<Arc<dyn Module>>) -> ScriptResult<Script> {
    let file = File::open(fixture(name)).unwrap();
    Script::builder("test.js")
        .concurrency(2)
        .module(test_module())
        .modules(extra)
        .build_from_reader(file)
}

fn hash(input: String) -> Result<f64, String> {
    // 32-bit FNV-1a
    let mut h: u32 = 0x811c_9dc5;
    for byte in input.bytes() {
        h ^= u32::from(byte);
        h = h.wrapping_mul(0x0100_0193);
    }
    Ok(f64::from(h))
}

fn enrich(name: String, mut request: Table) -> Result<Table, String> {
    request.insert("name".to_string(), Value::String(name));
    request.insert("age".to_string(), Value::Number(30.0));
    Ok(request)
}
