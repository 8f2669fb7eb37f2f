//! Sable Runtime
//!
//! Minimal host binary: loads a script, exposes a small `host` module and
//! calls the entry point from several threads at once.
//!
//! ```text
//! sable [script.js] [calls]
//! ```
//!
//! Without a path a built-in demo script runs.

use std::fs::File;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rayon::prelude::*;
use sable_script::{NativeModule, RunContext, Script, Value};

const DEMO: &str = r#"
const host = require('host');
const json = require('json');

function fib(n) { return n < 2 ? 1 : fib(n - 1) + fib(n - 2) }

function main(n) {
    const result = { n: n, fib: fib(n), sum: host.sum(n, n) };
    print(json.encode(result));
    return result;
}
"#;

fn host_module() -> Result<Arc<NativeModule>> {
    let host = NativeModule::new("host", sable_core::VERSION);
    host.register("sum", |a: f64, b: f64| Ok::<_, String>(a + b))?;
    host.register("upper", |s: String| Ok::<_, String>(s.to_uppercase()))?;
    host.register("join", |items: Vec<String>, sep: String| {
        Ok::<_, String>(items.join(&sep))
    })?;
    Ok(Arc::new(host))
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    tracing::info!("Sable v{}", sable_core::VERSION);

    let mut args = std::env::args().skip(1);
    let path = args.next();
    let calls: usize = match args.next() {
        Some(n) => n.parse().context("call count must be a number")?,
        None => 8,
    };

    let builder = Script::builder(path.as_deref().unwrap_or("demo")).module(host_module()?);
    let script = match &path {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("cannot open {}", path))?;
            builder.build_from_reader(file)?
        }
        None => builder.build(DEMO)?,
    };
    tracing::info!(
        "Loaded {} with {} execution contexts",
        script.name(),
        script.concurrency()
    );

    let results: Vec<(usize, Result<Value, sable_script::ScriptError>)> = (0..calls)
        .into_par_iter()
        .map(|i| {
            let cx = RunContext::with_timeout(Duration::from_secs(5));
            (i, script.run(&cx, (i as f64,)))
        })
        .collect();

    let mut failures = 0;
    for (i, result) in results {
        match result {
            Ok(value) => tracing::info!("call {}: {}", i, value),
            Err(err) => {
                failures += 1;
                tracing::error!("call {}: {}", i, err);
            }
        }
    }

    script.close()?;
    if failures > 0 {
        anyhow::bail!("{} of {} calls failed", failures, calls);
    }
    Ok(())
}
