//! Bladesmith CLI: render a single template against an optional JSON
//! context and print the result to stdout.

use std::env;
use std::path::{Path, PathBuf};
use std::process;

use bladesmith::{Config, Context, Engine, Value};

fn print_usage() {
    eprintln!("Bladesmith - Blade-compatible template renderer");
    eprintln!();
    eprintln!("Usage: bladesmith <template_dir> <template_name> [context.json]");
    eprintln!();
    eprintln!("  template_dir    directory templates are resolved against");
    eprintln!("  template_name   name passed to Engine::render (extension optional)");
    eprintln!("  context.json    optional JSON object bound into the render context");
}

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.len() < 2 || args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        process::exit(if args.is_empty() { 64 } else { 0 });
    }

    let template_dir = PathBuf::from(&args[0]);
    let template_name = &args[1];
    let context_path = args.get(2).map(Path::new);

    if !template_dir.is_dir() {
        eprintln!("Error: '{}' is not a directory", template_dir.display());
        process::exit(64);
    }

    let ctx = Context::new();
    if let Some(path) = context_path {
        if let Err(e) = load_context(path, &ctx) {
            eprintln!("Error: {e}");
            process::exit(64);
        }
    }

    let engine = match Engine::new(Config::new(template_dir)) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(70);
        }
    };

    match engine.render(template_name, &ctx) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(70);
        }
    }
}

fn load_context(path: &Path, ctx: &Context) -> Result<(), String> {
    let raw = std::fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
    let parsed: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| format!("{}: invalid JSON: {e}", path.display()))?;
    let serde_json::Value::Object(map) = parsed else {
        return Err(format!("{}: context JSON must be an object", path.display()));
    };
    for (key, value) in map {
        ctx.set(&key, json_to_value(value));
    }
    Ok(())
}

fn json_to_value(v: serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => Value::list(items.into_iter().map(json_to_value)),
        serde_json::Value::Object(map) => {
            Value::map(map.into_iter().map(|(k, v)| (k, json_to_value(v))))
        }
    }
}
