use clap::{Parser, Subcommand};
use std::path::Path;

use curly_compiler::{Engine, FileProvider, Template};
use curly_runtime::{render, Context, Value};

#[derive(Parser)]
#[command(name = "curly")]
#[command(about = "Curly — brace-delimited template compiler")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a template and report errors without rendering
    Check {
        /// Input template file
        path: String,
    },

    /// Compile and render a template
    Render {
        /// Input template file
        path: String,

        /// JSON file with template variables
        #[arg(long)]
        data: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Command::Check { path } => cmd_check(&path),
        Command::Render { path, data } => cmd_render(&path, data.as_deref()),
    }
}

/// An engine whose default provider serves the template's directory, so
/// `{include}` resolves sibling files.
fn engine_for(path: &str) -> (Engine, String) {
    let p = Path::new(path);
    if !p.exists() {
        eprintln!("Error: file not found: {path}");
        std::process::exit(1);
    }
    let name = match p.file_name().and_then(|n| n.to_str()) {
        Some(name) => name.to_string(),
        None => {
            eprintln!("Error: not a template file: {path}");
            std::process::exit(1);
        }
    };
    let dir = match p.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };
    let mut engine = Engine::new();
    engine.set_provider(None, Box::new(FileProvider::new(dir)));
    (engine, name)
}

fn cmd_check(path: &str) {
    let (engine, name) = engine_for(path);

    let template = match Template::load(&engine, &name) {
        Ok(template) => template,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = template.compile() {
        eprintln!("{e}");
        std::process::exit(1);
    }

    eprintln!("OK: {path}");
}

fn cmd_render(path: &str, data: Option<&str>) {
    let (engine, name) = engine_for(path);

    let program = match Template::load(&engine, &name).and_then(Template::compile) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let mut ctx = Context::new();
    if let Some(data_path) = data {
        for (key, value) in read_data(data_path) {
            ctx.set(key, value);
        }
    }

    match render(&program, engine.registry(), &mut ctx) {
        Ok(out) => print!("{out}"),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

fn read_data(path: &str) -> Vec<(String, Value)> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Error reading {path}: {e}");
            std::process::exit(1);
        }
    };
    let parsed: serde_json::Value = match serde_json::from_str(&text) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("Error parsing {path}: {e}");
            std::process::exit(1);
        }
    };
    match parsed {
        serde_json::Value::Object(map) => map
            .into_iter()
            .map(|(key, value)| (key, json_value(value)))
            .collect(),
        _ => {
            eprintln!("Error: {path} must contain a JSON object");
            std::process::exit(1);
        }
    }
}

fn json_value(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(0.0)),
        },
        serde_json::Value::String(s) => Value::Str(s),
        serde_json::Value::Array(items) => {
            Value::List(items.into_iter().map(json_value).collect())
        }
        serde_json::Value::Object(map) => Value::Map(
            map.into_iter()
                .map(|(key, value)| (key, json_value(value)))
                .collect(),
        ),
    }
}
