use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use clap::Parser;
use hako_runtime::{Context, EvalOptions, Hako, HakoConfig, Runtime, StripOptions, Value};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "hako", about = "Run JavaScript on the hako WebAssembly engine")]
struct Cli {
    /// Script to run. `.mjs` files are evaluated as modules.
    file: Option<PathBuf>,

    /// Evaluate this source instead of a file
    #[arg(short, long, conflicts_with = "file")]
    eval: Option<String>,

    /// Evaluate as an ES module
    #[arg(short, long)]
    module: bool,

    /// Path to a hako.toml config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to hako.wasm (overrides the config; falls back to $HAKO_WASM)
    #[arg(long)]
    wasm: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout carries only the script's result
    let filter = EnvFilter::from_env("HAKO_LOG");
    if cli.json {
        fmt().json().with_env_filter(filter).with_writer(std::io::stderr).init();
    } else {
        fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
    }

    let mut config = match &cli.config {
        Some(path) => HakoConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => HakoConfig::default(),
    };
    if let Some(wasm) = cli
        .wasm
        .clone()
        .or_else(|| std::env::var_os("HAKO_WASM").map(PathBuf::from))
    {
        config.engine.wasm_path = Some(wasm);
    }

    let (source, options) = load_source(&cli)?;

    let hako = Hako::from_config(&config.engine)?;
    let runtime = setup_runtime(&hako, &config)?;
    let ctx = runtime.create_context(config.context_options()?)?;
    install_print(&ctx)?;

    tracing::debug!(file = ?options.file_name, "Evaluating");
    let outcome = run(&runtime, &ctx, &source, &options).await;

    ctx.release();
    runtime.release();

    if let Some(output) = outcome? {
        println!("{output}");
    }
    Ok(())
}

fn load_source(cli: &Cli) -> Result<(String, EvalOptions)> {
    let (source, file_name, is_module) = match (&cli.eval, &cli.file) {
        (Some(code), _) => (code.clone(), "eval".to_string(), cli.module),
        (None, Some(path)) => {
            let code = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            (code, path.display().to_string(), cli.module || is_module_path(path))
        }
        (None, None) => bail!("nothing to run: pass a script path or --eval"),
    };
    let options = if is_module {
        EvalOptions::module()
    } else {
        EvalOptions::default()
    };
    Ok((source, options.with_file_name(file_name)))
}

fn is_module_path(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "mjs")
}

fn setup_runtime(hako: &Hako, config: &HakoConfig) -> Result<Runtime> {
    let runtime = hako.create_runtime()?;
    if config.runtime.memory_limit.is_some() {
        runtime.set_memory_limit(config.runtime.memory_limit)?;
    }
    if config.runtime.strip != StripOptions::default() {
        runtime.set_strip_info(config.runtime.strip)?;
    }
    if let Some(handler) = config.limits.interrupt_handler() {
        runtime.enable_interrupt_handler(handler, 0)?;
    }
    Ok(runtime)
}

/// Exposes a global `print(...args)` writing to stdout.
fn install_print(ctx: &Context) -> Result<()> {
    let print = ctx.new_function("print", |_ctx, _this, args| {
        let line = args
            .iter()
            .map(Value::as_string)
            .collect::<hako_runtime::Result<Vec<_>>>()?
            .join(" ");
        println!("{line}");
        Ok(())
    })?;
    ctx.global_object()?.set_property("print", &print)?;
    Ok(())
}

/// Evaluates the script, settles a returned promise and renders the result
/// as JSON. `undefined` renders as nothing.
async fn run(
    runtime: &Runtime,
    ctx: &Context,
    source: &str,
    options: &EvalOptions,
) -> Result<Option<String>> {
    let mut value = ctx.eval_code(source, options)?.unwrap()?;
    if value.is_promise()? {
        value = ctx.await_promise(&value).await?;
    }
    runtime.drive().await?;

    if value.is_undefined()? {
        return Ok(None);
    }
    let rendered = ctx.dump(&value)?;
    Ok(Some(serde_json::to_string_pretty(&rendered)?))
}
