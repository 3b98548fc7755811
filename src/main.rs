//! Lateral: entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Resolve effective log level (CLI `-v` flags > env > config)
//!   4. Init logger once
//!   5. Build the chat core (providers, memory, routing, search)
//!   6. Spawn Ctrl-C → shutdown signal watcher
//!   7. Run components (memory sweeper, HTTP channel) until shutdown

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use lateral::app::App;
use lateral::config::{self, Config};
use lateral::error::AppError;
use lateral::logger;
use lateral::subsystems::runtime::spawn_components;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Optional file.
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();

    let config = config::load(args.config_path.as_deref())?;

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    let force_cli_level = args.log_level.is_some();

    logger::init(effective_log_level, force_cli_level)?;

    info!(
        name = %config.name,
        work_dir = %config.work_dir.display(),
        configured_log_level = %config.log_level,
        effective_log_level = %effective_log_level,
        "config loaded"
    );

    let app = Arc::new(App::build(config)?);

    let shutdown = CancellationToken::new();
    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, initiating shutdown");
            ctrlc_token.cancel();
        }
    });

    print_startup_summary(&app);

    let components = spawn_components(app.components(), shutdown.clone());
    let result = components.join().await;

    shutdown.cancel();
    result
}

fn print_startup_summary(app: &App) {
    let config: &Config = &app.config;
    let registry = app.orchestrator.registry();

    let fit = |text: String| -> String {
        const WIDTH: usize = 58;
        if text.chars().count() >= WIDTH {
            let mut out = text.chars().take(WIDTH - 1).collect::<String>();
            out.push('…');
            out
        } else {
            format!("{text:<WIDTH$}")
        }
    };

    let available = registry.available_ids();
    let providers_line = if available.is_empty() {
        "none available".to_string()
    } else {
        available.join(", ")
    };

    let http_line = if config.comms_http_should_load() {
        format!("🌐 http: {}", config.comms.http.bind)
    } else if config.comms.http.enabled {
        "🌐 http: configured but not compiled in".to_string()
    } else {
        "🌐 http: disabled".to_string()
    };

    let search_line = if app.orchestrator.search().is_configured() {
        format!("enabled ({} results)", app.orchestrator.search().num_results())
    } else {
        "disabled (no API key)".to_string()
    };

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ 🤖 Lateral Status                                            ║");
    println!("╟──────────────────────────────────────────────────────────────╢");
    println!("║ 🧾 Name: {:<51}║", config.name);
    println!("║ 🧠 PID: {:<52}║", std::process::id());
    println!("╟──────────────────────────────────────────────────────────────╢");
    println!("║ 🧠 LLM                                                       ║");
    println!("║   {}║", fit(format!("default={}", registry.default_provider())));
    println!("║   {}║", fit(format!("available: {providers_line}")));
    println!("╟──────────────────────────────────────────────────────────────╢");
    println!("║ 📡 Comms                                                     ║");
    println!("║   {}║", fit(http_line));
    println!("╟──────────────────────────────────────────────────────────────╢");
    println!("║ 🔎 Search                                                    ║");
    println!("║   {}║", fit(search_line));
    println!("╟──────────────────────────────────────────────────────────────╢");
    println!("║ 🗂️  Memory                                                    ║");
    println!(
        "║   {}║",
        fit(format!(
            "backend={:?} window={} max={}",
            config.memory.backend, config.memory.window_size, config.memory.max_conversations
        ))
    );
    println!("╚══════════════════════════════════════════════════════════════╝");
}

struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<String>,
}

fn parse_cli_args() -> CliArgs {
    parse_args(std::env::args().skip(1))
}

fn parse_args(args: impl Iterator<Item = String>) -> CliArgs {
    let mut verbosity = 0u8;
    let mut config_path = None;

    let mut iter = args;
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: lateral [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("  -f, --config <PATH>        Path to configuration file (default: config/default.toml)");
                println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
                std::process::exit(0);
            }
            "-f" | "--config" => {
                if let Some(path) = iter.next() {
                    config_path = Some(path);
                } else {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add(u8::try_from(a.len() - 1).unwrap_or(u8::MAX));
            }
            _ => {}
        }
    }

    //   -v      → warn
    //   -vv     → info
    //   -vvv    → debug
    //   -vvvv+  → trace  (full prompt/response payloads)
    let log_level = match verbosity {
        0 => None,
        1 => Some("warn"),
        2 => Some("info"),
        3 => Some("debug"),
        _ => Some("trace"),
    };

    CliArgs { log_level, config_path }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        parse_args(args.iter().map(|a| a.to_string()))
    }

    #[test]
    fn verbosity_tiers() {
        assert_eq!(parse(&[]).log_level, None);
        assert_eq!(parse(&["-v"]).log_level, Some("warn"));
        assert_eq!(parse(&["-v", "--verbose"]).log_level, Some("info"));
        assert_eq!(parse(&["-vvv"]).log_level, Some("debug"));
    }

    #[test]
    fn very_long_flag_saturates_at_trace() {
        // 257 v's would wrap to 1 (warn) with a truncating cast.
        let flag = format!("-{}", "v".repeat(257));
        assert_eq!(parse(&[flag.as_str()]).log_level, Some("trace"));
    }

    #[test]
    fn config_path_and_double_dash() {
        let args = parse(&["-f", "custom.toml", "--", "-vvvv"]);
        assert_eq!(args.config_path.as_deref(), Some("custom.toml"));
        assert_eq!(args.log_level, None);
    }
}
