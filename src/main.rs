//! podterm - Podplay Build terminal
//!
//! USAGE:
//!   podterm                         # connect to the derived terminal address
//!   podterm --url <ws-url>          # connect to an explicit address
//!   podterm --page <page-url>       # derive the address from a page URL
//!   podterm --build                 # enable `!` build commands
//!   podterm doctor                  # check config, address, backend
//!   podterm config set <key> <val>  # non-interactive config

use anyhow::Result;

use podterm::config;
use podterm::connection;
use podterm::logging;
use podterm::tools;
use podterm::ui;
use podterm::Terminal;

// ═══════════════════════════════════════════════════════════════
// CLI
// ═══════════════════════════════════════════════════════════════

#[derive(Debug)]
enum Command {
    Interactive {
        url: Option<String>,
        page: Option<String>,
        build: bool,
    },
    Doctor,
    ConfigSet {
        key: String,
        value: String,
    },
    Help,
}

fn parse_args() -> Command {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        return Command::Help;
    }

    if args.first().map(|s| s.as_str()) == Some("doctor") {
        return Command::Doctor;
    }

    if args.first().map(|s| s.as_str()) == Some("config") {
        if args.get(1).map(|s| s.as_str()) == Some("set") {
            return Command::ConfigSet {
                key: args.get(2).cloned().unwrap_or_default(),
                value: args.get(3).cloned().unwrap_or_default(),
            };
        }
        return Command::Help;
    }

    let mut url = None;
    let mut page = None;
    let mut build = false;
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "--url" | "-u" => {
                i += 1;
                url = args.get(i).cloned();
            }
            "--page" | "-p" => {
                i += 1;
                page = args.get(i).cloned();
            }
            "--build" | "-b" => build = true,
            _ => {}
        }
        i += 1;
    }

    Command::Interactive { url, page, build }
}

fn print_help() {
    println!(r#"podterm - Podplay Build terminal

USAGE:
    podterm [--url URL] [--page URL] [--build]
    podterm doctor                  # check config, address, backend
    podterm config set <key> <val>  # set config value

FLAGS:
    -u, --url <ws-url>      Terminal server address (overrides config)
    -p, --page <url>        Page URL the address is derived from
    -b, --build             Enable build-mode `!` commands
    -h, --help              Show this help

CONFIG:
    ~/.config/podterm/config.json       Addresses, retry policy, build mode
    ~/.local/state/podterm/podterm.log  Log file (filter with RUST_LOG)
    ~/.local/state/podterm/history.jsonl Command history

ENVIRONMENT:
    PODTERM_URL             Override terminal address from config
    RUST_LOG                Log filter (default podterm=info)

CONTROLS (interactive mode):
    Enter       Run command
    Up/Down     Command history
    Ctrl-R      Reconnect
    Esc         Quit
"#);
}

// ═══════════════════════════════════════════════════════════════
// MAIN
// ═══════════════════════════════════════════════════════════════

#[tokio::main]
async fn main() -> Result<()> {
    match parse_args() {
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Doctor => run_doctor().await,
        Command::ConfigSet { key, value } => run_config_set(&key, &value),
        Command::Interactive { url, page, build } => run_interactive(url, page, build).await,
    }
}

// ═══════════════════════════════════════════════════════════════
// COMMANDS
// ═══════════════════════════════════════════════════════════════

async fn run_doctor() -> Result<()> {
    println!("podterm doctor\n");

    let path = config::config_path()?;
    let cfg = config::Config::load()?;
    println!("[{}] Config: {}", if path.exists() { "✓" } else { "-" }, path.display());

    let address = match cfg.explicit_terminal_url() {
        Some(url) => Ok(url),
        None => connection::derive_terminal_url(&cfg.page_url).map(|u| u.to_string()),
    };
    match &address {
        Ok(url) => println!("[✓] Terminal address: {}", url),
        Err(e) => println!("[✗] Terminal address: {}", e),
    }

    println!(
        "[i] Retries: {} (base {}ms, cap {}ms)",
        cfg.max_retries, cfg.retry_base_ms, cfg.retry_max_delay_ms
    );

    print!("[?] Backend: checking...");
    match tools::check_backend(&cfg.api_base).await {
        Ok(status) => println!("\r[✓] Backend: {} ({})          ", cfg.api_base, status),
        Err(e) => println!("\r[✗] Backend: {}", e),
    }

    Ok(())
}

fn run_config_set(key: &str, value: &str) -> Result<()> {
    let mut cfg = config::Config::load()?;
    cfg.set(key, value)?;
    cfg.save()?;
    println!("{} set in {}", key, config::config_path()?.display());
    Ok(())
}

async fn run_interactive(url: Option<String>, page: Option<String>, build: bool) -> Result<()> {
    let log_path = logging::init()?;

    let mut cfg = config::Config::load()?;
    if let Some(page) = page {
        cfg.page_url = page;
    }
    tracing::info!(log = %log_path.display(), build, "starting podterm");

    let terminal = Terminal::from_config(&cfg, build)?;
    ui::run_tui(terminal, url).await
}
