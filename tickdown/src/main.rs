//! tickdown — to-do list with per-task countdown timers.
//!
//! Runs a line-oriented shell over the session controller. Tasks live in a
//! sync server when one is configured, or in a process-local store otherwise.
//! Configuration via CLI flags, environment variables, or config file
//! (`~/.config/tickdown/config.toml`).
//!
//! ```bash
//! # Local-only mode
//! cargo run --bin tickdown
//!
//! # Against a sync server
//! cargo run --bin tickdown -- --server-url ws://127.0.0.1:9100/sync
//!
//! # Or via environment variable
//! TICKDOWN_SERVER=ws://127.0.0.1:9100/sync cargo run --bin tickdown
//! ```

use std::io::{self, Write as _};
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

use tickdown::auth::{AuthProvider, LocalAuthProvider};
use tickdown::config::{CliArgs, ClientConfig};
use tickdown::session::SessionController;
use tickdown::store::TaskStore;
use tickdown::store::memory::MemoryStore;
use tickdown::store::remote::WsStore;
use tickdown::ui::{self, UiEvent};
use tickdown::weather::StaticWeather;
use tickdown_proto::task::{Task, TaskId};

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    // Load and resolve configuration (CLI args > config file > env > defaults).
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    // Initialize logging before anything else (logs go to file, not stdout,
    // which belongs to the shell).
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    tracing::info!("tickdown starting");

    let result = match &config.server_url {
        Some(url) => {
            match WsStore::connect(url, config.connect_timeout, config.request_timeout).await {
                Ok(store) => {
                    println!("connected to sync server at {url}");
                    run_app(Arc::new(store), &config).await
                }
                Err(e) => {
                    println!("could not connect to sync server ({e}); tasks stay local");
                    run_app(Arc::new(MemoryStore::new()), &config).await
                }
            }
        }
        None => run_app(Arc::new(MemoryStore::new()), &config).await,
    };

    tracing::info!("tickdown exiting");
    result
}

/// Initialize file-based logging.
///
/// Logs are written to a file (never stdout, which the shell owns). Returns
/// a [`WorkerGuard`] that must be held until shutdown to ensure all buffered
/// log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("tickdown.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Main shell loop: session events interleaved with typed commands.
async fn run_app<S: TaskStore + 'static>(store: Arc<S>, config: &ClientConfig) -> io::Result<()> {
    let auth = Arc::new(LocalAuthProvider::new());
    let weather = Arc::new(StaticWeather::default());
    let (events_tx, mut events_rx) = mpsc::channel(config.event_buffer);

    let controller = Arc::new(SessionController::new(
        Arc::clone(&auth),
        store,
        weather,
        events_tx,
        config.tick_interval,
    ));
    let listener = controller.spawn_auth_listener();

    println!("tickdown — tasks with countdown timers. Type 'help' for commands.");
    if let Some(email) = &config.email {
        println!("hint: signin {email} <password>");
    }
    print_prompt()?;

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    // The last rendered list; commands address tasks by its 1-based index.
    let mut visible: Vec<Task> = Vec::new();

    loop {
        tokio::select! {
            event = events_rx.recv() => {
                match event {
                    Some(event) => render_event(&event, &mut visible),
                    None => break,
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_command(&controller, auth.as_ref(), line.trim(), &visible).await {
                    break;
                }
                print_prompt()?;
            }
        }
    }

    listener.abort();
    Ok(())
}

fn print_prompt() -> io::Result<()> {
    print!("> ");
    io::stdout().flush()
}

/// Applies one session event to the shell: refresh the visible list or print
/// a one-line notification.
fn render_event(event: &UiEvent, visible: &mut Vec<Task>) {
    match event {
        UiEvent::TaskList(tasks) => {
            visible.clone_from(tasks);
            render_list(visible);
        }
        UiEvent::CountdownTick { id, remaining } => {
            if let Some(pos) = visible.iter().position(|t| t.id == *id) {
                visible[pos].time_remaining = *remaining;
                println!("  [{}] {}", pos + 1, ui::format_countdown(*remaining));
            }
        }
        UiEvent::TimerFinished { text, .. } => {
            println!("*** time's up: {text}");
        }
        UiEvent::Weather(report) => {
            println!(
                "weather in {}: {}, {:.1} C",
                report.place, report.summary, report.temperature_c
            );
        }
    }
}

fn render_list(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("  (no tasks)");
        return;
    }
    for (i, task) in tasks.iter().enumerate() {
        let mark = if task.completed { "x" } else { " " };
        let timer = if task.has_timer() {
            let running = if task.timer_active { " *" } else { "" };
            format!("  {}{running}", ui::format_countdown(task.time_remaining))
        } else {
            String::new()
        };
        println!("  {:>2}. [{mark}] {}{timer}", i + 1, task.text);
    }
}

/// Executes one typed command. Returns `false` when the shell should exit.
async fn handle_command<S: TaskStore + 'static>(
    controller: &SessionController<LocalAuthProvider, S, StaticWeather>,
    auth: &LocalAuthProvider,
    line: &str,
    visible: &[Task],
) -> bool {
    let mut parts = line.split_whitespace();
    let Some(cmd) = parts.next() else {
        return true;
    };

    match cmd {
        "help" => print_help(),
        "quit" | "exit" => return false,
        "signup" => {
            let (Some(email), Some(password)) = (parts.next(), parts.next()) else {
                println!("usage: signup <email> <password>");
                return true;
            };
            match auth.sign_up(email, password).await {
                Ok(user) => println!("signed up as {}", user.email),
                Err(e) => println!("error: {e}"),
            }
        }
        "signin" => {
            let (Some(email), Some(password)) = (parts.next(), parts.next()) else {
                println!("usage: signin <email> <password>");
                return true;
            };
            match auth.sign_in(email, password).await {
                Ok(user) => println!("signed in as {}", user.email),
                Err(e) => println!("error: {e}"),
            }
        }
        "signout" => {
            if let Err(e) = auth.sign_out().await {
                println!("error: {e}");
            }
        }
        "ls" => match controller.tasks().await {
            Ok(tasks) => render_list(&tasks),
            Err(e) => println!("error: {e}"),
        },
        "add" => {
            let Some(limit_arg) = parts.next() else {
                println!("usage: add <seconds> <text>");
                return true;
            };
            let text = parts.collect::<Vec<_>>().join(" ");
            match ui::parse_task_form(&text, limit_arg) {
                Ok((text, limit)) => {
                    if let Err(e) = controller.add_task(&text, limit).await {
                        println!("error: {e}");
                    }
                }
                Err(e) => println!("error: {e}"),
            }
        }
        "edit" => {
            let index = parts.next();
            let Some(limit_arg) = parts.next() else {
                println!("usage: edit <n> <seconds> <text>");
                return true;
            };
            let Some(id) = resolve_index(visible, index) else {
                println!("no such task number");
                return true;
            };
            let text = parts.collect::<Vec<_>>().join(" ");
            match ui::parse_task_form(&text, limit_arg) {
                Ok((text, limit)) => {
                    if let Err(e) = controller.edit_task(id, &text, limit).await {
                        println!("error: {e}");
                    }
                }
                Err(e) => println!("error: {e}"),
            }
        }
        "done" => {
            let Some(id) = resolve_index(visible, parts.next()) else {
                println!("no such task number");
                return true;
            };
            match controller.toggle_completed(id).await {
                Ok(true) => println!("done"),
                Ok(false) => println!("reopened"),
                Err(e) => println!("error: {e}"),
            }
        }
        "del" => {
            let Some(id) = resolve_index(visible, parts.next()) else {
                println!("no such task number");
                return true;
            };
            if let Err(e) = controller.delete_task(id).await {
                println!("error: {e}");
            }
        }
        "clear" => {
            if let Err(e) = controller.clear_completed().await {
                println!("error: {e}");
            }
        }
        "start" => {
            let Some(id) = resolve_index(visible, parts.next()) else {
                println!("no such task number");
                return true;
            };
            if let Err(e) = controller.start_timer(id).await {
                println!("error: {e}");
            }
        }
        "stop" => {
            let Some(id) = resolve_index(visible, parts.next()) else {
                println!("no such task number");
                return true;
            };
            match controller.stop_timer(id).await {
                Ok(true) => {}
                Ok(false) => println!("timer was not running"),
                Err(e) => println!("error: {e}"),
            }
        }
        "reset" => {
            let Some(id) = resolve_index(visible, parts.next()) else {
                println!("no such task number");
                return true;
            };
            match controller.reset_timer(id).await {
                Ok(remaining) => println!("rewound to {}", ui::format_countdown(remaining)),
                Err(e) => println!("error: {e}"),
            }
        }
        _ => println!("unknown command '{cmd}' — type 'help'"),
    }
    true
}

/// Maps a 1-based list index argument to the task id it currently names.
fn resolve_index(visible: &[Task], arg: Option<&str>) -> Option<TaskId> {
    let n: usize = arg?.parse().ok()?;
    visible.get(n.checked_sub(1)?).map(|t| t.id)
}

fn print_help() {
    println!("commands:");
    println!("  signup <email> <password>   create an account and sign in");
    println!("  signin <email> <password>   sign in");
    println!("  signout                     sign out (stops all countdowns)");
    println!("  add <seconds> <text>        add a task; 0 seconds = no timer");
    println!("  ls                          list tasks");
    println!("  done <n>                    toggle completion");
    println!("  edit <n> <seconds> <text>   rewrite a task");
    println!("  del <n>                     delete a task");
    println!("  clear                       delete all completed tasks");
    println!("  start <n>                   start a task's countdown");
    println!("  stop <n>                    pause a task's countdown");
    println!("  reset <n>                   rewind a countdown to its limit");
    println!("  quit                        exit");
}
