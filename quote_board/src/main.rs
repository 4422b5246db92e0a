//! Quote Board. Терминальная панель котировок: криптовалюты (CoinGecko)
//! и акции с индексами (Financial Modeling Prep).
//!
//! Управление в интерактивном режиме: `r` + Enter — обновить сейчас,
//! `a` + Enter — переключить автообновление, `q` + Enter или CTRL-C — выход.

#![warn(missing_docs)]

use crossbeam_channel::{Receiver, Sender, select, unbounded};
use log::{LevelFilter, error, info, warn};
use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

mod cli;
mod config;
mod render;

use cli::{BoardSet, ExitCode, KeyCommand, Mode, exit_err, parse_cli_args};
use commons::init_simple_logger;
use commons::traits::WriteExt;
use commons::utils::{get_workspace_root, mask_secret};
use config::{LOG_FOLDER, ONCE_TIMEOUT_SECS};
use quote_feed::credentials::{CredentialStore, FileCredentialStore};
use quote_feed::source::build_source;
use quote_feed::source::http::ReqwestTransport;
use quote_feed::{RefreshScheduler, RefreshState, RefreshStatus};
use render::{error_hint, render_board};

/// Команды пользователя интерактивной панели.
enum UserCommand {
    Refresh,
    ToggleAuto,
    Quit,
}

fn main() {
    let app = parse_cli_args();
    let terminal = !matches!(&app.mode, Mode::Board(set) if !set.once);
    init_logger(app.verbose, terminal);

    match app.mode {
        Mode::Key(command) => run_key(command),
        Mode::Board(set) => run_board(set),
    }
}

/// Инициализировать логгер приложения.
///
/// Используется метод [`init_simple_logger`] из крейта [`commons`].
fn init_logger(verbose: bool, terminal: bool) {
    let log_folder = get_workspace_root().join(LOG_FOLDER);
    let app_name = env!("CARGO_PKG_NAME");
    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    init_simple_logger(app_name, log_folder, level, terminal);
}

/// Управление ключами API.
fn run_key(command: KeyCommand) {
    let store = FileCredentialStore::default();
    let result = match &command {
        KeyCommand::Set { kind, key } => store.set(kind.provider(), key).map(|_| {
            println!("Ключ {} сохранён: {}", kind.provider(), mask_secret(key.trim()));
        }),
        KeyCommand::Show { kind } => store.get(kind.provider()).map(|key| match key {
            Some(key) => println!("{}: {}", kind.provider(), mask_secret(&key)),
            None => println!("{}: ключ не задан", kind.provider()),
        }),
        KeyCommand::Clear { kind } => store.clear(kind.provider()).map(|_| {
            println!("Ключ {} удалён", kind.provider());
        }),
    };

    if let Err(err) = result {
        exit_err(&err.to_string(), ExitCode::Credentials);
    }
}

/// Запустить панель.
fn run_board(set: BoardSet) {
    let mut config = set.config;
    // Первый цикл запускается после подписки, чтобы не потерять переходы.
    config.fetch_on_start = false;
    if set.once {
        config.auto_refresh = false;
    }
    let kind = config.kind;
    let horizons = config.horizons.clone();

    let transport = ReqwestTransport::new()
        .unwrap_or_else(|e| exit_err(&e.to_string(), ExitCode::InvalidConfig));
    let credentials = Arc::new(FileCredentialStore::default());
    let source = build_source(&config, credentials, Arc::new(transport))
        .unwrap_or_else(|e| exit_err(&e.to_string(), ExitCode::Credentials));

    let scheduler = RefreshScheduler::from_config(&config, source);
    let updates = scheduler.subscribe();
    scheduler.refresh_now();
    info!("Quote Board запущен: {kind}, символов {}", config.watchlist.len());

    if set.once {
        let code = run_once(&updates, kind, &horizons);
        scheduler.shutdown();
        if let Some(code) = code {
            exit_err("срез не получен", code);
        }
        return;
    }

    let commands = spawn_input();
    let mut stdout = io::stdout();
    loop {
        select! {
            recv(updates) -> state => {
                let Ok(state) = state else { break };
                stdout.write_str("\x1b[2J\x1b[H");
                stdout.write_line(render_board(&state, kind, &horizons));
                stdout.flush_ext();
            }
            recv(commands) -> command => match command {
                Ok(UserCommand::Refresh) => {
                    if !scheduler.refresh_now() {
                        info!("Обновление уже идёт");
                    }
                }
                Ok(UserCommand::ToggleAuto) => {
                    let enabled = !scheduler.state().auto_refresh;
                    scheduler.set_auto(enabled);
                }
                Ok(UserCommand::Quit) | Err(_) => break,
            },
        }
    }

    scheduler.shutdown();
    info!("Quote Board завершил работу");
}

/// Дождаться первого среза, напечатать его и выйти.
fn run_once(
    updates: &Receiver<RefreshState>,
    kind: quote_feed::SourceKind,
    horizons: &[commons::models::Horizon],
) -> Option<ExitCode> {
    let timeout = Duration::from_secs(ONCE_TIMEOUT_SECS);
    loop {
        match updates.recv_timeout(timeout) {
            Ok(state) if state.status == RefreshStatus::Ready => {
                println!("{}", render_board(&state, kind, horizons));
                return None;
            }
            Ok(state) if state.status == RefreshStatus::Failed => {
                if let Some(err) = &state.last_error {
                    eprintln!("{}", error_hint(err));
                }
                return Some(ExitCode::NoData);
            }
            Ok(_) => continue,
            Err(_) => {
                warn!("Срез не получен за {ONCE_TIMEOUT_SECS} с");
                return Some(ExitCode::NoData);
            }
        }
    }
}

/// Поток чтения команд со `stdin` и обработчик CTRL-C.
fn spawn_input() -> Receiver<UserCommand> {
    let (tx, rx) = unbounded();

    let ctrlc_tx = tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(UserCommand::Quit);
    }) {
        error!("Обработчик CTRL-C не установлен: {e}");
    }

    thread::spawn(move || read_commands(tx));
    rx
}

fn read_commands(tx: Sender<UserCommand>) {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let command = match line.trim().to_lowercase().as_str() {
            "r" | "refresh" => UserCommand::Refresh,
            "a" | "auto" => UserCommand::ToggleAuto,
            "q" | "quit" | "exit" => UserCommand::Quit,
            "" => continue,
            other => {
                warn!("Неизвестная команда: {other}");
                continue;
            }
        };
        if tx.send(command).is_err() {
            break;
        }
    }
}
