//! Обработка аргументов командной строки при запуске приложения.
//!
//! Пользователь может указать:
//! - вариант панели (криптовалюты или акции)
//! - файл со списком наблюдения
//! - интервал обновления и горизонты изменений
//! - управление ключами API провайдеров

use crate::config::ALLOW_INTERVAL_SECS;
use clap::{Args, Parser, Subcommand};
use commons::models::Horizon;
use log::error;
use quote_feed::SourceKind;
use quote_feed::config::{PipelineConfig, load_watchlist};
use std::path::PathBuf;
use std::process::exit;
use std::str::FromStr;
use std::time::Duration;

/// Перечисление ошибок при завершении приложения.
#[derive(Copy, Clone)]
#[repr(u8)]
pub enum ExitCode {
    /// Ошибка в настройках конвейера.
    InvalidConfig = 1,
    /// Ошибка работы с ключами API.
    Credentials,
    /// Срез не получен.
    NoData,
}

impl ExitCode {
    /// Предоставить цифровое значение выбранного перечисления (`u8`).
    pub fn value(&self) -> u8 {
        *self as u8
    }
}

#[derive(Debug, Parser)]
#[command(about = "Quote Board. Crypto and equity market dashboard in the terminal.")]
#[command(author, version, long_about = None)]
struct CliArgs {
    /// Write debug details to the log file.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Dashboard or key management.
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by both dashboards.
#[derive(Debug, Args)]
struct BoardArgs {
    /// Watchlist file: JSON array of items or one symbol per line.
    #[arg(short, long, value_name = "FILE")]
    watchlist: Option<PathBuf>,

    /// Refresh interval in seconds (default: crypto 60, equity 120).
    #[arg(short, long, value_parser = validate_interval)]
    interval: Option<u64>,

    /// Comma-separated change horizons, for example "24h,7d,30d".
    #[arg(long, value_parser = validate_horizons)]
    horizons: Option<HorizonList>,

    /// Disable timer-driven refresh (manual refresh only).
    #[arg(long)]
    no_auto: bool,

    /// Fetch once, print the table and exit.
    #[arg(long)]
    once: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Cryptocurrency dashboard (CoinGecko).
    Crypto(BoardArgs),
    /// Stock and index dashboard (Financial Modeling Prep).
    Equity(BoardArgs),
    /// Manage provider API keys.
    Key {
        #[command(subcommand)]
        action: KeyArgs,
    },
}

#[derive(Debug, Subcommand)]
enum KeyArgs {
    /// Store an API key for a dashboard provider.
    Set {
        /// Dashboard: crypto or equity.
        #[arg(value_parser = validate_kind)]
        kind: SourceKind,
        /// API key.
        key: String,
    },
    /// Show the stored key (masked).
    Show {
        /// Dashboard: crypto or equity.
        #[arg(value_parser = validate_kind)]
        kind: SourceKind,
    },
    /// Remove the stored key.
    Clear {
        /// Dashboard: crypto or equity.
        #[arg(value_parser = validate_kind)]
        kind: SourceKind,
    },
}

/// Список горизонтов из одного аргумента.
#[derive(Debug, Clone, PartialEq)]
struct HorizonList(Vec<Horizon>);

/// Валидатор для поля `interval`.
fn validate_interval(s: &str) -> Result<u64, String> {
    let secs: u64 = s
        .trim()
        .parse()
        .map_err(|_| format!("invalid interval: {s}"))?;
    if ALLOW_INTERVAL_SECS.contains(&secs) {
        Ok(secs)
    } else {
        Err(format!(
            "interval {} not in range {}..={} seconds",
            s,
            ALLOW_INTERVAL_SECS.start(),
            ALLOW_INTERVAL_SECS.end()
        ))
    }
}

/// Валидатор для поля `horizons`.
fn validate_horizons(s: &str) -> Result<HorizonList, String> {
    let list = Horizon::parse_list(s).map_err(|e| e.to_string())?;
    if list.is_empty() {
        return Err("at least one horizon is required".to_string());
    }
    Ok(HorizonList(list))
}

/// Валидатор варианта панели.
fn validate_kind(s: &str) -> Result<SourceKind, String> {
    SourceKind::from_str(s).map_err(|_| format!("unknown dashboard: {s} (crypto, equity)"))
}

/// Действие с ключом API.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyCommand {
    Set { kind: SourceKind, key: String },
    Show { kind: SourceKind },
    Clear { kind: SourceKind },
}

/// Настройки панели, полученные из командной строки.
#[derive(Debug, Clone)]
pub struct BoardSet {
    /// Проверенная конфигурация конвейера.
    pub config: PipelineConfig,
    /// Одиночный запуск без интерактивного режима.
    pub once: bool,
}

/// Режим работы приложения.
pub enum Mode {
    Board(BoardSet),
    Key(KeyCommand),
}

/// Результат разбора командной строки.
pub struct AppSet {
    pub mode: Mode,
    pub verbose: bool,
}

impl BoardSet {
    /// Собрать конфигурацию конвейера из аргументов.
    fn new(kind: SourceKind, args: &BoardArgs) -> Result<Self, String> {
        let mut config = PipelineConfig::for_kind(kind);

        if let Some(path) = &args.watchlist {
            let watchlist = load_watchlist(path).map_err(|e| e.to_string())?;
            config = config.with_watchlist(watchlist);
        }
        if let Some(secs) = args.interval {
            config = config.with_interval(Duration::from_secs(secs));
        }
        if let Some(HorizonList(list)) = &args.horizons {
            config = config.with_horizons(list.clone());
        }
        config.auto_refresh = !args.no_auto;

        config.validate().map_err(|e| e.to_string())?;
        Ok(Self {
            config,
            once: args.once,
        })
    }
}

impl AppSet {
    fn new(args: CliArgs) -> Result<Self, String> {
        let mode = match args.command {
            Commands::Crypto(board) => Mode::Board(BoardSet::new(SourceKind::Crypto, &board)?),
            Commands::Equity(board) => Mode::Board(BoardSet::new(SourceKind::Equity, &board)?),
            Commands::Key { action } => Mode::Key(match action {
                KeyArgs::Set { kind, key } => KeyCommand::Set { kind, key },
                KeyArgs::Show { kind } => KeyCommand::Show { kind },
                KeyArgs::Clear { kind } => KeyCommand::Clear { kind },
            }),
        };
        Ok(Self {
            mode,
            verbose: args.verbose,
        })
    }
}

/// Получить от пользователя настройки приложения.
///
/// ## Обработка ошибок
///
/// Если полученные данные некорректные (например, пустой список
/// наблюдения), приложение завершает работу с выводом сообщения об ошибке в
/// консоль и log-файл.
pub fn parse_cli_args() -> AppSet {
    let args = CliArgs::parse();
    AppSet::new(args).unwrap_or_else(|msg| exit_err(&msg, ExitCode::InvalidConfig))
}

/// Опубликовать сообщение об ошибке и завершить работу приложения.
pub fn exit_err(message: &str, code: ExitCode) -> ! {
    error!("Ошибка: {} (код {})", message, code.value());
    eprintln!("Ошибка: {}", message);
    exit(code.value() as i32);
}
