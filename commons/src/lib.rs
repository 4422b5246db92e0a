//! Общие типы и инструменты конвейера котировок: модели данных, ошибки,
//! форматирование, поиск по историческому ряду и логирование.

use crate::errors::FeedError;
use log::*;
use simplelog::{
    ColorChoice, CombinedLogger, Config, SharedLogger, TermLogger, TerminalMode, WriteLogger,
};
use std::fs;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

pub mod errors;
pub mod format;
pub mod history;
pub mod models;
pub mod traits;
pub mod utils;

/// Предоставить вектор символов из текстового файла: один символ на строку.
///
/// Пустые строки и строки, начинающиеся с `#`, пропускаются.
///
/// ## Пример
///
/// ```no_run
/// use commons::utils::get_workspace_root;
/// use commons::get_ticker_data;
///
/// let path_to_file = get_workspace_root().join("data").join("stocks.txt");
/// let data = get_ticker_data(&path_to_file).unwrap();
///
/// println!("Data: {:?}", data);
/// ```
///
/// ## Returns
///
/// Вектор при успешной подгрузке данных или `None`, если вектор получился
/// пустой. Ошибка [`FeedError::Io`], если файл не удалось прочитать.
pub fn get_ticker_data(path: &Path) -> Result<Option<Vec<String>>, FeedError> {
    let file = File::open(path)
        .map_err(|e| FeedError::io_err(format!("не удалось открыть {}: {e}", path.display())))?;

    let mut tickers = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let symbol = line.trim();
        if symbol.is_empty() || symbol.starts_with('#') {
            continue;
        }
        tickers.push(symbol.to_string());
    }

    if tickers.is_empty() {
        return Ok(None);
    }
    Ok(Some(tickers))
}

/// Фабрика по созданию индивидуальных логгеров для приложений.
///
/// Инициализация требуется один раз при запуске приложения. Далее используются
/// стандартные макросы [`log::info`], [`log::warn`], [`log::error`] для
/// логирования событий.
///
/// ## Args
///
/// - `app_name` — название приложения (будет использовано для создания файла)
/// - `log_dir` — путь к директории расположения log-файлов (при отсутствии
///   пытается создать)
/// - `level` — минимальный уровень записей в файл
/// - `terminal` — дублировать предупреждения и ошибки в `stderr`
///
/// ## Пример
///
/// ```no_run
/// use log::*;
/// use commons::init_simple_logger;
/// use commons::utils::get_workspace_root;
///
/// let log_dir = get_workspace_root().join("log");
/// init_simple_logger("qboard", log_dir, LevelFilter::Info, false);
///
/// info!("Конвейер запущен");
/// warn!("Провайдер ограничил частоту запросов");
/// ```
///
/// ## Паника
///
/// Паникует при ошибке создания (открытия) директории и (или) log-файла,
/// и при повторной инициализации логгера.
pub fn init_simple_logger(app_name: &str, log_dir: PathBuf, level: LevelFilter, terminal: bool) {
    let config = Config::default();
    let log_file_path = log_dir.join(format!("{}.log", app_name));

    if !log_dir.exists() {
        fs::create_dir_all(&log_dir)
            .unwrap_or_else(|_| panic!("Не удалось сформировать путь: {}", log_dir.display()));
    }

    let log_file = File::create(&log_file_path)
        .unwrap_or_else(|_| panic!("Ошибка работы с log-файлом: {}", log_file_path.display()));

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![WriteLogger::new(level, config.clone(), log_file)];
    if terminal {
        loggers.push(TermLogger::new(
            LevelFilter::Warn,
            config,
            TerminalMode::Stderr,
            ColorChoice::Auto,
        ));
    }

    CombinedLogger::init(loggers).unwrap_or_else(|e| panic!("Ошибка инициализации логгера: {e}"));
}
