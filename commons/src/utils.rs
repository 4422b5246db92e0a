//! Универсальные утилиты.

use std::path::PathBuf;
use std::time::SystemTime;

/// Возвращает количество миллисекунд от начала эпохи UNIX, на основе
/// системного времени.
///
/// Если системные часы выставлены на время ранее 1 января 1970 года
/// 0:00:00 UTC, возвращает отрицательное значение.
pub fn now_millis() -> i64 {
    match SystemTime::now().duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

/// Скрыть секрет для вывода в лог: видны только последние 4 символа.
///
/// ## Пример
///
/// ```
/// use commons::utils::mask_secret;
///
/// assert_eq!(mask_secret("abcdef123456"), "********3456");
/// assert_eq!(mask_secret("abc"), "***");
/// ```
pub fn mask_secret(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 4 {
        return "*".repeat(count);
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("{}{}", "*".repeat(count - 4), tail)
}

/// Предоставить родительский каталог проекта.
///
/// Для `debug` это будет директория расположения `cargo.toml`, а для `release`
/// расположение скомпилированного файла.
#[cfg(debug_assertions)]
pub fn get_project_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

#[cfg(not(debug_assertions))]
pub fn get_project_root() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Предоставить корневую директорию всего проекта.
///
/// В зависимости от статуса проекта предоставляет путь к корневой директории
/// `workspace`, а для `release` к месту расположения скомпилированного файла,
/// что также является корневым путём.
pub fn get_workspace_root() -> PathBuf {
    let project_root = get_project_root();
    if cfg!(debug_assertions) {
        project_root
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or(project_root)
    } else {
        project_root
    }
}
