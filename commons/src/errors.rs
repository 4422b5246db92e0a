//! Собственные типы ошибок конвейера котировок.
//!
//! Для поддержки функциональности применяется крейт `thiserror`. Все сбои
//! загрузки данных приводятся к одному из вариантов [`FeedError`] на границе
//! источника котировок, поэтому остальной код никогда не видит «сырых»
//! транспортных ошибок.

use macros::QuoteEnumDisplay;
use std::sync::PoisonError;
use thiserror::Error;

/// Дерево ошибок приложений Quote Feed.
///
/// Все варианты хранят только строки, поэтому ошибку можно клонировать
/// и сохранять в состоянии планировщика.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeedError {
    /// Сетевая ошибка: нет соединения, истёк таймаут, ответ не разобран.
    ///
    /// Повторяется только на следующем тике таймера.
    #[error("сетевая ошибка: {0}")]
    Network(String),

    /// Провайдер ограничил частоту запросов (HTTP 429).
    #[error("превышен лимит запросов: {0}")]
    Transient(String),

    /// Ключ API отсутствует или отклонён провайдером.
    #[error("ошибка авторизации: {0}")]
    Auth(String),

    /// Запрошенный символ не найден у провайдера.
    #[error("не найдено: {0}")]
    NotFound(String),

    /// Некорректное значение.
    ///
    /// Например, горизонт изменения `"7x"` вместо `"7d"`.
    #[error("неверное значение: {0}")]
    ValueError(String),

    /// Ошибка блокировки mutex.
    #[error("ошибка блокировки: {0}")]
    LockError(String),

    /// Ошибка работы с файлами (ключи API, списки наблюдения).
    #[error("ошибка ввода-вывода: {0}")]
    Io(String),
}

/// Вид ошибки без сопровождающего сообщения.
///
/// Используется слоем отображения, чтобы выбрать текст для пользователя.
#[derive(Debug, Clone, Copy, PartialEq, Eq, QuoteEnumDisplay)]
pub enum FeedErrorKind {
    #[str("network")]
    Network,
    #[str("transient")]
    Transient,
    #[str("auth")]
    Auth,
    #[str("not_found")]
    NotFound,
    #[str("value")]
    Value,
    #[str("lock")]
    Lock,
    #[str("io")]
    Io,
}

impl<T> From<PoisonError<T>> for FeedError {
    fn from(err: PoisonError<T>) -> Self {
        FeedError::LockError(err.to_string())
    }
}

impl From<std::io::Error> for FeedError {
    fn from(err: std::io::Error) -> Self {
        FeedError::Io(err.to_string())
    }
}

impl FeedError {
    /// Конструктор для ошибки [`FeedError::Network`].
    pub fn network_err(message: impl Into<String>) -> FeedError {
        Self::Network(message.into())
    }

    /// Конструктор для ошибки [`FeedError::Transient`].
    pub fn transient_err(message: impl Into<String>) -> FeedError {
        Self::Transient(message.into())
    }

    /// Конструктор для ошибки [`FeedError::Auth`].
    pub fn auth_err(message: impl Into<String>) -> FeedError {
        Self::Auth(message.into())
    }

    /// Конструктор для ошибки [`FeedError::NotFound`].
    pub fn not_found_err(message: impl Into<String>) -> FeedError {
        Self::NotFound(message.into())
    }

    /// Конструктор для ошибки [`FeedError::ValueError`].
    pub fn value_err(message: impl Into<String>) -> FeedError {
        Self::ValueError(message.into())
    }

    /// Конструктор для ошибки [`FeedError::Io`].
    pub fn io_err(message: impl Into<String>) -> FeedError {
        Self::Io(message.into())
    }

    /// Вид ошибки.
    pub fn kind(&self) -> FeedErrorKind {
        match self {
            FeedError::Network(_) => FeedErrorKind::Network,
            FeedError::Transient(_) => FeedErrorKind::Transient,
            FeedError::Auth(_) => FeedErrorKind::Auth,
            FeedError::NotFound(_) => FeedErrorKind::NotFound,
            FeedError::ValueError(_) => FeedErrorKind::Value,
            FeedError::LockError(_) => FeedErrorKind::Lock,
            FeedError::Io(_) => FeedErrorKind::Io,
        }
    }
}
