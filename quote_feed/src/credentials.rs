//! Хранение ключей API провайдеров.
//!
//! Один ключ на провайдера. Файловое хранилище переживает перезапуск
//! приложения, хранилище в памяти используется в тестах и при встраивании
//! конвейера в другое приложение.

use crate::config::{CREDENTIALS_FOLDER, DATA_FOLDER, PLACEHOLDER_API_KEY};
use commons::errors::FeedError;
use commons::utils::{get_workspace_root, mask_secret};
use log::info;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Хранилище ключей API.
pub trait CredentialStore: Send + Sync {
    /// Ключ провайдера или `None`, если он не сохранён.
    fn get(&self, provider: &str) -> Result<Option<String>, FeedError>;

    /// Сохранить (заменить) ключ провайдера.
    fn set(&self, provider: &str, key: &str) -> Result<(), FeedError>;

    /// Удалить ключ провайдера. Отсутствие ключа ошибкой не считается.
    fn clear(&self, provider: &str) -> Result<(), FeedError>;
}

/// Ключ одного провайдера, который источник читает из хранилища перед
/// каждым запросом.
///
/// Ключ, сохранённый командой `qboard key set` из другого процесса,
/// подхватывается работающим конвейером со следующего цикла.
#[derive(Clone)]
pub struct ApiKey {
    store: Arc<dyn CredentialStore>,
    provider: String,
}

impl ApiKey {
    pub fn new(store: Arc<dyn CredentialStore>, provider: &str) -> Self {
        Self {
            store,
            provider: provider.to_string(),
        }
    }

    /// Ключ в памяти: `None`, пустая строка и заглушка дают отсутствие ключа.
    pub fn fixed(provider: &str, key: Option<&str>) -> Self {
        let store = match key {
            Some(key) => MemoryCredentialStore::with_key(provider, key),
            None => MemoryCredentialStore::new(),
        };
        Self::new(Arc::new(store), provider)
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Текущий ключ.
    ///
    /// ## Returns
    ///
    /// `None`, если ключ не сохранён, пустой или совпадает с заглушкой из
    /// шаблона; ошибка хранилища передаётся как есть.
    pub fn current(&self) -> Result<Option<String>, FeedError> {
        let key = self.store.get(&self.provider)?;
        Ok(key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty() && k != PLACEHOLDER_API_KEY))
    }
}

/// Каталог ключей по умолчанию: `data/credentials` в корне workspace.
pub fn default_credentials_dir() -> PathBuf {
    get_workspace_root().join(DATA_FOLDER).join(CREDENTIALS_FOLDER)
}

fn validate_provider(provider: &str) -> Result<(), FeedError> {
    let valid = !provider.is_empty()
        && provider
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(FeedError::value_err(format!("некорректное имя провайдера: {provider:?}")))
    }
}

fn validate_key(key: &str) -> Result<&str, FeedError> {
    let key = key.trim();
    if key.is_empty() || key.chars().any(char::is_whitespace) {
        return Err(FeedError::value_err("ключ API не может быть пустым или содержать пробелы"));
    }
    Ok(key)
}

/// Ключи в файлах `<dir>/<provider>.key`.
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, provider: &str) -> Result<PathBuf, FeedError> {
        validate_provider(provider)?;
        Ok(self.dir.join(format!("{provider}.key")))
    }
}

impl Default for FileCredentialStore {
    fn default() -> Self {
        Self::new(default_credentials_dir())
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, provider: &str) -> Result<Option<String>, FeedError> {
        let path = self.path(provider)?;
        match fs::read_to_string(&path) {
            Ok(raw) => {
                let key = raw.trim();
                Ok((!key.is_empty()).then(|| key.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FeedError::io_err(format!(
                "не удалось прочитать ключ {}: {e}",
                path.display()
            ))),
        }
    }

    fn set(&self, provider: &str, key: &str) -> Result<(), FeedError> {
        let key = validate_key(key)?;
        let path = self.path(provider)?;

        fs::create_dir_all(&self.dir).map_err(|e| {
            FeedError::io_err(format!("не удалось создать каталог {}: {e}", self.dir.display()))
        })?;
        write_key_file(&path, key)
            .map_err(|e| FeedError::io_err(format!("не удалось записать {}: {e}", path.display())))?;

        info!("Ключ {provider} сохранён: {}", mask_secret(key));
        Ok(())
    }

    fn clear(&self, provider: &str) -> Result<(), FeedError> {
        let path = self.path(provider)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Ключ {provider} удалён");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FeedError::io_err(format!(
                "не удалось удалить {}: {e}",
                path.display()
            ))),
        }
    }
}

/// Записать ключ в файл, доступный только владельцу.
///
/// Новый файл создаётся сразу с правами 0600; у существующего права
/// сужаются до записи ключа.
fn write_key_file(path: &Path, key: &str) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    writeln!(file, "{key}")?;
    file.flush()
}

/// Ключи в памяти процесса.
#[derive(Default)]
pub struct MemoryCredentialStore {
    keys: Mutex<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Хранилище с одним ключом.
    pub fn with_key(provider: &str, key: &str) -> Self {
        let store = Self::new();
        if let Ok(mut keys) = store.keys.lock() {
            keys.insert(provider.to_string(), key.to_string());
        }
        store
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, provider: &str) -> Result<Option<String>, FeedError> {
        validate_provider(provider)?;
        Ok(self.keys.lock()?.get(provider).cloned())
    }

    fn set(&self, provider: &str, key: &str) -> Result<(), FeedError> {
        validate_provider(provider)?;
        let key = validate_key(key)?;
        self.keys.lock()?.insert(provider.to_string(), key.to_string());
        Ok(())
    }

    fn clear(&self, provider: &str) -> Result<(), FeedError> {
        validate_provider(provider)?;
        self.keys.lock()?.remove(provider);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commons::errors::FeedErrorKind;

    #[test]
    fn file_store_roundtrip_survives_new_instance() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("credentials"));

        assert_eq!(store.get("fmp").unwrap(), None);
        store.set("fmp", "  abc123  ").unwrap();
        assert_eq!(store.get("fmp").unwrap().as_deref(), Some("abc123"));

        let reopened = FileCredentialStore::new(dir.path().join("credentials"));
        assert_eq!(reopened.get("fmp").unwrap().as_deref(), Some("abc123"));

        reopened.clear("fmp").unwrap();
        assert_eq!(store.get("fmp").unwrap(), None);
        // Повторное удаление не ошибка.
        store.clear("fmp").unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn file_store_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        store.set("coingecko", "demo").unwrap();

        let mode = fs::metadata(dir.path().join("coingecko.key"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn file_store_narrows_existing_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fmp.key");
        fs::write(&path, "old\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let store = FileCredentialStore::new(dir.path());
        store.set("fmp", "new-key").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(fs::read_to_string(&path).unwrap(), "new-key\n");
    }

    #[test]
    fn api_key_reads_store_on_every_call() {
        let store = Arc::new(MemoryCredentialStore::new());
        let key = ApiKey::new(store.clone(), "fmp");
        assert_eq!(key.current().unwrap(), None);

        store.set("fmp", "fresh").unwrap();
        assert_eq!(key.current().unwrap().as_deref(), Some("fresh"));

        store.clear("fmp").unwrap();
        assert_eq!(key.current().unwrap(), None);
    }

    #[test]
    fn api_key_ignores_placeholder_and_blank() {
        assert_eq!(ApiKey::fixed("fmp", Some(PLACEHOLDER_API_KEY)).current().unwrap(), None);
        assert_eq!(ApiKey::fixed("fmp", Some("  ")).current().unwrap(), None);
        assert_eq!(ApiKey::fixed("fmp", None).current().unwrap(), None);
        assert_eq!(
            ApiKey::fixed("fmp", Some(" k1 ")).current().unwrap().as_deref(),
            Some("k1")
        );
    }

    #[test]
    fn provider_names_cannot_escape_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        for bad in ["", "../fmp", "a/b", "fmp key"] {
            let err = store.get(bad).unwrap_err();
            assert_eq!(err.kind(), FeedErrorKind::Value);
        }
    }

    #[test]
    fn blank_key_rejected() {
        let store = MemoryCredentialStore::new();
        assert!(store.set("fmp", "   ").is_err());
        assert!(store.set("fmp", "two words").is_err());
        assert_eq!(store.get("fmp").unwrap(), None);
    }

    #[test]
    fn memory_store_set_get_clear() {
        let store = MemoryCredentialStore::with_key("fmp", "k1");
        assert_eq!(store.get("fmp").unwrap().as_deref(), Some("k1"));
        store.set("fmp", "k2").unwrap();
        assert_eq!(store.get("fmp").unwrap().as_deref(), Some("k2"));
        store.clear("fmp").unwrap();
        assert_eq!(store.get("fmp").unwrap(), None);
    }
}
