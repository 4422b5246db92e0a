//! Тестовые двойники источника и транспорта.

use crate::source::http::{HttpResponse, HttpTransport};
use crate::source::{QuoteSource, SourceKind};
use commons::errors::FeedError;
use commons::models::{Horizon, MarketSummary, PricePoint, QuoteRecord};
use crossbeam_channel::{Receiver, Sender, bounded};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use url::Url;

/// Транспорт с заранее заданными ответами по пути запроса.
///
/// Неизвестный путь отвечает 404. Все запросы запоминаются.
pub struct StaticTransport {
    routes: Vec<(String, Result<HttpResponse, FeedError>)>,
    requests: Mutex<Vec<(Url, Vec<(String, String)>)>>,
}

impl StaticTransport {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn route(mut self, path: &str, status: u16, body: &str) -> Self {
        self.routes
            .push((path.to_string(), Ok(HttpResponse::new(status, body))));
        self
    }

    pub fn fail(mut self, path: &str, err: FeedError) -> Self {
        self.routes.push((path.to_string(), Err(err)));
        self
    }

    pub fn requests(&self) -> Vec<(Url, Vec<(String, String)>)> {
        self.requests.lock().unwrap().clone()
    }
}

impl HttpTransport for StaticTransport {
    fn get(&self, url: &Url, headers: &[(&str, String)]) -> Result<HttpResponse, FeedError> {
        self.requests.lock().unwrap().push((
            url.clone(),
            headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        ));
        self.routes
            .iter()
            .find(|(path, _)| path == url.path())
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| Ok(HttpResponse::new(404, "")))
    }
}

/// Пульт управления заблокированным пакетным запросом.
pub struct Gate {
    /// Сигнал: пакетный запрос начался.
    pub entered: Receiver<()>,
    /// Отпустить один пакетный запрос.
    pub release: Sender<()>,
}

impl Gate {
    /// Дождаться начала пакетного запроса.
    pub fn wait_entered(&self) {
        self.entered
            .recv_timeout(Duration::from_secs(5))
            .expect("пакетный запрос не начался");
    }

    pub fn open(&self) {
        self.release.send(()).unwrap();
    }
}

/// Источник со сценарием ответов и счётчиками вызовов.
pub struct ScriptedSource {
    kind: SourceKind,
    batch: Mutex<Result<Vec<QuoteRecord>, FeedError>>,
    ones: Mutex<HashMap<String, Result<QuoteRecord, FeedError>>>,
    delays: HashMap<String, Duration>,
    history: HashMap<String, Vec<PricePoint>>,
    summary: Result<Option<MarketSummary>, FeedError>,
    derived: Vec<Horizon>,
    gate: Option<(Sender<()>, Receiver<()>)>,
    pub batch_calls: AtomicUsize,
    pub one_calls: AtomicUsize,
    pub history_calls: AtomicUsize,
    pub summary_calls: AtomicUsize,
    active_ones: AtomicUsize,
    /// Наибольшее число одновременных запасных запросов.
    pub max_parallel_ones: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            batch: Mutex::new(Ok(Vec::new())),
            ones: Mutex::new(HashMap::new()),
            delays: HashMap::new(),
            history: HashMap::new(),
            summary: Ok(None),
            derived: Vec::new(),
            gate: None,
            batch_calls: AtomicUsize::new(0),
            one_calls: AtomicUsize::new(0),
            history_calls: AtomicUsize::new(0),
            summary_calls: AtomicUsize::new(0),
            active_ones: AtomicUsize::new(0),
            max_parallel_ones: AtomicUsize::new(0),
        }
    }

    pub fn with_batch(self, records: Vec<QuoteRecord>) -> Self {
        self.set_batch(Ok(records));
        self
    }

    pub fn with_one(self, symbol: &str, result: Result<QuoteRecord, FeedError>) -> Self {
        self.ones.lock().unwrap().insert(symbol.to_string(), result);
        self
    }

    /// Запасной запрос символа отвечает с задержкой.
    pub fn with_slow_one(mut self, symbol: &str, result: Result<QuoteRecord, FeedError>, delay: Duration) -> Self {
        self.delays.insert(symbol.to_string(), delay);
        self.with_one(symbol, result)
    }

    pub fn with_history(mut self, symbol: &str, series: Vec<PricePoint>) -> Self {
        self.history.insert(symbol.to_string(), series);
        self
    }

    pub fn with_summary(mut self, summary: MarketSummary) -> Self {
        self.summary = Ok(Some(summary));
        self
    }

    pub fn with_summary_error(mut self, err: FeedError) -> Self {
        self.summary = Err(err);
        self
    }

    pub fn with_derived(mut self, list: &str) -> Self {
        self.derived = Horizon::parse_list(list).unwrap();
        self
    }

    /// Каждый пакетный запрос ждёт разрешения через [`Gate`].
    pub fn gated(mut self) -> (Self, Gate) {
        let (entered_tx, entered_rx) = bounded(16);
        let (release_tx, release_rx) = bounded(16);
        self.gate = Some((entered_tx, release_rx));
        (
            self,
            Gate {
                entered: entered_rx,
                release: release_tx,
            },
        )
    }

    /// Заменить ответ пакетного запроса для следующих циклов.
    pub fn set_batch(&self, result: Result<Vec<QuoteRecord>, FeedError>) {
        *self.batch.lock().unwrap() = result;
    }

    pub fn batches(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn ones(&self) -> usize {
        self.one_calls.load(Ordering::SeqCst)
    }

    pub fn histories(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }
}

impl QuoteSource for ScriptedSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn fetch_batch(&self, _symbols: &[String]) -> Result<Vec<QuoteRecord>, FeedError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((entered, release)) = &self.gate {
            let _ = entered.send(());
            let _ = release.recv_timeout(Duration::from_secs(5));
        }
        self.batch.lock().unwrap().clone()
    }

    fn fetch_one(&self, symbol: &str) -> Result<QuoteRecord, FeedError> {
        self.one_calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active_ones.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_parallel_ones.fetch_max(active, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(symbol) {
            thread::sleep(*delay);
        }
        self.active_ones.fetch_sub(1, Ordering::SeqCst);

        self.ones
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| Err(FeedError::not_found_err(symbol)))
    }

    fn fetch_history(&self, symbol: &str, _from: i64, _to: i64) -> Result<Vec<PricePoint>, FeedError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.history.get(symbol).cloned().unwrap_or_default())
    }

    fn fetch_summary(&self) -> Result<Option<MarketSummary>, FeedError> {
        self.summary_calls.fetch_add(1, Ordering::SeqCst);
        self.summary.clone()
    }

    fn derived_horizons(&self) -> Vec<Horizon> {
        self.derived.clone()
    }
}

/// Запись с ценой и рангом.
pub fn quote(symbol: &str, price: f64, rank: u32) -> QuoteRecord {
    let mut record = QuoteRecord::new(symbol);
    record.price = Some(price);
    record.rank = rank;
    record
}
