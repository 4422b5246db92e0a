//! Планировщик циклов обновления.
//!
//! Цикл: `Idle → Fetching → Reconciling → Ready`, при ошибке пакетного
//! запроса `Failed → Idle`: подписчики получают `Failed`, после чего
//! состояние возвращается в `Idle` с сохранённой ошибкой. Одновременно выполняется не больше одного цикла:
//! триггер (таймер или ручной) во время цикла отбрасывается, а не ставится в
//! очередь. Внутри цикла сводка запрашивается параллельно с пакетом, запасные
//! запросы разветвляются по потокам и собираются до сведения. Догрузка
//! истории запускается после публикации среза и в цикл не входит.
//!
//! Состояние принадлежит планировщику и меняется только под его mutex.
//! Опубликованный [`Snapshot`] неизменяем: каждое обновление заменяет
//! `Arc` целиком.

use crate::config::{CRYPTO_REFRESH_SECS, HISTORY_PADDING_DAYS, PipelineConfig};
use crate::reconciler::{HistoryPatch, Reconciler};
use crate::source::QuoteSource;
use commons::errors::FeedError;
use commons::history::derive_changes;
use commons::models::{DAY_MS, MarketSummary, QuoteRecord, Snapshot};
use commons::utils::now_millis;
use crossbeam_channel::{Receiver, Sender, bounded, select, tick, unbounded};
use log::{debug, error, info, warn};
use macros::QuoteEnumDisplay;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Стадия цикла обновления.
#[derive(Debug, Clone, Copy, PartialEq, Eq, QuoteEnumDisplay)]
pub enum RefreshStatus {
    #[str("idle")]
    Idle,
    #[str("fetching")]
    Fetching,
    #[str("reconciling")]
    Reconciling,
    #[str("ready")]
    Ready,
    #[str("failed")]
    Failed,
}

impl RefreshStatus {
    /// Цикл в работе.
    pub fn is_busy(&self) -> bool {
        matches!(self, RefreshStatus::Fetching | RefreshStatus::Reconciling)
    }
}

/// Наблюдаемое состояние конвейера.
#[derive(Debug, Clone)]
pub struct RefreshState {
    pub status: RefreshStatus,
    /// Последний опубликованный срез.
    pub last_snapshot: Option<Arc<Snapshot>>,
    /// Ошибка последнего цикла; сбрасывается успешным циклом.
    pub last_error: Option<FeedError>,
    /// Время начала последнего цикла, мс.
    pub last_attempt_at: Option<i64>,
    /// Время последней публикации, мс.
    pub last_success_at: Option<i64>,
    pub auto_refresh: bool,
    /// Номер текущего (последнего) цикла.
    pub cycle: u64,
}

impl Default for RefreshState {
    fn default() -> Self {
        Self {
            status: RefreshStatus::Idle,
            last_snapshot: None,
            last_error: None,
            last_attempt_at: None,
            last_success_at: None,
            auto_refresh: true,
            cycle: 0,
        }
    }
}

/// Параметры планировщика.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerOptions {
    /// Интервал таймера.
    pub interval: Duration,
    /// Запускать циклы по таймеру.
    pub auto_refresh: bool,
    /// Запустить цикл сразу после старта.
    pub fetch_on_start: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(CRYPTO_REFRESH_SECS),
            auto_refresh: true,
            fetch_on_start: true,
        }
    }
}

/// Состояние под mutex: наблюдаемая часть и последняя сводка.
struct Guarded {
    state: RefreshState,
    summary: Option<MarketSummary>,
    /// Цикл, которым опубликован `state.last_snapshot`.
    published_cycle: u64,
}

struct Inner {
    source: Arc<dyn QuoteSource>,
    reconciler: Reconciler,
    guarded: Mutex<Guarded>,
    in_flight: AtomicBool,
    auto: AtomicBool,
    shut_down: AtomicBool,
    subscribers: Mutex<Vec<Sender<RefreshState>>>,
}

/// Снимает флаг цикла при любом выходе, в том числе при панике.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Планировщик обновлений одного конвейера.
///
/// ## Пример
///
/// ```no_run
/// use std::sync::Arc;
/// use quote_feed::config::PipelineConfig;
/// use quote_feed::credentials::FileCredentialStore;
/// use quote_feed::scheduler::RefreshScheduler;
/// use quote_feed::source::build_source;
/// use quote_feed::source::http::ReqwestTransport;
///
/// let config = PipelineConfig::crypto();
/// let transport = Arc::new(ReqwestTransport::new().unwrap());
/// let credentials = Arc::new(FileCredentialStore::default());
/// let source = build_source(&config, credentials, transport).unwrap();
/// let scheduler = RefreshScheduler::from_config(&config, source);
///
/// let updates = scheduler.subscribe();
/// while let Ok(state) = updates.recv() {
///     println!("{}: {:?}", state.status, state.last_snapshot.map(|s| s.len()));
/// }
/// ```
pub struct RefreshScheduler {
    inner: Arc<Inner>,
    stop: Mutex<Option<Sender<()>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshScheduler {
    /// Запустить планировщик: поток таймера и, если задано, первый цикл.
    pub fn start(source: Arc<dyn QuoteSource>, reconciler: Reconciler, options: SchedulerOptions) -> Self {
        let state = RefreshState {
            auto_refresh: options.auto_refresh,
            ..RefreshState::default()
        };
        let inner = Arc::new(Inner {
            source,
            reconciler,
            guarded: Mutex::new(Guarded {
                state,
                summary: None,
                published_cycle: 0,
            }),
            in_flight: AtomicBool::new(false),
            auto: AtomicBool::new(options.auto_refresh),
            shut_down: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
        });

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let driver = spawn_driver(Arc::clone(&inner), options.interval, stop_rx);
        info!(
            "Планировщик {} запущен: интервал {:?}, автообновление {}",
            inner.source.kind(),
            options.interval,
            options.auto_refresh
        );

        if options.fetch_on_start {
            inner.trigger("старт");
        }

        Self {
            inner,
            stop: Mutex::new(Some(stop_tx)),
            driver: Mutex::new(Some(driver)),
        }
    }

    /// Планировщик для конфигурации и готового источника.
    pub fn from_config(config: &PipelineConfig, source: Arc<dyn QuoteSource>) -> Self {
        let reconciler = Reconciler::from_config(config, source.derived_horizons());
        Self::start(source, reconciler, config.scheduler_options())
    }

    /// Ручной запуск цикла. Таймер не сбрасывается.
    ///
    /// ## Returns
    ///
    /// `true`, если цикл запущен; `false`, если цикл уже идёт или планировщик
    /// остановлен.
    pub fn refresh_now(&self) -> bool {
        self.inner.trigger("вручную")
    }

    /// Включить или выключить запуск по таймеру.
    pub fn set_auto(&self, enabled: bool) {
        self.inner.auto.store(enabled, Ordering::SeqCst);
        info!("Автообновление: {}", if enabled { "вкл" } else { "выкл" });
        self.inner.update(|state| state.auto_refresh = enabled);
    }

    /// Подписка на изменения состояния.
    ///
    /// Подписчик получает копию [`RefreshState`] при каждом переходе и каждой
    /// публикации среза. Отключившиеся подписчики удаляются.
    pub fn subscribe(&self) -> Receiver<RefreshState> {
        let (tx, rx) = unbounded();
        match self.inner.subscribers.lock() {
            Ok(mut subscribers) => subscribers.push(tx),
            Err(e) => error!("Подписка не оформлена: {e}"),
        }
        rx
    }

    /// Копия текущего состояния.
    pub fn state(&self) -> RefreshState {
        self.inner
            .lock()
            .map(|g| g.state.clone())
            .unwrap_or_default()
    }

    /// Последний опубликованный срез.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.inner
            .lock()
            .ok()
            .and_then(|g| g.state.last_snapshot.clone())
    }

    /// Остановить таймер. Результаты запросов, пришедшие после остановки,
    /// отбрасываются. Повторный вызов ничего не делает.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut stop) = self.stop.lock() {
            stop.take();
        }
        let driver = self.driver.lock().ok().and_then(|mut d| d.take());
        if let Some(handle) = driver
            && handle.join().is_err()
        {
            error!("Поток таймера завершился с паникой");
        }
        info!("Планировщик {} остановлен", self.inner.source.kind());
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Поток таймера: тики и сигнал остановки.
fn spawn_driver(inner: Arc<Inner>, interval: Duration, stop: Receiver<()>) -> JoinHandle<()> {
    thread::spawn(move || {
        let ticker = tick(interval);
        loop {
            select! {
                recv(ticker) -> _ => {
                    if inner.auto.load(Ordering::SeqCst) {
                        inner.trigger("таймер");
                    }
                }
                recv(stop) -> _ => break,
            }
        }
        debug!("Поток таймера завершён");
    })
}

impl Inner {
    fn lock(&self) -> Result<MutexGuard<'_, Guarded>, FeedError> {
        Ok(self.guarded.lock()?)
    }

    /// Единая точка входа для таймера и ручного запуска.
    fn trigger(self: &Arc<Self>, origin: &str) -> bool {
        if self.shut_down.load(Ordering::SeqCst) {
            return false;
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Запуск ({origin}) отброшен: цикл уже идёт");
            return false;
        }

        let inner = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("refresh-cycle".to_string())
            .spawn(move || {
                let _flight = FlightGuard(&inner.in_flight);
                inner.run_cycle();
            });
        match spawned {
            Ok(_) => {
                debug!("Цикл запущен ({origin})");
                true
            }
            Err(e) => {
                error!("Не удалось запустить поток цикла: {e}");
                self.in_flight.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Изменить состояние и разослать его подписчикам.
    fn update(&self, change: impl FnOnce(&mut RefreshState)) {
        match self.lock() {
            Ok(mut guarded) => {
                change(&mut guarded.state);
                self.notify(&guarded.state);
            }
            Err(e) => error!("Состояние планировщика недоступно: {e}"),
        }
    }

    fn notify(&self, state: &RefreshState) {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            warn!("Рассылка состояния: ошибка блокировки подписчиков");
            return;
        };
        subscribers.retain(|tx| tx.send(state.clone()).is_ok());
    }

    fn run_cycle(self: &Arc<Self>) {
        self.update(|state| {
            state.status = RefreshStatus::Fetching;
            state.cycle += 1;
            state.last_attempt_at = Some(now_millis());
        });
        let symbols = self.reconciler.symbols();

        let published = thread::scope(|scope| {
            scope.spawn(|| self.refresh_summary());

            let batch = match self.source.fetch_batch(&symbols) {
                Ok(batch) => batch,
                Err(err) => {
                    self.fail(err);
                    return None;
                }
            };
            if self.is_shut_down() {
                return None;
            }

            self.update(|state| state.status = RefreshStatus::Reconciling);
            let gaps = self.reconciler.gaps(&batch);
            let fallbacks = self.fetch_fallbacks(&gaps);
            self.publish(batch, &fallbacks)
        });

        if let Some((cycle, snapshot)) = published {
            self.spawn_history(cycle, snapshot);
        }
    }

    fn fail(&self, err: FeedError) {
        if self.is_shut_down() {
            return;
        }
        warn!("Цикл обновления завершился ошибкой: {err}");
        self.update(|state| {
            state.status = RefreshStatus::Failed;
            state.last_error = Some(err);
        });
        // Следующий тик повторяет цикл из Idle.
        self.update(|state| state.status = RefreshStatus::Idle);
    }

    /// Запасные запросы для пропущенных символов, параллельно.
    fn fetch_fallbacks(&self, gaps: &[String]) -> HashMap<String, Result<QuoteRecord, FeedError>> {
        if gaps.is_empty() {
            return HashMap::new();
        }
        debug!("Запасные запросы: {}", gaps.join(","));

        thread::scope(|scope| {
            let handles: Vec<_> = gaps
                .iter()
                .map(|symbol| (symbol, scope.spawn(move || self.source.fetch_one(symbol))))
                .collect();
            handles
                .into_iter()
                .map(|(symbol, handle)| {
                    let result = handle.join().unwrap_or_else(|_| {
                        Err(FeedError::network_err(format!("запрос {symbol} прерван паникой")))
                    });
                    (symbol.clone(), result)
                })
                .collect()
        })
    }

    /// Свести и опубликовать срез.
    ///
    /// ## Returns
    ///
    /// Номер цикла и опубликованный срез.
    fn publish(
        &self,
        batch: Vec<QuoteRecord>,
        fallbacks: &HashMap<String, Result<QuoteRecord, FeedError>>,
    ) -> Option<(u64, Arc<Snapshot>)> {
        let mut guarded = match self.lock() {
            Ok(g) => g,
            Err(e) => {
                error!("Публикация невозможна: {e}");
                return None;
            }
        };
        if self.is_shut_down() {
            return None;
        }

        let prior = guarded.state.last_snapshot.clone();
        let mut snapshot = self
            .reconciler
            .reconcile(batch, fallbacks, prior.as_deref(), now_millis());
        if guarded.summary.is_some() {
            snapshot.summary = guarded.summary.clone();
        }

        let snapshot = Arc::new(snapshot);
        info!(
            "Срез опубликован: {} строк из {}",
            snapshot.len(),
            self.reconciler.symbols().len()
        );

        let state = &mut guarded.state;
        state.last_snapshot = Some(Arc::clone(&snapshot));
        state.status = RefreshStatus::Ready;
        state.last_error = None;
        state.last_success_at = Some(snapshot.captured_at);
        let cycle = state.cycle;
        self.notify(state);
        guarded.published_cycle = cycle;
        Some((cycle, snapshot))
    }

    /// Запросить сводку и вставить её в последний срез.
    fn refresh_summary(&self) {
        let summary = match self.source.fetch_summary() {
            Ok(Some(summary)) => summary,
            Ok(None) => return,
            Err(err) => {
                warn!("Сводка не получена: {err}");
                return;
            }
        };
        if self.is_shut_down() {
            return;
        }

        let Ok(mut guarded) = self.lock() else {
            return;
        };
        guarded.summary = Some(summary.clone());
        if let Some(latest) = guarded.state.last_snapshot.clone() {
            guarded.state.last_snapshot = Some(Arc::new(latest.with_summary(Some(summary))));
            self.notify(&guarded.state);
        }
    }

    /// Догрузить историю и вычислить изменения по производным горизонтам.
    ///
    /// Изменения считаются от цен среза цикла `cycle` и применяются, только
    /// пока этот срез остаётся последним опубликованным.
    fn spawn_history(self: &Arc<Self>, cycle: u64, snapshot: Arc<Snapshot>) {
        let derived = self.reconciler.derived().to_vec();
        if derived.is_empty() || snapshot.is_empty() {
            return;
        }
        let Some(max_span) = derived.iter().map(|h| h.span_ms()).max() else {
            return;
        };

        let inner = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("history-patch".to_string())
            .spawn(move || {
                let now = now_millis();
                let from = now
                    .saturating_sub(max_span)
                    .saturating_sub(HISTORY_PADDING_DAYS * DAY_MS);

                let patches: Vec<HistoryPatch> = thread::scope(|scope| {
                    let handles: Vec<_> = snapshot
                        .records
                        .iter()
                        .map(|record| {
                            let inner = &inner;
                            scope.spawn(move || inner.source.fetch_history(&record.symbol, from, now))
                        })
                        .collect();

                    snapshot
                        .records
                        .iter()
                        .zip(handles)
                        .filter_map(|(record, handle)| match handle.join() {
                            Ok(Ok(series)) => Some(HistoryPatch {
                                symbol: record.symbol.clone(),
                                changes: derive_changes(record.price, &series, now, &derived),
                            }),
                            Ok(Err(err)) => {
                                warn!("История {} не получена: {err}", record.symbol);
                                None
                            }
                            Err(_) => {
                                error!("Запрос истории {} прерван паникой", record.symbol);
                                None
                            }
                        })
                        .collect()
                });

                inner.apply_history(cycle, &patches);
            });
        if let Err(e) = spawned {
            error!("Не удалось запустить догрузку истории: {e}");
        }
    }

    fn apply_history(&self, cycle: u64, patches: &[HistoryPatch]) {
        if patches.is_empty() || self.is_shut_down() {
            return;
        }
        let Ok(mut guarded) = self.lock() else {
            return;
        };
        if guarded.published_cycle != cycle {
            debug!(
                "История цикла {cycle} отброшена: опубликован срез цикла {}",
                guarded.published_cycle
            );
            return;
        }
        let Some(latest) = guarded.state.last_snapshot.clone() else {
            return;
        };
        let patched = Reconciler::patch_changes(&latest, patches);
        debug!("История применена к {} символам", patches.len());
        guarded.state.last_snapshot = Some(Arc::new(patched));
        self.notify(&guarded.state);
    }
}
