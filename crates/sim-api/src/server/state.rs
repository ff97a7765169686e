#[derive(Clone)]
struct AppState {
    core: Arc<Mutex<ServiceCore>>,
    oracle: Arc<OracleClient>,
    events_tx: broadcast::Sender<WorldEvent>,
    broadcast_seq: Arc<AtomicU64>,
    autorun_running: Arc<AtomicBool>,
}

impl AppState {
    fn new(core: ServiceCore, oracle: OracleClient) -> Self {
        let (events_tx, _) = broadcast::channel(4096);
        Self {
            core: Arc::new(Mutex::new(core)),
            oracle: Arc::new(oracle),
            events_tx,
            broadcast_seq: Arc::new(AtomicU64::new(0)),
            autorun_running: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Push world events emitted since the last broadcast to every subscriber.
/// Called with the core lock held so the sequence window is consistent.
fn broadcast_new_events(state: &AppState, core: &ServiceCore) {
    let events = core.recent_events(usize::MAX);
    let since = state.broadcast_seq.load(Ordering::Acquire);
    let mut highest = since;
    for event in events {
        if event.seq <= since {
            continue;
        }
        highest = highest.max(event.seq);
        let _ = state.events_tx.send(event);
    }
    state.broadcast_seq.store(highest, Ordering::Release);
}

/// Autorun: issue a tick every `tick_interval` wall seconds at `time_scale`
/// simulated hours per tick, until stopped. The in-flight tick always
/// finishes; the flag is only checked between ticks.
fn spawn_autorun(state: AppState, time_scale: f64, tick_interval_secs: f64) {
    state.autorun_running.store(true, Ordering::Release);
    tokio::spawn(async move {
        loop {
            if !state.autorun_running.load(Ordering::Acquire) {
                break;
            }
            {
                let mut core = state.core.lock().await;
                if !state.autorun_running.load(Ordering::Acquire) {
                    break;
                }
                let report = core.tick(Some(time_scale));
                tracing::debug!(
                    tick = report.tick,
                    processed = report.agents_processed,
                    slipped = report.agents_slipped,
                    "autorun tick"
                );
                broadcast_new_events(&state, &core);
            }
            tokio::time::sleep(Duration::from_secs_f64(tick_interval_secs.max(0.01))).await;
        }
        tracing::info!("autorun stopped");
    });
}
