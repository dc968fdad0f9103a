use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use audio_synchronization::WakeCounter;

use super::{HostInner, HostState};
use crate::error::Result;
use crate::graph::{Cycle, GraphClient, Processor};
use crate::ports::PortLayout;

/// Ticks every `period` callbacks.  This is all the liveness check does on the audio thread.
struct Tick {
    ticks: Arc<WakeCounter>,
    period: u64,
    calls: u64,
}

impl Processor for Tick {
    fn process(&mut self, _cycle: &mut Cycle<'_>) {
        self.calls += 1;
        if self.calls % self.period == 0 {
            self.ticks.increment();
        }
    }
}

/// Re-checks the host whenever the graph has run a few cycles, and restarts it if it has gone.
///
/// If the graph stops running altogether there are no ticks, so the watchdog also checks once per ready ceiling on its
/// own.
pub(super) struct LivenessWatchdog {
    stop: Arc<AtomicBool>,
    ticks: Arc<WakeCounter>,
    client: Box<dyn GraphClient>,
    thread: Option<JoinHandle<()>>,
}

impl LivenessWatchdog {
    pub(super) fn start(inner: Arc<HostInner>) -> Result<Self> {
        let ticks = Arc::new(WakeCounter::new());
        let stop = Arc::new(AtomicBool::new(false));

        let backend = inner.server.lock().unwrap().backend();
        let mut client = backend.open(&inner.liveness_client_name)?;
        client.register_ports(&PortLayout::default())?;
        client.activate(
            Box::new(Tick {
                ticks: ticks.clone(),
                period: u64::from(inner.config.liveness_period_cycles.max(1)),
                calls: 0,
            }),
            Box::new(|_: &str, _: bool| {}),
        )?;

        let thread_ticks = ticks.clone();
        let thread_stop = stop.clone();
        let thread = std::thread::Builder::new()
            .name("plugin host watchdog".to_string())
            .spawn(move || watch(&inner, &thread_ticks, &thread_stop))?;

        Ok(Self {
            stop,
            ticks,
            client,
            thread: Some(thread),
        })
    }

    pub(super) fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.ticks.increment();

        if let Some(t) = self.thread.take() {
            if t.join().is_err() {
                log::error!("The plugin host watchdog panicked");
            }
        }
        if let Err(e) = self.client.deactivate() {
            log::warn!("Could not deactivate the liveness client: {e}");
        }
    }
}

impl Drop for LivenessWatchdog {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.shutdown();
        }
    }
}

fn watch(inner: &HostInner, ticks: &WakeCounter, stop: &AtomicBool) {
    let mut seen = ticks.get();

    while !stop.load(Ordering::Acquire) {
        if let Some(v) = ticks.wait_timeout(seen, inner.config.ready_ceiling) {
            seen = v;
        }
        if stop.load(Ordering::Acquire) {
            break;
        }

        if inner.state() != HostState::Ready || inner.exists() {
            continue;
        }

        log::warn!("The plugin host disappeared while ready; restarting it");
        inner.error.store(true, Ordering::Release);
        inner.set_state(HostState::Failed);
        inner.set_state(HostState::Restarting);

        let killed = inner.process.lock().unwrap().kill();
        if let Err(e) = killed.and_then(|_| inner.bring_up()) {
            log::error!("Could not restart the plugin host: {e}");
            inner.set_state(HostState::Failed);
        }
    }
}
