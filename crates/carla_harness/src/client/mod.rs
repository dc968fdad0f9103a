//! Realtime graph clients: the ready barrier, waiting, and teardown shared by capture and playback.
//!
//! # The ready barrier
//!
//! Clients are started one after another from the control thread, and the engine runs their callbacks in whatever
//! order it likes.  Yet a recorder and a player started together must begin on the same cycle, or the recording is
//! shifted.  Each client therefore latches the cycle index of its first callback after it is fully connected, and
//! counts as ready only on later cycles.  A client whose condition waits on its peers then starts on the first cycle
//! in which every one of them has latched strictly earlier, which is the same cycle for all of them however the engine
//! orders the callbacks within a cycle.
//!
//! Nothing else is shared between the control thread and the callback: the control thread looks at a client's data
//! only after it has seen the completion signal or deactivated the client.
mod capture;
mod playback;

pub use capture::*;
pub use playback::*;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use audio_synchronization::{CompletionSignal, CycleLatch};

use crate::error::{Error, Result};
use crate::graph::{Cycle, GraphBackend, GraphClient, GraphWatcher, Processor};
use crate::ports::{client_of, PortLayout};

/// State shared between the control side of a client and its callback.
#[derive(Debug, Default)]
pub(crate) struct ClientShared {
    latch: CycleLatch,
    completion: CompletionSignal,
    error: AtomicBool,

    /// Set by the control thread once ports are connected.  The callback latches on the first cycle it sees this.
    armed: AtomicBool,

    /// Most recent cycle index seen by the callback.
    last_cycle: AtomicU64,
}

impl ClientShared {
    pub(crate) fn complete(&self) {
        self.completion.set();
    }
}

/// A cloneable view of one client's readiness, for use in other clients' conditions.
#[derive(Clone, Debug)]
pub struct ReadyHandle {
    shared: Arc<ClientShared>,
}

impl ReadyHandle {
    /// Whether the client counts as ready during cycle `cycle`.
    pub fn is_ready_at(&self, cycle: u64) -> bool {
        self.shared.latch.is_ready_at(cycle)
    }

    /// The cycle in which the client latched, if it has.
    pub fn latched_at(&self) -> Option<u64> {
        self.shared.latch.latched_at()
    }
}

/// Extra gate on a client's callback, checked every cycle once the client itself is ready.
///
/// Receives the current cycle index.  Runs on the audio thread, so it must be as bounded as the callback.
pub struct ReadyCondition(Box<dyn FnMut(u64) -> bool + Send>);

impl ReadyCondition {
    pub fn new(condition: impl FnMut(u64) -> bool + Send + 'static) -> Self {
        Self(Box::new(condition))
    }

    pub fn always() -> Self {
        Self::new(|_| true)
    }

    /// Hold until `peer` is ready.
    pub fn peer(peer: ReadyHandle) -> Self {
        Self::new(move |cycle| peer.is_ready_at(cycle))
    }

    /// Hold until every one of `peers` is ready.
    pub fn all(peers: impl IntoIterator<Item = ReadyHandle>) -> Self {
        let peers: Vec<ReadyHandle> = peers.into_iter().collect();
        Self::new(move |cycle| peers.iter().all(|p| p.is_ready_at(cycle)))
    }

    fn check(&mut self, cycle: u64) -> bool {
        (self.0)(cycle)
    }
}

impl Default for ReadyCondition {
    fn default() -> Self {
        Self::always()
    }
}

impl std::fmt::Debug for ReadyCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ReadyCondition")
    }
}

/// How to wait for a client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, derive_builder::Builder)]
#[builder(pattern = "owned", default)]
pub struct WaitOptions {
    /// Give up after this long.  `None` waits for the operation to end by itself.
    #[builder(setter(strip_option))]
    pub timeout: Option<Duration>,

    /// Turn freewheel on before waiting.
    pub enter_freewheel: bool,

    /// Turn freewheel off after waiting.
    pub exit_freewheel: bool,
}

impl WaitOptions {
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Default::default()
        }
    }

    /// Run the whole operation in freewheel mode.
    pub fn freewheel(mut self) -> Self {
        self.enter_freewheel = true;
        self.exit_freewheel = true;
        self
    }
}

/// The part of a callback specific to one kind of client.  Only runs on cycles where the client is ready and its
/// condition holds, until completion.
pub(crate) trait ClientCallback: Send + 'static {
    fn run(&mut self, cycle: &mut Cycle<'_>, shared: &ClientShared);
}

struct Latching<C> {
    shared: Arc<ClientShared>,
    condition: ReadyCondition,
    inner: C,
}

impl<C: ClientCallback> Processor for Latching<C> {
    fn process(&mut self, cycle: &mut Cycle<'_>) {
        let index = cycle.index();
        self.shared.last_cycle.store(index, Ordering::Relaxed);

        if !self.shared.armed.load(Ordering::Acquire) {
            return;
        }
        self.shared.latch.latch(index);

        if !self.shared.latch.is_ready_at(index) || self.shared.completion.is_set() {
            return;
        }
        if !self.condition.check(index) {
            return;
        }

        self.inner.run(cycle, &self.shared);
    }
}

/// Watches for the clients on the other end of this client's connections leaving the graph.
struct HostWatcher {
    shared: Arc<ClientShared>,
    peers: Vec<String>,
    own_name: String,
}

impl GraphWatcher for HostWatcher {
    fn client_registration(&mut self, client_name: &str, registered: bool) {
        if registered || client_name == self.own_name {
            return;
        }
        if self.peers.iter().any(|p| p == client_name) {
            log::warn!("{client_name} left the graph: stopping {}", self.own_name);
            self.shared.error.store(true, Ordering::Release);
            self.shared.complete();
        }
    }
}

/// One connection to the graph with one callback.  The common core of every client.
///
/// Only one thread may ever wait on a given client.
pub struct RealtimeClient {
    client: Box<dyn GraphClient>,
    shared: Arc<ClientShared>,

    /// Whether the running operation ends by itself.
    has_end: bool,
}

impl RealtimeClient {
    pub fn new(backend: &dyn GraphBackend, name: &str) -> Result<Self> {
        Ok(Self {
            client: backend.open(name)?,
            shared: Default::default(),
            has_end: false,
        })
    }

    pub fn name(&self) -> &str {
        self.client.name()
    }

    pub fn sample_rate(&self) -> u32 {
        self.client.sample_rate()
    }

    pub fn ready_handle(&self) -> ReadyHandle {
        ReadyHandle {
            shared: self.shared.clone(),
        }
    }

    /// Whether the client counted as ready in the most recent cycle it saw.
    pub fn is_ready(&self) -> bool {
        let cycle = self.shared.last_cycle.load(Ordering::Relaxed);
        self.shared.latch.is_ready_at(cycle)
    }

    /// Whether the operation was cut short because the host left.  `wait` returning true does not rule this out.
    pub fn has_error(&self) -> bool {
        self.shared.error.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.shared.completion.is_set()
    }

    pub fn is_active(&self) -> bool {
        self.client.is_active()
    }

    pub fn registered_ports(&self) -> Vec<String> {
        self.client.registered_ports()
    }

    pub(crate) fn graph_client(&self) -> &dyn GraphClient {
        &*self.client
    }

    /// Register `layout`, start `callback`, let `connect` wire up the new ports, then arm the barrier.
    ///
    /// `peer_ports` are the ports `connect` will connect to.  If a client owning one of them leaves the graph, the
    /// operation is cut short with the error flag set.
    ///
    /// Any previous operation is torn down first.  On failure the client is left deactivated.
    pub(crate) fn activate<C: ClientCallback>(
        &mut self,
        layout: &PortLayout,
        peer_ports: &[String],
        callback: C,
        condition: ReadyCondition,
        has_end: bool,
        connect: impl FnOnce(&dyn GraphClient, &[String]) -> Result<()>,
    ) -> Result<()> {
        self.deactivate()?;
        // Ready handles belong to one operation.  Handles taken before the first start stay valid for it.
        if self.shared.latch.latched_at().is_some() || self.shared.completion.is_set() {
            self.shared = Default::default();
        }
        self.has_end = has_end;

        let res = self.activate_inner(layout, peer_ports, callback, condition, connect);
        if res.is_err() {
            if let Err(e) = self.deactivate() {
                log::warn!("Cleaning up after a failed start of {}: {e}", self.name());
            }
        }
        res
    }

    fn activate_inner<C: ClientCallback>(
        &mut self,
        layout: &PortLayout,
        peer_ports: &[String],
        callback: C,
        condition: ReadyCondition,
        connect: impl FnOnce(&dyn GraphClient, &[String]) -> Result<()>,
    ) -> Result<()> {
        let ports = self.client.register_ports(layout)?;

        let processor = Latching {
            shared: self.shared.clone(),
            condition,
            inner: callback,
        };
        let mut peers: Vec<String> = peer_ports.iter().map(|p| client_of(p).to_string()).collect();
        peers.sort();
        peers.dedup();
        let watcher = HostWatcher {
            shared: self.shared.clone(),
            peers,
            own_name: self.client.name().to_string(),
        };
        self.client.activate(Box::new(processor), Box::new(watcher))?;

        connect(&*self.client, &ports)?;
        self.shared.armed.store(true, Ordering::Release);
        log::debug!("{} armed with ports {ports:?}", self.name());
        Ok(())
    }

    /// Block until the operation completes or the timeout passes, then deactivate.
    ///
    /// Returns whether the wait ended without timing out.  That includes the host vanishing mid-operation, so check
    /// [RealtimeClient::has_error] too.  Freewheel problems are logged, not returned, since the wait itself is still
    /// meaningful without them.
    pub fn wait(&mut self, options: WaitOptions) -> Result<bool> {
        assert_not_audio_thread!();

        if options.timeout.is_none() && !self.has_end && self.client.is_active() {
            self.deactivate()?;
            return Err(Error::unbounded_wait());
        }

        if options.enter_freewheel {
            if let Err(e) = self.client.set_freewheel(true) {
                log::warn!("{}: could not enter freewheel: {e}", self.name());
            }
        }

        let completed = if !self.client.is_active() {
            self.shared.completion.is_set()
        } else {
            match options.timeout {
                Some(t) => self.shared.completion.wait_timeout(t),
                None => {
                    self.shared.completion.wait();
                    true
                }
            }
        };

        if options.exit_freewheel {
            if let Err(e) = self.client.set_freewheel(false) {
                log::warn!("{}: could not exit freewheel: {e}", self.name());
            }
        }

        if !completed {
            log::debug!("{} timed out", self.name());
        }
        self.deactivate()?;
        Ok(completed)
    }

    /// Stop immediately without waiting.
    pub fn kill(&mut self) -> Result<()> {
        self.deactivate()
    }

    fn deactivate(&mut self) -> Result<()> {
        self.shared.armed.store(false, Ordering::Release);
        self.client.deactivate()
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        if let Err(e) = self.deactivate() {
            log::warn!("While dropping {}: {e}", self.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use crate::graph::simulated::{CallbackOrder, SimulatedGraph, SimulatedGraphConfigBuilder};

    /// Records the cycles it runs in, and completes after `cycles` of them.
    struct Counting {
        seen: Arc<Mutex<Vec<u64>>>,
        cycles: usize,
    }

    impl ClientCallback for Counting {
        fn run(&mut self, cycle: &mut Cycle<'_>, shared: &ClientShared) {
            let mut seen = self.seen.lock().unwrap();
            seen.push(cycle.index());
            if seen.len() >= self.cycles {
                shared.complete();
            }
        }
    }

    const HOST_PORTS: &[&str] = &["Carla:audio-out1", "Carla:audio-out2"];

    fn start_counting(
        client: &mut RealtimeClient,
        condition: ReadyCondition,
        cycles: usize,
    ) -> Arc<Mutex<Vec<u64>>> {
        let seen = Arc::new(Mutex::new(vec![]));
        let peers: Vec<String> = HOST_PORTS.iter().map(|p| p.to_string()).collect();
        client
            .activate(
                &PortLayout::default(),
                &peers,
                Counting {
                    seen: seen.clone(),
                    cycles,
                },
                condition,
                true,
                |_, _| Ok(()),
            )
            .unwrap();
        seen
    }

    #[test]
    fn peers_start_on_the_same_cycle() {
        for order in [CallbackOrder::Registration, CallbackOrder::Reversed] {
            let graph = SimulatedGraph::new(
                SimulatedGraphConfigBuilder::default()
                    .callback_order(order)
                    .build()
                    .unwrap(),
            );
            let mut a = RealtimeClient::new(&graph, "a").unwrap();
            let mut b = RealtimeClient::new(&graph, "b").unwrap();

            let seen_a = start_counting(&mut a, ReadyCondition::peer(b.ready_handle()), 3);
            graph.run_cycles(2);
            let seen_b = start_counting(&mut b, ReadyCondition::peer(a.ready_handle()), 3);
            graph.run_cycles(10);

            assert_eq!(*seen_a.lock().unwrap(), vec![4, 5, 6]);
            assert_eq!(*seen_a.lock().unwrap(), *seen_b.lock().unwrap());
            assert!(a.wait(WaitOptions::timeout(Duration::ZERO)).unwrap());
            assert!(b.wait(WaitOptions::timeout(Duration::ZERO)).unwrap());
        }
    }

    #[test]
    fn not_ready_in_the_latching_cycle() {
        let graph = SimulatedGraph::default();
        let mut a = RealtimeClient::new(&graph, "a").unwrap();
        let seen = start_counting(&mut a, ReadyCondition::always(), 1);

        graph.step();
        assert_eq!(a.ready_handle().latched_at(), Some(1));
        assert!(!a.is_ready());
        assert!(seen.lock().unwrap().is_empty());

        graph.step();
        assert!(a.is_ready());
        assert_eq!(*seen.lock().unwrap(), vec![2]);
        assert!(a.is_complete());
    }

    #[test]
    fn host_departure_forces_completion() {
        let graph = SimulatedGraph::with_phantom_host(Default::default());
        let mut a = RealtimeClient::new(&graph, "a").unwrap();
        let seen = start_counting(&mut a, ReadyCondition::always(), usize::MAX);
        graph.run_cycles(3);
        assert!(!a.is_complete());

        graph.remove_phantom_host();
        assert!(a.is_complete());
        assert!(a.has_error());
        assert!(a.wait(WaitOptions::timeout(Duration::from_secs(1))).unwrap());
        assert!(!a.is_active());
        assert_eq!(*seen.lock().unwrap(), vec![2, 3]);
    }

    #[test]
    fn other_clients_leaving_are_ignored() {
        let graph = SimulatedGraph::with_phantom_host(Default::default());
        let mut a = RealtimeClient::new(&graph, "a").unwrap();
        start_counting(&mut a, ReadyCondition::always(), usize::MAX);
        graph.run_cycles(2);

        // The harness's own control and liveness clients share a prefix with the host.
        for name in ["carla_harness", "carla_harness-liveness", "Carla-02"] {
            drop(graph.open(name).unwrap());
        }
        graph.run_cycles(2);

        assert!(!a.is_complete());
        assert!(!a.has_error());
        a.kill().unwrap();
    }

    #[test]
    fn unbounded_waits_are_rejected() {
        let graph = SimulatedGraph::default();
        let mut a = RealtimeClient::new(&graph, "a").unwrap();
        a.activate(
            &PortLayout::default(),
            &[],
            Counting {
                seen: Default::default(),
                cycles: 1,
            },
            ReadyCondition::always(),
            false,
            |_, _| Ok(()),
        )
        .unwrap();

        let err = a.wait(WaitOptions::default()).unwrap_err();
        assert!(err.is_unbounded_wait());
        assert!(!a.is_active());
    }

    #[test]
    fn failed_connections_leave_the_client_inactive() {
        let graph = SimulatedGraph::default();
        let mut a = RealtimeClient::new(&graph, "a").unwrap();
        let res = a.activate(
            &PortLayout::audio_inputs(1),
            &["Carla:audio-out1".to_string()],
            Counting {
                seen: Default::default(),
                cycles: 1,
            },
            ReadyCondition::always(),
            true,
            |client, ports| client.connect("Carla:audio-out1", &ports[0]),
        );
        assert!(res.is_err());
        assert!(!a.is_active());
        assert!(a.registered_ports().is_empty());
    }
}
