use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::*;
use crate::config::HarnessConfig;
use crate::midi::{EventSchedule, MidiMessage, NoteSpec};
use crate::ports::PortPattern;

/// Short name of the playback client's event output.
pub const EVENT_OUTPUT: &str = "events-out";

struct PlaybackCallback {
    /// Sample offsets from the first ready cycle.
    events: Vec<(u64, MidiMessage)>,
    cursor: usize,

    /// Samples played so far.
    position: u64,

    /// Events the engine refused, e.g. because the port buffer was full.
    dropped: Arc<AtomicU64>,
}

impl ClientCallback for PlaybackCallback {
    fn run(&mut self, cycle: &mut Cycle<'_>, shared: &ClientShared) {
        let end = self.position + cycle.frames() as u64;

        while let Some((at, message)) = self.events.get(self.cursor) {
            if *at >= end {
                break;
            }
            let offset = at.saturating_sub(self.position) as u32;
            if !cycle.events().write(offset, message.as_bytes()) {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            self.cursor += 1;
        }
        self.position = end;

        if self.cursor == self.events.len() {
            shared.complete();
        }
    }
}

/// Sends a schedule of events to the plugin host.
///
/// Completion is signalled once the last event is written, but the port stays open until the client is waited on or
/// killed.
pub struct EventPlaybackClient {
    client: RealtimeClient,
    pattern: PortPattern,
    dropped: Arc<AtomicU64>,
}

impl EventPlaybackClient {
    pub fn new(backend: &dyn GraphBackend, name: &str, config: &HarnessConfig) -> Result<Self> {
        Ok(Self {
            client: RealtimeClient::new(backend, name)?,
            pattern: PortPattern::new(&config.ports.host_events)?,
            dropped: Default::default(),
        })
    }

    pub fn client(&self) -> &RealtimeClient {
        &self.client
    }

    pub fn ready_handle(&self) -> ReadyHandle {
        self.client.ready_handle()
    }

    /// Begin playing `schedule`, connected to every host event input.  Offsets count from the first cycle in which the
    /// client is ready and `condition` holds.
    pub fn start(&mut self, schedule: &EventSchedule, condition: ReadyCondition) -> Result<()> {
        let destinations: Vec<String> = self
            .client
            .graph_client()
            .port_names()?
            .into_iter()
            .filter(|p| self.pattern.matches(p))
            .collect();
        if destinations.is_empty() {
            return Err(Error::backend(format!("No ports match {}", self.pattern)));
        }

        self.dropped = Arc::new(AtomicU64::new(0));
        let callback = PlaybackCallback {
            events: schedule.to_sample_offsets(self.client.sample_rate()),
            cursor: 0,
            position: 0,
            dropped: self.dropped.clone(),
        };
        log::debug!(
            "{}: playing {} events over {:?}",
            self.client.name(),
            schedule.len(),
            schedule.total_duration()
        );

        self.client.activate(
            &PortLayout::event_output(EVENT_OUTPUT),
            &destinations,
            callback,
            condition,
            true,
            |client, ports| {
                for source in ports {
                    for destination in destinations.iter() {
                        client.connect(source, destination)?;
                    }
                }
                Ok(())
            },
        )
    }

    /// Start, then wait.
    pub fn start_sync(
        &mut self,
        schedule: &EventSchedule,
        condition: ReadyCondition,
        wait: WaitOptions,
    ) -> Result<bool> {
        self.start(schedule, condition)?;
        self.wait(wait)
    }

    /// Play one note built from `spec`.
    pub fn play_note(&mut self, spec: &NoteSpec, condition: ReadyCondition) -> Result<()> {
        self.start(&EventSchedule::single_note(spec), condition)
    }

    /// Play a pre-parsed score, dropping anything after `max_duration`.
    pub fn play_schedule(
        &mut self,
        schedule: EventSchedule,
        max_duration: Option<Duration>,
        condition: ReadyCondition,
    ) -> Result<()> {
        let schedule = match max_duration {
            Some(max) => schedule.with_max_duration(max),
            None => schedule,
        };
        self.start(&schedule, condition)
    }

    pub fn wait(&mut self, options: WaitOptions) -> Result<bool> {
        let completed = self.client.wait(options)?;
        let dropped = self.dropped_events();
        if dropped > 0 {
            log::warn!("{}: the engine dropped {dropped} events", self.client.name());
        }
        Ok(completed)
    }

    /// Events of the current schedule which the engine would not take.  Safe to call while playing.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn kill(&mut self) -> Result<()> {
        self.client.kill()
    }

    pub fn has_error(&self) -> bool {
        self.client.has_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    use crate::graph::EventSink;

    struct Collect(Vec<(u32, Vec<u8>)>);

    impl EventSink for Collect {
        fn write(&mut self, offset: u32, bytes: &[u8]) -> bool {
            self.0.push((offset, bytes.to_vec()));
            true
        }
    }

    #[test]
    fn events_land_in_their_blocks() {
        let shared = ClientShared::default();
        let on = MidiMessage::note_on(0, 60, 100);
        let off = MidiMessage::note_off(0, 60, 0);
        let mut callback = PlaybackCallback {
            events: vec![(0, on), (100, off), (256, on), (300, off)],
            cursor: 0,
            position: 0,
            dropped: Default::default(),
        };

        let mut per_block = vec![];
        for index in 0..3 {
            let mut sink = Collect(vec![]);
            callback.run(&mut Cycle::new(index, 128, &[], &mut sink), &shared);
            per_block.push(sink.0);
        }

        assert_eq!(
            per_block,
            vec![
                vec![(0, on.as_bytes().to_vec()), (100, off.as_bytes().to_vec())],
                vec![],
                vec![(0, on.as_bytes().to_vec()), (44, off.as_bytes().to_vec())],
            ]
        );
        assert!(shared.completion.is_set());
        assert_eq!(callback.dropped.load(Ordering::Relaxed), 0);
    }

    /// Takes the first `room` events of each block.
    struct Full {
        room: usize,
        taken: usize,
    }

    impl EventSink for Full {
        fn write(&mut self, _offset: u32, _bytes: &[u8]) -> bool {
            self.taken += 1;
            self.taken <= self.room
        }
    }

    #[test]
    fn refused_events_are_counted() {
        let shared = ClientShared::default();
        let dropped = Arc::new(AtomicU64::new(0));
        let mut callback = PlaybackCallback {
            events: EventSchedule::single_note(&NoteSpec::default()).to_sample_offsets(48000),
            cursor: 0,
            position: 0,
            dropped: dropped.clone(),
        };

        // The first block holds every message but the note off, and only has room for two of them.
        let mut sink = Full { room: 2, taken: 0 };
        callback.run(&mut Cycle::new(0, 1024, &[], &mut sink), &shared);
        assert_eq!(dropped.load(Ordering::Relaxed), 3);
        assert!(!shared.completion.is_set());

        for index in 1..200 {
            let mut sink = Full { room: 0, taken: 0 };
            callback.run(&mut Cycle::new(index, 1024, &[], &mut sink), &shared);
        }
        assert!(shared.completion.is_set());
        assert_eq!(dropped.load(Ordering::Relaxed), 4);
    }
}
