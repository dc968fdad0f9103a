//! Event messages and schedules of them.
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const CC_SUSTAIN: u8 = 64;
pub const CC_SOSTENUTO: u8 = 66;
pub const CC_SOFT: u8 = 67;

/// One channel message of at most three bytes.
///
/// Constructors mask their arguments into range rather than failing: channels to 0..=15, data bytes to 0..=127.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MidiMessage {
    bytes: [u8; 3],
    len: u8,
}

impl MidiMessage {
    fn channel_message(status: u8, channel: u8, data: &[u8]) -> Self {
        let mut bytes = [status | (channel & 0x0f), 0, 0];
        for (dst, src) in bytes[1..].iter_mut().zip(data) {
            *dst = src & 0x7f;
        }
        Self {
            bytes,
            len: 1 + data.len().min(2) as u8,
        }
    }

    pub fn note_on(channel: u8, pitch: u8, velocity: u8) -> Self {
        Self::channel_message(0x90, channel, &[pitch, velocity])
    }

    pub fn note_off(channel: u8, pitch: u8, velocity: u8) -> Self {
        Self::channel_message(0x80, channel, &[pitch, velocity])
    }

    pub fn control_change(channel: u8, controller: u8, value: u8) -> Self {
        Self::channel_message(0xb0, channel, &[controller, value])
    }

    pub fn program_change(channel: u8, program: u8) -> Self {
        Self::channel_message(0xc0, channel, &[program])
    }

    /// Wrap raw bytes, e.g. from a parsed file.  `None` if empty or longer than three bytes.
    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        if raw.is_empty() || raw.len() > 3 {
            return None;
        }
        let mut bytes = [0; 3];
        bytes[..raw.len()].copy_from_slice(raw);
        Some(Self {
            bytes,
            len: raw.len() as u8,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn channel(&self) -> u8 {
        self.bytes[0] & 0x0f
    }

    pub fn status(&self) -> u8 {
        self.bytes[0] & 0xf0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimedMessage {
    /// Time from the start of the schedule.
    pub offset: Duration,
    pub message: MidiMessage,
}

/// How the times handed to [EventSchedule::from_messages] are to be read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timing {
    /// Each time is from the start of the schedule.
    Absolute,
    /// Each time is from the previous message, as in standard MIDI files.
    Delta,
}

/// Messages ordered by time offset.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventSchedule {
    events: Vec<TimedMessage>,
}

/// Parameters of [EventSchedule::single_note].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, derive_builder::Builder)]
#[builder(pattern = "owned", default)]
#[serde(default)]
pub struct NoteSpec {
    pub pitch: u8,
    pub velocity: u8,
    pub duration: Duration,
    pub sustain: u8,
    pub soft: u8,
    pub sostenuto: u8,
    pub channel: u8,
    pub program: u8,
}

impl Default for NoteSpec {
    fn default() -> Self {
        Self {
            pitch: 64,
            velocity: 64,
            duration: Duration::from_secs(2),
            sustain: 0,
            soft: 0,
            sostenuto: 0,
            channel: 0,
            program: 0,
        }
    }
}

impl EventSchedule {
    /// Fails if offsets ever decrease.
    pub fn new(events: Vec<TimedMessage>) -> Result<Self> {
        if let Some(w) = events.windows(2).find(|w| w[1].offset < w[0].offset) {
            return Err(Error::invalid_schedule(format!(
                "offset {:?} follows {:?}",
                w[1].offset, w[0].offset
            )));
        }
        Ok(Self { events })
    }

    /// Build a schedule from an already parsed score.
    pub fn from_messages(
        messages: impl IntoIterator<Item = (Duration, MidiMessage)>,
        timing: Timing,
    ) -> Result<Self> {
        let mut now = Duration::ZERO;
        let events = messages
            .into_iter()
            .map(|(time, message)| {
                let offset = match timing {
                    Timing::Absolute => time,
                    Timing::Delta => {
                        now += time;
                        now
                    }
                };
                TimedMessage { offset, message }
            })
            .collect();
        Self::new(events)
    }

    /// One note: program change, sustain, sostenuto and soft pedals, note-on at zero, and note-off after
    /// `spec.duration`.
    pub fn single_note(spec: &NoteSpec) -> Self {
        let ch = spec.channel;
        let at = |offset, message| TimedMessage { offset, message };
        let zero = Duration::ZERO;

        Self {
            events: vec![
                at(zero, MidiMessage::program_change(ch, spec.program)),
                at(zero, MidiMessage::control_change(ch, CC_SUSTAIN, spec.sustain)),
                at(zero, MidiMessage::control_change(ch, CC_SOSTENUTO, spec.sostenuto)),
                at(zero, MidiMessage::control_change(ch, CC_SOFT, spec.soft)),
                at(zero, MidiMessage::note_on(ch, spec.pitch, spec.velocity)),
                at(spec.duration, MidiMessage::note_off(ch, spec.pitch, 64)),
            ],
        }
    }

    /// Drop every message later than `max`.
    pub fn with_max_duration(mut self, max: Duration) -> Self {
        self.events.retain(|e| e.offset <= max);
        self
    }

    /// Offset of the last message.
    pub fn total_duration(&self) -> Duration {
        self.events.last().map(|e| e.offset).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[TimedMessage] {
        &self.events
    }

    /// Offsets in samples at `sample_rate`, rounded to the nearest sample.
    pub fn to_sample_offsets(&self, sample_rate: u32) -> Vec<(u64, MidiMessage)> {
        self.events
            .iter()
            .map(|e| {
                let samples = (e.offset.as_secs_f64() * sample_rate as f64).round() as u64;
                (samples, e.message)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn constructors_mask_into_range() {
        assert_eq!(MidiMessage::note_on(17, 200, 64).as_bytes(), &[0x91, 72, 64]);
        assert_eq!(MidiMessage::program_change(3, 5).as_bytes(), &[0xc3, 5]);
        assert_eq!(MidiMessage::control_change(0, CC_SOFT, 127).channel(), 0);
        assert_eq!(MidiMessage::note_off(15, 1, 2).status(), 0x80);
        assert_eq!(MidiMessage::from_bytes(&[]), None);
        assert_eq!(MidiMessage::from_bytes(&[1, 2, 3, 4]), None);
    }

    #[test]
    fn single_note_has_six_messages() {
        let spec = NoteSpecBuilder::default()
            .pitch(64)
            .velocity(64)
            .duration(Duration::from_secs(2))
            .sustain(127)
            .build()
            .unwrap();
        let s = EventSchedule::single_note(&spec);

        let bytes: Vec<&[u8]> = s.events().iter().map(|e| e.message.as_bytes()).collect();
        let expected: Vec<&[u8]> = vec![
            &[0xc0, 0],
            &[0xb0, 64, 127],
            &[0xb0, 66, 0],
            &[0xb0, 67, 0],
            &[0x90, 64, 64],
            &[0x80, 64, 64],
        ];
        assert_eq!(bytes, expected);
        assert_eq!(s.total_duration(), Duration::from_secs(2));

        let samples: Vec<u64> = s.to_sample_offsets(48000).into_iter().map(|x| x.0).collect();
        assert_eq!(samples, vec![0, 0, 0, 0, 0, 96000]);
    }

    #[test]
    fn delta_times_accumulate() {
        let on = MidiMessage::note_on(0, 60, 100);
        let off = MidiMessage::note_off(0, 60, 0);
        let ms = Duration::from_millis;

        let s = EventSchedule::from_messages(
            [(ms(0), on), (ms(500), off), (ms(250), on), (ms(250), off)],
            Timing::Delta,
        )
        .unwrap();
        let offsets: Vec<Duration> = s.events().iter().map(|e| e.offset).collect();
        assert_eq!(offsets, vec![ms(0), ms(500), ms(750), ms(1000)]);

        let capped = s.with_max_duration(ms(750));
        assert_eq!(capped.len(), 3);
        assert_eq!(capped.total_duration(), ms(750));
    }

    #[test]
    fn decreasing_absolute_times_are_rejected() {
        let on = MidiMessage::note_on(0, 60, 100);
        let err = EventSchedule::from_messages(
            [(Duration::from_secs(1), on), (Duration::ZERO, on)],
            Timing::Absolute,
        )
        .unwrap_err();
        assert!(err.is_invalid_schedule());
    }
}
