use std::time::Duration;

use anyhow::{Context, Result};

use carla_harness::midi::NoteSpecBuilder;
use carla_harness::{AudioCaptureClient, EventPlaybackClient};

use crate::cli_args::{CliArgs, NoteArgs};
use crate::context::{load_config, play_and_record, Rig};

pub fn note(_top_args: &CliArgs, args: &NoteArgs) -> Result<()> {
    let config = load_config(args.rig.config.as_deref())?;
    let rig = Rig::from_args(&args.rig, &config)?;
    let backend = rig.backend();

    let note = NoteSpecBuilder::default()
        .pitch(args.pitch)
        .velocity(args.velocity)
        .duration(Duration::try_from_secs_f64(args.duration).context("Invalid --duration")?)
        .build()?;
    let decay = Duration::try_from_secs_f64(args.decay).context("Invalid --decay")?;

    let mut player = EventPlaybackClient::new(&*backend, "note-player", &config)?;
    let mut recorder = AudioCaptureClient::new(&*backend, "note-recorder", &config)?;

    eprintln!(
        "Playing pitch {} at velocity {} for {:?}, recording {:?} in total",
        args.pitch,
        args.velocity,
        note.duration,
        note.duration + decay
    );
    let audio = play_and_record(&mut player, &mut recorder, &note, decay, args.freewheel)?;

    match audio.first_frame_above(0.0) {
        Some(frame) => eprintln!("Sound starts at frame {frame}"),
        None => eprintln!("Warning: the recording is silent"),
    }
    audio
        .export(&args.output)
        .with_context(|| format!("Writing {}", args.output.display()))?;
    eprintln!("Wrote {}", args.output.display());
    Ok(())
}
