thread_local! {
    static IS_AUDIO_THREAD: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

pub(crate) fn is_audio_thread() -> bool {
    IS_AUDIO_THREAD.with(|x| x.get())
}

/// Restores the previous marking when dropped.
pub(crate) struct AudioThreadGuard {
    previous: bool,
}

/// Mark the current thread as running an audio callback until the guard drops.
///
/// Blocking operations `debug_assert!` against this.  Scoped, because the simulated graph runs callbacks on whatever
/// thread steps it.
#[inline(always)]
pub(crate) fn enter_audio_thread() -> AudioThreadGuard {
    AudioThreadGuard {
        previous: IS_AUDIO_THREAD.with(|x| x.replace(true)),
    }
}

impl Drop for AudioThreadGuard {
    fn drop(&mut self) {
        IS_AUDIO_THREAD.with(|x| x.set(self.previous));
    }
}

/// Guard for the top of anything which sleeps, parks, or waits on a process.
macro_rules! assert_not_audio_thread {
    () => {
        debug_assert!(
            !crate::is_audio_thread::is_audio_thread(),
            "blocking operation attempted from the audio thread"
        )
    };
}
