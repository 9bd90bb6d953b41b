//! # Acoustic Sampler
//!
//! Continuous sound-level sampling on its own thread, so blocking radio
//! calls on the main loop never cause gaps in the measurement.
//!
//! The main loop requests a stop, then polls the completion flag before the
//! node may power down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::signals::Signal;

/// Idle time when the source has no block ready.
const SOURCE_IDLE: Duration = Duration::from_millis(2);

/// Producer of A-weighted sound levels, one value per analysis block.
pub trait SampleSource: Send {
    /// Next block level in dB, `None` if no block is ready yet.
    fn next_level(&mut self) -> Option<f32>;
}

/// Minimum, mean and maximum level over a sampling run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoundLevels {
    pub min_db: f32,
    pub avg_db: f32,
    pub max_db: f32,
}

#[derive(Debug, Default)]
struct Accumulator {
    count: u32,
    sum: f64,
    min: f32,
    max: f32,
}

impl Accumulator {
    fn add(&mut self, db: f32) {
        if self.count == 0 {
            self.min = db;
            self.max = db;
        } else {
            self.min = self.min.min(db);
            self.max = self.max.max(db);
        }
        self.sum += f64::from(db);
        self.count += 1;
    }

    fn levels(&self) -> Option<SoundLevels> {
        (self.count > 0).then(|| SoundLevels {
            min_db: self.min,
            avg_db: (self.sum / f64::from(self.count)) as f32,
            max_db: self.max,
        })
    }
}

/// Handle to a running sampling thread.
pub struct AcousticSampler {
    stop: Arc<AtomicBool>,
    complete: Signal,
    result: Arc<Mutex<Option<SoundLevels>>>,
    handle: Option<JoinHandle<Box<dyn SampleSource>>>,
}

impl std::fmt::Debug for AcousticSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcousticSampler")
            .field("stop_requested", &self.stop.load(Ordering::Relaxed))
            .field("complete", &self.complete.is_raised())
            .finish_non_exhaustive()
    }
}

impl AcousticSampler {
    /// Spawn the sampling thread over `source`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the thread cannot be spawned.
    pub fn start(mut source: Box<dyn SampleSource>) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let complete = Signal::new();
        let result = Arc::new(Mutex::new(None));

        let thread_stop = Arc::clone(&stop);
        let thread_complete = complete.clone();
        let thread_result = Arc::clone(&result);

        let handle = thread::Builder::new()
            .name("acoustic".to_string())
            .spawn(move || {
                let mut acc = Accumulator::default();
                while !thread_stop.load(Ordering::Acquire) {
                    match source.next_level() {
                        Some(db) => acc.add(db),
                        None => thread::sleep(SOURCE_IDLE),
                    }
                }
                if let Ok(mut slot) = thread_result.lock() {
                    *slot = acc.levels();
                }
                debug!("Acoustic sampling finished after {} blocks", acc.count);
                thread_complete.raise();
                source
            })?;

        Ok(Self {
            stop,
            complete,
            result,
            handle: Some(handle),
        })
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// The thread has published its result and released its buffers.
    pub fn is_complete(&self) -> bool {
        self.complete.is_raised()
    }

    /// The thread is gone, with or without publishing a result.
    pub fn has_exited(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Collect the result and the source once [`AcousticSampler::is_complete`].
    ///
    /// # Returns
    ///
    /// * `Some((levels, source))` - `levels` is `None` if no block was analysed
    /// * `None` - The thread has not completed, or panicked
    pub fn finish(mut self) -> Option<(Option<SoundLevels>, Box<dyn SampleSource>)> {
        if !self.is_complete() {
            return None;
        }
        let source = match self.handle.take()?.join() {
            Ok(source) => source,
            Err(_) => {
                warn!("Acoustic sampling thread panicked");
                return None;
            }
        };
        let levels = self.result.lock().ok().and_then(|slot| *slot);
        Some((levels, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    struct Scripted {
        levels: Vec<f32>,
    }

    impl SampleSource for Scripted {
        fn next_level(&mut self) -> Option<f32> {
            if self.levels.is_empty() {
                None
            } else {
                Some(self.levels.remove(0))
            }
        }
    }

    fn wait_complete(sampler: &AcousticSampler) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !sampler.is_complete() {
            assert!(Instant::now() < deadline, "sampler did not complete");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_accumulator() {
        let mut acc = Accumulator::default();
        assert_eq!(acc.levels(), None);
        for db in [40.0, 60.0, 50.0] {
            acc.add(db);
        }
        assert_eq!(
            acc.levels(),
            Some(SoundLevels {
                min_db: 40.0,
                avg_db: 50.0,
                max_db: 60.0
            })
        );
    }

    #[test]
    fn test_completion_only_after_stop() {
        let source = Box::new(Scripted {
            levels: vec![45.0, 55.0],
        });
        let sampler = AcousticSampler::start(source).unwrap();
        // Let the thread drain the scripted blocks.
        thread::sleep(Duration::from_millis(20));
        assert!(!sampler.is_complete());

        sampler.request_stop();
        wait_complete(&sampler);

        let (levels, _source) = sampler.finish().unwrap();
        let levels = levels.unwrap();
        assert_eq!(levels.min_db, 45.0);
        assert_eq!(levels.max_db, 55.0);
        assert_eq!(levels.avg_db, 50.0);
    }

    #[test]
    fn test_no_blocks_gives_no_levels() {
        let sampler = AcousticSampler::start(Box::new(Scripted { levels: vec![] })).unwrap();
        sampler.request_stop();
        wait_complete(&sampler);
        let (levels, _) = sampler.finish().unwrap();
        assert_eq!(levels, None);
    }
}
