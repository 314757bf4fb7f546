//! Events processor
//!
//! Runs a [`ProfileGenerator`] on its own thread. Code events and tick
//! samples are queued on one bounded channel and applied in arrival order,
//! so the code map never needs a lock of its own.

use crossbeam_channel::{bounded, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tickprof_shared::TickSample;
use tracing::{debug, info, trace, warn};

use crate::error::{ProfilerError, Result};
use crate::generator::{CodeEvent, ProfileGenerator};

/// One unit of work for the processor thread
#[derive(Debug, Clone)]
pub enum ProfilerEvent {
    Code(CodeEvent),
    Tick(TickSample),
}

enum Message {
    Event(ProfilerEvent),
    Shutdown,
}

/// Cloneable handle for feeding ticks from sampler threads.
///
/// A handle stays usable while the processor it came from runs; afterwards
/// every call fails with [`ProfilerError::ProcessorStopped`]. Ticks sent while
/// the processor is shutting down may be discarded.
#[derive(Clone)]
pub struct SampleSender {
    sender: Sender<Message>,
    dropped_ticks: Arc<AtomicU64>,
}

impl SampleSender {
    /// Queue a sample, waiting for room if the queue is full
    pub fn add_sample(&self, sample: TickSample) -> Result<()> {
        self.sender
            .send(Message::Event(ProfilerEvent::Tick(sample)))
            .map_err(|_| ProfilerError::ProcessorStopped)
    }

    /// Queue a sample without waiting. A full queue drops the sample and
    /// returns `Ok(false)`.
    pub fn try_add_sample(&self, sample: TickSample) -> Result<bool> {
        match self
            .sender
            .try_send(Message::Event(ProfilerEvent::Tick(sample)))
        {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped_ticks.fetch_add(1, Ordering::Relaxed) + 1;
                trace!("Tick dropped, queue full ({} dropped so far)", dropped);
                Ok(false)
            }
            Err(TrySendError::Disconnected(_)) => Err(ProfilerError::ProcessorStopped),
        }
    }

    /// Samples dropped by [`try_add_sample`](Self::try_add_sample) across
    /// every handle of the same processor
    pub fn dropped_ticks(&self) -> u64 {
        self.dropped_ticks.load(Ordering::Relaxed)
    }
}

/// A processor thread that could not be spawned. Carries the generator back
/// so its code map survives.
pub struct StartFailure {
    pub error: ProfilerError,
    pub generator: ProfileGenerator,
}

pub struct EventsProcessor {
    samples: SampleSender,
    handle: JoinHandle<Option<ProfileGenerator>>,
}

impl EventsProcessor {
    /// Move `generator` onto a new processor thread
    pub fn start(generator: ProfileGenerator, queue_capacity: usize) -> Result<Self> {
        Self::start_with(thread::Builder::new(), generator, queue_capacity)
            .map_err(|failure| failure.error)
    }

    /// Like [`start`](Self::start), spawning through `builder`. On failure the
    /// generator is handed back.
    pub fn start_with(
        builder: thread::Builder,
        generator: ProfileGenerator,
        queue_capacity: usize,
    ) -> std::result::Result<Self, StartFailure> {
        let (sender, receiver) = bounded::<Message>(queue_capacity);
        let (handoff, handoff_rx) = bounded::<ProfileGenerator>(1);

        let spawned = builder
            .name("tickprof-processor".to_string())
            .spawn(move || {
                let mut generator = handoff_rx.recv().ok()?;
                let mut ticks = 0u64;
                let mut code_events = 0u64;

                for message in receiver {
                    match message {
                        Message::Event(ProfilerEvent::Code(event)) => {
                            generator.apply_code_event(event);
                            code_events += 1;
                        }
                        Message::Event(ProfilerEvent::Tick(sample)) => {
                            generator.record_tick_sample(&sample);
                            ticks += 1;
                        }
                        Message::Shutdown => break,
                    }
                }

                debug!(
                    "Events processor drained: {} ticks, {} code events",
                    ticks, code_events
                );
                Some(generator)
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Failed to spawn events processor: {}", e);
                return Err(StartFailure {
                    error: ProfilerError::Spawn(e),
                    generator,
                });
            }
        };
        if let Err(returned) = handoff.send(generator) {
            return Err(StartFailure {
                error: ProfilerError::ProcessorStopped,
                generator: returned.into_inner(),
            });
        }

        info!("Events processor started (queue capacity {})", queue_capacity);
        Ok(Self {
            samples: SampleSender {
                sender,
                dropped_ticks: Arc::new(AtomicU64::new(0)),
            },
            handle,
        })
    }

    /// Queue an event, waiting for room if the queue is full
    pub fn enqueue(&self, event: ProfilerEvent) -> Result<()> {
        self.samples
            .sender
            .send(Message::Event(event))
            .map_err(|_| ProfilerError::ProcessorStopped)
    }

    pub fn add_code_event(&self, event: CodeEvent) -> Result<()> {
        self.enqueue(ProfilerEvent::Code(event))
    }

    pub fn add_sample(&self, sample: TickSample) -> Result<()> {
        self.samples.add_sample(sample)
    }

    /// Queue a sample without waiting. A full queue drops the sample and
    /// returns `Ok(false)`.
    pub fn try_add_sample(&self, sample: TickSample) -> Result<bool> {
        self.samples.try_add_sample(sample)
    }

    /// Handle for sampler threads that outlives borrows of the processor
    pub fn sample_sender(&self) -> SampleSender {
        self.samples.clone()
    }

    pub fn dropped_ticks(&self) -> u64 {
        self.samples.dropped_ticks()
    }

    /// Events waiting in the queue
    pub fn pending(&self) -> usize {
        self.samples.sender.len()
    }

    /// Apply everything queued so far, join the thread and hand the
    /// generator back. Outstanding [`SampleSender`]s stop working.
    pub fn stop(self) -> Result<ProfileGenerator> {
        let dropped = self.dropped_ticks();
        // A failed send means the thread is gone already; join reports why.
        let _ = self.samples.sender.send(Message::Shutdown);
        drop(self.samples);
        let generator = self
            .handle
            .join()
            .map_err(|_| ProfilerError::ProcessorPanicked)?
            .ok_or(ProfilerError::ProcessorStopped)?;
        info!("Events processor stopped ({} ticks dropped)", dropped);
        Ok(generator)
    }
}

#[cfg(test)]
impl EventsProcessor {
    /// A processor whose thread has already panicked
    pub(crate) fn panicked() -> Self {
        let (sender, receiver) = bounded::<Message>(1);
        let handle = thread::spawn(move || -> Option<ProfileGenerator> {
            drop(receiver);
            panic!("events processor failure");
        });
        Self {
            samples: SampleSender {
                sender,
                dropped_ticks: Arc::new(AtomicU64::new(0)),
            },
            handle,
        }
    }
}
