//! Profiler front end
//!
//! `CpuProfiler` is what a host embeds. It owns the registry, keeps the
//! events processor running while at least one profile records, and parks
//! the generator (with its code map) between recordings so code observed
//! earlier stays symbolizable.

use anyhow::Context;
use std::sync::Arc;
use std::thread;
use tickprof_shared::TickSample;
use tracing::{debug, info, trace, warn};

use crate::config::ProfilerConfig;
use crate::error::{ProfilerError, Result};
use crate::generator::{CodeEvent, ProfileGenerator};
use crate::processor::{EventsProcessor, SampleSender};
use crate::profile::CpuProfile;
use crate::registry::{ProfileRegistry, StartOutcome};

enum Engine {
    Idle(ProfileGenerator),
    Running(EventsProcessor),
}

pub struct CpuProfiler {
    config: ProfilerConfig,
    registry: Arc<ProfileRegistry>,
    engine: Option<Engine>,
    processor_stack_size: Option<usize>,
}

impl CpuProfiler {
    pub fn new(config: ProfilerConfig) -> anyhow::Result<Self> {
        config.validate().context("Invalid profiler configuration")?;

        let registry = Arc::new(ProfileRegistry::new(&config));
        let generator = ProfileGenerator::new(registry.clone(), &config);
        debug!("CPU profiler created: {:?}", config);

        Ok(Self {
            config,
            registry,
            engine: Some(Engine::Idle(generator)),
            processor_stack_size: None,
        })
    }

    /// Stack size for the events processor thread, in bytes
    pub fn with_processor_stack_size(mut self, stack_size: usize) -> Self {
        self.processor_stack_size = Some(stack_size);
        self
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ProfileRegistry> {
        &self.registry
    }

    pub fn is_processing(&self) -> bool {
        matches!(self.engine, Some(Engine::Running(_)))
    }

    /// The running processor, for handing samples over from a sampler thread
    pub fn processor(&self) -> Option<&EventsProcessor> {
        match &self.engine {
            Some(Engine::Running(processor)) => Some(processor),
            _ => None,
        }
    }

    /// A handle sampler threads can keep while this profiler is driven from
    /// elsewhere. Valid until the current recording stops.
    pub fn sample_sender(&self) -> Option<SampleSender> {
        self.processor().map(EventsProcessor::sample_sender)
    }

    /// Start recording `title`, spinning up the processor if needed. If the
    /// processor cannot be started the new profile is discarded.
    pub fn start_profiling(&mut self, title: &str, record_samples: bool) -> Result<StartOutcome> {
        let outcome = self.registry.start_profiling(title, record_samples)?;
        match self.engine.take() {
            Some(Engine::Idle(generator)) => {
                let mut builder = thread::Builder::new();
                if let Some(stack_size) = self.processor_stack_size {
                    builder = builder.stack_size(stack_size);
                }
                let capacity = self.config.event_queue_capacity;
                match EventsProcessor::start_with(builder, generator, capacity) {
                    Ok(processor) => self.engine = Some(Engine::Running(processor)),
                    Err(failure) => {
                        self.engine = Some(Engine::Idle(failure.generator));
                        if outcome == StartOutcome::Started {
                            self.registry.cancel_profiling(title);
                        }
                        return Err(failure.error);
                    }
                }
            }
            engine => self.engine = engine,
        }
        Ok(outcome)
    }

    /// Stop recording `title` (empty for the latest profile). The processor
    /// is drained first when this is the last recording profile, so every
    /// queued sample reaches it.
    ///
    /// The profile is finished even if draining fails; the error is returned
    /// and the profile is still listed in [`profiles`](Self::profiles).
    pub fn stop_profiling(&mut self, title: &str) -> Result<Arc<CpuProfile>> {
        let drained = if self.registry.is_last_profile(title) {
            self.stop_processor()
        } else {
            Ok(())
        };
        let profile = self.registry.stop_profiling(title);
        drained?;
        profile.ok_or_else(|| ProfilerError::ProfileNotFound(title.to_string()))
    }

    fn stop_processor(&mut self) -> Result<()> {
        let Some(Engine::Running(processor)) = self.engine.take() else {
            return Ok(());
        };
        match processor.stop() {
            Ok(generator) => {
                self.engine = Some(Engine::Idle(generator));
                Ok(())
            }
            Err(e) => {
                warn!("Events processor lost, code map reset: {}", e);
                self.engine = Some(Engine::Idle(ProfileGenerator::new(
                    self.registry.clone(),
                    &self.config,
                )));
                Err(e)
            }
        }
    }

    /// Forward a code lifecycle event to whichever side owns the code map
    pub fn code_event(&mut self, event: CodeEvent) -> Result<()> {
        match self.engine.as_mut() {
            Some(Engine::Running(processor)) => processor.add_code_event(event),
            Some(Engine::Idle(generator)) => {
                generator.apply_code_event(event);
                Ok(())
            }
            None => Err(ProfilerError::ProcessorStopped),
        }
    }

    /// Queue a tick. Ticks arriving while nothing records are discarded.
    pub fn add_sample(&self, sample: TickSample) -> Result<()> {
        match self.processor() {
            Some(processor) => processor.add_sample(sample),
            None => {
                trace!("Tick discarded, no profile recording");
                Ok(())
            }
        }
    }

    /// Finished profiles in stop order
    pub fn profiles(&self) -> Vec<Arc<CpuProfile>> {
        self.registry.finished_profiles()
    }

    pub fn delete_profile(&self, profile: &Arc<CpuProfile>) -> Result<()> {
        self.registry.remove_profile(profile)
    }
}

impl Drop for CpuProfiler {
    fn drop(&mut self) {
        if self.is_processing() {
            info!("Profiler dropped while recording, stopping processor");
            if let Err(e) = self.stop_processor() {
                warn!("Failed to stop events processor: {}", e);
            }
        }
    }
}
