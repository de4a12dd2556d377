//! Fence-gated submission and blocking counter readback.
//!
//! The tick stays blocking: the host submits, waits on the queue's
//! completion callback, copies the counter to host-visible memory, waits
//! again and maps it. Every wait is bounded by the configured timeout, and
//! a wait that runs out is reported as [`ParticleError::DeviceTimeout`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};

use super::deferred::{Epoch, ReleaseQueue};
use crate::counter::ParticleCounter;
use crate::error::ParticleError;

/// Owns the submission epochs and the blocking waits.
#[derive(Debug)]
pub struct SynchronizationController {
    timeout: Duration,
    submitted: Epoch,
    completed: Arc<AtomicU64>,
    release: Arc<ReleaseQueue>,
}

impl SynchronizationController {
    pub fn new(timeout: Duration, release: Arc<ReleaseQueue>) -> Self {
        Self {
            timeout,
            submitted: 0,
            completed: Arc::new(AtomicU64::new(0)),
            release,
        }
    }

    /// Epoch of the most recent submission.
    pub fn submitted(&self) -> Epoch {
        self.submitted
    }

    /// Highest epoch the device has finished.
    pub fn completed(&self) -> Epoch {
        self.completed.load(Ordering::Acquire)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Submit `encoder` and block until the device has executed it.
    ///
    /// Returns the epoch of the submission. Buffers parked at or before
    /// that epoch are released on the way out.
    pub fn submit_and_wait(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: wgpu::CommandEncoder,
        stage: &'static str,
    ) -> Result<Epoch, ParticleError> {
        self.submitted += 1;
        let epoch = self.submitted;

        queue.submit(Some(encoder.finish()));

        let (tx, rx) = mpsc::channel();
        let completed = Arc::clone(&self.completed);
        queue.on_submitted_work_done(move || {
            completed.fetch_max(epoch, Ordering::AcqRel);
            let _ = tx.send(());
        });

        self.wait(device, &rx, stage)?;
        self.release.collect(self.completed());
        Ok(epoch)
    }

    /// Map the host-visible counter and read it.
    ///
    /// The copy into `counter_host` must already have completed.
    pub fn read_counter(
        &self,
        device: &wgpu::Device,
        counter_host: &wgpu::Buffer,
    ) -> Result<ParticleCounter, ParticleError> {
        let bytes = self.read_bytes(device, counter_host, "counter readback")?;
        let size = std::mem::size_of::<ParticleCounter>();
        if bytes.len() < size {
            return Err(ParticleError::DeviceLost {
                stage: "counter readback",
                reason: format!("mapped {} bytes, expected {}", bytes.len(), size),
            });
        }
        Ok(bytemuck::pod_read_unaligned(&bytes[..size]))
    }

    /// Map a whole `MAP_READ` buffer, copy it out and unmap it.
    pub fn read_bytes(
        &self,
        device: &wgpu::Device,
        buffer: &wgpu::Buffer,
        stage: &'static str,
    ) -> Result<Vec<u8>, ParticleError> {
        let slice = buffer.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        self.wait(device, &rx, stage)?
            .map_err(|e| ParticleError::DeviceLost {
                stage,
                reason: e.to_string(),
            })?;

        let data = {
            let mapped = slice.get_mapped_range();
            mapped.to_vec()
        };
        buffer.unmap();
        Ok(data)
    }

    /// Block until every submission so far has finished, ignoring the
    /// timeout. Used on teardown.
    pub fn wait_idle(&self, device: &wgpu::Device) {
        let _ = device.poll(wgpu::Maintain::Wait);
        self.completed.fetch_max(self.submitted, Ordering::AcqRel);
    }

    fn wait<T>(
        &self,
        device: &wgpu::Device,
        rx: &Receiver<T>,
        stage: &'static str,
    ) -> Result<T, ParticleError> {
        let start = Instant::now();
        loop {
            match rx.try_recv() {
                Ok(value) => {
                    debug!("{} complete after {:?}", stage, start.elapsed());
                    return Ok(value);
                }
                Err(TryRecvError::Disconnected) => {
                    return Err(ParticleError::DeviceLost {
                        stage,
                        reason: "completion callback dropped without firing".into(),
                    });
                }
                Err(TryRecvError::Empty) => {}
            }

            let waited = start.elapsed();
            if waited >= self.timeout {
                warn!("{} exceeded {:?}", stage, self.timeout);
                return Err(ParticleError::DeviceTimeout {
                    stage,
                    waited_ms: waited.as_millis() as u64,
                });
            }

            let _ = device.poll(wgpu::Maintain::Poll);
            std::thread::yield_now();
        }
    }
}
