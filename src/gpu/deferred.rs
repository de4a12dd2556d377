//! Deferred buffer release tied to the submission epoch.
//!
//! Every buffer of an emitter batch is a [`ScopedBuffer`]. Each submission
//! that references it stamps it with that submission's epoch. Dropping the
//! handle does not free the buffer; it parks it in the [`ReleaseQueue`]
//! until the synchronization controller reports that epoch complete.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};

use log::trace;

/// Submission counter value. Epoch 0 means "never submitted".
pub type Epoch = u64;

/// Buffers waiting for their last submission to finish.
#[derive(Debug, Default)]
pub struct ReleaseQueue {
    pending: Mutex<VecDeque<(Epoch, Arc<wgpu::Buffer>)>>,
}

impl ReleaseQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<(Epoch, Arc<wgpu::Buffer>)>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn defer(&self, epoch: Epoch, buffer: Arc<wgpu::Buffer>) {
        self.lock().push_back((epoch, buffer));
    }

    /// Number of buffers still parked.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Destroy every parked buffer whose last use is at or before
    /// `completed`. Returns how many were freed.
    pub fn collect(&self, completed: Epoch) -> usize {
        let mut pending = self.lock();
        let before = pending.len();
        pending.retain(|(epoch, buffer)| {
            if *epoch <= completed {
                buffer.destroy();
                false
            } else {
                true
            }
        });
        let freed = before - pending.len();
        if freed > 0 {
            trace!("released {} buffers up to epoch {}", freed, completed);
        }
        freed
    }

    /// Destroy everything. Only valid once the device is idle.
    pub fn drain(&self) -> usize {
        let mut pending = self.lock();
        let freed = pending.len();
        for (_, buffer) in pending.drain(..) {
            buffer.destroy();
        }
        freed
    }
}

/// A buffer whose release waits for the last submission that used it.
#[derive(Debug)]
pub struct ScopedBuffer {
    buffer: Arc<wgpu::Buffer>,
    last_use: Epoch,
    release: Arc<ReleaseQueue>,
}

impl ScopedBuffer {
    pub fn new(buffer: wgpu::Buffer, release: &Arc<ReleaseQueue>) -> Self {
        Self {
            buffer: Arc::new(buffer),
            last_use: 0,
            release: Arc::clone(release),
        }
    }

    /// Record that the submission `epoch` references this buffer.
    pub fn touch(&mut self, epoch: Epoch) {
        self.last_use = self.last_use.max(epoch);
    }

    pub fn last_use(&self) -> Epoch {
        self.last_use
    }
}

impl Deref for ScopedBuffer {
    type Target = wgpu::Buffer;

    fn deref(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

impl Drop for ScopedBuffer {
    fn drop(&mut self) {
        self.release.defer(self.last_use, Arc::clone(&self.buffer));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::GpuContext;

    fn buffer(device: &wgpu::Device) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Scoped Test Buffer"),
            size: 64,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        })
    }

    #[test]
    fn dropped_buffer_waits_for_its_epoch() {
        let Ok(context) = GpuContext::headless() else {
            eprintln!("skipping: no adapter");
            return;
        };
        let release = ReleaseQueue::new();

        let mut scoped = ScopedBuffer::new(buffer(&context.device), &release);
        scoped.touch(3);
        scoped.touch(5);
        scoped.touch(4);
        assert_eq!(scoped.last_use(), 5);
        drop(scoped);
        assert_eq!(release.len(), 1);

        assert_eq!(release.collect(4), 0);
        assert_eq!(release.len(), 1);

        assert_eq!(release.collect(5), 1);
        assert!(release.is_empty());
    }

    #[test]
    fn collect_frees_only_completed_epochs() {
        let Ok(context) = GpuContext::headless() else {
            eprintln!("skipping: no adapter");
            return;
        };
        let release = ReleaseQueue::new();

        for epoch in [2, 7, 9] {
            let mut scoped = ScopedBuffer::new(buffer(&context.device), &release);
            scoped.touch(epoch);
        }
        assert_eq!(release.len(), 3);
        assert_eq!(release.collect(7), 2);
        assert_eq!(release.len(), 1);
        assert_eq!(release.drain(), 1);
        assert!(release.is_empty());
    }
}
