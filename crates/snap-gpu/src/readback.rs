//! Asynchronous readback bookkeeping.
//!
//! Each asynchronous readback copies pixels into a pixel-pack buffer
//! bracketed by a completion query, then waits in a FIFO queue. Polling
//! the queue maps the buffers of completed entries, writes them into the
//! caller's destination and hands the callbacks back to the helper, which
//! runs them after releasing the queue. Callbacks never run inside the call
//! that issued the readback.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use snap_core::pixel::Plane;
use snap_core::{PixelFormat, Rect, VideoFrame};
use tracing::{debug, trace, warn};

use crate::device::{BufferTarget, GraphicsDevice, QueryTarget};
use crate::handles::{ScopedBuffer, ScopedBufferBinder, ScopedQuery};
use crate::{GpuError, GpuResult};

/// Host pixel destination shared with the completion callback.
pub type SharedPixels = Arc<Mutex<Vec<u8>>>;

/// Planar frame destination shared with the completion callback.
pub type SharedFrame = Arc<Mutex<VideoFrame>>;

/// Completion callback; receives `true` when the destination holds the result.
pub type ReadbackCallback = Box<dyn FnOnce(bool) + Send + 'static>;

/// Where the bytes of one transfer go.
pub(crate) enum ReadbackDestination {
    /// Tightly packed pixels. `swap_red_blue` converts RGBA to BGRA on delivery.
    Pixels {
        out: SharedPixels,
        swap_red_blue: bool,
    },
    /// Packed plane rows (four samples per texel) unpacked into a frame plane.
    FramePlane {
        frame: SharedFrame,
        plane: Plane,
        /// Offset of the first sample in the plane.
        x: u32,
        y: u32,
        /// Logical samples per row.
        width: u32,
    },
}

/// One transfer: a buffer holding `rect` of a framebuffer in `format`.
pub(crate) struct ReadbackPart<'d, D: GraphicsDevice> {
    buffer: ScopedBuffer<'d, D>,
    query: ScopedQuery<'d, D>,
    rect: Rect,
    format: PixelFormat,
    destination: ReadbackDestination,
}

impl<'d, D: GraphicsDevice> ReadbackPart<'d, D> {
    /// Queues a read of `rect` from the bound framebuffer.
    pub fn issue(
        device: &'d D,
        rect: Rect,
        format: PixelFormat,
        destination: ReadbackDestination,
    ) -> GpuResult<Self> {
        let buffer = ScopedBuffer::new(device);
        let query = ScopedQuery::new(device);
        if buffer.is_null() || query.is_null() {
            return Err(GpuError::ContextLost);
        }

        device.begin_query(QueryTarget::CommandsCompleted, query.id());
        let result = {
            let _bound =
                ScopedBufferBinder::new(device, BufferTarget::PixelPackTransfer, buffer.id());
            device.read_pixels_to_buffer(rect, format)
        };
        device.end_query(QueryTarget::CommandsCompleted);
        result?;

        trace!(%rect, %format, "readback issued");
        Ok(Self {
            buffer,
            query,
            rect,
            format,
            destination,
        })
    }

    fn is_complete(&self, device: &D) -> bool {
        device.query_result_available(self.query.id())
    }

    /// Maps the buffer and writes the destination.
    fn deliver(&self, device: &D) -> GpuResult<()> {
        let bytes = {
            let _bound =
                ScopedBufferBinder::new(device, BufferTarget::PixelPackTransfer, self.buffer.id());
            device.map_buffer(BufferTarget::PixelPackTransfer)?
        };
        match &self.destination {
            ReadbackDestination::Pixels { out, swap_red_blue } => {
                let mut out = out.lock().unwrap_or_else(PoisonError::into_inner);
                let len = bytes.len().min(out.len());
                out[..len].copy_from_slice(&bytes[..len]);
                if *swap_red_blue {
                    for texel in out[..len].chunks_exact_mut(4) {
                        texel.swap(0, 2);
                    }
                }
            }
            ReadbackDestination::FramePlane {
                frame,
                plane,
                x,
                y,
                width,
            } => {
                let mut frame = frame.lock().unwrap_or_else(PoisonError::into_inner);
                let target = frame.plane_mut(*plane);
                let row_bytes = self.rect.width as usize * self.format.bytes_per_pixel();
                let (x, width) = (*x as usize, *width as usize);
                for (row, src) in bytes.chunks_exact(row_bytes).enumerate() {
                    let dst = target.row_mut(y + row as u32);
                    dst[x..x + width].copy_from_slice(&src[..width]);
                }
            }
        }
        Ok(())
    }
}

/// An issued readback awaiting completion.
pub(crate) struct PendingReadback<'d, D: GraphicsDevice> {
    parts: Vec<ReadbackPart<'d, D>>,
    callback: ReadbackCallback,
}

impl<'d, D: GraphicsDevice> PendingReadback<'d, D> {
    pub fn new(parts: Vec<ReadbackPart<'d, D>>, callback: ReadbackCallback) -> Self {
        Self { parts, callback }
    }

    /// Reports failure, then releases the transfer buffers and queries.
    pub fn fail(self) {
        let Self { parts, callback } = self;
        callback(false);
        drop(parts);
    }
}

/// FIFO queue of pending readbacks, shared by the helper and its YUV pipelines.
pub(crate) struct ReadbackQueue<'d, D: GraphicsDevice> {
    device: &'d D,
    pending: VecDeque<PendingReadback<'d, D>>,
    closed: bool,
}

impl<'d, D: GraphicsDevice> ReadbackQueue<'d, D> {
    pub fn new(device: &'d D) -> Self {
        Self {
            device,
            pending: VecDeque::new(),
            closed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Adds a readback; fails once the owning helper is gone.
    pub fn push(&mut self, readback: PendingReadback<'d, D>) -> GpuResult<()> {
        if self.closed {
            return Err(GpuError::HelperDestroyed);
        }
        self.pending.push_back(readback);
        Ok(())
    }

    /// Removes completed readbacks in issue order and returns their callbacks
    /// with the outcome. Stops at the first incomplete entry. On a lost
    /// context every entry fails.
    ///
    /// GPU objects of the removed entries are released before returning.
    pub fn take_completed(&mut self) -> Vec<(ReadbackCallback, bool)> {
        let mut done = Vec::new();
        if self.device.is_context_lost() {
            if !self.pending.is_empty() {
                warn!(count = self.pending.len(), "Context lost with pending readbacks");
            }
            done.extend(self.pending.drain(..).map(|p| (p.callback, false)));
            return done;
        }

        while let Some(front) = self.pending.front() {
            if !front.parts.iter().all(|part| part.is_complete(self.device)) {
                break;
            }
            let Some(readback) = self.pending.pop_front() else {
                break;
            };
            let mut success = true;
            for part in &readback.parts {
                if let Err(err) = part.deliver(self.device) {
                    warn!(error = %err, "Readback delivery failed");
                    success = false;
                    break;
                }
            }
            debug!(parts = readback.parts.len(), success, "Readback completed");
            done.push((readback.callback, success));
        }
        done
    }

    /// Closes the queue and hands back every pending readback, to be failed.
    pub fn close(&mut self) -> Vec<PendingReadback<'d, D>> {
        self.closed = true;
        self.pending.drain(..).collect()
    }
}

/// Runs callbacks collected from the queue.
pub(crate) fn dispatch(callbacks: Vec<(ReadbackCallback, bool)>) -> usize {
    let count = callbacks.len();
    for (callback, success) in callbacks {
        callback(success);
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{FramebufferTarget, TextureId};
    use crate::handles::{ScopedFramebuffer, ScopedFramebufferBinder};
    use crate::soft::SoftDevice;
    use snap_core::Size;

    fn texture(device: &SoftDevice, value: u8) -> TextureId {
        device
            .create_texture_with_data(Size::new(2, 1), PixelFormat::Rgba8, &[value; 8])
            .unwrap()
    }

    fn issue<'d>(
        device: &'d SoftDevice,
        source: TextureId,
        out: &SharedPixels,
    ) -> ReadbackPart<'d, SoftDevice> {
        let fb = ScopedFramebuffer::new(device);
        let _bound = ScopedFramebufferBinder::new(device, FramebufferTarget::Framebuffer, fb.id());
        device.framebuffer_texture_2d(FramebufferTarget::Framebuffer, 0, source);
        ReadbackPart::issue(
            device,
            Rect::new(0, 0, 2, 1),
            PixelFormat::Rgba8,
            ReadbackDestination::Pixels {
                out: out.clone(),
                swap_red_blue: false,
            },
        )
        .unwrap()
    }

    fn recorder(log: &Arc<Mutex<Vec<(usize, bool)>>>, index: usize) -> ReadbackCallback {
        let log = log.clone();
        Box::new(move |ok| log.lock().unwrap().push((index, ok)))
    }

    #[test]
    fn test_fifo_after_flush() {
        let device = SoftDevice::new();
        let mut queue = ReadbackQueue::new(&device);
        let log = Arc::new(Mutex::new(Vec::new()));
        let outs: Vec<SharedPixels> = (0..2).map(|_| Arc::new(Mutex::new(vec![0; 8]))).collect();

        for (i, out) in outs.iter().enumerate() {
            let part = issue(&device, texture(&device, 10 * (i as u8 + 1)), out);
            queue
                .push(PendingReadback::new(vec![part], recorder(&log, i)))
                .unwrap();
        }
        assert!(queue.take_completed().is_empty());
        assert_eq!(queue.len(), 2);

        device.flush();
        assert_eq!(dispatch(queue.take_completed()), 2);
        assert_eq!(*log.lock().unwrap(), [(0, true), (1, true)]);
        assert_eq!(outs[1].lock().unwrap()[0], 20);
        assert_eq!(device.stats().buffers, 0);
        assert_eq!(device.stats().queries, 0);
    }

    #[test]
    fn test_incomplete_head_blocks_queue() {
        let device = SoftDevice::new();
        let mut queue = ReadbackQueue::new(&device);
        let log = Arc::new(Mutex::new(Vec::new()));
        let out: SharedPixels = Arc::new(Mutex::new(vec![0; 8]));

        let first = issue(&device, texture(&device, 1), &out);
        queue
            .push(PendingReadback::new(vec![first], recorder(&log, 0)))
            .unwrap();
        device.flush();
        let second = issue(&device, texture(&device, 2), &out);
        queue
            .push(PendingReadback::new(vec![second], recorder(&log, 1)))
            .unwrap();

        assert_eq!(dispatch(queue.take_completed()), 1);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_context_loss_fails_everything() {
        let device = SoftDevice::new();
        let mut queue = ReadbackQueue::new(&device);
        let log = Arc::new(Mutex::new(Vec::new()));
        let out: SharedPixels = Arc::new(Mutex::new(vec![0; 8]));
        let part = issue(&device, texture(&device, 1), &out);
        queue
            .push(PendingReadback::new(vec![part], recorder(&log, 0)))
            .unwrap();

        device.lose_context();
        device.flush();
        assert_eq!(dispatch(queue.take_completed()), 1);
        assert_eq!(*log.lock().unwrap(), [(0, false)]);
    }

    #[test]
    fn test_closed_queue_rejects() {
        let device = SoftDevice::new();
        let mut queue = ReadbackQueue::new(&device);
        let log = Arc::new(Mutex::new(Vec::new()));
        let out: SharedPixels = Arc::new(Mutex::new(vec![0; 8]));
        let part = issue(&device, texture(&device, 1), &out);
        queue
            .push(PendingReadback::new(vec![part], recorder(&log, 0)))
            .unwrap();

        for pending in queue.close() {
            pending.fail();
        }
        assert!(queue.is_closed());
        assert_eq!(*log.lock().unwrap(), [(0, false)]);

        let late = issue(&device, texture(&device, 1), &out);
        let err = queue
            .push(PendingReadback::new(vec![late], recorder(&log, 1)))
            .unwrap_err();
        assert!(matches!(err, GpuError::HelperDestroyed));
    }
}
