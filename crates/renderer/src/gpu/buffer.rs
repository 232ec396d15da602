use thiserror::Error;

use super::context::GpuContext;

/// What a linear buffer is used for; decides its wgpu usage flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Vertex,
    Index,
    Storage,
    Uniform,
    Readback,
}

impl BufferKind {
    pub fn usage(self) -> wgpu::BufferUsages {
        match self {
            BufferKind::Vertex => wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            BufferKind::Index => wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
            BufferKind::Storage => {
                wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC
            }
            BufferKind::Uniform => wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            BufferKind::Readback => wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        }
    }
}

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("buffer '{label}' could not be allocated: {message}")]
    Allocation { label: String, message: String },
    #[error("buffer '{label}' is not mappable for reading")]
    NotReadable { label: String },
    #[error("buffer '{label}' can only be filled by the GPU")]
    NotWritable { label: String },
    #[error("mapping buffer '{label}' failed: {source}")]
    Map {
        label: String,
        #[source]
        source: wgpu::BufferAsyncError,
    },
    #[error("mapping buffer '{label}' was cancelled")]
    MapCancelled { label: String },
}

/// Owned linear device buffer.
///
/// Dropping the wrapper drops the wgpu buffer; there is no way to observe a
/// released buffer through it.
#[derive(Debug)]
pub struct GpuBuffer {
    label: String,
    kind: BufferKind,
    buffer: wgpu::Buffer,
    len: u64,
}

impl GpuBuffer {
    /// Allocates `size` bytes (rounded up to the copy alignment).
    pub fn new(
        context: &GpuContext,
        label: &str,
        kind: BufferKind,
        size: u64,
    ) -> Result<Self, BufferError> {
        let buffer = allocate(context, label, kind, size)?;
        Ok(Self {
            label: label.to_string(),
            kind,
            buffer,
            len: 0,
        })
    }

    /// Allocates a buffer holding `data`.
    pub fn with_contents(
        context: &GpuContext,
        label: &str,
        kind: BufferKind,
        data: &[u8],
    ) -> Result<Self, BufferError> {
        let mut buffer = Self::new(context, label, kind, data.len() as u64)?;
        buffer.upload(context, data)?;
        Ok(buffer)
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Bytes last uploaded.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> u64 {
        self.buffer.size()
    }

    pub fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Writes `data` at offset zero, reallocating when it no longer fits.
    pub fn upload(&mut self, context: &GpuContext, data: &[u8]) -> Result<(), BufferError> {
        if self.kind == BufferKind::Readback {
            return Err(BufferError::NotWritable {
                label: self.label.clone(),
            });
        }
        let needed = data.len() as u64;
        if needed > self.buffer.size() {
            tracing::debug!(label = %self.label, old = self.buffer.size(), new = needed, "growing buffer");
            self.buffer = allocate(context, &self.label, self.kind, needed)?;
        }
        if !data.is_empty() {
            let aligned = align_up(needed, wgpu::COPY_BUFFER_ALIGNMENT);
            if aligned == needed {
                context.queue.write_buffer(&self.buffer, 0, data);
            } else {
                let mut padded = data.to_vec();
                padded.resize(aligned as usize, 0);
                context.queue.write_buffer(&self.buffer, 0, &padded);
            }
        }
        self.len = needed;
        Ok(())
    }

    pub fn binding(&self) -> wgpu::BindingResource<'_> {
        self.buffer.as_entire_binding()
    }

    /// Maps a readback buffer and copies out its first `len` bytes.
    ///
    /// Blocks until the GPU has finished all submitted work.
    pub fn read(&self, context: &GpuContext, len: u64) -> Result<Vec<u8>, BufferError> {
        if self.kind != BufferKind::Readback {
            return Err(BufferError::NotReadable {
                label: self.label.clone(),
            });
        }
        let len = len.min(self.buffer.size());
        let slice = self.buffer.slice(..);
        let (sender, receiver) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        context.wait_idle();

        match receiver.recv() {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                return Err(BufferError::Map {
                    label: self.label.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(BufferError::MapCancelled {
                    label: self.label.clone(),
                })
            }
        }

        let bytes = {
            let mapped = slice.get_mapped_range();
            mapped[..len as usize].to_vec()
        };
        self.buffer.unmap();
        Ok(bytes)
    }
}

fn allocate(
    context: &GpuContext,
    label: &str,
    kind: BufferKind,
    size: u64,
) -> Result<wgpu::Buffer, BufferError> {
    let size = align_up(size.max(wgpu::COPY_BUFFER_ALIGNMENT), wgpu::COPY_BUFFER_ALIGNMENT);
    let (buffer, error) = context.scoped(|device| {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: kind.usage(),
            mapped_at_creation: false,
        })
    });
    match error {
        None => Ok(buffer),
        Some(source) => {
            tracing::error!(label, size, error = %source, "buffer allocation failed");
            Err(BufferError::Allocation {
                label: label.to_string(),
                message: source.to_string(),
            })
        }
    }
}

pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_rounds_up() {
        assert_eq!(align_up(0, 4), 0);
        assert_eq!(align_up(1, 4), 4);
        assert_eq!(align_up(4, 4), 4);
        assert_eq!(align_up(257, 256), 512);
    }

    #[test]
    fn readback_buffers_are_mappable_only() {
        let usage = BufferKind::Readback.usage();
        assert!(usage.contains(wgpu::BufferUsages::MAP_READ));
        assert!(!usage.contains(wgpu::BufferUsages::UNIFORM));
        assert!(BufferKind::Uniform.usage().contains(wgpu::BufferUsages::COPY_DST));
    }
}
