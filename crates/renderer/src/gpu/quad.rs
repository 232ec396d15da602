use bytemuck::{Pod, Zeroable};

use super::buffer::{BufferError, BufferKind, GpuBuffer};
use super::context::GpuContext;
use super::program::VertexInput;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 2],
}

/// Triangle-strip order covering normalised device coordinates.
pub const QUAD_VERTICES: [QuadVertex; 4] = [
    QuadVertex {
        position: [-1.0, -1.0],
    },
    QuadVertex {
        position: [1.0, -1.0],
    },
    QuadVertex {
        position: [-1.0, 1.0],
    },
    QuadVertex {
        position: [1.0, 1.0],
    },
];

/// Four-vertex full-screen strip, drawn without an index buffer.
#[derive(Debug)]
pub struct FullscreenQuad {
    vertices: GpuBuffer,
}

impl FullscreenQuad {
    pub fn new(context: &GpuContext) -> Result<Self, BufferError> {
        let vertices = GpuBuffer::with_contents(
            context,
            "fullscreen quad",
            BufferKind::Vertex,
            bytemuck::cast_slice(&QUAD_VERTICES),
        )?;
        Ok(Self { vertices })
    }

    /// Layout of the quad's vertex buffer: one `vec2` at location 0.
    pub fn vertex_input() -> VertexInput {
        VertexInput {
            stride: std::mem::size_of::<QuadVertex>() as u64,
            attributes: vec![wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32x2,
                offset: 0,
                shader_location: 0,
            }],
        }
    }

    pub fn vertex_count(&self) -> u32 {
        QUAD_VERTICES.len() as u32
    }

    pub(crate) fn draw(&self, pass: &mut wgpu::RenderPass<'_>) {
        pass.set_vertex_buffer(0, self.vertices.raw().slice(..));
        pass.draw(0..self.vertex_count(), 0..1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_spans_the_whole_viewport() {
        let xs: Vec<f32> = QUAD_VERTICES.iter().map(|v| v.position[0]).collect();
        let ys: Vec<f32> = QUAD_VERTICES.iter().map(|v| v.position[1]).collect();
        assert_eq!(xs, vec![-1.0, 1.0, -1.0, 1.0]);
        assert_eq!(ys, vec![-1.0, -1.0, 1.0, 1.0]);
    }

    #[test]
    fn layout_matches_vertex_size() {
        let input = FullscreenQuad::vertex_input();
        assert_eq!(input.stride, 8);
        assert_eq!(input.attributes.len(), 1);
        assert_eq!(input.attributes[0].shader_location, 0);
    }
}
