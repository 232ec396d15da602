use glam::{Mat4, Vec3};

use crate::types::TileSize;

use super::buffer::BufferError;
use super::context::GpuContext;
use super::image::{GpuImage, PixelFormat};
use super::program::{ProgramTarget, ShaderProgram, StageSources};
use super::quad::FullscreenQuad;

/// Slot of the colour image in both programs.
pub const COLOR_SLOT: u32 = 0;
/// Slot of the normal image in both programs.
pub const NORMAL_SLOT: u32 = 1;

/// Per-frame inputs of the ray-tracing dispatch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComputeParams {
    /// Rotation-only view.
    pub view: Mat4,
    pub projection: Mat4,
    pub position: Vec3,
    pub frame_no: u32,
}

/// Per-frame inputs of the present pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresentParams {
    pub view: Mat4,
    pub projection: Mat4,
}

/// Ray-tracing compute pass writing the colour and normal images.
#[derive(Debug)]
pub struct ComputeStage {
    program: ShaderProgram,
    tile: TileSize,
    image_format: PixelFormat,
}

impl ComputeStage {
    /// Links the compute program and settles the workgroup tile.
    ///
    /// When the program declares a `local_size` different from `tile`, the
    /// program's size wins: dispatching with any other tile would leave
    /// pixels unwritten or write outside the grid the program expects.
    pub fn new(
        context: &GpuContext,
        sources: StageSources,
        tile: TileSize,
        image_format: PixelFormat,
    ) -> Self {
        let program = ShaderProgram::new(context, "raytrace compute", sources, ProgramTarget::Compute);
        let tile = match program.workgroup_size() {
            Some([x, y, _]) if (x, y) != (tile.x, tile.y) => {
                tracing::warn!(
                    configured = %format!("{}x{}", tile.x, tile.y),
                    declared = %format!("{x}x{y}"),
                    "tile size does not match the compute program's local size; using the program's"
                );
                TileSize::new(x, y)
            }
            _ => tile,
        };
        Self {
            program,
            tile,
            image_format,
        }
    }

    pub fn program(&self) -> &ShaderProgram {
        &self.program
    }

    pub fn tile(&self) -> TileSize {
        self.tile
    }

    /// Records the dispatch into `encoder`. The compute pass is closed when
    /// this returns.
    ///
    /// Returns `false` without recording anything when the program cannot
    /// run.
    pub fn execute(
        &mut self,
        context: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        params: &ComputeParams,
        color: &GpuImage,
        normal: &GpuImage,
    ) -> bool {
        let program = &mut self.program;
        program.set_mat4("viewMatrix", params.view);
        program.set_mat4("projMatrix", params.projection);
        program.set_vec3("position", params.position);
        program.set_uint("frameNo", params.frame_no);
        program.bind_image_read_write("screenTexture", color, COLOR_SLOT, self.image_format);
        program.bind_image_read_write("normalTexture", normal, NORMAL_SLOT, self.image_format);
        if !program.prepare(context) {
            return false;
        }

        let [x, y, z] = self.tile.workgroups_for(color.width(), color.height());
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("raytrace dispatch"),
            timestamp_writes: None,
        });
        if !program.bind_compute(&mut pass) {
            return false;
        }
        pass.dispatch_workgroups(x, y, z);
        tracing::trace!(x, y, z, "dispatched compute");
        true
    }
}

/// Full-screen pass sampling the colour and normal images.
#[derive(Debug)]
pub struct PresentStage {
    program: ShaderProgram,
    quad: FullscreenQuad,
    color_format: wgpu::TextureFormat,
}

impl PresentStage {
    pub fn new(
        context: &GpuContext,
        sources: StageSources,
        color_format: wgpu::TextureFormat,
    ) -> Result<Self, BufferError> {
        let program = ShaderProgram::new(
            context,
            "present quad",
            sources,
            ProgramTarget::Render {
                color_format,
                vertex: FullscreenQuad::vertex_input(),
            },
        );
        let quad = FullscreenQuad::new(context)?;
        Ok(Self {
            program,
            quad,
            color_format,
        })
    }

    pub fn program(&self) -> &ShaderProgram {
        &self.program
    }

    pub fn color_format(&self) -> wgpu::TextureFormat {
        self.color_format
    }

    /// Records the present pass into `encoder`, drawing onto `target`.
    ///
    /// The target is always cleared to black; the quad is only drawn when the
    /// program can run. Returns whether it was drawn.
    pub fn execute(
        &mut self,
        context: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        params: &PresentParams,
        color: &GpuImage,
        normal: &GpuImage,
        target: &wgpu::TextureView,
    ) -> bool {
        let program = &mut self.program;
        program.set_mat4("view", params.view);
        program.set_mat4("projection", params.projection);
        program.bind_image_sampled("screenTexture", color, COLOR_SLOT);
        program.bind_image_sampled("normalTexture", normal, NORMAL_SLOT);
        let ready = program.prepare(context);

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("present pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        if !ready || !program.bind_render(&mut pass) {
            return false;
        }
        self.quad.draw(&mut pass);
        true
    }
}
