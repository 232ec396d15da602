//! GPU resource wrappers and the two pipeline stages.
//!
//! - `context` owns the wgpu instance/device/queue (`GpuContext`) and, for
//!   windowed runs, the swapchain (`SurfaceTarget`).
//! - `image` and `buffer` are the owned resource types. Storage lives exactly
//!   as long as the wrapper; a resize swaps it for a fresh allocation.
//! - `compile`, `reflect` and `program` turn per-stage GLSL into a linked
//!   pipeline with reflected uniform offsets and resource slots.
//! - `quad` is the full-screen strip the present pass draws.
//! - `stage` holds `ComputeStage` and `PresentStage`, each a program plus the
//!   bindings it needs, recorded into a caller-provided encoder.

mod buffer;
mod compile;
mod context;
mod image;
mod program;
mod quad;
mod reflect;
mod stage;

pub use buffer::{BufferError, BufferKind, GpuBuffer};
pub use compile::{compile_stage, CompiledStage, StageKind};
pub use context::{GpuContext, SurfaceTarget};
pub use image::{ComponentType, GpuImage, ImageError, ImageHandle, ImageUsage, PixelFormat, TransferLayout};
pub use program::{ProgramError, ProgramTarget, ShaderProgram, StageSources, UniformValue, VertexInput};
pub use quad::{FullscreenQuad, QuadVertex, QUAD_VERTICES};
pub use reflect::{
    link, reflect_stage, ProgramInterface, ResourceKind, ResourceSlot, StageInterface, UniformBlockLayout,
    UniformMember, ValueKind,
};
pub use stage::{ComputeParams, ComputeStage, PresentParams, PresentStage, COLOR_SLOT, NORMAL_SLOT};
