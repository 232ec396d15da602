use std::borrow::Cow;
use std::fmt;

use wgpu::naga;
use wgpu::naga::front::glsl;
use wgpu::naga::valid::{Capabilities, ValidationFlags, Validator};

use super::program::ProgramError;

/// Pipeline stage a GLSL source is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageKind {
    Vertex,
    Fragment,
    Compute,
}

impl StageKind {
    pub fn naga_stage(self) -> naga::ShaderStage {
        match self {
            StageKind::Vertex => naga::ShaderStage::Vertex,
            StageKind::Fragment => naga::ShaderStage::Fragment,
            StageKind::Compute => naga::ShaderStage::Compute,
        }
    }

    pub fn visibility(self) -> wgpu::ShaderStages {
        match self {
            StageKind::Vertex => wgpu::ShaderStages::VERTEX,
            StageKind::Fragment => wgpu::ShaderStages::FRAGMENT,
            StageKind::Compute => wgpu::ShaderStages::COMPUTE,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageKind::Vertex => "vertex",
            StageKind::Fragment => "fragment",
            StageKind::Compute => "compute",
        };
        f.write_str(name)
    }
}

/// One stage that parsed and validated on its own.
#[derive(Debug)]
pub struct CompiledStage {
    pub kind: StageKind,
    pub module: naga::Module,
    source: String,
}

impl CompiledStage {
    /// Hands the validated source to wgpu. The returned module only has to
    /// live until the pipeline that uses it is created.
    pub(crate) fn create_module(&self, device: &wgpu::Device, label: &str) -> wgpu::ShaderModule {
        device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Glsl {
                shader: Cow::Borrowed(&self.source),
                stage: self.kind.naga_stage(),
                defines: &[],
            },
        })
    }
}

/// Parses and validates one GLSL stage.
///
/// The diagnostic of a failure is naga's report rendered against `source`,
/// with file/line context.
pub fn compile_stage(kind: StageKind, source: &str) -> Result<CompiledStage, ProgramError> {
    let mut frontend = glsl::Frontend::default();
    let options = glsl::Options::from(kind.naga_stage());
    let module = frontend
        .parse(&options, source)
        .map_err(|errors| ProgramError::Compile {
            stage: kind,
            diagnostic: errors.emit_to_string(source),
        })?;

    let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
    validator
        .validate(&module)
        .map_err(|error| ProgramError::Compile {
            stage: kind,
            diagnostic: error.emit_to_string(source),
        })?;

    tracing::trace!(
        stage = %kind,
        globals = module.global_variables.len(),
        entry_points = module.entry_points.len(),
        "compiled stage"
    );

    Ok(CompiledStage {
        kind,
        module,
        source: source.to_string(),
    })
}
