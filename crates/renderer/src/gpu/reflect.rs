//! Program interface recovered from the naga modules of each stage.
//!
//! This is what the rest of the crate knows about a program: where each named
//! uniform lives in its block, which `(group, binding)` slots it declares, the
//! vertex inputs it expects and the compute workgroup size. Linking is the
//! check that the stages' interfaces agree with each other.

use std::collections::{BTreeMap, BTreeSet};

use wgpu::naga;

use super::compile::{CompiledStage, StageKind};
use super::program::ProgramError;

/// Scalar, vector and matrix shapes a uniform member can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Float,
    Int,
    Uint,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
    Other,
}

impl ValueKind {
    fn of(inner: &naga::TypeInner) -> Self {
        use naga::{ScalarKind, TypeInner, VectorSize};
        match *inner {
            TypeInner::Scalar(scalar) if scalar.width == 4 => match scalar.kind {
                ScalarKind::Float => ValueKind::Float,
                ScalarKind::Sint => ValueKind::Int,
                ScalarKind::Uint => ValueKind::Uint,
                _ => ValueKind::Other,
            },
            TypeInner::Vector { size, scalar } if scalar == naga::Scalar::F32 => match size {
                VectorSize::Bi => ValueKind::Vec2,
                VectorSize::Tri => ValueKind::Vec3,
                VectorSize::Quad => ValueKind::Vec4,
            },
            TypeInner::Matrix {
                columns: VectorSize::Quad,
                rows: VectorSize::Quad,
                scalar,
            } if scalar == naga::Scalar::F32 => ValueKind::Mat4,
            _ => ValueKind::Other,
        }
    }

    /// Vertex attribute format for an input of this kind.
    pub fn vertex_format(self) -> Option<wgpu::VertexFormat> {
        match self {
            ValueKind::Float => Some(wgpu::VertexFormat::Float32),
            ValueKind::Vec2 => Some(wgpu::VertexFormat::Float32x2),
            ValueKind::Vec3 => Some(wgpu::VertexFormat::Float32x3),
            ValueKind::Vec4 => Some(wgpu::VertexFormat::Float32x4),
            ValueKind::Int => Some(wgpu::VertexFormat::Sint32),
            ValueKind::Uint => Some(wgpu::VertexFormat::Uint32),
            ValueKind::Mat4 | ValueKind::Other => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformMember {
    pub name: String,
    pub offset: u32,
    pub kind: ValueKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBlockLayout {
    pub group: u32,
    pub binding: u32,
    pub span: u32,
    pub members: Vec<UniformMember>,
}

/// What sits in a `(group, binding)` slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    StorageImage {
        format: naga::StorageFormat,
        access: naga::StorageAccess,
    },
    SampledTexture,
    Sampler,
    UniformBlock,
}

impl ResourceKind {
    fn describe(&self) -> &'static str {
        match self {
            ResourceKind::StorageImage { .. } => "storage image",
            ResourceKind::SampledTexture => "sampled texture",
            ResourceKind::Sampler => "sampler",
            ResourceKind::UniformBlock => "uniform block",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSlot {
    pub name: Option<String>,
    pub group: u32,
    pub binding: u32,
    pub kind: ResourceKind,
    pub visibility: wgpu::ShaderStages,
}

/// Interface of one compiled stage.
#[derive(Debug, Clone)]
pub struct StageInterface {
    pub kind: StageKind,
    pub has_main: bool,
    pub resources: Vec<ResourceSlot>,
    pub uniform_blocks: Vec<UniformBlockLayout>,
    /// Input locations and their shapes.
    pub inputs: BTreeMap<u32, ValueKind>,
    /// Output locations written by the stage.
    pub outputs: BTreeSet<u32>,
    pub workgroup_size: Option<[u32; 3]>,
}

/// Reflects one stage; fails on resource types the frame loop cannot bind.
pub fn reflect_stage(stage: &CompiledStage) -> Result<StageInterface, ProgramError> {
    let module = &stage.module;
    let kind = stage.kind;
    let mut interface = StageInterface {
        kind,
        has_main: false,
        resources: Vec::new(),
        uniform_blocks: Vec::new(),
        inputs: BTreeMap::new(),
        outputs: BTreeSet::new(),
        workgroup_size: None,
    };

    for (_, global) in module.global_variables.iter() {
        let Some(binding) = global.binding.as_ref() else {
            continue;
        };
        let inner = &module.types[global.ty].inner;
        let label = global.name.clone().unwrap_or_else(|| "<unnamed>".into());
        let resource = match global.space {
            naga::AddressSpace::Uniform => {
                interface
                    .uniform_blocks
                    .push(uniform_block(module, inner, binding));
                ResourceKind::UniformBlock
            }
            naga::AddressSpace::Handle => handle_kind(inner).map_err(|reason| ProgramError::Link(
                format!("{kind} stage resource '{label}' ({}, {}): {reason}", binding.group, binding.binding),
            ))?,
            other => {
                return Err(ProgramError::Link(format!(
                    "{kind} stage resource '{label}' uses unsupported address space {other:?}"
                )))
            }
        };
        interface.resources.push(ResourceSlot {
            name: global.name.clone(),
            group: binding.group,
            binding: binding.binding,
            kind: resource,
            visibility: kind.visibility(),
        });
    }

    let entry = module
        .entry_points
        .iter()
        .find(|entry| entry.name == "main" && entry.stage == kind.naga_stage());
    if let Some(entry) = entry {
        interface.has_main = true;
        if kind == StageKind::Compute {
            interface.workgroup_size = Some(entry.workgroup_size);
        }
        for argument in &entry.function.arguments {
            collect_locations(
                module,
                argument.binding.as_ref(),
                argument.ty,
                &mut |location, value| {
                    interface.inputs.insert(location, value);
                },
            );
        }
        if let Some(result) = entry.function.result.as_ref() {
            collect_locations(module, result.binding.as_ref(), result.ty, &mut |location, _| {
                interface.outputs.insert(location);
            });
        }
    }

    Ok(interface)
}

fn uniform_block(
    module: &naga::Module,
    inner: &naga::TypeInner,
    binding: &naga::ResourceBinding,
) -> UniformBlockLayout {
    let (members, span) = match inner {
        naga::TypeInner::Struct { members, span } => (
            members
                .iter()
                .filter_map(|member| {
                    member.name.as_ref().map(|name| UniformMember {
                        name: name.clone(),
                        offset: member.offset,
                        kind: ValueKind::of(&module.types[member.ty].inner),
                    })
                })
                .collect(),
            *span,
        ),
        other => (Vec::new(), other.size(module.to_ctx())),
    };
    UniformBlockLayout {
        group: binding.group,
        binding: binding.binding,
        span,
        members,
    }
}

fn handle_kind(inner: &naga::TypeInner) -> Result<ResourceKind, String> {
    use naga::{ImageClass, ImageDimension, ScalarKind, TypeInner};
    match *inner {
        TypeInner::Image {
            dim: ImageDimension::D2,
            arrayed: false,
            class,
        } => match class {
            ImageClass::Storage { format, access } => {
                Ok(ResourceKind::StorageImage { format, access })
            }
            ImageClass::Sampled {
                kind: ScalarKind::Float,
                multi: false,
            } => Ok(ResourceKind::SampledTexture),
            _ => Err("only float 2D textures and 2D storage images are supported".into()),
        },
        TypeInner::Image { .. } => Err("only non-arrayed 2D images are supported".into()),
        TypeInner::Sampler { comparison: false } => Ok(ResourceKind::Sampler),
        TypeInner::Sampler { comparison: true } => Err("comparison samplers are not supported".into()),
        _ => Err("unsupported handle type".into()),
    }
}

fn collect_locations(
    module: &naga::Module,
    binding: Option<&naga::Binding>,
    ty: naga::Handle<naga::Type>,
    sink: &mut dyn FnMut(u32, ValueKind),
) {
    let inner = &module.types[ty].inner;
    match binding {
        Some(naga::Binding::Location { location, .. }) => sink(*location, ValueKind::of(inner)),
        Some(_) => {}
        None => {
            if let naga::TypeInner::Struct { members, .. } = inner {
                for member in members {
                    collect_locations(module, member.binding.as_ref(), member.ty, sink);
                }
            }
        }
    }
}

/// Interface of a linked program.
#[derive(Debug, Clone)]
pub struct ProgramInterface {
    pub stages: Vec<StageKind>,
    /// One entry per `(group, binding)`, visibility merged across stages.
    pub resources: Vec<ResourceSlot>,
    pub uniform_blocks: Vec<UniformBlockLayout>,
    pub vertex_inputs: BTreeMap<u32, ValueKind>,
    pub workgroup_size: Option<[u32; 3]>,
}

impl ProgramInterface {
    pub fn is_compute(&self) -> bool {
        self.stages == [StageKind::Compute]
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceSlot> {
        self.resources
            .iter()
            .find(|slot| slot.name.as_deref() == Some(name))
    }

    /// Finds the block and member a uniform name resolves to.
    pub fn uniform(&self, name: &str) -> Option<(usize, &UniformMember)> {
        self.uniform_blocks
            .iter()
            .enumerate()
            .find_map(|(index, block)| {
                block
                    .members
                    .iter()
                    .find(|member| member.name == name)
                    .map(|member| (index, member))
            })
    }

    pub fn group_count(&self) -> u32 {
        self.resources
            .iter()
            .map(|slot| slot.group + 1)
            .max()
            .unwrap_or(0)
    }
}

/// Checks that the stages form one program and merges their interfaces.
///
/// A program is either a lone compute stage or a vertex + fragment pair; each
/// stage must have a `main` of its kind; every fragment input must be written
/// by the vertex stage; a slot shared by both stages must hold the same kind
/// of resource.
pub fn link(stages: &[StageInterface]) -> Result<ProgramInterface, ProgramError> {
    let mut kinds: Vec<StageKind> = stages.iter().map(|stage| stage.kind).collect();
    kinds.sort();
    let valid_set = kinds == [StageKind::Compute] || kinds == [StageKind::Vertex, StageKind::Fragment];
    if !valid_set {
        let names: Vec<String> = kinds.iter().map(ToString::to_string).collect();
        return Err(ProgramError::Link(format!(
            "a program needs exactly one compute stage or one vertex and one fragment stage, got [{}]",
            names.join(", ")
        )));
    }

    for stage in stages {
        if !stage.has_main {
            return Err(ProgramError::Link(format!(
                "{} stage has no 'main' entry point",
                stage.kind
            )));
        }
    }

    let vertex = stages.iter().find(|stage| stage.kind == StageKind::Vertex);
    let fragment = stages.iter().find(|stage| stage.kind == StageKind::Fragment);
    if let (Some(vertex), Some(fragment)) = (vertex, fragment) {
        for location in fragment.inputs.keys() {
            if !vertex.outputs.contains(location) {
                return Err(ProgramError::Link(format!(
                    "fragment input at location {location} is not written by the vertex stage"
                )));
            }
        }
    }

    let mut resources: BTreeMap<(u32, u32), ResourceSlot> = BTreeMap::new();
    let mut uniform_blocks: Vec<UniformBlockLayout> = Vec::new();
    for stage in stages {
        for slot in &stage.resources {
            match resources.get_mut(&(slot.group, slot.binding)) {
                Some(existing) => {
                    if existing.kind != slot.kind {
                        return Err(ProgramError::Link(format!(
                            "slot ({}, {}) is a {} in one stage and a {} in the {} stage",
                            slot.group,
                            slot.binding,
                            existing.kind.describe(),
                            slot.kind.describe(),
                            stage.kind
                        )));
                    }
                    existing.visibility |= slot.visibility;
                }
                None => {
                    resources.insert((slot.group, slot.binding), slot.clone());
                }
            }
        }
        for block in &stage.uniform_blocks {
            match uniform_blocks
                .iter()
                .find(|known| known.group == block.group && known.binding == block.binding)
            {
                Some(known) if known != block => {
                    return Err(ProgramError::Link(format!(
                        "uniform block at ({}, {}) is declared differently across stages",
                        block.group, block.binding
                    )))
                }
                Some(_) => {}
                None => uniform_blocks.push(block.clone()),
            }
        }
    }

    Ok(ProgramInterface {
        stages: kinds,
        resources: resources.into_values().collect(),
        uniform_blocks,
        vertex_inputs: vertex.map(|stage| stage.inputs.clone()).unwrap_or_default(),
        workgroup_size: stages.iter().find_map(|stage| stage.workgroup_size),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::compile::compile_stage;

    const COMPUTE: &str = r"#version 450
layout(local_size_x = 16, local_size_y = 16) in;
layout(rgba8, binding = 0) uniform writeonly image2D screenTexture;
layout(rgba8, binding = 1) uniform writeonly image2D normalTexture;
layout(std140, binding = 2) uniform Camera {
    mat4 viewMatrix;
    mat4 projMatrix;
    vec3 position;
    uint frameNo;
};
void main() {
    ivec2 pixel = ivec2(gl_GlobalInvocationID.xy);
    vec4 ray = viewMatrix * projMatrix * vec4(position, float(frameNo));
    imageStore(screenTexture, pixel, ray);
    imageStore(normalTexture, pixel, vec4(0.0));
}
";

    const VERTEX: &str = r"#version 450
layout(location = 0) in vec2 aPos;
layout(location = 0) out vec2 uv;
void main() {
    uv = aPos * 0.5 + 0.5;
    gl_Position = vec4(aPos, 0.0, 1.0);
}
";

    const FRAGMENT: &str = r"#version 450
layout(location = 0) in vec2 uv;
layout(location = 0) out vec4 color;
layout(binding = 0) uniform texture2D screenTexture;
layout(binding = 2) uniform sampler screenSampler;
void main() {
    color = texture(sampler2D(screenTexture, screenSampler), uv);
}
";

    fn interface(kind: StageKind, source: &str) -> StageInterface {
        let stage = compile_stage(kind, source).expect("stage compiles");
        reflect_stage(&stage).expect("stage reflects")
    }

    #[test]
    fn compute_block_uses_std140_offsets() {
        let program = link(&[interface(StageKind::Compute, COMPUTE)]).expect("links");
        assert!(program.is_compute());
        assert_eq!(program.workgroup_size, Some([16, 16, 1]));

        let offsets: Vec<(&str, u32, ValueKind)> = program.uniform_blocks[0]
            .members
            .iter()
            .map(|member| (member.name.as_str(), member.offset, member.kind))
            .collect();
        assert_eq!(
            offsets,
            vec![
                ("viewMatrix", 0, ValueKind::Mat4),
                ("projMatrix", 64, ValueKind::Mat4),
                ("position", 128, ValueKind::Vec3),
                ("frameNo", 140, ValueKind::Uint),
            ]
        );
        assert_eq!(program.uniform_blocks[0].span, 144);
        assert_eq!(program.uniform("frameNo").map(|(block, _)| block), Some(0));
        assert!(program.uniform("frameNumber").is_none());
    }

    #[test]
    fn storage_images_are_reflected_with_format_and_access() {
        let program = link(&[interface(StageKind::Compute, COMPUTE)]).expect("links");
        let slot = program.resource("normalTexture").expect("declared");
        assert_eq!(slot.binding, 1);
        match slot.kind {
            ResourceKind::StorageImage { format, access } => {
                assert_eq!(format, naga::StorageFormat::Rgba8Unorm);
                assert!(access.contains(naga::StorageAccess::STORE));
                assert!(!access.contains(naga::StorageAccess::LOAD));
            }
            other => panic!("unexpected kind {other:?}"),
        }
        assert_eq!(program.group_count(), 1);
    }

    #[test]
    fn render_pair_links_and_reports_vertex_inputs() {
        let program = link(&[
            interface(StageKind::Vertex, VERTEX),
            interface(StageKind::Fragment, FRAGMENT),
        ])
        .expect("links");
        assert_eq!(program.vertex_inputs.get(&0), Some(&ValueKind::Vec2));
        assert_eq!(
            program.resource("screenSampler").map(|slot| slot.kind),
            Some(ResourceKind::Sampler)
        );
        let texture = program.resource("screenTexture").expect("declared");
        assert_eq!(texture.kind, ResourceKind::SampledTexture);
        assert_eq!(texture.visibility, wgpu::ShaderStages::FRAGMENT);
    }

    #[test]
    fn unmatched_fragment_input_fails_to_link() {
        let fragment = r"#version 450
layout(location = 3) in vec2 missing;
layout(location = 0) out vec4 color;
void main() { color = vec4(missing, 0.0, 1.0); }
";
        let err = link(&[
            interface(StageKind::Vertex, VERTEX),
            interface(StageKind::Fragment, fragment),
        ])
        .unwrap_err();
        assert!(matches!(err, ProgramError::Link(message) if message.contains("location 3")));
    }

    #[test]
    fn incomplete_stage_sets_fail_to_link() {
        let err = link(&[interface(StageKind::Vertex, VERTEX)]).unwrap_err();
        assert!(matches!(err, ProgramError::Link(_)));

        let err = link(&[
            interface(StageKind::Compute, COMPUTE),
            interface(StageKind::Vertex, VERTEX),
        ])
        .unwrap_err();
        assert!(matches!(err, ProgramError::Link(_)));
    }

    #[test]
    fn conflicting_slot_kinds_fail_to_link() {
        let vertex = r"#version 450
layout(location = 0) in vec2 aPos;
layout(location = 0) out vec2 uv;
layout(binding = 0) uniform sampler vertexSampler;
void main() {
    uv = aPos;
    gl_Position = vec4(aPos, 0.0, 1.0);
}
";
        let err = link(&[
            interface(StageKind::Vertex, vertex),
            interface(StageKind::Fragment, FRAGMENT),
        ])
        .unwrap_err();
        assert!(matches!(err, ProgramError::Link(message) if message.contains("(0, 0)")));
    }
}
