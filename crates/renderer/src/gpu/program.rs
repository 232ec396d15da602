//! Linked shader programs.
//!
//! A [`ShaderProgram`] is built from per-stage GLSL in one go: compile every
//! stage, reflect and link the interfaces, create bind group layouts and the
//! pipeline. Any failure along the way leaves the program unusable with the
//! diagnostic that caused it, and every later call on it is a no-op. There is
//! no half-built state.
//!
//! Uniforms are staged on the CPU at the offsets naga reports for the block
//! and flushed once per execute. Images are recorded per slot and the bind
//! groups are rebuilt only when a recorded image handle changes.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::num::NonZeroU64;
use std::path::{Path, PathBuf};

use glam::{Mat4, Vec2, Vec3, Vec4};
use thiserror::Error;
use wgpu::naga;

use super::buffer::{BufferKind, GpuBuffer};
use super::compile::{compile_stage, CompiledStage, StageKind};
use super::context::GpuContext;
use super::image::{GpuImage, ImageHandle, PixelFormat};
use super::reflect::{self, ProgramInterface, ResourceKind, ResourceSlot, UniformBlockLayout, ValueKind};

#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("failed to read {stage} shader at {path}: {source}")]
    Io {
        stage: StageKind,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{stage} shader source is empty{}", path.as_ref().map(|p| format!(" ({})", p.display())).unwrap_or_default())]
    EmptySource {
        stage: StageKind,
        path: Option<PathBuf>,
    },
    #[error("{stage} shader failed to compile:\n{diagnostic}")]
    Compile { stage: StageKind, diagnostic: String },
    #[error("program failed to link: {0}")]
    Link(String),
    #[error("pipeline creation failed: {0}")]
    Pipeline(String),
}

/// Source text per stage, plus any problem found while loading it.
#[derive(Debug, Default)]
pub struct StageSources {
    stages: BTreeMap<StageKind, String>,
    problems: Vec<ProgramError>,
}

impl StageSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: StageKind, source: impl Into<String>) -> Self {
        self.insert(kind, source);
        self
    }

    pub fn insert(&mut self, kind: StageKind, source: impl Into<String>) {
        let source = source.into();
        if source.trim().is_empty() {
            self.problems.push(ProgramError::EmptySource {
                stage: kind,
                path: None,
            });
        }
        self.stages.insert(kind, source);
    }

    /// Reads each stage from disk. Missing or empty files are recorded and
    /// make the program built from these sources unusable.
    pub fn load<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = (StageKind, P)>,
        P: AsRef<Path>,
    {
        let mut sources = Self::new();
        for (stage, path) in paths {
            let path = path.as_ref();
            match std::fs::read_to_string(path) {
                Ok(text) if text.trim().is_empty() => {
                    tracing::error!(%stage, path = %path.display(), "shader source is empty");
                    sources.problems.push(ProgramError::EmptySource {
                        stage,
                        path: Some(path.to_path_buf()),
                    });
                }
                Ok(text) => {
                    tracing::debug!(%stage, path = %path.display(), bytes = text.len(), "loaded shader source");
                    sources.stages.insert(stage, text);
                }
                Err(source) => {
                    tracing::error!(%stage, path = %path.display(), error = %source, "failed to read shader source");
                    sources.problems.push(ProgramError::Io {
                        stage,
                        path: path.to_path_buf(),
                        source,
                    });
                }
            }
        }
        sources
    }

    pub fn kinds(&self) -> impl Iterator<Item = StageKind> + '_ {
        self.stages.keys().copied()
    }

    pub fn has_problems(&self) -> bool {
        !self.problems.is_empty()
    }
}

/// A value for a named uniform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Uint(u32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

impl UniformValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            UniformValue::Float(_) => ValueKind::Float,
            UniformValue::Int(_) => ValueKind::Int,
            UniformValue::Uint(_) => ValueKind::Uint,
            UniformValue::Vec2(_) => ValueKind::Vec2,
            UniformValue::Vec3(_) => ValueKind::Vec3,
            UniformValue::Vec4(_) => ValueKind::Vec4,
            UniformValue::Mat4(_) => ValueKind::Mat4,
        }
    }

    fn bytes(&self) -> &[u8] {
        match self {
            UniformValue::Float(value) => bytemuck::bytes_of(value),
            UniformValue::Int(value) => bytemuck::bytes_of(value),
            UniformValue::Uint(value) => bytemuck::bytes_of(value),
            UniformValue::Vec2(value) => bytemuck::bytes_of(value),
            UniformValue::Vec3(value) => bytemuck::bytes_of(value),
            UniformValue::Vec4(value) => bytemuck::bytes_of(value),
            UniformValue::Mat4(value) => bytemuck::bytes_of(value),
        }
    }
}

impl From<f32> for UniformValue {
    fn from(value: f32) -> Self {
        UniformValue::Float(value)
    }
}

impl From<u32> for UniformValue {
    fn from(value: u32) -> Self {
        UniformValue::Uint(value)
    }
}

impl From<i32> for UniformValue {
    fn from(value: i32) -> Self {
        UniformValue::Int(value)
    }
}

impl From<Vec3> for UniformValue {
    fn from(value: Vec3) -> Self {
        UniformValue::Vec3(value)
    }
}

impl From<Mat4> for UniformValue {
    fn from(value: Mat4) -> Self {
        UniformValue::Mat4(value)
    }
}

/// Vertex buffer layout a render program is drawn with.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexInput {
    pub stride: u64,
    pub attributes: Vec<wgpu::VertexAttribute>,
}

/// What kind of pipeline a program is linked into.
#[derive(Debug, Clone)]
pub enum ProgramTarget {
    Compute,
    Render {
        color_format: wgpu::TextureFormat,
        vertex: VertexInput,
    },
}

enum Pipeline {
    Compute(wgpu::ComputePipeline),
    Render(wgpu::RenderPipeline),
}

struct StagedBlock {
    layout: UniformBlockLayout,
    bytes: Vec<u8>,
    buffer: GpuBuffer,
    dirty: bool,
}

struct BoundImage {
    handle: ImageHandle,
    view: wgpu::TextureView,
}

struct Linked {
    interface: ProgramInterface,
    pipeline: Pipeline,
    layouts: Vec<wgpu::BindGroupLayout>,
    sampler: wgpu::Sampler,
    uniforms: Vec<StagedBlock>,
    images: BTreeMap<(u32, u32), BoundImage>,
    bind_groups: Vec<wgpu::BindGroup>,
    bind_groups_stale: bool,
}

enum ProgramState {
    Usable(Box<Linked>),
    Unusable(ProgramError),
}

pub struct ShaderProgram {
    label: String,
    state: ProgramState,
    warned: HashSet<String>,
}

impl fmt::Debug for ShaderProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderProgram")
            .field("label", &self.label)
            .field("usable", &self.is_usable())
            .finish()
    }
}

impl ShaderProgram {
    /// Compiles and links `sources` into a pipeline for `target`.
    ///
    /// Never fails: on error the diagnostic is logged and kept, and the
    /// program is unusable.
    pub fn new(context: &GpuContext, label: &str, sources: StageSources, target: ProgramTarget) -> Self {
        let state = match build(context, label, sources, &target) {
            Ok(linked) => {
                tracing::info!(
                    program = label,
                    stages = ?linked.interface.stages,
                    slots = linked.interface.resources.len(),
                    "linked shader program"
                );
                ProgramState::Usable(Box::new(linked))
            }
            Err(error) => {
                tracing::error!(program = label, %error, "shader program is unusable");
                ProgramState::Unusable(error)
            }
        };
        Self {
            label: label.to_string(),
            state,
            warned: HashSet::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_usable(&self) -> bool {
        matches!(self.state, ProgramState::Usable(_))
    }

    /// Why the program is unusable, if it is.
    pub fn error(&self) -> Option<&ProgramError> {
        match &self.state {
            ProgramState::Unusable(error) => Some(error),
            ProgramState::Usable(_) => None,
        }
    }

    pub fn interface(&self) -> Option<&ProgramInterface> {
        match &self.state {
            ProgramState::Usable(linked) => Some(&linked.interface),
            ProgramState::Unusable(_) => None,
        }
    }

    /// `local_size` declared by a compute program.
    pub fn workgroup_size(&self) -> Option<[u32; 3]> {
        self.interface().and_then(|interface| interface.workgroup_size)
    }

    fn first_warning(&mut self, key: String) -> bool {
        self.warned.insert(key)
    }

    /// Stages a uniform value by name.
    ///
    /// Names that do not resolve, or resolve to a member of another shape,
    /// are warned about once and otherwise ignored.
    pub fn set_uniform(&mut self, name: &str, value: impl Into<UniformValue>) {
        let value = value.into();
        let ProgramState::Usable(linked) = &mut self.state else {
            return;
        };
        let Some((block_index, member)) = linked.interface.uniform(name) else {
            if self.warned.insert(format!("uniform:{name}")) {
                tracing::warn!(program = %self.label, uniform = name, "uniform not found in program; ignoring");
            }
            return;
        };
        if member.kind != value.kind() {
            let declared = member.kind;
            if self.warned.insert(format!("uniform-kind:{name}")) {
                tracing::warn!(
                    program = %self.label,
                    uniform = name,
                    ?declared,
                    given = ?value.kind(),
                    "uniform type mismatch; ignoring"
                );
            }
            return;
        }

        let offset = member.offset as usize;
        let block = &mut linked.uniforms[block_index];
        let bytes = value.bytes();
        let Some(target) = block.bytes.get_mut(offset..offset + bytes.len()) else {
            return;
        };
        if target != bytes {
            target.copy_from_slice(bytes);
            block.dirty = true;
        }
    }

    pub fn set_mat4(&mut self, name: &str, value: Mat4) {
        self.set_uniform(name, UniformValue::Mat4(value));
    }

    pub fn set_vec3(&mut self, name: &str, value: Vec3) {
        self.set_uniform(name, UniformValue::Vec3(value));
    }

    pub fn set_uint(&mut self, name: &str, value: u32) {
        self.set_uniform(name, UniformValue::Uint(value));
    }

    pub fn set_float(&mut self, name: &str, value: f32) {
        self.set_uniform(name, UniformValue::Float(value));
    }

    /// Binds `image` for load/store at the storage-image slot named `name`.
    ///
    /// The declared binding must equal `slot` and the declared format must
    /// equal both `format` and the image's own format.
    pub fn bind_image_read_write(&mut self, name: &str, image: &GpuImage, slot: u32, format: PixelFormat) {
        let Some(resource) = self.resolve_slot(name) else {
            return;
        };
        let declared = match resource.kind {
            ResourceKind::StorageImage { format, .. } => format,
            other => {
                self.warn_binding(name, &format!("is a {other:?}, not a storage image"));
                return;
            }
        };
        if resource.binding != slot {
            self.warn_binding(name, &format!("is declared at binding {}, not {slot}", resource.binding));
            return;
        }
        if format.storage_format() != Some(declared) || image.format() != format {
            self.warn_binding(
                name,
                &format!(
                    "declares {declared:?}; requested {:?} for an image stored as {:?}",
                    format.internal(),
                    image.format().internal()
                ),
            );
            return;
        }
        self.record_image(name, (resource.group, resource.binding), image);
    }

    /// Binds `image` for sampling at the texture slot named `name`.
    pub fn bind_image_sampled(&mut self, name: &str, image: &GpuImage, unit: u32) {
        let Some(resource) = self.resolve_slot(name) else {
            return;
        };
        if resource.kind != ResourceKind::SampledTexture {
            self.warn_binding(name, &format!("is a {:?}, not a sampled texture", resource.kind));
            return;
        }
        if resource.binding != unit {
            self.warn_binding(name, &format!("is declared at binding {}, not {unit}", resource.binding));
            return;
        }
        self.record_image(name, (resource.group, resource.binding), image);
    }

    fn resolve_slot(&mut self, name: &str) -> Option<ResourceSlot> {
        let found = self.interface()?.resource(name).cloned();
        if found.is_none() && self.first_warning(format!("slot:{name}")) {
            tracing::warn!(program = %self.label, image = name, "image slot not found in program; ignoring");
        }
        found
    }

    fn warn_binding(&mut self, name: &str, reason: &str) {
        if self.first_warning(format!("binding:{name}")) {
            tracing::warn!(program = %self.label, image = name, "image slot {reason}; ignoring binding");
        }
    }

    /// Records `image` at `slot`. An invalid image clears the slot, so the
    /// program stops running until a valid image is bound again.
    fn record_image(&mut self, name: &str, slot: (u32, u32), image: &GpuImage) {
        let (Some(handle), Some(view)) = (image.handle(), image.view()) else {
            self.warn_binding(name, &format!("was given invalid image '{}'", image.label()));
            if let ProgramState::Usable(linked) = &mut self.state {
                if linked.images.remove(&slot).is_some() {
                    tracing::debug!(program = %self.label, image = name, "cleared image binding");
                    linked.bind_groups.clear();
                    linked.bind_groups_stale = true;
                }
            }
            return;
        };
        let ProgramState::Usable(linked) = &mut self.state else {
            return;
        };
        let current = linked.images.get(&slot).map(|bound| bound.handle);
        if current != Some(handle) {
            tracing::trace!(program = %self.label, image = name, %handle, "recorded image binding");
            linked.images.insert(
                slot,
                BoundImage {
                    handle,
                    view: view.clone(),
                },
            );
            linked.bind_groups_stale = true;
        }
    }

    /// Flushes staged uniforms and rebuilds stale bind groups.
    ///
    /// Returns `false` when the program cannot run: it is unusable or an
    /// image slot has nothing bound.
    pub(crate) fn prepare(&mut self, context: &GpuContext) -> bool {
        let ProgramState::Usable(linked) = &mut self.state else {
            return false;
        };

        for block in linked.uniforms.iter_mut().filter(|block| block.dirty) {
            if let Err(error) = block.buffer.upload(context, &block.bytes) {
                tracing::error!(program = %self.label, %error, "failed to upload uniforms");
                return false;
            }
            block.dirty = false;
        }

        let unbound = linked.interface.resources.iter().find(|slot| {
            matches!(
                slot.kind,
                ResourceKind::StorageImage { .. } | ResourceKind::SampledTexture
            ) && !linked.images.contains_key(&(slot.group, slot.binding))
        });
        if let Some(slot) = unbound {
            let key = format!("unbound:{}:{}", slot.group, slot.binding);
            if self.warned.insert(key) {
                tracing::warn!(
                    program = %self.label,
                    image = slot.name.as_deref().unwrap_or("<unnamed>"),
                    group = slot.group,
                    binding = slot.binding,
                    "image slot has nothing bound; skipping"
                );
            }
            return false;
        }

        if linked.bind_groups_stale || linked.bind_groups.len() != linked.layouts.len() {
            let groups = build_bind_groups(context, &self.label, linked);
            linked.bind_groups = groups;
            linked.bind_groups_stale = false;
            tracing::debug!(program = %self.label, groups = linked.bind_groups.len(), "rebuilt bind groups");
        }
        true
    }

    /// Sets the pipeline and bind groups on a compute pass.
    pub(crate) fn bind_compute(&self, pass: &mut wgpu::ComputePass<'_>) -> bool {
        let ProgramState::Usable(linked) = &self.state else {
            return false;
        };
        let Pipeline::Compute(pipeline) = &linked.pipeline else {
            return false;
        };
        pass.set_pipeline(pipeline);
        for (index, group) in linked.bind_groups.iter().enumerate() {
            pass.set_bind_group(index as u32, group, &[]);
        }
        true
    }

    /// Sets the pipeline and bind groups on a render pass.
    pub(crate) fn bind_render(&self, pass: &mut wgpu::RenderPass<'_>) -> bool {
        let ProgramState::Usable(linked) = &self.state else {
            return false;
        };
        let Pipeline::Render(pipeline) = &linked.pipeline else {
            return false;
        };
        pass.set_pipeline(pipeline);
        for (index, group) in linked.bind_groups.iter().enumerate() {
            pass.set_bind_group(index as u32, group, &[]);
        }
        true
    }
}

fn build(
    context: &GpuContext,
    label: &str,
    sources: StageSources,
    target: &ProgramTarget,
) -> Result<Linked, ProgramError> {
    let StageSources { stages, problems } = sources;
    if let Some(problem) = problems.into_iter().next() {
        return Err(problem);
    }

    let compiled = stages
        .iter()
        .map(|(kind, source)| compile_stage(*kind, source))
        .collect::<Result<Vec<CompiledStage>, _>>()?;
    let interfaces = compiled
        .iter()
        .map(reflect::reflect_stage)
        .collect::<Result<Vec<_>, _>>()?;
    let interface = reflect::link(&interfaces)?;
    check_target(context, &interface, target)?;

    let layouts = bind_group_layouts(context, label, &interface)?;

    let (pipeline, error) = context.scoped(|device| {
        let layout_refs: Vec<&wgpu::BindGroupLayout> = layouts.iter().collect();
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &layout_refs,
            push_constant_ranges: &[],
        });
        create_pipeline(device, label, &compiled, &pipeline_layout, target)
    });
    // The shader modules went out of scope with the closure; the naga
    // modules go with `compiled` at the end of this function.
    if let Some(error) = error {
        return Err(ProgramError::Pipeline(error.to_string()));
    }
    let pipeline = pipeline?;

    let mut uniforms = Vec::with_capacity(interface.uniform_blocks.len());
    for block in &interface.uniform_blocks {
        let bytes = vec![0u8; block.span as usize];
        let buffer = GpuBuffer::with_contents(
            context,
            &format!("{label} uniforms ({}, {})", block.group, block.binding),
            BufferKind::Uniform,
            &bytes,
        )
        .map_err(|error| ProgramError::Pipeline(error.to_string()))?;
        uniforms.push(StagedBlock {
            layout: block.clone(),
            bytes,
            buffer,
            dirty: false,
        });
    }

    let sampler = context.device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some(label),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    });

    Ok(Linked {
        interface,
        pipeline,
        layouts,
        sampler,
        uniforms,
        images: BTreeMap::new(),
        bind_groups: Vec::new(),
        bind_groups_stale: true,
    })
}

fn check_target(
    context: &GpuContext,
    interface: &ProgramInterface,
    target: &ProgramTarget,
) -> Result<(), ProgramError> {
    match target {
        ProgramTarget::Compute if !interface.is_compute() => {
            return Err(ProgramError::Link("a compute pipeline needs a compute stage".into()))
        }
        ProgramTarget::Render { .. } if interface.is_compute() => {
            return Err(ProgramError::Link(
                "a render pipeline needs vertex and fragment stages".into(),
            ))
        }
        ProgramTarget::Render { vertex, .. } => {
            for (location, kind) in &interface.vertex_inputs {
                let supplied = vertex
                    .attributes
                    .iter()
                    .find(|attribute| attribute.shader_location == *location);
                match supplied {
                    Some(attribute) if Some(attribute.format) == kind.vertex_format() => {}
                    Some(attribute) => {
                        return Err(ProgramError::Link(format!(
                            "vertex input at location {location} is {kind:?} but the buffer supplies {:?}",
                            attribute.format
                        )))
                    }
                    None => {
                        return Err(ProgramError::Link(format!(
                            "vertex input at location {location} has no buffer attribute"
                        )))
                    }
                }
            }
        }
        ProgramTarget::Compute => {}
    }

    for slot in &interface.resources {
        if let ResourceKind::StorageImage { format, access } = slot.kind {
            let texture_format = texture_format(format).ok_or_else(|| {
                ProgramError::Link(format!("storage image format {format:?} is not supported"))
            })?;
            if access.contains(naga::StorageAccess::LOAD) && access.contains(naga::StorageAccess::STORE) {
                let flags = context.adapter.get_texture_format_features(texture_format).flags;
                let adapter_specific = context
                    .features
                    .contains(wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES);
                let native = matches!(texture_format, wgpu::TextureFormat::R32Float);
                if !native
                    && !(adapter_specific
                        && flags.contains(wgpu::TextureFormatFeatureFlags::STORAGE_READ_WRITE))
                {
                    return Err(ProgramError::Link(format!(
                        "read-write access to {texture_format:?} storage images is not supported by this adapter"
                    )));
                }
            }
        }
    }
    Ok(())
}

fn texture_format(format: naga::StorageFormat) -> Option<wgpu::TextureFormat> {
    use naga::StorageFormat;
    let texture = match format {
        StorageFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
        StorageFormat::Rg8Unorm => wgpu::TextureFormat::Rg8Unorm,
        StorageFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        StorageFormat::R16Float => wgpu::TextureFormat::R16Float,
        StorageFormat::Rg16Float => wgpu::TextureFormat::Rg16Float,
        StorageFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        StorageFormat::R32Float => wgpu::TextureFormat::R32Float,
        StorageFormat::Rg32Float => wgpu::TextureFormat::Rg32Float,
        StorageFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        _ => return None,
    };
    Some(texture)
}

fn storage_access(access: naga::StorageAccess) -> wgpu::StorageTextureAccess {
    let load = access.contains(naga::StorageAccess::LOAD);
    let store = access.contains(naga::StorageAccess::STORE);
    match (load, store) {
        (true, true) => wgpu::StorageTextureAccess::ReadWrite,
        (true, false) => wgpu::StorageTextureAccess::ReadOnly,
        _ => wgpu::StorageTextureAccess::WriteOnly,
    }
}

fn layout_entry(slot: &ResourceSlot, uniform_span: Option<u32>) -> Option<wgpu::BindGroupLayoutEntry> {
    let ty = match slot.kind {
        ResourceKind::StorageImage { format, access } => wgpu::BindingType::StorageTexture {
            access: storage_access(access),
            format: texture_format(format)?,
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        ResourceKind::SampledTexture => wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        ResourceKind::Sampler => wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        ResourceKind::UniformBlock => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: uniform_span.and_then(|span| NonZeroU64::new(u64::from(span))),
        },
    };
    Some(wgpu::BindGroupLayoutEntry {
        binding: slot.binding,
        visibility: slot.visibility,
        ty,
        count: None,
    })
}

fn bind_group_layouts(
    context: &GpuContext,
    label: &str,
    interface: &ProgramInterface,
) -> Result<Vec<wgpu::BindGroupLayout>, ProgramError> {
    let mut layouts = Vec::new();
    for group in 0..interface.group_count() {
        let entries: Vec<wgpu::BindGroupLayoutEntry> = interface
            .resources
            .iter()
            .filter(|slot| slot.group == group)
            .filter_map(|slot| {
                let span = interface
                    .uniform_blocks
                    .iter()
                    .find(|block| block.group == slot.group && block.binding == slot.binding)
                    .map(|block| block.span);
                layout_entry(slot, span)
            })
            .collect();
        let (layout, error) = context.scoped(|device| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("{label} group {group}")),
                entries: &entries,
            })
        });
        if let Some(error) = error {
            return Err(ProgramError::Pipeline(error.to_string()));
        }
        layouts.push(layout);
    }
    Ok(layouts)
}

fn create_pipeline(
    device: &wgpu::Device,
    label: &str,
    compiled: &[CompiledStage],
    layout: &wgpu::PipelineLayout,
    target: &ProgramTarget,
) -> Result<Pipeline, ProgramError> {
    let module_for = |kind: StageKind| {
        compiled
            .iter()
            .find(|stage| stage.kind == kind)
            .map(|stage| stage.create_module(device, &format!("{label} {kind}")))
            .ok_or_else(|| ProgramError::Link(format!("missing {kind} stage")))
    };

    match target {
        ProgramTarget::Compute => {
            let module = module_for(StageKind::Compute)?;
            Ok(Pipeline::Compute(device.create_compute_pipeline(
                &wgpu::ComputePipelineDescriptor {
                    label: Some(label),
                    layout: Some(layout),
                    module: &module,
                    entry_point: Some("main"),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    cache: None,
                },
            )))
        }
        ProgramTarget::Render {
            color_format,
            vertex,
        } => {
            let vertex_module = module_for(StageKind::Vertex)?;
            let fragment_module = module_for(StageKind::Fragment)?;
            let buffers = [wgpu::VertexBufferLayout {
                array_stride: vertex.stride,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &vertex.attributes,
            }];
            Ok(Pipeline::Render(device.create_render_pipeline(
                &wgpu::RenderPipelineDescriptor {
                    label: Some(label),
                    layout: Some(layout),
                    vertex: wgpu::VertexState {
                        module: &vertex_module,
                        entry_point: Some("main"),
                        buffers: &buffers,
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    },
                    primitive: wgpu::PrimitiveState {
                        topology: wgpu::PrimitiveTopology::TriangleStrip,
                        strip_index_format: None,
                        front_face: wgpu::FrontFace::Ccw,
                        cull_mode: None,
                        polygon_mode: wgpu::PolygonMode::Fill,
                        unclipped_depth: false,
                        conservative: false,
                    },
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    fragment: Some(wgpu::FragmentState {
                        module: &fragment_module,
                        entry_point: Some("main"),
                        targets: &[Some(wgpu::ColorTargetState {
                            format: *color_format,
                            blend: None,
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    }),
                    multiview: None,
                    cache: None,
                },
            )))
        }
    }
}

fn build_bind_groups(context: &GpuContext, label: &str, linked: &Linked) -> Vec<wgpu::BindGroup> {
    linked
        .layouts
        .iter()
        .enumerate()
        .map(|(group, layout)| {
            let group = group as u32;
            let entries: Vec<wgpu::BindGroupEntry<'_>> = linked
                .interface
                .resources
                .iter()
                .filter(|slot| slot.group == group)
                .filter_map(|slot| {
                    let key = (slot.group, slot.binding);
                    let resource = match slot.kind {
                        ResourceKind::UniformBlock => linked
                            .uniforms
                            .iter()
                            .find(|block| (block.layout.group, block.layout.binding) == key)
                            .map(|block| block.buffer.binding())?,
                        ResourceKind::StorageImage { .. } | ResourceKind::SampledTexture => {
                            wgpu::BindingResource::TextureView(&linked.images.get(&key)?.view)
                        }
                        ResourceKind::Sampler => wgpu::BindingResource::Sampler(&linked.sampler),
                    };
                    Some(wgpu::BindGroupEntry {
                        binding: slot.binding,
                        resource,
                    })
                })
                .collect();
            context.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("{label} group {group}")),
                layout,
                entries: &entries,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_values_serialize_in_column_major_order() {
        let matrix = Mat4::from_cols_array(&[
            1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0,
        ]);
        let value = UniformValue::Mat4(matrix);
        let floats: &[f32] = bytemuck::cast_slice(value.bytes());
        assert_eq!(floats[0], 1.0);
        assert_eq!(floats[4], 5.0);
        assert_eq!(floats.len(), 16);

        assert_eq!(UniformValue::Vec3(Vec3::ONE).bytes().len(), 12);
        assert_eq!(UniformValue::from(7u32).bytes(), 7u32.to_ne_bytes());
    }

    #[test]
    fn empty_sources_are_recorded() {
        let sources = StageSources::new().with(StageKind::Compute, "   \n");
        assert!(sources.has_problems());
        assert_eq!(sources.kinds().collect::<Vec<_>>(), vec![StageKind::Compute]);
    }

    #[test]
    fn missing_files_are_recorded() {
        let sources = StageSources::load([(StageKind::Vertex, "/nonexistent/raysuch/quad.vert")]);
        assert!(sources.has_problems());
        assert!(matches!(
            sources.problems.first(),
            Some(ProgramError::Io { stage: StageKind::Vertex, .. })
        ));
    }

    #[test]
    fn storage_access_maps_to_wgpu() {
        use naga::StorageAccess;
        assert_eq!(storage_access(StorageAccess::STORE), wgpu::StorageTextureAccess::WriteOnly);
        assert_eq!(storage_access(StorageAccess::LOAD), wgpu::StorageTextureAccess::ReadOnly);
        assert_eq!(
            storage_access(StorageAccess::LOAD | StorageAccess::STORE),
            wgpu::StorageTextureAccess::ReadWrite
        );
    }

    #[test]
    fn pixel_formats_round_trip_through_storage_formats() {
        for format in [PixelFormat::RGBA8, PixelFormat::RGBA16F] {
            let storage = format.storage_format().expect("storage capable");
            assert_eq!(texture_format(storage), Some(format.internal()));
        }
    }

    const SINGLE_IMAGE_COMPUTE: &str = r"#version 450
layout(local_size_x = 8, local_size_y = 8) in;
layout(rgba8, binding = 0) uniform writeonly image2D screenTexture;
layout(std140, binding = 1) uniform Camera {
    vec3 position;
    float exposure;
};
void main() {
    imageStore(screenTexture, ivec2(gl_GlobalInvocationID.xy), vec4(position * exposure, 1.0));
}
";

    fn compute_program() -> Option<(GpuContext, ShaderProgram)> {
        let context = match GpuContext::headless() {
            Ok(context) => context,
            Err(err) => {
                eprintln!("skipping GPU test: {err:#}");
                return None;
            }
        };
        let program = ShaderProgram::new(
            &context,
            "single image",
            StageSources::new().with(StageKind::Compute, SINGLE_IMAGE_COMPUTE),
            ProgramTarget::Compute,
        );
        assert!(program.is_usable(), "{:?}", program.error());
        Some((context, program))
    }

    #[test]
    fn unknown_uniform_is_ignored_and_warned_once() {
        let Some((context, mut program)) = compute_program() else { return };
        let image = GpuImage::new(&context, "color", 8, 8, PixelFormat::RGBA8).expect("image");
        program.bind_image_read_write("screenTexture", &image, 0, PixelFormat::RGBA8);

        program.set_uint("frameNo", 1);
        program.set_uint("frameNo", 2);
        program.set_vec3("position", Vec3::ONE);

        assert_eq!(program.warned.len(), 1);
        assert!(program.warned.contains("uniform:frameNo"));
        assert!(program.prepare(&context));
    }

    #[test]
    fn invalid_image_clears_a_bound_slot() {
        let Some((context, mut program)) = compute_program() else { return };
        let image = GpuImage::new(&context, "color", 8, 8, PixelFormat::RGBA8).expect("image");
        program.bind_image_read_write("screenTexture", &image, 0, PixelFormat::RGBA8);
        assert!(program.prepare(&context));

        let invalid = GpuImage::unallocated("color", 8, 8, PixelFormat::RGBA8);
        program.bind_image_read_write("screenTexture", &invalid, 0, PixelFormat::RGBA8);
        let ProgramState::Usable(linked) = &program.state else {
            panic!("program stays usable");
        };
        assert!(linked.images.is_empty());
        assert!(linked.bind_groups.is_empty());
        assert!(!program.prepare(&context));

        program.bind_image_read_write("screenTexture", &image, 0, PixelFormat::RGBA8);
        assert!(program.prepare(&context));
    }
}
