//! In-memory backend.
//!
//! Allocates handles, keeps surface and texture bookkeeping and records every
//! call in a command journal. No pixels are produced; the journal is what
//! tests and the `simulate` command inspect.

use std::collections::{BTreeMap, BTreeSet};

use super::{
    Backend, CameraHandle, Capabilities, ClearFlags, ClearValues, GeometryHandle, ObjectId,
    OverrideMaterial, SceneHandle, ShaderProgram, StencilState, Surface, SurfaceDesc, SurfaceId,
    TextureHandle, WriteMask,
};
use crate::error::BackendError;
use crate::selection::LayerTarget;

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetSize {
        width: u32,
        height: u32,
    },
    CreateSurface {
        id: SurfaceId,
        label: String,
        width: u32,
        height: u32,
    },
    ResizeSurface {
        id: SurfaceId,
        width: u32,
        height: u32,
    },
    DisposeSurface {
        id: SurfaceId,
    },
    CreateTexture {
        texture: TextureHandle,
        width: u32,
        height: u32,
    },
    DisposeTexture {
        texture: TextureHandle,
    },
    AttachDepth {
        surface: SurfaceId,
        texture: Option<TextureHandle>,
    },
    SetRenderTarget(Option<SurfaceId>),
    SetStencil(StencilState),
    SetWriteMask(WriteMask),
    Clear {
        target: Option<SurfaceId>,
        flags: ClearFlags,
    },
    Render {
        target: Option<SurfaceId>,
        scene: SceneHandle,
        camera: CameraHandle,
        override_material: Option<OverrideMaterial>,
        stencil: StencilState,
        write_mask: WriteMask,
    },
    DrawFullscreen {
        target: Option<SurfaceId>,
        label: String,
        stencil: StencilState,
        /// Packed size of the bound uniform buffer.
        uniform_bytes: usize,
    },
}

#[derive(Debug, Clone, Copy)]
struct TextureRecord {
    width: u32,
    height: u32,
    depth: bool,
}

/// Backend that renders nothing and remembers everything.
#[derive(Debug)]
pub struct HeadlessBackend {
    next_id: u64,
    size: (u32, u32),
    pixel_ratio: f32,
    capabilities: Capabilities,
    surfaces: BTreeMap<SurfaceId, (u32, u32)>,
    textures: BTreeMap<TextureHandle, TextureRecord>,
    geometries: BTreeSet<GeometryHandle>,
    target: Option<SurfaceId>,
    stencil: StencilState,
    write_mask: WriteMask,
    camera_ranges: BTreeMap<u64, (f32, f32)>,
    layers: BTreeMap<ObjectId, u32>,
    depth_textures_created: usize,
    surfaces_created: usize,
    fail_next_draw: Option<String>,
    commands: Vec<Command>,
}

impl HeadlessBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            next_id: 1,
            size: (width.max(1), height.max(1)),
            pixel_ratio: 1.0,
            capabilities: Capabilities::default(),
            surfaces: BTreeMap::new(),
            textures: BTreeMap::new(),
            geometries: BTreeSet::new(),
            target: None,
            stencil: StencilState::DISABLED,
            write_mask: WriteMask::ALL,
            camera_ranges: BTreeMap::new(),
            layers: BTreeMap::new(),
            depth_textures_created: 0,
            surfaces_created: 0,
            fail_next_draw: None,
            commands: Vec::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Drawing buffer size is the logical size times this ratio.
    pub fn with_pixel_ratio(mut self, ratio: f32) -> Self {
        self.pixel_ratio = ratio.max(f32::EPSILON);
        self
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn allocate_texture(&mut self, width: u32, height: u32, depth: bool) -> TextureHandle {
        let texture = TextureHandle(self.next_id());
        self.textures.insert(
            texture,
            TextureRecord {
                width,
                height,
                depth,
            },
        );
        self.commands.push(Command::CreateTexture {
            texture,
            width,
            height,
        });
        texture
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    /// Fullscreen draws in journal order.
    pub fn draws(&self) -> impl Iterator<Item = &Command> {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::DrawFullscreen { .. }))
    }

    pub fn live_surface_count(&self) -> usize {
        self.surfaces.len()
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn live_depth_texture_count(&self) -> usize {
        self.textures.values().filter(|t| t.depth).count()
    }

    pub fn live_geometry_count(&self) -> usize {
        self.geometries.len()
    }

    /// Depth textures allocated over the backend's lifetime.
    pub fn depth_textures_created(&self) -> usize {
        self.depth_textures_created
    }

    pub fn surfaces_created(&self) -> usize {
        self.surfaces_created
    }

    pub fn surface_size(&self, id: SurfaceId) -> Option<(u32, u32)> {
        self.surfaces.get(&id).copied()
    }

    pub fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)> {
        self.textures.get(&texture).map(|t| (t.width, t.height))
    }

    pub fn current_target(&self) -> Option<SurfaceId> {
        self.target
    }

    pub fn stencil(&self) -> StencilState {
        self.stencil
    }

    pub fn write_mask(&self) -> WriteMask {
        self.write_mask
    }

    pub fn set_camera_range(&mut self, camera: CameraHandle, near: f32, far: f32) {
        self.camera_ranges.insert(camera.0, (near, far));
    }

    /// Layer bitmask of an object. Objects start on layer 0 only.
    pub fn layer_mask(&self, object: ObjectId) -> u32 {
        self.layers.get(&object).copied().unwrap_or(1)
    }

    /// Make the next `render` or `draw_fullscreen` call fail.
    pub fn fail_next_draw(&mut self, message: impl Into<String>) {
        self.fail_next_draw = Some(message.into());
    }

    fn check_failure(&mut self) -> Result<(), BackendError> {
        match self.fail_next_draw.take() {
            Some(message) => Err(BackendError::new(message)),
            None => Ok(()),
        }
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(800, 600)
    }
}

impl Backend for HeadlessBackend {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn drawing_buffer_size(&self) -> (u32, u32) {
        let w = (self.size.0 as f32 * self.pixel_ratio).round().max(1.0) as u32;
        let h = (self.size.1 as f32 * self.pixel_ratio).round().max(1.0) as u32;
        (w, h)
    }

    fn set_size(&mut self, width: u32, height: u32) {
        self.size = (width.max(1), height.max(1));
        self.commands.push(Command::SetSize { width, height });
    }

    fn create_surface(&mut self, desc: &SurfaceDesc) -> Result<Surface, BackendError> {
        let color = self.allocate_texture(desc.width, desc.height, false);
        let id = SurfaceId(self.next_id());
        self.surfaces.insert(id, (desc.width, desc.height));
        self.surfaces_created += 1;
        self.commands.push(Command::CreateSurface {
            id,
            label: desc.label.clone(),
            width: desc.width,
            height: desc.height,
        });
        Ok(Surface::new(id, color, desc))
    }

    fn resize_surface(
        &mut self,
        surface: &mut Surface,
        width: u32,
        height: u32,
    ) -> Result<(), BackendError> {
        let (width, height) = (width.max(1), height.max(1));
        let slot = self.surfaces.get_mut(&surface.id()).ok_or_else(|| {
            BackendError::new(format!("resize of unknown surface '{}'", surface.label()))
        })?;
        *slot = (width, height);

        for texture in [Some(surface.color()), surface.depth_texture()].into_iter().flatten() {
            if let Some(record) = self.textures.get_mut(&texture) {
                record.width = width;
                record.height = height;
            }
        }

        surface.set_dimensions(width, height);
        self.commands.push(Command::ResizeSurface {
            id: surface.id(),
            width,
            height,
        });
        Ok(())
    }

    fn dispose_surface(&mut self, surface: &Surface) {
        if self.surfaces.remove(&surface.id()).is_some() {
            self.textures.remove(&surface.color());
            self.commands.push(Command::DisposeSurface { id: surface.id() });
        } else {
            log::warn!("dispose of unknown surface '{}'", surface.label());
        }
    }

    fn create_depth_texture(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<TextureHandle, BackendError> {
        self.depth_textures_created += 1;
        Ok(self.allocate_texture(width.max(1), height.max(1), true))
    }

    fn attach_depth_texture(&mut self, surface: &mut Surface, texture: Option<TextureHandle>) {
        surface.set_depth_attachment(texture);
        self.commands.push(Command::AttachDepth {
            surface: surface.id(),
            texture,
        });
    }

    fn dispose_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(&texture).is_some() {
            self.commands.push(Command::DisposeTexture { texture });
        } else {
            log::warn!("dispose of unknown texture {:?}", texture);
        }
    }

    fn create_fullscreen_geometry(&mut self) -> Result<GeometryHandle, BackendError> {
        let geometry = GeometryHandle(self.next_id());
        self.geometries.insert(geometry);
        Ok(geometry)
    }

    fn dispose_geometry(&mut self, geometry: GeometryHandle) {
        self.geometries.remove(&geometry);
    }

    fn set_render_target(&mut self, target: Option<SurfaceId>) {
        self.target = target;
        self.commands.push(Command::SetRenderTarget(target));
    }

    fn clear(&mut self, flags: ClearFlags, _values: ClearValues) {
        if flags.any() {
            self.commands.push(Command::Clear {
                target: self.target,
                flags,
            });
        }
    }

    fn set_write_mask(&mut self, mask: WriteMask) {
        self.write_mask = mask;
        self.commands.push(Command::SetWriteMask(mask));
    }

    fn set_stencil(&mut self, state: StencilState) {
        self.stencil = state;
        self.commands.push(Command::SetStencil(state));
    }

    fn render(
        &mut self,
        scene: SceneHandle,
        camera: CameraHandle,
        override_material: Option<OverrideMaterial>,
    ) -> Result<(), BackendError> {
        self.check_failure()?;
        self.commands.push(Command::Render {
            target: self.target,
            scene,
            camera,
            override_material,
            stencil: self.stencil,
            write_mask: self.write_mask,
        });
        Ok(())
    }

    fn draw_fullscreen(
        &mut self,
        geometry: GeometryHandle,
        program: &ShaderProgram,
    ) -> Result<(), BackendError> {
        if !self.geometries.contains(&geometry) {
            return Err(BackendError::new(format!(
                "draw '{}' with unknown geometry {:?}",
                program.label, geometry
            )));
        }
        self.check_failure()?;
        let uniform_bytes = program
            .uniforms
            .iter()
            .map(|(_, uniform)| uniform.get().to_bytes().len())
            .sum();
        self.commands.push(Command::DrawFullscreen {
            target: self.target,
            label: program.label.clone(),
            stencil: self.stencil,
            uniform_bytes,
        });
        Ok(())
    }

    fn camera_clip_range(&self, camera: CameraHandle) -> (f32, f32) {
        self.camera_ranges
            .get(&camera.0)
            .copied()
            .unwrap_or((0.3, 1000.0))
    }
}

impl LayerTarget for HeadlessBackend {
    fn enable_layer(&mut self, object: ObjectId, layer: u8) {
        let mask = self.layer_mask(object) | (1 << layer);
        self.layers.insert(object, mask);
    }

    fn disable_layer(&mut self, object: ObjectId, layer: u8) {
        let mask = self.layer_mask(object) & !(1 << layer);
        self.layers.insert(object, mask);
    }
}
