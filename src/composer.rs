//! The pipeline composer.
//!
//! Owns the two ping-pong surfaces, the optional shared depth texture and
//! the fullscreen triangle, and drives the pass list once per frame.
//!
//! The per-frame loop works on *labels*: `input` holds the current image,
//! `output` is scratch. After a pass that reports `needs_swap` the labels
//! are exchanged; the allocations themselves never move. Between a mask
//! pass and its clear-mask pass every swap is preceded by a copy restricted
//! to the inverse stencil mask, so masked-out pixels survive.

use std::time::Instant;

use log::{debug, trace};
use serde::Deserialize;

use crate::backend::{
    Backend, CameraHandle, DepthPacking, FrameBufferType, FullscreenTriangle, SceneHandle,
    StencilFunc, StencilState, Surface, SurfaceDesc, SurfaceId, TextureHandle,
};
use crate::error::{Error, Result};
use crate::pass::{CopyPass, Pass, PassInit, PassKind, MASK_VALUE};

/// Composer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComposerConfig {
    pub depth_buffer: bool,
    pub stencil_buffer: bool,
    pub alpha: bool,
    pub multisampling: u32,
    pub frame_buffer_type: FrameBufferType,
    /// Make the last enabled pass render to screen.
    pub auto_render_to_screen: bool,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            depth_buffer: true,
            stencil_buffer: false,
            alpha: true,
            multisampling: 0,
            frame_buffer_type: FrameBufferType::UnsignedByte,
            auto_render_to_screen: true,
        }
    }
}

/// Wall-clock delta source used when no explicit delta is passed.
#[derive(Debug, Default)]
pub struct FrameTimer {
    last: Option<Instant>,
    elapsed: f32,
}

impl FrameTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seconds since the previous tick; zero on the first tick.
    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        let delta = self
            .last
            .map(|last| now.duration_since(last).as_secs_f32())
            .unwrap_or(0.0);
        self.last = Some(now);
        self.elapsed += delta;
        delta
    }

    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.elapsed = 0.0;
    }
}

/// Summary of one rendered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub passes_rendered: usize,
    pub swaps: usize,
    /// Surface holding the final image, unless the last pass rendered to
    /// screen.
    pub final_surface: SurfaceId,
}

/// Drives an ordered list of passes over two ping-pong surfaces.
pub struct EffectComposer {
    config: ComposerConfig,
    input: Surface,
    output: Surface,
    depth_texture: Option<TextureHandle>,
    fullscreen: FullscreenTriangle,
    copy_pass: CopyPass,
    passes: Vec<Box<dyn Pass>>,
    timer: FrameTimer,
    disposed: bool,
}

impl std::fmt::Debug for EffectComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectComposer")
            .field("config", &self.config)
            .field("input", &self.input)
            .field("output", &self.output)
            .field("depth_texture", &self.depth_texture)
            .field(
                "passes",
                &self.passes.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("disposed", &self.disposed)
            .finish()
    }
}

const DEPTH_PACKING: DepthPacking = DepthPacking::Basic;

impl EffectComposer {
    pub fn new(backend: &mut dyn Backend, config: ComposerConfig) -> Result<Self> {
        let (width, height) = backend.drawing_buffer_size();
        let input = Self::create_surface(backend, &config, "composer.input", width, height)?;
        let output = Self::create_surface(backend, &config, "composer.output", width, height)?;
        let fullscreen = FullscreenTriangle::create(backend)?;

        let mut copy_pass = CopyPass::new();
        let init = PassInit {
            alpha: config.alpha,
            frame_buffer_type: config.frame_buffer_type,
            fullscreen: fullscreen.geometry(),
            width,
            height,
        };
        copy_pass.initialize(backend, &init)?;

        debug!("composer created at {}x{}", width, height);
        Ok(Self {
            config,
            input,
            output,
            depth_texture: None,
            fullscreen,
            copy_pass,
            passes: Vec::new(),
            timer: FrameTimer::new(),
            disposed: false,
        })
    }

    fn create_surface(
        backend: &mut dyn Backend,
        config: &ComposerConfig,
        label: &str,
        width: u32,
        height: u32,
    ) -> Result<Surface> {
        let mut desc = SurfaceDesc::new(label, width, height);
        desc.depth_buffer = config.depth_buffer;
        desc.stencil_buffer = config.stencil_buffer;
        desc.frame_buffer_type = config.frame_buffer_type;
        desc.multisampling = config.multisampling;
        Ok(backend.create_surface(&desc)?)
    }

    pub fn config(&self) -> &ComposerConfig {
        &self.config
    }

    pub fn input_surface(&self) -> &Surface {
        &self.input
    }

    pub fn output_surface(&self) -> &Surface {
        &self.output
    }

    pub fn depth_texture(&self) -> Option<TextureHandle> {
        self.depth_texture
    }

    pub fn size(&self) -> (u32, u32) {
        self.input.size()
    }

    pub fn passes(&self) -> &[Box<dyn Pass>] {
        &self.passes
    }

    pub fn pass_mut(&mut self, index: usize) -> Option<&mut (dyn Pass + 'static)> {
        self.passes.get_mut(index).map(|p| p.as_mut())
    }

    pub fn timer(&self) -> &FrameTimer {
        &self.timer
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.disposed {
            return Err(Error::Disposed {
                pass: "EffectComposer".to_string(),
            });
        }
        Ok(())
    }

    fn pass_init(&self) -> PassInit {
        let (width, height) = self.input.size();
        PassInit {
            alpha: self.config.alpha,
            frame_buffer_type: self.config.frame_buffer_type,
            fullscreen: self.fullscreen.geometry(),
            width,
            height,
        }
    }

    /// Insert a pass at `index` (or append). The pass is initialized and
    /// sized to the current drawing buffer before it joins the list.
    pub fn add_pass(
        &mut self,
        backend: &mut dyn Backend,
        mut pass: Box<dyn Pass>,
        index: Option<usize>,
    ) -> Result<()> {
        self.ensure_alive()?;
        let index = index.unwrap_or(self.passes.len());
        if index > self.passes.len() {
            return Err(Error::InvalidPassIndex {
                index,
                len: self.passes.len(),
            });
        }

        let init = self.pass_init();
        pass.initialize(backend, &init)?;
        pass.set_size(backend, init.width, init.height)?;
        if let Some(texture) = self.depth_texture {
            pass.set_depth_texture(Some(texture), DEPTH_PACKING);
        }

        debug!("added pass '{}' at {}", pass.name(), index);
        self.passes.insert(index, pass);
        self.update_depth_texture(backend)?;
        self.apply_auto_render_to_screen();
        Ok(())
    }

    /// Remove and return the pass at `index`. The shared depth texture is
    /// released once no remaining pass needs it.
    pub fn remove_pass(&mut self, backend: &mut dyn Backend, index: usize) -> Result<Box<dyn Pass>> {
        if index >= self.passes.len() {
            return Err(Error::InvalidPassIndex {
                index,
                len: self.passes.len(),
            });
        }
        let mut pass = self.passes.remove(index);
        if self.depth_texture.is_some() {
            pass.set_depth_texture(None, DEPTH_PACKING);
        }
        if self.config.auto_render_to_screen {
            pass.flags_mut().render_to_screen = false;
        }
        debug!("removed pass '{}' from {}", pass.name(), index);

        self.update_depth_texture(backend)?;
        self.apply_auto_render_to_screen();
        Ok(pass)
    }

    pub fn remove_all_passes(&mut self, backend: &mut dyn Backend) -> Result<Vec<Box<dyn Pass>>> {
        let mut removed = Vec::with_capacity(self.passes.len());
        while !self.passes.is_empty() {
            removed.push(self.remove_pass(backend, 0)?);
        }
        Ok(removed)
    }

    fn needs_depth_texture(&self) -> bool {
        self.passes.iter().any(|p| p.flags().needs_depth_texture)
    }

    fn create_depth_texture(&mut self, backend: &mut dyn Backend) -> Result<()> {
        let (width, height) = self.input.size();
        let texture = backend.create_depth_texture(width, height)?;
        backend.attach_depth_texture(&mut self.input, Some(texture));
        for pass in &mut self.passes {
            pass.set_depth_texture(Some(texture), DEPTH_PACKING);
        }
        self.depth_texture = Some(texture);
        debug!("shared depth texture {:?} created", texture);
        Ok(())
    }

    fn delete_depth_texture(&mut self, backend: &mut dyn Backend) {
        if let Some(texture) = self.depth_texture.take() {
            for pass in &mut self.passes {
                pass.set_depth_texture(None, DEPTH_PACKING);
            }
            for surface in [&mut self.input, &mut self.output] {
                if surface.depth_texture() == Some(texture) {
                    backend.attach_depth_texture(surface, None);
                }
            }
            backend.dispose_texture(texture);
            debug!("shared depth texture {:?} released", texture);
        }
    }

    fn update_depth_texture(&mut self, backend: &mut dyn Backend) -> Result<()> {
        match (self.needs_depth_texture(), self.depth_texture.is_some()) {
            (true, false) => self.create_depth_texture(backend),
            (false, true) => {
                self.delete_depth_texture(backend);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn apply_auto_render_to_screen(&mut self) {
        if !self.config.auto_render_to_screen {
            return;
        }
        let last = self.passes.iter().rposition(|p| p.flags().enabled);
        for (i, pass) in self.passes.iter_mut().enumerate() {
            pass.flags_mut().render_to_screen = Some(i) == last;
        }
    }

    pub fn set_main_scene(&mut self, scene: SceneHandle) {
        for pass in &mut self.passes {
            pass.set_main_scene(scene);
        }
    }

    pub fn set_main_camera(&mut self, camera: CameraHandle) {
        for pass in &mut self.passes {
            pass.set_main_camera(camera);
        }
    }

    /// Render one frame. With `delta = None` the internal timer supplies it.
    pub fn render(&mut self, backend: &mut dyn Backend, delta: Option<f32>) -> Result<FrameReport> {
        self.ensure_alive()?;
        let delta = match delta {
            Some(delta) => delta,
            None => self.timer.tick(),
        };

        // Depth needs may change after a lazy recompile or a flag edit.
        self.update_depth_texture(backend)?;
        self.apply_auto_render_to_screen();

        let mut input = &self.input;
        let mut output = &self.output;
        let mut stencil_test = false;
        let mut swaps = 0;
        let mut passes_rendered = 0;

        for pass in self.passes.iter_mut() {
            if !pass.flags().enabled {
                continue;
            }
            if pass.flags().is_disposed() {
                return Err(Error::Disposed {
                    pass: pass.name().to_string(),
                });
            }

            trace!("rendering '{}' (stencil test {})", pass.name(), stencil_test);
            pass.render(backend, input, output, delta, stencil_test)?;
            passes_rendered += 1;

            if pass.flags().needs_swap {
                if stencil_test {
                    backend.set_stencil(StencilState::compare(StencilFunc::NotEqual, MASK_VALUE));
                    self.copy_pass.flags_mut().render_to_screen = pass.flags().render_to_screen;
                    self.copy_pass.render(backend, input, output, delta, stencil_test)?;
                    backend.set_stencil(StencilState::compare(StencilFunc::Equal, MASK_VALUE));
                }
                std::mem::swap(&mut input, &mut output);
                swaps += 1;
                trace!("swapped after '{}'", pass.name());
            }

            match pass.kind() {
                PassKind::Mask => stencil_test = true,
                PassKind::ClearMask => stencil_test = false,
                PassKind::Regular => {}
            }
        }

        Ok(FrameReport {
            passes_rendered,
            swaps,
            final_surface: input.id(),
        })
    }

    /// Resize the backend, both ping-pong surfaces and every pass.
    pub fn set_size(&mut self, backend: &mut dyn Backend, width: u32, height: u32) -> Result<()> {
        self.ensure_alive()?;
        backend.set_size(width, height);
        let (w, h) = backend.drawing_buffer_size();
        backend.resize_surface(&mut self.input, w, h)?;
        backend.resize_surface(&mut self.output, w, h)?;
        for pass in &mut self.passes {
            pass.set_size(backend, w, h)?;
        }
        debug!("composer resized to {}x{}", w, h);
        Ok(())
    }

    /// Re-create the ping-pong surfaces (and the shared depth texture) with
    /// the current configuration. Passes are kept.
    pub fn reset(&mut self, backend: &mut dyn Backend) -> Result<()> {
        self.ensure_alive()?;
        let had_depth = self.depth_texture.is_some();
        self.delete_depth_texture(backend);

        let (width, height) = backend.drawing_buffer_size();
        let input = Self::create_surface(backend, &self.config, "composer.input", width, height)?;
        let output = Self::create_surface(backend, &self.config, "composer.output", width, height)?;
        backend.dispose_surface(&std::mem::replace(&mut self.input, input));
        backend.dispose_surface(&std::mem::replace(&mut self.output, output));

        if had_depth || self.needs_depth_texture() {
            self.create_depth_texture(backend)?;
        }
        self.timer.reset();
        debug!("composer reset at {}x{}", width, height);
        Ok(())
    }

    /// Dispose every pass and all owned resources.
    pub fn dispose(&mut self, backend: &mut dyn Backend) {
        if self.disposed {
            return;
        }
        for pass in &mut self.passes {
            pass.dispose(backend);
        }
        self.passes.clear();
        self.delete_depth_texture(backend);
        self.copy_pass.dispose(backend);
        backend.dispose_surface(&self.input);
        backend.dispose_surface(&self.output);
        self.fullscreen.dispose(backend);
        self.disposed = true;
        debug!("composer disposed");
    }
}
