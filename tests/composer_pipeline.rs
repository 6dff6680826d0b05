use std::cell::{Cell, RefCell};
use std::rc::Rc;

use postfx::backend::headless::{Command, HeadlessBackend};
use postfx::backend::{
    Backend, CameraHandle, DepthPacking, SceneHandle, StencilFunc, Surface, SurfaceId,
    TextureHandle,
};
use postfx::blend::BlendFunction;
use postfx::composer::{ComposerConfig, EffectComposer};
use postfx::effect::{Effect, EffectAttributes, EffectHooks};
use postfx::error::Error;
use postfx::pass::{
    ClearMaskPass, EffectPass, KawaseBlurPass, MaskPass, Pass, PassFlags, PassInit, RenderPass,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Render {
        pass: String,
        input: SurfaceId,
        output: SurfaceId,
        stencil_test: bool,
        render_to_screen: bool,
    },
    SetSize {
        pass: String,
        width: u32,
        height: u32,
    },
    DepthTexture {
        pass: String,
        texture: Option<TextureHandle>,
    },
}

type Journal = Rc<RefCell<Vec<Event>>>;

/// Records every call it receives.
struct RecordingPass {
    name: String,
    flags: PassFlags,
    journal: Journal,
}

impl RecordingPass {
    fn new(name: &str, journal: &Journal) -> Self {
        Self {
            name: name.to_string(),
            flags: PassFlags::default(),
            journal: journal.clone(),
        }
    }

    fn with_swap(mut self, needs_swap: bool) -> Self {
        self.flags.needs_swap = needs_swap;
        self
    }

    fn with_depth(mut self) -> Self {
        self.flags.needs_depth_texture = true;
        self
    }
}

impl Pass for RecordingPass {
    fn name(&self) -> &str {
        &self.name
    }

    fn flags(&self) -> &PassFlags {
        &self.flags
    }

    fn flags_mut(&mut self) -> &mut PassFlags {
        &mut self.flags
    }

    fn set_size(&mut self, _backend: &mut dyn Backend, width: u32, height: u32) -> postfx::Result<()> {
        self.journal.borrow_mut().push(Event::SetSize {
            pass: self.name.clone(),
            width,
            height,
        });
        Ok(())
    }

    fn set_depth_texture(&mut self, texture: Option<TextureHandle>, _packing: DepthPacking) {
        self.journal.borrow_mut().push(Event::DepthTexture {
            pass: self.name.clone(),
            texture,
        });
    }

    fn render(
        &mut self,
        _backend: &mut dyn Backend,
        input: &Surface,
        output: &Surface,
        _delta: f32,
        stencil_test: bool,
    ) -> postfx::Result<()> {
        self.journal.borrow_mut().push(Event::Render {
            pass: self.name.clone(),
            input: input.id(),
            output: output.id(),
            stencil_test,
            render_to_screen: self.flags.render_to_screen,
        });
        Ok(())
    }
}

fn renders(journal: &Journal) -> Vec<(String, SurfaceId, SurfaceId, bool)> {
    journal
        .borrow()
        .iter()
        .filter_map(|e| match e {
            Event::Render {
                pass,
                input,
                output,
                stencil_test,
                ..
            } => Some((pass.clone(), *input, *output, *stencil_test)),
            _ => None,
        })
        .collect()
}

const OUTLINE: &str = "uniform float thickness;\n\nvoid mainImage(const in vec4 inputColor, const in vec2 uv, out vec4 outputColor) {\n\tvec4 n = texture2D(inputBuffer, uv + texelSize * thickness);\n\toutputColor = abs(n - inputColor);\n}";

const VIGNETTE: &str = "uniform float darkness;\n\nvoid mainImage(const in vec4 inputColor, const in vec2 uv, out vec4 outputColor) {\n\tfloat d = distance(uv, vec2(0.5));\n\toutputColor = vec4(inputColor.rgb * (1.0 - d * darkness), inputColor.a);\n}";

const FOG: &str = "void mainImage(const in vec4 inputColor, const in vec2 uv, const in float depth, out vec4 outputColor) {\n\toutputColor = mix(inputColor, vec4(1.0), depth);\n}";

fn stencil_config() -> ComposerConfig {
    ComposerConfig {
        stencil_buffer: true,
        ..ComposerConfig::default()
    }
}

#[test]
fn test_mask_scopes_stencil_testing_with_real_passes() {
    init_logger();
    let mut backend = HeadlessBackend::new(640, 360);
    let mut composer = EffectComposer::new(&mut backend, stencil_config()).unwrap();
    let scene = SceneHandle(1);
    let camera = CameraHandle(1);

    let outline = Effect::builder("outline", OUTLINE)
        .attributes(EffectAttributes::CONVOLUTION)
        .uniform("thickness", postfx::Uniform::float(1.0))
        .build();
    let vignette = Effect::builder("vignette", VIGNETTE)
        .uniform("darkness", postfx::Uniform::float(0.5))
        .build();

    composer.add_pass(&mut backend, Box::new(RenderPass::new(scene, camera)), None).unwrap();
    composer.add_pass(&mut backend, Box::new(MaskPass::new(SceneHandle(2), camera)), None).unwrap();
    composer
        .add_pass(&mut backend, Box::new(EffectPass::new(Some(camera), vec![outline]).unwrap()), None)
        .unwrap();
    composer.add_pass(&mut backend, Box::new(ClearMaskPass::new()), None).unwrap();
    composer
        .add_pass(&mut backend, Box::new(EffectPass::new(Some(camera), vec![vignette]).unwrap()), None)
        .unwrap();

    let input = composer.input_surface().id();
    let output = composer.output_surface().id();
    backend.take_commands();

    let report = composer.render(&mut backend, Some(1.0 / 60.0)).unwrap();
    assert_eq!(report.passes_rendered, 5);
    assert_eq!(report.swaps, 2);
    assert_eq!(report.final_surface, input);

    let draws: Vec<(String, Option<SurfaceId>, bool, StencilFunc)> = backend
        .draws()
        .map(|c| match c {
            Command::DrawFullscreen {
                target,
                label,
                stencil,
                ..
            } => (label.clone(), *target, stencil.test, stencil.func),
            _ => unreachable!(),
        })
        .collect();

    assert_eq!(
        draws,
        vec![
            ("EffectPass(outline)".to_string(), Some(output), true, StencilFunc::Equal),
            ("CopyPass".to_string(), Some(output), true, StencilFunc::NotEqual),
            ("EffectPass(vignette)".to_string(), None, false, StencilFunc::Always),
        ]
    );
}

#[test]
fn test_stencil_flag_and_final_surface_parity() {
    init_logger();
    let journal: Journal = Rc::default();
    let mut backend = HeadlessBackend::default();
    let mut composer = EffectComposer::new(&mut backend, stencil_config()).unwrap();
    let camera = CameraHandle(1);

    composer
        .add_pass(&mut backend, Box::new(RecordingPass::new("scene", &journal).with_swap(false)), None)
        .unwrap();
    composer.add_pass(&mut backend, Box::new(MaskPass::new(SceneHandle(2), camera)), None).unwrap();
    composer.add_pass(&mut backend, Box::new(RecordingPass::new("outline", &journal)), None).unwrap();
    composer.add_pass(&mut backend, Box::new(ClearMaskPass::new()), None).unwrap();
    composer.add_pass(&mut backend, Box::new(RecordingPass::new("vignette", &journal)), None).unwrap();

    let a = composer.input_surface().id();
    let b = composer.output_surface().id();

    let report = composer.render(&mut backend, Some(0.016)).unwrap();
    assert_eq!(report.swaps, 2);
    assert_eq!(report.final_surface, a);
    assert_eq!(
        renders(&journal),
        vec![
            ("scene".to_string(), a, b, false),
            ("outline".to_string(), a, b, true),
            ("vignette".to_string(), b, a, false),
        ]
    );

    // A third swapping pass leaves the image in the other surface.
    journal.borrow_mut().clear();
    composer.add_pass(&mut backend, Box::new(RecordingPass::new("grain", &journal)), None).unwrap();
    let report = composer.render(&mut backend, Some(0.016)).unwrap();
    assert_eq!(report.swaps, 3);
    assert_eq!(report.final_surface, b);

    // Labels reset every frame.
    let first = renders(&journal)[0].clone();
    assert_eq!((first.1, first.2), (a, b));
}

#[test]
fn test_last_enabled_pass_renders_to_screen() {
    let journal: Journal = Rc::default();
    let mut backend = HeadlessBackend::default();
    let mut composer = EffectComposer::new(&mut backend, ComposerConfig::default()).unwrap();
    composer.add_pass(&mut backend, Box::new(RecordingPass::new("a", &journal)), None).unwrap();
    composer.add_pass(&mut backend, Box::new(RecordingPass::new("b", &journal)), None).unwrap();
    composer.pass_mut(1).unwrap().flags_mut().enabled = false;

    composer.render(&mut backend, Some(0.016)).unwrap();
    let screen: Vec<(String, bool)> = journal
        .borrow()
        .iter()
        .filter_map(|e| match e {
            Event::Render {
                pass,
                render_to_screen,
                ..
            } => Some((pass.clone(), *render_to_screen)),
            _ => None,
        })
        .collect();
    assert_eq!(screen, vec![("a".to_string(), true)]);
}

#[test]
fn test_depth_texture_is_shared_and_released_with_last_user() {
    init_logger();
    let journal: Journal = Rc::default();
    let mut backend = HeadlessBackend::default();
    let mut composer = EffectComposer::new(&mut backend, ComposerConfig::default()).unwrap();

    composer
        .add_pass(&mut backend, Box::new(RecordingPass::new("ssao", &journal).with_depth()), None)
        .unwrap();
    composer
        .add_pass(&mut backend, Box::new(RecordingPass::new("fog", &journal).with_depth()), None)
        .unwrap();

    assert_eq!(backend.depth_textures_created(), 1);
    let shared = composer.depth_texture().unwrap();
    let received: Vec<(String, Option<TextureHandle>)> = journal
        .borrow()
        .iter()
        .filter_map(|e| match e {
            Event::DepthTexture { pass, texture } => Some((pass.clone(), *texture)),
            _ => None,
        })
        .collect();
    assert_eq!(
        received,
        vec![
            ("ssao".to_string(), Some(shared)),
            ("fog".to_string(), Some(shared)),
        ]
    );
    assert_eq!(composer.input_surface().depth_texture(), Some(shared));

    composer.remove_pass(&mut backend, 0).unwrap();
    assert_eq!(composer.depth_texture(), Some(shared));
    assert_eq!(backend.live_depth_texture_count(), 1);

    composer.remove_pass(&mut backend, 0).unwrap();
    assert_eq!(composer.depth_texture(), None);
    assert_eq!(backend.live_depth_texture_count(), 0);
    assert_eq!(composer.input_surface().depth_texture(), None);
}

#[test]
fn test_render_releases_depth_texture_nobody_needs() {
    let journal: Journal = Rc::default();
    let mut backend = HeadlessBackend::default();
    let mut composer = EffectComposer::new(&mut backend, ComposerConfig::default()).unwrap();
    composer
        .add_pass(&mut backend, Box::new(RecordingPass::new("ssao", &journal).with_depth()), None)
        .unwrap();
    assert!(composer.depth_texture().is_some());

    composer.pass_mut(0).unwrap().flags_mut().needs_depth_texture = false;
    composer.render(&mut backend, Some(0.016)).unwrap();
    assert_eq!(composer.depth_texture(), None);
    assert_eq!(backend.live_depth_texture_count(), 0);
    assert_eq!(composer.input_surface().depth_texture(), None);

    composer.pass_mut(0).unwrap().flags_mut().needs_depth_texture = true;
    composer.render(&mut backend, Some(0.016)).unwrap();
    assert!(composer.depth_texture().is_some());
    assert_eq!(backend.depth_textures_created(), 2);
}

#[test]
fn test_effect_pass_with_depth_effect_requests_depth_texture() {
    let mut backend = HeadlessBackend::default();
    let mut composer = EffectComposer::new(&mut backend, ComposerConfig::default()).unwrap();
    let fog = Effect::builder("fog", FOG)
        .attributes(EffectAttributes::DEPTH)
        .build();
    composer
        .add_pass(&mut backend, Box::new(EffectPass::new(None, vec![fog]).unwrap()), None)
        .unwrap();

    assert!(composer.passes()[0].flags().needs_depth_texture);
    assert!(composer.depth_texture().is_some());
    composer.render(&mut backend, Some(0.016)).unwrap();
    assert_eq!(backend.depth_textures_created(), 1);
}

#[test]
fn test_skipped_depth_effect_still_requests_depth_texture() {
    let mut backend = HeadlessBackend::default();
    let mut composer = EffectComposer::new(&mut backend, ComposerConfig::default()).unwrap();
    let fog = Effect::builder("fog", FOG)
        .attributes(EffectAttributes::DEPTH)
        .blend_function(BlendFunction::Skip)
        .build();
    composer
        .add_pass(&mut backend, Box::new(EffectPass::new(None, vec![fog]).unwrap()), None)
        .unwrap();

    let flags = *composer.passes()[0].flags();
    assert!(flags.needs_depth_texture);
    assert!(!flags.needs_swap);
    assert!(composer.depth_texture().is_some());

    backend.take_commands();
    let report = composer.render(&mut backend, Some(0.016)).unwrap();
    assert_eq!(report.swaps, 0);
    // The last pass still owns the screen, so it presents its input.
    let targets: Vec<Option<SurfaceId>> = backend
        .draws()
        .map(|c| match c {
            Command::DrawFullscreen { target, .. } => *target,
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(targets, vec![None]);
}

struct CountingHooks(Rc<Cell<u32>>);

impl EffectHooks for CountingHooks {
    fn update(
        &mut self,
        _backend: &mut dyn Backend,
        _input: &Surface,
        _delta: f32,
        _uniforms: &postfx::uniform::UniformMap,
    ) -> postfx::Result<()> {
        self.0.set(self.0.get() + 1);
        Ok(())
    }
}

#[test]
fn test_trailing_skipped_effect_pass_presents_scene() {
    init_logger();
    let mut backend = HeadlessBackend::default();
    let mut composer = EffectComposer::new(&mut backend, ComposerConfig::default()).unwrap();
    let updates = Rc::new(Cell::new(0));
    let off = Effect::builder("off", VIGNETTE)
        .blend_function(BlendFunction::Skip)
        .hooks(Box::new(CountingHooks(updates.clone())))
        .build();
    composer
        .add_pass(&mut backend, Box::new(RenderPass::new(SceneHandle(1), CameraHandle(1))), None)
        .unwrap();
    composer
        .add_pass(&mut backend, Box::new(EffectPass::new(None, vec![off]).unwrap()), None)
        .unwrap();
    backend.take_commands();

    let frames = 3;
    let mut swaps = 0;
    for _ in 0..frames {
        swaps += composer.render(&mut backend, Some(0.016)).unwrap().swaps;
    }

    assert_eq!(updates.get(), frames);
    assert_eq!(swaps, 0);
    let targets: Vec<Option<SurfaceId>> = backend
        .draws()
        .map(|c| match c {
            Command::DrawFullscreen { target, .. } => *target,
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(targets, vec![None; frames as usize]);
}

#[test]
fn test_resize_reaches_every_surface_and_pass_once() {
    init_logger();
    let journal: Journal = Rc::default();
    let mut backend = HeadlessBackend::default();
    let mut composer = EffectComposer::new(&mut backend, ComposerConfig::default()).unwrap();
    composer
        .add_pass(&mut backend, Box::new(RecordingPass::new("one", &journal).with_depth()), None)
        .unwrap();
    composer.add_pass(&mut backend, Box::new(RecordingPass::new("two", &journal)), None).unwrap();
    composer.add_pass(&mut backend, Box::new(KawaseBlurPass::default()), None).unwrap();
    journal.borrow_mut().clear();

    composer.set_size(&mut backend, 1024, 512).unwrap();

    let sizes: Vec<Event> = journal
        .borrow()
        .iter()
        .filter(|e| matches!(e, Event::SetSize { .. }))
        .cloned()
        .collect();
    assert_eq!(
        sizes,
        vec![
            Event::SetSize { pass: "one".to_string(), width: 1024, height: 512 },
            Event::SetSize { pass: "two".to_string(), width: 1024, height: 512 },
        ]
    );

    assert_eq!(composer.size(), (1024, 512));
    for surface in [composer.input_surface(), composer.output_surface()] {
        assert_eq!(surface.size(), (1024, 512));
        assert_eq!(backend.surface_size(surface.id()), Some((1024, 512)));
    }
    let depth = composer.depth_texture().unwrap();
    assert_eq!(backend.texture_size(depth), Some((1024, 512)));

    let resized_blur_surfaces = backend
        .commands()
        .iter()
        .filter(|c| matches!(c, Command::ResizeSurface { width: 512, height: 256, .. }))
        .count();
    assert_eq!(resized_blur_surfaces, 2);
}

#[test]
fn test_new_pass_is_initialized_at_current_size() {
    struct SizeWatcher(Rc<RefCell<Option<(u32, u32)>>>, PassFlags);

    impl Pass for SizeWatcher {
        fn name(&self) -> &str {
            "size-watcher"
        }
        fn flags(&self) -> &PassFlags {
            &self.1
        }
        fn flags_mut(&mut self) -> &mut PassFlags {
            &mut self.1
        }
        fn initialize(&mut self, _backend: &mut dyn Backend, init: &PassInit) -> postfx::Result<()> {
            *self.0.borrow_mut() = Some((init.width, init.height));
            Ok(())
        }
        fn render(
            &mut self,
            _backend: &mut dyn Backend,
            _input: &Surface,
            _output: &Surface,
            _delta: f32,
            _stencil_test: bool,
        ) -> postfx::Result<()> {
            Ok(())
        }
    }

    let seen = Rc::new(RefCell::new(None));
    let mut backend = HeadlessBackend::new(300, 200).with_pixel_ratio(2.0);
    let mut composer = EffectComposer::new(&mut backend, ComposerConfig::default()).unwrap();
    composer
        .add_pass(&mut backend, Box::new(SizeWatcher(seen.clone(), PassFlags::default())), None)
        .unwrap();
    assert_eq!(*seen.borrow(), Some((600, 400)));
}

#[test]
fn test_backend_failure_aborts_only_that_frame() {
    let mut backend = HeadlessBackend::default();
    let mut composer = EffectComposer::new(&mut backend, ComposerConfig::default()).unwrap();
    composer
        .add_pass(&mut backend, Box::new(RenderPass::new(SceneHandle(1), CameraHandle(1))), None)
        .unwrap();

    backend.fail_next_draw("context lost");
    let err = composer.render(&mut backend, Some(0.016)).unwrap_err();
    assert!(matches!(err, Error::Backend(_)));
    assert!(err.to_string().contains("context lost"));

    assert!(composer.render(&mut backend, Some(0.016)).is_ok());
}

#[test]
fn test_disposed_pass_is_rejected() {
    let journal: Journal = Rc::default();
    let mut backend = HeadlessBackend::default();
    let mut composer = EffectComposer::new(&mut backend, ComposerConfig::default()).unwrap();
    composer.add_pass(&mut backend, Box::new(RecordingPass::new("gone", &journal)), None).unwrap();
    composer.pass_mut(0).unwrap().dispose(&mut backend);

    match composer.render(&mut backend, Some(0.016)) {
        Err(Error::Disposed { pass }) => assert_eq!(pass, "gone"),
        other => panic!("expected a disposed error, got {:?}", other),
    }
}

#[test]
fn test_reset_recreates_surfaces_and_keeps_passes() {
    let journal: Journal = Rc::default();
    let mut backend = HeadlessBackend::default();
    let mut composer = EffectComposer::new(&mut backend, ComposerConfig::default()).unwrap();
    composer
        .add_pass(&mut backend, Box::new(RecordingPass::new("keep", &journal).with_depth()), None)
        .unwrap();
    let old_input = composer.input_surface().id();
    let old_depth = composer.depth_texture().unwrap();

    composer.reset(&mut backend).unwrap();

    assert_eq!(composer.passes().len(), 1);
    assert_ne!(composer.input_surface().id(), old_input);
    assert_eq!(backend.surface_size(old_input), None);
    assert_eq!(backend.live_surface_count(), 2);
    let depth = composer.depth_texture().unwrap();
    assert_ne!(depth, old_depth);
    assert_eq!(backend.live_depth_texture_count(), 1);
    assert_eq!(composer.input_surface().depth_texture(), Some(depth));
}
