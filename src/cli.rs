use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use serde_json::json;

use crate::backend::headless::HeadlessBackend;
use crate::backend::{CameraHandle, Capabilities, SceneHandle};
use crate::blend::BlendFunction;
use crate::composer::{ComposerConfig, EffectComposer};
use crate::effect::{Effect, EffectAttributes, EffectSpec};
use crate::pass::{EffectPass, RenderPass};
use crate::shader::{self, MergeResult};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge a list of effects into one composite shader
    Compile {
        /// JSON file holding an array of effect descriptors
        effects: PathBuf,

        /// Directory for effect.frag, effect.vert and report.json
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// List the blend function catalogue
    BlendFunctions,

    /// Run a render/effect pipeline over the headless backend
    Simulate {
        /// JSON file holding an array of effect descriptors
        effects: PathBuf,

        /// Composer configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, default_value_t = 800)]
        width: u32,

        #[arg(long, default_value_t = 600)]
        height: u32,

        /// Number of frames to render
        #[arg(long, default_value_t = 60)]
        frames: u32,

        /// Frames per second used for the delta time
        #[arg(long, default_value_t = 60.0)]
        fps: f32,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Compile { effects, out } => compile(&effects, out.as_deref()),
        Commands::BlendFunctions => {
            blend_functions();
            Ok(())
        }
        Commands::Simulate {
            effects,
            config,
            width,
            height,
            frames,
            fps,
        } => simulate(&effects, config.as_deref(), width, height, frames, fps),
    }
}

fn load_effects(path: &Path) -> Result<Vec<Effect>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read effects file {:?}", path))?;
    let specs: Vec<EffectSpec> = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse effects file {:?}", path))?;
    Ok(specs.into_iter().map(Effect::from_spec).collect())
}

fn report(effects: &[Effect], merged: &MergeResult) -> serde_json::Value {
    let caps = Capabilities::default();
    let mut warnings = Vec::new();
    if merged.uniform_count > caps.max_fragment_uniforms {
        warnings.push(format!(
            "{} uniforms exceed the limit of {}",
            merged.uniform_count, caps.max_fragment_uniforms
        ));
    }
    if merged.varying_count > caps.max_varyings {
        warnings.push(format!(
            "{} varyings exceed the limit of {}",
            merged.varying_count, caps.max_varyings
        ));
    }

    json!({
        "effects": effects.iter().map(|e| e.name()).collect::<Vec<_>>(),
        "activeEffects": merged.active_effects,
        "skipRendering": merged.skip_rendering,
        "attributes": {
            "depth": merged.attributes.contains(EffectAttributes::DEPTH),
            "convolution": merged.attributes.contains(EffectAttributes::CONVOLUTION),
        },
        "uvTransformed": merged.uv_transformed,
        "readDepth": merged.read_depth,
        "blendFunctions": merged.blend_functions.iter().map(|f| f.name()).collect::<Vec<_>>(),
        "defines": merged.defines.iter().map(|(k, v)| (k.to_string(), json!(v))).collect::<serde_json::Map<_, _>>(),
        "uniforms": merged.uniforms.keys().collect::<Vec<_>>(),
        "extensions": merged.extensions.iter().map(|e| e.name()).collect::<Vec<_>>(),
        "uniformCount": merged.uniform_count,
        "varyingCount": merged.varying_count,
        "budgetWarnings": warnings,
    })
}

fn compile(path: &Path, out: Option<&Path>) -> Result<()> {
    let effects = load_effects(path)?;
    let merged = shader::compile(&effects)
        .with_context(|| format!("Failed to compile effects from {:?}", path))?;
    let report = serde_json::to_string_pretty(&report(&effects, &merged))?;

    match out {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create output directory {:?}", dir))?;
            fs::write(dir.join("effect.frag"), &merged.fragment_shader)?;
            fs::write(dir.join("effect.vert"), &merged.vertex_shader)?;
            fs::write(dir.join("report.json"), &report)?;
            println!("Wrote shaders and report to {:?}", dir);
        }
        None => {
            println!("// fragment\n{}\n", merged.fragment_shader);
            println!("// vertex\n{}\n", merged.vertex_shader);
            println!("{}", report);
        }
    }
    Ok(())
}

fn blend_functions() {
    println!("{:<4} {:<14} {:<8} hdr-safe", "id", "name", "symbol");
    for function in BlendFunction::ALL {
        println!(
            "{:<4} {:<14} {:<8} {}",
            function.id(),
            function.name(),
            if function.shader_code().is_some() {
                function.symbol()
            } else {
                "-".to_string()
            },
            function.is_hdr_safe()
        );
    }
}

fn simulate(
    effects_path: &Path,
    config_path: Option<&Path>,
    width: u32,
    height: u32,
    frames: u32,
    fps: f32,
) -> Result<()> {
    let effects = load_effects(effects_path)?;
    let config = match config_path {
        Some(path) => {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {:?}", path))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {:?}", path))?
        }
        None => ComposerConfig::default(),
    };

    let scene = SceneHandle(1);
    let camera = CameraHandle(1);
    let mut backend = HeadlessBackend::new(width, height);
    let mut composer = EffectComposer::new(&mut backend, config)?;
    composer.add_pass(&mut backend, Box::new(RenderPass::new(scene, camera)), None)?;
    composer.add_pass(
        &mut backend,
        Box::new(EffectPass::new(Some(camera), effects)?),
        None,
    )?;

    let delta = 1.0 / fps.max(1.0);
    let mut swaps = 0;
    let mut passes = 0;
    for frame in 0..frames {
        let report = composer.render(&mut backend, Some(delta))?;
        swaps += report.swaps;
        passes += report.passes_rendered;
        if frame == 0 {
            info!("first frame: {:?}", report);
        }
    }

    println!("Simulated {} frames at {}x{}", frames, width, height);
    println!("  passes rendered:  {}", passes);
    println!("  swaps:            {}", swaps);
    println!("  commands:         {}", backend.commands().len());
    println!("  fullscreen draws: {}", backend.draws().count());
    println!(
        "  depth texture:    {}",
        if composer.depth_texture().is_some() { "shared" } else { "none" }
    );

    composer.dispose(&mut backend);
    println!("  leaked surfaces:  {}", backend.live_surface_count());
    Ok(())
}
