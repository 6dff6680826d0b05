//! Effect-merging shader compiler and multi-pass post-processing scheduler.
//!
//! Effects are merged into one composite fragment program by
//! [`shader::compile`] and hosted by an [`pass::EffectPass`]. An
//! [`composer::EffectComposer`] drives an ordered list of passes over two
//! ping-pong surfaces through a [`backend::Backend`].

pub mod backend;
pub mod blend;
pub mod composer;
pub mod effect;
pub mod error;
pub mod pass;
pub mod resolution;
pub mod selection;
pub mod shader;
pub mod uniform;

pub mod cli;

pub use blend::{BlendFunction, BlendMode};
pub use composer::{ComposerConfig, EffectComposer, FrameReport, FrameTimer};
pub use effect::{Effect, EffectAttributes, EffectHooks, EffectSpec, Extension};
pub use error::{BackendError, Error, MergeError, MergeErrorKind, Result};
pub use pass::{Pass, PassFlags, PassInit, PassKind};
pub use resolution::Resolution;
pub use selection::Selection;
pub use uniform::{Uniform, UniformValue};
