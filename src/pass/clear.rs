use glam::Vec4;

use super::{Pass, PassFlags};
use crate::backend::{bind_target, Backend, ClearFlags, ClearValues, Surface};
use crate::error::Result;

/// Clears the input surface (or the screen).
#[derive(Debug, Clone)]
pub struct ClearPass {
    flags: PassFlags,
    clear: ClearFlags,
    values: ClearValues,
}

impl Default for ClearPass {
    fn default() -> Self {
        Self::new(true, true, false)
    }
}

impl ClearPass {
    pub fn new(color: bool, depth: bool, stencil: bool) -> Self {
        Self {
            flags: PassFlags::without_swap(),
            clear: ClearFlags {
                color,
                depth,
                stencil,
            },
            values: ClearValues::default(),
        }
    }

    pub fn with_clear_color(mut self, color: Vec4) -> Self {
        self.values.color = color;
        self
    }

    pub fn set_clear_flags(&mut self, clear: ClearFlags) {
        self.clear = clear;
    }

    pub fn clear_values_mut(&mut self) -> &mut ClearValues {
        &mut self.values
    }

    /// Clear whatever target is currently bound.
    pub(crate) fn clear_bound(&self, backend: &mut dyn Backend) {
        backend.clear(self.clear, self.values);
    }
}

impl Pass for ClearPass {
    fn name(&self) -> &str {
        "ClearPass"
    }

    fn flags(&self) -> &PassFlags {
        &self.flags
    }

    fn flags_mut(&mut self) -> &mut PassFlags {
        &mut self.flags
    }

    fn render(
        &mut self,
        backend: &mut dyn Backend,
        input: &Surface,
        _output: &Surface,
        _delta: f32,
        _stencil_test: bool,
    ) -> Result<()> {
        bind_target(backend, input, self.flags.render_to_screen);
        self.clear_bound(backend);
        Ok(())
    }
}
