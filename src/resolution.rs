//! Effective render size for passes that work at their own resolution.
//!
//! A [`Resolution`] follows a base size (normally the composer size) and
//! derives its effective size either from an explicit preferred width/height
//! or from a scale factor applied to the base.

use log::warn;

/// Sentinel meaning "derive from the base size".
pub const AUTO_SIZE: i32 = -1;

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    base_width: u32,
    base_height: u32,
    preferred_width: Option<u32>,
    preferred_height: Option<u32>,
    scale: f32,
    generation: u64,
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Resolution {
    pub fn new(scale: f32) -> Self {
        Self {
            base_width: 1,
            base_height: 1,
            preferred_width: None,
            preferred_height: None,
            scale: sanitize_scale(scale),
            generation: 0,
        }
    }

    /// Preferred size given the way configuration files spell it, where
    /// [`AUTO_SIZE`] (or any non-positive value) means unset.
    pub fn with_preferred_size(mut self, width: i32, height: i32) -> Self {
        self.preferred_width = from_config(width);
        self.preferred_height = from_config(height);
        self
    }

    /// Counter bumped every time the effective size may have changed.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn touch(&mut self) {
        self.generation += 1;
    }

    pub fn base_size(&self) -> (u32, u32) {
        (self.base_width, self.base_height)
    }

    pub fn set_base_size(&mut self, width: u32, height: u32) {
        let (width, height) = (width.max(1), height.max(1));
        if (width, height) != (self.base_width, self.base_height) {
            self.base_width = width;
            self.base_height = height;
            self.touch();
        }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn set_scale(&mut self, scale: f32) {
        let scale = sanitize_scale(scale);
        if scale != self.scale {
            self.scale = scale;
            self.touch();
        }
    }

    pub fn preferred_width(&self) -> Option<u32> {
        self.preferred_width
    }

    pub fn preferred_height(&self) -> Option<u32> {
        self.preferred_height
    }

    pub fn set_preferred_width(&mut self, width: Option<u32>) {
        if width != self.preferred_width {
            self.preferred_width = width.map(|w| w.max(1));
            self.touch();
        }
    }

    pub fn set_preferred_height(&mut self, height: Option<u32>) {
        if height != self.preferred_height {
            self.preferred_height = height.map(|h| h.max(1));
            self.touch();
        }
    }

    pub fn set_preferred_size(&mut self, width: Option<u32>, height: Option<u32>) {
        self.set_preferred_width(width);
        self.set_preferred_height(height);
    }

    fn aspect(&self) -> f32 {
        self.base_width as f32 / self.base_height as f32
    }

    /// Effective width.
    pub fn width(&self) -> u32 {
        match (self.preferred_width, self.preferred_height) {
            (Some(w), _) => w,
            (None, Some(h)) => round_size(h as f32 * self.aspect()),
            (None, None) => round_size(self.base_width as f32 * self.scale),
        }
    }

    /// Effective height.
    pub fn height(&self) -> u32 {
        match (self.preferred_width, self.preferred_height) {
            (_, Some(h)) => h,
            (Some(w), None) => round_size(w as f32 / self.aspect()),
            (None, None) => round_size(self.base_height as f32 * self.scale),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width(), self.height())
    }
}

fn from_config(value: i32) -> Option<u32> {
    if value > 0 {
        Some(value as u32)
    } else {
        None
    }
}

fn sanitize_scale(scale: f32) -> f32 {
    if scale.is_finite() && scale > 0.0 {
        scale
    } else {
        warn!("invalid resolution scale {}, using 1.0", scale);
        1.0
    }
}

fn round_size(value: f32) -> u32 {
    value.round().max(1.0) as u32
}
