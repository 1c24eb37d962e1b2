//! Temporal smoothing of the dispatched color
//!
//! Exponential moving average per channel. Cuts and compression noise are
//! damped while sustained color changes still arrive within a few ticks.

use crate::color::Rgb;

/// Blend one channel toward `new`, always moving at least one step while they differ
#[inline]
fn blend_channel(new: u8, previous: u8, alpha: f32) -> u8 {
    let blended = (alpha * new as f32 + (1.0 - alpha) * previous as f32).round();
    let blended = blended.clamp(0.0, 255.0) as u8;

    if blended == previous && previous != new {
        if new > previous {
            previous + 1
        } else {
            previous - 1
        }
    } else {
        blended
    }
}

/// Pure EMA step; `previous == None` is the bootstrap case and returns `new` unchanged
pub fn blend(new: Rgb, previous: Option<Rgb>, alpha: f32) -> Rgb {
    match previous {
        None => new,
        Some(prev) => Rgb::new(
            blend_channel(new.r, prev.r, alpha),
            blend_channel(new.g, prev.g, alpha),
            blend_channel(new.b, prev.b, alpha),
        ),
    }
}

/// Owns the last emitted color for the lifetime of the loop
#[derive(Debug, Clone)]
pub struct Smoother {
    alpha: f32,
    state: Option<Rgb>,
}

impl Smoother {
    /// `alpha` in (0, 1]; validated by the config layer
    pub fn new(alpha: f32) -> Self {
        Self { alpha, state: None }
    }

    pub fn smooth(&mut self, new: Rgb) -> Rgb {
        let out = blend(new, self.state, self.alpha);
        self.state = Some(out);
        out
    }

    /// Last emitted color, `None` before the first sample
    pub fn state(&self) -> Option<Rgb> {
        self.state
    }
}
