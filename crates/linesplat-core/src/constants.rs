/// Margin used when clamping colors and opacities before the logit
pub const PARAM_EPSILON: f32 = 1e-4;

/// Perpendicular distance under which a splat is near-culled
pub const NEAR_CULL_DISTANCE: f32 = 0.001;

/// Color channels per splat
pub const CHANNELS: usize = 3;

/// Shortest normal accepted when building a scan line
pub const MIN_NORMAL_LENGTH: f32 = 1e-8;
