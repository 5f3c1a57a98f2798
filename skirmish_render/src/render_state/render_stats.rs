/// Per-frame render statistics

/// Counters reset at the start of every frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Native draw calls
    pub draw_calls: u32,
    /// Primitives submitted
    pub primitives: u32,
    /// Native transform sets
    pub transform_sets: u32,
    /// Native light sets
    pub light_sets: u32,
    /// Native material sets
    pub material_sets: u32,
    /// Native shader sets
    pub shader_sets: u32,
    /// Native texture sets
    pub texture_sets: u32,
    /// Native vertex / index buffer binds
    pub buffer_sets: u32,
    /// Dirty fields skipped because the device already had the value
    pub redundant_skips: u32,
    /// Lock scopes opened (static and ring)
    pub locks: u32,
    /// Ring wraps
    pub ring_wraps: u32,
    /// Ring backing resources replaced by larger ones
    pub ring_resizes: u32,
    /// Draws that copied CPU (sorting) geometry into the device rings
    pub sorting_draws: u32,
}

impl RenderStats {
    /// Native state changes issued
    pub fn state_changes(&self) -> u32 {
        self.transform_sets
            + self.light_sets
            + self.material_sets
            + self.shader_sets
            + self.texture_sets
            + self.buffer_sets
    }
}
