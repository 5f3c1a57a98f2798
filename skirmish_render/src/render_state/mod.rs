/// Render state caching and draw dispatch

pub mod render_state_cache;
pub mod draw_dispatcher;
pub mod render_stats;

pub use render_state_cache::{DirtyFlags, IndexBinding, RenderState, RenderStateCache, VertexBinding};
pub use draw_dispatcher::{DrawCall, DrawDispatcher};
pub use render_stats::RenderStats;
