/*!
# Skirmish Render

GPU resource and render-state abstraction layer of the Skirmish RTS client.

Higher-level drawing code writes geometry and issues draws against one stable
contract while the graphics backend underneath differs: a legacy backend that
maps buffers directly with discard / no-overwrite hints, and a modern backend
that stages writes on the CPU and uploads them explicitly. Per-frame writes
never corrupt data the backend is still reading, and redundant state changes
never reach the device.

## Architecture

- **GraphicsDevice**: native backend trait, with `DirectMapDevice` and
  `StagedDevice` headless emulations
- **BufferPool**: buffer resources with owner and engine reference counts
- **LockScope**: scoped write access to a range, committed on release
- **RingAllocator**: per-frame sub-allocation out of one dynamic resource
- **RenderStateCache**: pending vs applied state with dirty tracking
- **DrawDispatcher**: flushes changed state and issues one native draw
- **RenderContext**: owns all of the above on the graphics thread
*/

// Internal modules
mod error;
mod engine;
pub mod log;
pub mod config;
pub mod graphics_device;
pub mod resource;
pub mod dynamic;
pub mod render_state;
pub mod render_context;

// Main skirmish namespace module
pub mod skirmish {
    // Error types
    pub use crate::error::{Error, Result};

    // Engine (global logger slot)
    pub use crate::engine::Engine;

    // Entry point and configuration
    pub use crate::render_context::RenderContext;
    pub use crate::config::{BackendKind, RenderConfig};

    // Logging sub-module (types only, NOT macros)
    pub mod log {
        pub use crate::log::{DefaultLogger, LogEntry, LogSeverity, Logger, MemoryLogger};
    }

    // Native backend contract and emulated devices
    pub mod device {
        pub use crate::graphics_device::*;
    }

    // Buffer resources
    pub mod resource {
        pub use crate::resource::*;
    }

    // Lock scopes and ring allocators
    pub mod dynamic {
        pub use crate::dynamic::*;
    }

    // Render state cache and draw dispatch
    pub mod render {
        pub use crate::render_state::*;
    }
}

// Re-export math library at crate root
pub use glam;
