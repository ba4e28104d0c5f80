// =============================================================================
// VULKAN ENGINE - GPU resource lifecycle and a single-buffered frame loop
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  Platform (winit event loop, single init per process)           │
// │    └── Window (SurfaceProvider)                                 │
// │          └── Engine                                             │
// │                ├── Instance / Surface / Device (RAII roots)     │
// │                ├── DeletionQueue (everything built on them)     │
// │                └── Scene (meshes, materials, render objects)    │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Wait for the in-flight fence, reset it
// 2. Acquire swapchain image
// 3. Record: clear, bind, push constants, draw
// 4. Submit to the graphics queue
// 5. Present on the present queue
//
// =============================================================================

mod backend;
mod config;
mod engine;
mod error;
mod platform;
mod scene;

use anyhow::Result;
use config::Config;
use engine::Engine;
use log::LevelFilter;
use platform::{Platform, Window};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() {
    // Logging comes up first so config load problems are reported
    let env_override = init_logging();

    // Load configuration from config.toml
    let config = Config::load();
    if let Some(level) = configured_max_level(env_override, config.debug.level_filter()) {
        log::set_max_level(level);
    }
    log::info!("Starting Vulkan engine");

    if let Err(e) = run(&config) {
        log::error!("Fatal: {:?}", e);
        std::process::exit(1);
    }
}

fn run(config: &Config) -> Result<()> {
    let platform = Platform::init()?;
    let window = Window::open(platform, &config.window)?;

    let mut engine = Engine::init(window, config)?;
    engine.run()?;
    engine.cleanup()
}

/// Start env_logger at Info until the config is read.
///
/// The logger accepts everything; `log::set_max_level` does the filtering
/// afterwards. Returns whether RUST_LOG was set.
fn init_logging() -> bool {
    use env_logger::Builder;

    let env_override = std::env::var_os("RUST_LOG").is_some();

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Trace);
    builder.parse_default_env();
    builder.init();

    if !env_override {
        log::set_max_level(LevelFilter::Info);
    }
    env_override
}

/// RUST_LOG wins over the config file's `debug.log_level`
fn configured_max_level(env_override: bool, configured: LevelFilter) -> Option<LevelFilter> {
    (!env_override).then_some(configured)
}
