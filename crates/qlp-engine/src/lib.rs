//! QLP protocol engine.
//!
//! An [`Engine`] owns the datagram transport and runs one background receive
//! loop. The loop feeds discovery announcements into the device [`Registry`]
//! and matches command replies against the per-device [`Correlator`]. Callers
//! reach devices through [`DeviceHandle`]s.
//!
//! ```no_run
//! use qlp_engine::{Engine, EngineConfig};
//! use qlp_frame::Color;
//!
//! # async fn run() -> qlp_engine::Result<()> {
//! let engine = Engine::bind(EngineConfig::default())?;
//! engine.start()?;
//! for device in engine.discover().await? {
//!     let handle = engine.handle(&device.device_id)?;
//!     handle.fill(Color::new(0, 0, 255)).await?;
//! }
//! engine.stop()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod correlator;
pub mod device;
pub mod engine;
pub mod error;
pub mod handle;

pub use config::EngineConfig;
pub use correlator::{Correlator, Dispatch, Disposition, Resolution};
pub use device::{Device, Registry, Upsert};
pub use engine::{Engine, EngineEvent, EngineState, Outbound};
pub use error::{EngineError, Result};
pub use handle::{DeviceHandle, MAX_STRIP_LENGTH};
