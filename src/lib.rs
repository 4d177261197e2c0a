//! CR scanner client driver
//!
//! This library implements the network protocol of a computed-radiography
//! imaging scanner: a TCP session with a token-based handshake, a polled
//! acquisition workflow and a streaming image format that is reassembled
//! into dense 16-bit grayscale frames.
//!
//! # Features
//!
//! - **Token handshake** - command names are resolved to session tokens at
//!   connect time
//! - **Positional correlation** - at most one command in flight, dispatched
//!   from a de-duplicating FIFO queue on a fixed tick
//! - **Fragment reassembly** - block-interleaved responses are stitched into
//!   contiguous payloads, eliding the injected intermediate headers
//! - **Image stream parsing** - marker-interleaved little-endian pixel words
//!   become rectangular frames via sparse scanline reconstruction
//!
//! # Quick Start
//!
//! ```no_run
//! use crlink::io::{CrDevice, DeviceConfig, DeviceEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DeviceConfig::new("192.168.177.101", 2006);
//!     let (device, mut events) = CrDevice::connect(config).await?;
//!
//!     device.start(5)?;
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             DeviceEvent::ModeList(modes) => println!("modes: {modes:?}"),
//!             DeviceEvent::Frame(frame) => {
//!                 println!("frame: {}x{} pixels", frame.width, frame.height);
//!                 break;
//!             }
//!             DeviceEvent::Error(e) => {
//!                 eprintln!("session error: {e}");
//!                 break;
//!             }
//!             _ => {}
//!         }
//!     }
//!
//!     device.stop()?;
//!     device.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **`protocol`** - byte-level framing
//!   - `header` - 14-byte inbound header, big-endian
//!   - `command` - outbound packet encoders and the command model
//!   - `frame` - logical response completion and fragment reassembly
//!   - `token` - session token table
//!   - `modelist` - INI-like acquisition mode list
//!
//! - **`image`** - pixel stream reconstruction
//!   - `stream` - marker interpretation, scanline assembly, rasterization
//!   - `config` - embedded JSON scan configuration
//!
//! - **`io`** - session engine
//!   - `queue` - pending command FIFO and the in-flight slot
//!   - `session` - handshake, dispatch, polling and teardown
//!
//! - **`error`** - unified [`CrError`] type and [`Result`] alias
//!
//! The engine runs as a single task: all buffer manipulation, queue access
//! and state transitions happen on one event context, so there are no locks
//! around protocol state. Logging goes through [`tracing`]; set `RUST_LOG`
//! (e.g. `crlink=debug`) with a `tracing-subscriber` to see the wire traffic.

pub mod error;
pub mod image;
pub mod io;
pub mod protocol;

// Re-export commonly used types
pub use error::{CrError, Result};
pub use image::ImageFrame;
pub use io::{CrDevice, DeviceConfig, DeviceEvent, DeviceState};
