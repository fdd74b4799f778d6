//! # imgcall
//!
//! Invoke image operations by name, with arguments assembled at run time.
//!
//! Every operation in the [`registry`] declares its arguments (name, kind,
//! direction, required or optional). A caller assembles an [`OptionSet`] of
//! named inputs and output slots and hands it to [`call`]; the dispatcher
//! checks the options against the operation's schema, runs it, and writes
//! the results back into the caller's [`Slot`]s.
//!
//! ```no_run
//! use imgcall::{call, Image, OptionSet, OptionValue, Runtime, RuntimeConfig, Slot};
//!
//! let rt = Runtime::startup(RuntimeConfig::default())?;
//! let image = Image::from_file(&rt, "photo.jpg[shrink=2]", OptionSet::default())?;
//!
//! let rotated = Slot::new();
//! call(&rt, "rot", &OptionSet::new([
//!     OptionValue::input_image("in", &image),
//!     OptionValue::input_int("angle", 1),
//!     OptionValue::output_image("out", &rotated),
//! ]))?;
//!
//! if let Some(rotated) = rotated.take() {
//!     rotated.write_to_file(&rt, "rotated.png[compression=9]", OptionSet::default())?;
//! }
//! # Ok::<(), imgcall::Error>(())
//! ```
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`runtime`] | Init token: registry, config, handle accounting, call statistics, shutdown |
//! | [`registry`] | Operation trait, schemas, argument structure, and the built-in operations |
//! | [`dispatch`] | Binds an option set to an operation, runs it, collects outputs |
//! | [`options`] | `OptionValue`, `OptionSet`, and the `[key=value,flag]` option-string parser |
//! | [`value`] | The closed set of argument kinds and the caller-held output `Slot` |
//! | [`resolve`] | File name, suffix and buffer to loader/saver name |
//! | [`image`] | Image handles and the load/save entry points |
//! | [`blob`] | Byte buffers, borrowed from the caller or owned by the runtime |
//! | [`interpolate`] | Named resampling kernels |
//! | [`events`] | Per-image call history |
//! | [`config`] | `RuntimeConfig` loading and validation |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## One Closed Value Type
//!
//! Arguments cross the dispatch boundary as [`Value`], an enum with one
//! variant per [`Kind`]. Schemas are checked against the kind before an
//! operation runs, so operations read typed values and never see a mismatch.
//!
//! ## Release Is Ownership
//!
//! Images and runtime-allocated blobs carry a guard that is dropped with the
//! last handle. There is no finalizer and no explicit free: release happens
//! exactly once, on every exit path, including failed calls.
//!
//! ## An Explicit Runtime
//!
//! Nothing works without a [`Runtime`]. Tests start as many as they like;
//! programs that want a process-wide one use [`Runtime::shared`].

pub mod blob;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod image;
pub mod interpolate;
pub mod options;
pub mod output;
pub mod registry;
pub mod resolve;
pub mod runtime;
pub mod value;

pub use blob::Blob;
pub use config::{RuntimeConfig, SaveConfig};
pub use dispatch::{call, call_with_option_string};
pub use error::{Error, Result};
pub use events::CallEvent;
pub use image::{BandFormat, Header, Image, ImageType, Interpretation};
pub use interpolate::Interpolator;
pub use options::{OptionSet, OptionValue, OutputSlot};
pub use registry::{ArgumentSpec, Arguments, Operation, OperationError, Registry, Schema};
pub use runtime::{CallCounter, HandleStats, Runtime, ShutdownReport};
pub use value::{Direction, Kind, Slot, Value};
