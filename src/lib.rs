//! Bedrock: native runtime services for an embedded-script content proxy.
//!
//! Page-processing logic lives in a sandboxed scripting language; this
//! crate supplies everything those scripts cannot do themselves:
//!
//! - [`reactor`]: per-heap asynchronous I/O: TCP clients and servers,
//!   timers, a worker pool for blocking DNS/connect, and a bridge for
//!   delegating the wait to a foreign (GUI) event loop
//! - [`codec`]: streaming DEFLATE and GZIP in both directions with an
//!   explicit pump protocol and flushable output for interactive use
//! - [`ordkey`]: order-preserving value serialization whose comparator
//!   ordering equals the semantic ordering, usable as database keys
//! - [`store`]: a process-wide concurrent key/value store over `ordkey`
//!   bytes with compare-and-swap, blocking waits and timed expiry
//! - [`css`]: CSS selector matching against a mirrored script-side DOM
//! - [`heap`]: the boundary model of the script runtime (values, arrays,
//!   hashes, refcounted typed handles)
//! - [`crypto`], [`fsops`], [`clock`], [`charset`]: digests and secure
//!   random, sandboxed file access, clocks and civil dates, legacy
//!   charset tables
//!
//! Scripts drive these through their interpreter's native-function
//! bindings; everything here is usable and testable without the
//! interpreter, which is what the test suites do.

pub mod charset;
pub mod clock;
pub mod codec;
pub mod crypto;
pub mod css;
pub mod error;
pub mod fsops;
pub mod heap;
pub mod ordkey;
pub mod reactor;
pub mod store;

mod util;

pub use error::{Result, RuntimeError};
pub use heap::{Heap, Value};
