//! Trellis Core
//!
//! This crate provides the reactive-state engine for the Trellis UI
//! framework. It implements:
//!
//! - Transparent reactive wrappers over dynamic values
//! - Automatic dependency tracking between state and computations
//! - Effects, batched re-execution, and pluggable scheduling
//! - Reference cells and cached derived values
//!
//! The rendering and component layers consume this engine through the
//! effect API and the wrapper constructors; they are separate crates.
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `value`: the dynamic value model (values, keys, raw targets)
//! - `reactive`: dependency tracking, effects, batching, wrappers, refs,
//!   computeds, and watches
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::{computed, effect, reactive, Value};
//!
//! let state = reactive(Value::from_json(serde_json::json!({ "count": 0 })));
//!
//! let doubled = computed({
//!     let state = state.clone();
//!     move || state.get("count").as_int().unwrap_or(0) * 2
//! });
//!
//! effect({
//!     let state = state.clone();
//!     let doubled = doubled.clone();
//!     move || println!("count: {:?}, doubled: {}", state.get("count"), doubled.get())
//! });
//!
//! state.set("count", 5);
//! // Effect automatically re-runs, prints: "count: Int(5), doubled: 10"
//! ```
//!
//! # Threading
//!
//! The engine is single-thread confined: all state lives in thread-local
//! storage and the handle types are not `Send`. Each thread gets an
//! independent reactive world.

mod error;
pub mod reactive;
pub mod value;

pub use error::Error;
pub use reactive::{
    batch, computed, effect, effect_with, is_proxy, is_reactive, is_readonly, is_ref, is_shallow,
    mark_raw, reactive, readonly, shallow_reactive, shallow_readonly, to_raw, untracked, watch,
    Computed, Effect, EffectOptions, Job, Ref, WatchOptions, Wrapped,
};
pub use value::{Key, Obj, Value};
