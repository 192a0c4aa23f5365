//! Reactive Engine
//!
//! This module implements the reactive core: dependency tracking, effects,
//! batching, wrappers, refs, computeds, and watches.
//!
//! # Concepts
//!
//! ## Wrappers
//!
//! [`reactive`] produces a transparent view over a raw target. Reading a
//! property inside a running effect registers that effect as a dependent;
//! writing a property notifies exactly the effects that read it. Readonly
//! and shallow variants cover immutable views and top-level-only tracking.
//!
//! ## Refs
//!
//! A [`Ref`] is a single reactive slot. It boxes primitives, and inside a
//! wrapped object it unwraps transparently on read and write.
//!
//! ## Effects
//!
//! An [`effect`](effect()) is a computation that re-runs when the reactive
//! state it read changes. Triggers raised in one mutation burst coalesce:
//! each affected effect runs once per flush, in first-notified order.
//!
//! ## Computeds
//!
//! A [`computed`](computed()) is a cached derived value that recomputes
//! lazily, on read, and only when a version check proves some input moved.
//! Reading one inside an effect subscribes the effect to the derived
//! output, not to the inputs.
//!
//! # Implementation Notes
//!
//! Dependency detection is automatic: the runtime keeps an ambient
//! "active subscriber" in thread-local state, reads look it up, and a
//! doubly linked dep/subscriber graph with version stamps keeps re-runs
//! cheap. This approach is shared by the fine-grained reactivity family
//! of UI runtimes (Vue, SolidJS, Leptos).

mod batch;
mod computed;
mod dep;
mod effect;
mod handlers;
pub(crate) mod refs;
pub(crate) mod runtime;
mod subscriber;
mod watch;
pub(crate) mod wrap;

pub use batch::batch;
pub use computed::{computed, Computed};
pub use effect::{effect, effect_with, Effect, EffectOptions, Job};
pub use refs::Ref;
pub use runtime::untracked;
pub use watch::{watch, WatchOptions};
pub use wrap::{
    is_proxy, is_reactive, is_readonly, is_ref, is_shallow, mark_raw, reactive, readonly,
    shallow_reactive, shallow_readonly, to_raw, Wrapped,
};
