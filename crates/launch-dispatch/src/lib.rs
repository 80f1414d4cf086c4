//! Main-thread marshalling for launch startup.
//!
//! A [`Dispatcher`] is created on the thread that owns startup state and drains a
//! queue of work submitted from any thread through a cloneable [`DispatcherHandle`].
//! Handlers registered with the dispatcher form an explicit allow-list that
//! background and native callbacks invoke by name or through a typed invoker.

pub mod completion;
pub mod dispatcher;
pub mod error;
pub mod invoker;

pub use completion::Completion;
pub use dispatcher::{Dispatcher, DispatcherHandle, DrainReport, LocalSpawner, DEFAULT_DISPATCHER_TICK};
pub use error::{DispatchError, InvalidHandlerReason};
pub use invoker::{HandlerKey, HandlerRegistration, TypedInvoker};
