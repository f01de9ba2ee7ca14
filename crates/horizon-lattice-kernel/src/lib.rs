//! Object and event kernel for Horizon Lattice.
//!
//! This crate provides the runtime every higher layer builds on:
//!
//! - **Object Model**: Generational ids, parent-child ownership, thread affinity, dynamic properties
//! - **Signals and Slots**: Per-signal connection lists with direct, queued and blocking delivery
//! - **Posted Events**: Per-thread priority queues, event filters and deferred deletion
//! - **Dispatchers**: Readiness polling for timers, socket notifiers and wake-ups
//! - **Event Loops**: Nested loops, event threads and the application singleton
//! - **Thread Pool**: A global worker pool drained at shutdown
//!
//! # Signal/Slot Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use horizon_lattice_kernel::meta::{MetaDescriptor, MethodMeta, OBJECT_META};
//! use horizon_lattice_kernel::{connection, ConnectionType, Object, ObjectBase, ObjectId};
//!
//! static COUNTER_META: MetaDescriptor = MetaDescriptor::new("Counter", Some(&OBJECT_META))
//!     .with_signals(&[MethodMeta::new("ticked", &["u32"])]);
//!
//! struct Counter {
//!     base: ObjectBase,
//! }
//!
//! impl Object for Counter {
//!     fn object_id(&self) -> ObjectId {
//!         self.base.id()
//!     }
//!     fn static_meta() -> &'static MetaDescriptor {
//!         &COUNTER_META
//!     }
//! }
//!
//! let counter = horizon_lattice_kernel::object::register(Counter { base: ObjectBase::new::<Counter>() });
//! let ticked = COUNTER_META.signal_offset();
//! let total = Arc::new(AtomicUsize::new(0));
//! let sink = total.clone();
//! connection::connect_callable(
//!     counter.base.id(),
//!     ticked,
//!     move |args| {
//!         sink.fetch_add(*args.get::<u32>(0).unwrap() as usize, Ordering::SeqCst);
//!     },
//!     ConnectionType::Direct,
//! )
//! .unwrap();
//! counter.base.emit(ticked, (5u32,));
//! assert_eq!(total.load(Ordering::SeqCst), 5);
//! ```
//!
//! # Event Loop Example
//!
//! ```no_run
//! use horizon_lattice_kernel::{Application, Event, EventPriority};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let app = Application::builder().args(std::env::args()).build()?;
//!     app.about_to_quit().connect(|()| println!("shutting down"))?;
//!     // Leave the loop as soon as it starts.
//!     Application::post_event(app.object_id(), Event::quit(), EventPriority::Normal);
//!     let code = app.exec()?;
//!     drop(app);
//!     std::process::exit(code);
//! }
//! ```

pub mod application;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod event_loop;
pub mod logging;
pub mod meta;
pub mod metatype;
pub mod object;
pub mod posted;
pub mod signal;
pub mod slot;
pub mod thread;
pub mod threadpool;
pub mod timer;

pub use application::{Application, ApplicationBuilder, ApplicationConfig, ApplicationHandle, Translator};
pub use connection::{ConnectionHandle, ConnectionInfo, ConnectionStats};
pub use dispatcher::{DispatcherKind, EventDispatcher, ProcessEventsFlags, SocketKind, SocketNotifier};
pub use error::{
    ApplicationError, ConnectError, DispatcherError, EventLoopError, KernelError, Result, ThreadPoolError,
};
pub use event::{Event, EventPriority, EventType};
pub use event_loop::EventLoop;
pub use logging::{ObjectTreeDebug, TreeFormatOptions, TreeStyle};
pub use meta::{MetaDescriptor, MethodMeta, PropertyMeta};
pub use metatype::{Arguments, FromArguments, IntoArguments, MetaTypeId, Value};
pub use object::{global_registry, Object, ObjectBase, ObjectError, ObjectId, ObjectRegistry, ObjectResult};
pub use signal::{ConnectionGuard, Signal};
pub use slot::{ConnectionType, Slot};
pub use thread::{EventThread, EventThreadBuilder, EventThreadConfig, ThreadData};
pub use threadpool::{CancellationToken, TaskHandle, ThreadPool, ThreadPoolConfig};
pub use timer::{TimerId, TimerType};
