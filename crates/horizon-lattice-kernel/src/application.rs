//! The process-wide application object.
//!
//! At most one [`Application`] exists at a time. Creating it records the
//! calling thread as the main thread, installs an event dispatcher there,
//! strips reserved debugging arguments from the command line and runs the
//! registered pre-routines. Dropping it runs the post-routines, waits for the
//! global thread pool, detaches the main dispatcher and frees the slot so a
//! new instance may be created later.
//!
//! ```no_run
//! use horizon_lattice_kernel::application::Application;
//!
//! fn main() -> Result<(), horizon_lattice_kernel::error::KernelError> {
//!     let app = Application::builder()
//!         .args(std::env::args())
//!         .name("viewer")
//!         .build()?;
//!     app.about_to_quit().connect(|()| println!("bye"))?;
//!     let code = app.exec()?;
//!     std::process::exit(code);
//! }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::dispatcher::{DispatcherKind, ProcessEventsFlags};
use crate::error::{ApplicationError, Result};
use crate::event::{Event, EventPriority, EventType};
use crate::event_loop::EventLoop;
use crate::logging::targets;
use crate::meta::{MetaDescriptor, MethodMeta, OBJECT_META};
use crate::object::{self, Object, ObjectBase, ObjectError, ObjectId, ObjectResult};
use crate::posted;
use crate::signal::Signal;
use crate::thread::{self, ThreadData};
use crate::threadpool::{self, ThreadPool, ThreadPoolConfig};

/// Environment variable holding extra library search paths.
pub const PLUGIN_PATH_ENV: &str = "HORIZON_PLUGIN_PATH";

/// The reserved debugger argument consumed from the command line.
const DEBUGGER_ARGUMENT: &str = "-qmljsdebugger";

/// Meta descriptor of the application object: adds `about_to_quit()`.
pub static APPLICATION_META: MetaDescriptor = MetaDescriptor::new("Application", Some(&OBJECT_META))
    .with_signals(&[MethodMeta::new("about_to_quit", &[])]);

type Routine = Arc<dyn Fn() + Send + Sync>;

/// Identifies a registered post-routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoutineId(u64);

static NEXT_ROUTINE_ID: AtomicU64 = AtomicU64::new(1);
static PRE_ROUTINES: Mutex<Vec<Routine>> = Mutex::new(Vec::new());
static POST_ROUTINES: Mutex<Vec<(RoutineId, Routine)>> = Mutex::new(Vec::new());

static INSTANCE: RwLock<Option<Arc<ApplicationState>>> = RwLock::new(None);
static CLOSING_DOWN: AtomicBool = AtomicBool::new(false);
static RUNNING: AtomicBool = AtomicBool::new(false);
static LIBRARY_PATHS: Mutex<Option<Vec<PathBuf>>> = Mutex::new(None);

/// Translates user-visible strings.
pub trait Translator: Send + Sync {
    /// Translation of `source` in `context`, or `None` if unknown.
    fn translate(&self, context: &str, source: &str, disambiguation: Option<&str>, n: Option<i32>) -> Option<String>;
}

/// Application configuration.
#[derive(Debug, Clone, Default)]
pub struct ApplicationConfig {
    /// Command line, program name first.
    pub args: Vec<String>,
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
    /// Organization name.
    pub organization_name: String,
    /// Organization domain.
    pub organization_domain: String,
    /// Dispatcher installed on the main thread if it has none.
    pub dispatcher: DispatcherKind,
    /// Size of the global thread pool, if it should be created eagerly.
    pub thread_pool_size: Option<usize>,
}

/// Builder for [`Application`].
#[derive(Debug, Clone, Default)]
pub struct ApplicationBuilder {
    config: ApplicationConfig,
}

impl ApplicationBuilder {
    /// A builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the command line.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the application name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the application version.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.config.version = version.into();
        self
    }

    /// Set the organization name.
    pub fn organization_name(mut self, name: impl Into<String>) -> Self {
        self.config.organization_name = name.into();
        self
    }

    /// Set the organization domain.
    pub fn organization_domain(mut self, domain: impl Into<String>) -> Self {
        self.config.organization_domain = domain.into();
        self
    }

    /// Choose the main thread's dispatcher.
    pub fn dispatcher(mut self, kind: DispatcherKind) -> Self {
        self.config.dispatcher = kind;
        self
    }

    /// Create the global thread pool with `threads` workers.
    pub fn thread_pool_size(mut self, threads: usize) -> Self {
        self.config.thread_pool_size = Some(threads);
        self
    }

    /// Create the application.
    pub fn build(self) -> Result<Application> {
        Application::new(self.config)
    }
}

/// The object that carries the application's signals.
struct ApplicationObject {
    base: ObjectBase,
}

impl Object for ApplicationObject {
    fn object_id(&self) -> ObjectId {
        self.base.id()
    }

    fn static_meta() -> &'static MetaDescriptor {
        &APPLICATION_META
    }

    fn event(&self, event: &mut Event) -> bool {
        if event.event_type() == EventType::Quit {
            if let Some(app) = Application::instance() {
                app.exit(0);
            }
            return true;
        }
        false
    }
}

struct ApplicationState {
    main: Arc<ThreadData>,
    object: Arc<ApplicationObject>,
    arguments: Vec<String>,
    debugger_arguments: Option<String>,
    name: RwLock<String>,
    version: RwLock<String>,
    organization_name: RwLock<String>,
    organization_domain: RwLock<String>,
    event_filters: RwLock<Vec<ObjectId>>,
    translators: RwLock<Vec<Arc<dyn Translator>>>,
    in_exec: AtomicBool,
    about_to_quit_emitted: AtomicBool,
}

/// A shared reference to the live application.
#[derive(Clone)]
pub struct ApplicationHandle {
    state: Arc<ApplicationState>,
}

/// The owning application instance. Dropping it shuts the kernel down.
pub struct Application {
    handle: ApplicationHandle,
}

impl Application {
    /// Start building an application.
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    /// Create the application on the calling thread, which becomes the main thread.
    ///
    /// Fails if another instance is alive or the dispatcher cannot be created.
    pub fn new(config: ApplicationConfig) -> Result<Application> {
        let mut instance = INSTANCE.write();
        if instance.is_some() {
            tracing::warn!(target: targets::APPLICATION, "there should be only one application object");
            return Err(ApplicationError::AlreadyExists.into());
        }

        let main = ThreadData::current();
        thread::set_main_thread(Some(main.clone()));
        if let Err(err) = main.ensure_dispatcher(config.dispatcher) {
            tracing::warn!(target: targets::APPLICATION, %err, "could not create the main event dispatcher");
            thread::set_main_thread(None);
            return Err(err);
        }

        if let Some(threads) = config.thread_pool_size {
            if !ThreadPool::global_initialized() {
                if let Err(err) = ThreadPool::init_global(ThreadPoolConfig::with_threads(threads)) {
                    tracing::warn!(target: targets::APPLICATION, %err, "could not size the global thread pool");
                }
            }
        }

        let (arguments, debugger_arguments) = strip_debug_arguments(config.args);
        if let Some(value) = &debugger_arguments {
            tracing::debug!(target: targets::APPLICATION, value, "consumed debugger arguments");
        }

        let object = object::register(ApplicationObject {
            base: ObjectBase::with_meta(&APPLICATION_META, std::any::type_name::<ApplicationObject>(), None),
        });
        object.base.set_name(config.name.clone());

        let state = Arc::new(ApplicationState {
            main,
            object,
            arguments,
            debugger_arguments,
            name: RwLock::new(config.name),
            version: RwLock::new(config.version),
            organization_name: RwLock::new(config.organization_name),
            organization_domain: RwLock::new(config.organization_domain),
            event_filters: RwLock::new(Vec::new()),
            translators: RwLock::new(Vec::new()),
            in_exec: AtomicBool::new(false),
            about_to_quit_emitted: AtomicBool::new(false),
        });
        *instance = Some(state.clone());
        drop(instance);

        CLOSING_DOWN.store(false, Ordering::Release);
        let routines = PRE_ROUTINES.lock().clone();
        for routine in routines {
            routine();
        }
        RUNNING.store(true, Ordering::Release);
        tracing::debug!(target: targets::APPLICATION, thread = state.main.serial(), "application created");

        Ok(Application {
            handle: ApplicationHandle { state },
        })
    }

    /// The live application, if any.
    pub fn instance() -> Option<ApplicationHandle> {
        INSTANCE.read().clone().map(|state| ApplicationHandle { state })
    }

    /// A shared handle to this application.
    pub fn handle(&self) -> ApplicationHandle {
        self.handle.clone()
    }

    /// Whether the application is being torn down.
    pub fn closing_down() -> bool {
        is_closing_down()
    }

    /// Whether no application has finished construction.
    pub fn starting_up() -> bool {
        !RUNNING.load(Ordering::Acquire)
    }

    /// Register a routine to run at every application construction.
    ///
    /// Runs immediately as well if an application already exists.
    pub fn add_pre_routine(routine: impl Fn() + Send + Sync + 'static) {
        let routine: Routine = Arc::new(routine);
        if INSTANCE.read().is_some() {
            routine();
        }
        PRE_ROUTINES.lock().insert(0, routine);
    }

    /// Register a routine to run once when the application is destroyed.
    ///
    /// Routines run most recently registered first.
    pub fn add_post_routine(routine: impl Fn() + Send + Sync + 'static) -> RoutineId {
        let id = RoutineId(NEXT_ROUTINE_ID.fetch_add(1, Ordering::Relaxed));
        POST_ROUTINES.lock().insert(0, (id, Arc::new(routine)));
        id
    }

    /// Unregister a post-routine. Returns whether it was registered.
    pub fn remove_post_routine(id: RoutineId) -> bool {
        let mut routines = POST_ROUTINES.lock();
        let before = routines.len();
        routines.retain(|(existing, _)| *existing != id);
        routines.len() != before
    }

    /// Translate `source` with the installed translators, most recent first.
    ///
    /// Falls back to `source`. With `n` set, `%n` is replaced by its value.
    pub fn translate(context: &str, source: &str, disambiguation: Option<&str>, n: Option<i32>) -> String {
        let translators = INSTANCE
            .read()
            .as_ref()
            .map(|state| state.translators.read().clone())
            .unwrap_or_default();
        let text = translators
            .iter()
            .find_map(|translator| translator.translate(context, source, disambiguation, n))
            .unwrap_or_else(|| source.to_string());
        match n {
            Some(n) => text.replace("%n", &n.to_string()),
            None => text,
        }
    }

    /// Directories searched for loadable libraries.
    ///
    /// Seeded on first use from `HORIZON_PLUGIN_PATH` and the executable's
    /// directory.
    pub fn library_paths() -> Vec<PathBuf> {
        LIBRARY_PATHS.lock().get_or_insert_with(default_library_paths).clone()
    }

    /// Replace the library search paths.
    pub fn set_library_paths(paths: Vec<PathBuf>) {
        *LIBRARY_PATHS.lock() = Some(paths);
    }

    /// Put `path` first in the search list unless it is already present.
    pub fn add_library_path(path: impl AsRef<Path>) {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return;
        }
        let mut cache = LIBRARY_PATHS.lock();
        let paths = cache.get_or_insert_with(default_library_paths);
        if !paths.iter().any(|p| p == path) {
            paths.insert(0, path.to_path_buf());
        }
    }

    /// Remove `path` from the search list.
    pub fn remove_library_path(path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut cache = LIBRARY_PATHS.lock();
        let paths = cache.get_or_insert_with(default_library_paths);
        paths.retain(|p| p != path);
    }

    /// Queue `event` for `receiver`.
    pub fn post_event(receiver: ObjectId, event: Event, priority: EventPriority) {
        posted::post_event(receiver, event, priority);
    }

    /// Deliver `event` to `receiver` synchronously.
    pub fn send_event(receiver: ObjectId, event: &mut Event) -> bool {
        object::send_event(receiver, event)
    }

    /// Deliver the calling thread's posted events.
    pub fn send_posted_events(receiver: Option<ObjectId>, event_type: Option<EventType>) -> bool {
        posted::send_posted_events(receiver, event_type)
    }

    /// Drop queued events without delivering them.
    pub fn remove_posted_events(receiver: Option<ObjectId>, event_type: Option<EventType>) {
        posted::remove_posted_events(receiver, event_type);
    }

    /// Run one dispatcher pass on the calling thread.
    pub fn process_events(flags: ProcessEventsFlags) -> bool {
        ThreadData::current()
            .dispatcher()
            .is_some_and(|dispatcher| dispatcher.process_events(flags))
    }

    /// Process the calling thread's pending events for at most `max_time`.
    pub fn process_events_for(flags: ProcessEventsFlags, max_time: Duration) {
        EventLoop::new().process_events_for(flags, max_time);
    }

    /// Whether the calling thread has queued events.
    pub fn has_pending_events() -> bool {
        posted::has_pending_events()
    }
}

impl std::ops::Deref for Application {
    type Target = ApplicationHandle;

    fn deref(&self) -> &ApplicationHandle {
        &self.handle
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        let state = &self.handle.state;
        if !state.main.is_current() {
            tracing::warn!(target: targets::APPLICATION, "application destroyed outside the main thread");
        }
        tracing::debug!(target: targets::APPLICATION, "application shutting down");

        // Routines registered while others run are run as well.
        loop {
            let next = {
                let mut routines = POST_ROUTINES.lock();
                if routines.is_empty() {
                    None
                } else {
                    Some(routines.remove(0).1)
                }
            };
            match next {
                Some(routine) => routine(),
                None => break,
            }
        }

        CLOSING_DOWN.store(true, Ordering::Release);
        RUNNING.store(false, Ordering::Release);
        threadpool::wait_for_global_done();

        state.main.set_dispatcher(None);
        *LIBRARY_PATHS.lock() = None;
        state.event_filters.write().clear();
        state.translators.write().clear();
        state.object.base.destroy();

        *INSTANCE.write() = None;
        thread::set_main_thread(None);
        CLOSING_DOWN.store(false, Ordering::Release);
        tracing::debug!(target: targets::APPLICATION, "application destroyed");
    }
}

impl ApplicationHandle {
    fn is_current_instance(&self) -> bool {
        INSTANCE
            .read()
            .as_ref()
            .is_some_and(|state| Arc::ptr_eq(state, &self.state))
    }

    /// Command line after debugger arguments were removed.
    pub fn arguments(&self) -> &[String] {
        &self.state.arguments
    }

    /// Value of a consumed `-qmljsdebugger` argument.
    pub fn debugger_arguments(&self) -> Option<&str> {
        self.state.debugger_arguments.as_deref()
    }

    /// The application name.
    pub fn name(&self) -> String {
        self.state.name.read().clone()
    }

    /// Set the application name.
    pub fn set_name(&self, name: impl Into<String>) {
        let name = name.into();
        self.state.object.base.set_name(name.clone());
        *self.state.name.write() = name;
    }

    /// The application version.
    pub fn version(&self) -> String {
        self.state.version.read().clone()
    }

    /// Set the application version.
    pub fn set_version(&self, version: impl Into<String>) {
        *self.state.version.write() = version.into();
    }

    /// The organization name.
    pub fn organization_name(&self) -> String {
        self.state.organization_name.read().clone()
    }

    /// Set the organization name.
    pub fn set_organization_name(&self, name: impl Into<String>) {
        *self.state.organization_name.write() = name.into();
    }

    /// The organization domain.
    pub fn organization_domain(&self) -> String {
        self.state.organization_domain.read().clone()
    }

    /// Set the organization domain.
    pub fn set_organization_domain(&self, domain: impl Into<String>) {
        *self.state.organization_domain.write() = domain.into();
    }

    /// Id of the application object.
    pub fn object_id(&self) -> ObjectId {
        self.state.object.base.id()
    }

    /// The main thread.
    pub fn main_thread(&self) -> &Arc<ThreadData> {
        &self.state.main
    }

    /// Emitted once when `exec` is about to return.
    pub fn about_to_quit(&self) -> Signal<()> {
        Signal::new(self.object_id(), APPLICATION_META.signal_offset())
    }

    /// Run the main event loop until [`exit`](Self::exit) is called.
    ///
    /// Must be called from the main thread while no loop is running there.
    /// Emits `about_to_quit` before returning, then delivers the remaining
    /// deferred deletes.
    pub fn exec(&self) -> Result<i32> {
        if !self.is_current_instance() {
            return Err(ApplicationError::NotCreated.into());
        }
        let main = &self.state.main;
        if !main.is_current() {
            tracing::warn!(target: targets::APPLICATION, "exec must be called from the main thread");
            return Err(ApplicationError::NotMainThread("exec").into());
        }
        if main.running_loops() > 0 || self.state.in_exec.load(Ordering::Acquire) {
            tracing::warn!(target: targets::APPLICATION, "the event loop is already running");
            return Err(ApplicationError::AlreadyRunning.into());
        }

        main.set_quit_now(false);
        self.state.in_exec.store(true, Ordering::Release);
        self.state.about_to_quit_emitted.store(false, Ordering::Release);
        let result = EventLoop::new().exec();
        main.set_quit_now(false);
        self.state.in_exec.store(false, Ordering::Release);

        if !self.state.about_to_quit_emitted.swap(true, Ordering::AcqRel) {
            self.about_to_quit().emit(());
        }
        posted::send_posted_events_in(main, None, Some(EventType::DeferredDelete));

        let code = result?;
        tracing::debug!(target: targets::APPLICATION, code, "main event loop returned");
        Ok(code)
    }

    /// Make every loop running on the main thread return `code`.
    pub fn exit(&self, code: i32) {
        tracing::debug!(target: targets::APPLICATION, code, "exit requested");
        self.state.main.exit_running_loops(code);
    }

    /// Exit with code 0.
    pub fn quit(&self) {
        self.exit(0);
    }

    /// Whether `exec` is running.
    pub fn is_running(&self) -> bool {
        self.state.in_exec.load(Ordering::Acquire)
    }

    /// Install an event filter that sees every event delivered on the main thread.
    ///
    /// The filter must live on the main thread. Re-installing moves it to
    /// the front.
    pub fn install_event_filter(&self, filter: ObjectId) -> ObjectResult<()> {
        let core = object::core(filter).ok_or(ObjectError::InvalidObjectId(filter))?;
        if core.thread().serial() != self.state.main.serial() {
            tracing::warn!(target: targets::APPLICATION, ?filter, "application event filter must live in the main thread");
            return Err(ObjectError::CrossThreadFilter);
        }
        let mut filters = self.state.event_filters.write();
        filters.retain(|f| *f != filter);
        filters.insert(0, filter);
        Ok(())
    }

    /// Remove an application event filter.
    pub fn remove_event_filter(&self, filter: ObjectId) {
        self.state.event_filters.write().retain(|f| *f != filter);
    }

    /// Installed application event filters, most recent first.
    pub fn event_filters(&self) -> Vec<ObjectId> {
        self.state.event_filters.read().clone()
    }

    /// Install `translator` ahead of the existing ones and notify with
    /// `LanguageChange`.
    pub fn install_translator(&self, translator: Arc<dyn Translator>) {
        self.state.translators.write().insert(0, translator);
        self.notify_language_change();
    }

    /// Remove `translator`. Returns whether it was installed.
    pub fn remove_translator(&self, translator: &Arc<dyn Translator>) -> bool {
        let removed = {
            let mut translators = self.state.translators.write();
            let before = translators.len();
            translators.retain(|t| !same_translator(t, translator));
            translators.len() != before
        };
        if removed {
            self.notify_language_change();
        }
        removed
    }

    fn notify_language_change(&self) {
        let id = self.object_id();
        let event = Event::new(EventType::LanguageChange);
        if self.state.main.is_current() {
            let mut event = event;
            object::send_event(id, &mut event);
        } else {
            posted::post_event(id, event, EventPriority::Normal);
        }
    }
}

impl fmt::Debug for ApplicationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationHandle")
            .field("name", &*self.state.name.read())
            .field("main_thread", &self.state.main.serial())
            .field("running", &self.is_running())
            .finish()
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application").field("handle", &self.handle).finish()
    }
}

fn same_translator(a: &Arc<dyn Translator>, b: &Arc<dyn Translator>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Split reserved debugger arguments off a command line.
///
/// Returns the remaining arguments and the debugger value, if one was given.
/// Either `-qmljsdebugger=VALUE` or `-qmljsdebugger VALUE` is accepted, with
/// one or two leading dashes.
pub fn strip_debug_arguments(args: Vec<String>) -> (Vec<String>, Option<String>) {
    let mut kept = Vec::with_capacity(args.len());
    let mut debugger = None;
    let mut args = args.into_iter();
    if let Some(program) = args.next() {
        kept.push(program);
    }
    while let Some(arg) = args.next() {
        if !arg.starts_with('-') {
            kept.push(arg);
            continue;
        }
        let normalized = arg.strip_prefix('-').filter(|rest| rest.starts_with('-')).unwrap_or(arg.as_str());
        if let Some(value) = normalized.strip_prefix(DEBUGGER_ARGUMENT).and_then(|rest| rest.strip_prefix('=')) {
            debugger = Some(value.to_string());
        } else if normalized == DEBUGGER_ARGUMENT && !args.as_slice().is_empty() {
            debugger = args.next();
        } else {
            kept.push(arg);
        }
    }
    (kept, debugger)
}

fn default_library_paths() -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = Vec::new();
    if let Some(value) = std::env::var_os(PLUGIN_PATH_ENV) {
        for path in std::env::split_paths(&value) {
            if path.is_dir() && !paths.contains(&path) {
                paths.push(path);
            }
        }
    }
    if let Some(dir) = std::env::current_exe().ok().and_then(|exe| exe.parent().map(Path::to_path_buf)) {
        if !paths.contains(&dir) {
            paths.push(dir);
        }
    }
    paths
}

/// Whether the application is shutting down. Event delivery is suppressed meanwhile.
pub(crate) fn is_closing_down() -> bool {
    CLOSING_DOWN.load(Ordering::Acquire)
}

/// Application event filters, empty when no application exists.
pub(crate) fn app_event_filters() -> Vec<ObjectId> {
    INSTANCE
        .read()
        .as_ref()
        .map(|state| state.event_filters.read().clone())
        .unwrap_or_default()
}

static_assertions::assert_impl_all!(ApplicationHandle: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_strip_debugger_with_value() {
        let (kept, debugger) = strip_debug_arguments(args(&["app", "-qmljsdebugger=port:3768", "file.txt"]));
        assert_eq!(kept, args(&["app", "file.txt"]));
        assert_eq!(debugger.as_deref(), Some("port:3768"));
    }

    #[test]
    fn test_strip_debugger_double_dash_separate_value() {
        let (kept, debugger) = strip_debug_arguments(args(&["app", "--qmljsdebugger", "block", "-v"]));
        assert_eq!(kept, args(&["app", "-v"]));
        assert_eq!(debugger.as_deref(), Some("block"));
    }

    #[test]
    fn test_strip_keeps_trailing_flag_without_value() {
        let (kept, debugger) = strip_debug_arguments(args(&["app", "x", "-qmljsdebugger"]));
        assert_eq!(kept, args(&["app", "x", "-qmljsdebugger"]));
        assert_eq!(debugger, None);
    }

    #[test]
    fn test_strip_keeps_other_arguments_verbatim() {
        let input = args(&["-qmljsdebugger=first", "--verbose", "-qmljsdebuggerx", "plain"]);
        let (kept, debugger) = strip_debug_arguments(input.clone());
        assert_eq!(kept, input);
        assert_eq!(debugger, None);
        assert_eq!(strip_debug_arguments(Vec::new()), (Vec::new(), None));
    }

    #[test]
    fn test_translate_without_application_falls_back() {
        assert_eq!(Application::translate("ctx", "%n files", None, Some(3)), "3 files");
        assert_eq!(Application::translate("ctx", "%n files", None, None), "%n files");
    }

    #[test]
    fn test_library_path_editing() {
        Application::set_library_paths(vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        Application::add_library_path("/c");
        Application::add_library_path("/a");
        Application::add_library_path("");
        assert_eq!(
            Application::library_paths(),
            vec![PathBuf::from("/c"), PathBuf::from("/a"), PathBuf::from("/b")]
        );
        Application::remove_library_path("/b");
        assert_eq!(Application::library_paths(), vec![PathBuf::from("/c"), PathBuf::from("/a")]);
    }

    #[test]
    fn test_post_routine_removal() {
        let id = Application::add_post_routine(|| {});
        assert!(Application::remove_post_routine(id));
        assert!(!Application::remove_post_routine(id));
    }
}
