//! Logging and debugging facilities for the kernel.
//!
//! This module provides:
//! - Target names for filtering the kernel's `tracing` output per subsystem
//! - Debug rendering of object trees and of an object's connections
//! - `kernel_*` logging macros bound to the crate target
//!
//! # Tracing Integration
//!
//! The kernel logs through the `tracing` crate. Install a subscriber to see
//! the output:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("horizon_lattice_kernel::signal=trace")
//!     .init();
//! ```
//!
//! # Debug Visualization
//!
//! ```
//! use horizon_lattice_kernel::logging::{ObjectTreeDebug, TreeFormatOptions};
//!
//! let debug = ObjectTreeDebug::with_options(TreeFormatOptions::minimal());
//! println!("{debug}");
//! ```

use std::fmt::{self, Write as FmtWrite};

use crate::connection;
use crate::object::{global_registry, ObjectId, ObjectResult};

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Crate-wide target.
    pub const KERNEL: &str = "horizon_lattice_kernel";
    /// Object lifecycle, tree and properties.
    pub const OBJECT: &str = "horizon_lattice_kernel::object";
    /// Connections and emission.
    pub const SIGNAL: &str = "horizon_lattice_kernel::signal";
    /// Posting and delivery of events.
    pub const EVENT: &str = "horizon_lattice_kernel::event";
    /// Event loops.
    pub const EVENT_LOOP: &str = "horizon_lattice_kernel::event_loop";
    /// Event dispatchers and socket notifiers.
    pub const DISPATCHER: &str = "horizon_lattice_kernel::dispatcher";
    /// Timers.
    pub const TIMER: &str = "horizon_lattice_kernel::timer";
    /// The application object.
    pub const APPLICATION: &str = "horizon_lattice_kernel::application";
    /// Thread data, event threads and the worker pool.
    pub const THREAD: &str = "horizon_lattice_kernel::thread";
}

/// Style options for object tree visualization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TreeStyle {
    /// ASCII characters for tree branches.
    Ascii,
    /// Unicode box-drawing characters.
    #[default]
    Unicode,
    /// Compact single-line representation.
    Compact,
}

/// Configuration for object tree debug output.
#[derive(Debug, Clone)]
pub struct TreeFormatOptions {
    /// The style of tree visualization.
    pub style: TreeStyle,
    /// Whether to show object IDs.
    pub show_ids: bool,
    /// Whether to show class names.
    pub show_types: bool,
    /// Whether to show dynamic property names.
    pub show_properties: bool,
    /// Whether to show the number of outgoing connections.
    pub show_connections: bool,
    /// Maximum depth to traverse (None for unlimited).
    pub max_depth: Option<usize>,
    /// Indent size for each level.
    pub indent_size: usize,
}

impl Default for TreeFormatOptions {
    fn default() -> Self {
        Self {
            style: TreeStyle::default(),
            show_ids: true,
            show_types: true,
            show_properties: false,
            show_connections: false,
            max_depth: None,
            indent_size: 2,
        }
    }
}

impl TreeFormatOptions {
    /// Options for detailed debugging output.
    pub fn detailed() -> Self {
        Self {
            show_properties: true,
            show_connections: true,
            ..Default::default()
        }
    }

    /// Options for minimal output.
    pub fn minimal() -> Self {
        Self {
            show_ids: false,
            show_types: false,
            show_properties: false,
            show_connections: false,
            ..Default::default()
        }
    }
}

/// Debug utility for visualizing object trees.
#[derive(Debug, Clone, Default)]
pub struct ObjectTreeDebug {
    options: TreeFormatOptions,
}

impl ObjectTreeDebug {
    /// A visualizer with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// A visualizer with custom options.
    pub fn with_options(options: TreeFormatOptions) -> Self {
        Self { options }
    }

    /// Format every tree, starting from all root objects.
    pub fn format_all(&self) -> ObjectResult<String> {
        let registry = global_registry();
        let roots = registry.root_objects();

        let mut output = String::new();
        let _ = writeln!(output, "Object Tree ({} total objects):", registry.object_count());
        if roots.is_empty() {
            output.push_str("  (empty)\n");
        } else {
            for root in roots {
                // Roots may be destroyed by other threads while formatting.
                if registry.contains(root) {
                    self.format_subtree_into(root, 0, true, &mut output)?;
                }
            }
        }
        Ok(output)
    }

    /// Format the subtree rooted at `root`.
    pub fn format_subtree(&self, root: ObjectId) -> ObjectResult<String> {
        let mut output = String::new();
        self.format_subtree_into(root, 0, true, &mut output)?;
        Ok(output)
    }

    fn format_subtree_into(&self, id: ObjectId, depth: usize, is_last: bool, output: &mut String) -> ObjectResult<()> {
        if self.options.max_depth.is_some_and(|max| depth > max) {
            return Ok(());
        }

        let registry = global_registry();
        let name = registry.object_name(id)?;
        let class_name = registry.class_name(id)?;
        let children = registry.children(id)?;

        output.push_str(&self.build_prefix(depth, is_last));
        output.push_str(if name.is_empty() { "(unnamed)" } else { &name });
        if self.options.show_ids {
            let _ = write!(output, " [{id:?}]");
        }
        if self.options.show_types {
            let _ = write!(output, " ({class_name})");
        }
        if self.options.show_connections {
            let count = connection::outgoing_connections(id).len();
            if count > 0 {
                let _ = write!(output, " <{count} connections>");
            }
        }
        output.push('\n');

        if self.options.show_properties {
            let prefix = self.build_property_prefix(depth);
            for property in registry.dynamic_property_names(id)? {
                let _ = writeln!(output, "{prefix}  .{property}");
            }
        }

        let child_count = children.len();
        for (i, child) in children.into_iter().enumerate() {
            self.format_subtree_into(child, depth + 1, i + 1 == child_count, output)?;
        }
        Ok(())
    }

    fn build_prefix(&self, depth: usize, is_last: bool) -> String {
        if depth == 0 {
            return String::new();
        }
        let (branch, tee, corner) = match self.options.style {
            TreeStyle::Ascii => ("|", "+-- ", "`-- "),
            TreeStyle::Unicode => ("\u{2502}", "\u{251c}\u{2500}\u{2500} ", "\u{2514}\u{2500}\u{2500} "),
            TreeStyle::Compact => ("", "- ", "- "),
        };

        let mut prefix = String::new();
        for _ in 0..(depth - 1) {
            prefix.push_str(branch);
            prefix.extend(std::iter::repeat_n(' ', self.options.indent_size));
        }
        prefix.push_str(if is_last { corner } else { tee });
        prefix
    }

    fn build_property_prefix(&self, depth: usize) -> String {
        let branch = match self.options.style {
            TreeStyle::Ascii => "|",
            TreeStyle::Unicode => "\u{2502}",
            TreeStyle::Compact => "",
        };
        let mut prefix = String::new();
        for _ in 0..depth {
            prefix.push_str(branch);
            prefix.extend(std::iter::repeat_n(' ', self.options.indent_size));
        }
        prefix
    }
}

impl fmt::Display for ObjectTreeDebug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.format_all() {
            Ok(output) => f.write_str(&output),
            Err(e) => write!(f, "Error formatting object tree: {e}"),
        }
    }
}

/// Render the subtree rooted at `root` with detailed options.
pub fn dump_object_tree(root: ObjectId) -> ObjectResult<String> {
    ObjectTreeDebug::with_options(TreeFormatOptions::detailed()).format_subtree(root)
}

/// Render an object's identity and its connections in both directions.
pub fn dump_object_info(id: ObjectId) -> ObjectResult<String> {
    let registry = global_registry();
    let class_name = registry.class_name(id)?;
    let name = registry.object_name(id)?;
    let meta = registry.core(id).map(|core| core.meta());

    let signal_name = |signal: Option<usize>, meta: Option<&'static crate::meta::MetaDescriptor>| match signal {
        None => "<all signals>".to_string(),
        Some(index) => meta
            .and_then(|m| m.signal(index))
            .map(|m| m.signature())
            .unwrap_or_else(|| format!("<signal {index}>")),
    };

    let mut output = String::new();
    let _ = writeln!(output, "OBJECT {class_name}::{name} [{id:?}]");

    output.push_str("  SIGNALS OUT\n");
    let outgoing = connection::outgoing_connections(id);
    if outgoing.is_empty() {
        output.push_str("        <None>\n");
    }
    for info in outgoing {
        let peer_class = registry.class_name(info.peer).unwrap_or("<destroyed>");
        let _ = writeln!(
            output,
            "        signal: {}\n          --> {peer_class} [{:?}] {} ({:?})",
            signal_name(info.signal, meta),
            info.peer,
            info.slot,
            info.kind
        );
    }

    output.push_str("  SIGNALS IN\n");
    let incoming = connection::incoming_connections(id);
    if incoming.is_empty() {
        output.push_str("        <None>\n");
    }
    for info in incoming {
        let sender_meta = registry.core(info.peer).map(|core| core.meta());
        let peer_class = registry.class_name(info.peer).unwrap_or("<destroyed>");
        let _ = writeln!(
            output,
            "          <-- {peer_class} [{:?}] {} via {}",
            info.peer,
            signal_name(info.signal, sender_meta),
            info.slot
        );
    }
    Ok(output)
}

/// Log at trace level under the crate target.
#[macro_export]
macro_rules! kernel_trace {
    ($($arg:tt)*) => {
        tracing::trace!(target: "horizon_lattice_kernel", $($arg)*)
    };
}

/// Log at debug level under the crate target.
#[macro_export]
macro_rules! kernel_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "horizon_lattice_kernel", $($arg)*)
    };
}

/// Log at info level under the crate target.
#[macro_export]
macro_rules! kernel_info {
    ($($arg:tt)*) => {
        tracing::info!(target: "horizon_lattice_kernel", $($arg)*)
    };
}

/// Log at warn level under the crate target.
#[macro_export]
macro_rules! kernel_warn {
    ($($arg:tt)*) => {
        tracing::warn!(target: "horizon_lattice_kernel", $($arg)*)
    };
}

/// Log at error level under the crate target.
#[macro_export]
macro_rules! kernel_error {
    ($($arg:tt)*) => {
        tracing::error!(target: "horizon_lattice_kernel", $($arg)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{MetaDescriptor, MethodMeta, OBJECT_META};
    use crate::object::{register, Object, ObjectBase};
    use crate::slot::{ConnectionType, Slot};
    use std::sync::Arc;

    static WIDGET_META: MetaDescriptor = MetaDescriptor::new("TestWidget", Some(&OBJECT_META))
        .with_signals(&[MethodMeta::new("clicked", &[])]);

    struct TestWidget {
        base: ObjectBase,
    }

    impl TestWidget {
        fn new(name: &str) -> Arc<Self> {
            let widget = register(Self {
                base: ObjectBase::new::<Self>(),
            });
            widget.base.set_name(name);
            widget
        }
    }

    impl Object for TestWidget {
        fn object_id(&self) -> ObjectId {
            self.base.id()
        }

        fn static_meta() -> &'static MetaDescriptor {
            &WIDGET_META
        }
    }

    #[test]
    fn test_tree_format_all() {
        let _widget = TestWidget::new("listed");
        let output = ObjectTreeDebug::new().format_all().unwrap();
        assert!(output.contains("Object Tree"));
        assert!(output.contains("listed"));
    }

    #[test]
    fn test_tree_format_hierarchy() {
        let root = TestWidget::new("window");
        let first = TestWidget::new("button1");
        let second = TestWidget::new("button2");
        first.base.set_parent(Some(root.base.id())).unwrap();
        second.base.set_parent(Some(root.base.id())).unwrap();

        let output = ObjectTreeDebug::new().format_subtree(root.base.id()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("window"));
        assert!(lines[0].contains("(TestWidget)"));
        assert!(lines[1].starts_with("\u{251c}\u{2500}\u{2500} button1"));
        assert!(lines[2].starts_with("\u{2514}\u{2500}\u{2500} button2"));
    }

    #[test]
    fn test_tree_format_minimal_ascii_depth() {
        let root = TestWidget::new("top");
        let child = TestWidget::new("middle");
        let grandchild = TestWidget::new("bottom");
        child.base.set_parent(Some(root.base.id())).unwrap();
        grandchild.base.set_parent(Some(child.base.id())).unwrap();

        let options = TreeFormatOptions {
            style: TreeStyle::Ascii,
            max_depth: Some(1),
            ..TreeFormatOptions::minimal()
        };
        let output = ObjectTreeDebug::with_options(options)
            .format_subtree(root.base.id())
            .unwrap();
        assert_eq!(output, "top\n`-- middle\n");
    }

    #[test]
    fn test_properties_are_listed() {
        let widget = TestWidget::new("props");
        widget.base.set_property("colour", "red".to_string()).unwrap();
        let output = dump_object_tree(widget.base.id()).unwrap();
        assert!(output.contains(".colour"));
    }

    #[test]
    fn test_dump_object_info_lists_connections() {
        let sender = TestWidget::new("sender");
        let receiver = TestWidget::new("receiver");
        let clicked = WIDGET_META.index_of_signal("clicked").unwrap();
        connection::connect(
            sender.base.id(),
            clicked,
            receiver.base.id(),
            Slot::callable(|_| {}),
            ConnectionType::Direct,
        )
        .unwrap();

        let out = dump_object_info(sender.base.id()).unwrap();
        assert!(out.contains("OBJECT TestWidget::sender"));
        assert!(out.contains("signal: clicked()"));

        let inbound = dump_object_info(receiver.base.id()).unwrap();
        assert!(inbound.contains("<-- TestWidget"));
        assert!(inbound.contains("clicked()"));
    }

    #[test]
    fn test_kernel_macros_accept_fields() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            crate::kernel_trace!(step = 1, "tracing");
            crate::kernel_debug!("debugging {}", 2);
            crate::kernel_info!("info");
            crate::kernel_warn!(code = 4, "warning");
            crate::kernel_error!("error");
        });
    }

    #[test]
    fn test_dump_unknown_object_fails() {
        let widget = TestWidget::new("gone");
        let id = widget.base.id();
        widget.base.destroy();
        assert!(dump_object_info(id).is_err());
    }
}
