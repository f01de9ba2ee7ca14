//! Connection registry and signal emission.
//!
//! Every object that has outgoing connections owns a [`ConnectionLists`]
//! record: one bucket per signal index plus an "all signals" bucket. Every
//! object that receives connections keeps a list of sender records so its
//! incoming connections can be severed when it is destroyed.
//!
//! Records live in a pool of mutex-protected shards keyed by object id.
//! Operations that touch a sender and a receiver lock both shards in index
//! order. Emission releases the sender's shard around every slot call, so
//! slots may connect, disconnect, emit and destroy objects freely:
//!
//! - connections added during an emission are not invoked by it
//! - connections removed during an emission are skipped from then on
//! - a sender destroyed during its own emission stops the emission
//!
//! Removed entries are only compacted out once no emission is iterating the
//! sender's lists.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::error::ConnectError;
use crate::logging::targets;
use crate::meta::{DESTROYED_SIGNAL, SIGNAL_BITMAP_BITS};
use crate::metatype::{meta_type_by_name, Arguments};
use crate::object::{self, ObjectCore, ObjectId, SenderGuard};
use crate::slot::{self, completion_pair, ConnectionType, Slot};
use crate::thread::ThreadData;

const LOCK_POOL_SIZE: usize = 131;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);
static EMISSIONS: AtomicU64 = AtomicU64::new(0);
static LIST_ALLOCATIONS: AtomicU64 = AtomicU64::new(0);
static COMPACTIONS: AtomicU64 = AtomicU64::new(0);

struct Connection {
    serial: u64,
    /// `None` once disconnected.
    receiver: Option<Arc<ObjectCore>>,
    slot: Slot,
    kind: ConnectionType,
}

impl Connection {
    fn receiver_id(&self) -> Option<ObjectId> {
        self.receiver.as_ref().map(|r| r.id())
    }
}

/// Outgoing connections of one sender.
struct ConnectionLists {
    sender: Arc<ObjectCore>,
    lists: Vec<Vec<Connection>>,
    all_signals: Vec<Connection>,
    in_use: usize,
    dirty: bool,
    orphaned: bool,
}

impl ConnectionLists {
    fn new(sender: Arc<ObjectCore>) -> Self {
        LIST_ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
        Self {
            sender,
            lists: Vec::new(),
            all_signals: Vec::new(),
            in_use: 0,
            dirty: false,
            orphaned: false,
        }
    }

    fn bucket(&self, signal: Option<usize>) -> Option<&Vec<Connection>> {
        match signal {
            Some(signal) => self.lists.get(signal),
            None => Some(&self.all_signals),
        }
    }

    fn bucket_mut(&mut self, signal: Option<usize>) -> Option<&mut Vec<Connection>> {
        match signal {
            Some(signal) => self.lists.get_mut(signal),
            None => Some(&mut self.all_signals),
        }
    }

    fn bucket_for_insert(&mut self, signal: Option<usize>) -> &mut Vec<Connection> {
        match signal {
            Some(signal) => {
                if self.lists.len() <= signal {
                    self.lists.resize_with(signal + 1, Vec::new);
                }
                &mut self.lists[signal]
            }
            None => &mut self.all_signals,
        }
    }

    fn find_mut(&mut self, signal: Option<usize>, serial: u64) -> Option<&mut Connection> {
        self.bucket_mut(signal)?
            .iter_mut()
            .find(|c| c.serial == serial && c.receiver.is_some())
    }

    fn buckets(&self) -> impl Iterator<Item = (Option<usize>, &Vec<Connection>)> {
        self.lists
            .iter()
            .enumerate()
            .map(|(signal, bucket)| (Some(signal), bucket))
            .chain(std::iter::once((None, &self.all_signals)))
    }

    fn connected_bits(&self) -> u64 {
        if self.all_signals.iter().any(|c| c.receiver.is_some()) {
            return u64::MAX;
        }
        self.lists
            .iter()
            .enumerate()
            .take(SIGNAL_BITMAP_BITS)
            .filter(|(_, bucket)| bucket.iter().any(|c| c.receiver.is_some()))
            .fold(0, |bits, (signal, _)| bits | (1u64 << signal))
    }

    fn compact(&mut self) {
        for bucket in self.lists.iter_mut() {
            bucket.retain(|c| c.receiver.is_some());
        }
        self.all_signals.retain(|c| c.receiver.is_some());
        while self.lists.last().is_some_and(Vec::is_empty) {
            self.lists.pop();
        }
        self.dirty = false;
        COMPACTIONS.fetch_add(1, Ordering::Relaxed);
    }

    /// Called after clearing a connection's receiver, under the shard lock.
    fn after_removal(&mut self) {
        if self.in_use == 0 {
            self.compact();
        } else {
            self.dirty = true;
        }
        self.sender.set_connected_signals(self.connected_bits());
    }
}

struct SenderRecord {
    sender: ObjectId,
    signal: Option<usize>,
    serial: u64,
}

#[derive(Default)]
struct ObjectConnections {
    outgoing: Option<ConnectionLists>,
    /// Most recent first.
    senders: Vec<SenderRecord>,
}

#[derive(Default)]
struct Shard {
    objects: HashMap<ObjectId, ObjectConnections>,
}

impl Shard {
    fn outgoing(&self, id: ObjectId) -> Option<&ConnectionLists> {
        self.objects.get(&id).and_then(|o| o.outgoing.as_ref())
    }

    fn outgoing_mut(&mut self, id: ObjectId) -> Option<&mut ConnectionLists> {
        self.objects.get_mut(&id).and_then(|o| o.outgoing.as_mut())
    }

    fn remove_sender_record(&mut self, receiver: ObjectId, sender: ObjectId, serial: u64) {
        if let Some(entry) = self.objects.get_mut(&receiver) {
            entry.senders.retain(|r| !(r.sender == sender && r.serial == serial));
        }
        self.prune(receiver);
    }

    fn prune(&mut self, id: ObjectId) {
        if self
            .objects
            .get(&id)
            .is_some_and(|o| o.outgoing.is_none() && o.senders.is_empty())
        {
            self.objects.remove(&id);
        }
    }
}

struct ConnectionRegistry {
    shards: Vec<Mutex<Shard>>,
}

static REGISTRY: OnceLock<ConnectionRegistry> = OnceLock::new();

fn registry() -> &'static ConnectionRegistry {
    REGISTRY.get_or_init(|| ConnectionRegistry {
        shards: (0..LOCK_POOL_SIZE).map(|_| Mutex::new(Shard::default())).collect(),
    })
}

fn shard_index(id: ObjectId) -> usize {
    let raw = id.as_raw();
    ((raw ^ (raw >> 32)) % LOCK_POOL_SIZE as u64) as usize
}

fn lock_shard(index: usize) -> MutexGuard<'static, Shard> {
    registry().shards[index].lock()
}

/// Both shards of a sender/receiver pair, locked lower index first.
struct PairGuard {
    first: MutexGuard<'static, Shard>,
    second: Option<MutexGuard<'static, Shard>>,
    second_index: usize,
}

impl PairGuard {
    fn lock(a: usize, b: usize) -> Self {
        let (low, high) = (a.min(b), a.max(b));
        let first = lock_shard(low);
        let second = (high != low).then(|| lock_shard(high));
        Self {
            first,
            second,
            second_index: high,
        }
    }

    fn shard(&mut self, index: usize) -> &mut Shard {
        match &mut self.second {
            Some(second) if index == self.second_index => &mut **second,
            _ => &mut *self.first,
        }
    }
}

/// Identifies one connection.
///
/// Handles stay valid as values after the connection is gone; operations on
/// them then report that nothing was connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    sender: ObjectId,
    signal: Option<usize>,
    serial: u64,
}

impl ConnectionHandle {
    /// The sending object.
    pub fn sender(&self) -> ObjectId {
        self.sender
    }

    /// The signal index, or `None` for an all-signals connection.
    pub fn signal(&self) -> Option<usize> {
        self.signal
    }

    /// Whether the connection is still live.
    pub fn is_connected(&self) -> bool {
        lock_shard(shard_index(self.sender))
            .outgoing(self.sender)
            .and_then(|lists| lists.bucket(self.signal))
            .is_some_and(|bucket| {
                bucket
                    .iter()
                    .any(|c| c.serial == self.serial && c.receiver.is_some())
            })
    }

    /// Disconnect. Returns `false` if already disconnected.
    pub fn disconnect(self) -> bool {
        disconnect(self)
    }
}

/// Emission counters since process start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Emissions that reached the connection lists.
    pub emissions: u64,
    /// Connection-list records allocated for senders.
    pub list_allocations: u64,
    /// Times removed entries were compacted out of a sender's lists.
    pub compactions: u64,
}

/// Current emission counters.
pub fn stats() -> ConnectionStats {
    ConnectionStats {
        emissions: EMISSIONS.load(Ordering::Relaxed),
        list_allocations: LIST_ALLOCATIONS.load(Ordering::Relaxed),
        compactions: COMPACTIONS.load(Ordering::Relaxed),
    }
}

/// Hooks invoked around every emission that passes the unconnected-signal check.
///
/// While hooks are installed every emission takes the slow path, so the
/// hooks also observe signals that have no connections.
#[derive(Clone, Copy)]
pub struct SignalSpyCallbacks {
    /// Called before any slot runs.
    pub begin: Option<fn(ObjectId, usize, &Arguments)>,
    /// Called after the last slot ran.
    pub end: Option<fn(ObjectId, usize)>,
}

impl std::fmt::Debug for SignalSpyCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalSpyCallbacks")
            .field("begin", &self.begin.is_some())
            .field("end", &self.end.is_some())
            .finish()
    }
}

static SPY_INSTALLED: AtomicBool = AtomicBool::new(false);
static SPY: RwLock<Option<SignalSpyCallbacks>> = RwLock::new(None);

/// Install or remove the signal spy hooks.
pub fn set_signal_spy_callbacks(callbacks: Option<SignalSpyCallbacks>) {
    let mut spy = SPY.write();
    SPY_INSTALLED.store(callbacks.is_some(), Ordering::Release);
    *spy = callbacks;
}

fn spy_callbacks() -> Option<SignalSpyCallbacks> {
    if SPY_INSTALLED.load(Ordering::Acquire) {
        *SPY.read()
    } else {
        None
    }
}

/// Connect `signal` of `sender` to `slot` on `receiver`.
///
/// The slot's parameter tags must be a prefix of the signal's. Queued
/// connection types require every signal parameter to be a registered meta
/// type. Failures are logged and returned.
pub fn connect(
    sender: ObjectId,
    signal: usize,
    receiver: ObjectId,
    slot: Slot,
    kind: ConnectionType,
) -> Result<ConnectionHandle, ConnectError> {
    connect_impl(sender, Some(signal), receiver, slot, kind, false)
}

/// Like [`connect`], but fails with [`ConnectError::Duplicate`] if the same
/// signal is already connected to the same target.
pub fn connect_unique(
    sender: ObjectId,
    signal: usize,
    receiver: ObjectId,
    slot: Slot,
    kind: ConnectionType,
) -> Result<ConnectionHandle, ConnectError> {
    connect_impl(sender, Some(signal), receiver, slot, kind, true)
}

/// Connect `signal` to a closure. The sender acts as the receiver: the
/// closure runs in the sender's thread and the connection goes away with it.
pub fn connect_callable<F>(
    sender: ObjectId,
    signal: usize,
    f: F,
    kind: ConnectionType,
) -> Result<ConnectionHandle, ConnectError>
where
    F: Fn(&Arguments) + Send + Sync + 'static,
{
    connect_impl(sender, Some(signal), sender, Slot::callable(f), kind, false)
}

/// Connect every signal of `sender` to `slot` on `receiver`.
///
/// The slot receives the arguments of whichever signal was emitted.
pub fn connect_any(
    sender: ObjectId,
    receiver: ObjectId,
    slot: Slot,
    kind: ConnectionType,
) -> Result<ConnectionHandle, ConnectError> {
    connect_impl(sender, None, receiver, slot, kind, false)
}

fn live_core(id: ObjectId) -> Option<Arc<ObjectCore>> {
    object::core(id).filter(|core| !core.is_being_destroyed())
}

fn validate(
    sender: &ObjectCore,
    signal: Option<usize>,
    receiver: &ObjectCore,
    slot: &Slot,
    kind: ConnectionType,
) -> Result<(), ConnectError> {
    let signal_meta = match signal {
        Some(index) => Some(sender.meta().signal(index).ok_or(ConnectError::InvalidSignal {
            class: sender.meta().class_name(),
            index,
        })?),
        None => None,
    };

    let target = match slot {
        Slot::Method(index) => Some(receiver.meta().slot(*index).ok_or(ConnectError::InvalidSlot {
            class: receiver.meta().class_name(),
            index: *index,
        })?),
        Slot::Signal(index) => Some(receiver.meta().signal(*index).ok_or(ConnectError::InvalidSignal {
            class: receiver.meta().class_name(),
            index: *index,
        })?),
        Slot::Callable(_) => None,
    };

    if let (Some(signal_meta), Some(target)) = (signal_meta, target) {
        if !signal_meta.parameters.starts_with(target.parameters) {
            return Err(ConnectError::IncompatibleArguments {
                signal: signal_meta.signature(),
                slot: target.signature(),
            });
        }
    }

    if kind.is_queued() {
        if let Some(signal_meta) = signal_meta {
            if let Some(tag) = signal_meta
                .parameters
                .iter()
                .find(|tag| meta_type_by_name(tag).is_none())
            {
                return Err(ConnectError::UnregisteredArgument(tag.to_string()));
            }
        }
    }
    Ok(())
}

fn connect_impl(
    sender: ObjectId,
    signal: Option<usize>,
    receiver: ObjectId,
    slot: Slot,
    kind: ConnectionType,
    unique: bool,
) -> Result<ConnectionHandle, ConnectError> {
    let result = try_connect(sender, signal, receiver, slot, kind, unique);
    match &result {
        Ok(handle) => {
            tracing::trace!(
                target: targets::SIGNAL,
                ?sender,
                ?signal,
                ?receiver,
                ?kind,
                serial = handle.serial,
                "connected"
            );
            if let Some(instance) = object::instance(sender) {
                instance.connect_notify(signal);
            }
        }
        Err(err) => {
            tracing::warn!(target: targets::SIGNAL, ?sender, ?signal, ?receiver, %err, "connect failed");
        }
    }
    result
}

fn try_connect(
    sender: ObjectId,
    signal: Option<usize>,
    receiver: ObjectId,
    slot: Slot,
    kind: ConnectionType,
    unique: bool,
) -> Result<ConnectionHandle, ConnectError> {
    let sender_core = live_core(sender).ok_or(ConnectError::InvalidSender(sender))?;
    let receiver_core = live_core(receiver).ok_or(ConnectError::InvalidReceiver(receiver))?;
    validate(&sender_core, signal, &receiver_core, &slot, kind)?;

    let (si, ri) = (shard_index(sender), shard_index(receiver));
    let mut guard = PairGuard::lock(si, ri);
    // Destruction flags are rechecked under the locks teardown takes.
    if sender_core.is_being_destroyed() {
        return Err(ConnectError::InvalidSender(sender));
    }
    if receiver_core.is_being_destroyed() {
        return Err(ConnectError::InvalidReceiver(receiver));
    }

    let serial = NEXT_SERIAL.fetch_add(1, Ordering::Relaxed);
    let lists = guard
        .shard(si)
        .objects
        .entry(sender)
        .or_default()
        .outgoing
        .get_or_insert_with(|| ConnectionLists::new(sender_core.clone()));
    let bucket = lists.bucket_for_insert(signal);
    if unique
        && bucket
            .iter()
            .any(|c| c.receiver_id() == Some(receiver) && c.slot.same_target(&slot))
    {
        return Err(ConnectError::Duplicate);
    }
    bucket.push(Connection {
        serial,
        receiver: Some(receiver_core),
        slot,
        kind,
    });
    sender_core.mark_connected(match signal {
        None => u64::MAX,
        Some(signal) if signal < SIGNAL_BITMAP_BITS => 1u64 << signal,
        Some(_) => 0,
    });

    guard
        .shard(ri)
        .objects
        .entry(receiver)
        .or_default()
        .senders
        .insert(0, SenderRecord { sender, signal, serial });

    Ok(ConnectionHandle { sender, signal, serial })
}

/// Remove one connection. Returns `false` if it was already gone.
pub fn disconnect(handle: ConnectionHandle) -> bool {
    let si = shard_index(handle.sender);
    let receiver = {
        let mut shard = lock_shard(si);
        shard
            .outgoing_mut(handle.sender)
            .and_then(|lists| lists.find_mut(handle.signal, handle.serial))
            .and_then(|c| c.receiver_id())
    };
    let Some(receiver) = receiver else {
        return false;
    };

    let ri = shard_index(receiver);
    {
        let mut guard = PairGuard::lock(si, ri);
        let Some(lists) = guard.shard(si).outgoing_mut(handle.sender) else {
            return false;
        };
        let Some(connection) = lists.find_mut(handle.signal, handle.serial) else {
            // Lost a race with another disconnect.
            return false;
        };
        connection.receiver = None;
        lists.after_removal();
        guard.shard(ri).remove_sender_record(receiver, handle.sender, handle.serial);
    }

    tracing::trace!(target: targets::SIGNAL, sender = ?handle.sender, signal = ?handle.signal, ?receiver, "disconnected");
    if let Some(instance) = object::instance(handle.sender) {
        instance.disconnect_notify(handle.signal);
    }
    true
}

/// Remove every connection of `sender` matching the given filters.
///
/// `None` matches anything. A `signal` filter matches connections to that
/// signal only, not all-signals connections. Returns whether anything was
/// removed.
pub fn disconnect_matching(
    sender: ObjectId,
    signal: Option<usize>,
    receiver: Option<ObjectId>,
    slot: Option<&Slot>,
) -> bool {
    let handles: Vec<ConnectionHandle> = {
        let shard = lock_shard(shard_index(sender));
        let Some(lists) = shard.outgoing(sender) else {
            return false;
        };
        lists
            .buckets()
            .filter(|(bucket_signal, _)| signal.is_none() || *bucket_signal == signal)
            .flat_map(|(bucket_signal, bucket)| {
                bucket
                    .iter()
                    .filter(|c| {
                        c.receiver.is_some()
                            && receiver.is_none_or(|r| c.receiver_id() == Some(r))
                            && slot.is_none_or(|s| c.slot.same_target(s))
                    })
                    .map(move |c| ConnectionHandle {
                        sender,
                        signal: bucket_signal,
                        serial: c.serial,
                    })
            })
            .collect()
    };
    handles.into_iter().fold(false, |any, handle| disconnect(handle) || any)
}

/// Sever every connection from and to `core`. Called during destruction.
pub(crate) fn teardown(core: &Arc<ObjectCore>) {
    let id = core.id();
    let si = shard_index(id);

    // Outgoing.
    let pairs: Vec<(ObjectId, Option<usize>, u64)> = {
        let shard = lock_shard(si);
        shard
            .outgoing(id)
            .map(|lists| {
                lists
                    .buckets()
                    .flat_map(|(signal, bucket)| {
                        bucket
                            .iter()
                            .filter_map(move |c| c.receiver_id().map(|r| (r, signal, c.serial)))
                    })
                    .collect()
            })
            .unwrap_or_default()
    };
    for (receiver, signal, serial) in pairs {
        let ri = shard_index(receiver);
        let mut guard = PairGuard::lock(si, ri);
        if let Some(connection) = guard
            .shard(si)
            .outgoing_mut(id)
            .and_then(|lists| lists.find_mut(signal, serial))
        {
            connection.receiver = None;
        }
        guard.shard(ri).remove_sender_record(receiver, id, serial);
    }
    {
        let mut shard = lock_shard(si);
        if let Some(entry) = shard.objects.get_mut(&id) {
            match entry.outgoing.as_mut() {
                // An emission of this object is still on the stack; it drops the lists.
                Some(lists) if lists.in_use > 0 => {
                    lists.orphaned = true;
                    lists.dirty = true;
                }
                _ => entry.outgoing = None,
            }
        }
        core.set_connected_signals(0);
        shard.prune(id);
    }

    // Incoming.
    let records = {
        let mut shard = lock_shard(si);
        let records = shard
            .objects
            .get_mut(&id)
            .map(|entry| std::mem::take(&mut entry.senders))
            .unwrap_or_default();
        shard.prune(id);
        records
    };
    let mut notify = Vec::new();
    for record in records {
        let sender_shard = shard_index(record.sender);
        let mut guard = PairGuard::lock(sender_shard, si);
        if let Some(lists) = guard.shard(sender_shard).outgoing_mut(record.sender) {
            if let Some(connection) = lists.find_mut(record.signal, record.serial) {
                connection.receiver = None;
                lists.after_removal();
                notify.push((record.sender, record.signal));
            }
        }
    }
    for (sender, signal) in notify {
        if sender == id || live_core(sender).is_none() {
            continue;
        }
        if let Some(instance) = object::instance(sender) {
            instance.disconnect_notify(signal);
        }
    }
    tracing::trace!(target: targets::SIGNAL, ?id, "connections torn down");
}

/// Emit `signal` of the object behind `sender`.
#[tracing::instrument(skip_all, target = "horizon_lattice_kernel::signal", level = "trace")]
pub fn emit(sender: ObjectId, signal: usize, args: &Arguments) {
    if let Some(core) = object::core(sender) {
        activate(&core, signal, args);
    }
}

/// Run the emission algorithm for `signal` of `sender`.
pub(crate) fn activate(sender: &Arc<ObjectCore>, signal: usize, args: &Arguments) {
    let spy = spy_callbacks();
    if spy.is_none() && !sender.maybe_connected(signal) {
        return;
    }
    if signal != DESTROYED_SIGNAL && sender.signals_blocked() {
        return;
    }
    sender.count_slow_emission();
    EMISSIONS.fetch_add(1, Ordering::Relaxed);

    if let Some(begin) = spy.and_then(|s| s.begin) {
        begin(sender.id(), signal, args);
    }
    deliver(sender, signal, args);
    if let Some(end) = spy.and_then(|s| s.end) {
        end(sender.id(), signal);
    }
}

fn deliver(sender: &Arc<ObjectCore>, signal: usize, args: &Arguments) {
    let id = sender.id();
    let mut shard = lock_shard(shard_index(id));
    let ends = match shard.outgoing_mut(id) {
        Some(lists) if !lists.orphaned => {
            lists.in_use += 1;
            let len = |bucket: Option<usize>| lists.bucket(bucket).map_or(0, Vec::len);
            [(Some(signal), len(Some(signal))), (None, len(None))]
        }
        _ => return,
    };
    let current = ThreadData::current();

    'buckets: for (bucket, end) in ends {
        let mut index = 0;
        while index < end {
            let Some(lists) = shard.outgoing(id) else {
                break 'buckets;
            };
            if lists.orphaned {
                break 'buckets;
            }
            let Some(connection) = lists.bucket(bucket).and_then(|b| b.get(index)) else {
                break;
            };
            index += 1;
            let Some(receiver) = connection.receiver.clone() else {
                continue;
            };
            let slot = connection.slot.clone();
            let kind = connection.kind;
            MutexGuard::unlocked(&mut shard, || {
                invoke(sender, signal, &receiver, &slot, kind, args, &current);
            });
        }
    }

    let mut drop_lists = false;
    if let Some(lists) = shard.outgoing_mut(id) {
        lists.in_use -= 1;
        if lists.in_use == 0 {
            if lists.orphaned {
                drop_lists = true;
            } else if lists.dirty {
                lists.compact();
                sender.set_connected_signals(lists.connected_bits());
            }
        }
    }
    if drop_lists {
        if let Some(entry) = shard.objects.get_mut(&id) {
            entry.outgoing = None;
        }
        shard.prune(id);
    }
}

fn invoke(
    sender: &Arc<ObjectCore>,
    signal: usize,
    receiver: &Arc<ObjectCore>,
    slot: &Slot,
    kind: ConnectionType,
    args: &Arguments,
    current: &ThreadData,
) {
    let origin = Some((sender.id(), signal));
    let same_thread = receiver.thread().serial() == current.serial();
    match kind {
        ConnectionType::Direct => call_direct(receiver, origin, slot, args),
        ConnectionType::Auto if same_thread => call_direct(receiver, origin, slot, args),
        ConnectionType::Auto | ConnectionType::Queued => {
            slot::queue_call(receiver, origin, slot.clone(), args, None).ok();
        }
        ConnectionType::BlockingQueued if same_thread => {
            tracing::warn!(
                target: targets::SIGNAL,
                sender = ?sender.id(),
                signal,
                receiver = ?receiver.id(),
                "dead lock detected in blocking-queued connection, calling the slot directly"
            );
            call_direct(receiver, origin, slot, args);
        }
        ConnectionType::BlockingQueued => {
            let (handle, waiter) = completion_pair();
            if slot::queue_call(receiver, origin, slot.clone(), args, Some(handle)).is_ok() {
                waiter.wait();
            }
        }
    }
}

fn call_direct(receiver: &Arc<ObjectCore>, origin: Option<(ObjectId, usize)>, slot: &Slot, args: &Arguments) {
    let _sender = SenderGuard::new(receiver, origin);
    slot::call_slot(receiver, slot, args);
}

/// Number of live connections to `signal` of `sender`.
pub fn receivers(sender: ObjectId, signal: usize) -> usize {
    lock_shard(shard_index(sender))
        .outgoing(sender)
        .and_then(|lists| lists.bucket(Some(signal)))
        .map_or(0, |bucket| bucket.iter().filter(|c| c.receiver.is_some()).count())
}

/// Whether `signal` of `sender` has any live connection, all-signals
/// connections included.
pub fn is_signal_connected(sender: ObjectId, signal: usize) -> bool {
    let shard = lock_shard(shard_index(sender));
    let Some(lists) = shard.outgoing(sender) else {
        return false;
    };
    [Some(signal), None]
        .into_iter()
        .filter_map(|bucket| lists.bucket(bucket))
        .any(|bucket| bucket.iter().any(|c| c.receiver.is_some()))
}

/// A live connection as reported by [`outgoing_connections`] and
/// [`incoming_connections`].
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Signal index; `None` for all-signals connections.
    pub signal: Option<usize>,
    /// The other end: receiver for outgoing, sender for incoming.
    pub peer: ObjectId,
    /// Debug rendering of the target.
    pub slot: String,
    /// Delivery type.
    pub kind: ConnectionType,
}

/// Live connections from `sender`, grouped by signal.
pub fn outgoing_connections(sender: ObjectId) -> Vec<ConnectionInfo> {
    let shard = lock_shard(shard_index(sender));
    let Some(lists) = shard.outgoing(sender) else {
        return Vec::new();
    };
    lists
        .buckets()
        .flat_map(|(signal, bucket)| {
            bucket.iter().filter_map(move |c| {
                c.receiver_id().map(|peer| ConnectionInfo {
                    signal,
                    peer,
                    slot: format!("{:?}", c.slot),
                    kind: c.kind,
                })
            })
        })
        .collect()
}

/// Live connections to `receiver`, most recent first.
pub fn incoming_connections(receiver: ObjectId) -> Vec<ConnectionInfo> {
    let records: Vec<(ObjectId, Option<usize>, u64)> = lock_shard(shard_index(receiver))
        .objects
        .get(&receiver)
        .map(|entry| entry.senders.iter().map(|r| (r.sender, r.signal, r.serial)).collect())
        .unwrap_or_default();
    records
        .into_iter()
        .filter_map(|(sender, signal, serial)| {
            let shard = lock_shard(shard_index(sender));
            let connection = shard
                .outgoing(sender)?
                .bucket(signal)?
                .iter()
                .find(|c| c.serial == serial && c.receiver.is_some())?;
            Some(ConnectionInfo {
                signal,
                peer: sender,
                slot: format!("{:?}", connection.slot),
                kind: connection.kind,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{MetaDescriptor, MethodMeta, OBJECT_META};
    use crate::object::{register, Object, ObjectBase};
    use std::sync::atomic::AtomicUsize;

    static EMITTER_META: MetaDescriptor = MetaDescriptor::new("Emitter", Some(&OBJECT_META))
        .with_signals(&[
            MethodMeta::new("value_changed", &["i32", "String"]),
            MethodMeta::new("clicked", &[]),
            MethodMeta::new("custom", &["Opaque"]),
        ])
        .with_slots(&[
            MethodMeta::new("on_value", &["i32"]),
            MethodMeta::new("on_text", &["String"]),
        ]);

    struct Emitter {
        base: ObjectBase,
        values: Mutex<Vec<i32>>,
        connects: AtomicUsize,
        disconnects: AtomicUsize,
    }

    impl Emitter {
        fn new() -> Arc<Self> {
            register(Self {
                base: ObjectBase::new::<Self>(),
                values: Mutex::new(Vec::new()),
                connects: AtomicUsize::new(0),
                disconnects: AtomicUsize::new(0),
            })
        }

        fn value_changed() -> usize {
            EMITTER_META.index_of_signal("value_changed").unwrap()
        }

        fn clicked() -> usize {
            EMITTER_META.index_of_signal("clicked").unwrap()
        }

        fn on_value() -> usize {
            EMITTER_META.index_of_slot("on_value").unwrap()
        }
    }

    impl Object for Emitter {
        fn object_id(&self) -> ObjectId {
            self.base.id()
        }

        fn static_meta() -> &'static MetaDescriptor {
            &EMITTER_META
        }

        fn invoke_method(&self, index: usize, args: &Arguments) -> bool {
            if index == Self::on_value() {
                self.values.lock().push(*args.get::<i32>(0).unwrap());
                return true;
            }
            false
        }

        fn connect_notify(&self, _signal: Option<usize>) {
            self.connects.fetch_add(1, Ordering::SeqCst);
        }

        fn disconnect_notify(&self, _signal: Option<usize>) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn value_args(value: i32) -> Arguments {
        Arguments::new().with(value).with(String::from("text"))
    }

    #[test]
    fn test_method_slot_receives_prefix() {
        let sender = Emitter::new();
        let receiver = Emitter::new();
        connect(
            sender.base.id(),
            Emitter::value_changed(),
            receiver.base.id(),
            Slot::Method(Emitter::on_value()),
            ConnectionType::Auto,
        )
        .unwrap();
        sender.base.emit(Emitter::value_changed(), value_args(5));
        assert_eq!(*receiver.values.lock(), vec![5]);
        assert_eq!(sender.connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_validation_errors() {
        let sender = Emitter::new();
        let receiver = Emitter::new();
        let (s, r) = (sender.base.id(), receiver.base.id());

        assert!(matches!(
            connect(s, 99, r, Slot::callable(|_| {}), ConnectionType::Auto),
            Err(ConnectError::InvalidSignal { index: 99, .. })
        ));
        assert!(matches!(
            connect(s, Emitter::value_changed(), r, Slot::Method(42), ConnectionType::Auto),
            Err(ConnectError::InvalidSlot { index: 42, .. })
        ));
        let on_text = EMITTER_META.index_of_slot("on_text").unwrap();
        assert!(matches!(
            connect(s, Emitter::value_changed(), r, Slot::Method(on_text), ConnectionType::Auto),
            Err(ConnectError::IncompatibleArguments { .. })
        ));
        let custom = EMITTER_META.index_of_signal("custom").unwrap();
        assert_eq!(
            connect(s, custom, r, Slot::callable(|_| {}), ConnectionType::Queued).unwrap_err(),
            ConnectError::UnregisteredArgument("Opaque".to_string())
        );
        assert!(connect(s, custom, r, Slot::callable(|_| {}), ConnectionType::Direct).is_ok());

        receiver.base.destroy();
        assert_eq!(
            connect(s, Emitter::clicked(), r, Slot::callable(|_| {}), ConnectionType::Auto).unwrap_err(),
            ConnectError::InvalidReceiver(r)
        );
    }

    #[test]
    fn test_unique_connection() {
        let sender = Emitter::new();
        let receiver = Emitter::new();
        let (s, r) = (sender.base.id(), receiver.base.id());
        let slot = Slot::Method(Emitter::on_value());
        connect_unique(s, Emitter::value_changed(), r, slot.clone(), ConnectionType::Auto).unwrap();
        assert_eq!(
            connect_unique(s, Emitter::value_changed(), r, slot.clone(), ConnectionType::Auto),
            Err(ConnectError::Duplicate)
        );
        // Non-unique connects are always accepted.
        connect(s, Emitter::value_changed(), r, slot, ConnectionType::Auto).unwrap();
        assert_eq!(receivers(s, Emitter::value_changed()), 2);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let sender = Emitter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let handle = connect_callable(
            sender.base.id(),
            Emitter::clicked(),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            ConnectionType::Direct,
        )
        .unwrap();
        assert!(handle.is_connected());
        assert!(disconnect(handle));
        assert!(!disconnect(handle));
        assert!(!handle.is_connected());
        assert_eq!(sender.disconnects.load(Ordering::SeqCst), 1);

        sender.base.emit(Emitter::clicked(), ());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(!sender.base.is_signal_connected(Emitter::clicked()));
    }

    #[test]
    fn test_fast_path_skips_unconnected_signals() {
        let sender = Emitter::new();
        let before = sender.base.core().slow_path_emissions();
        sender.base.emit(Emitter::clicked(), ());
        assert_eq!(sender.base.core().slow_path_emissions(), before);

        let handle = connect_callable(sender.base.id(), Emitter::clicked(), |_| {}, ConnectionType::Direct).unwrap();
        sender.base.emit(Emitter::clicked(), ());
        assert_eq!(sender.base.core().slow_path_emissions(), before + 1);
        // Other signals keep taking the fast path.
        sender.base.emit(Emitter::value_changed(), value_args(1));
        assert_eq!(sender.base.core().slow_path_emissions(), before + 1);

        handle.disconnect();
        sender.base.emit(Emitter::clicked(), ());
        assert_eq!(sender.base.core().slow_path_emissions(), before + 1);
    }

    #[test]
    fn test_blocked_signals_are_not_delivered() {
        let sender = Emitter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        connect_callable(
            sender.base.id(),
            Emitter::clicked(),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            ConnectionType::Direct,
        )
        .unwrap();
        assert!(!sender.base.block_signals(true));
        sender.base.emit(Emitter::clicked(), ());
        assert!(sender.base.block_signals(false));
        sender.base.emit(Emitter::clicked(), ());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_all_signals_connection_runs_after_specific() {
        let sender = Emitter::new();
        let receiver = Emitter::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (order.clone(), order.clone());
        connect_any(
            sender.base.id(),
            receiver.base.id(),
            Slot::callable(move |_| a.lock().push("any")),
            ConnectionType::Direct,
        )
        .unwrap();
        connect(
            sender.base.id(),
            Emitter::clicked(),
            receiver.base.id(),
            Slot::callable(move |_| b.lock().push("clicked")),
            ConnectionType::Direct,
        )
        .unwrap();
        sender.base.emit(Emitter::clicked(), ());
        assert_eq!(*order.lock(), vec!["clicked", "any"]);
        assert!(sender.base.is_signal_connected(Emitter::value_changed()));
        assert_eq!(sender.base.receivers(Emitter::value_changed()), 0);
    }

    #[test]
    fn test_signal_to_signal_forwarding() {
        let first = Emitter::new();
        let second = Emitter::new();
        connect(
            first.base.id(),
            Emitter::value_changed(),
            second.base.id(),
            Slot::Signal(Emitter::value_changed()),
            ConnectionType::Direct,
        )
        .unwrap();
        connect(
            second.base.id(),
            Emitter::value_changed(),
            second.base.id(),
            Slot::Method(Emitter::on_value()),
            ConnectionType::Direct,
        )
        .unwrap();
        first.base.emit(Emitter::value_changed(), value_args(9));
        assert_eq!(*second.values.lock(), vec![9]);
    }

    #[test]
    fn test_disconnect_matching_by_receiver() {
        let sender = Emitter::new();
        let a = Emitter::new();
        let b = Emitter::new();
        let slot = Slot::Method(Emitter::on_value());
        for receiver in [a.base.id(), b.base.id(), a.base.id()] {
            connect(sender.base.id(), Emitter::value_changed(), receiver, slot.clone(), ConnectionType::Direct)
                .unwrap();
        }
        assert!(disconnect_matching(sender.base.id(), None, Some(a.base.id()), None));
        assert!(!disconnect_matching(sender.base.id(), None, Some(a.base.id()), None));
        assert_eq!(receivers(sender.base.id(), Emitter::value_changed()), 1);
        sender.base.emit(Emitter::value_changed(), value_args(3));
        assert!(a.values.lock().is_empty());
        assert_eq!(*b.values.lock(), vec![3]);
    }

    #[test]
    fn test_destroyed_receiver_is_disconnected() {
        let sender = Emitter::new();
        let receiver = Emitter::new();
        connect(
            sender.base.id(),
            Emitter::value_changed(),
            receiver.base.id(),
            Slot::Method(Emitter::on_value()),
            ConnectionType::Direct,
        )
        .unwrap();
        assert_eq!(incoming_connections(receiver.base.id()).len(), 1);
        assert_eq!(outgoing_connections(sender.base.id())[0].peer, receiver.base.id());

        receiver.base.destroy();
        assert_eq!(receivers(sender.base.id(), Emitter::value_changed()), 0);
        assert!(outgoing_connections(sender.base.id()).is_empty());
        assert_eq!(sender.disconnects.load(Ordering::SeqCst), 1);
        sender.base.emit(Emitter::value_changed(), value_args(1));
        assert!(receiver.values.lock().is_empty());
    }

    #[test]
    fn test_shard_index_in_range() {
        for raw in [0u64, 1, 131, u64::MAX, 1 << 32 | 7] {
            assert!(shard_index(ObjectId::from_raw(raw)) < LOCK_POOL_SIZE);
        }
    }
}
