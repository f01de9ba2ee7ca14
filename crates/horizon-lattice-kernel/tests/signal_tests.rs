//! Tests for connection bookkeeping and the emission algorithm.

mod common;

use std::sync::Arc;

use parking_lot::Mutex;

use common::Probe;
use horizon_lattice_kernel::connection::{self, ConnectionHandle};
use horizon_lattice_kernel::metatype::Arguments;
use horizon_lattice_kernel::object::{self, ObjectId};
use horizon_lattice_kernel::slot::{ConnectionType, Slot};

type Log = Arc<Mutex<Vec<&'static str>>>;
type HandleCell = Arc<Mutex<Option<ConnectionHandle>>>;

fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn record(log: &Log, name: &'static str) -> impl Fn(&Arguments) + Send + Sync + 'static {
    let log = log.clone();
    move |_: &Arguments| log.lock().push(name)
}

fn connect_direct(sender: ObjectId, f: impl Fn(&Arguments) + Send + Sync + 'static) -> ConnectionHandle {
    connection::connect_callable(sender, Probe::fired(), f, ConnectionType::Direct).unwrap()
}

fn emit(sender: &Probe) {
    sender.base.emit(Probe::fired(), (1i32,));
}

#[test]
fn test_unconnected_signal_takes_fast_path() {
    let sender = Probe::new();
    let core = object::core(sender.id()).unwrap();

    for _ in 0..10 {
        emit(&sender);
    }
    assert_eq!(core.slow_path_emissions(), 0);

    let handle = connect_direct(sender.id(), |_| {});
    emit(&sender);
    assert_eq!(core.slow_path_emissions(), 1);

    handle.disconnect();
    emit(&sender);
    assert_eq!(core.slow_path_emissions(), 1);
}

#[test]
fn test_slots_run_in_connection_order() {
    let sender = Probe::new();
    let calls = log();
    connect_direct(sender.id(), record(&calls, "a"));
    connect_direct(sender.id(), record(&calls, "b"));
    connect_direct(sender.id(), record(&calls, "c"));

    emit(&sender);
    emit(&sender);
    assert_eq!(*calls.lock(), vec!["a", "b", "c", "a", "b", "c"]);
}

#[test]
fn test_self_disconnect_during_emission() {
    // (slot that disconnects, slot it disconnects, expected first emission, expected second emission)
    let cases: [(usize, usize, &[&str], &[&str]); 6] = [
        (0, 0, &["a", "b", "c"], &["b", "c"]),
        (1, 1, &["a", "b", "c"], &["a", "c"]),
        (2, 2, &["a", "b", "c"], &["a", "b"]),
        (0, 2, &["a", "b"], &["a", "b"]),
        (2, 0, &["a", "b", "c"], &["b", "c"]),
        (1, 0, &["a", "b", "c"], &["b", "c"]),
    ];

    for (actor, victim, first, second) in cases {
        let sender = Probe::new();
        let calls = log();
        let names = ["a", "b", "c"];
        let cells: Vec<HandleCell> = (0..3).map(|_| Arc::new(Mutex::new(None))).collect();

        for (index, name) in names.into_iter().enumerate() {
            let calls = calls.clone();
            let target = cells[victim].clone();
            let acts = index == actor;
            let handle = connect_direct(sender.id(), move |_| {
                calls.lock().push(name);
                if acts {
                    if let Some(handle) = target.lock().take() {
                        handle.disconnect();
                    }
                }
            });
            *cells[index].lock() = Some(handle);
        }

        emit(&sender);
        assert_eq!(calls.lock().as_slice(), first, "first emission, actor {actor} victim {victim}");
        calls.lock().clear();
        emit(&sender);
        assert_eq!(calls.lock().as_slice(), second, "second emission, actor {actor} victim {victim}");
    }
}

#[test]
fn test_connection_made_during_emission_waits_for_next_emission() {
    let sender = Probe::new();
    let calls = log();
    let sender_id = sender.id();
    let added = Arc::new(Mutex::new(false));

    let inner_calls = calls.clone();
    connect_direct(sender_id, move |_| {
        inner_calls.lock().push("first");
        let mut added = added.lock();
        if !*added {
            *added = true;
            connect_direct(sender_id, record(&inner_calls, "late"));
        }
    });

    emit(&sender);
    assert_eq!(*calls.lock(), vec!["first"]);
    emit(&sender);
    assert_eq!(*calls.lock(), vec!["first", "first", "late"]);
}

#[test]
fn test_all_signals_connection_made_during_emission_waits_for_next_emission() {
    let sender = Probe::new();
    let calls = log();
    let sender_id = sender.id();
    let added = Arc::new(Mutex::new(false));

    let inner_calls = calls.clone();
    connect_direct(sender_id, move |_| {
        inner_calls.lock().push("first");
        let mut added = added.lock();
        if !*added {
            *added = true;
            connection::connect_any(
                sender_id,
                sender_id,
                Slot::callable(record(&inner_calls, "any")),
                ConnectionType::Direct,
            )
            .unwrap();
        }
    });

    emit(&sender);
    assert_eq!(*calls.lock(), vec!["first"]);
    emit(&sender);
    assert_eq!(*calls.lock(), vec!["first", "first", "any"]);
}

#[test]
fn test_disconnect_is_idempotent() {
    let sender = Probe::new();
    let receiver = Probe::new();
    let handle = connection::connect(
        sender.id(),
        Probe::fired(),
        receiver.id(),
        Slot::callable(|_| {}),
        ConnectionType::Auto,
    )
    .unwrap();

    assert!(handle.is_connected());
    assert!(connection::disconnect(handle));
    assert!(!handle.is_connected());
    assert!(!connection::disconnect(handle));
    assert!(!connection::disconnect_matching(sender.id(), Some(Probe::fired()), Some(receiver.id()), None));
    assert_eq!(connection::receivers(sender.id(), Probe::fired()), 0);
}

#[test]
fn test_disconnect_matching_by_receiver() {
    let sender = Probe::new();
    let keep = Probe::new();
    let drop_me = Probe::new();
    for receiver in [keep.id(), drop_me.id(), drop_me.id()] {
        connection::connect(sender.id(), Probe::fired(), receiver, Slot::callable(|_| {}), ConnectionType::Direct)
            .unwrap();
    }

    assert!(connection::disconnect_matching(sender.id(), None, Some(drop_me.id()), None));
    assert_eq!(connection::receivers(sender.id(), Probe::fired()), 1);
    assert_eq!(connection::incoming_connections(drop_me.id()).len(), 0);
    assert_eq!(connection::incoming_connections(keep.id()).len(), 1);
}

#[test]
fn test_sender_destroyed_mid_emission_stops_delivery() {
    let sender = Probe::new();
    let calls = log();
    let sender_id = sender.id();
    let first_calls = calls.clone();
    connect_direct(sender_id, move |_| {
        first_calls.lock().push("first");
        object::destroy(sender_id);
    });
    connect_direct(sender_id, record(&calls, "second"));

    emit(&sender);
    assert_eq!(*calls.lock(), vec!["first"]);
    assert!(!sender.base.is_alive());
    assert_eq!(connection::outgoing_connections(sender_id).len(), 0);
}

#[test]
fn test_receiver_destroyed_mid_emission_is_skipped() {
    let sender = Probe::new();
    let doomed = Probe::new();
    let calls = log();
    let doomed_id = doomed.id();

    let first_calls = calls.clone();
    connect_direct(sender.id(), move |_| {
        first_calls.lock().push("first");
        object::destroy(doomed_id);
    });
    connection::connect(
        sender.id(),
        Probe::fired(),
        doomed_id,
        Slot::callable(record(&calls, "doomed")),
        ConnectionType::Direct,
    )
    .unwrap();
    connect_direct(sender.id(), record(&calls, "last"));

    emit(&sender);
    assert_eq!(*calls.lock(), vec!["first", "last"]);
    assert_eq!(connection::receivers(sender.id(), Probe::fired()), 2);
}

#[test]
fn test_destroyed_signal_reaches_connections() {
    let victim = Probe::new();
    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    connection::connect_callable(
        victim.id(),
        horizon_lattice_kernel::meta::DESTROYED_SIGNAL,
        move |args: &Arguments| *sink.lock() = args.get::<ObjectId>(0).copied(),
        ConnectionType::Direct,
    )
    .unwrap();

    victim.base.block_signals(true);
    let id = victim.id();
    victim.base.destroy();
    assert_eq!(*seen.lock(), Some(id));
}

#[test]
fn test_sender_is_visible_inside_slot() {
    let sender = Probe::new();
    let receiver = Probe::new();
    let receiver_id = receiver.id();
    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    connection::connect(
        sender.id(),
        Probe::fired(),
        receiver_id,
        Slot::callable(move |_| *sink.lock() = object::sender(receiver_id)),
        ConnectionType::Direct,
    )
    .unwrap();

    emit(&sender);
    assert_eq!(*seen.lock(), Some(sender.id()));
    assert_eq!(object::sender(receiver_id), None);
}
