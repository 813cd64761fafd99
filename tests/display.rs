use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use ui_handoff::{
    CallbackFailure, Display, Event, EventKind, FailureOrigin, HostToolkit, Settings,
    SyncError,
};

fn display() -> (Arc<HostToolkit>, Display) {
    let settings = Settings::default();
    let host = HostToolkit::new();
    host.start(&settings.dispatch_thread_name)
        .expect("host should start");
    let display = Display::new(Arc::clone(&host), &settings).expect("display should build");
    // The first pump installs the substitute queue.
    display.wake();
    display.pump_once();
    assert!(display.queue().is_active());
    (host, display)
}

fn teardown(host: Arc<HostToolkit>, display: Display) {
    display.dispose();
    host.shutdown();
}

#[test]
fn host_event_reaches_listener_on_the_display_thread() {
    let (host, display) = display();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    display.add_listener(EventKind::Key, move |event| {
        sink.lock()
            .unwrap()
            .push((event.clone(), thread::current().id()));
    });

    host.post_event(Event::Key {
        code: 13,
        pressed: true,
    });
    display.run_until(|| !seen.lock().unwrap().is_empty());

    let seen = seen.lock().unwrap();
    assert_eq!(
        seen[0].0,
        Event::Key {
            code: 13,
            pressed: true
        }
    );
    assert_eq!(seen[0].1, thread::current().id());
    assert!(display.pump_state().is_sleeping());
    drop(seen);
    teardown(host, display);
}

#[test]
fn listeners_only_see_their_event_kind() {
    let (host, display) = display();
    let keys = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&keys);
    let id = display.add_listener(EventKind::Key, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let closed = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&closed);
    display.add_listener(EventKind::Close, move |_| flag.store(true, Ordering::SeqCst));

    host.post_event(Event::Resize {
        width: 10,
        height: 20,
    });
    host.post_event(Event::Close);
    display.run_until(|| closed.load(Ordering::SeqCst));
    assert_eq!(keys.load(Ordering::SeqCst), 0);

    assert!(display.remove_listener(id));
    assert!(!display.remove_listener(id));
    teardown(host, display);
}

#[test]
fn async_work_from_another_thread_runs_on_the_display_thread() {
    let (host, display) = display();
    let ran_on = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&ran_on);
    let sync = Arc::clone(display.synchronizer());
    let worker = thread::spawn(move || {
        sync.submit_async(move || {
            *slot.lock().unwrap() = Some(thread::current().id());
        })
    });

    display.run_until(|| ran_on.lock().unwrap().is_some());
    worker.join().unwrap().expect("submission should be accepted");
    assert_eq!(*ran_on.lock().unwrap(), Some(thread::current().id()));
    teardown(host, display);
}

#[test]
fn sync_work_from_another_thread_returns_its_value() {
    let (host, display) = display();
    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    let sync = Arc::clone(display.synchronizer());
    let worker = thread::spawn(move || {
        sync.submit_sync(move || {
            flag.store(true, Ordering::SeqCst);
            Ok(6 * 7)
        })
    });

    display.run_until(|| ran.load(Ordering::SeqCst));
    assert_eq!(worker.join().unwrap().unwrap(), 42);
    teardown(host, display);
}

#[test]
fn failing_listener_is_reported_and_the_loop_keeps_pumping() {
    let (host, display) = display();
    let failures = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&failures);
    display.on_failure(move |failure: &CallbackFailure| sink.lock().unwrap().push(failure.clone()));

    let handled = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&handled);
    display.add_listener(EventKind::Key, move |event| {
        if let Event::Key { code: 1, .. } = event {
            panic!("bad key handler");
        }
        counter.fetch_add(1, Ordering::SeqCst);
    });

    for code in [1, 2] {
        host.post_event(Event::Key {
            code,
            pressed: false,
        });
    }
    display.run_until(|| handled.load(Ordering::SeqCst) == 1);

    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].origin, FailureOrigin::Event(EventKind::Key));
    assert_eq!(failures[0].message, "bad key handler");
    drop(failures);
    teardown(host, display);
}

#[test]
fn event_deferred_from_a_native_callback_is_replayed_by_the_pump() {
    let (host, display) = display();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    display.add_listener(EventKind::Custom, move |_| {
        sink.lock().unwrap().push(thread::current().id());
    });

    let sync = Arc::clone(display.synchronizer());
    host.invoke_later(move || {
        sync.post_deferred(Event::Custom {
            code: 7,
            detail: "from native".into(),
        })
        .expect("display alive");
    })
    .unwrap();

    display.run_until(|| !seen.lock().unwrap().is_empty());
    assert_eq!(*seen.lock().unwrap(), vec![thread::current().id()]);
    teardown(host, display);
}

#[test]
fn host_call_can_reenter_the_section_without_deadlocking() {
    let (host, display) = display();
    let coordinator = Arc::clone(display.coordinator());
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);
    display.add_listener(EventKind::Paint, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let callback_host = Arc::clone(&host);
    let depth = display
        .call_host(move || {
            let _section = coordinator.enter(true);
            // A synchronous callback from the host back into the display.
            callback_host.dispatch(&Event::Paint {
                x: 0,
                y: 0,
                width: 4,
                height: 4,
            });
            coordinator.depth()
        })
        .expect("host call should complete");

    assert!(depth >= 2);
    assert_eq!(delivered.load(Ordering::SeqCst), 1);
    assert_eq!(display.coordinator().depth(), 0);
    teardown(host, display);
}

#[test]
fn wake_from_another_thread_unblocks_a_sleeping_pump() {
    let (host, display) = display();
    let queue = Arc::clone(display.queue());
    let waker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        queue.wake();
    });

    assert!(!display.pump_once());
    waker.join().unwrap();
    teardown(host, display);
}

#[test]
fn timers_fire_and_cancelled_timers_do_not() {
    let (host, display) = display();
    let cancelled_ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancelled_ran);
    let cancelled = display
        .timer_exec(Duration::from_millis(5), move || {
            flag.store(true, Ordering::SeqCst)
        })
        .unwrap();
    assert!(display.cancel_timer(cancelled));

    let fired = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fired);
    display
        .timer_exec(Duration::from_millis(20), move || {
            flag.store(true, Ordering::SeqCst)
        })
        .unwrap();

    display.run_until(|| fired.load(Ordering::SeqCst));
    assert!(!cancelled_ran.load(Ordering::SeqCst));
    teardown(host, display);
}

#[test]
fn disposed_display_stops_pumping_and_refuses_work() {
    let (host, display) = display();
    display.dispose();

    assert!(display.is_disposed());
    assert!(!display.pump_once());
    assert!(matches!(display.async_exec(|| {}), Err(SyncError::Disposed)));
    assert!(matches!(
        display.sync_exec(|| Ok(())),
        Err(SyncError::Disposed)
    ));
    assert_eq!(host.active_queue(), None);
    assert!(display.coordinator().is_disposed());

    // Disposing twice is harmless.
    display.dispose();
    host.shutdown();
}

#[test]
fn pumping_from_a_foreign_thread_panics() {
    let (host, display) = display();
    let outcome = thread::scope(|scope| scope.spawn(|| display.pump_once()).join());
    let payload = outcome.expect_err("foreign pump should panic");
    let message = payload
        .downcast_ref::<String>()
        .cloned()
        .unwrap_or_default();
    assert!(message.contains("the display belongs to"), "{message}");
    teardown(host, display);
}
