use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use ui_handoff::{Event, HostToolkit, SubstituteEventQueue};

fn started_host() -> Arc<HostToolkit> {
    let host = HostToolkit::new();
    host.start("test-dispatch").expect("host should start");
    host
}

fn wait_for(mut condition: impl FnMut() -> bool) {
    let start = Instant::now();
    while !condition() {
        assert!(start.elapsed() < Duration::from_secs(5), "condition not reached");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn nested_installs_restore_the_previous_queue_only_at_the_end() {
    let host = started_host();
    let queue = SubstituteEventQueue::new(Arc::clone(&host));
    assert_eq!(host.active_queue(), None);

    queue.install();
    queue.install();
    assert!(queue.is_active());

    assert!(queue.uninstall());
    assert!(queue.is_active());
    assert!(queue.is_installed());

    assert!(queue.uninstall());
    assert_eq!(host.active_queue(), None);
    assert!(!queue.is_installed());

    // An extra uninstall is ignored rather than underflowing.
    assert!(!queue.uninstall());
    queue.install();
    assert!(queue.is_active());
    assert!(queue.uninstall());
    host.shutdown();
}

#[test]
fn stacked_queues_pop_back_to_the_one_beneath() {
    let host = started_host();
    let lower = SubstituteEventQueue::new(Arc::clone(&host));
    let upper = SubstituteEventQueue::new(Arc::clone(&host));
    lower.install();
    upper.install();
    assert!(upper.is_active());
    upper.uninstall();
    assert!(lower.is_active());
    lower.uninstall();
    assert_eq!(host.active_queue(), None);
    host.shutdown();
}

#[test]
fn pulled_event_reaches_host_listeners_on_the_pumping_thread() {
    let host = started_host();
    let queue = SubstituteEventQueue::new(Arc::clone(&host));
    queue.install();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    host.add_listener(Arc::new(move |event: &Event| {
        sink.lock()
            .unwrap()
            .push((event.clone(), thread::current().id()));
    }));

    host.post_event(Event::Focus { gained: true });
    assert!(queue.try_sleep());
    assert!(queue.has_pending());
    assert!(queue.dispatch_pending());
    assert!(!queue.dispatch_pending());

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, Event::Focus { gained: true });
    assert_eq!(seen[0].1, thread::current().id());
    drop(seen);

    queue.uninstall();
    host.shutdown();
}

#[test]
fn host_does_not_auto_dispatch_while_the_substitute_is_installed() {
    let host = started_host();
    let queue = SubstituteEventQueue::new(Arc::clone(&host));
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);
    host.add_listener(Arc::new(move |_: &Event| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    queue.install();
    host.post_event(Event::Close);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(delivered.load(Ordering::SeqCst), 0);
    assert_eq!(host.pending_events(), 1);

    // Once the substitute is gone the dispatch thread picks the event up.
    queue.uninstall();
    wait_for(|| delivered.load(Ordering::SeqCst) == 1);
    host.shutdown();
}

#[test]
fn wake_interrupts_a_sleeping_pull() {
    let host = started_host();
    let queue = Arc::new(SubstituteEventQueue::new(Arc::clone(&host)));
    queue.install();

    let waker = Arc::clone(&queue);
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        waker.wake();
    });

    assert!(queue.try_sleep());
    assert!(!queue.has_pending());
    handle.join().unwrap();

    queue.uninstall();
    host.shutdown();
}

#[test]
fn pull_fails_once_the_host_is_torn_down() {
    let host = started_host();
    let queue = SubstituteEventQueue::new(Arc::clone(&host));
    queue.install();
    host.shutdown();
    assert!(host.is_shut_down());
    assert!(!queue.try_sleep());
}

#[test]
fn dispatch_thread_identity_is_known_as_soon_as_the_host_starts() {
    let host = HostToolkit::new();
    host.start("identity-dispatch").unwrap();
    let id = host
        .dispatch_thread_id()
        .expect("identity recorded by start");
    let ran_on = host
        .invoke_and_wait(|| thread::current().id())
        .unwrap();
    assert_eq!(ran_on, id);
    assert!(!host.is_dispatch_thread());

    // Starting again keeps the running thread and its identity.
    host.start("identity-dispatch").unwrap();
    assert_eq!(host.dispatch_thread_id(), Some(id));
    host.shutdown();
}
