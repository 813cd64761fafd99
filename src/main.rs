use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ui_handoff::{Display, Event, EventKind, HostToolkit, Settings};

fn main() -> anyhow::Result<()> {
    let settings = Settings::load("settings.json")?;
    ui_handoff::logging::init(settings.debug_logging, settings.log_path());

    let host = HostToolkit::new();
    host.start(&settings.dispatch_thread_name)?;
    let display = Display::new(Arc::clone(&host), &settings)?;

    let keys = Arc::new(AtomicUsize::new(0));
    let keys_seen = Arc::clone(&keys);
    display.add_listener(EventKind::Key, move |event| {
        tracing::info!(?event, "key event");
        keys_seen.fetch_add(1, Ordering::SeqCst);
    });

    let done = Arc::new(AtomicBool::new(false));
    let synchronizer = Arc::clone(display.synchronizer());
    let worker_host = Arc::clone(&host);
    let worker_done = Arc::clone(&done);
    let worker = thread::spawn(move || -> anyhow::Result<()> {
        for code in 0..3 {
            worker_host.post_event(Event::Key {
                code,
                pressed: true,
            });
        }
        let answer = synchronizer.submit_sync(|| Ok(6 * 7))?;
        tracing::info!(answer, "synchronous call returned");

        let finished = Arc::clone(&worker_done);
        synchronizer.register_timer(Duration::from_millis(50), move || {
            finished.store(true, Ordering::SeqCst);
        })?;
        Ok(())
    });

    display.run_until(|| done.load(Ordering::SeqCst));
    match worker.join() {
        Ok(result) => result?,
        Err(_) => anyhow::bail!("worker thread panicked"),
    }

    tracing::info!(keys = keys.load(Ordering::SeqCst), "pump loop finished");
    display.dispose();
    host.shutdown();
    Ok(())
}
