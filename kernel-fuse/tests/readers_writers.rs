//! Readers–writers coordination on an open file: mutual exclusion, writer
//! preference, and bounded waiting for writers under a reader stream.

use std::sync::{Arc, Mutex};

use kernel::config::DEFAULT_PRIORITY;
use kernel::fs::FileSynch;
use kernel_fuse::test_utils::*;

#[test]
fn writer_is_preferred_over_late_readers() {
    setup_logger(log::LevelFilter::Warn);
    let kernel = boot_fresh();
    kernel.fs.create("/shared", 0, false).unwrap();
    let file = kernel.fs.open("/shared").unwrap();
    let synch = Arc::new(FileSynch::new(
        kernel.sched.clone(),
        kernel.fs.disk(),
        "/shared",
        file.sector(),
    ));
    let events: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    // This thread reads first.
    synch.begin_reading();
    events.lock().unwrap().push("r1 begin");

    let writer = {
        let (synch, events) = (synch.clone(), events.clone());
        kernel.sched.fork("writer", DEFAULT_PRIORITY, true, move || {
            synch.begin_writing();
            events.lock().unwrap().push("w begin");
            synch.finish_writing();
            events.lock().unwrap().push("w end");
        })
    };
    let late_reader = {
        let (synch, events) = (synch.clone(), events.clone());
        kernel.sched.fork("late reader", DEFAULT_PRIORITY, true, move || {
            synch.begin_reading();
            events.lock().unwrap().push("r2 begin");
            synch.finish_reading();
            events.lock().unwrap().push("r2 end");
        })
    };

    // Let the writer declare itself and the late reader arrive behind it.
    kernel.sched.yield_now();

    events.lock().unwrap().push("r1 end");
    synch.finish_reading();
    writer.join();
    late_reader.join();

    // The late reader could have shared the file with r1, but the waiting
    // writer keeps it out.
    assert_eq!(
        &*events.lock().unwrap(),
        &["r1 begin", "r1 end", "w begin", "w end", "r2 begin", "r2 end"]
    );
}

#[test]
fn exclusion_holds_under_interleaving() {
    let kernel = boot_fresh();
    kernel.fs.create("/busy", 0, false).unwrap();
    let file = kernel.fs.open("/busy").unwrap();
    let synch = Arc::new(FileSynch::new(
        kernel.sched.clone(),
        kernel.fs.disk(),
        "/busy",
        file.sector(),
    ));

    #[derive(Default)]
    struct Active {
        readers: u32,
        writers: u32,
        violations: u32,
    }
    let active: Arc<Mutex<Active>> = Arc::new(Mutex::new(Active::default()));

    const ROUNDS: usize = 10;
    let mut threads = Vec::new();

    for reader in 0..3 {
        let (synch, active, sched) = (synch.clone(), active.clone(), kernel.sched.clone());
        threads.push(kernel.sched.fork(
            &format!("reader-{}", reader),
            DEFAULT_PRIORITY,
            true,
            move || {
                for _ in 0..ROUNDS {
                    synch.begin_reading();
                    {
                        let mut active = active.lock().unwrap();
                        active.readers += 1;
                        if active.writers != 0 {
                            active.violations += 1;
                        }
                    }
                    sched.yield_now(); // stretch the critical section
                    active.lock().unwrap().readers -= 1;
                    synch.finish_reading();
                    sched.yield_now();
                }
            },
        ));
    }

    for writer in 0..2 {
        let (synch, active, sched) = (synch.clone(), active.clone(), kernel.sched.clone());
        threads.push(kernel.sched.fork(
            &format!("writer-{}", writer),
            DEFAULT_PRIORITY,
            true,
            move || {
                for _ in 0..ROUNDS {
                    synch.begin_writing();
                    {
                        let mut active = active.lock().unwrap();
                        active.writers += 1;
                        if active.writers != 1 || active.readers != 0 {
                            active.violations += 1;
                        }
                    }
                    sched.yield_now();
                    active.lock().unwrap().writers -= 1;
                    synch.finish_writing();
                    sched.yield_now();
                }
            },
        ));
    }

    for thread in threads {
        thread.join();
    }
    let active = active.lock().unwrap();
    assert_eq!(active.violations, 0);
    assert_eq!(active.readers, 0);
    assert_eq!(active.writers, 0);
}

#[test]
fn open_close_refcount_reaches_zero() {
    let kernel = boot_fresh();
    kernel.fs.create("/counted", 0, false).unwrap();
    let file = kernel.fs.open("/counted").unwrap();
    let synch = FileSynch::new(
        kernel.sched.clone(),
        kernel.fs.disk(),
        "/counted",
        file.sector(),
    );

    // Creation counts the first opener.
    assert!(synch.file_opened()); // a second opener
    assert!(!synch.file_closed());
    assert!(synch.file_closed()); // back to zero

    synch.set_to_remove();
    assert!(synch.ready_to_remove());
    // Opens fail once removal is pending.
    assert!(!synch.file_opened());
}
