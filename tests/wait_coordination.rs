//! Multi-threaded wait coordination against real children.

use crossbeam_channel::{bounded, unbounded};
use procpipe::{Process, Slot};
use std::thread;
use std::time::{Duration, Instant};

fn spawn_sleep(seconds: &str) -> Process {
    Process::spawn(&["sleep", seconds], Slot::Discard, Slot::Discard).expect("spawn sleep")
}

#[test]
fn blocking_wait_lasts_until_the_child_exits() {
    let start = Instant::now();
    let child = spawn_sleep("1");
    child.wait();
    assert_eq!(child.exit_code(), 0);
    assert!(start.elapsed() >= Duration::from_secs(1));
}

#[test]
fn kill_interrupts_a_long_sleep() {
    let child = spawn_sleep("10");
    thread::sleep(Duration::from_millis(100));
    child.kill().expect("kill");
    child.wait();
    assert_eq!(child.exit_code(), -libc::SIGKILL);
}

#[test]
fn timed_waiters_relay_the_baton() {
    let child = spawn_sleep("3");
    let (events_tx, events_rx) = unbounded();

    thread::scope(|scope| {
        let child = &child;
        let blocking = scope.spawn(move || {
            child.wait();
            child.exit_code()
        });
        let timed_tx = events_tx.clone();
        let timed = scope.spawn(move || {
            while !child.timed_wait(Duration::from_secs(1)) {
                timed_tx.send("still running").expect("record timeout");
            }
            child.exit_code()
        });
        assert_eq!(blocking.join().expect("blocking waiter"), 0);
        assert_eq!(timed.join().expect("timed waiter"), 0);
    });
    drop(events_tx);

    let timeouts = events_rx.iter().count();
    assert!(
        (2..=4).contains(&timeouts),
        "a three second child should time out a couple of one second waits, saw {timeouts}"
    );
}

#[test]
fn many_threads_wait_on_one_child() {
    let child = spawn_sleep("0.4");
    let (codes_tx, codes_rx) = bounded(16);

    thread::scope(|scope| {
        let child = &child;
        for _ in 0..16 {
            let codes_tx = codes_tx.clone();
            scope.spawn(move || {
                child.wait();
                codes_tx.send(child.exit_code()).expect("report exit code");
            });
        }
    });
    drop(codes_tx);

    let codes: Vec<i32> = codes_rx.iter().collect();
    assert_eq!(codes.len(), 16);
    assert!(codes.iter().all(|&code| code == 0));
}

#[test]
fn pollers_and_waiters_agree() {
    let child = spawn_sleep("0.5");
    thread::scope(|scope| {
        let child = &child;
        scope.spawn(move || {
            while !child.poll() {
                thread::sleep(Duration::from_millis(10));
            }
        });
        scope.spawn(move || {
            assert!(child.timed_wait(Duration::from_secs(10)));
        });
        child.wait();
    });
    assert_eq!(child.exit_code(), 0);
}
