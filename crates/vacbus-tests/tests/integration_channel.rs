// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Channel Integration Tests
//!
//! Runs [`PortChannel`] against the simulated fabric:
//!
//! - one transaction on the wire at a time, FIFO per submitter
//! - every command resolves exactly once, including on close
//! - transient failures count toward the threshold, successes reset it
//! - critical faults disconnect at once
//! - reconnect waits for the port to be listed again

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::broadcast::error::TryRecvError;
use vacbus_core::command::priority;
use vacbus_core::{
    BusError, BusTuning, Completion, ConnectionReason, Parity, PortChannel, PortSettings,
};
use vacbus_tests::common::{
    init_test_logging, next_event, Responders, SimulatedPorts, TuningFixtures, EVENT_WAIT,
    TEST_TIMEOUT,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn line() -> PortSettings {
    PortSettings::new(115200, Parity::None)
}

fn open_channel(fabric: &Arc<SimulatedPorts>, port: &str, tuning: BusTuning) -> PortChannel {
    let channel = PortChannel::new(port, line(), fabric.clone(), tuning);
    assert!(channel.open().unwrap(), "{port} should open");
    channel
}

fn echo_fabric(port: &str) -> Arc<SimulatedPorts> {
    let fabric = Arc::new(SimulatedPorts::new());
    fabric.attach(port, &line(), Responders::echo());
    fabric
}

// =============================================================================
// Serialization
// =============================================================================

#[test]
fn test_channel_serializes_concurrent_callers() {
    init_test_logging();
    let fabric = echo_fabric("COM1");
    fabric.set_latency("COM1", Duration::from_millis(1));
    let channel = Arc::new(open_channel(&fabric, "COM1", TuningFixtures::fast()));

    let callers: Vec<_> = (0..8u8)
        .map(|caller| {
            let channel = Arc::clone(&channel);
            thread::spawn(move || {
                let handles: Vec<_> = (0..10u8)
                    .map(|seq| {
                        let request = vec![caller, seq, 0xAA];
                        let handle = channel
                            .send(request.clone(), 3, TEST_TIMEOUT, priority::NORMAL)
                            .unwrap();
                        (request, handle)
                    })
                    .collect();
                for (request, handle) in handles {
                    let response = handle.wait(Duration::from_secs(10)).unwrap();
                    assert_eq!(response, Some(request));
                }
            })
        })
        .collect();

    for caller in callers {
        caller.join().unwrap();
    }

    let stats = fabric.stats("COM1");
    assert_eq!(stats.writes, 80);
    assert_eq!(stats.answered, 80);
    assert_eq!(stats.max_in_flight, 1);
    assert_eq!(channel.status().processed, 80);

    // FIFO per submitter.
    let writes = fabric.writes("COM1");
    for caller in 0..8u8 {
        let sequence: Vec<u8> = writes
            .iter()
            .filter(|w| w[0] == caller)
            .map(|w| w[1])
            .collect();
        assert_eq!(sequence, (0..10u8).collect::<Vec<_>>());
    }

    channel.close();
}

#[test]
fn test_unknown_length_response_ends_on_quiescence() {
    let fabric = echo_fabric("COM1");
    let channel = open_channel(&fabric, "COM1", TuningFixtures::fast());

    let started = Instant::now();
    let response = channel
        .execute(vec![0x10, 0x20, 0x30], 0, Duration::from_secs(1), priority::NORMAL)
        .unwrap();

    assert_eq!(response, Some(vec![0x10, 0x20, 0x30]));
    assert!(started.elapsed() < Duration::from_millis(500));
}

// =============================================================================
// Resolution
// =============================================================================

#[test]
fn test_every_command_resolves_exactly_once_on_close() {
    init_test_logging();
    let fabric = Arc::new(SimulatedPorts::new());
    fabric.add_port("COM2");
    let channel = open_channel(&fabric, "COM2", TuningFixtures::with_threshold(100));

    let handles: Vec<_> = (0..20u8)
        .map(|i| {
            channel
                .send(vec![i], 1, Duration::from_millis(20), priority::NORMAL)
                .unwrap()
        })
        .collect();

    thread::sleep(Duration::from_millis(30));
    channel.close();

    let completions: Vec<Completion> = handles
        .into_iter()
        .map(|handle| handle.wait_completion(EVENT_WAIT).unwrap())
        .collect();

    assert!(completions.iter().all(|c| !c.is_response()));
    assert!(completions.iter().any(|c| *c == Completion::NoResponse));
    assert!(completions.iter().any(|c| *c == Completion::Cancelled));
    assert_eq!(channel.pending_count(), 0);
}

#[test]
fn test_channel_lifecycle_errors() {
    let fabric = echo_fabric("COM1");
    let channel = PortChannel::new("COM1", line(), fabric.clone(), TuningFixtures::fast());

    assert!(matches!(
        channel.send(vec![1], 1, TEST_TIMEOUT, priority::NORMAL),
        Err(BusError::NotOpened { .. })
    ));

    assert!(channel.open().unwrap());
    assert!(channel.open().unwrap());
    assert_eq!(fabric.stats("COM1").opens, 1);

    channel.close();
    channel.close();
    assert!(channel.is_disposed());
    assert!(matches!(
        channel.send(vec![1], 1, TEST_TIMEOUT, priority::NORMAL),
        Err(BusError::Disposed { .. })
    ));
    assert!(matches!(channel.open(), Err(BusError::Disposed { .. })));
    assert_eq!(fabric.open_handles("COM1"), 0);
}

// =============================================================================
// Fault Handling
// =============================================================================

#[tokio::test]
async fn test_transient_threshold_disconnects() {
    init_test_logging();
    let fabric = Arc::new(SimulatedPorts::new());
    fabric.add_port("COM2");
    let channel = open_channel(&fabric, "COM2", TuningFixtures::fast());
    let mut events = channel.subscribe();

    for _ in 0..2 {
        let response = channel
            .execute_async(vec![0x01], 1, TEST_TIMEOUT, priority::NORMAL)
            .await
            .unwrap();
        assert_eq!(response, None);
    }
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

    let response = channel
        .execute_async(vec![0x01], 1, TEST_TIMEOUT, priority::NORMAL)
        .await
        .unwrap();
    assert_eq!(response, None);

    let lost = next_event(&mut events, ConnectionReason::TransientThreshold, EVENT_WAIT)
        .await
        .expect("threshold disconnect");
    assert!(!lost.connected);
    assert_eq!(lost.port, "COM2");

    let back = next_event(&mut events, ConnectionReason::Reconnected, EVENT_WAIT)
        .await
        .expect("reconnect");
    assert!(back.connected);
    assert_eq!(channel.status().reconnects, 1);
    assert_eq!(channel.status().consecutive_failures, 0);

    channel.close();
}

#[tokio::test]
async fn test_success_resets_failure_count() {
    let fabric = Arc::new(SimulatedPorts::new());
    fabric.attach("COM3", &line(), Responders::selective(0x01));
    let channel = open_channel(&fabric, "COM3", TuningFixtures::fast());
    let mut events = channel.subscribe();

    for (marker, answered) in [(0x00, false), (0x00, false), (0x01, true), (0x00, false), (0x00, false)] {
        let response = channel
            .execute_async(vec![marker], 1, TEST_TIMEOUT, priority::NORMAL)
            .await
            .unwrap();
        assert_eq!(response.is_some(), answered);
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(channel.status().consecutive_failures, 2);
    assert!(channel.status().last_success.is_some());

    channel
        .execute_async(vec![0x00], 1, TEST_TIMEOUT, priority::NORMAL)
        .await
        .unwrap();
    assert!(next_event(&mut events, ConnectionReason::TransientThreshold, EVENT_WAIT)
        .await
        .is_some());

    channel.close();
}

#[tokio::test]
async fn test_transient_io_faults_count_toward_threshold() {
    let fabric = echo_fabric("COM4");
    let channel = open_channel(&fabric, "COM4", TuningFixtures::fast());
    let mut events = channel.subscribe();

    fabric.inject_faults("COM4", io::ErrorKind::TimedOut, 3);
    for _ in 0..3 {
        let response = channel
            .execute_async(vec![0x42], 1, TEST_TIMEOUT, priority::NORMAL)
            .await
            .unwrap();
        assert_eq!(response, None);
    }

    assert!(next_event(&mut events, ConnectionReason::TransientThreshold, EVENT_WAIT)
        .await
        .is_some());
    assert!(next_event(&mut events, ConnectionReason::Reconnected, EVENT_WAIT)
        .await
        .is_some());

    let response = channel
        .execute_async(vec![0x42], 1, TEST_TIMEOUT, priority::NORMAL)
        .await
        .unwrap();
    assert_eq!(response, Some(vec![0x42]));

    channel.close();
}

#[tokio::test]
async fn test_critical_fault_disconnects_immediately() {
    init_test_logging();
    let fabric = echo_fabric("COM5");
    let channel = open_channel(&fabric, "COM5", TuningFixtures::fast());
    let mut events = channel.subscribe();

    fabric.inject_faults("COM5", io::ErrorKind::PermissionDenied, 1);
    let response = channel
        .execute_async(vec![0x07], 1, TEST_TIMEOUT, priority::NORMAL)
        .await
        .unwrap();
    assert_eq!(response, None);

    let lost = next_event(&mut events, ConnectionReason::CriticalFault, EVENT_WAIT)
        .await
        .expect("critical disconnect");
    assert!(!lost.connected);

    assert!(next_event(&mut events, ConnectionReason::Reconnected, EVENT_WAIT)
        .await
        .is_some());
    let response = channel
        .execute_async(vec![0x07], 1, TEST_TIMEOUT, priority::NORMAL)
        .await
        .unwrap();
    assert_eq!(response, Some(vec![0x07]));
    assert_eq!(fabric.stats("COM5").opens, 2);

    channel.close();
}

#[test]
fn test_threshold_disconnect_fails_queued_commands() {
    init_test_logging();
    let fabric = Arc::new(SimulatedPorts::new());
    fabric.add_port("COM7");
    let channel = open_channel(&fabric, "COM7", TuningFixtures::fast());

    for _ in 0..2 {
        let response = channel
            .execute(vec![0x01], 1, TEST_TIMEOUT, priority::NORMAL)
            .unwrap();
        assert_eq!(response, None);
    }

    // The third silent command reaches the threshold while four more wait
    // behind it.
    let failing = channel
        .send(vec![0x01], 1, TEST_TIMEOUT, priority::NORMAL)
        .unwrap();
    let queued: Vec<_> = (0..4u8)
        .map(|seq| {
            channel
                .send(vec![0x10 + seq], 1, TEST_TIMEOUT, priority::NORMAL)
                .unwrap()
        })
        .collect();

    assert_eq!(
        failing.wait_completion(EVENT_WAIT).unwrap(),
        Completion::NoResponse
    );
    for handle in queued {
        assert_eq!(handle.wait_completion(EVENT_WAIT).unwrap(), Completion::NoResponse);
    }
    assert_eq!(fabric.writes("COM7"), vec![vec![0x01]; 3]);

    channel.close();
}

#[test]
fn test_critical_fault_fails_queued_commands() {
    init_test_logging();
    let fabric = echo_fabric("COM8");
    fabric.set_latency("COM8", Duration::from_millis(60));
    let channel = open_channel(&fabric, "COM8", TuningFixtures::fast());

    let answered = channel
        .send(vec![0xA0], 1, TEST_TIMEOUT, priority::NORMAL)
        .unwrap();
    let started = Instant::now();
    while fabric.stats("COM8").writes == 0 {
        assert!(started.elapsed() < EVENT_WAIT, "first request never written");
        thread::sleep(Duration::from_millis(1));
    }

    // The next write hits a dead port while more commands queue up.
    fabric.inject_faults("COM8", io::ErrorKind::PermissionDenied, 1);
    let failing = channel
        .send(vec![0xB0], 1, TEST_TIMEOUT, priority::NORMAL)
        .unwrap();
    let queued: Vec<_> = (0..4u8)
        .map(|seq| {
            channel
                .send(vec![0xC0 + seq], 1, TEST_TIMEOUT, priority::NORMAL)
                .unwrap()
        })
        .collect();

    assert_eq!(
        answered.wait_completion(EVENT_WAIT).unwrap(),
        Completion::Response(vec![0xA0])
    );
    assert_eq!(
        failing.wait_completion(EVENT_WAIT).unwrap(),
        Completion::NoResponse
    );
    for handle in queued {
        assert_eq!(handle.wait_completion(EVENT_WAIT).unwrap(), Completion::NoResponse);
    }
    assert_eq!(fabric.writes("COM8"), vec![vec![0xA0]]);

    channel.close();
}

// =============================================================================
// Reconnect
// =============================================================================

#[tokio::test]
async fn test_reconnect_waits_for_port_to_return() {
    init_test_logging();
    let fabric = echo_fabric("COM6");
    let channel = open_channel(&fabric, "COM6", TuningFixtures::fast());
    let mut events = channel.subscribe();

    fabric.unplug("COM6");
    let response = channel
        .execute_async(vec![0x01], 1, TEST_TIMEOUT, priority::NORMAL)
        .await
        .unwrap();
    assert_eq!(response, None);
    assert!(next_event(&mut events, ConnectionReason::CriticalFault, EVENT_WAIT)
        .await
        .is_some());

    // Several backoff periods pass without an open attempt.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!channel.is_connected());
    let stats = fabric.stats("COM6");
    assert_eq!(stats.opens, 1);
    assert_eq!(stats.failed_opens, 0);

    // Commands fail fast while disconnected.
    let started = Instant::now();
    let response = channel
        .execute_async(vec![0x01], 1, TEST_TIMEOUT, priority::NORMAL)
        .await
        .unwrap();
    assert_eq!(response, None);
    assert!(started.elapsed() < TEST_TIMEOUT);

    fabric.replug("COM6");
    assert!(next_event(&mut events, ConnectionReason::Reconnected, EVENT_WAIT)
        .await
        .is_some());
    let response = channel
        .execute_async(vec![0x01], 1, TEST_TIMEOUT, priority::NORMAL)
        .await
        .unwrap();
    assert_eq!(response, Some(vec![0x01]));

    channel.close();
}

#[tokio::test]
async fn test_reconnect_attempted_when_enumeration_fails() {
    let fabric = echo_fabric("COM7");
    let channel = open_channel(&fabric, "COM7", TuningFixtures::fast());
    let mut events = channel.subscribe();

    fabric.fail_enumeration(true);
    fabric.inject_faults("COM7", io::ErrorKind::BrokenPipe, 1);
    channel
        .execute_async(vec![0x01], 1, TEST_TIMEOUT, priority::NORMAL)
        .await
        .unwrap();

    assert!(next_event(&mut events, ConnectionReason::CriticalFault, EVENT_WAIT)
        .await
        .is_some());
    assert!(next_event(&mut events, ConnectionReason::Reconnected, EVENT_WAIT)
        .await
        .is_some());

    channel.close();
}

#[tokio::test]
async fn test_failed_initial_open_keeps_retrying() {
    let fabric = echo_fabric("COM8");
    fabric.unplug("COM8");

    let channel = PortChannel::new("COM8", line(), fabric.clone(), TuningFixtures::fast());
    let mut events = channel.subscribe();
    assert!(!channel.open().unwrap());
    assert!(channel.is_open());
    assert!(!channel.is_connected());

    fabric.replug("COM8");
    let back = next_event(&mut events, ConnectionReason::Reconnected, EVENT_WAIT)
        .await
        .expect("background reconnect");
    assert!(back.connected);
    assert!(channel.is_connected());

    channel.close();
    let closed = next_event(&mut events, ConnectionReason::Closed, EVENT_WAIT).await;
    assert!(closed.is_some_and(|event| !event.connected));
}
