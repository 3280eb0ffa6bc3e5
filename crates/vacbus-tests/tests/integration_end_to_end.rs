// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # End-to-End Tests
//!
//! Starts a [`BusRuntime`] on a simulated bench: detection, static
//! bindings, prioritized device traffic, a cable pulled and put back.

use std::sync::Arc;
use std::time::Duration;

use vacbus_bin::BusRuntime;
use vacbus_config::{DeviceBinding, VacbusConfig};
use vacbus_core::{ConnectionReason, Parity, PriorityManager};
use vacbus_detect::DeviceKind;
use vacbus_protocol::ModbusRequest;
use vacbus_tests::common::{
    init_test_logging, next_event, BenchFixtures, DeviceFixtures, TuningFixtures, EVENT_WAIT,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn bench_config() -> VacbusConfig {
    let mut config = VacbusConfig::default();
    config.bus = TuningFixtures::fast();
    config.detection.options.probe_timeout = Duration::from_millis(30);
    config
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_detected_dry_pump_end_to_end() {
    init_test_logging();
    let fabric = Arc::new(BenchFixtures::dry_pump_bench());
    let runtime = BusRuntime::start(&bench_config(), fabric.clone(), true)
        .await
        .unwrap();

    let report = runtime.report();
    assert_eq!(report.devices.len(), 1);
    assert_eq!(report.devices["DryPump"], "COM5");
    assert_eq!(
        report.undetected,
        vec!["TurboPump", "BathCirculator", "TemperatureController", "IoModule"]
    );
    assert_eq!(report.channels.len(), 1);
    assert!(report.channels[0].connected);
    assert_eq!(report.channels[0].settings, DeviceKind::DryPump.settings());

    let pump = runtime.registry().adapter("DryPump").expect("dry pump adapter");
    let manager = PriorityManager::default();
    manager.register_device("DryPump", pump.port());

    let write = ModbusRequest::write_multiple_registers(1, 0x0001, &[1]).unwrap();
    let ack = manager
        .execute_command("DryPump", Arc::clone(&pump), write.encode(), write.expected_response_length())
        .await
        .unwrap()
        .expect("start acknowledged");
    assert!(write.parse_response(&ack).is_ok());

    let read = ModbusRequest::read_holding_registers(1, 0x0004, 2).unwrap();
    let frame = manager
        .query_command("DryPump", Arc::clone(&pump), read.encode(), read.expected_response_length())
        .await
        .expect("status answer");
    assert_eq!(
        read.parse_response(&frame).unwrap().registers(),
        Some(&[0x0004, 0x0005][..])
    );

    // COM3 answered nothing during detection and never got a channel.
    assert!(runtime.registry().channel("COM3").is_none());
    assert_eq!(fabric.open_handles("COM3"), 0);

    manager.shutdown();
    runtime.shutdown();
    assert!(runtime.report().channels.iter().all(|c| c.disposed));
    assert_eq!(fabric.open_handles("COM5"), 0);
}

#[tokio::test]
async fn test_cable_pulled_and_restored() {
    init_test_logging();
    let fabric = Arc::new(BenchFixtures::dry_pump_bench());
    let runtime = BusRuntime::start(&bench_config(), fabric.clone(), true)
        .await
        .unwrap();
    let mut events = runtime.subscribe();
    let pump = runtime.registry().adapter("DryPump").expect("dry pump adapter");
    let read = ModbusRequest::read_holding_registers(1, 0x0000, 1).unwrap();
    pump.set_expected_response_length(read.expected_response_length());

    pump.write(&read.encode());
    assert_eq!(
        pump.read_all_async().await.unwrap(),
        Some(vec![0x01, 0x03, 0x02, 0x00, 0x00, 0xB8, 0x44])
    );

    fabric.unplug("COM5");
    pump.write(&read.encode());
    assert_eq!(pump.read_all_async().await.unwrap(), None);
    let lost = next_event(&mut events, ConnectionReason::CriticalFault, EVENT_WAIT)
        .await
        .expect("disconnect reported");
    assert_eq!(lost.port, "COM5");
    assert!(!pump.is_connected());

    fabric.replug("COM5");
    assert!(next_event(&mut events, ConnectionReason::Reconnected, EVENT_WAIT)
        .await
        .is_some());

    pump.write(&read.encode());
    assert!(pump.read_all_async().await.unwrap().is_some());
    assert_eq!(runtime.registry().status()[0].reconnects, 1);

    runtime.shutdown();
}

#[tokio::test]
async fn test_static_binding_alongside_detection() {
    let fabric = Arc::new(BenchFixtures::dry_pump_bench());
    DeviceFixtures::attach(&fabric, "COM4", DeviceKind::TemperatureController);

    let mut config = bench_config();
    let mut binding = DeviceBinding::new("COM4");
    binding.baud_rate = 19200;
    binding.parity = Parity::None;
    binding.expected_response_length = 7;
    config.devices.insert("TemperatureController".into(), binding);

    let runtime = BusRuntime::start(&config, fabric.clone(), true).await.unwrap();
    let report = runtime.report();

    assert_eq!(report.devices["TemperatureController"], "COM4");
    assert_eq!(report.devices["DryPump"], "COM5");
    assert_eq!(report.undetected, vec!["TurboPump", "BathCirculator", "IoModule"]);
    assert_eq!(runtime.adapters().len(), 2);

    // The statically bound port is only opened by its channel.
    assert_eq!(fabric.stats("COM4").opens, 1);

    let controller = runtime
        .registry()
        .adapter("TemperatureController")
        .expect("controller adapter");
    let read = ModbusRequest::read_input_registers(1, 0x0000, 1).unwrap();
    controller.write(&read.encode());
    let frame = controller.read_all_async().await.unwrap().expect("controller answer");
    assert!(read.parse_response(&frame).is_ok());

    runtime.shutdown();
}

#[tokio::test]
async fn test_detection_disabled_uses_static_bindings_only() {
    let fabric = Arc::new(BenchFixtures::dry_pump_bench());
    let mut config = bench_config();
    config.detection.enabled = false;

    let runtime = BusRuntime::start(&config, fabric.clone(), true).await.unwrap();

    assert!(runtime.detection().is_none());
    assert!(runtime.report().devices.is_empty());
    assert_eq!(fabric.stats("COM5").opens, 0);
    assert_eq!(fabric.stats("COM3").opens, 0);
}
