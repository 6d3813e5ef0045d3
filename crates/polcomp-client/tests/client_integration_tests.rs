//! 客户端集成测试
//!
//! 每个测试在回环地址上启动真实的服务端（模拟设备），再用客户端访问。

use polcomp_client::{
    BinaryMeasurementClient, ClientConfig, ClientError, JsonMeasurementClient, RemoteMotor,
    list_motors,
};
use polcomp_driver::simulated::{SimulatedMotor, SimulatedPolarimeter, SimulatedTimetagger};
use polcomp_driver::{MeasurementRegistry, MotorRegistry};
use polcomp_protocol::{MotorDirection, RawMeasurement};
use polcomp_server::{DeviceServer, MeasurementService, MotorService, ServerConfig, ServerHandle};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const QWP: &str = "55353314";
const HWP: &str = "55356974";

fn motor_server() -> ServerHandle {
    let mut registry = MotorRegistry::new();
    registry.register(Box::new(SimulatedMotor::new(QWP))).expect("register");
    registry
        .register(Box::new(SimulatedMotor::new(HWP).with_position(45.0)))
        .expect("register");
    DeviceServer::bind(ServerConfig::loopback(), MotorService::new(Arc::new(registry)))
        .expect("bind")
        .spawn()
        .expect("spawn")
}

fn measurement_server(registry: MeasurementRegistry) -> ServerHandle {
    let config = ServerConfig::loopback().with_stream_interval(Duration::from_millis(20));
    DeviceServer::bind(config, MeasurementService::new(Arc::new(registry)))
        .expect("bind")
        .spawn()
        .expect("spawn")
}

fn client_config(server: &ServerHandle) -> ClientConfig {
    ClientConfig::from(server.local_addr()).with_position_polling(Duration::from_millis(10))
}

// ============================================================================
// Motor
// ============================================================================

#[test]
fn test_list_and_connect() {
    let server = motor_server();
    let config = client_config(&server);

    let motors = list_motors(&config).expect("list motors");
    assert_eq!(motors.len(), 2);

    let motor = RemoteMotor::connect(config, HWP).expect("connect");
    assert_eq!(motor.serial_number(), HWP);
    assert_eq!(motor.cached_status().position, 45.0);
    assert!(!motor.is_polling());
}

#[test]
fn test_connect_missing_serial() {
    let server = motor_server();
    match RemoteMotor::connect(client_config(&server), "00000000") {
        Err(ClientError::DeviceNotFound(message)) => assert!(message.contains("00000000")),
        Err(e) => panic!("Expected DeviceNotFound, got {:?}", e),
        Ok(_) => panic!("Expected DeviceNotFound, got a client"),
    }
}

#[test]
fn test_move_by_and_move_to_block_until_idle() {
    let server = motor_server();
    let motor = RemoteMotor::connect(client_config(&server), QWP).expect("connect");

    let start = Instant::now();
    let status = motor.move_by(10.0, Some(200.0), Some(100.0)).expect("move_by");
    assert!(!status.moving);
    assert!((status.position - 10.0).abs() < 1e-6);
    // 三角形曲线：2·sqrt(10/200) ≈ 0.45 s
    assert!(start.elapsed() >= Duration::from_millis(400));

    let status = motor.move_to(-5.0, Some(200.0), Some(100.0)).expect("move_to");
    assert!((status.position + 5.0).abs() < 1e-6);
    assert_eq!(motor.cached_status(), status);
    println!("✓ Synchronous moves completed in {:?}", start.elapsed());
}

#[test]
fn test_move_wait_is_bounded() {
    let server = motor_server();
    let config = client_config(&server).with_move_timeout(Some(Duration::from_millis(100)));
    let motor = RemoteMotor::connect(config, QWP).expect("connect");

    // 90° @ 20°/s², 25°/s 需要约 4.85 s
    let start = Instant::now();
    let err = motor.move_by(90.0, None, None).unwrap_err();
    assert!(err.is_timeout(), "expected timeout, got {:?}", err);
    assert!(start.elapsed() < Duration::from_secs(2));

    // 超时后电机被停止
    assert!(!motor.status().expect("status").moving);
}

#[test]
fn test_move_wait_is_cancellable() {
    let server = motor_server();
    let motor = Arc::new(RemoteMotor::connect(client_config(&server), QWP).expect("connect"));

    let canceller = {
        let motor = Arc::clone(&motor);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            motor.cancel_motion();
        })
    };

    let start = Instant::now();
    let result = motor.move_by(90.0, None, None);
    canceller.join().expect("canceller panicked");
    assert!(matches!(result, Err(ClientError::Cancelled)), "got {:?}", result);
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(!motor.status().expect("status").moving);
}

#[test]
fn test_huge_move_waits_are_capped() {
    let server = motor_server();
    let motor = Arc::new(RemoteMotor::connect(client_config(&server), QWP).expect("connect"));

    let canceller = {
        let motor = Arc::clone(&motor);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            motor.cancel_motion();
        })
    };

    // 运动曲线估计远超 Duration 的范围
    let result = motor.move_by(1e300, None, None);
    canceller.join().expect("canceller panicked");
    assert!(matches!(result, Err(ClientError::Cancelled)), "got {:?}", result);
    assert!(!motor.status().expect("status").moving);
}

#[test]
fn test_jog_and_stop_join_poller() {
    let server = motor_server();
    let motor = RemoteMotor::connect(client_config(&server), QWP).expect("connect");

    motor
        .jog(MotorDirection::Backward, Some(20.0), Some(15.0))
        .expect("jog");
    assert!(motor.is_polling());
    let jog = motor.active_jog().expect("active jog");
    assert_eq!(jog.direction, MotorDirection::Backward);
    assert_eq!(jog.velocity, 15.0);

    // 后台线程刷新缓存
    let deadline = Instant::now() + Duration::from_secs(2);
    while motor.cached_status().position > -0.5 {
        assert!(Instant::now() < deadline, "cached status not refreshed");
        thread::sleep(Duration::from_millis(10));
    }
    let cached = motor.cached_status();
    assert!(cached.moving);
    assert_eq!(cached.direction, MotorDirection::Backward);

    let status = motor.stop().expect("stop");
    assert!(!status.moving);
    assert!(!motor.is_polling());
    assert!(motor.active_jog().is_none());

    assert!(matches!(
        motor.jog(MotorDirection::Idle, None, None),
        Err(ClientError::InvalidArgument(_))
    ));
}

#[test]
fn test_stop_joins_poller_even_if_server_is_gone() {
    let server = motor_server();
    let motor = RemoteMotor::connect(client_config(&server), QWP).expect("connect");
    motor.jog(MotorDirection::Forward, None, None).expect("jog");
    assert!(motor.is_polling());

    server.shutdown();
    assert!(motor.stop().is_err());
    assert!(!motor.is_polling());
}

#[test]
fn test_concurrent_status_reads() {
    let server = motor_server();
    let motor = Arc::new(RemoteMotor::connect(client_config(&server), HWP).expect("connect"));
    motor.jog(MotorDirection::Forward, None, Some(30.0)).expect("jog");

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let motor = Arc::clone(&motor);
            thread::spawn(move || {
                for _ in 0..20 {
                    let status = motor.status().expect("status");
                    assert!(status.moving);
                    assert!(status.position >= 45.0);
                }
            })
        })
        .collect();
    for reader in readers {
        reader.join().expect("reader panicked");
    }
    motor.stop().expect("stop");
}

// ============================================================================
// Measurement
// ============================================================================

#[test]
fn test_binary_measurement_client() {
    let mut registry = MeasurementRegistry::new();
    registry
        .register(Box::new(SimulatedTimetagger::new("TT-7").with_events(32)))
        .expect("register");
    let server = measurement_server(registry);

    let mut client =
        BinaryMeasurementClient::connect(client_config(&server), Some("TT-7")).expect("connect");
    assert_eq!(client.device_info().serial_number, "TT-7");

    let data = client.measure_once().expect("measure once");
    assert_eq!(data.len(), 32);

    let delay = client.network_delay().expect("network delay");
    assert!(delay.round_trip < Duration::from_secs(1));
    assert!(delay.server_time > 0.0);

    client.start_measuring().expect("start");
    assert!(client.is_streaming());
    // 流式期间不能发其他命令
    assert!(matches!(client.measure_once(), Err(ClientError::InvalidArgument(_))));
    for _ in 0..3 {
        assert_eq!(client.next_streamed().expect("streamed").len(), 32);
    }
    client.stop_measuring().expect("stop");
    assert!(!client.is_streaming());

    // 会话仍可用
    assert!(client.measure_once().is_ok());
    assert!(!client.is_broken());
}

#[test]
fn test_binary_client_rejects_wrong_serial() {
    let mut registry = MeasurementRegistry::new();
    registry
        .register(Box::new(SimulatedTimetagger::new("TT-7")))
        .expect("register");
    let server = measurement_server(registry);

    let result = BinaryMeasurementClient::connect(client_config(&server), Some("TT-8"));
    assert!(matches!(result, Err(ClientError::DeviceNotFound(_))));
}

#[test]
fn test_json_measurement_client() {
    let mut registry = MeasurementRegistry::new();
    registry
        .register(Box::new(SimulatedPolarimeter::fixed("PAX-1", 45.0, 0.0)))
        .expect("register");
    let server = measurement_server(registry);

    let client = JsonMeasurementClient::connect(client_config(&server), None).expect("connect");
    assert_eq!(client.device_info().serial_number, "PAX-1");
    match client.measure().expect("measure") {
        // 45° 线偏振：H 与 V 各一半
        RawMeasurement::Singles(counts) => assert_eq!(counts[4], counts[5]),
        other => panic!("Expected singles, got {:?}", other),
    }
}
