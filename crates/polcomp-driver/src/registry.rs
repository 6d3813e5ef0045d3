//! 设备注册表
//!
//! 启动时构建一次，之后以 `Arc` 共享给所有连接处理线程。
//! 每台设备独占一把锁，所有驱动调用都在锁内串行执行。

use crate::{Device, DriverError, MeasurementDriver, MotorDriver};
use parking_lot::{Mutex, MutexGuard};
use polcomp_protocol::DeviceInfo;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// 电机注册表
pub type MotorRegistry = DeviceRegistry<dyn MotorDriver>;

/// 测量设备注册表
pub type MeasurementRegistry = DeviceRegistry<dyn MeasurementDriver>;

/// 单台设备：缓存的身份信息 + 带锁的驱动
pub struct DeviceSlot<T: ?Sized> {
    info: DeviceInfo,
    device: Mutex<Box<T>>,
}

impl<T: ?Sized> DeviceSlot<T> {
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn serial_number(&self) -> &str {
        &self.info.serial_number
    }

    /// 获取设备锁
    pub fn lock(&self) -> MutexGuard<'_, Box<T>> {
        self.device.lock()
    }

    /// 在设备锁内执行一次驱动调用
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.device.lock();
        f(&mut **guard)
    }

    /// 同 [`with`](Self::with)，但驱动 panic 转为 `DriverError::Hardware`
    ///
    /// 锁不会因 panic 中毒，设备之后仍可继续使用。
    pub fn try_with<R>(&self, f: impl FnOnce(&mut T) -> Result<R, DriverError>) -> Result<R, DriverError> {
        panic::catch_unwind(AssertUnwindSafe(|| self.with(f))).unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            error!("{} driver panicked: {}", self.info.serial_number, message);
            Err(DriverError::Hardware(format!("driver panicked: {}", message)))
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// 按序列号索引的设备集合
pub struct DeviceRegistry<T: ?Sized> {
    slots: Vec<Arc<DeviceSlot<T>>>,
}

impl<T: Device + ?Sized> DeviceRegistry<T> {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// 注册设备
    ///
    /// 序列号重复时返回 `DuplicateSerial`。
    pub fn register(&mut self, device: Box<T>) -> Result<Arc<DeviceSlot<T>>, DriverError> {
        let info = device.device_info();
        if self.get(&info.serial_number).is_some() {
            return Err(DriverError::DuplicateSerial(info.serial_number));
        }
        debug!("Registered device {}", info);

        let slot = Arc::new(DeviceSlot {
            info,
            device: Mutex::new(device),
        });
        self.slots.push(Arc::clone(&slot));
        Ok(slot)
    }

    /// 查找设备，不存在时返回 `DeviceNotFound`
    pub fn find(&self, serial_number: &str) -> Result<Arc<DeviceSlot<T>>, DriverError> {
        self.get(serial_number)
            .cloned()
            .ok_or_else(|| DriverError::DeviceNotFound(serial_number.to_string()))
    }

    pub fn get(&self, serial_number: &str) -> Option<&Arc<DeviceSlot<T>>> {
        self.slots.iter().find(|slot| slot.serial_number() == serial_number)
    }

    /// 第一台注册的设备（单设备服务使用）
    pub fn first(&self) -> Option<Arc<DeviceSlot<T>>> {
        self.slots.first().cloned()
    }

    /// 所有设备的身份信息（按注册顺序）
    pub fn list(&self) -> Vec<DeviceInfo> {
        self.slots.iter().map(|slot| slot.info().clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<DeviceSlot<T>>> {
        self.slots.iter()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// 断开所有设备（错误只记录日志）
    pub fn disconnect_all(&self) {
        for slot in &self.slots {
            if let Err(e) = slot.with(|device| device.disconnect()) {
                warn!("Failed to disconnect {}: {}", slot.serial_number(), e);
            }
        }
    }
}

impl<T: Device + ?Sized> Default for DeviceRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polcomp_protocol::{MotorDirection, MotorState};

    struct FakeMotor {
        serial: &'static str,
        position: f64,
    }

    impl Device for FakeMotor {
        fn device_info(&self) -> DeviceInfo {
            DeviceInfo::new("Fake", "FM1", self.serial, "0.1")
        }

        fn disconnect(&mut self) -> Result<(), DriverError> {
            Err(DriverError::Disconnected)
        }
    }

    impl MotorDriver for FakeMotor {
        fn state(&mut self) -> Result<MotorState, DriverError> {
            Ok(MotorState::idle_at(self.position))
        }

        fn move_by(&mut self, angle: f64, _: f64, _: f64) -> Result<(), DriverError> {
            self.position += angle;
            Ok(())
        }

        fn move_to(&mut self, position: f64, _: f64, _: f64) -> Result<(), DriverError> {
            self.position = position;
            Ok(())
        }

        fn jog(&mut self, _: MotorDirection, _: f64, _: f64) -> Result<(), DriverError> {
            Err(DriverError::NotSupported("jog".into()))
        }

        fn stop(&mut self) -> Result<(), DriverError> {
            Ok(())
        }
    }

    fn fake(serial: &'static str) -> Box<dyn MotorDriver> {
        Box::new(FakeMotor {
            serial,
            position: 0.0,
        })
    }

    #[test]
    fn test_register_and_find() {
        let mut registry = MotorRegistry::new();
        registry.register(fake("A")).unwrap();
        registry.register(fake("B")).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.find("B").unwrap().serial_number(), "B");
        assert_eq!(
            registry.list().iter().map(|i| i.serial_number.as_str()).collect::<Vec<_>>(),
            vec!["A", "B"]
        );
        assert_eq!(registry.first().unwrap().serial_number(), "A");
    }

    #[test]
    fn test_missing_device() {
        let registry = MotorRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(
            registry.find("nope").err(),
            Some(DriverError::DeviceNotFound("nope".into()))
        );
    }

    #[test]
    fn test_duplicate_serial_rejected() {
        let mut registry = MotorRegistry::new();
        registry.register(fake("A")).unwrap();
        assert!(matches!(
            registry.register(fake("A")),
            Err(DriverError::DuplicateSerial(s)) if s == "A"
        ));
    }

    #[test]
    fn test_slot_serializes_driver_calls() {
        let mut registry = MotorRegistry::new();
        let slot = registry.register(fake("A")).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let slot = Arc::clone(&slot);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        slot.with(|m| m.move_by(1.0, 20.0, 25.0)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(slot.with(|m| m.position()).unwrap(), 800.0);
    }

    #[test]
    fn test_driver_panic_becomes_error() {
        let mut registry = MotorRegistry::new();
        let slot = registry.register(fake("A")).unwrap();

        let result: Result<(), DriverError> = slot.try_with(|_| panic!("encoder lost at {}", 3));
        match result {
            Err(DriverError::Hardware(message)) => {
                assert!(message.contains("driver panicked"));
                assert!(message.contains("encoder lost at 3"));
            },
            other => panic!("Expected Hardware error, got {:?}", other),
        }

        // 锁未中毒，设备仍可用
        slot.try_with(|m| m.move_by(2.0, 20.0, 25.0)).unwrap();
        assert_eq!(slot.try_with(|m| m.position()).unwrap(), 2.0);
        println!("✓ Driver panic reported as hardware error");
    }

    #[test]
    fn test_disconnect_all() {
        let mut registry = MotorRegistry::new();
        registry.register(fake("A")).unwrap();
        // 断开失败只记录日志，不中断其余设备
        registry.disconnect_all();
        assert!(registry.find("A").is_ok());
    }
}
