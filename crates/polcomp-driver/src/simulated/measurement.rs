//! 模拟测量设备
//!
//! - [`SimulatedPolarimeter`]: 根据给定偏振态生成各偏振基的计数
//! - [`SimulatedTimetagger`]: 生成随机的累加时间标签流

use crate::{Device, DriverError, MeasurementDriver};
use polcomp_protocol::{ChannelMap, DeviceInfo, RawData, RawMeasurement};
use rand::Rng;
use std::sync::Arc;

/// 偏振态来源：返回 (azimuth, ellipticity)，单位度
pub type PolarizationSource = Arc<dyn Fn() -> (f64, f64) + Send + Sync>;

/// 模拟偏振计（输出 singles 计数）
pub struct SimulatedPolarimeter {
    info: DeviceInfo,
    source: PolarizationSource,
    channel_map: ChannelMap,
    /// 每个偏振基对的总计数
    intensity: f64,
    /// 相对噪声幅度（0 表示无噪声）
    noise: f64,
}

impl SimulatedPolarimeter {
    pub fn new(serial_number: impl Into<String>, source: PolarizationSource) -> Self {
        Self {
            info: DeviceInfo::new("Simulated", "PAX1000IR2", serial_number, "sim-1.0"),
            source,
            channel_map: ChannelMap::default(),
            intensity: 100_000.0,
            noise: 0.0,
        }
    }

    /// 固定偏振态
    pub fn fixed(serial_number: impl Into<String>, azimuth: f64, ellipticity: f64) -> Self {
        Self::new(serial_number, Arc::new(move || (azimuth, ellipticity)))
    }

    pub fn with_channel_map(mut self, channel_map: ChannelMap) -> Self {
        self.channel_map = channel_map;
        self
    }

    pub fn with_intensity(mut self, intensity: f64) -> Self {
        self.intensity = intensity;
        self
    }

    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = noise;
        self
    }

    fn count(&self, fraction: f64, rng: &mut impl Rng) -> u64 {
        let mut expected = self.intensity * fraction;
        if self.noise > 0.0 {
            expected *= 1.0 + rng.gen_range(-self.noise..=self.noise);
        }
        expected.round().max(0.0) as u64
    }
}

impl Device for SimulatedPolarimeter {
    fn device_info(&self) -> DeviceInfo {
        self.info.clone()
    }
}

impl MeasurementDriver for SimulatedPolarimeter {
    fn measure(&mut self) -> Result<RawMeasurement, DriverError> {
        let (azimuth, ellipticity) = (self.source)();
        let theta = azimuth.to_radians();
        let eta = ellipticity.to_radians();

        // 庞加莱球上的归一化 Stokes 向量
        let s1 = (2.0 * eta).cos() * (2.0 * theta).cos();
        let s2 = (2.0 * eta).cos() * (2.0 * theta).sin();
        let s3 = (2.0 * eta).sin();

        let map = self.channel_map;
        let mut counts = vec![0u64; map.channel_count()];
        let mut rng = rand::thread_rng();
        for (channel, fraction) in [
            (map.h, (1.0 + s1) / 2.0),
            (map.v, (1.0 - s1) / 2.0),
            (map.d, (1.0 + s2) / 2.0),
            (map.a, (1.0 - s2) / 2.0),
            (map.r, (1.0 + s3) / 2.0),
            (map.l, (1.0 - s3) / 2.0),
        ] {
            if let Some(channel) = channel {
                counts[channel as usize] = self.count(fraction, &mut rng);
            }
        }
        Ok(RawMeasurement::Singles(counts))
    }
}

/// 模拟时间标签器
pub struct SimulatedTimetagger {
    info: DeviceInfo,
    channels: u8,
    events_per_measurement: usize,
    /// 上一次测量的最后一个时间标签（保证跨测量单调）
    clock: i64,
}

impl SimulatedTimetagger {
    pub fn new(serial_number: impl Into<String>) -> Self {
        Self {
            info: DeviceInfo::new("Simulated", "Time Tagger 20", serial_number, "sim-1.0"),
            channels: 8,
            events_per_measurement: 1000,
            clock: 0,
        }
    }

    pub fn with_channels(mut self, channels: u8) -> Self {
        self.channels = channels.max(1);
        self
    }

    pub fn with_events(mut self, events: usize) -> Self {
        self.events_per_measurement = events;
        self
    }
}

impl Device for SimulatedTimetagger {
    fn device_info(&self) -> DeviceInfo {
        self.info.clone()
    }
}

impl MeasurementDriver for SimulatedTimetagger {
    fn measure(&mut self) -> Result<RawMeasurement, DriverError> {
        let mut rng = rand::thread_rng();
        let n = self.events_per_measurement;
        let mut timetags = Vec::with_capacity(n);
        let mut channels = Vec::with_capacity(n);
        for _ in 0..n {
            self.clock = self.clock.saturating_add(rng.gen_range(0..300));
            timetags.push(self.clock);
            channels.push(rng.gen_range(0..self.channels));
        }
        let data = RawData::new(timetags, channels)
            .map_err(|e| DriverError::Hardware(e.to_string()))?;
        Ok(RawMeasurement::Timetags(data))
    }
}
