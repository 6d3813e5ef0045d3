//! 测量命令
//!
//! `measure` 采集原始数据并计算偏振态；`delay` 用二进制协议测网络往返。

use crate::servers::ServerArgs;
use anyhow::Result;
use clap::Args;
use polcomp_client::{BinaryMeasurementClient, JsonMeasurementClient};
use polcomp_control::PolarizationData;
use polcomp_protocol::{ChannelMap, RawMeasurement};

/// 测量命令参数
#[derive(Args, Debug)]
pub struct MeasureCommand {
    /// 期望的设备序列号
    #[arg(long)]
    pub serial: Option<String>,

    /// 使用二进制协议（仅时间标签器）
    #[arg(long)]
    pub binary: bool,

    /// 使用 1550 nm 通道布局（默认 780 nm）
    #[arg(long)]
    pub band_1550: bool,

    /// 以 JSON 输出原始数据
    #[arg(long)]
    pub json: bool,
}

impl MeasureCommand {
    fn channel_map(&self) -> ChannelMap {
        if self.band_1550 {
            ChannelMap::BAND_1550
        } else {
            ChannelMap::BAND_780
        }
    }

    pub fn execute(&self, servers: &ServerArgs) -> Result<()> {
        let config = servers.measurement_config();
        let serial = self.serial.as_deref();
        let (device, measurement) = if self.binary {
            let mut client = BinaryMeasurementClient::connect(config, serial)?;
            let measurement = client.measure()?;
            (client.device_info().clone(), measurement)
        } else {
            let client = JsonMeasurementClient::connect(config, serial)?;
            let measurement = client.measure()?;
            (client.device_info().clone(), measurement)
        };

        if self.json {
            println!("{}", serde_json::to_string(&measurement)?);
            return Ok(());
        }

        println!("📡 {}", device);
        let channel_map = self.channel_map();
        if let RawMeasurement::Timetags(data) = &measurement {
            println!("  事件数: {}", data.len());
        }
        let counts = measurement.channel_counts(channel_map.channel_count());
        for (channel, count) in counts.iter().enumerate() {
            println!("  通道 {}: {}", channel, count);
        }

        match PolarizationData::from_counts(&counts, &channel_map) {
            Ok(data) => {
                println!("📊 方位角 {:.3}°, 椭圆度 {:.3}°", data.azimuth, data.ellipticity);
                println!(
                    "   s1 = {:.4}, s2 = {:.4}, s3 = {:.4}",
                    data.normalized_s1, data.normalized_s2, data.normalized_s3
                );
            },
            Err(e) => println!("⚠️  无法计算偏振态: {}", e),
        }
        Ok(())
    }
}

/// 网络延迟命令参数
#[derive(Args, Debug)]
pub struct DelayCommand {
    /// 测量次数
    #[arg(short = 'n', long, default_value_t = 5)]
    pub count: usize,
}

impl DelayCommand {
    pub fn execute(&self, servers: &ServerArgs) -> Result<()> {
        let mut client = BinaryMeasurementClient::connect(servers.measurement_config(), None)?;
        println!("📡 {}", client.device_info());

        let mut total = 0.0;
        for i in 0..self.count.max(1) {
            let delay = client.network_delay()?;
            let ms = delay.round_trip.as_secs_f64() * 1000.0;
            total += ms;
            println!(
                "  #{}: 往返 {:.3} ms, 服务端时间 {:.6}",
                i + 1,
                ms,
                delay.server_time
            );
        }
        println!("⏱️  平均往返 {:.3} ms", total / self.count.max(1) as f64);
        Ok(())
    }
}
