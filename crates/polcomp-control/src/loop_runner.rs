//! 补偿控制循环
//!
//! 固定周期：测量 → 计算偏振态 → `tick`。使用 `spin_sleep` 按绝对时间点
//! 休眠，单次 tick 超时时从当前时刻重新计时（不追赶）。
//!
//! 测量失败不会结束循环：两个电机被停下，下一周期重试。
//! 循环结束（停止标志或达到 `max_iterations`）时两个轴都会被停止。

use crate::{Actuator, ControlError, MeasurementSource, PolarizationController, PolarizationData, TickReport};
use polcomp_protocol::ChannelMap;
use spin_sleep::SpinSleeper;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 控制循环配置
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// 控制频率（Hz）
    pub frequency_hz: f64,

    /// 最大迭代次数（None 表示直到停止标志置位）
    pub max_iterations: Option<usize>,
}

impl LoopConfig {
    pub fn period(&self) -> Result<Duration, ControlError> {
        if !(self.frequency_hz.is_finite() && self.frequency_hz > 0.0) {
            return Err(ControlError::Config(format!(
                "Invalid frequency_hz: {} (must be > 0)",
                self.frequency_hz
            )));
        }
        Duration::try_from_secs_f64(1.0 / self.frequency_hz).map_err(|e| {
            ControlError::Config(format!(
                "Invalid frequency_hz: {} (period out of range: {})",
                self.frequency_hz, e
            ))
        })
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        LoopConfig {
            frequency_hz: 10.0,
            max_iterations: None,
        }
    }
}

/// 循环统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub iterations: usize,
    /// 发送的命令数（Stop / Restart 各计一次）
    pub commands: usize,
    /// 执行器失败次数
    pub failures: usize,
    pub measurement_failures: usize,
}

impl LoopSummary {
    fn record(&mut self, report: &TickReport) {
        self.iterations += 1;
        self.commands += report.commands();
        self.failures += report.failures();
    }
}

/// 运行补偿循环（阻塞）
pub fn run_compensation<S, A>(
    source: &mut S,
    controller: &mut PolarizationController<A>,
    channel_map: &ChannelMap,
    config: &LoopConfig,
    stop: &AtomicBool,
) -> Result<LoopSummary, ControlError>
where
    S: MeasurementSource + ?Sized,
    A: Actuator,
{
    let period = config.period()?;
    if config.frequency_hz > 1000.0 {
        warn!(
            "Very high control frequency: {} Hz. Device round trips will overrun the period.",
            config.frequency_hz
        );
    }

    let sleeper = SpinSleeper::default();
    let mut summary = LoopSummary::default();
    let mut next_tick = Instant::now();
    info!("Compensation loop started at {} Hz", config.frequency_hz);

    loop {
        if stop.load(Ordering::Acquire) {
            info!("Compensation loop stop requested");
            break;
        }
        if let Some(max_iterations) = config.max_iterations
            && summary.iterations >= max_iterations
        {
            break;
        }

        let report = match source.measure() {
            Ok(measurement) => {
                let reading = PolarizationData::from_measurement(&measurement, channel_map);
                if let Ok(data) = &reading {
                    debug!(
                        "azimuth {:.3}°, ellipticity {:.3}°",
                        data.azimuth, data.ellipticity
                    );
                }
                controller.tick(reading)
            },
            Err(e) => {
                warn!("Measurement failed: {}", e);
                summary.measurement_failures += 1;
                controller.park()
            },
        };
        summary.record(&report);

        next_tick += period;
        let now = Instant::now();
        if next_tick > now {
            sleeper.sleep(next_tick - now);
        } else {
            debug!("Tick overran by {:?}", now - next_tick);
            next_tick = now;
        }
    }

    controller.stop_all()?;
    info!(
        "Compensation loop finished: {} iterations, {} commands, {} failures",
        summary.iterations, summary.commands, summary.failures
    );
    Ok(summary)
}
