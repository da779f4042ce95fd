//! 拟人化节奏策略
//!
//! 「先延迟、后动作」的可注入调度策略：字段之间、申请之间、逐字符输入、页面稳定等待。
//! 延迟取多个均匀样本的均值（近似正态），避免可识别的固定时序；测试使用 [`NoPacing`] 零延迟。

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::config::PacingSection;

/// 每个均值样本取几个均匀分布样本
const SAMPLES_PER_DRAW: u32 = 3;

/// 暂停类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseKind {
    BetweenFields,
    BetweenApplications,
    Keystroke,
    /// 点击后的页面稳定等待
    Settle,
}

/// 节奏策略 trait
#[async_trait]
pub trait Pacing: Send + Sync {
    /// 给出本次暂停时长（纯函数，无副作用）
    fn delay_for(&self, kind: PauseKind) -> Duration;

    async fn pause(&self, kind: PauseKind) {
        let d = self.delay_for(kind);
        if !d.is_zero() {
            tokio::time::sleep(d).await;
        }
    }
}

/// 零延迟（测试 / 调试）
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPacing;

impl Pacing for NoPacing {
    fn delay_for(&self, _kind: PauseKind) -> Duration {
        Duration::ZERO
    }
}

/// 毫秒区间 [min, max]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsRange {
    pub min: u64,
    pub max: u64,
}

impl MsRange {
    pub fn new(min: u64, max: u64) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    /// 多个均匀样本取均值，结果仍落在 [min, max]
    fn draw<R: Rng>(&self, rng: &mut R) -> u64 {
        if self.min == self.max {
            return self.min;
        }
        let sum: u64 = (0..SAMPLES_PER_DRAW)
            .map(|_| rng.random_range(self.min..=self.max))
            .sum();
        sum / SAMPLES_PER_DRAW as u64
    }
}

/// 拟人化节奏
#[derive(Debug, Clone)]
pub struct HumanPacing {
    pub between_fields: MsRange,
    pub between_applications: MsRange,
    pub keystroke: MsRange,
    pub settle: MsRange,
    /// 逐字符输入时偶发长停顿的概率
    pub long_pause_chance: f64,
    pub long_pause: MsRange,
}

impl HumanPacing {
    pub fn from_config(cfg: &PacingSection) -> Self {
        Self {
            between_fields: MsRange::new(cfg.field_min_ms, cfg.field_max_ms),
            between_applications: MsRange::new(cfg.application_min_ms, cfg.application_max_ms),
            keystroke: MsRange::new(cfg.keystroke_min_ms, cfg.keystroke_max_ms),
            settle: MsRange::new(cfg.settle_min_ms, cfg.settle_max_ms),
            long_pause_chance: cfg.long_pause_chance.clamp(0.0, 1.0),
            long_pause: MsRange::new(cfg.long_pause_min_ms, cfg.long_pause_max_ms),
        }
    }
}

impl Default for HumanPacing {
    fn default() -> Self {
        Self::from_config(&PacingSection::default())
    }
}

impl Pacing for HumanPacing {
    fn delay_for(&self, kind: PauseKind) -> Duration {
        let mut rng = rand::rng();
        let ms = match kind {
            PauseKind::BetweenFields => self.between_fields.draw(&mut rng),
            PauseKind::BetweenApplications => self.between_applications.draw(&mut rng),
            PauseKind::Settle => self.settle.draw(&mut rng),
            PauseKind::Keystroke => {
                let base = self.keystroke.draw(&mut rng);
                if rng.random_bool(self.long_pause_chance) {
                    base + self.long_pause.draw(&mut rng)
                } else {
                    base
                }
            }
        };
        Duration::from_millis(ms)
    }
}

/// 根据配置构造节奏策略；关闭时零延迟
pub fn pacing_from_config(cfg: &PacingSection) -> Box<dyn Pacing> {
    if cfg.enabled {
        Box::new(HumanPacing::from_config(cfg))
    } else {
        Box::new(NoPacing)
    }
}
