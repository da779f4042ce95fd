//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `AUTOAPPLY__*` 覆盖（双下划线表示嵌套，如 `AUTOAPPLY__APP__DRY_RUN=true`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 步数上限的允许区间
const MIN_STEP_CEILING: usize = 8;
const MAX_STEP_CEILING: usize = 12;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub search: SearchSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub pacing: PacingSection,
    #[serde(default)]
    pub browser: BrowserSection,
}

/// [app] 段：平台顺序、演练模式、文件路径
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    /// 按顺序逐个处理的平台
    #[serde(default = "default_platforms")]
    pub platforms: Vec<String>,
    /// 演练：走完所有步骤但不最终提交
    #[serde(default)]
    pub dry_run: bool,
    /// 每个平台本次运行最多申请数
    #[serde(default = "default_max_applications")]
    pub max_applications: usize,
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,
    #[serde(default = "default_answers_path")]
    pub answers_path: PathBuf,
    /// 主简历文件；缺失时只记日志
    pub resume_path: Option<PathBuf>,
}

fn default_platforms() -> Vec<String> {
    vec!["linkedin".into(), "indeed".into()]
}

fn default_max_applications() -> usize {
    25
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("data/applications.db")
}

fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("data/snapshots")
}

fn default_answers_path() -> PathBuf {
    PathBuf::from("config/answers.toml")
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            platforms: default_platforms(),
            dry_run: false,
            max_applications: default_max_applications(),
            ledger_path: default_ledger_path(),
            snapshot_dir: default_snapshot_dir(),
            answers_path: default_answers_path(),
            resume_path: None,
        }
    }
}

/// [search] 段：搜索关键词与地点
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SearchSection {
    #[serde(default)]
    pub keywords: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub remote_only: bool,
}

/// [engine] 段：步数上限、重试上限、各类等待超时
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_listing_pages")]
    pub max_listing_pages: u32,
    #[serde(default = "default_listing_timeout_secs")]
    pub listing_timeout_secs: u64,
    #[serde(default = "default_element_timeout_secs")]
    pub element_timeout_secs: u64,
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
}

fn default_max_steps() -> usize {
    10
}

fn default_max_retries() -> u32 {
    2
}

fn default_max_listing_pages() -> u32 {
    10
}

fn default_listing_timeout_secs() -> u64 {
    20
}

fn default_element_timeout_secs() -> u64 {
    5
}

fn default_confirmation_timeout_secs() -> u64 {
    10
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_retries: default_max_retries(),
            max_listing_pages: default_max_listing_pages(),
            listing_timeout_secs: default_listing_timeout_secs(),
            element_timeout_secs: default_element_timeout_secs(),
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
        }
    }
}

/// [pacing] 段：拟人化延迟区间（毫秒）
#[derive(Debug, Clone, Deserialize)]
pub struct PacingSection {
    #[serde(default = "default_pacing_enabled")]
    pub enabled: bool,
    #[serde(default = "default_field_min_ms")]
    pub field_min_ms: u64,
    #[serde(default = "default_field_max_ms")]
    pub field_max_ms: u64,
    #[serde(default = "default_application_min_ms")]
    pub application_min_ms: u64,
    #[serde(default = "default_application_max_ms")]
    pub application_max_ms: u64,
    #[serde(default = "default_keystroke_min_ms")]
    pub keystroke_min_ms: u64,
    #[serde(default = "default_keystroke_max_ms")]
    pub keystroke_max_ms: u64,
    #[serde(default = "default_settle_min_ms")]
    pub settle_min_ms: u64,
    #[serde(default = "default_settle_max_ms")]
    pub settle_max_ms: u64,
    #[serde(default = "default_long_pause_chance")]
    pub long_pause_chance: f64,
    #[serde(default = "default_long_pause_min_ms")]
    pub long_pause_min_ms: u64,
    #[serde(default = "default_long_pause_max_ms")]
    pub long_pause_max_ms: u64,
}

fn default_pacing_enabled() -> bool {
    true
}

fn default_field_min_ms() -> u64 {
    1500
}

fn default_field_max_ms() -> u64 {
    4000
}

fn default_application_min_ms() -> u64 {
    5000
}

fn default_application_max_ms() -> u64 {
    15000
}

fn default_keystroke_min_ms() -> u64 {
    50
}

fn default_keystroke_max_ms() -> u64 {
    150
}

fn default_settle_min_ms() -> u64 {
    800
}

fn default_settle_max_ms() -> u64 {
    2000
}

fn default_long_pause_chance() -> f64 {
    0.05
}

fn default_long_pause_min_ms() -> u64 {
    300
}

fn default_long_pause_max_ms() -> u64 {
    900
}

impl Default for PacingSection {
    fn default() -> Self {
        Self {
            enabled: default_pacing_enabled(),
            field_min_ms: default_field_min_ms(),
            field_max_ms: default_field_max_ms(),
            application_min_ms: default_application_min_ms(),
            application_max_ms: default_application_max_ms(),
            keystroke_min_ms: default_keystroke_min_ms(),
            keystroke_max_ms: default_keystroke_max_ms(),
            settle_min_ms: default_settle_min_ms(),
            settle_max_ms: default_settle_max_ms(),
            long_pause_chance: default_long_pause_chance(),
            long_pause_min_ms: default_long_pause_min_ms(),
            long_pause_max_ms: default_long_pause_max_ms(),
        }
    }
}

/// [browser] 段：Chrome 启动参数
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BrowserSection {
    #[serde(default)]
    pub headless: bool,
    /// Chrome 用户数据目录（保存登录态）
    pub user_data_dir: Option<PathBuf>,
    pub chrome_path: Option<PathBuf>,
}

/// 单个平台调用的运行选项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub dry_run: bool,
    pub max_applications: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_applications: default_max_applications(),
        }
    }
}

/// 引擎上限与超时（已做区间约束）
#[derive(Debug, Clone)]
pub struct EngineLimits {
    pub max_steps: usize,
    pub max_retries: u32,
    pub max_listing_pages: u32,
    pub listing_timeout: Duration,
    pub element_timeout: Duration,
    pub confirmation_timeout: Duration,
}

impl EngineLimits {
    pub fn from_config(cfg: &EngineSection) -> Self {
        Self {
            max_steps: cfg.max_steps.clamp(MIN_STEP_CEILING, MAX_STEP_CEILING),
            max_retries: cfg.max_retries,
            max_listing_pages: cfg.max_listing_pages.max(1),
            listing_timeout: Duration::from_secs(cfg.listing_timeout_secs),
            element_timeout: Duration::from_secs(cfg.element_timeout_secs),
            confirmation_timeout: Duration::from_secs(cfg.confirmation_timeout_secs),
        }
    }
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self::from_config(&EngineSection::default())
    }
}

impl AppConfig {
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            dry_run: self.app.dry_run,
            max_applications: self.app.max_applications,
        }
    }

    pub fn engine_limits(&self) -> EngineLimits {
        EngineLimits::from_config(&self.engine)
    }
}

/// 从 config 目录加载配置，环境变量 AUTOAPPLY__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 AUTOAPPLY__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("AUTOAPPLY")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("app.platforms")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
