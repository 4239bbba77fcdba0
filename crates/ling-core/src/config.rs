//! 宿主配置模型：微内核识别的全部配置键与缺省值。
//!
//! # 设计动机（Why）
//! - 配置在运行时构造期一次性固化（时长类键以毫秒整数表达），避免
//!   运行中途读到不一致的组合；
//! - 键名与清单一致采用 kebab-case；嵌套段（`host-governance`、
//!   `runtime`）对应子结构体。
//!
//! # 契约说明（What）
//! - 所有字段带缺省值，空文档即合法配置；
//! - `runtime.rate-limit.rate == 0` 表示不启用限流；
//! - `dev-mode` 同时启用权限旁路（记录真实判定）与热重载。

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::LingError;

/// 宿主治理开关：决定宿主发起与宿主内部的调用是否进入治理管道。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct HostGovernanceOptions {
    /// 对宿主发起的跨单元调用应用治理内核。
    pub enabled: bool,
    /// 权限检查是否覆盖宿主调用方。
    pub check_permissions: bool,
    /// 宿主到宿主的调用也视为受治理调用。
    pub govern_internal_calls: bool,
}

impl Default for HostGovernanceOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            check_permissions: false,
            govern_internal_calls: false,
        }
    }
}

/// 令牌桶限流配置；`rate` 为每秒补充令牌数，`burst` 为桶容量。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct RateLimitOptions {
    pub rate: u64,
    pub burst: u64,
}

impl Default for RateLimitOptions {
    fn default() -> Self {
        Self { rate: 0, burst: 0 }
    }
}

/// 熔断器配置（滑动计数窗口）。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct BreakerOptions {
    /// 失败率阈值（百分比）。
    pub failure_threshold: u8,
    /// 慢调用率阈值（百分比）；100 等效于关闭慢调用判定。
    pub slow_threshold: u8,
    /// 慢调用判定时长，毫秒。
    pub slow_duration: u64,
    /// 触发判定前的最小样本数。
    pub min_calls: usize,
    /// OPEN → HALF-OPEN 的等待时长，毫秒。
    pub wait: u64,
    /// HALF-OPEN 状态放行的探针数。
    pub half_open_probes: usize,
    /// 滑动窗口容量（最近 N 次调用）。
    pub window_size: usize,
}

impl Default for BreakerOptions {
    fn default() -> Self {
        Self {
            failure_threshold: 50,
            slow_threshold: 100,
            slow_duration: 60_000,
            min_calls: 10,
            wait: 30_000,
            half_open_probes: 3,
            window_size: 100,
        }
    }
}

/// 运行时调优段（`runtime.*`）；时长键单位均为毫秒。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct RuntimeOptions {
    /// 单次调用缺省超时。
    pub default_timeout: u64,
    /// 单元级并发上限（舱壁许可数）。
    pub bulkhead_max_concurrent: usize,
    /// 舱壁许可等待窗口。
    pub bulkhead_acquire_timeout: u64,
    /// 诊断快照保留条数。
    pub max_history_snapshots: usize,
    /// 排水巡检周期。
    pub dying_check_interval: u64,
    /// 卸载/停机时的同步排水上限。
    pub force_cleanup_delay: u64,
    /// 命名空间弱引用探活的宽限时长。
    pub leak_check_delay: u64,
    /// 垂死队列容量；达到后拒绝新的安装（背压）。
    pub max_dying: usize,
    pub rate_limit: RateLimitOptions,
    pub breaker: BreakerOptions,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            default_timeout: 3_000,
            bulkhead_max_concurrent: 64,
            bulkhead_acquire_timeout: 500,
            max_history_snapshots: 32,
            dying_check_interval: 1_000,
            force_cleanup_delay: 30_000,
            leak_check_delay: 5_000,
            max_dying: 4,
            rate_limit: RateLimitOptions::default(),
            breaker: BreakerOptions::default(),
        }
    }
}

/// 微内核宿主配置全集。
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct LingConfig {
    /// 总开关。
    pub enabled: bool,
    /// 开发模式：权限拒绝记录告警但放行；启用热重载。
    pub dev_mode: bool,
    /// 打包单元扫描目录。
    pub ling_home: Option<PathBuf>,
    /// 额外的未打包单元根目录（开发）。
    pub ling_roots: Vec<PathBuf>,
    /// 共享合约层的来源归档（文件、目录或通配模式）。
    pub preload_api_jars: Vec<String>,
    /// 启动时自动扫描。
    pub auto_scan: bool,
    pub host_governance: HostGovernanceOptions,
    pub runtime: RuntimeOptions,
    /// 全局线程预算 G。
    pub global_max_ling_threads: usize,
    /// 单元可分配线程上限。
    pub max_threads_per_ling: usize,
    /// 单元缺省申请线程数。
    pub default_threads_per_ling: usize,
}

impl Default for LingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dev_mode: false,
            ling_home: None,
            ling_roots: Vec::new(),
            preload_api_jars: Vec::new(),
            auto_scan: true,
            host_governance: HostGovernanceOptions::default(),
            runtime: RuntimeOptions::default(),
            global_max_ling_threads: 64,
            max_threads_per_ling: 8,
            default_threads_per_ling: 4,
        }
    }
}

impl LingConfig {
    /// 解析 YAML 文本形式的配置段。
    pub fn from_yaml_str(raw: &str) -> Result<Self, LingError> {
        serde_yml::from_str(raw)
            .map_err(|err| LingError::invalid_argument(format!("config parse error: {err}")))
    }
}
