//! 配置管理
//!
//! 配置加载顺序：
//! 1. 结构体默认值
//! 2. TOML 配置文件
//! 3. 环境变量覆盖（前缀 `SCHEDULER_`，层级分隔符 `__`）
//!
//! 例如 `SCHEDULER_OPTIMIZER__COST_WEIGHT=0.6` 覆盖 `[optimizer] cost_weight`。

pub mod models;

pub use models::*;
