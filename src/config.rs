use crate::datatypes::TypeCode;
use crate::utils::EspError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 默认参与合并的等级列表记录类型
pub const DEFAULT_LEVELED_TYPES: &[&str] = &["LVLI", "LVLN", "LVSP"];

/// LLCT 为 u8，单个等级列表最多 255 个条目
pub const MAX_LEVELED_ENTRIES: usize = 255;

/// 合并配置
///
/// 显式传入加载器、合并引擎与补丁组装器，不存在全局状态。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// 输出补丁文件名
    pub patch_name: String,
    /// 补丁作者（CNAM）
    pub author: String,
    /// 补丁描述（SNAM）
    pub description: Option<String>,
    /// HEDR 版本号
    pub header_version: f32,
    /// 参与合并的记录类型
    pub leveled_record_types: Vec<String>,
    /// 合并结果与最终覆盖版本相同时是否仍然输出
    pub include_unchanged: bool,
    /// 单个列表的条目上限
    pub max_entries: usize,
    /// 是否并行加载与合并
    pub parallel: bool,
    /// 工作线程数（None 表示 rayon 默认值）
    pub threads: Option<usize>,
    /// 宿主程序内部文件目录（合并报告默认写入此处）
    pub internal_dir: Option<PathBuf>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig {
            patch_name: "Leveled Lists.esp".to_string(),
            author: "esp_merger".to_string(),
            description: None,
            header_version: 1.71,
            leveled_record_types: DEFAULT_LEVELED_TYPES.iter().map(|t| t.to_string()).collect(),
            include_unchanged: false,
            max_entries: MAX_LEVELED_ENTRIES,
            parallel: true,
            threads: None,
            internal_dir: None,
        }
    }
}

impl MergeConfig {
    /// 从 JSON 文件加载配置（缺省字段使用默认值）
    pub fn from_json_file(path: &Path) -> Result<Self, EspError> {
        let content = std::fs::read_to_string(path)?;
        let config: MergeConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), EspError> {
        if self.patch_name.trim().is_empty() {
            return Err(EspError::ConfigError("patch_name must not be empty".into()));
        }
        if self.leveled_record_types.is_empty() {
            return Err(EspError::ConfigError("leveled_record_types must not be empty".into()));
        }
        for code in &self.leveled_record_types {
            if TypeCode::parse(code).is_none() {
                return Err(EspError::ConfigError(format!("invalid record type code: {:?}", code)));
            }
        }
        if self.max_entries == 0 || self.max_entries > MAX_LEVELED_ENTRIES {
            return Err(EspError::ConfigError(format!(
                "max_entries must be between 1 and {}",
                MAX_LEVELED_ENTRIES
            )));
        }
        if self.threads == Some(0) {
            return Err(EspError::ConfigError("threads must be at least 1".into()));
        }
        Ok(())
    }

    /// 参与合并的记录类型（已校验的类型代码，保持配置顺序）
    pub fn leveled_types(&self) -> Vec<TypeCode> {
        self.leveled_record_types
            .iter()
            .filter_map(|code| TypeCode::parse(code))
            .collect()
    }

    /// 构建工作线程池
    pub fn build_thread_pool(&self) -> Result<rayon::ThreadPool, EspError> {
        let threads = if self.parallel { self.threads.unwrap_or(0) } else { 1 };
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| EspError::ConfigError(e.to_string()))
    }

    /// 合并报告的默认路径
    pub fn default_report_path(&self) -> Option<PathBuf> {
        self.internal_dir.as_ref().map(|dir| dir.join("last_merge.json"))
    }
}
