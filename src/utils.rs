use thiserror::Error;
use std::path::Path;

/// 自定义错误类型
#[derive(Error, Debug)]
pub enum EspError {
    #[error("Invalid file format")]
    InvalidFormat,

    #[error("Malformed subrecord {code} in {record_type}: {reason}")]
    MalformedSubrecord {
        record_type: String,
        code: String,
        reason: String,
    },

    #[error("Truncated data: {0}")]
    Truncated(String),

    #[error("Compression error: {0}")]
    CompressionError(String),

    #[error("Plugin {plugin} requires master {master}, which is not in the load order")]
    UnresolvedMaster { plugin: String, master: String },

    #[error("Plugin {plugin} loads before its master {master}")]
    MasterOrderViolation { plugin: String, master: String },

    #[error("Plugin {0} appears more than once in the load order")]
    DuplicatePlugin(String),

    #[error("Failed to load plugin {plugin}: {reason}")]
    LoadError { plugin: String, reason: String },

    #[error("Patch would need {0} masters (at most 255 are allowed)")]
    TooManyMasters(usize),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl EspError {
    /// 构造子记录格式错误
    pub fn malformed(record_type: impl ToString, code: impl ToString, reason: impl Into<String>) -> Self {
        EspError::MalformedSubrecord {
            record_type: record_type.to_string(),
            code: code.to_string(),
            reason: reason.into(),
        }
    }

    /// 构造插件加载错误
    pub fn load(plugin: impl Into<String>, reason: impl ToString) -> Self {
        EspError::LoadError {
            plugin: plugin.into(),
            reason: reason.to_string(),
        }
    }

    /// 是否只影响单条记录（可跳过并记录警告）
    pub fn is_record_local(&self) -> bool {
        matches!(self, EspError::MalformedSubrecord { .. } | EspError::CompressionError(_))
    }
}

/// 创建文件备份
pub fn create_backup(file_path: &Path) -> Result<std::path::PathBuf, EspError> {
    if !file_path.exists() {
        return Err(EspError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "原文件不存在"
        )));
    }

    let timestamp = chrono::Local::now().format("%Y-%m-%d-%H-%M-%S");
    let backup_path = file_path.with_extension(format!("{}.bak", timestamp));

    std::fs::copy(file_path, &backup_path)
        .map_err(EspError::IoError)?;

    Ok(backup_path)
}
