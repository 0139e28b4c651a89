//! 警告输出接口
//!
//! 合并引擎与加载器不直接打印日志，而是把可恢复的问题交给注入的 [`WarningSink`]。

use serde::Serialize;
use std::fmt;
use std::sync::Mutex;

/// 严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Info,
    Warning,
}

/// 警告种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WarningKind {
    /// 条目变化无法归类为新增、删除或显式增量
    ConflictAmbiguous,
    /// 记录因子记录格式错误被跳过
    MalformedSubrecord,
    /// 计数超出 LVLO 计数字段范围
    CountOverflow,
    /// 条目数超出上限被截断
    EntryLimit,
}

/// 单条警告
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub severity: Severity,
    pub kind: WarningKind,
    /// 相关插件
    pub plugin: Option<String>,
    /// 相关记录（规范化 FormID 或描述）
    pub record: Option<String>,
    pub message: String,
}

impl Warning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        let severity = match kind {
            WarningKind::CountOverflow => Severity::Info,
            _ => Severity::Warning,
        };
        Warning {
            severity,
            kind,
            plugin: None,
            record: None,
            message: message.into(),
        }
    }

    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }

    pub fn with_record(mut self, record: impl Into<String>) -> Self {
        self.record = Some(record.into());
        self
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(plugin) = &self.plugin {
            write!(f, " [{}]", plugin)?;
        }
        if let Some(record) = &self.record {
            write!(f, " {}", record)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// 警告接收者
pub trait WarningSink: Send + Sync {
    fn report(&self, warning: &Warning);
}

/// 通过 tracing 输出警告
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl WarningSink for TracingSink {
    fn report(&self, warning: &Warning) {
        match warning.severity {
            Severity::Info => tracing::info!(kind = ?warning.kind, "{}", warning),
            Severity::Warning => tracing::warn!(kind = ?warning.kind, "{}", warning),
        }
    }
}

/// 收集所有警告（测试与报告使用）
#[derive(Debug, Default)]
pub struct CollectingSink {
    warnings: Mutex<Vec<Warning>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出已收集的警告
    pub fn take(&self) -> Vec<Warning> {
        match self.warnings.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl WarningSink for CollectingSink {
    fn report(&self, warning: &Warning) {
        match self.warnings.lock() {
            Ok(mut guard) => guard.push(warning.clone()),
            Err(poisoned) => poisoned.into_inner().push(warning.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingSink::new();
        sink.report(&Warning::new(WarningKind::ConflictAmbiguous, "count 0").with_plugin("ModA.esp"));
        sink.report(&Warning::new(WarningKind::CountOverflow, "clamped"));

        let warnings = sink.take();
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].severity, Severity::Warning);
        assert_eq!(warnings[1].severity, Severity::Info);
        assert!(sink.take().is_empty(), "take 之后应清空");
    }

    #[test]
    fn test_severity_by_kind() {
        let severity = |kind| Warning::new(kind, "").severity;
        assert_eq!(severity(WarningKind::ConflictAmbiguous), Severity::Warning);
        assert_eq!(severity(WarningKind::MalformedSubrecord), Severity::Warning);
        assert_eq!(severity(WarningKind::EntryLimit), Severity::Warning);
        assert_eq!(severity(WarningKind::CountOverflow), Severity::Info);
        assert!(Severity::Info < Severity::Warning);
    }

    #[test]
    fn test_warning_display() {
        let warning = Warning::new(WarningKind::EntryLimit, "truncated to 255")
            .with_plugin("ModB.esp")
            .with_record("[00]012E49");
        assert_eq!(warning.to_string(), "EntryLimit [ModB.esp] [00]012E49: truncated to 255");
    }
}
