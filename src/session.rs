//! 一次完整的合并流程：加载 → 合并 → 组装补丁 → 生成报告

use crate::config::MergeConfig;
use crate::io::EspReader;
use crate::load_order::{LoadOrder, LoadOrderResolver};
use crate::merge::{merge_leveled_lists, MergedLeveledList};
use crate::patch::PatchAssembler;
use crate::plugin::{Plugin, PluginStats};
use crate::sink::{CollectingSink, Warning, WarningSink};
use crate::utils::EspError;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// 合并报告中的单个列表摘要
#[derive(Debug, Clone, Serialize)]
pub struct ListSummary {
    pub form_id: String,
    pub record_type: String,
    pub editor_id: Option<String>,
    /// 提供非条目字段的插件
    pub winner: String,
    pub contributors: Vec<String>,
    pub entries: usize,
}

/// 合并报告（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub generated_at: String,
    pub patch_name: String,
    pub plugins: Vec<String>,
    pub masters: Vec<String>,
    /// 被多个插件覆盖的等级列表数量
    pub considered: usize,
    /// 与最终覆盖相同而省略的数量
    pub unchanged: usize,
    pub lists: Vec<ListSummary>,
    pub warnings: Vec<Warning>,
}

impl MergeReport {
    /// 写入 JSON 文件（自动创建父目录）
    pub fn write_json(&self, path: &Path) -> Result<(), EspError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// 合并结果
#[derive(Debug)]
pub struct MergeOutcome {
    pub patch: Plugin,
    pub report: MergeReport,
    /// 各输入插件的统计信息（加载顺序）
    pub stats: Vec<PluginStats>,
}

/// 把警告同时转发给调用方并留存到报告
struct ReportingSink<'a> {
    inner: &'a dyn WarningSink,
    collected: CollectingSink,
}

impl WarningSink for ReportingSink<'_> {
    fn report(&self, warning: &Warning) {
        self.inner.report(warning);
        self.collected.report(warning);
    }
}

/// 合并会话
pub struct MergeSession<'a> {
    config: &'a MergeConfig,
    reader: &'a dyn EspReader,
    sink: &'a dyn WarningSink,
}

impl<'a> MergeSession<'a> {
    pub fn new(config: &'a MergeConfig, reader: &'a dyn EspReader, sink: &'a dyn WarningSink) -> Self {
        MergeSession { config, reader, sink }
    }

    /// 按给定加载顺序执行合并
    ///
    /// 与补丁同名的输入会被忽略，避免把上一次生成的补丁当作来源。
    pub fn run(&self, paths: &[PathBuf]) -> Result<MergeOutcome, EspError> {
        self.config.validate()?;

        let inputs: Vec<PathBuf> = paths
            .iter()
            .filter(|path| {
                let is_patch = path
                    .file_name()
                    .map(|name| name.to_string_lossy().eq_ignore_ascii_case(&self.config.patch_name))
                    .unwrap_or(false);
                if is_patch {
                    tracing::warn!("忽略与补丁同名的输入: {}", path.display());
                }
                !is_patch
            })
            .cloned()
            .collect();

        let load_order = LoadOrderResolver::new(self.config, self.reader).load_plugins(&inputs)?;
        self.merge_load_order(&load_order)
    }

    /// 对已构建的加载顺序执行合并
    pub fn merge_load_order(&self, load_order: &LoadOrder) -> Result<MergeOutcome, EspError> {
        let sink = ReportingSink {
            inner: self.sink,
            collected: CollectingSink::new(),
        };
        for warning in load_order.warnings() {
            sink.report(warning);
        }

        let result = merge_leveled_lists(load_order, self.config, &sink)?;
        let patch = PatchAssembler::new(load_order, self.config).assemble(&result.lists)?;

        // 不同列表的警告按线程完成顺序到达，按记录与插件排序（同一记录内保持原顺序）
        let mut warnings = sink.collected.take();
        warnings.sort_by(|a, b| (&a.record, &a.plugin).cmp(&(&b.record, &b.plugin)));

        let report = MergeReport {
            generated_at: chrono::Local::now().to_rfc3339(),
            patch_name: self.config.patch_name.clone(),
            plugins: load_order.plugins().iter().map(|p| p.name().to_string()).collect(),
            masters: patch.masters.clone(),
            considered: result.considered,
            unchanged: result.unchanged,
            lists: result.lists.iter().map(|list| summarize(load_order, list)).collect(),
            warnings,
        };

        let stats = load_order.plugins().iter().map(|p| p.plugin.get_stats()).collect();
        Ok(MergeOutcome { patch, report, stats })
    }
}

fn summarize(load_order: &LoadOrder, list: &MergedLeveledList) -> ListSummary {
    let name = |plugin: usize| load_order.plugin(plugin).name().to_string();
    ListSummary {
        form_id: load_order.describe(&list.form_id),
        record_type: list.record_type.to_string(),
        editor_id: list.editor_id.clone(),
        winner: name(list.winner.plugin),
        contributors: list.contributors.iter().map(|&p| name(p)).collect(),
        entries: list.entries.len(),
    }
}
