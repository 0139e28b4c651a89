use super::Plugin;
use crate::config::DEFAULT_LEVELED_TYPES;

/// 插件统计信息
#[derive(Debug, Clone)]
pub struct PluginStats {
    pub name: String,
    pub plugin_type: String,
    pub is_master: bool,
    pub is_light: bool,
    pub master_count: usize,
    pub group_count: usize,
    pub record_count: usize,
    pub leveled_list_count: usize,
    pub skipped_count: usize,
}

impl std::fmt::Display for PluginStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== 插件统计信息 ===")?;
        writeln!(f, "名称: {}", self.name)?;
        writeln!(f, "类型: {}", self.plugin_type)?;
        writeln!(f, "主文件: {}", if self.is_master { "是" } else { "否" })?;
        writeln!(f, "轻量级: {}", if self.is_light { "是" } else { "否" })?;
        writeln!(f, "依赖主文件数: {}", self.master_count)?;
        writeln!(f, "组数量: {}", self.group_count)?;
        writeln!(f, "记录数量: {}", self.record_count)?;
        writeln!(f, "等级列表数: {}", self.leveled_list_count)?;
        writeln!(f, "跳过的记录数: {}", self.skipped_count)?;
        Ok(())
    }
}

impl Plugin {
    /// 获取统计信息
    pub fn get_stats(&self) -> PluginStats {
        let records = self.records();
        let leveled_list_count = records
            .iter()
            .filter(|record| DEFAULT_LEVELED_TYPES.iter().any(|t| record.get_type() == *t))
            .count();

        PluginStats {
            name: self.get_name().to_string(),
            plugin_type: self.get_type().to_string(),
            is_master: self.is_master(),
            is_light: self.is_light(),
            master_count: self.masters.len(),
            group_count: self.groups.len() + self.groups.iter().map(|g| g.count_subgroups()).sum::<usize>(),
            // 头部记录也计入
            record_count: 1 + records.len(),
            leveled_list_count,
            skipped_count: self.skipped.len(),
        }
    }
}
