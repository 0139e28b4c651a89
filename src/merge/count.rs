use super::entries::LeveledEntry;

/// 单个等级列表条目的聚合状态
///
/// 计数在合并过程中可以降为 0（条目被取消），但永远不会为负。
#[derive(Debug, Clone)]
pub struct LvloCount {
    entry: LeveledEntry,
    count: u32,
}

impl LvloCount {
    /// 首次断言某条目时创建，计数为 1
    pub fn new(entry: LeveledEntry) -> Self {
        LvloCount { entry, count: 1 }
    }

    /// 又一个插件断言了该条目
    pub fn add(&mut self) {
        self.count = self.count.saturating_add(1);
    }

    /// 某插件删除了其主文件断言的一个实例（下限为 0）
    pub fn remove(&mut self) {
        self.count = self.count.saturating_sub(1);
    }

    /// 显式计数调整，结果限制在 0 以上
    pub fn modify(&mut self, delta: i64) {
        let next = (self.count as i64).saturating_add(delta);
        self.count = next.clamp(0, u32::MAX as i64) as u32;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn entry(&self) -> &LeveledEntry {
        &self.entry
    }

    pub fn is_active(&self) -> bool {
        self.count > 0
    }
}
