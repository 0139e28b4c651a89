use super::count::LvloCount;
use super::entries::{extract_entries, summarize, EntryKey, LeveledEntry, VersionEntry};
use crate::datatypes::TypeCode;
use crate::formid::{CanonicalFormId, FormIdResolver};
use crate::load_order::RecordVersion;
use crate::sink::{Warning, WarningKind, WarningSink};
use std::collections::HashMap;

/// 合并后的单个条目（计数已限制在 u16 范围内）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedEntry {
    pub entry: LeveledEntry,
    pub count: u16,
}

/// 一个等级列表的合并结果
#[derive(Debug, Clone)]
pub struct MergedLeveledList {
    pub form_id: CanonicalFormId,
    pub record_type: TypeCode,
    pub editor_id: Option<String>,
    /// 提供非条目字段的版本（最后一个有效覆盖）
    pub winner: RecordVersion,
    /// 按首次出现顺序排列的存活条目
    pub entries: Vec<MergedEntry>,
    /// 参与合并的插件（加载顺序索引）
    pub contributors: Vec<usize>,
    /// 合并结果是否不同于最终覆盖版本
    pub changed: bool,
}

/// 等级列表合并器
///
/// 只依赖 FormID 解析服务与警告接收者，可以在多个线程中共享。
pub struct LeveledListMerger<'a> {
    resolver: &'a dyn FormIdResolver,
    sink: &'a dyn WarningSink,
    max_entries: usize,
}

/// 合并过程中的计数器集合，保持条目首次出现顺序
#[derive(Default)]
struct Counters {
    counters: Vec<LvloCount>,
    positions: HashMap<EntryKey, usize>,
}

impl Counters {
    fn get_mut(&mut self, key: &EntryKey) -> Option<&mut LvloCount> {
        let index = *self.positions.get(key)?;
        self.counters.get_mut(index)
    }

    /// 新断言：没有计数器时创建，否则计数加一
    fn assert_entry(&mut self, entry: &LeveledEntry) -> &mut LvloCount {
        let index = match self.positions.get(&entry.key) {
            Some(&index) => {
                self.counters[index].add();
                index
            }
            None => {
                self.positions.insert(entry.key, self.counters.len());
                self.counters.push(LvloCount::new(entry.clone()));
                self.counters.len() - 1
            }
        };
        &mut self.counters[index]
    }

    /// 无法归类的变化：条目视为存在，已有计数保持不变，没有计数时按该版本的数量创建
    fn keep_present(&mut self, version_entry: &VersionEntry) {
        if self.positions.contains_key(&version_entry.entry.key) {
            return;
        }
        let counter = self.assert_entry(&version_entry.entry);
        if version_entry.quantity > 1 {
            counter.modify(version_entry.quantity as i64 - 1);
        }
    }
}

impl<'a> LeveledListMerger<'a> {
    pub fn new(resolver: &'a dyn FormIdResolver, sink: &'a dyn WarningSink, max_entries: usize) -> Self {
        LeveledListMerger {
            resolver,
            sink,
            max_entries,
        }
    }

    fn describe(&self, id: &CanonicalFormId) -> String {
        format!("{}:{:06X}", self.resolver.plugin_name(id.plugin), id.object)
    }

    fn warn(&self, kind: WarningKind, id: &CanonicalFormId, plugin: Option<usize>, message: String) {
        let mut warning = Warning::new(kind, message).with_record(self.describe(id));
        if let Some(plugin) = plugin {
            warning = warning.with_plugin(self.resolver.plugin_name(plugin));
        }
        self.sink.report(&warning);
    }

    /// 合并同一规范化 FormID 的所有版本（按加载顺序）
    ///
    /// 每个版本与其传递主文件中最近的一个版本比较：
    /// 新出现的键计数加一，消失的键按原数量逐个移除，数量变化按差值调整。
    /// 所有版本都被删除时返回 `None`。
    pub fn merge_record(&self, id: CanonicalFormId, versions: &[RecordVersion]) -> Option<MergedLeveledList> {
        let winner = versions.iter().rev().find(|v| !v.record.is_deleted())?.clone();
        let record_type = winner.record.get_type();

        let mut counters = Counters::default();
        let mut processed: Vec<(usize, Vec<VersionEntry>)> = Vec::new();
        let mut contributors = Vec::new();

        for version in versions {
            if version.record.is_deleted() {
                self.warn(
                    WarningKind::ConflictAmbiguous,
                    &id,
                    Some(version.plugin),
                    "record is marked deleted, its entries are left unchanged".to_string(),
                );
                continue;
            }
            if version.record.get_type() != record_type {
                self.warn(
                    WarningKind::ConflictAmbiguous,
                    &id,
                    Some(version.plugin),
                    format!("record type {} differs from {}, version ignored", version.record.get_type(), record_type),
                );
                continue;
            }

            let current = summarize(extract_entries(&version.record, version.plugin, self.resolver));
            let baseline: &[VersionEntry] = processed
                .iter()
                .rev()
                .find(|(plugin, _)| self.resolver.is_master_of(version.plugin, *plugin))
                .map(|(_, summary)| summary.as_slice())
                .unwrap_or(&[]);

            self.apply_version(&id, version.plugin, baseline, &current, &mut counters);

            contributors.push(version.plugin);
            processed.push((version.plugin, current));
        }

        let mut entries: Vec<MergedEntry> = counters
            .counters
            .into_iter()
            .filter(|counter| counter.is_active())
            .map(|counter| {
                let count = if counter.count() > u16::MAX as u32 {
                    self.warn(
                        WarningKind::CountOverflow,
                        &id,
                        None,
                        format!("count {} of {} clamped to {}", counter.count(), counter.entry().key.item, u16::MAX),
                    );
                    u16::MAX
                } else {
                    counter.count() as u16
                };
                MergedEntry {
                    entry: counter.entry().clone(),
                    count,
                }
            })
            .collect();

        if entries.len() > self.max_entries {
            self.warn(
                WarningKind::EntryLimit,
                &id,
                None,
                format!("{} entries truncated to {}", entries.len(), self.max_entries),
            );
            entries.truncate(self.max_entries);
        }

        // 与最终覆盖版本逐项比较（键与数量）
        let winner_summary = processed
            .iter()
            .rev()
            .find(|(plugin, _)| *plugin == winner.plugin)
            .map(|(_, summary)| summary.as_slice())
            .unwrap_or(&[]);
        let changed = entries.len() != winner_summary.len()
            || entries
                .iter()
                .zip(winner_summary)
                .any(|(merged, original)| merged.entry.key != original.entry.key || merged.count as u32 != original.quantity);

        tracing::debug!(
            record = %self.describe(&id),
            contributors = contributors.len(),
            entries = entries.len(),
            changed,
            "合并等级列表"
        );

        Some(MergedLeveledList {
            form_id: id,
            record_type,
            editor_id: winner.record.get_editor_id(),
            winner,
            entries,
            contributors,
            changed,
        })
    }

    /// 把一个版本相对基线的变化应用到计数器
    fn apply_version(
        &self,
        id: &CanonicalFormId,
        plugin: usize,
        baseline: &[VersionEntry],
        current: &[VersionEntry],
        counters: &mut Counters,
    ) {
        let base_quantities: HashMap<EntryKey, u32> =
            baseline.iter().map(|e| (e.entry.key, e.quantity)).collect();
        let current_quantities: HashMap<EntryKey, u32> =
            current.iter().map(|e| (e.entry.key, e.quantity)).collect();

        for version_entry in current {
            let key = version_entry.entry.key;
            let quantity = version_entry.quantity;
            if quantity == 0 {
                self.warn(
                    WarningKind::ConflictAmbiguous,
                    id,
                    Some(plugin),
                    format!("entry {} at level {} has count 0", key.item, key.level),
                );
                continue;
            }

            match base_quantities.get(&key) {
                None => {
                    let counter = counters.assert_entry(&version_entry.entry);
                    if quantity > 1 {
                        counter.modify(quantity as i64 - 1);
                    }
                }
                Some(&0) => {
                    self.warn(
                        WarningKind::ConflictAmbiguous,
                        id,
                        Some(plugin),
                        format!("entry {} at level {} had count 0 in its master", key.item, key.level),
                    );
                    counters.keep_present(version_entry);
                }
                Some(&base) => match counters.get_mut(&key) {
                    Some(counter) => {
                        if base != quantity {
                            counter.modify(quantity as i64 - base as i64);
                        }
                    }
                    None => {
                        self.warn(
                            WarningKind::ConflictAmbiguous,
                            id,
                            Some(plugin),
                            format!("entry {} at level {} has no running count", key.item, key.level),
                        );
                        counters.keep_present(version_entry);
                    }
                },
            }
        }

        for base_entry in baseline {
            let key = base_entry.entry.key;
            if current_quantities.contains_key(&key) {
                continue;
            }
            if let Some(counter) = counters.get_mut(&key) {
                for _ in 0..base_entry.quantity {
                    counter.remove();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::RecordFlags;
    use crate::record::Record;
    use crate::sink::CollectingSink;
    use crate::subrecord::{LeveledObject, Subrecord, SubrecordValue};
    use std::sync::Arc;

    /// 链式依赖：插件 i 的主文件是 0..i
    struct ChainResolver {
        names: Vec<&'static str>,
        /// (plugin, master) 对；为空表示链式依赖
        masters: Vec<(usize, usize)>,
    }

    impl ChainResolver {
        fn chain(names: Vec<&'static str>) -> Self {
            ChainResolver { names, masters: Vec::new() }
        }
    }

    impl FormIdResolver for ChainResolver {
        fn resolve(&self, _plugin: usize, raw: u32) -> CanonicalFormId {
            CanonicalFormId::new(0, raw)
        }
        fn is_master_of(&self, plugin: usize, candidate: usize) -> bool {
            if self.masters.is_empty() {
                candidate < plugin
            } else {
                self.masters.contains(&(plugin, candidate))
            }
        }
        fn plugin_name(&self, plugin: usize) -> &str {
            self.names[plugin]
        }
    }

    const SWORD: u32 = 0x12EB7;
    const SHIELD: u32 = 0x12EB6;
    const BOW: u32 = 0x12EB5;

    fn version(plugin: usize, objects: &[(u16, u32, u16)]) -> RecordVersion {
        let mut record = Record::new(TypeCode::new(b"LVLI"), 0x800);
        record.add_subrecord(Subrecord::new(TypeCode::new(b"EDID"), SubrecordValue::zstring("LItemWeapons")));
        record.add_subrecord(Subrecord::new(TypeCode::new(b"LLCT"), SubrecordValue::U8(objects.len() as u8)));
        for &(level, reference, count) in objects {
            record.add_subrecord(Subrecord::new(
                TypeCode::new(b"LVLO"),
                SubrecordValue::LeveledObjects(vec![LeveledObject::new(level, reference, count)]),
            ));
        }
        RecordVersion {
            plugin,
            record: Arc::new(record),
        }
    }

    fn items(list: &MergedLeveledList) -> Vec<(u32, u16)> {
        list.entries.iter().map(|e| (e.entry.key.item.object, e.count)).collect()
    }

    fn merge(resolver: &ChainResolver, versions: &[RecordVersion]) -> (MergedLeveledList, Vec<Warning>) {
        let sink = CollectingSink::new();
        let merger = LeveledListMerger::new(resolver, &sink, 255);
        let merged = merger.merge_record(CanonicalFormId::new(0, 0x800), versions).unwrap();
        (merged, sink.take())
    }

    #[test]
    fn test_additions_from_siblings_are_kept() {
        let resolver = ChainResolver {
            names: vec!["Base.esm", "ModA.esp", "ModB.esp"],
            masters: vec![(1, 0), (2, 0)],
        };
        let versions = [
            version(0, &[(1, SWORD, 1)]),
            version(1, &[(1, SWORD, 1), (1, SHIELD, 1)]),
            version(2, &[(1, SWORD, 1), (1, BOW, 1)]),
        ];

        let (merged, warnings) = merge(&resolver, &versions);
        assert!(warnings.is_empty());
        assert_eq!(items(&merged), vec![(SWORD, 1), (SHIELD, 1), (BOW, 1)]);
        assert!(merged.changed);
        assert_eq!(merged.contributors, vec![0, 1, 2]);
        assert_eq!(merged.winner.plugin, 2);
    }

    #[test]
    fn test_removal_only_cancels_master_assertion() {
        let resolver = ChainResolver {
            names: vec!["Base.esm", "ModA.esp", "ModB.esp"],
            masters: vec![(1, 0), (2, 0)],
        };
        let versions = [
            version(0, &[(1, SWORD, 1)]),
            version(1, &[(1, SWORD, 1), (1, SHIELD, 1)]),
            version(2, &[]),
        ];

        let (merged, _) = merge(&resolver, &versions);
        assert_eq!(items(&merged), vec![(SHIELD, 1)]);
    }

    #[test]
    fn test_dependent_addition_keeps_master_entries() {
        let resolver = ChainResolver::chain(vec!["ModA.esp", "ModB.esp"]);
        let versions = [version(0, &[(1, SWORD, 1)]), version(1, &[(1, SWORD, 1), (1, SHIELD, 1)])];

        let (merged, _) = merge(&resolver, &versions);
        assert_eq!(items(&merged), vec![(SWORD, 1), (SHIELD, 1)]);
    }

    #[test]
    fn test_dependent_removal_drops_entry() {
        let resolver = ChainResolver::chain(vec!["ModA.esp", "ModB.esp"]);
        let versions = [version(0, &[(1, SWORD, 1), (1, SHIELD, 1)]), version(1, &[(1, SHIELD, 1)])];

        let (merged, _) = merge(&resolver, &versions);
        assert_eq!(items(&merged), vec![(SHIELD, 1)], "计数为 0 的条目不输出");
    }

    #[test]
    fn test_removed_entry_can_return() {
        let resolver = ChainResolver::chain(vec!["Base.esm", "ModA.esp", "ModB.esp"]);
        let versions = [
            version(0, &[(1, SWORD, 1), (1, BOW, 1)]),
            version(1, &[(1, BOW, 1)]),
            version(2, &[(1, SWORD, 1), (1, BOW, 1)]),
        ];

        let (merged, _) = merge(&resolver, &versions);
        // 重新出现的条目保持首次出现的位置
        assert_eq!(items(&merged), vec![(SWORD, 1), (BOW, 1)]);
    }

    #[test]
    fn test_explicit_count_change() {
        let resolver = ChainResolver::chain(vec!["Base.esm", "ModA.esp"]);
        let versions = [version(0, &[(1, SWORD, 1)]), version(1, &[(1, SWORD, 3)])];

        let (merged, _) = merge(&resolver, &versions);
        assert_eq!(items(&merged), vec![(SWORD, 3)]);
        assert!(!merged.changed, "与最终覆盖版本一致");
    }

    #[test]
    fn test_same_level_is_one_key_different_level_is_not() {
        let resolver = ChainResolver::chain(vec!["Base.esm"]);
        let versions = [version(0, &[(1, SWORD, 1), (1, SWORD, 1), (5, SWORD, 1)])];

        let (merged, _) = merge(&resolver, &versions);
        assert_eq!(items(&merged), vec![(SWORD, 2), (SWORD, 1)]);
        assert_eq!(merged.entries[1].entry.key.level, 5);
    }

    #[test]
    fn test_zero_count_is_ambiguous() {
        let resolver = ChainResolver::chain(vec!["Base.esm", "ModA.esp"]);
        let versions = [version(0, &[(1, SWORD, 1)]), version(1, &[(1, SWORD, 1), (1, SHIELD, 0)])];

        let (merged, warnings) = merge(&resolver, &versions);
        assert_eq!(items(&merged), vec![(SWORD, 1)]);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, WarningKind::ConflictAmbiguous);
        assert_eq!(warnings[0].plugin.as_deref(), Some("ModA.esp"));
    }

    #[test]
    fn test_zero_count_master_entry_stays_present() {
        let resolver = ChainResolver::chain(vec!["Base.esm", "ModA.esp"]);
        let versions = [
            version(0, &[(1, SWORD, 1), (1, SHIELD, 0)]),
            version(1, &[(1, SWORD, 1), (1, SHIELD, 1)]),
        ];

        let (merged, warnings) = merge(&resolver, &versions);
        assert_eq!(items(&merged), vec![(SWORD, 1), (SHIELD, 1)], "无法归类的条目按存在处理");
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().all(|w| w.kind == WarningKind::ConflictAmbiguous));
        assert!(!merged.changed);
    }

    #[test]
    fn test_missing_count_for_changed_entry_stays_present() {
        let resolver = ChainResolver::chain(vec!["Base.esm", "ModA.esp"]);
        let sink = CollectingSink::new();
        let merger = LeveledListMerger::new(&resolver, &sink, 255);
        let id = CanonicalFormId::new(0, 0x800);

        let base = version(0, &[(1, SWORD, 2)]);
        let current = version(1, &[(1, SWORD, 3), (1, BOW, 1)]);
        let baseline = summarize(extract_entries(&base.record, 0, &resolver));
        let current = summarize(extract_entries(&current.record, 1, &resolver));

        // 基线中有该条目，但计数器中没有
        let mut counters = Counters::default();
        merger.apply_version(&id, 1, &baseline, &current, &mut counters);

        let counts: Vec<(u32, u32)> = counters
            .counters
            .iter()
            .map(|c| (c.entry().key.item.object, c.count()))
            .collect();
        assert_eq!(counts, vec![(SWORD, 3), (BOW, 1)]);

        let warnings = sink.take();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, WarningKind::ConflictAmbiguous);
        assert_eq!(warnings[0].plugin.as_deref(), Some("ModA.esp"));
    }

    #[test]
    fn test_deleted_version_is_ambiguous_and_ignored() {
        let resolver = ChainResolver::chain(vec!["Base.esm", "ModA.esp", "ModB.esp"]);
        let mut deleted = version(2, &[]);
        Arc::make_mut(&mut deleted.record).flags = RecordFlags::DELETED.bits();
        let versions = [version(0, &[(1, SWORD, 1)]), version(1, &[(1, SWORD, 1), (1, BOW, 1)]), deleted];

        let (merged, warnings) = merge(&resolver, &versions);
        assert_eq!(items(&merged), vec![(SWORD, 1), (BOW, 1)]);
        assert_eq!(merged.winner.plugin, 1, "已删除的版本不能作为最终覆盖");
        assert!(warnings.iter().any(|w| w.kind == WarningKind::ConflictAmbiguous));
    }

    #[test]
    fn test_all_deleted_yields_nothing() {
        let resolver = ChainResolver::chain(vec!["Base.esm"]);
        let mut deleted = version(0, &[(1, SWORD, 1)]);
        Arc::make_mut(&mut deleted.record).flags = RecordFlags::DELETED.bits();

        let sink = CollectingSink::new();
        let merger = LeveledListMerger::new(&resolver, &sink, 255);
        assert!(merger.merge_record(CanonicalFormId::new(0, 0x800), &[deleted]).is_none());
    }

    #[test]
    fn test_count_overflow_is_clamped() {
        let resolver = ChainResolver::chain(vec!["Base.esm", "ModA.esp"]);
        let versions = [
            version(0, &[(1, SWORD, u16::MAX)]),
            // 独立插件再次断言同一键，计数超出 u16
            version(1, &[(1, SWORD, u16::MAX), (1, SWORD, 10)]),
        ];

        let (merged, warnings) = merge(&resolver, &versions);
        assert_eq!(items(&merged), vec![(SWORD, u16::MAX)]);
        assert!(warnings.iter().any(|w| w.kind == WarningKind::CountOverflow));
    }

    #[test]
    fn test_entry_limit_truncates() {
        let resolver = ChainResolver::chain(vec!["Base.esm"]);
        let objects: Vec<(u16, u32, u16)> = (0..10).map(|i| (1, 0x900 + i, 1)).collect();
        let versions = [version(0, &objects)];

        let sink = CollectingSink::new();
        let merger = LeveledListMerger::new(&resolver, &sink, 4);
        let merged = merger.merge_record(CanonicalFormId::new(0, 0x800), &versions).unwrap();

        assert_eq!(merged.entries.len(), 4);
        assert_eq!(merged.entries[3].entry.key.item.object, 0x903, "保留首次出现的条目");
        assert_eq!(sink.take()[0].kind, WarningKind::EntryLimit);
    }
}
