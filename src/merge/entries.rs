use crate::formid::{CanonicalFormId, FormIdResolver};
use crate::record::Record;
use crate::subrecord::{LeveledObject, OwnerData, SubrecordValue};
use std::collections::HashMap;

/// 条目键：物品引用 + 等级（计数不属于键）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryKey {
    pub item: CanonicalFormId,
    pub level: u16,
}

/// 等级列表条目
///
/// `template` 与 `owner` 中的原始 FormID 相对于 `source_plugin`，
/// 输出时由补丁组装器重新编码。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeveledEntry {
    pub key: EntryKey,
    pub source_plugin: usize,
    pub template: LeveledObject,
    pub owner: Option<OwnerData>,
}

/// 一个版本中同一键的汇总
#[derive(Debug, Clone)]
pub(crate) struct VersionEntry {
    /// 首次出现的条目
    pub entry: LeveledEntry,
    /// 所有出现位置的计数字段之和
    pub quantity: u32,
}

/// 从记录中按出现顺序提取条目
///
/// 紧跟在 LVLO 之后的 COED 属于该 LVLO 的最后一个条目。
pub fn extract_entries(record: &Record, plugin: usize, resolver: &dyn FormIdResolver) -> Vec<LeveledEntry> {
    let mut entries: Vec<LeveledEntry> = Vec::new();
    let mut after_lvlo = false;

    for subrecord in record.subrecords() {
        match subrecord.value() {
            SubrecordValue::LeveledObjects(objects) if subrecord.type_code() == "LVLO" => {
                entries.extend(objects.iter().map(|object| LeveledEntry {
                    key: EntryKey {
                        item: resolve_reference(resolver, plugin, object.reference),
                        level: object.level,
                    },
                    source_plugin: plugin,
                    template: *object,
                    owner: None,
                }));
                after_lvlo = !objects.is_empty();
            }
            SubrecordValue::Owner(owner) if after_lvlo => {
                if let Some(last) = entries.last_mut() {
                    last.owner = Some(*owner);
                }
                after_lvlo = false;
            }
            _ => after_lvlo = false,
        }
    }

    entries
}

/// 空引用不经过主文件解析
fn resolve_reference(resolver: &dyn FormIdResolver, plugin: usize, raw: u32) -> CanonicalFormId {
    if raw == 0 {
        CanonicalFormId::NULL
    } else {
        resolver.resolve(plugin, raw)
    }
}

/// 按键汇总，保持首次出现顺序
pub(crate) fn summarize(entries: Vec<LeveledEntry>) -> Vec<VersionEntry> {
    let mut summary: Vec<VersionEntry> = Vec::new();
    let mut positions: HashMap<EntryKey, usize> = HashMap::new();

    for entry in entries {
        let quantity = entry.template.count as u32;
        match positions.get(&entry.key) {
            Some(&index) => summary[index].quantity += quantity,
            None => {
                positions.insert(entry.key, summary.len());
                summary.push(VersionEntry { entry, quantity });
            }
        }
    }

    summary
}
