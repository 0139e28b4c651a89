//! 补丁组装
//!
//! 把合并后的等级列表写成一个独立插件：主文件列表由所有输出 FormID
//! 引用到的插件组成，所有 FormID 重新编码到补丁自身的索引空间。

use crate::config::MergeConfig;
use crate::datatypes::{RecordFlags, TypeCode};
use crate::formid::{compose, CanonicalFormId, FormIdResolver};
use crate::group::Group;
use crate::load_order::LoadOrder;
use crate::merge::MergedLeveledList;
use crate::plugin::{Plugin, PluginHeader};
use crate::record::Record;
use crate::subrecord::{LeveledObject, Subrecord, SubrecordValue};
use crate::utils::EspError;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

/// 补丁中第一个可用的对象编号
const FIRST_OBJECT_ID: u32 = 0x800;

/// 补丁最多引用的主文件数量（FormID 高字节，0xFF 保留给补丁自身）
const MAX_PATCH_MASTERS: usize = 255;

/// 补丁组装器
pub struct PatchAssembler<'a> {
    load_order: &'a LoadOrder,
    config: &'a MergeConfig,
}

/// 补丁的本地 FormID 空间
struct LocalSpace {
    indices: HashMap<usize, u8>,
}

impl LocalSpace {
    fn encode(&self, id: CanonicalFormId) -> u32 {
        if id.is_null() {
            return 0;
        }
        match self.indices.get(&id.plugin) {
            Some(&index) => compose(index, id.object),
            None => compose(self.indices.len() as u8, id.object),
        }
    }
}

impl<'a> PatchAssembler<'a> {
    pub fn new(load_order: &'a LoadOrder, config: &'a MergeConfig) -> Self {
        PatchAssembler { load_order, config }
    }

    /// 解析某插件中的原始 FormID；空引用保持为空
    fn resolve(&self, plugin: usize, raw: u32) -> Option<CanonicalFormId> {
        (raw != 0).then(|| self.load_order.resolve(plugin, raw))
    }

    /// 组装补丁插件
    pub fn assemble(&self, lists: &[MergedLeveledList]) -> Result<Plugin, EspError> {
        let masters = self.collect_masters(lists);
        if masters.len() > MAX_PATCH_MASTERS {
            return Err(EspError::TooManyMasters(masters.len()));
        }

        let space = LocalSpace {
            indices: masters
                .iter()
                .enumerate()
                .map(|(local, &plugin)| (plugin, local as u8))
                .collect(),
        };

        let mut ordered: Vec<&MergedLeveledList> = lists.iter().collect();
        ordered.sort_by_key(|list| list.form_id);

        let mut groups: Vec<Group> = Vec::new();
        for list in ordered {
            let record = self.build_record(list, &space)?;
            let group = match groups.iter().position(|g| g.label == *list.record_type.as_bytes()) {
                Some(index) => &mut groups[index],
                None => {
                    groups.push(Group::top_level(list.record_type));
                    let last = groups.len() - 1;
                    &mut groups[last]
                }
            };
            group.push_record(record);
        }
        self.order_groups(&mut groups);

        let record_count: usize = groups.iter().map(|g| 1 + g.get_records().len()).sum();
        let header = PluginHeader {
            version: self.config.header_version,
            num_records: record_count as u32,
            next_object_id: FIRST_OBJECT_ID,
        };
        let master_names: Vec<String> = masters
            .iter()
            .map(|&plugin| self.load_order.plugin(plugin).name().to_string())
            .collect();

        tracing::info!(
            "补丁组装完成: {} 条记录, {} 个主文件",
            lists.len(),
            master_names.len()
        );

        Ok(Plugin::create(
            PathBuf::from(&self.config.patch_name),
            header,
            &self.config.author,
            self.config.description.as_deref(),
            master_names,
            groups,
        ))
    }

    /// 输出 FormID 引用到的所有插件（按加载顺序）
    fn collect_masters(&self, lists: &[MergedLeveledList]) -> BTreeSet<usize> {
        let mut masters = BTreeSet::new();
        for list in lists {
            masters.insert(list.form_id.plugin);
            for merged in &list.entries {
                if !merged.entry.key.item.is_null() {
                    masters.insert(merged.entry.key.item.plugin);
                }
                if let Some(owner) = merged.entry.owner {
                    masters.extend(self.resolve(merged.entry.source_plugin, owner.owner).map(|id| id.plugin));
                }
            }
            for subrecord in template_subrecords(&list.winner.record) {
                for raw in subrecord.form_ids() {
                    masters.extend(self.resolve(list.winner.plugin, raw).map(|id| id.plugin));
                }
            }
        }
        masters
    }

    /// 按配置的记录类型顺序排列顶级组，未配置的类型排在最后
    fn order_groups(&self, groups: &mut [Group]) {
        let order = self.config.leveled_types();
        groups.sort_by_key(|group| {
            order
                .iter()
                .position(|code| code.as_bytes() == &group.label)
                .unwrap_or(order.len())
        });
    }

    /// 以最终覆盖版本为模板构建输出记录
    fn build_record(&self, list: &MergedLeveledList, space: &LocalSpace) -> Result<Record, EspError> {
        let template = &list.winner.record;
        let mut record = Record::with_header_of(template, space.encode(list.form_id));
        record.flags &= !RecordFlags::COMPRESSED.bits();

        let entries_at = template
            .subrecords()
            .iter()
            .position(|sr| is_entry_code(sr.type_code()))
            .unwrap_or(template.subrecords().len());

        let mut remap = |raw: u32| match self.resolve(list.winner.plugin, raw) {
            Some(id) => space.encode(id),
            None => 0,
        };

        let mut after_lvlo = false;
        for (position, subrecord) in template.subrecords().iter().enumerate() {
            if position == entries_at {
                self.write_entries(&mut record, list, space)?;
            }
            let code = subrecord.type_code();
            let attached_owner = code == "COED" && after_lvlo;
            after_lvlo = code == "LVLO";
            if is_entry_code(code) || attached_owner {
                continue;
            }
            record.add_subrecord(subrecord.map_form_ids(&mut remap));
        }
        if entries_at == template.subrecords().len() {
            self.write_entries(&mut record, list, space)?;
        }

        Ok(record)
    }

    /// 写入 LLCT 与每个条目的 LVLO（以及所有者 COED）
    fn write_entries(&self, record: &mut Record, list: &MergedLeveledList, space: &LocalSpace) -> Result<(), EspError> {
        let count = u8::try_from(list.entries.len()).map_err(|_| {
            EspError::malformed(list.record_type, "LLCT", format!("{} entries exceed u8", list.entries.len()))
        })?;
        record.add_subrecord(Subrecord::new(TypeCode::new(b"LLCT"), SubrecordValue::U8(count)));

        for merged in &list.entries {
            let entry = &merged.entry;
            let object = LeveledObject {
                reference: space.encode(entry.key.item),
                count: merged.count,
                ..entry.template
            };
            record.add_subrecord(Subrecord::new(
                TypeCode::new(b"LVLO"),
                SubrecordValue::LeveledObjects(vec![object]),
            ));
            if let Some(owner) = entry.owner {
                let mut owner = owner;
                owner.owner = self
                    .resolve(entry.source_plugin, owner.owner)
                    .map(|id| space.encode(id))
                    .unwrap_or(0);
                record.add_subrecord(Subrecord::new(TypeCode::new(b"COED"), SubrecordValue::Owner(owner)));
            }
        }
        Ok(())
    }
}

fn is_entry_code(code: TypeCode) -> bool {
    code == "LLCT" || code == "LVLO"
}

/// 模板中除条目外保留的子记录
fn template_subrecords(record: &Record) -> impl Iterator<Item = &Subrecord> {
    let mut after_lvlo = false;
    record.subrecords().iter().filter(move |sr| {
        let code = sr.type_code();
        let attached_owner = code == "COED" && after_lvlo;
        after_lvlo = code == "LVLO";
        !(is_entry_code(code) || attached_owner)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::CollectingSink;
    use crate::subrecord::OwnerData;

    fn plugin(name: &str, masters: &[&str], records: Vec<Record>) -> Plugin {
        let mut group = Group::top_level(TypeCode::new(b"LVLI"));
        for record in records {
            group.push_record(record);
        }
        Plugin::create(
            PathBuf::from(name),
            PluginHeader {
                version: 1.71,
                num_records: 0,
                next_object_id: FIRST_OBJECT_ID,
            },
            "test",
            None,
            masters.iter().map(|m| m.to_string()).collect(),
            vec![group],
        )
    }

    fn leveled(form_id: u32, objects: &[(u32, u16)]) -> Record {
        let mut record = Record::new(TypeCode::new(b"LVLI"), form_id);
        record.add_subrecord(Subrecord::new(TypeCode::new(b"EDID"), SubrecordValue::zstring("LItemLoot")));
        record.add_subrecord(Subrecord::new(TypeCode::new(b"LVLD"), SubrecordValue::U8(0)));
        record.add_subrecord(Subrecord::new(TypeCode::new(b"LLCT"), SubrecordValue::U8(objects.len() as u8)));
        for &(reference, count) in objects {
            record.add_subrecord(Subrecord::new(
                TypeCode::new(b"LVLO"),
                SubrecordValue::LeveledObjects(vec![LeveledObject::new(1, reference, count)]),
            ));
        }
        record
    }

    fn lvlo_references(record: &Record) -> Vec<u32> {
        record.get_subrecords("LVLO").iter().flat_map(|sr| sr.form_ids()).collect()
    }

    #[test]
    fn test_masters_and_form_id_remapping() {
        // Base 定义列表与剑，Armor 定义盾，ModA 覆盖列表加入盾
        let base = plugin("Base.esm", &[], vec![leveled(0x800, &[(0x801, 1)])]);
        let armor = plugin("Armor.esm", &[], vec![]);
        let mod_a = plugin(
            "ModA.esp",
            &["Base.esm", "Armor.esm"],
            vec![leveled(0x0000_0800, &[(0x0000_0801, 1), (0x0100_0900, 1)])],
        );
        let load_order = LoadOrder::from_plugins(vec![base, armor, mod_a]).unwrap();

        let config = MergeConfig::default();
        let sink = CollectingSink::new();
        let mut config_all = config.clone();
        config_all.include_unchanged = true;
        let result = crate::merge::merge_leveled_lists(&load_order, &config_all, &sink).unwrap();
        assert_eq!(result.lists.len(), 1);

        let patch = PatchAssembler::new(&load_order, &config).assemble(&result.lists).unwrap();
        assert_eq!(patch.masters, vec!["Base.esm".to_string(), "Armor.esm".to_string()]);
        assert_eq!(patch.get_name(), "Leveled Lists.esp");

        let records = patch.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get_form_id(), 0x0000_0800);
        assert_eq!(lvlo_references(records[0]), vec![0x0000_0801, 0x0100_0900]);

        // 非条目子记录保持模板顺序，条目在原 LLCT 位置
        let codes: Vec<String> = records[0].subrecords().iter().map(|sr| sr.type_code().to_string()).collect();
        assert_eq!(codes, vec!["EDID", "LVLD", "LLCT", "LVLO", "LVLO"]);

        let header = patch.header_info().unwrap();
        assert_eq!(header.num_records, 2);
        assert_eq!(header.next_object_id, FIRST_OBJECT_ID);
    }

    #[test]
    fn test_unreferenced_plugins_are_not_masters() {
        let base = plugin("Base.esm", &[], vec![leveled(0x800, &[(0x801, 1)])]);
        let unrelated = plugin("Unrelated.esm", &[], vec![]);
        let mod_a = plugin("ModA.esp", &["Base.esm"], vec![leveled(0x800, &[(0x801, 1), (0x802, 1)])]);
        let load_order = LoadOrder::from_plugins(vec![base, unrelated, mod_a]).unwrap();

        let mut config = MergeConfig::default();
        config.include_unchanged = true;
        let sink = CollectingSink::new();
        let result = crate::merge::merge_leveled_lists(&load_order, &config, &sink).unwrap();
        let patch = PatchAssembler::new(&load_order, &config).assemble(&result.lists).unwrap();

        assert_eq!(patch.masters, vec!["Base.esm".to_string()]);
    }

    #[test]
    fn test_owner_and_compressed_flag() {
        let mut record = leveled(0x800, &[(0x801, 1)]);
        record.add_subrecord(Subrecord::new(
            TypeCode::new(b"COED"),
            SubrecordValue::Owner(OwnerData { owner: 0x803, data: [1; 8] }),
        ));
        let base = plugin("Base.esm", &[], vec![record]);
        let mut override_record = leveled(0x800, &[(0x801, 1), (0x802, 2)]);
        override_record.flags = RecordFlags::COMPRESSED.bits();
        let mod_a = plugin("ModA.esp", &["Base.esm"], vec![override_record]);
        let load_order = LoadOrder::from_plugins(vec![base, mod_a]).unwrap();

        let mut config = MergeConfig::default();
        config.include_unchanged = true;
        let sink = CollectingSink::new();
        let result = crate::merge::merge_leveled_lists(&load_order, &config, &sink).unwrap();
        let patch = PatchAssembler::new(&load_order, &config).assemble(&result.lists).unwrap();

        let records = patch.records();
        assert!(!records[0].get_flags().contains(RecordFlags::COMPRESSED));
        let owners = records[0].get_subrecords("COED");
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].form_ids(), vec![0x0000_0803]);
    }

    #[test]
    fn test_null_entry_reference_stays_null() {
        let base = plugin("Base.esm", &[], vec![leveled(0x800, &[(0x801, 1)])]);
        let other = plugin("Other.esm", &[], vec![]);
        // ModA 的第一个主文件是 Other，空引用不能被解析到它
        let mod_a = plugin(
            "ModA.esp",
            &["Other.esm", "Base.esm"],
            vec![leveled(0x0100_0800, &[(0x0100_0801, 1), (0, 1)])],
        );
        let load_order = LoadOrder::from_plugins(vec![base, other, mod_a]).unwrap();

        let mut config = MergeConfig::default();
        config.include_unchanged = true;
        let sink = CollectingSink::new();
        let result = crate::merge::merge_leveled_lists(&load_order, &config, &sink).unwrap();
        let patch = PatchAssembler::new(&load_order, &config).assemble(&result.lists).unwrap();

        assert_eq!(patch.masters, vec!["Base.esm".to_string()]);
        let records = patch.records();
        assert_eq!(records[0].get_form_id(), 0x0000_0800);
        assert_eq!(lvlo_references(records[0]), vec![0x0000_0801, 0]);
    }

    #[test]
    fn test_empty_patch_has_no_masters() {
        let base = plugin("Base.esm", &[], vec![]);
        let load_order = LoadOrder::from_plugins(vec![base]).unwrap();
        let config = MergeConfig::default();

        let patch = PatchAssembler::new(&load_order, &config).assemble(&[]).unwrap();
        assert!(patch.masters.is_empty());
        assert!(patch.groups.is_empty());
        assert_eq!(patch.header_info().unwrap().num_records, 0);
    }
}
