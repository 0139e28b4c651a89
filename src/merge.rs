//! 等级列表合并
//!
//! 对同一等级列表的所有覆盖版本做条目级合并：各插件独立新增的条目都会保留，
//! 某插件删除的条目只抵消其主文件中的那一次断言。

mod count;
mod engine;
mod entries;

pub use count::LvloCount;
pub use engine::{LeveledListMerger, MergedEntry, MergedLeveledList};
pub use entries::{extract_entries, EntryKey, LeveledEntry};

use crate::config::MergeConfig;
use crate::formid::CanonicalFormId;
use crate::load_order::{LoadOrder, RecordVersion};
use crate::sink::WarningSink;
use crate::utils::EspError;
use rayon::prelude::*;

/// 合并全部等级列表的结果
#[derive(Debug, Default)]
pub struct MergeResult {
    /// 需要写入补丁的列表（按规范化 FormID 排序）
    pub lists: Vec<MergedLeveledList>,
    /// 被两个及以上插件覆盖的等级列表数量
    pub considered: usize,
    /// 合并结果与最终覆盖相同而被省略的数量
    pub unchanged: usize,
}

/// 合并加载顺序中所有被多个插件覆盖的等级列表
///
/// 各列表互相独立，在配置的线程池中并行合并；结果顺序与线程数无关。
pub fn merge_leveled_lists(
    load_order: &LoadOrder,
    config: &MergeConfig,
    sink: &dyn WarningSink,
) -> Result<MergeResult, EspError> {
    let leveled_types = config.leveled_types();
    let candidates: Vec<(CanonicalFormId, &[RecordVersion])> = load_order
        .versions()
        .filter(|(_, versions)| versions.len() > 1)
        .filter(|(_, versions)| {
            versions
                .last()
                .is_some_and(|v| leveled_types.contains(&v.record.get_type()))
        })
        .map(|(id, versions)| (*id, versions))
        .collect();

    tracing::info!("待合并的等级列表: {} 个", candidates.len());

    let merger = LeveledListMerger::new(load_order, sink, config.max_entries);
    let pool = config.build_thread_pool()?;
    let merged: Vec<MergedLeveledList> = pool.install(|| {
        candidates
            .par_iter()
            .filter_map(|(id, versions)| merger.merge_record(*id, versions))
            .collect()
    });

    let considered = candidates.len();
    let (lists, skipped): (Vec<_>, Vec<_>) = merged
        .into_iter()
        .partition(|list| list.changed || config.include_unchanged);

    tracing::info!(
        "合并完成: {} 个列表写入补丁, {} 个与最终覆盖相同",
        lists.len(),
        skipped.len()
    );

    Ok(MergeResult {
        lists,
        considered,
        unchanged: skipped.len(),
    })
}
