//! 加载顺序解析
//!
//! 按调用方给定的顺序加载插件，校验主文件依赖，并把每条记录的原始 FormID
//! 解析到统一的规范化标识空间。
//!
//! 加载分两个阶段：
//! 1. 并行读取所有文件并只解析 TES4 头部，得到主文件声明；
//! 2. 按依赖深度分层，同一深度内的插件并行完整解析，浅层全部完成后才开始深层。

use crate::config::MergeConfig;
use crate::formid::{master_index, object_index, CanonicalFormId, FormIdResolver};
use crate::io::EspReader;
use crate::plugin::Plugin;
use crate::record::Record;
use crate::sink::{Warning, WarningKind};
use crate::utils::EspError;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 某个插件提供的一条记录版本
#[derive(Debug, Clone)]
pub struct RecordVersion {
    /// 插件的加载顺序索引
    pub plugin: usize,
    pub record: Arc<Record>,
}

/// 已加载并完成主文件解析的插件
#[derive(Debug)]
pub struct LoadedPlugin {
    pub plugin: Plugin,
    /// MAST 列表中每一项对应的加载顺序索引
    pub master_indices: Vec<usize>,
    /// 依赖深度（无主文件为 0）
    pub depth: usize,
    /// 传递主文件集合
    transitive_masters: BTreeSet<usize>,
}

impl LoadedPlugin {
    pub fn name(&self) -> &str {
        self.plugin.get_name()
    }
}

/// 完整的加载顺序
#[derive(Debug)]
pub struct LoadOrder {
    plugins: Vec<LoadedPlugin>,
    index: BTreeMap<CanonicalFormId, Vec<RecordVersion>>,
    warnings: Vec<Warning>,
}

impl LoadOrder {
    /// 由已解析的插件构建加载顺序（会校验主文件）
    pub fn from_plugins(plugins: Vec<Plugin>) -> Result<Self, EspError> {
        let names: Vec<String> = plugins.iter().map(|p| p.get_name().to_string()).collect();
        check_duplicates(&names)?;
        let masters: Vec<Vec<String>> = plugins.iter().map(|p| p.masters.clone()).collect();
        let master_indices = validate_masters(&names, &masters)?;
        Ok(Self::build(plugins, master_indices))
    }

    fn build(plugins: Vec<Plugin>, master_indices: Vec<Vec<usize>>) -> Self {
        let depths = dependency_depths(&master_indices);

        let mut loaded: Vec<LoadedPlugin> = Vec::with_capacity(plugins.len());
        for ((plugin, masters), depth) in plugins.into_iter().zip(master_indices).zip(depths) {
            let mut transitive = BTreeSet::new();
            for &master in &masters {
                transitive.insert(master);
                transitive.extend(loaded[master].transitive_masters.iter().copied());
            }
            loaded.push(LoadedPlugin {
                plugin,
                master_indices: masters,
                depth,
                transitive_masters: transitive,
            });
        }

        let mut load_order = LoadOrder {
            plugins: loaded,
            index: BTreeMap::new(),
            warnings: Vec::new(),
        };
        load_order.build_index();
        load_order
    }

    /// 建立 规范化 FormID -> 记录版本 的索引，并收集加载警告
    fn build_index(&mut self) {
        let mut index: BTreeMap<CanonicalFormId, Vec<RecordVersion>> = BTreeMap::new();
        let mut warnings = Vec::new();

        for (plugin_index, loaded) in self.plugins.iter().enumerate() {
            for record in loaded.plugin.records() {
                let id = self.resolve(plugin_index, record.get_form_id());
                index.entry(id).or_default().push(RecordVersion {
                    plugin: plugin_index,
                    record: Arc::clone(record),
                });
            }

            for skipped in &loaded.plugin.skipped {
                warnings.push(
                    Warning::new(WarningKind::MalformedSubrecord, skipped.reason.clone())
                        .with_plugin(loaded.name())
                        .with_record(format!("{} [{:08X}]", skipped.record_type, skipped.form_id)),
                );
            }
        }

        tracing::debug!(records = index.len(), plugins = self.plugins.len(), "规范化索引建立完成");
        self.index = index;
        self.warnings = warnings;
    }

    pub fn plugins(&self) -> &[LoadedPlugin] {
        &self.plugins
    }

    pub fn plugin(&self, index: usize) -> &LoadedPlugin {
        &self.plugins[index]
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// 按名称查找插件（大小写不敏感）
    pub fn find_plugin(&self, name: &str) -> Option<usize> {
        self.plugins.iter().position(|p| p.name().eq_ignore_ascii_case(name))
    }

    /// 所有规范化记录及其版本（按规范化 FormID 升序，版本按加载顺序）
    pub fn versions(&self) -> impl Iterator<Item = (&CanonicalFormId, &[RecordVersion])> {
        self.index.iter().map(|(id, versions)| (id, versions.as_slice()))
    }

    /// 指定记录的所有版本
    pub fn versions_of(&self, id: &CanonicalFormId) -> &[RecordVersion] {
        self.index.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// 加载阶段产生的警告（被跳过的记录）
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// 可读的规范化 FormID，例如 `Skyrim.esm:012E49`
    pub fn describe(&self, id: &CanonicalFormId) -> String {
        match self.plugins.get(id.plugin) {
            Some(plugin) => format!("{}:{:06X}", plugin.name(), id.object),
            None => id.to_string(),
        }
    }
}

impl FormIdResolver for LoadOrder {
    fn resolve(&self, plugin: usize, raw: u32) -> CanonicalFormId {
        let origin = self.plugins[plugin]
            .master_indices
            .get(master_index(raw) as usize)
            .copied()
            .unwrap_or(plugin);
        CanonicalFormId::new(origin, object_index(raw))
    }

    fn is_master_of(&self, plugin: usize, candidate: usize) -> bool {
        self.plugins[plugin].transitive_masters.contains(&candidate)
    }

    fn plugin_name(&self, plugin: usize) -> &str {
        self.plugins[plugin].name()
    }
}

/// 加载顺序解析器
pub struct LoadOrderResolver<'a> {
    config: &'a MergeConfig,
    reader: &'a dyn EspReader,
}

/// 阶段一的结果：文件字节与主文件声明
struct PluginHead {
    bytes: Vec<u8>,
    masters: Vec<String>,
}

impl<'a> LoadOrderResolver<'a> {
    pub fn new(config: &'a MergeConfig, reader: &'a dyn EspReader) -> Self {
        LoadOrderResolver { config, reader }
    }

    /// 按顺序加载插件
    pub fn load_plugins(&self, paths: &[PathBuf]) -> Result<LoadOrder, EspError> {
        let names: Vec<String> = paths.iter().map(|p| plugin_name(p)).collect();
        check_duplicates(&names)?;

        let pool = self.config.build_thread_pool()?;

        // 阶段一：读取文件与头部
        let heads: Vec<Result<PluginHead, EspError>> = pool.install(|| {
            paths
                .par_iter()
                .zip(names.par_iter())
                .map(|(path, name)| self.read_head(path, name))
                .collect()
        });
        let heads = heads.into_iter().collect::<Result<Vec<_>, _>>()?;

        let masters: Vec<Vec<String>> = heads.iter().map(|h| h.masters.clone()).collect();
        let master_indices = validate_masters(&names, &masters)?;
        let depths = dependency_depths(&master_indices);

        // 阶段二：按依赖深度分层并行解析
        let mut slots: Vec<Option<Plugin>> = (0..paths.len()).map(|_| None).collect();
        let max_depth = depths.iter().copied().max().unwrap_or(0);
        for depth in 0..=max_depth {
            let layer: Vec<usize> = (0..paths.len()).filter(|&i| depths[i] == depth).collect();
            tracing::debug!(depth, plugins = layer.len(), "解析依赖层");

            let parsed: Vec<Result<Plugin, EspError>> = pool.install(|| {
                layer
                    .par_iter()
                    .map(|&i| {
                        Plugin::from_bytes(paths[i].clone(), &heads[i].bytes)
                            .map_err(|e| EspError::load(names[i].clone(), e))
                    })
                    .collect()
            });

            for (&i, plugin) in layer.iter().zip(parsed) {
                slots[i] = Some(plugin?);
            }
        }

        let plugins = slots
            .into_iter()
            .zip(&names)
            .map(|(slot, name)| slot.ok_or_else(|| EspError::load(name.clone(), "plugin was not parsed")))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(plugins = plugins.len(), layers = max_depth + 1, "加载顺序解析完成");
        Ok(LoadOrder::build(plugins, master_indices))
    }

    fn read_head(&self, path: &Path, name: &str) -> Result<PluginHead, EspError> {
        let raw = self.reader.read(path).map_err(|e| EspError::load(name, e))?;
        let (_, masters) = Plugin::read_header(&raw.bytes).map_err(|e| EspError::load(name, e))?;
        Ok(PluginHead {
            bytes: raw.bytes,
            masters,
        })
    }
}

/// 文件名（用作插件名）
fn plugin_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn check_duplicates(names: &[String]) -> Result<(), EspError> {
    let mut seen = BTreeSet::new();
    for name in names {
        if !seen.insert(name.to_lowercase()) {
            return Err(EspError::DuplicatePlugin(name.clone()));
        }
    }
    Ok(())
}

/// 把每个插件的主文件名解析为加载顺序索引
///
/// 主文件必须出现在加载顺序中，并且严格早于依赖它的插件。
fn validate_masters(names: &[String], masters: &[Vec<String>]) -> Result<Vec<Vec<usize>>, EspError> {
    let positions: HashMap<String, usize> = names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.to_lowercase(), i))
        .collect();

    names
        .iter()
        .zip(masters)
        .enumerate()
        .map(|(i, (name, plugin_masters))| {
            plugin_masters
                .iter()
                .map(|master| match positions.get(&master.to_lowercase()) {
                    None => Err(EspError::UnresolvedMaster {
                        plugin: name.clone(),
                        master: master.clone(),
                    }),
                    Some(&j) if j >= i => Err(EspError::MasterOrderViolation {
                        plugin: name.clone(),
                        master: master.clone(),
                    }),
                    Some(&j) => Ok(j),
                })
                .collect()
        })
        .collect()
}

/// 依赖深度：无主文件为 0，否则为主文件最大深度 + 1
fn dependency_depths(master_indices: &[Vec<usize>]) -> Vec<usize> {
    let mut depths: Vec<usize> = Vec::with_capacity(master_indices.len());
    for masters in master_indices {
        let depth = masters.iter().map(|&m| depths[m] + 1).max().unwrap_or(0);
        depths.push(depth);
    }
    depths
}

/// 解析 plugins.txt 风格的加载顺序列表
///
/// `#` 开头为注释；若任意一行以 `*` 标记，则只加载带 `*` 的行。
pub fn parse_load_order_list(text: &str, data_dir: &Path) -> Vec<PathBuf> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect();
    let has_markers = lines.iter().any(|line| line.starts_with('*'));

    lines
        .into_iter()
        .filter_map(|line| match line.strip_prefix('*') {
            Some(active) => Some(active.trim()),
            None if has_markers => None,
            None => Some(line),
        })
        .map(|name| data_dir.join(name))
        .collect()
}
