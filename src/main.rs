use anyhow::{bail, Context, Result};
use clap::Parser;
use esp_merger::io::{DefaultEspReader, DefaultEspWriter};
use esp_merger::utils::create_backup;
use esp_merger::{parse_load_order_list, MergeConfig, MergeSession, Plugin, TracingSink, SUPPORTED_EXTENSIONS};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "esp_merger")]
#[command(about = "合并加载顺序中的等级列表，生成补丁插件")]
#[command(version = "0.1.0")]
struct Cli {
    /// 按加载顺序排列的插件路径
    plugins: Vec<PathBuf>,

    /// 输出补丁文件路径
    #[arg(short, long)]
    output: PathBuf,

    /// plugins.txt 风格的加载顺序列表（与位置参数二选一）
    #[arg(long, requires = "data_dir")]
    plugins_txt: Option<PathBuf>,

    /// 插件所在的数据目录
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// JSON 配置文件
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 合并报告输出路径（默认写入配置的内部目录）
    #[arg(long)]
    report: Option<PathBuf>,

    /// 显示各插件统计信息
    #[arg(long)]
    stats: bool,

    /// 覆盖输出文件前不创建备份
    #[arg(long)]
    no_backup: bool,

    /// 静默模式(仅输出错误)
    #[arg(long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet);

    let mut config = match &cli.config {
        Some(path) => MergeConfig::from_json_file(path)
            .with_context(|| format!("无法读取配置文件: {}", path.display()))?,
        None => MergeConfig::default(),
    };
    if let Some(name) = cli.output.file_name() {
        config.patch_name = name.to_string_lossy().into_owned();
    }

    let plugins = collect_plugins(&cli)?;
    validate_inputs(&plugins)?;

    if !cli.quiet {
        println!("正在合并 {} 个插件的等级列表", plugins.len());
    }

    let reader = DefaultEspReader;
    let sink = TracingSink;
    let outcome = MergeSession::new(&config, &reader, &sink)
        .run(&plugins)
        .context("合并失败")?;

    if cli.stats && !cli.quiet {
        for stats in &outcome.stats {
            println!("{}", stats);
        }
    }

    write_patch(&cli, &outcome.patch)?;

    let report_path = cli.report.clone().or_else(|| config.default_report_path());
    if let Some(path) = &report_path {
        outcome
            .report
            .write_json(path)
            .with_context(|| format!("无法写入合并报告: {}", path.display()))?;
    }

    if !cli.quiet {
        print_summary(&outcome.report, &cli.output, report_path.as_deref());
    }
    Ok(())
}

fn init_tracing(quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

/// 位置参数优先，否则读取 plugins.txt
fn collect_plugins(cli: &Cli) -> Result<Vec<PathBuf>> {
    if !cli.plugins.is_empty() {
        if cli.plugins_txt.is_some() {
            bail!("插件路径与 --plugins-txt 不能同时使用");
        }
        return Ok(cli.plugins.clone());
    }

    match (&cli.plugins_txt, &cli.data_dir) {
        (Some(list), Some(data_dir)) => {
            let text = std::fs::read_to_string(list)
                .with_context(|| format!("无法读取加载顺序列表: {}", list.display()))?;
            Ok(parse_load_order_list(&text, data_dir))
        }
        _ => bail!("需要提供插件路径，或同时提供 --plugins-txt 与 --data-dir"),
    }
}

fn validate_inputs(plugins: &[PathBuf]) -> Result<()> {
    if plugins.is_empty() {
        bail!("加载顺序为空");
    }
    for path in plugins {
        if !path.exists() {
            bail!("插件文件不存在: {}", path.display());
        }
        let supported = path
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy();
                SUPPORTED_EXTENSIONS.iter().any(|s| ext.eq_ignore_ascii_case(s))
            })
            .unwrap_or(false);
        if !supported {
            bail!("不支持的文件格式: {}", path.display());
        }
    }
    Ok(())
}

fn write_patch(cli: &Cli, patch: &Plugin) -> Result<()> {
    if cli.output.exists() && !cli.no_backup {
        let backup = create_backup(&cli.output).context("无法备份已有的输出文件")?;
        if !cli.quiet {
            println!("已备份原文件: {}", backup.display());
        }
    }
    patch
        .write_with(&DefaultEspWriter, &cli.output)
        .with_context(|| format!("无法写入补丁: {}", cli.output.display()))
}

fn print_summary(report: &esp_merger::MergeReport, output: &Path, report_path: Option<&Path>) {
    println!("发现 {} 个被多个插件覆盖的等级列表", report.considered);
    println!("写入补丁: {} 个列表, 省略未变化的 {} 个", report.lists.len(), report.unchanged);
    println!("补丁主文件: {}", report.masters.join(", "));
    if !report.warnings.is_empty() {
        println!("警告: {} 条", report.warnings.len());
    }
    println!("结果已写入: {}", output.display());
    if let Some(path) = report_path {
        println!("合并报告: {}", path.display());
    }

    if !report.lists.is_empty() {
        println!("\n样例列表:");
        for list in report.lists.iter().take(3) {
            println!(
                "  [{}] {} {}: {} 个条目, 来源 {}",
                list.record_type,
                list.form_id,
                list.editor_id.as_deref().unwrap_or("-"),
                list.entries,
                list.contributors.join(", ")
            );
        }
        if report.lists.len() > 3 {
            println!("  ... 还有 {} 个列表", report.lists.len() - 3);
        }
    }
}
