//! rslinkify 命令行：基于文件存储的规则管理、渲染与预览

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use tracing::debug;

use rslinkify::{
    ConfigManager, FileStore, Linker, PostInfo, RenderContext, Rule, RuleFilter, RuleStatus,
    RuleStore, StaticDirectory, StaticSite,
};

#[derive(Parser, Debug)]
#[command(name = "rslinkify")]
#[command(version, about = "Rule-driven internal-link engine for HTML content")]
struct Cli {
    /// 数据文件路径（规则库与渲染缓存）
    #[arg(long, global = true, env = "RSLINKIFY_STORE", default_value = "rslinkify.db")]
    store: PathBuf,

    /// 站点根地址，用于内外链判定与相对地址补全
    #[arg(long, global = true, env = "RSLINKIFY_SITE_URL", default_value = "https://localhost/")]
    site_url: String,

    /// 站点名称（{site_name} 变量）
    #[arg(long, global = true, env = "RSLINKIFY_SITE_NAME", default_value = "rslinkify")]
    site_name: String,

    /// 文章固定链接，格式 `id=url`，可重复
    #[arg(long = "permalink", global = true, value_parser = parse_permalink)]
    permalinks: Vec<(u64, String)>,

    /// 输出详细日志
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 用全部已启用规则改写 HTML 文件
    Render(RenderArgs),
    /// 用一条候选规则（JSON 文件）试运行，输出 JSON 结果
    Preview(PreviewArgs),
    /// 规则库管理
    #[command(subcommand)]
    Rules(RulesCommand),
    /// 清空渲染缓存
    PurgeCache,
}

#[derive(Args, Debug)]
struct PageArgs {
    /// 当前请求路径
    #[arg(long, default_value = "/")]
    path: String,
    /// 当前文章 id
    #[arg(long)]
    post_id: Option<u64>,
    /// 当前文章类型
    #[arg(long, default_value = "post")]
    post_type: String,
    /// 按小工具内容处理
    #[arg(long)]
    widget: bool,
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// HTML 文件
    file: PathBuf,
    #[command(flatten)]
    page: PageArgs,
}

#[derive(Args, Debug)]
struct PreviewArgs {
    /// 候选规则 JSON 文件
    #[arg(long)]
    rule: PathBuf,
    /// 本地 HTML 文件
    #[arg(long, conflicts_with = "url", required_unless_present = "url")]
    file: Option<PathBuf>,
    /// 本站页面地址（远程抓取）
    #[arg(long)]
    url: Option<String>,
    #[command(flatten)]
    page: PageArgs,
}

#[derive(Subcommand, Debug)]
enum RulesCommand {
    /// 列出规则
    List {
        /// 只列出已启用规则
        #[arg(long)]
        active: bool,
        /// 标题或关键词检索
        #[arg(long)]
        search: Option<String>,
    },
    /// 从 JSON 文件整库导入
    Import { file: PathBuf },
    /// 整库导出为 JSON
    Export {
        /// 输出文件，缺省时输出到标准输出
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn parse_permalink(raw: &str) -> Result<(u64, String), String> {
    let (id, url) = raw
        .split_once('=')
        .ok_or_else(|| format!("格式应为 id=url：{}", raw))?;
    let id = id.trim().parse::<u64>().map_err(|e| format!("文章 id 无效：{}", e))?;
    Ok((id, url.trim().to_string()))
}

impl PageArgs {
    fn context(&self) -> RenderContext {
        let mut ctx = if self.widget {
            RenderContext::widget(&self.path)
        } else {
            RenderContext::content(&self.path)
        };
        if let Some(post_id) = self.post_id {
            ctx = ctx.with_post(PostInfo::new(post_id, self.post_type.clone()));
        }
        ctx
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let kv = Arc::new(
        FileStore::open(&cli.store)
            .with_context(|| format!("无法打开数据文件 {}", cli.store.display()))?,
    );
    let mut directory = StaticDirectory::new();
    for (id, url) in &cli.permalinks {
        directory.insert(*id, url.clone());
    }
    let store = Arc::new(RuleStore::open(kv.clone(), Arc::new(directory))?);
    let site = StaticSite::new(&cli.site_url, cli.site_name.clone())?;
    let config = ConfigManager::custom().verbose(cli.verbose).build();
    let linker = Linker::new(store.clone(), kv, Arc::new(site), config);
    debug!("数据文件已打开：{}", cli.store.display());

    match cli.command {
        Commands::Render(args) => {
            let content = tokio::fs::read_to_string(&args.file)
                .await
                .with_context(|| format!("无法读取 {}", args.file.display()))?;
            let html = linker.render(&content, &args.page.context())?;
            println!("{}", html);
        }
        Commands::Preview(args) => {
            let raw = tokio::fs::read_to_string(&args.rule)
                .await
                .with_context(|| format!("无法读取 {}", args.rule.display()))?;
            let candidate: Rule = serde_json::from_str(&raw).context("候选规则 JSON 无效")?;

            let result = match (&args.file, &args.url) {
                (Some(file), _) => {
                    let content = tokio::fs::read_to_string(file)
                        .await
                        .with_context(|| format!("无法读取 {}", file.display()))?;
                    linker.preview(candidate, &content, &args.page.context())?
                }
                (None, Some(url)) => linker.preview_remote(candidate, url).await?,
                (None, None) => bail!("需要指定 --file 或 --url"),
            };
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Rules(RulesCommand::List { active, search }) => {
            let mut filter = RuleFilter::new();
            if active {
                filter = filter.status(RuleStatus::Active);
            }
            if let Some(search) = search {
                filter = filter.search(search);
            }
            for rule in store.list_rules(&filter)? {
                println!(
                    "{}\t[{}]\tpriority={}\t{}",
                    rule,
                    if rule.is_active() { "active" } else { "inactive" },
                    rule.priority,
                    rule.keywords.join(", ")
                );
            }
        }
        Commands::Rules(RulesCommand::Import { file }) => {
            let json = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("无法读取 {}", file.display()))?;
            let count = store.import_json(&json)?;
            println!("已导入 {} 条规则", count);
        }
        Commands::Rules(RulesCommand::Export { output }) => {
            let json = store.export_json()?;
            match output {
                Some(path) => tokio::fs::write(&path, json)
                    .await
                    .with_context(|| format!("无法写入 {}", path.display()))?,
                None => println!("{}", json),
            }
        }
        Commands::PurgeCache => {
            let purged = linker.cache().purge()?;
            println!("已清除 {} 条渲染缓存", purged);
        }
    }

    Ok(())
}
