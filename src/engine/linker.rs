//! 链接引擎入口：渲染、预览与宿主过滤器注册

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::cache::{CachedRender, RenderCache, content_hash};
use super::chunk::{Chunk, parse_chunks};
use super::dom::Document;
use super::events::{CONTENT_FILTER, EventBus, WIDGET_FILTER};
use super::matcher::MatchOptions;
use super::rewriter::{Replacement, RewritePass, existing_hrefs};
use super::runtime::{PrepareContext, RuntimeRule, prepare_runtime_rule};
use super::scope::{matches_scope, normalize_request_url};
use crate::config::LinkerConfig;
use crate::error::LinkResult;
use crate::host::{ContentSource, ContextKind, KeyValueStore, RenderContext, SiteIdentity};
use crate::rule::{Rule, RuleStore, StoreSnapshot};

/// 预览结果中按 (规则, 关键词, 目标地址) 汇总的替换
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacementSummary {
    pub rule_id: u64,
    pub rule_title: String,
    pub keyword: String,
    pub destination_url: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewResult {
    pub html: String,
    pub replacements: Vec<ReplacementSummary>,
}

/// 单次改写的产出
struct RewriteOutput {
    html: String,
    replacements: Vec<Replacement>,
}

pub struct Linker {
    store: Arc<RuleStore>,
    site: Arc<dyn SiteIdentity>,
    cache: RenderCache,
    config: LinkerConfig,
}

impl Linker {
    /// `kv` 用于渲染缓存，可与规则库共用同一存储
    pub fn new(
        store: Arc<RuleStore>,
        kv: Arc<dyn KeyValueStore>,
        site: Arc<dyn SiteIdentity>,
        config: LinkerConfig,
    ) -> Self {
        let cache = RenderCache::new(kv, config.cache_prefix.clone());
        Self {
            store,
            site,
            cache,
            config,
        }
    }

    pub fn store(&self) -> &RuleStore {
        &self.store
    }

    pub fn site(&self) -> &dyn SiteIdentity {
        self.site.as_ref()
    }

    pub fn config(&self) -> &LinkerConfig {
        &self.config
    }

    pub fn cache(&self) -> &RenderCache {
        &self.cache
    }

    /// 用全部已启用规则改写内容
    pub fn render(&self, content: &str, ctx: &RenderContext) -> LinkResult<String> {
        let snapshot = self.store.snapshot()?;

        // 仅正文且有文章 id 时读写缓存；同一文章在不同路径下渲染结果可能不同
        let cache_key = match ctx.post_id() {
            Some(post_id) if !ctx.is_widget() && snapshot.settings.cache_rendered_content => {
                let request_path = normalize_request_url(&ctx.request_url);
                Some((post_id, content_hash(content, &request_path)))
            }
            _ => None,
        };

        if let Some((post_id, hash)) = cache_key {
            if let Some(html) = self.cache.get(post_id, snapshot.version, hash)? {
                debug!("渲染缓存命中：文章 #{}", post_id);
                return Ok(html);
            }
            debug!("渲染缓存未命中：文章 #{}", post_id);
        }

        let output = self.rewrite(&snapshot.rules, &snapshot, content, ctx);

        if let Some((post_id, hash)) = cache_key {
            let entry = CachedRender {
                version: snapshot.version,
                content_hash: hash,
                html: output.html.clone(),
            };
            self.cache.put(post_id, &entry)?;
        }

        Ok(output.html)
    }

    /// 从宿主内容源取内容与上下文后渲染
    pub fn render_source(&self, source: &dyn ContentSource) -> LinkResult<String> {
        self.render(&source.content(), &source.context())
    }

    /// 仅用一条未保存的候选规则试运行；不写规则库、不读写缓存
    pub fn preview(&self, candidate: Rule, content: &str, ctx: &RenderContext) -> LinkResult<PreviewResult> {
        let rule = self.store.check_rule(candidate)?;
        let snapshot = self.store.snapshot()?;

        let output = self.rewrite(std::slice::from_ref(&rule), &snapshot, content, ctx);
        Ok(PreviewResult {
            html: output.html,
            replacements: summarize(output.replacements),
        })
    }

    /// 注册到宿主扩展点；过滤器内渲染失败时记录警告并原样返回
    pub fn register(self: &Arc<Self>, bus: &mut EventBus) {
        let linker = Arc::clone(self);
        bus.add_filter(CONTENT_FILTER, move |html, ctx| linker.filter(html, ctx));

        let linker = Arc::clone(self);
        bus.add_filter(WIDGET_FILTER, move |html, ctx| {
            let ctx = RenderContext {
                kind: ContextKind::Widget,
                ..ctx.clone()
            };
            linker.filter(html, &ctx)
        });
    }

    fn filter(&self, html: &str, ctx: &RenderContext) -> String {
        match self.render(html, ctx) {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!("内容改写失败，返回原文：{}", e);
                html.to_string()
            }
        }
    }

    /// 渲染与预览共用的改写流程
    fn rewrite(
        &self,
        rules: &[Rule],
        snapshot: &StoreSnapshot,
        content: &str,
        ctx: &RenderContext,
    ) -> RewriteOutput {
        let unchanged = || RewriteOutput {
            html: content.to_string(),
            replacements: Vec::new(),
        };
        if content.trim().is_empty() || rules.is_empty() {
            return unchanged();
        }

        let settings = &snapshot.settings;
        let prepare = PrepareContext {
            categories: &snapshot.categories,
            templates: &snapshot.templates,
            settings,
            site: self.site.as_ref(),
            directory: self.store.directory(),
        };

        // 1. 构建运行时规则并按作用域过滤
        let mut runtime: Vec<RuntimeRule> = rules
            .iter()
            .filter_map(|rule| prepare_runtime_rule(rule, &prepare))
            .filter(|rule| matches_scope(rule, ctx))
            .collect();
        if runtime.is_empty() {
            return unchanged();
        }

        // 2. 切块并逐块解析
        let parsed = if settings.chunk_long_documents {
            parse_chunks(content, self.config.chunk_threshold)
        } else {
            vec![Chunk {
                source: content,
                doc: Document::parse(content),
            }]
        };
        let (pieces, mut chunks): (Vec<&str>, Vec<Document>) =
            parsed.into_iter().map(|chunk| (chunk.source, chunk.doc)).unzip();

        // 3. 跳过目标已在文中出现过的规则
        if settings.avoid_existing_links {
            let existing = existing_hrefs(&chunks, &self.site.base_url());
            runtime.retain(|rule| {
                let keep = !existing.contains(&rule.destination_url);
                if !keep {
                    debug!("规则 {} 的目标已存在于文中，跳过", rule.rule_id);
                }
                keep
            });
            if runtime.is_empty() {
                return unchanged();
            }
        }

        // 4. 改写；未改动的切块原样输出
        let options = MatchOptions {
            word_boundaries: settings.prefer_word_boundaries,
            strip_accents: settings.normalize_accents,
        };
        let site_name = self.site.site_name();
        let mut pass = RewritePass::new(&runtime, options, ctx, &site_name);
        let changed = pass.run(&runtime, &mut chunks);

        let html: String = pieces
            .iter()
            .zip(chunks.iter().zip(changed.iter()))
            .map(|(piece, (doc, &changed))| {
                if changed {
                    doc.serialize()
                } else {
                    piece.to_string()
                }
            })
            .collect();

        let replacements = pass.into_replacements();
        if self.config.verbose {
            debug!(
                "改写完成：运行时规则 {} 条，切块 {} 个，替换 {} 处",
                runtime.len(),
                pieces.len(),
                replacements.len()
            );
        }

        RewriteOutput { html, replacements }
    }
}

/// 按 (规则, 关键词, 目标地址) 去重计数，保持首次出现顺序
fn summarize(replacements: Vec<Replacement>) -> Vec<ReplacementSummary> {
    let mut index: HashMap<(u64, String, String), usize> = HashMap::new();
    let mut summary: Vec<ReplacementSummary> = Vec::new();

    for item in replacements {
        let key = (item.rule_id, item.keyword.clone(), item.destination_url.clone());
        match index.get(&key) {
            Some(&position) => summary[position].count += 1,
            None => {
                index.insert(key, summary.len());
                summary.push(ReplacementSummary {
                    rule_id: item.rule_id,
                    rule_title: item.rule_title,
                    keyword: item.keyword,
                    destination_url: item.destination_url,
                    count: 1,
                });
            }
        }
    }

    summary
}
