//! 远程预览：抓取本站页面后用候选规则试运行

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use super::linker::{Linker, PreviewResult};
use crate::error::{LinkResult, LinkifyError};
use crate::host::RenderContext;
use crate::rule::Rule;

impl Linker {
    /// 抓取本站地址的页面并预览；只允许本站主机，不产生任何写入
    pub async fn preview_remote(&self, candidate: Rule, url: &str) -> LinkResult<PreviewResult> {
        let target = Url::parse(url.trim())?;
        let host = target.host_str().unwrap_or_default().to_lowercase();
        if host != self.site().host() {
            return Err(LinkifyError::ForeignHost(url.to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(self.config().fetch_timeout))
            .build()?;

        debug!("开始抓取预览页面：{}", target);
        let response = client
            .get(target.clone())
            .header("User-Agent", concat!("rslinkify/", env!("CARGO_PKG_VERSION")))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .inspect_err(|e| warn!("预览页面抓取失败：{}，错误：{}", target, e))?;

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Err(LinkifyError::EmptyBody(url.to_string()));
        }
        debug!("预览页面抓取成功：{}，{} 字节", target, body.len());

        let mut request_path = target.path().to_string();
        if let Some(query) = target.query() {
            request_path.push('?');
            request_path.push_str(query);
        }
        let ctx = RenderContext::content(request_path);
        self.preview(candidate, &body, &ctx)
    }
}
