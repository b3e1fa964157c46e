//! 全局配置管理,存储引擎运行期的可配置项
//! 模块级业务设置（链接上限、词边界等）由规则库中的 Settings 保存，不在此处

/// 引擎配置
#[derive(Debug, Clone)]
pub struct LinkerConfig {
    // 超过该字节数的文档按段落切块处理
    pub chunk_threshold: usize,
    // 渲染缓存键前缀
    pub cache_prefix: String,
    // 远程预览超时配置（单位：秒）
    pub fetch_timeout: u64,
    // 是否启用详细日志
    pub verbose: bool,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            chunk_threshold: 50_000,
            cache_prefix: "rslinkify_render_".to_string(),
            fetch_timeout: 30,
            verbose: false,
        }
    }
}

/// 配置管理器
pub struct ConfigManager;

impl ConfigManager {
    /// 获取默认配置
    pub fn get_default() -> LinkerConfig {
        LinkerConfig::default()
    }

    /// 自定义配置
    pub fn custom() -> CustomConfigBuilder {
        CustomConfigBuilder::new()
    }
}

/// 配置构建器（便于自定义配置）
#[derive(Debug, Clone, Default)]
pub struct CustomConfigBuilder {
    config: LinkerConfig,
}

impl CustomConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: LinkerConfig::default(),
        }
    }

    pub fn chunk_threshold(mut self, bytes: usize) -> Self {
        // 过小的阈值会把每个段落切成独立块，下限 1KB
        self.config.chunk_threshold = bytes.max(1024);
        self
    }

    pub fn cache_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.cache_prefix = prefix.into();
        self
    }

    pub fn fetch_timeout(mut self, timeout: u64) -> Self {
        self.config.fetch_timeout = timeout;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    pub fn build(self) -> LinkerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_clamps_chunk_threshold() {
        let config = ConfigManager::custom()
            .chunk_threshold(10)
            .cache_prefix("x_")
            .build();
        assert_eq!(config.chunk_threshold, 1024);
        assert_eq!(config.cache_prefix, "x_");
        assert_eq!(config.fetch_timeout, 30);
    }
}
