use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;

const INI_SECTION: &str = "slide_extract";
const ENV_PREFIX: &str = "SLIDE_EXTRACT_";

/// 读取视频时使用的分辨率档位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionTier {
    #[serde(rename = "360p")]
    P360,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "highest")]
    Highest,
}

impl ResolutionTier {
    /// 该档位允许的最大画面高度，`Highest` 不限制
    pub fn max_height(self) -> Option<u32> {
        match self {
            ResolutionTier::P360 => Some(360),
            ResolutionTier::P480 => Some(480),
            ResolutionTier::P720 => Some(720),
            ResolutionTier::P1080 => Some(1080),
            ResolutionTier::Highest => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResolutionTier::P360 => "360p",
            ResolutionTier::P480 => "480p",
            ResolutionTier::P720 => "720p",
            ResolutionTier::P1080 => "1080p",
            ResolutionTier::Highest => "highest",
        }
    }
}

impl fmt::Display for ResolutionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionTier {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "360p" | "360" => Ok(ResolutionTier::P360),
            "480p" | "480" => Ok(ResolutionTier::P480),
            "720p" | "720" => Ok(ResolutionTier::P720),
            "1080p" | "1080" => Ok(ResolutionTier::P1080),
            "highest" | "best" => Ok(ResolutionTier::Highest),
            other => Err(ConfigError::UnknownResolution(other.to_string())),
        }
    }
}

/// 导出文档格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Pdf,
    Html,
    Images,
}

impl ExportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Pdf => "pdf",
            ExportFormat::Html => "html",
            ExportFormat::Images => "images",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pdf" => Ok(ExportFormat::Pdf),
            "html" => Ok(ExportFormat::Html),
            "images" | "image" | "img" => Ok(ExportFormat::Images),
            other => Err(ConfigError::UnknownFormat(other.to_string())),
        }
    }
}

/// 幻灯片提取配置
#[derive(Debug, Clone, Serialize)]
pub struct ExtractConfig {
    /// 帧采样间隔（秒）
    pub frame_interval_seconds: f64,
    /// 判定为新幻灯片所需的最小差异度（0.0-1.0），值越大越严格
    pub similarity_threshold: f64,
    /// 分辨率档位
    pub resolution_tier: ResolutionTier,
    /// 导出格式
    pub export_format: ExportFormat,
    /// 批处理最大并发任务数
    pub max_concurrency: usize,
    /// 是否对幻灯片做 OCR
    pub enable_ocr: bool,
    /// OCR 语言（tesseract 语言代码）
    pub ocr_language: String,
    /// 跳帧比例超过该值时整段视频视为不可读
    pub max_skip_ratio: f64,
    /// 输出根目录
    pub output_dir: PathBuf,
    /// 下载视频的临时目录
    pub download_dir: PathBuf,
    /// 处理完成后是否保留下载的视频
    pub keep_downloads: bool,
    /// 批处理完成后的回调地址
    pub webhook_url: Option<String>,
    /// 日志级别（trace, debug, info, warn, error）
    pub log_level: String,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            frame_interval_seconds: 5.0,
            similarity_threshold: 0.2,
            resolution_tier: ResolutionTier::Highest,
            export_format: ExportFormat::Pdf,
            max_concurrency: 3,
            enable_ocr: false,
            ocr_language: "eng".to_string(),
            max_skip_ratio: 0.2,
            output_dir: PathBuf::from("slides"),
            download_dir: env::temp_dir().join("slide-extract"),
            keep_downloads: false,
            webhook_url: None,
            log_level: "info".to_string(),
        }
    }
}

impl ExtractConfig {
    /// 校验取值范围；非法配置属于调用方错误，必须在任务启动前拒绝
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.frame_interval_seconds.is_finite() && self.frame_interval_seconds > 0.0) {
            return Err(ConfigError::InvalidInterval(self.frame_interval_seconds));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::InvalidThreshold(self.similarity_threshold));
        }
        if self.max_concurrency < 1 {
            return Err(ConfigError::InvalidConcurrency(self.max_concurrency));
        }
        if !(0.0..=1.0).contains(&self.max_skip_ratio) {
            return Err(ConfigError::InvalidSkipRatio(self.max_skip_ratio));
        }
        Ok(())
    }
}

/// 可选的配置项集合，用于命令行、环境变量、配置文件与 HTTP 请求体
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    pub frame_interval_seconds: Option<f64>,
    pub similarity_threshold: Option<f64>,
    pub resolution_tier: Option<ResolutionTier>,
    pub export_format: Option<ExportFormat>,
    pub max_concurrency: Option<usize>,
    pub enable_ocr: Option<bool>,
    pub ocr_language: Option<String>,
    pub max_skip_ratio: Option<f64>,
    pub output_dir: Option<PathBuf>,
    pub download_dir: Option<PathBuf>,
    pub keep_downloads: Option<bool>,
    pub webhook_url: Option<String>,
    pub log_level: Option<String>,
}

impl ConfigOverrides {
    /// 以 `self` 为高优先级，缺失的项从 `lower` 补齐
    pub fn or(self, lower: ConfigOverrides) -> ConfigOverrides {
        ConfigOverrides {
            frame_interval_seconds: self.frame_interval_seconds.or(lower.frame_interval_seconds),
            similarity_threshold: self.similarity_threshold.or(lower.similarity_threshold),
            resolution_tier: self.resolution_tier.or(lower.resolution_tier),
            export_format: self.export_format.or(lower.export_format),
            max_concurrency: self.max_concurrency.or(lower.max_concurrency),
            enable_ocr: self.enable_ocr.or(lower.enable_ocr),
            ocr_language: self.ocr_language.or(lower.ocr_language),
            max_skip_ratio: self.max_skip_ratio.or(lower.max_skip_ratio),
            output_dir: self.output_dir.or(lower.output_dir),
            download_dir: self.download_dir.or(lower.download_dir),
            keep_downloads: self.keep_downloads.or(lower.keep_downloads),
            webhook_url: self.webhook_url.or(lower.webhook_url),
            log_level: self.log_level.or(lower.log_level),
        }
    }

    /// 缺失项使用默认值
    pub fn resolve(self) -> ExtractConfig {
        let defaults = ExtractConfig::default();
        ExtractConfig {
            frame_interval_seconds: self
                .frame_interval_seconds
                .unwrap_or(defaults.frame_interval_seconds),
            similarity_threshold: self
                .similarity_threshold
                .unwrap_or(defaults.similarity_threshold),
            resolution_tier: self.resolution_tier.unwrap_or(defaults.resolution_tier),
            export_format: self.export_format.unwrap_or(defaults.export_format),
            max_concurrency: self.max_concurrency.unwrap_or(defaults.max_concurrency),
            enable_ocr: self.enable_ocr.unwrap_or(defaults.enable_ocr),
            ocr_language: self.ocr_language.unwrap_or(defaults.ocr_language),
            max_skip_ratio: self.max_skip_ratio.unwrap_or(defaults.max_skip_ratio),
            output_dir: self.output_dir.unwrap_or(defaults.output_dir),
            download_dir: self.download_dir.unwrap_or(defaults.download_dir),
            keep_downloads: self.keep_downloads.unwrap_or(defaults.keep_downloads),
            webhook_url: self.webhook_url.filter(|url| !url.is_empty()),
            log_level: self.log_level.unwrap_or(defaults.log_level),
        }
    }
}

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从多个源加载配置，优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    ///
    /// 显式指定的配置文件必须存在；未指定时依次尝试默认位置。
    pub fn load(
        config_file: Option<&Path>,
        overrides: ConfigOverrides,
    ) -> Result<ExtractConfig, ConfigError> {
        // 1. 配置文件
        let file_config = match config_file {
            Some(path) => Self::load_from_file(path)?,
            None => match Self::default_config_path() {
                Some(path) => Self::load_from_file(&path)?,
                None => ConfigOverrides::default(),
            },
        };

        // 2. 环境变量
        let env_config = Self::load_from_env();

        // 3. 合并
        let config = overrides.or(env_config).or(file_config).resolve();
        config.validate()?;
        Ok(config)
    }

    /// 从环境变量加载配置，无法解析的值被忽略
    pub fn load_from_env() -> ConfigOverrides {
        fn var(key: &str) -> Option<String> {
            env::var(format!("{ENV_PREFIX}{key}"))
                .ok()
                .filter(|v| !v.is_empty())
        }

        ConfigOverrides {
            frame_interval_seconds: var("INTERVAL").and_then(|v| v.parse().ok()),
            similarity_threshold: var("THRESHOLD").and_then(|v| v.parse().ok()),
            resolution_tier: var("RESOLUTION").and_then(|v| v.parse().ok()),
            export_format: var("FORMAT").and_then(|v| v.parse().ok()),
            max_concurrency: var("MAX_CONCURRENCY").and_then(|v| v.parse().ok()),
            enable_ocr: var("OCR").and_then(|v| parse_bool(&v)),
            ocr_language: var("OCR_LANGUAGE"),
            max_skip_ratio: var("MAX_SKIP_RATIO").and_then(|v| v.parse().ok()),
            output_dir: var("OUTPUT_DIR").map(PathBuf::from),
            download_dir: var("DOWNLOAD_DIR").map(PathBuf::from),
            keep_downloads: var("KEEP_DOWNLOADS").and_then(|v| parse_bool(&v)),
            webhook_url: var("WEBHOOK_URL"),
            log_level: env::var("LOG_LEVEL").ok().or_else(|| var("LOG_LEVEL")),
        }
    }

    /// 从 INI 配置文件加载配置
    pub fn load_from_file(config_path: &Path) -> Result<ConfigOverrides, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::File {
                path: config_path.to_path_buf(),
                reason: "配置文件不存在".to_string(),
            });
        }

        let mut ini = configparser::ini::Ini::new();
        ini.load(config_path).map_err(|reason| ConfigError::File {
            path: config_path.to_path_buf(),
            reason,
        })?;

        // 优先读取 [slide_extract] 节，没有则回退到 [DEFAULT]
        let get = |key: &str| {
            ini.get(INI_SECTION, key)
                .or_else(|| ini.get("DEFAULT", key))
                .filter(|v| !v.trim().is_empty())
        };
        let malformed = |key: &str, value: String| ConfigError::Malformed {
            path: config_path.to_path_buf(),
            key: key.to_string(),
            value,
        };
        fn parsed<T: FromStr>(
            raw: Option<String>,
            on_error: impl FnOnce(String) -> ConfigError,
        ) -> Result<Option<T>, ConfigError> {
            match raw {
                Some(value) => value
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| on_error(value)),
                None => Ok(None),
            }
        }
        let flag = |key: &str| -> Result<Option<bool>, ConfigError> {
            match get(key) {
                Some(value) => parse_bool(&value)
                    .map(Some)
                    .ok_or_else(|| malformed(key, value)),
                None => Ok(None),
            }
        };

        Ok(ConfigOverrides {
            frame_interval_seconds: parsed(get("frame_interval_seconds"), |v| {
                malformed("frame_interval_seconds", v)
            })?,
            similarity_threshold: parsed(get("similarity_threshold"), |v| {
                malformed("similarity_threshold", v)
            })?,
            resolution_tier: parsed(get("resolution_tier"), |v| malformed("resolution_tier", v))?,
            export_format: parsed(get("export_format"), |v| malformed("export_format", v))?,
            max_concurrency: parsed(get("max_concurrency"), |v| malformed("max_concurrency", v))?,
            enable_ocr: flag("enable_ocr")?,
            ocr_language: get("ocr_language"),
            max_skip_ratio: parsed(get("max_skip_ratio"), |v| malformed("max_skip_ratio", v))?,
            output_dir: get("output_dir").map(PathBuf::from),
            download_dir: get("download_dir").map(PathBuf::from),
            keep_downloads: flag("keep_downloads")?,
            webhook_url: get("webhook_url"),
            log_level: ini
                .get("logging", "level")
                .or_else(|| get("log_level"))
                .filter(|v| !v.is_empty()),
        })
    }

    /// 默认位置中第一个存在的配置文件
    fn default_config_path() -> Option<PathBuf> {
        let mut candidates = vec![
            PathBuf::from("slide-extract.ini"),
            PathBuf::from(".slide-extract.ini"),
        ];
        if let Some(home) = env::var_os("HOME") {
            candidates.push(PathBuf::from(home).join(".slide-extract.ini"));
        }
        candidates.push(PathBuf::from("/etc/slide-extract.ini"));

        candidates.into_iter().find(|path| path.exists())
    }

    /// 创建默认配置文件
    pub fn create_default_config(config_path: &Path) -> Result<(), ConfigError> {
        let defaults = ExtractConfig::default();
        let mut ini = configparser::ini::Ini::new();
        let mut set = |key: &str, value: String| {
            ini.set(INI_SECTION, key, Some(value));
        };
        set(
            "frame_interval_seconds",
            defaults.frame_interval_seconds.to_string(),
        );
        set(
            "similarity_threshold",
            defaults.similarity_threshold.to_string(),
        );
        set("resolution_tier", defaults.resolution_tier.to_string());
        set("export_format", defaults.export_format.to_string());
        set("max_concurrency", defaults.max_concurrency.to_string());
        set("enable_ocr", defaults.enable_ocr.to_string());
        set("ocr_language", defaults.ocr_language.clone());
        set("max_skip_ratio", defaults.max_skip_ratio.to_string());
        set("output_dir", defaults.output_dir.display().to_string());
        set("keep_downloads", defaults.keep_downloads.to_string());
        set("webhook_url", String::new());
        ini.set("logging", "level", Some(defaults.log_level));

        ini.write(config_path).map_err(|err| ConfigError::File {
            path: config_path.to_path_buf(),
            reason: err.to_string(),
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
