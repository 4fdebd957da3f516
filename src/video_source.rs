use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ResolutionTier;
use crate::error::SourceError;

/// 可直接下载的视频文件扩展名
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mkv", "mov", "avi", "m4v"];

/// 视频获取组件：给定地址与分辨率档位，得到一个可解码的本地文件
pub trait VideoSource: Send + Sync {
    fn fetch(&self, url: &str, tier: ResolutionTier) -> Result<FetchedVideo, SourceError>;
}

/// 拉取到本地的视频文件
///
/// 下载得到的临时文件在 drop 时删除；本地文件保持不动。
#[derive(Debug)]
pub struct FetchedVideo {
    path: PathBuf,
    temporary: bool,
}

impl FetchedVideo {
    pub fn local(path: PathBuf) -> Self {
        Self {
            path,
            temporary: false,
        }
    }

    pub fn temporary(path: PathBuf) -> Self {
        Self {
            path,
            temporary: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 保留文件，不在 drop 时删除
    pub fn keep(mut self) -> Self {
        self.temporary = false;
        self
    }
}

impl Drop for FetchedVideo {
    fn drop(&mut self) {
        if !self.temporary {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("🧹 [拉取] 已删除临时视频: {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("⚠️  [拉取] 删除临时视频失败 {}: {}", self.path.display(), e),
        }
    }
}

/// 地址的分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorKind {
    /// 本地路径或 file:// 地址
    Local,
    /// 直接指向视频文件的 http(s) 链接
    DirectHttp,
    /// 其他网页地址，交给 yt-dlp
    WebPage,
}

impl LocatorKind {
    pub fn classify(locator: &str) -> Self {
        let lower = locator.trim().to_lowercase();
        if !(lower.starts_with("http://") || lower.starts_with("https://")) {
            return LocatorKind::Local;
        }

        let path = lower
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string();
        let is_video_file = Path::new(&path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| VIDEO_EXTENSIONS.contains(&ext))
            .unwrap_or(false);

        if is_video_file {
            LocatorKind::DirectHttp
        } else {
            LocatorKind::WebPage
        }
    }
}

/// 本地文件（普通路径或 file:// 地址）
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileSource;

impl VideoSource for LocalFileSource {
    fn fetch(&self, url: &str, _tier: ResolutionTier) -> Result<FetchedVideo, SourceError> {
        let path = PathBuf::from(url.strip_prefix("file://").unwrap_or(url));
        if !path.is_file() {
            return Err(SourceError::Unavailable(format!(
                "本地视频文件不存在: {}",
                path.display()
            )));
        }
        Ok(FetchedVideo::local(path))
    }
}

/// 通过 HTTP 直接下载视频文件
///
/// 阻塞客户端在工作线程内按次创建，不会落入异步运行时。
pub struct HttpVideoSource {
    download_dir: PathBuf,
}

impl HttpVideoSource {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
        }
    }

    fn client() -> Result<reqwest::blocking::Client, SourceError> {
        reqwest::blocking::Client::builder()
            .user_agent(concat!("slide-extract/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SourceError::Unsupported(format!("创建 HTTP 客户端失败: {e}")))
    }
}

impl VideoSource for HttpVideoSource {
    fn fetch(&self, url: &str, _tier: ResolutionTier) -> Result<FetchedVideo, SourceError> {
        let mut response = Self::client()?
            .get(url)
            .send()
            .map_err(|e| SourceError::Unavailable(format!("请求 {url} 失败: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Unavailable(format!("{url} 返回状态 {status}")));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_lowercase();
        if !(content_type.is_empty()
            || content_type.starts_with("video/")
            || content_type.starts_with("application/octet-stream"))
        {
            return Err(SourceError::Unsupported(format!(
                "{url} 的内容类型不是视频: {content_type}"
            )));
        }

        fs::create_dir_all(&self.download_dir)
            .map_err(|e| SourceError::Unavailable(format!("创建下载目录失败: {e}")))?;

        let extension = Path::new(url.split(['?', '#']).next().unwrap_or_default())
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("mp4")
            .to_lowercase();
        let path = self
            .download_dir
            .join(format!("{}.{}", uuid::Uuid::new_v4(), extension));
        // 先登记为临时文件，下载中途失败也会被清理
        let fetched = FetchedVideo::temporary(path);

        info!("⬇️  [拉取] 下载 {} -> {}", url, fetched.path().display());
        let mut file = fs::File::create(fetched.path())
            .map_err(|e| SourceError::Unavailable(format!("创建下载文件失败: {e}")))?;
        let bytes = response
            .copy_to(&mut file)
            .map_err(|e| SourceError::Unavailable(format!("下载 {url} 中断: {e}")))?;
        info!("✅ [拉取] 下载完成，{:.1} MB", bytes as f64 / 1_048_576.0);

        Ok(fetched)
    }
}

/// 通过 yt-dlp 下载网页视频
pub struct YtDlpSource {
    program: String,
    download_dir: PathBuf,
}

impl YtDlpSource {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: "yt-dlp".to_string(),
            download_dir: download_dir.into(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// 优先选择不超过档位高度的 mp4，没有时退回到最佳可用流
    pub fn format_selector(tier: ResolutionTier) -> String {
        match tier.max_height() {
            Some(height) => format!("best[height<={height}][ext=mp4]/best[ext=mp4]/best"),
            None => "best[ext=mp4]/best".to_string(),
        }
    }
}

impl VideoSource for YtDlpSource {
    fn fetch(&self, url: &str, tier: ResolutionTier) -> Result<FetchedVideo, SourceError> {
        fs::create_dir_all(&self.download_dir)
            .map_err(|e| SourceError::Unavailable(format!("创建下载目录失败: {e}")))?;

        let path = self
            .download_dir
            .join(format!("{}.mp4", uuid::Uuid::new_v4()));
        let fetched = FetchedVideo::temporary(path);

        info!("⬇️  [拉取] yt-dlp 下载 {}（档位 {}）", url, tier);
        let output = Command::new(&self.program)
            .arg("-f")
            .arg(Self::format_selector(tier))
            .arg("-o")
            .arg(fetched.path())
            .arg("--no-playlist")
            .arg("--quiet")
            .arg(url)
            .output()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => {
                    SourceError::Unsupported(format!("未找到 {}，无法下载网页视频", self.program))
                }
                _ => SourceError::Unavailable(format!("执行 {} 失败: {e}", self.program)),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SourceError::Unavailable(format!(
                "{} 退出码 {:?}: {}",
                self.program,
                output.status.code(),
                stderr.trim()
            )));
        }
        if !fetched.path().is_file() {
            return Err(SourceError::Unavailable(format!(
                "{} 未生成视频文件",
                self.program
            )));
        }

        info!("✅ [拉取] 下载完成: {}", fetched.path().display());
        Ok(fetched)
    }
}

/// 按地址类型分派到具体的视频源
pub struct DefaultVideoSource {
    local: LocalFileSource,
    http: HttpVideoSource,
    web: YtDlpSource,
    keep_downloads: bool,
}

impl DefaultVideoSource {
    pub fn new(download_dir: impl Into<PathBuf>, keep_downloads: bool) -> Self {
        let download_dir = download_dir.into();
        Self {
            local: LocalFileSource,
            http: HttpVideoSource::new(download_dir.clone()),
            web: YtDlpSource::new(download_dir),
            keep_downloads,
        }
    }
}

impl VideoSource for DefaultVideoSource {
    fn fetch(&self, url: &str, tier: ResolutionTier) -> Result<FetchedVideo, SourceError> {
        let fetched = match LocatorKind::classify(url) {
            LocatorKind::Local => return self.local.fetch(url, tier),
            LocatorKind::DirectHttp => self.http.fetch(url, tier)?,
            LocatorKind::WebPage => self.web.fetch(url, tier)?,
        };

        Ok(if self.keep_downloads {
            fetched.keep()
        } else {
            fetched
        })
    }
}
