use ffmpeg_next as ffmpeg;
use image::RgbImage;
use std::path::Path;
use tracing::{debug, info};

use crate::config::ResolutionTier;
use crate::error::{ExtractError, FrameReadError};
use crate::frame_source::{FrameSource, VideoHandle, VideoInfo};

/// 每次 seek 后最多读取的数据包数量，避免在损坏的流上无限解码
const MAX_PACKETS_PER_SEEK: usize = 600;

/// 一次 seek 之后解码循环结束的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanEnd {
    EndOfStream,
    PacketLimit,
}

impl ScanEnd {
    fn after(packets_read: usize) -> Self {
        if packets_read > MAX_PACKETS_PER_SEEK {
            ScanEnd::PacketLimit
        } else {
            ScanEnd::EndOfStream
        }
    }

    /// 只有真正读到文件末尾，解码器里剩下的帧才可能是目标帧；
    /// 数据包用尽时剩下的帧都早于目标时间点
    fn allows_drain(self) -> bool {
        self == ScanEnd::EndOfStream
    }
}

/// 基于 FFmpeg 的帧源
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegFrameSource;

impl FfmpegFrameSource {
    pub fn new() -> Self {
        Self
    }
}

impl FrameSource for FfmpegFrameSource {
    fn open(
        &self,
        path: &Path,
        tier: ResolutionTier,
    ) -> Result<Box<dyn VideoHandle>, ExtractError> {
        Ok(Box::new(FfmpegVideo::open(path, tier)?))
    }
}

/// 已打开的视频：封装输入上下文、解码器与缩放器
pub struct FfmpegVideo {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    time_base: ffmpeg::Rational,
    decoder: ffmpeg::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    info: VideoInfo,
}

impl FfmpegVideo {
    pub fn open(path: &Path, tier: ResolutionTier) -> Result<Self, ExtractError> {
        ffmpeg::init().map_err(|e| ExtractError::unreadable(format!("初始化 FFmpeg 失败: {e}")))?;

        // 只输出错误级别的 FFmpeg 日志
        unsafe {
            ffmpeg::sys::av_log_set_level(ffmpeg::sys::AV_LOG_ERROR as i32);
        }

        let input = ffmpeg::format::input(&path)
            .map_err(|e| ExtractError::unreadable(format!("无法打开视频文件 {}: {e}", path.display())))?;

        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| ExtractError::unreadable("未找到视频流"))?;
        let stream_index = stream.index();
        let time_base = stream.time_base();

        let fps = {
            let rate = stream.avg_frame_rate();
            if rate.denominator() > 0 && rate.numerator() > 0 {
                rate.numerator() as f64 / rate.denominator() as f64
            } else {
                30.0 // 默认值
            }
        };

        // 容器时长缺失时退回到流时长
        let mut duration = input.duration() as f64 / ffmpeg::ffi::AV_TIME_BASE as f64;
        if !(duration.is_finite() && duration > 0.0) && stream.duration() > 0 {
            duration = stream.duration() as f64 * f64::from(time_base);
        }
        if !(duration.is_finite() && duration > 0.0) {
            return Err(ExtractError::unreadable("视频时长为 0"));
        }

        let decoder_context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| ExtractError::unreadable(format!("无法创建解码器上下文: {e}")))?;
        let decoder = decoder_context
            .decoder()
            .video()
            .map_err(|e| ExtractError::unreadable(format!("无法创建视频解码器: {e}")))?;

        let (width, height) = target_size(decoder.width(), decoder.height(), tier);
        let scaler = ffmpeg::software::scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::format::Pixel::RGB24,
            width,
            height,
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| ExtractError::unreadable(format!("无法创建缩放器: {e}")))?;

        info!(
            "🎞️  [解码] 打开视频 {}: {}x{} -> {}x{}, {:.2} fps, 时长 {:.2}s",
            path.display(),
            decoder.width(),
            decoder.height(),
            width,
            height,
            fps,
            duration
        );

        Ok(Self {
            input,
            stream_index,
            time_base,
            decoder,
            scaler,
            info: VideoInfo {
                duration,
                fps,
                width,
                height,
            },
        })
    }
}

impl VideoHandle for FfmpegVideo {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn frame_at(&mut self, timestamp: f64) -> Result<RgbImage, FrameReadError> {
        let target = (timestamp * ffmpeg::ffi::AV_TIME_BASE as f64) as i64;

        // 向后查找最近的关键帧
        let ret = unsafe {
            ffmpeg::sys::av_seek_frame(
                self.input.as_mut_ptr(),
                -1,
                target,
                ffmpeg::sys::AVSEEK_FLAG_BACKWARD as i32,
            )
        };
        if ret < 0 {
            return Err(FrameReadError::new(timestamp, format!("seek 失败（错误码 {ret}）")));
        }
        self.decoder.flush();

        // 允许半帧的误差
        let tolerance = 0.5 / self.info.fps.max(1.0);
        let tb_num = self.time_base.numerator() as f64;
        let tb_den = self.time_base.denominator().max(1) as f64;

        let mut decoded = ffmpeg::frame::Video::empty();
        let mut packets_read = 0;
        let mut end = ScanEnd::EndOfStream;

        for (stream, packet) in self.input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }

            packets_read += 1;
            end = ScanEnd::after(packets_read);
            if end == ScanEnd::PacketLimit {
                break;
            }

            if self.decoder.send_packet(&packet).is_err() {
                continue;
            }

            while self.decoder.receive_frame(&mut decoded).is_ok() {
                let frame_time = decoded
                    .timestamp()
                    .map(|ts| ts as f64 * tb_num / tb_den)
                    .unwrap_or(timestamp);

                if frame_time + tolerance >= timestamp {
                    return convert_frame(&mut self.scaler, &decoded)
                        .map_err(|reason| FrameReadError::new(timestamp, reason));
                }
            }
        }

        if !end.allows_drain() {
            return Err(FrameReadError::new(
                timestamp,
                format!("读取 {MAX_PACKETS_PER_SEEK} 个数据包后仍未到达目标时间点"),
            ));
        }

        // 到达文件末尾，取出解码器中剩余的帧
        if self.decoder.send_eof().is_ok() {
            let mut last = None;
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                last = Some(decoded.clone());
            }
            if let Some(frame) = last {
                debug!("[解码] {:.2}s 处使用文件末尾的最后一帧", timestamp);
                return convert_frame(&mut self.scaler, &frame)
                    .map_err(|reason| FrameReadError::new(timestamp, reason));
            }
        }

        Err(FrameReadError::new(timestamp, "未找到目标时间点附近的帧"))
    }
}

/// 按分辨率档位计算输出尺寸：只缩小不放大，保持宽高比，宽高取偶数
fn target_size(width: u32, height: u32, tier: ResolutionTier) -> (u32, u32) {
    match tier.max_height() {
        Some(max_height) if height > max_height && height > 0 => {
            let scaled_width = (width as f64 * max_height as f64 / height as f64).round() as u32;
            ((scaled_width.max(2)) & !1, max_height & !1)
        }
        _ => (width, height),
    }
}

/// 将解码帧转换为 RGB 图像
fn convert_frame(
    scaler: &mut ffmpeg::software::scaling::Context,
    decoded: &ffmpeg::frame::Video,
) -> Result<RgbImage, String> {
    let mut rgb_frame = ffmpeg::frame::Video::empty();
    scaler
        .run(decoded, &mut rgb_frame)
        .map_err(|e| format!("像素格式转换失败: {e}"))?;

    let width = rgb_frame.width();
    let height = rgb_frame.height();
    let stride = rgb_frame.stride(0);
    let data = rgb_frame.data(0);
    let row_bytes = width as usize * 3;

    // RGB24 每像素 3 字节，每行可能带有对齐填充
    let mut buffer = Vec::with_capacity(row_bytes * height as usize);
    for y in 0..height as usize {
        let start = y * stride;
        let row = data
            .get(start..start + row_bytes)
            .ok_or_else(|| "帧数据长度不足".to_string())?;
        buffer.extend_from_slice(row);
    }

    RgbImage::from_raw(width, height, buffer).ok_or_else(|| "帧尺寸与数据不匹配".to_string())
}
