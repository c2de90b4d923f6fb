//! SDL2 音频设备与视频窗口.
//!
//! SDL 音频设备只能在持有 SDL 上下文的主线程上打开, 而打开请求来自音频解码线程.
//! 两者通过 mpsc 请求/应答桥接: [`SdlAudioSink`] 发送请求并等待应答,
//! [`AudioHost`] 在主线程事件循环中处理请求. 设备打开后由 SDL 音频线程拉取数据.

use std::sync::mpsc::{self, Receiver, Sender};

use avsync_core::{PixelFormat, SampleFormat, SyncError, SyncResult, VideoFrame};
use avsync_engine::{AudioRenderer, AudioSink, AudioSpec, VideoSurface};
use log::{debug, info};
use sdl2::AudioSubsystem;
use sdl2::audio::{AudioCallback, AudioDevice, AudioSpecDesired};
use sdl2::pixels::{Color, PixelFormatEnum};
use sdl2::rect::Rect;
use sdl2::render::{Canvas, Texture, TextureCreator};
use sdl2::video::{Window, WindowContext};

/// 音频线程发往主线程的请求
pub enum AudioRequest {
    Open {
        wanted: AudioSpec,
        renderer: AudioRenderer,
        reply: Sender<SyncResult<AudioSpec>>,
    },
    Close,
}

/// 交给播放器的音频设备句柄
pub struct SdlAudioSink {
    requests: Sender<AudioRequest>,
}

impl AudioSink for SdlAudioSink {
    fn open(&mut self, wanted: &AudioSpec, renderer: AudioRenderer) -> SyncResult<AudioSpec> {
        let (reply, obtained) = mpsc::channel();
        self.requests
            .send(AudioRequest::Open {
                wanted: *wanted,
                renderer,
                reply,
            })
            .map_err(|_| SyncError::Device("音频设备宿主已退出".into()))?;
        // 宿主退出时丢弃未处理的请求, 应答通道随之断开
        obtained
            .recv()
            .map_err(|_| SyncError::Device("音频设备宿主已退出".into()))?
    }

    fn close(&mut self) {
        self.requests.send(AudioRequest::Close).ok();
    }
}

/// SDL 音频回调, 转发给 [`AudioRenderer`]
pub struct RendererCallback {
    renderer: AudioRenderer,
    scratch: Vec<u8>,
}

impl AudioCallback for RendererCallback {
    type Channel = i16;

    fn callback(&mut self, out: &mut [i16]) {
        self.scratch.resize(out.len() * 2, 0);
        self.renderer.fill(&mut self.scratch);
        for (sample, bytes) in out.iter_mut().zip(self.scratch.chunks_exact(2)) {
            *sample = i16::from_le_bytes([bytes[0], bytes[1]]);
        }
    }
}

/// 主线程上的音频设备宿主
pub struct AudioHost {
    subsystem: AudioSubsystem,
    requests: Receiver<AudioRequest>,
    device: Option<AudioDevice<RendererCallback>>,
}

impl AudioHost {
    pub fn new(subsystem: AudioSubsystem) -> (Self, SdlAudioSink) {
        let (tx, rx) = mpsc::channel();
        (
            Self {
                subsystem,
                requests: rx,
                device: None,
            },
            SdlAudioSink { requests: tx },
        )
    }

    /// 处理所有待处理的请求, 每个事件循环 tick 调用一次
    pub fn serve(&mut self) {
        while let Ok(request) = self.requests.try_recv() {
            match request {
                AudioRequest::Open {
                    wanted,
                    renderer,
                    reply,
                } => {
                    let result = self.open_device(&wanted, renderer);
                    reply.send(result).ok();
                }
                AudioRequest::Close => {
                    if self.device.take().is_some() {
                        debug!("音频设备已关闭");
                    }
                }
            }
        }
    }

    fn open_device(&mut self, wanted: &AudioSpec, renderer: AudioRenderer) -> SyncResult<AudioSpec> {
        if wanted.format != SampleFormat::S16 {
            return Err(SyncError::Unsupported(format!(
                "音频设备采样格式: {}",
                wanted.format
            )));
        }
        let desired = AudioSpecDesired {
            freq: Some(
                i32::try_from(wanted.freq)
                    .map_err(|_| SyncError::Device(format!("采样率过大: {}", wanted.freq)))?,
            ),
            channels: Some(
                u8::try_from(wanted.channels)
                    .map_err(|_| SyncError::Device(format!("声道数过多: {}", wanted.channels)))?,
            ),
            samples: Some(wanted.samples),
        };

        let device = self
            .subsystem
            .open_playback(None, &desired, |_| RendererCallback {
                renderer,
                scratch: Vec::new(),
            })
            .map_err(SyncError::Device)?;
        let spec = device.spec();
        let obtained = AudioSpec {
            freq: u32::try_from(spec.freq)
                .map_err(|_| SyncError::Device(format!("设备采样率无效: {}", spec.freq)))?,
            channels: u16::from(spec.channels),
            format: SampleFormat::S16,
            samples: spec.samples,
            size: spec.size,
        };
        info!(
            "音频设备已打开: {}Hz, {}ch, {} 采样, 缓冲区 {} 字节",
            obtained.freq, obtained.channels, obtained.samples, obtained.size
        );
        device.resume();
        self.device = Some(device);
        Ok(obtained)
    }

    /// 关闭设备并断开请求通道, 正在等待应答的打开请求随即失败
    pub fn shutdown(self) {
        drop(self.device);
        drop(self.requests);
    }
}

/// 按宽高比缩放并居中的目标区域
pub fn fit_rect(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Rect {
    if src_w == 0 || src_h == 0 {
        return Rect::new(0, 0, dst_w.max(1), dst_h.max(1));
    }
    let scale = f64::min(
        f64::from(dst_w) / f64::from(src_w),
        f64::from(dst_h) / f64::from(src_h),
    );
    let w = ((f64::from(src_w) * scale).round() as u32).max(1);
    let h = ((f64::from(src_h) * scale).round() as u32).max(1);
    let x = (dst_w.saturating_sub(w) / 2) as i32;
    let y = (dst_h.saturating_sub(h) / 2) as i32;
    Rect::new(x, y, w, h)
}

struct StreamingTexture<'a> {
    texture: Texture<'a>,
    format: PixelFormatEnum,
    width: u32,
    height: u32,
}

/// SDL 窗口呈现表面
pub struct SdlSurface<'a> {
    canvas: Canvas<Window>,
    creator: &'a TextureCreator<WindowContext>,
    texture: Option<StreamingTexture<'a>>,
}

impl<'a> SdlSurface<'a> {
    pub fn new(canvas: Canvas<Window>, creator: &'a TextureCreator<WindowContext>) -> Self {
        Self {
            canvas,
            creator,
            texture: None,
        }
    }

    /// 按视频尺寸调整窗口
    pub fn resize(&mut self, width: u32, height: u32) -> SyncResult<()> {
        self.canvas
            .window_mut()
            .set_size(width, height)
            .map_err(|e| SyncError::Device(e.to_string()))?;
        debug!("窗口尺寸: {width}x{height}");
        Ok(())
    }

    /// 取得尺寸与格式匹配的纹理, 不匹配时重建
    fn texture_for(
        &mut self,
        format: PixelFormatEnum,
        width: u32,
        height: u32,
    ) -> SyncResult<&mut Texture<'a>> {
        let stale = self
            .texture
            .as_ref()
            .is_none_or(|t| t.format != format || t.width != width || t.height != height);
        if stale {
            let texture = self
                .creator
                .create_texture_streaming(format, width, height)
                .map_err(|e| SyncError::Device(e.to_string()))?;
            debug!("创建纹理: {format:?} {width}x{height}");
            self.texture = Some(StreamingTexture {
                texture,
                format,
                width,
                height,
            });
        }
        self.texture
            .as_mut()
            .map(|t| &mut t.texture)
            .ok_or_else(|| SyncError::Internal("纹理缺失".into()))
    }
}

impl VideoSurface for SdlSurface<'_> {
    fn present(&mut self, frame: &VideoFrame) -> SyncResult<()> {
        let (width, height) = (frame.width, frame.height);
        match frame.pixel_format {
            PixelFormat::Yuv420p => {
                let texture = self.texture_for(PixelFormatEnum::IYUV, width, height)?;
                texture
                    .update_yuv(
                        None,
                        &frame.data[0],
                        frame.linesize[0],
                        &frame.data[1],
                        frame.linesize[1],
                        &frame.data[2],
                        frame.linesize[2],
                    )
                    .map_err(|e| SyncError::Device(e.to_string()))?;
            }
            PixelFormat::Rgb24 | PixelFormat::Rgba => {
                let format = if frame.pixel_format == PixelFormat::Rgb24 {
                    PixelFormatEnum::RGB24
                } else {
                    PixelFormatEnum::RGBA32
                };
                let texture = self.texture_for(format, width, height)?;
                texture
                    .update(None, &frame.data[0], frame.linesize[0])
                    .map_err(|e| SyncError::Device(e.to_string()))?;
            }
            other => {
                return Err(SyncError::Unsupported(format!("无法显示像素格式 {other}")));
            }
        }

        let (out_w, out_h) = self.canvas.output_size().map_err(SyncError::Device)?;
        let target = fit_rect(width, height, out_w, out_h);
        self.canvas.set_draw_color(Color::BLACK);
        self.canvas.clear();
        if let Some(t) = &self.texture {
            self.canvas
                .copy(&t.texture, None, Some(target))
                .map_err(SyncError::Device)?;
        }
        self.canvas.present();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_rect_letterboxes_wide_video() {
        let rect = fit_rect(1920, 1080, 800, 800);
        assert_eq!((rect.width(), rect.height()), (800, 450));
        assert_eq!((rect.x(), rect.y()), (0, 175));
    }

    #[test]
    fn test_fit_rect_scales_up_to_window() {
        let rect = fit_rect(320, 240, 640, 480);
        assert_eq!(rect, Rect::new(0, 0, 640, 480));
    }
}
