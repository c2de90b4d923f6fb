//! FFmpeg 解封装/解码后端.
//!
//! 通过 ffmpeg-next 实现 [`MediaBackend`], [`Demuxer`] 与 [`Decoder`]:
//! - 视频帧统一转换为 YUV420P (swscale)
//! - 音频帧保持解码器原始格式, 由音频解码线程按输出参数重采样

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use avsync_core::demuxer::{AudioStreamParams, VideoStreamParams};
use avsync_core::{
    AudioFrame, ChannelLayout, Decoder, Demuxer, Frame, MediaBackend, MediaType, NOPTS_VALUE,
    Packet, PixelFormat, Rational, SampleFormat, StreamInfo, StreamParams, SyncError, SyncResult,
    VideoFrame,
};
use ffmpeg_next as ffmpeg;
use ffmpeg::format::{Pixel, Sample, sample};
use ffmpeg::software::scaling;
use log::{debug, info};

/// FFmpeg 后端
///
/// 打开输入时缓存各流的编解码参数, 打开解码器时按流索引取用.
/// 一个后端实例只服务一个输入.
pub struct FfmpegBackend {
    parameters: Mutex<HashMap<usize, ffmpeg::codec::Parameters>>,
}

impl FfmpegBackend {
    pub fn new() -> SyncResult<Self> {
        ffmpeg::init().map_err(|e| SyncError::Internal(format!("FFmpeg 初始化失败: {e}")))?;
        Ok(Self {
            parameters: Mutex::new(HashMap::new()),
        })
    }
}

impl MediaBackend for FfmpegBackend {
    fn open_input(&self, source: &str) -> SyncResult<Box<dyn Demuxer>> {
        let input = ffmpeg::format::input(&source)
            .map_err(|e| SyncError::Format(format!("无法打开输入 {source}: {e}")))?;

        let mut parameters = self
            .parameters
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        parameters.clear();

        let streams = input
            .streams()
            .map(|stream| {
                parameters.insert(stream.index(), stream.parameters());
                describe_stream(&stream)
            })
            .collect::<Vec<_>>();
        // SAFETY: 输入已打开, iformat 非空且在 `input` 存活期间有效
        let ts_discontinuities = unsafe {
            ((*(*input.as_ptr()).iformat).flags & ffmpeg::ffi::AVFMT_TS_DISCONT as i32) != 0
        };
        let format_name = input.format().name().to_string();
        debug!(
            "{source}: 格式 {format_name}, {} 路流, 时间戳不连续: {ts_discontinuities}",
            streams.len()
        );

        Ok(Box::new(FfmpegDemuxer {
            input,
            streams,
            format_name,
            ts_discontinuities,
        }))
    }

    fn open_decoder(&self, stream: &StreamInfo) -> SyncResult<Box<dyn Decoder>> {
        let parameters = self
            .parameters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&stream.index)
            .cloned()
            .ok_or_else(|| SyncError::Internal(format!("流 #{} 没有编解码参数", stream.index)))?;

        let context = ffmpeg::codec::context::Context::from_parameters(parameters)
            .map_err(codec_error)?;
        let inner = match stream.media_type {
            MediaType::Video => DecoderKind::Video {
                decoder: context.decoder().video().map_err(codec_error)?,
                scaler: None,
            },
            MediaType::Audio => DecoderKind::Audio {
                decoder: context.decoder().audio().map_err(codec_error)?,
            },
            other => {
                return Err(SyncError::Unsupported(format!("不支持解码{other}流")));
            }
        };
        let name = match &inner {
            DecoderKind::Video { decoder, .. } => decoder.codec().map(|c| c.name().to_string()),
            DecoderKind::Audio { decoder } => decoder.codec().map(|c| c.name().to_string()),
        }
        .unwrap_or_else(|| stream.codec_name.clone());

        Ok(Box::new(FfmpegDecoder { name, inner }))
    }
}

fn describe_stream(stream: &ffmpeg::format::stream::Stream<'_>) -> StreamInfo {
    let parameters = stream.parameters();
    let time_base = stream.time_base();
    // SAFETY: 参数指针在 `parameters` 存活期间有效, 只读取数值字段
    let raw = unsafe { &*parameters.as_ptr() };

    let (media_type, params) = match parameters.medium() {
        ffmpeg::media::Type::Video => {
            let mut rate = stream.avg_frame_rate();
            if rate.numerator() == 0 {
                rate = stream.rate();
            }
            (
                MediaType::Video,
                StreamParams::Video(VideoStreamParams {
                    width: u32::try_from(raw.width).unwrap_or(0),
                    height: u32::try_from(raw.height).unwrap_or(0),
                    // 解码输出统一转换为 YUV420P
                    pixel_format: PixelFormat::Yuv420p,
                    frame_rate: Rational::new(rate.numerator(), rate.denominator()),
                }),
            )
        }
        ffmpeg::media::Type::Audio => {
            let channels = u32::try_from(raw.ch_layout.nb_channels).unwrap_or(0);
            (
                MediaType::Audio,
                StreamParams::Audio(AudioStreamParams {
                    sample_rate: u32::try_from(raw.sample_rate).unwrap_or(0),
                    channel_layout: ChannelLayout::from_channels(channels),
                    // 解码前未知, 以解码帧为准
                    sample_format: SampleFormat::None,
                }),
            )
        }
        ffmpeg::media::Type::Subtitle => (MediaType::Subtitle, StreamParams::Other),
        _ => (MediaType::Data, StreamParams::Other),
    };

    StreamInfo {
        index: stream.index(),
        media_type,
        codec_name: parameters.id().name().to_string(),
        time_base: Rational::new(time_base.numerator(), time_base.denominator()),
        params,
    }
}

struct FfmpegDemuxer {
    input: ffmpeg::format::context::Input,
    streams: Vec<StreamInfo>,
    format_name: String,
    ts_discontinuities: bool,
}

impl Demuxer for FfmpegDemuxer {
    fn format_name(&self) -> &str {
        &self.format_name
    }

    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> SyncResult<Packet> {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => return Err(SyncError::Eof),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                return Err(SyncError::Again);
            }
            Err(e) => return Err(SyncError::Format(format!("读取数据包失败: {e}"))),
        }

        let index = packet.stream();
        let time_base = self
            .streams
            .iter()
            .find(|s| s.index == index)
            .map_or(Rational::UNDEFINED, |s| s.time_base);
        let mut out = Packet::from_data(index, packet.data().unwrap_or_default().to_vec());
        out.pts = packet.pts().unwrap_or(NOPTS_VALUE);
        out.dts = packet.dts().unwrap_or(NOPTS_VALUE);
        out.duration = packet.duration();
        out.time_base = time_base;
        out.is_keyframe = packet.is_key();
        Ok(out)
    }

    fn has_ts_discontinuities(&self) -> bool {
        self.ts_discontinuities
    }
}

/// swscale 上下文
struct Scaler {
    context: scaling::Context,
    format: Pixel,
    width: u32,
    height: u32,
}

// SAFETY: SwsContext 不与其他线程共享, 只随所属解码器在解码线程内使用
unsafe impl Send for Scaler {}

enum DecoderKind {
    Video {
        decoder: ffmpeg::decoder::Video,
        scaler: Option<Scaler>,
    },
    Audio {
        decoder: ffmpeg::decoder::Audio,
    },
}

struct FfmpegDecoder {
    name: String,
    inner: DecoderKind,
}

impl Decoder for FfmpegDecoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn send_packet(&mut self, packet: &Packet) -> SyncResult<()> {
        let decoder: &mut ffmpeg::decoder::Opened = match &mut self.inner {
            DecoderKind::Video { decoder, .. } => decoder,
            DecoderKind::Audio { decoder } => decoder,
        };
        if packet.is_flush() {
            return decoder.send_eof().map_err(decode_error);
        }

        let mut raw = ffmpeg::Packet::copy(&packet.data);
        raw.set_pts(known(packet.pts));
        raw.set_dts(known(packet.dts));
        raw.set_duration(packet.duration);
        decoder.send_packet(&raw).map_err(decode_error)
    }

    fn receive_frame(&mut self) -> SyncResult<Frame> {
        match &mut self.inner {
            DecoderKind::Video { decoder, scaler } => {
                let mut decoded = ffmpeg::frame::Video::empty();
                decoder.receive_frame(&mut decoded).map_err(decode_error)?;
                to_video_frame(&decoded, scaler).map(Frame::Video)
            }
            DecoderKind::Audio { decoder } => {
                let mut decoded = ffmpeg::frame::Audio::empty();
                decoder.receive_frame(&mut decoded).map_err(decode_error)?;
                to_audio_frame(&decoded).map(Frame::Audio)
            }
        }
    }
}

fn known(ts: i64) -> Option<i64> {
    (ts != NOPTS_VALUE).then_some(ts)
}

fn codec_error(e: ffmpeg::Error) -> SyncError {
    SyncError::Codec(e.to_string())
}

/// 映射解码器返回值: EAGAIN 表示需先取帧或送入更多数据
fn decode_error(e: ffmpeg::Error) -> SyncError {
    match e {
        ffmpeg::Error::Other { errno } if errno == ffmpeg::error::EAGAIN => SyncError::NeedMoreData,
        ffmpeg::Error::Eof => SyncError::Eof,
        other => SyncError::Codec(other.to_string()),
    }
}

fn to_video_frame(
    decoded: &ffmpeg::frame::Video,
    scaler: &mut Option<Scaler>,
) -> SyncResult<VideoFrame> {
    let (width, height) = (decoded.width(), decoded.height());
    let converted;
    let source = if decoded.format() == Pixel::YUV420P {
        decoded
    } else {
        let stale = scaler
            .as_ref()
            .is_none_or(|s| s.format != decoded.format() || s.width != width || s.height != height);
        if stale {
            info!("视频像素格式转换: {:?} {width}x{height} -> YUV420P", decoded.format());
            let context = scaling::Context::get(
                decoded.format(),
                width,
                height,
                Pixel::YUV420P,
                width,
                height,
                scaling::Flags::BILINEAR,
            )
            .map_err(codec_error)?;
            *scaler = Some(Scaler {
                context,
                format: decoded.format(),
                width,
                height,
            });
        }
        let Some(scaler) = scaler.as_mut() else {
            return Err(SyncError::Internal("缺少像素格式转换上下文".into()));
        };
        let mut out = ffmpeg::frame::Video::empty();
        scaler.context.run(decoded, &mut out).map_err(codec_error)?;
        converted = out;
        &converted
    };

    let mut frame = VideoFrame::new(width, height, PixelFormat::Yuv420p);
    for plane in 0..3 {
        let rows = if plane == 0 { height } else { height.div_ceil(2) } as usize;
        let stride = source.stride(plane);
        let bytes = source.data(plane);
        frame.data[plane] = bytes[..(stride * rows).min(bytes.len())].to_vec();
        frame.linesize[plane] = stride;
    }
    frame.pts = decoded.timestamp().or(decoded.pts()).unwrap_or(NOPTS_VALUE);
    Ok(frame)
}

fn to_audio_frame(decoded: &ffmpeg::frame::Audio) -> SyncResult<AudioFrame> {
    let sample_format = match decoded.format() {
        Sample::U8(sample::Type::Packed) => SampleFormat::U8,
        Sample::U8(sample::Type::Planar) => SampleFormat::U8p,
        Sample::I16(sample::Type::Packed) => SampleFormat::S16,
        Sample::I16(sample::Type::Planar) => SampleFormat::S16p,
        Sample::I32(sample::Type::Packed) => SampleFormat::S32,
        Sample::I32(sample::Type::Planar) => SampleFormat::S32p,
        Sample::F32(sample::Type::Packed) => SampleFormat::F32,
        Sample::F32(sample::Type::Planar) => SampleFormat::F32p,
        Sample::F64(sample::Type::Packed) => SampleFormat::F64,
        Sample::F64(sample::Type::Planar) => SampleFormat::F64p,
        other => {
            return Err(SyncError::Unsupported(format!("音频采样格式 {other:?}")));
        }
    };
    // SAFETY: 帧指针在 `decoded` 存活期间有效, 只读取声道数
    let channels = unsafe { (*decoded.as_ptr()).ch_layout.nb_channels };
    let channels = u32::try_from(channels)
        .ok()
        .filter(|&c| c > 0)
        .ok_or_else(|| SyncError::Codec(format!("无效的声道数: {channels}")))?;
    let nb_samples = u32::try_from(decoded.samples())
        .map_err(|_| SyncError::Codec("采样数溢出".into()))?;

    let mut frame = AudioFrame::new(
        nb_samples,
        decoded.rate(),
        sample_format,
        ChannelLayout::from_channels(channels),
    );
    let plane_len = if sample_format.is_planar() {
        sample_format.buffer_size(1, nb_samples)
    } else {
        sample_format.buffer_size(channels, nb_samples)
    };
    for (index, plane) in frame.data.iter_mut().enumerate() {
        let bytes = decoded.data(index);
        *plane = bytes[..plane_len.min(bytes.len())].to_vec();
    }
    frame.pts = decoded.timestamp().or(decoded.pts()).unwrap_or(NOPTS_VALUE);
    Ok(frame)
}
