//! # avsync-resample
//!
//! avsync 音频重采样库, 对标 FFmpeg 的 libswresample:
//! - 采样格式转换 (如 F32 平面 -> S16 交错)
//! - 声道布局转换 (如 5.1 -> 立体声)
//! - 采样率转换 (如 44100Hz -> 48000Hz, 线性插值)
//!
//! 输出总是交错格式. 线性插值在帧间保留源相位与上一帧末尾采样,
//! 累计输出数跟随 `total_in * dst_rate / src_rate`, 单帧输出不超过
//! `ceil(n * dst_rate / src_rate)`.

mod convert;

use avsync_core::{AudioFrame, ChannelLayout, SampleFormat, SyncError, SyncResult};
use log::debug;

pub use convert::{mix_channels, pack_samples, unpack_samples};

/// 重采样上下文
///
/// 配置一次后可多次复用. 只由其所属的音频解码线程持有和修改.
#[derive(Debug, Clone)]
pub struct ResampleContext {
    /// 源采样率
    pub src_sample_rate: u32,
    /// 源采样格式
    pub src_sample_format: SampleFormat,
    /// 源声道布局
    pub src_channel_layout: ChannelLayout,
    /// 目标采样率
    pub dst_sample_rate: u32,
    /// 目标采样格式 (交错)
    pub dst_sample_format: SampleFormat,
    /// 目标声道布局
    pub dst_channel_layout: ChannelLayout,
    /// 下一个输出采样的源位置, 以 `1 / dst_sample_rate` 源采样为单位,
    /// 相对于 `history` (存在时) 或当前帧首采样
    phase: u64,
    /// 上一帧最后一个采样 (已混音, 目标声道数), 首帧前为空
    history: Vec<f64>,
}

impl ResampleContext {
    /// 创建新的重采样上下文
    ///
    /// 参数顺序对标 `swr_alloc_set_opts`: 先输出参数, 后输入参数.
    pub fn new(
        dst_channel_layout: ChannelLayout,
        dst_sample_format: SampleFormat,
        dst_sample_rate: u32,
        src_channel_layout: ChannelLayout,
        src_sample_format: SampleFormat,
        src_sample_rate: u32,
    ) -> SyncResult<Self> {
        if src_sample_rate == 0 || dst_sample_rate == 0 {
            return Err(SyncError::Resample(format!(
                "无效的采样率: {src_sample_rate} -> {dst_sample_rate}"
            )));
        }
        if src_channel_layout.channels == 0 || dst_channel_layout.channels == 0 {
            return Err(SyncError::Resample("声道数不能为 0".to_string()));
        }
        if src_sample_format == SampleFormat::None || dst_sample_format == SampleFormat::None {
            return Err(SyncError::Resample("未指定采样格式".to_string()));
        }
        if dst_sample_format.is_planar() {
            return Err(SyncError::Resample(format!(
                "输出必须为交错格式: {dst_sample_format}"
            )));
        }

        debug!(
            "创建重采样上下文: {src_sample_rate}Hz/{src_channel_layout}/{src_sample_format} -> {dst_sample_rate}Hz/{dst_channel_layout}/{dst_sample_format}"
        );

        Ok(Self {
            src_sample_rate,
            src_sample_format,
            src_channel_layout,
            dst_sample_rate,
            dst_sample_format,
            dst_channel_layout,
            phase: 0,
            history: Vec::new(),
        })
    }

    /// 源参数是否与给定帧参数一致
    pub fn matches_source(
        &self,
        sample_format: SampleFormat,
        channel_layout: ChannelLayout,
        sample_rate: u32,
    ) -> bool {
        self.src_sample_format == sample_format
            && self.src_channel_layout == channel_layout
            && self.src_sample_rate == sample_rate
    }

    /// 一帧 `nb_samples` 个输入采样最多产出的输出采样数
    ///
    /// 帧间相位总落在 `[0, src)` 内, 故单帧输出不超过 `ceil(nb * dst / src)`.
    pub fn max_output_samples(&self, nb_samples: u32) -> u32 {
        (u64::from(nb_samples) * u64::from(self.dst_sample_rate))
            .div_ceil(u64::from(self.src_sample_rate)) as u32
    }

    /// 转换一帧音频
    ///
    /// # 参数
    /// - `planes`: 源数据 (平面格式每声道一个平面)
    /// - `nb_samples`: 每声道输入采样数
    /// - `out_capacity`: 输出缓冲区容量 (每声道采样数)
    ///
    /// # 返回
    /// (每声道输出采样数, 交错格式的输出字节)
    pub fn convert(
        &mut self,
        planes: &[Vec<u8>],
        nb_samples: u32,
        out_capacity: u32,
    ) -> SyncResult<(u32, Vec<u8>)> {
        let needed = self.max_output_samples(nb_samples);
        if needed > out_capacity {
            return Err(SyncError::Resample(format!(
                "输出缓冲区不足: 需要 {needed} 采样, 容量 {out_capacity}"
            )));
        }
        if nb_samples == 0 {
            return Ok((0, Vec::new()));
        }

        let src_channels = self.src_channel_layout.channels as usize;
        let dst_channels = self.dst_channel_layout.channels as usize;
        let nb = nb_samples as usize;

        let samples = unpack_samples(planes, self.src_sample_format, nb, src_channels)?;
        let mixed = mix_channels(&samples, nb, src_channels, dst_channels);
        let (resampled, out_nb) = if self.src_sample_rate != self.dst_sample_rate {
            self.resample_linear(mixed, dst_channels)
        } else {
            (mixed, nb)
        };

        let mut output = Vec::with_capacity(
            self.dst_sample_format
                .buffer_size(dst_channels as u32, out_capacity),
        );
        pack_samples(&resampled, self.dst_sample_format, &mut output)?;
        Ok((out_nb as u32, output))
    }

    /// 转换一个解码音频帧, 帧参数必须与上下文源参数一致
    pub fn convert_frame(&mut self, frame: &AudioFrame, out_capacity: u32) -> SyncResult<(u32, Vec<u8>)> {
        if !self.matches_source(frame.sample_format, frame.channel_layout, frame.sample_rate) {
            return Err(SyncError::Resample(format!(
                "帧参数与上下文不符: {}Hz/{}/{}",
                frame.sample_rate, frame.channel_layout, frame.sample_format
            )));
        }
        self.convert(&frame.data, frame.nb_samples, out_capacity)
    }

    /// 线性插值重采样 (f64 交错样本)
    ///
    /// 在上一帧末尾采样与本帧拼接的序列上插值, 本帧最后一个采样留作下一帧的插值起点.
    /// 相位以整数累加, 长时间播放不产生舍入漂移.
    fn resample_linear(&mut self, mixed: Vec<f64>, channels: usize) -> (Vec<f64>, usize) {
        let src = u64::from(self.src_sample_rate);
        let dst = u64::from(self.dst_sample_rate);

        let mut input = std::mem::take(&mut self.history);
        input.extend_from_slice(&mixed);
        let len = input.len() / channels;
        // 插值需要 idx0 + 1 < len
        let limit = (len as u64 - 1) * dst;

        let mut output = Vec::new();
        let mut out_nb = 0;
        while self.phase < limit {
            let idx0 = (self.phase / dst) as usize;
            let frac = (self.phase % dst) as f64 / dst as f64;
            for ch in 0..channels {
                let s0 = input[idx0 * channels + ch];
                let s1 = input[(idx0 + 1) * channels + ch];
                output.push(s0 + (s1 - s0) * frac);
            }
            out_nb += 1;
            self.phase += src;
        }

        self.phase -= limit;
        self.history = input.split_off((len - 1) * channels);
        (output, out_nb)
    }
}

/// 计算重采样输出缓冲区容量 (每声道采样数)
///
/// `ceil(nb_samples * out_rate / in_rate)` 是单帧线性插值输出数的上界,
/// 再叠加 `headroom` 作为额外余量.
pub fn output_capacity(nb_samples: u32, in_rate: u32, out_rate: u32, headroom: u32) -> u32 {
    if in_rate == 0 {
        return headroom;
    }
    let exact = (u64::from(nb_samples) * u64::from(out_rate)).div_ceil(u64::from(in_rate));
    u32::try_from(exact)
        .unwrap_or(u32::MAX)
        .saturating_add(headroom)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s16_mono(values: impl IntoIterator<Item = i16>) -> Vec<Vec<u8>> {
        vec![values.into_iter().flat_map(|v| v.to_le_bytes()).collect()]
    }

    #[test]
    fn test_create_rejects_invalid_params() {
        let zero_rate = ResampleContext::new(
            ChannelLayout::STEREO,
            SampleFormat::S16,
            48000,
            ChannelLayout::STEREO,
            SampleFormat::F32p,
            0,
        );
        assert!(matches!(zero_rate, Err(SyncError::Resample(_))));

        let planar_out = ResampleContext::new(
            ChannelLayout::STEREO,
            SampleFormat::S16p,
            48000,
            ChannelLayout::STEREO,
            SampleFormat::F32p,
            48000,
        );
        assert!(planar_out.is_err());
    }

    #[test]
    fn test_output_capacity_for_44100_to_48000() {
        let cap = output_capacity(1024, 44100, 48000, 256);
        // 1024 * 48000 / 44100 = 1114.5...
        assert!(cap as u64 >= 1024 * 48000 / 44100 + 256);
        assert_eq!(cap, 1115 + 256);
    }

    #[test]
    fn test_convert_never_exceeds_capacity() {
        let mut ctx = ResampleContext::new(
            ChannelLayout::STEREO,
            SampleFormat::S16,
            48000,
            ChannelLayout::STEREO,
            SampleFormat::S16,
            44100,
        )
        .unwrap();
        let input: Vec<u8> = (0..1024 * 2)
            .flat_map(|i| ((i % 200) as i16 * 50).to_le_bytes())
            .collect();
        let cap = output_capacity(1024, 44100, 48000, 256);
        let (nb, data) = ctx.convert(&[input], 1024, cap).unwrap();
        assert!(nb <= cap);
        assert!(nb <= ctx.max_output_samples(1024));
        assert_eq!(data.len(), nb as usize * 2 * 2);
    }

    #[test]
    fn test_convert_rejects_undersized_capacity() {
        let mut ctx = ResampleContext::new(
            ChannelLayout::MONO,
            SampleFormat::S16,
            48000,
            ChannelLayout::MONO,
            SampleFormat::S16,
            24000,
        )
        .unwrap();
        let err = ctx.convert(&s16_mono([0; 100]), 100, 150).unwrap_err();
        assert!(matches!(err, SyncError::Resample(_)));
    }

    #[test]
    fn test_planar_float_to_s16_stereo() {
        let mut ctx = ResampleContext::new(
            ChannelLayout::STEREO,
            SampleFormat::S16,
            44100,
            ChannelLayout::STEREO,
            SampleFormat::F32p,
            44100,
        )
        .unwrap();
        let mut frame = AudioFrame::new(2, 44100, SampleFormat::F32p, ChannelLayout::STEREO);
        frame.data[0] = [0.5f32, 0.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        frame.data[1] = [-0.5f32, 0.25].iter().flat_map(|v| v.to_le_bytes()).collect();

        let (nb, data) = ctx.convert_frame(&frame, 2).unwrap();
        assert_eq!(nb, 2);
        let values: Vec<i16> = data
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(values, vec![16384, -16384, 0, 8192]);
    }

    #[test]
    fn test_convert_frame_rejects_mismatched_source() {
        let mut ctx = ResampleContext::new(
            ChannelLayout::STEREO,
            SampleFormat::S16,
            48000,
            ChannelLayout::MONO,
            SampleFormat::S16,
            44100,
        )
        .unwrap();
        let frame = AudioFrame::new(10, 48000, SampleFormat::S16, ChannelLayout::MONO);
        assert!(ctx.convert_frame(&frame, 100).is_err());
    }

    #[test]
    fn test_downsample_linear_keeps_ramp_monotonic() {
        let mut ctx = ResampleContext::new(
            ChannelLayout::MONO,
            SampleFormat::S16,
            44100,
            ChannelLayout::MONO,
            SampleFormat::S16,
            48000,
        )
        .unwrap();
        let (nb, data) = ctx
            .convert(&s16_mono((0..100).map(|i| (i * 100) as i16)), 100, 200)
            .unwrap();
        // 首帧末尾采样留待下一帧插值
        assert_eq!(nb, (99u64 * 44100).div_ceil(48000) as u32);
        let values: Vec<i16> = data
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_output_total_follows_rate_ratio() {
        let mut ctx = ResampleContext::new(
            ChannelLayout::STEREO,
            SampleFormat::S16,
            48000,
            ChannelLayout::STEREO,
            SampleFormat::F32p,
            44100,
        )
        .unwrap();
        let cap = output_capacity(1024, 44100, 48000, 256);
        let mut frame = AudioFrame::new(1024, 44100, SampleFormat::F32p, ChannelLayout::STEREO);
        frame.data = vec![vec![0u8; 1024 * 4]; 2];

        let mut total_out = 0u64;
        for _ in 0..100 {
            let (nb, data) = ctx.convert_frame(&frame, cap).unwrap();
            assert!(nb <= ctx.max_output_samples(1024));
            assert_eq!(data.len(), nb as usize * 4);
            total_out += u64::from(nb);
        }
        let exact = 100.0 * 1024.0 * 48000.0 / 44100.0;
        let excess = total_out as f64 - exact;
        assert!(excess.abs() < 2.0, "累计输出 {total_out}, 理论 {exact:.2}");
    }

    #[test]
    fn test_interpolation_continues_across_frames() {
        let mut ctx = ResampleContext::new(
            ChannelLayout::MONO,
            SampleFormat::S16,
            48000,
            ChannelLayout::MONO,
            SampleFormat::S16,
            24000,
        )
        .unwrap();
        let mut values = Vec::new();
        for chunk in [0..10, 10..20] {
            let (_, data) = ctx
                .convert(&s16_mono(chunk.clone().map(|i| (i * 100) as i16)), 10, 64)
                .unwrap();
            values.extend(
                data.chunks_exact(2)
                    .map(|c| i16::from_le_bytes([c[0], c[1]])),
            );
        }
        // 2 倍上采样的斜坡在帧边界处仍按 50 递增, 末尾采样不被重复
        let expected: Vec<i16> = (0..values.len() as i16).map(|i| i * 50).collect();
        assert_eq!(values, expected);
        assert_eq!(values.len(), 38);
    }
}
