//! 采样解包/打包与声道混合.
//!
//! 所有转换都经过归一化的 f64 交错中间格式 (-1.0 ~ 1.0).

use avsync_core::{SampleFormat, SyncError, SyncResult};

/// 5.1 下混到立体声的 C/Ls/Rs 系数 (1/sqrt(2))
const DOWNMIX_COEF: f64 = 0.707_106_781_186_547_6;

/// 将一帧采样 (平面或交错) 解包为 f64 交错样本
///
/// # 参数
/// - `planes`: 平面格式每声道一个平面, 交错格式只有一个平面
/// - `format`: 源采样格式
/// - `nb_samples`: 每声道采样数
/// - `channels`: 声道数
pub fn unpack_samples(
    planes: &[Vec<u8>],
    format: SampleFormat,
    nb_samples: usize,
    channels: usize,
) -> SyncResult<Vec<f64>> {
    let bps = format.bytes_per_sample() as usize;
    if bps == 0 || channels == 0 {
        return Err(SyncError::InvalidArgument("无效的采样格式".to_string()));
    }

    let mut out = Vec::with_capacity(nb_samples * channels);
    if format.is_planar() {
        if planes.len() < channels {
            return Err(SyncError::InvalidArgument(format!(
                "平面数不足: 期望 {channels}, 实际 {}",
                planes.len()
            )));
        }
        for plane in &planes[..channels] {
            check_len(plane, nb_samples * bps)?;
        }
        for s in 0..nb_samples {
            for plane in &planes[..channels] {
                let off = s * bps;
                out.push(decode_sample(&plane[off..off + bps], format)?);
            }
        }
    } else {
        let plane = planes
            .first()
            .ok_or_else(|| SyncError::InvalidArgument("缺少采样数据".to_string()))?;
        check_len(plane, nb_samples * channels * bps)?;
        for chunk in plane[..nb_samples * channels * bps].chunks_exact(bps) {
            out.push(decode_sample(chunk, format)?);
        }
    }
    Ok(out)
}

/// 将 f64 交错样本打包为目标交错格式, 追加到 `output`
pub fn pack_samples(samples: &[f64], format: SampleFormat, output: &mut Vec<u8>) -> SyncResult<()> {
    if format.is_planar() {
        return Err(SyncError::Unsupported(format!(
            "输出必须为交错格式: {format}"
        )));
    }
    output.reserve(samples.len() * format.bytes_per_sample() as usize);
    for &s in samples {
        encode_sample(s, format, output)?;
    }
    Ok(())
}

/// 声道混合 (f64 交错样本)
///
/// 支持的转换:
/// - 单声道 → 多声道: 复制到所有声道
/// - 5.1 → 立体声: L' = L + 0.707*C + 0.707*Ls, R' = R + 0.707*C + 0.707*Rs
/// - 多声道 → 单声道: 取平均
/// - 其他: 对应声道直接映射, 多出的目标声道填静音
pub fn mix_channels(
    input: &[f64],
    nb_samples: usize,
    src_channels: usize,
    dst_channels: usize,
) -> Vec<f64> {
    if src_channels == dst_channels {
        return input.to_vec();
    }

    let mut output = Vec::with_capacity(nb_samples * dst_channels);
    for frame in input.chunks_exact(src_channels).take(nb_samples) {
        if src_channels == 6 && dst_channels == 2 {
            let (l, r, c, ls, rs) = (frame[0], frame[1], frame[2], frame[4], frame[5]);
            output.push((l + DOWNMIX_COEF * (c + ls)).clamp(-1.0, 1.0));
            output.push((r + DOWNMIX_COEF * (c + rs)).clamp(-1.0, 1.0));
            continue;
        }
        for dst_ch in 0..dst_channels {
            let val = if src_channels == 1 {
                frame[0]
            } else if dst_channels == 1 {
                frame.iter().sum::<f64>() / src_channels as f64
            } else if dst_ch < src_channels {
                frame[dst_ch]
            } else {
                0.0
            };
            output.push(val);
        }
    }
    output
}

fn check_len(data: &[u8], expected: usize) -> SyncResult<()> {
    if data.len() < expected {
        return Err(SyncError::InvalidArgument(format!(
            "数据不足: 期望 {expected} 字节, 实际 {} 字节",
            data.len()
        )));
    }
    Ok(())
}

/// 将原始字节解码为归一化 f64 样本
fn decode_sample(data: &[u8], format: SampleFormat) -> SyncResult<f64> {
    match format.to_interleaved() {
        SampleFormat::U8 => Ok((f64::from(data[0]) - 128.0) / 128.0),
        SampleFormat::S16 => Ok(f64::from(i16::from_le_bytes([data[0], data[1]])) / 32768.0),
        SampleFormat::S32 => {
            let v = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
            Ok(f64::from(v) / 2_147_483_648.0)
        }
        SampleFormat::F32 => Ok(f64::from(f32::from_le_bytes([
            data[0], data[1], data[2], data[3],
        ]))),
        SampleFormat::F64 => Ok(f64::from_le_bytes([
            data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
        ])),
        _ => Err(SyncError::Unsupported(format!("不支持的采样格式: {format}"))),
    }
}

/// 将归一化 f64 样本编码为原始字节
fn encode_sample(value: f64, format: SampleFormat, output: &mut Vec<u8>) -> SyncResult<()> {
    match format {
        SampleFormat::U8 => {
            output.push(((value * 128.0) + 128.0).round().clamp(0.0, 255.0) as u8);
        }
        SampleFormat::S16 => {
            let v = (value * 32768.0).round().clamp(-32768.0, 32767.0) as i16;
            output.extend_from_slice(&v.to_le_bytes());
        }
        SampleFormat::S32 => {
            let v = (value * 2_147_483_648.0)
                .round()
                .clamp(-2_147_483_648.0, 2_147_483_647.0) as i32;
            output.extend_from_slice(&v.to_le_bytes());
        }
        SampleFormat::F32 => output.extend_from_slice(&(value as f32).to_le_bytes()),
        SampleFormat::F64 => output.extend_from_slice(&value.to_le_bytes()),
        _ => return Err(SyncError::Unsupported(format!("不支持的采样格式: {format}"))),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpack_planar_f32_interleaves_channels() {
        let left: Vec<u8> = [0.5f32, -0.5].iter().flat_map(|v| v.to_le_bytes()).collect();
        let right: Vec<u8> = [0.25f32, -0.25].iter().flat_map(|v| v.to_le_bytes()).collect();
        let out = unpack_samples(&[left, right], SampleFormat::F32p, 2, 2).unwrap();
        assert_eq!(out, vec![0.5, 0.25, -0.5, -0.25]);
    }

    #[test]
    fn test_unpack_rejects_short_plane() {
        let err = unpack_samples(&[vec![0u8; 3]], SampleFormat::S16, 2, 1).unwrap_err();
        assert!(matches!(err, SyncError::InvalidArgument(_)));
    }

    #[test]
    fn test_pack_f64_to_s16_clamps() {
        let mut out = Vec::new();
        pack_samples(&[1.0, -1.0, 0.5], SampleFormat::S16, &mut out).unwrap();
        let values: Vec<i16> = out
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(values, vec![32767, -32768, 16384]);
    }

    #[test]
    fn test_pack_rejects_planar_output() {
        let mut out = Vec::new();
        assert!(pack_samples(&[0.0], SampleFormat::S16p, &mut out).is_err());
    }

    #[test]
    fn test_u8_silence_decodes_to_zero() {
        let out = unpack_samples(&[vec![128u8]], SampleFormat::U8, 1, 1).unwrap();
        assert_eq!(out, vec![0.0]);
    }

    #[test]
    fn test_mix_mono_to_stereo_and_back() {
        let stereo = mix_channels(&[0.25, -0.5], 2, 1, 2);
        assert_eq!(stereo, vec![0.25, 0.25, -0.5, -0.5]);
        let mono = mix_channels(&[0.2, 0.4], 1, 2, 1);
        assert!((mono[0] - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_downmix_51_to_stereo() {
        // L R C LFE Ls Rs
        let out = mix_channels(&[0.1, 0.2, 0.3, 0.9, 0.0, 0.1], 1, 6, 2);
        assert!((out[0] - (0.1 + DOWNMIX_COEF * 0.3)).abs() < 1e-12);
        assert!((out[1] - (0.2 + DOWNMIX_COEF * 0.4)).abs() < 1e-12);
    }
}
