use std::io::Cursor;

/// Size of the canonical PCM WAV header written by hound
pub const WAV_HEADER_LEN: usize = 44;

const BYTES_PER_SAMPLE: usize = 2;

/// Encode f32 samples as mono 16-bit PCM WAV bytes.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> anyhow::Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    // Pre-allocate: header + 2 bytes per sample
    let estimated_size = WAV_HEADER_LEN + samples.len() * BYTES_PER_SAMPLE;
    let mut cursor = Cursor::new(Vec::<u8>::with_capacity(estimated_size));

    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| anyhow::anyhow!("wav write err: {e}"))?;

        const I16_MAX_F32: f32 = i16::MAX as f32;
        for &s in samples {
            let v = (s.clamp(-1.0, 1.0) * I16_MAX_F32) as i16;
            writer
                .write_sample(v)
                .map_err(|e| anyhow::anyhow!("wav sample err: {e}"))?;
        }
        writer
            .finalize()
            .map_err(|e| anyhow::anyhow!("wav finalize err: {e}"))?;
    }

    Ok(cursor.into_inner())
}

/// Header facts about a stored WAV file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavInfo {
    pub sample_rate: u32,
    pub sample_count: u64,
}

/// Read sample rate and frame count from a WAV header without decoding audio.
pub fn inspect_wav(bytes: &[u8]) -> anyhow::Result<WavInfo> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| anyhow::anyhow!("wav header err: {e}"))?;
    Ok(WavInfo {
        sample_rate: reader.spec().sample_rate,
        sample_count: reader.duration() as u64,
    })
}

/// Frame count guessed from the byte length of a mono 16-bit file.
pub fn estimate_sample_count(byte_len: usize) -> u64 {
    (byte_len.saturating_sub(WAV_HEADER_LEN) / BYTES_PER_SAMPLE) as u64
}
