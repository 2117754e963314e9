use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::Path;
use tracing::info;

use super::store::BackingStore;

/// Samples moved per read while converting
const COPY_BLOCK: usize = 4096;

/// Write the store's samples to a 16-bit PCM WAV file.
///
/// Returns the number of frames exported.
pub fn export_wav(store: &BackingStore, path: impl AsRef<Path>) -> Result<u64> {
    let path = path.as_ref();
    let format = store.format();

    let spec = WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut reader = store.open_reader()?;
    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create WAV file: {:?}", path))?;

    let mut buf = vec![0i16; COPY_BLOCK];
    let mut samples = 0u64;
    loop {
        let n = reader.read_frames(&mut buf)?;
        if n == 0 {
            break;
        }
        for &sample in &buf[..n] {
            writer
                .write_sample(sample)
                .context("Failed to write sample to WAV")?;
        }
        samples += n as u64;
    }

    writer.finalize().context("Failed to finalize WAV file")?;

    let frames = samples / format.channels.max(1) as u64;
    info!(
        "Exported {} frames ({:.1}s) to {}",
        frames,
        format.duration_of_frames(frames).as_secs_f64(),
        path.display()
    );

    Ok(frames)
}

/// Replace the store's contents with the samples of a WAV file.
///
/// The file must already match the store format (16-bit integer samples, same
/// rate and channel count); no resampling is done. Returns the number of
/// frames imported.
pub fn import_wav(store: &BackingStore, path: impl AsRef<Path>) -> Result<u64> {
    let path = path.as_ref();
    info!("Opening audio file: {}", path.display());

    let reader = WavReader::open(path).context("Failed to open WAV file")?;
    let spec = reader.spec();
    let format = store.format();

    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        anyhow::bail!(
            "Expected 16-bit integer PCM, got {}-bit {:?}",
            spec.bits_per_sample,
            spec.sample_format
        );
    }
    if spec.sample_rate != format.sample_rate || spec.channels != format.channels {
        anyhow::bail!(
            "Resampling not supported. Expected {}Hz {}ch, got {}Hz {}ch",
            format.sample_rate,
            format.channels,
            spec.sample_rate,
            spec.channels
        );
    }

    let mut writer = store.create()?;
    let mut block = Vec::with_capacity(COPY_BLOCK);
    for sample in reader.into_samples::<i16>() {
        block.push(sample.context("Failed to read audio samples")?);
        if block.len() == COPY_BLOCK {
            writer.append(&block)?;
            block.clear();
        }
    }
    writer.append(&block)?;

    let bytes = writer.finish()?;
    let frames = format.frames_in_bytes(bytes);

    info!(
        "Audio file imported: {:.1}s, {}Hz, {} channels, {} frames",
        format.duration_of_frames(frames).as_secs_f64(),
        spec.sample_rate,
        spec.channels,
        frames
    );

    Ok(frames)
}
