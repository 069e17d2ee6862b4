use bytes::Bytes;
use media_types::ContainerKind;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{TranscodeEngine, TranscodeError};
use crate::EngineError;
use crate::assembler::AssembledTrack;

pub const OUTPUT_NAME: &str = "out.mp4";

/// Fallback ladder for producing an MP4, cheapest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemuxTier {
    /// Copy every stream unchanged.
    StreamCopy,
    /// Copy video, re-encode audio to AAC at 160k.
    ReencodeAudio,
    /// Re-encode video with x264 and audio to AAC at 128k.
    Reencode,
}

const FULL_LADDER: [RemuxTier; 3] = [
    RemuxTier::StreamCopy,
    RemuxTier::ReencodeAudio,
    RemuxTier::Reencode,
];
const COMPRESS_LADDER: [RemuxTier; 1] = [RemuxTier::Reencode];

/// Engine file name for a track, chosen by container.
pub fn input_name(track: &AssembledTrack, is_audio: bool) -> &'static str {
    match (is_audio, track.container) {
        (false, ContainerKind::FragmentedMp4) => "v.mp4",
        (false, ContainerKind::MpegTransportStream) => "v.ts",
        (true, ContainerKind::FragmentedMp4) => "a.mp4",
        (true, ContainerKind::MpegTransportStream) if track.is_raw_aac() => "a.aac",
        (true, ContainerKind::MpegTransportStream) => "a.ts",
    }
}

/// Transport streams and raw AAC lack reliable timestamps.
fn needs_genpts(name: &str) -> bool {
    name.ends_with(".ts") || name.ends_with(".aac")
}

/// Engine arguments for one tier, writing [`OUTPUT_NAME`].
pub fn tier_args(
    tier: RemuxTier,
    video_input: &str,
    audio_input: Option<&str>,
    compress: bool,
) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();

    for input in std::iter::once(video_input).chain(audio_input) {
        if needs_genpts(input) {
            args.extend(["-fflags".to_string(), "+genpts".to_string()]);
        }
        args.extend(["-i".to_string(), input.to_string()]);
    }

    if audio_input.is_some() {
        args.extend(["-map".to_string(), "0:v:0".to_string()]);
        args.extend(["-map".to_string(), "1:a:0".to_string()]);
    }

    match tier {
        RemuxTier::StreamCopy => {
            args.extend(["-c".to_string(), "copy".to_string()]);
        }
        RemuxTier::ReencodeAudio => {
            args.extend(["-c:v".to_string(), "copy".to_string()]);
            args.extend(["-c:a".to_string(), "aac".to_string()]);
            args.extend(["-b:a".to_string(), "160k".to_string()]);
        }
        RemuxTier::Reencode => {
            let crf = if compress { "23" } else { "20" };
            args.extend(["-c:v".to_string(), "libx264".to_string()]);
            args.extend(["-preset".to_string(), "medium".to_string()]);
            args.extend(["-crf".to_string(), crf.to_string()]);
            args.extend(["-c:a".to_string(), "aac".to_string()]);
            args.extend(["-b:a".to_string(), "128k".to_string()]);
        }
    }

    args.extend(["-movflags".to_string(), "+faststart".to_string()]);
    if audio_input.is_some() {
        args.push("-shortest".to_string());
    }
    args.push(OUTPUT_NAME.to_string());
    args
}

/// Produces an MP4 from a video track and optional audio track.
///
/// Tiers run cheapest first and stop at the first success; `compress` skips
/// straight to the re-encode tier. Engine files are removed afterwards.
pub async fn remux_to_mp4(
    engine: &dyn TranscodeEngine,
    video: &AssembledTrack,
    audio: Option<&AssembledTrack>,
    compress: bool,
    token: &CancellationToken,
) -> Result<Bytes, EngineError> {
    let video_name = input_name(video, false);
    let audio_name = audio.map(|a| input_name(a, true));

    let result = async {
        engine.write_input(video_name, video.bytes.clone()).await?;
        if let (Some(track), Some(name)) = (audio, audio_name) {
            engine.write_input(name, track.bytes.clone()).await?;
        }
        run_ladder(engine, video_name, audio_name, compress, token).await
    }
    .await;

    for name in std::iter::once(video_name)
        .chain(audio_name)
        .chain(std::iter::once(OUTPUT_NAME))
    {
        if let Err(e) = engine.delete_file(name).await {
            debug!(file = name, error = %e, "Engine file cleanup skipped");
        }
    }

    result
}

async fn run_ladder(
    engine: &dyn TranscodeEngine,
    video_name: &str,
    audio_name: Option<&str>,
    compress: bool,
    token: &CancellationToken,
) -> Result<Bytes, EngineError> {
    let ladder: &[RemuxTier] = if compress {
        &COMPRESS_LADDER
    } else {
        &FULL_LADDER
    };

    let mut last_error = None;
    for tier in ladder {
        if token.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let argv = tier_args(*tier, video_name, audio_name, compress);
        info!(?tier, video = video_name, audio = ?audio_name, "Running remux tier");
        match engine.run(&argv, token).await {
            Ok(()) => return Ok(engine.read_output(OUTPUT_NAME).await?),
            Err(TranscodeError::Failed { argv, cause }) => {
                warn!(?tier, %cause, "Remux tier failed");
                last_error = Some(EngineError::transcode_failed(argv, cause));
            }
            Err(other) => return Err(other.into()),
        }
    }

    Err(last_error.unwrap_or_else(|| EngineError::transcode_failed(Vec::new(), "no remux tier ran")))
}
