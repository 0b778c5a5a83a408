//! Piper-backed synthesis engine.
//!
//! One subprocess per call: the voice model is passed with `--model`, text
//! goes to stdin, raw s16le mono PCM comes back on stdout. A failed call
//! therefore leaves no engine state behind to corrupt.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;
use unicode_segmentation::UnicodeSegmentation;

use rigel_protocol::{AudioFormat, VoiceInfo};

use crate::{AudioResult, Device, EngineError, EngineInfo, SynthesisEngine};

/// Piper emits signed 16-bit mono PCM with `--output-raw`.
const WIDTH_BITS: u16 = 16;
const CHANNELS: u16 = 1;
/// Sample rate assumed when a voice ships without its config sidecar.
const FALLBACK_RATE: u32 = 22050;

#[derive(Debug, Clone)]
pub struct PiperConfig {
    /// Piper executable; bare names resolve through PATH
    pub binary: PathBuf,
    /// Directory holding one `<voice>.onnx` model per voice
    pub voices_dir: PathBuf,
    /// Voice used when a request names none; first voice when unset
    pub default_voice: Option<String>,
    pub device: Device,
    /// Silence inserted between sentences, in milliseconds
    pub sentence_pause_ms: u64,
}

#[derive(Debug, Clone)]
struct Voice {
    model: PathBuf,
    rate: u32,
}

pub struct PiperEngine {
    config: PiperConfig,
    voices: BTreeMap<String, Voice>,
    default_voice: String,
}

impl PiperEngine {
    /// Scan the voices directory and build the voice table. Fails when the
    /// binary or the models are missing; fetching them is the operator's
    /// job, not this crate's.
    pub fn load(config: PiperConfig) -> Result<Self, EngineError> {
        if config.binary.components().count() > 1 && !config.binary.is_file() {
            return Err(EngineError::Load(format!(
                "piper binary not found at {}",
                config.binary.display()
            )));
        }

        let entries = std::fs::read_dir(&config.voices_dir).map_err(|e| {
            EngineError::Load(format!(
                "cannot read voices dir {}: {e}",
                config.voices_dir.display()
            ))
        })?;

        let mut voices = BTreeMap::new();
        for entry in entries {
            let path = entry?.path();
            if !path.extension().is_some_and(|ext| ext == "onnx") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let rate = sidecar_rate(&path).unwrap_or(FALLBACK_RATE);
            voices.insert(name.to_string(), Voice { model: path, rate });
        }

        if voices.is_empty() {
            return Err(EngineError::Load(format!(
                "no .onnx voice models in {}",
                config.voices_dir.display()
            )));
        }

        let default_voice = match &config.default_voice {
            Some(name) if voices.contains_key(name) => name.clone(),
            Some(name) => return Err(EngineError::VoiceNotFound(name.clone())),
            None => voices
                .keys()
                .next()
                .cloned()
                .ok_or_else(|| EngineError::Load("voice table is empty".into()))?,
        };

        debug!(
            voices = voices.len(),
            default = %default_voice,
            "loaded piper voice table"
        );

        Ok(Self {
            config,
            voices,
            default_voice,
        })
    }

    fn lookup(&self, requested: Option<&str>) -> Result<(&str, &Voice), EngineError> {
        let name = requested.unwrap_or(&self.default_voice);
        match self.voices.get_key_value(name) {
            Some((name, voice)) => Ok((name, voice)),
            None => Err(EngineError::VoiceNotFound(name.to_string())),
        }
    }

    fn run_piper(&self, voice: &Voice, text: &str) -> Result<Vec<u8>, EngineError> {
        let mut cmd = Command::new(&self.config.binary);
        cmd.arg("--model")
            .arg(&voice.model)
            .arg("--output-raw")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if self.config.device == Device::Gpu {
            cmd.arg("--cuda");
        }

        let mut child = cmd.spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes())?;
            stdin.write_all(b"\n")?;
        }
        // stdin is closed here; piper exits after draining it
        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Synthesis(format!(
                "piper exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

impl SynthesisEngine for PiperEngine {
    fn info(&self) -> EngineInfo {
        let voices = self
            .voices
            .keys()
            .map(|name| VoiceInfo {
                name: name.clone(),
                description: None,
                languages: language_of(name).into_iter().collect(),
            })
            .collect();
        let rate = self
            .voices
            .get(&self.default_voice)
            .map(|voice| voice.rate)
            .unwrap_or(FALLBACK_RATE);
        EngineInfo {
            voices,
            format: AudioFormat {
                rate,
                width: WIDTH_BITS,
                channels: CHANNELS,
            },
        }
    }

    fn synthesize(&mut self, text: &str, voice: Option<&str>) -> Result<AudioResult, EngineError> {
        let (name, voice) = self.lookup(voice)?;
        let format = AudioFormat {
            rate: voice.rate,
            width: WIDTH_BITS,
            channels: CHANNELS,
        };

        let mut pcm = Vec::new();
        for (i, sentence) in split_sentences(text).iter().enumerate() {
            if i > 0 {
                let gap = pause_len(voice.rate, self.config.sentence_pause_ms);
                pcm.resize(pcm.len() + gap, 0);
            }
            debug!(voice = name, chars = sentence.len(), "synthesizing sentence");
            pcm.extend_from_slice(&self.run_piper(voice, sentence)?);
        }

        Ok(AudioResult { pcm, format })
    }
}

/// Sentence units for per-sentence synthesis, empty segments dropped.
fn split_sentences(text: &str) -> Vec<&str> {
    text.split_sentence_bounds()
        .map(str::trim)
        .filter(|sentence| !sentence.is_empty())
        .collect()
}

/// Bytes of silence covering `ms` milliseconds at the given rate.
fn pause_len(rate: u32, ms: u64) -> usize {
    let frames = rate as u64 * ms / 1000;
    frames as usize * (WIDTH_BITS as usize / 8) * CHANNELS as usize
}

/// Piper voices are conventionally named `<ll>_<RR>-<name>-<quality>`;
/// lift the language tag when the name follows that shape.
fn language_of(name: &str) -> Option<String> {
    let prefix = name.split('-').next()?;
    let (lang, region) = prefix.split_once('_')?;
    let shaped = lang.len() == 2
        && region.len() == 2
        && lang.bytes().all(|b| b.is_ascii_lowercase())
        && region.bytes().all(|b| b.is_ascii_uppercase());
    shaped.then(|| format!("{lang}-{region}"))
}

/// The `<model>.onnx.json` sidecar carries the voice's output sample rate.
fn sidecar_rate(model: &Path) -> Option<u32> {
    let mut sidecar = model.as_os_str().to_os_string();
    sidecar.push(".json");
    let raw = std::fs::read_to_string(sidecar).ok()?;
    let config: serde_json::Value = serde_json::from_str(&raw).ok()?;
    config
        .get("audio")?
        .get("sample_rate")?
        .as_u64()
        .map(|rate| rate as u32)
}
