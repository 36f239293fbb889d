use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use soundclash_core::{
    pcm::{decode_le_bytes, downmix_to_mono, encode_le_bytes},
    AppConfig, AudioEngine, ProcessingChain, SpectralAnalyzer,
};
use tracing_subscriber::EnvFilter;

fn main() -> soundclash_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = match cli.config.as_deref() {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    cli.stream.apply(&mut config);

    match cli.command {
        Commands::Process {
            input,
            output,
            speed,
            pitch,
            rate,
            formant,
            no_limiter,
            battle,
            bass_boost,
            compressor_ratio,
        } => {
            if let Some(speed) = speed {
                config.stretch.speed = speed;
            }
            if let Some(pitch) = pitch {
                config.stretch.pitch_semitones = pitch;
            }
            if let Some(rate) = rate {
                config.stretch.rate = rate;
            }
            config.stretch.formant_preservation |= formant;
            if no_limiter {
                config.limiter.enabled = false;
            }
            config.battle.enabled |= battle;
            if let Some(gain) = bass_boost {
                config.battle.bass_boost.gain_db = gain;
            }
            if let Some(ratio) = compressor_ratio {
                config.battle.compressor.ratio = ratio;
            }
            run_process(&config, &input, &output)
        }
        Commands::Analyze { input, output } => run_analyze(&config, &input, output.as_deref()),
        Commands::Live {
            input,
            report_every,
        } => run_live(&config, &input, report_every),
    }
}

fn run_process(config: &AppConfig, input: &Path, output: &Path) -> soundclash_core::Result<()> {
    let samples = read_pcm(input)?;
    let channels = usize::from(config.audio.channels.max(1));
    tracing::info!(
        ?input,
        ?output,
        frames = samples.len() / channels,
        speed = config.stretch.speed,
        pitch = config.stretch.pitch_semitones,
        rate = config.stretch.rate,
        battle = config.battle.enabled,
        "processing stream"
    );

    let mut chain = ProcessingChain::new();
    let stage = chain.configure(config.audio.format());
    if !stage.is_active() {
        tracing::warn!("stream format not supported, writing input unchanged");
    }
    chain.apply(&config.stretch, &config.limiter);
    config.battle.apply(&mut chain);

    let mut processed = Vec::with_capacity(samples.len());
    let block = config.audio.block_size.max(1) * channels;
    for chunk in samples.chunks(block) {
        chain.process(chunk, &mut processed);
    }
    chain.finish(&mut processed);

    std::fs::write(output, encode_le_bytes(&processed))?;
    tracing::info!(
        frames = processed.len() / channels,
        peak_reduction_db = chain.limiter().peak_reduction_db(),
        compressor_reduction_db = chain.compressor().gain_reduction_db(),
        "processing finished"
    );
    Ok(())
}

fn run_analyze(
    config: &AppConfig,
    input: &Path,
    output: Option<&Path>,
) -> soundclash_core::Result<()> {
    let samples = read_pcm(input)?;
    let mono = downmix_to_mono(&samples, usize::from(config.audio.channels.max(1)));
    tracing::info!(?input, frames = mono.len(), "analyzing track");

    let mut analyzer = SpectralAnalyzer::new();
    let result = analyzer.analyze_audio_file(&mono, config.audio.sample_rate)?;
    tracing::info!(
        bpm = result.bpm,
        key = result.key_label().as_deref().unwrap_or("unknown"),
        energy = result.energy,
        "analysis complete"
    );

    let json = serde_json::to_string_pretty(&result)?;
    match output {
        Some(path) => std::fs::write(path, json)?,
        None => println!("{json}"),
    }
    Ok(())
}

fn run_live(config: &AppConfig, input: &Path, report_every: usize) -> soundclash_core::Result<()> {
    let samples = read_pcm(input)?;
    let audio = AudioEngine::new(
        config.audio.sample_rate,
        config.audio.channels,
        &config.analysis,
    )?;
    let analysis = audio.start()?;

    let hop = config.analysis.hop_size.max(1) * usize::from(config.audio.channels.max(1));
    let report_every = report_every.max(1);
    let mut hops = 0;
    for chunk in samples.chunks(hop) {
        hops += audio.push_pcm(chunk)?;
        if hops >= report_every {
            hops = 0;
            let snapshot = analysis.snapshot()?;
            tracing::info!(
                hop = snapshot.hops,
                loudness_db = snapshot.loudness_db,
                peak_db = snapshot.peak_db,
                bpm = snapshot.tempo.bpm,
                key = ?snapshot.key.key.map(|key| key.name()),
                dominant = %snapshot.bands.dominant(),
                "live snapshot"
            );
        }
    }

    println!("{}", serde_json::to_string_pretty(&analysis.snapshot()?)?);
    Ok(())
}

fn read_pcm(path: &Path) -> soundclash_core::Result<Vec<i16>> {
    let bytes = std::fs::read(path)?;
    Ok(decode_le_bytes(&bytes))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Speed, pitch, limiting and music analysis for raw PCM", long_about = None)]
struct Cli {
    /// JSON configuration file; flags override its values.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    stream: StreamArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Layout of the raw signed 16-bit little-endian input.
#[derive(Args, Debug)]
struct StreamArgs {
    #[arg(long, global = true)]
    sample_rate: Option<u32>,
    #[arg(long, global = true)]
    channels: Option<u16>,
}

impl StreamArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(sample_rate) = self.sample_rate {
            config.audio.sample_rate = sample_rate;
        }
        if let Some(channels) = self.channels {
            config.audio.channels = channels;
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a stream through the speed/pitch stage and the limiter.
    Process {
        input: PathBuf,
        output: PathBuf,
        /// Playback speed, 0.1-8.
        #[arg(long)]
        speed: Option<f32>,
        /// Pitch shift in semitones, -24 to 24.
        #[arg(long, allow_hyphen_values = true)]
        pitch: Option<f32>,
        /// Vinyl-style rate, 0.1-8.
        #[arg(long)]
        rate: Option<f32>,
        #[arg(long)]
        formant: bool,
        #[arg(long)]
        no_limiter: bool,
        /// Run the bass boost and compressor ahead of the limiter.
        #[arg(long)]
        battle: bool,
        /// Bass shelf gain in dB, 0-24. Only heard in battle mode.
        #[arg(long)]
        bass_boost: Option<f32>,
        /// Compressor ratio, 1-20. Only heard in battle mode.
        #[arg(long)]
        compressor_ratio: Option<f32>,
    },
    /// Estimate tempo, key and spectral descriptors of a whole stream.
    Analyze {
        input: PathBuf,
        /// Write the JSON result here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Replay a stream through the live analyzer and log snapshots.
    Live {
        input: PathBuf,
        /// Hops between logged snapshots.
        #[arg(long, default_value_t = 86)]
        report_every: usize,
    },
}
