use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use lookchill::conversation::{Actor, ConversationHistory, TranscriptLog};
use lookchill::recognition::GoogleSpeechRecognizer;
use lookchill::segmentation::split_sentences;
use lookchill::speech::{CoquiTts, GoogleTranslateTts, SpeechDispatcher, WhatlangIdentifier};
use lookchill::voice::{AudioCapture, AudioPlayback, AudioSink, Waveform, calculate_energy};
use lookchill::{BackgroundListener, Config, OllamaGenerator, ResponseGenerator, Session};

/// Lookchill - talk to a local model in Thai or English
#[derive(Parser)]
#[command(name = "lookchill", version, about)]
struct Cli {
    /// Config file (defaults to the user config dir)
    #[arg(short, long, env = "LOOKCHILL_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Show a live microphone volume meter
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,
    },
    /// Play a test tone
    TestSpeaker,
    /// Speak text through the speech dispatcher
    Speak {
        /// Text to speak
        text: String,
    },
    /// Typed chat with the model
    Chat,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,lookchill=info",
        1 => "info,lookchill=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(Command::TestMic { duration }) = cli.command {
        return test_mic(duration).await;
    }
    if let Some(Command::TestSpeaker) = cli.command {
        return test_speaker().await;
    }

    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Some(Command::Speak { text }) => speak(&config, &text).await,
        Some(Command::Chat) => chat(&config).await,
        _ => converse(config).await,
    }
}

/// Run the voice conversation until interrupted
async fn converse(config: Config) -> anyhow::Result<()> {
    let api_key = config
        .recognition
        .api_key
        .clone()
        .ok_or_else(|| anyhow::anyhow!("GOOGLE_SPEECH_API_KEY is required for recognition"))?;
    let recognizer = GoogleSpeechRecognizer::new(config.recognition.endpoint.clone(), api_key)?;

    let transcript = TranscriptLog::new(config.transcript_path());
    tracing::info!(path = %transcript.path().display(), "writing transcript");

    let session = Session::new(
        Arc::new(recognizer),
        Arc::new(generator(&config)),
        Arc::new(dispatcher(&config)?),
        config.recognition.languages.clone(),
    )
    .with_transcript(transcript)
    .with_console(true);

    let mut listener = BackgroundListener::new(config.listener.clone());
    listener.start(session).await?;

    println!("Listening... speak in any of: {}", language_list(&config));
    println!("Press Ctrl-C to quit.");

    tokio::signal::ctrl_c().await?;
    listener.stop();

    // Let the reply in progress finish; a second Ctrl-C abandons it
    tokio::select! {
        () = listener.join() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("abandoning in-flight processing");
        }
    }

    Ok(())
}

fn language_list(config: &Config) -> String {
    config
        .recognition
        .languages
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn generator(config: &Config) -> OllamaGenerator {
    OllamaGenerator::new(
        config.generation.url.clone(),
        config.generation.model.clone(),
        config.generation.system_prompt.clone(),
    )
}

fn dispatcher(config: &Config) -> anyhow::Result<SpeechDispatcher> {
    Ok(SpeechDispatcher::new(
        config.speech.clone(),
        Arc::new(WhatlangIdentifier),
        Arc::new(GoogleTranslateTts::new(config.speech.networked_endpoint.clone())),
        Arc::new(CoquiTts::new(config.speech.local_url.clone())),
        Arc::new(AudioPlayback::new()?),
    ))
}

/// Speak text sentence by sentence
async fn speak(config: &Config, text: &str) -> anyhow::Result<()> {
    let dispatcher = dispatcher(config)?;

    for sentence in split_sentences(text) {
        let outcome = dispatcher.speak(&sentence).await;
        println!("{sentence}  ->  {outcome:?}");
    }

    Ok(())
}

/// Typed chat, printing replies as they stream
async fn chat(config: &Config) -> anyhow::Result<()> {
    let generator = generator(config);
    let mut history = ConversationHistory::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Chatting with {} (type 'exit' to quit)", generator.model());

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.eq_ignore_ascii_case("exit") {
            println!("Bye!");
            break;
        }
        if input.is_empty() {
            continue;
        }

        history.push(Actor::User, input);

        let mut stream = generator.generate(history.turns());
        let mut reply = String::new();
        while let Some(fragment) = stream.next().await {
            print!("{fragment}");
            std::io::stdout().flush()?;
            reply.push_str(&fragment);
        }
        println!();

        history.push(Actor::Assistant, reply.trim());
    }

    Ok(())
}

/// Live microphone volume meter
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    println!("Sample rate: {} Hz", capture.sample_rate());
    println!("---");

    let ticks = duration * 10;
    for _ in 0..ticks {
        tokio::time::sleep(Duration::from_millis(100)).await;

        let samples = capture.take_buffer();
        let energy = calculate_energy(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0_f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        print!("\rRMS: {energy:.4} | Peak: {peak:.4} | [{meter}]");
        std::io::stdout().flush()?;

        if let Some(failure) = capture.failure() {
            anyhow::bail!("capture failed: {failure}");
        }
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Play a 440 Hz tone
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = AudioPlayback::new()?;

    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    println!("Playing {} samples at {sample_rate} Hz...", samples.len());
    playback.play(Waveform::new(samples, sample_rate)).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}
