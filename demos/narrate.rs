use std::path::PathBuf;
use std::time::Instant;

use narrate_rs::{engines::CommandEngine, NarrationPipeline, NarrationRequest, NarratorConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let (Some(config_path), Some(document_path)) = (args.next(), args.next()) else {
        eprintln!("usage: narrate <config.json> <document> [voice] [speed]");
        std::process::exit(2);
    };
    let voice = args.next();
    let speed: f32 = match args.next() {
        Some(s) => s.parse()?,
        None => 1.0,
    };

    let config = NarratorConfig::from_json_file(&PathBuf::from(config_path))?;
    let pipeline = NarrationPipeline::new(config, CommandEngine::new())?;
    println!("Available voices: {:?}", pipeline.registry().list_voices());

    let document_path = PathBuf::from(document_path);
    let mut request = NarrationRequest::new(std::fs::read(&document_path)?).with_speed(speed);
    if let Some(name) = document_path.file_name().and_then(|n| n.to_str()) {
        request = request.with_document_name(name);
    }
    if let Some(voice) = voice {
        request = request.with_voice(voice);
    }

    let start = Instant::now();
    match pipeline.narrate(request) {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            println!(
                "Narrated {} words in {:.2?} -> {}",
                response.words.len(),
                start.elapsed(),
                response.artifact.file_path.display()
            );
            Ok(())
        }
        Err(err) => {
            eprintln!("{}", err.user_message());
            Err(err.into())
        }
    }
}
