//! enroll - Build the known-face store from a directory of reference photos.
//!
//! Every `.jpg`/`.jpeg`/`.png` file in `--dir` becomes one identity, named
//! after the file stem. The result replaces the store at `--out`.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use facegate::config::RecognitionSettings;
use facegate::enroll::{enroll_directory, list_photos, EnrollOutcome};
use facegate::faces::{builtin_registry, RecognitionCapability};
use facegate::ui::Ui;

#[derive(Parser, Debug)]
#[command(author, version, about = "Encode reference photos into a face store")]
struct Args {
    /// Directory of reference photos.
    #[arg(long, default_value = "known_faces")]
    dir: PathBuf,

    /// Face store to write.
    #[arg(long, env = "FACEGATE_STORE_PATH", default_value = "face_encodings.json")]
    out: PathBuf,

    /// Recognizer backend used to compute embeddings.
    #[arg(long, env = "FACEGATE_BACKEND", default_value = "cpu")]
    backend: String,

    /// Match tolerance recorded by the backend.
    #[arg(long, default_value_t = 0.6)]
    tolerance: f32,

    /// ONNX model for the tract backend.
    #[arg(long)]
    model_path: Option<PathBuf>,

    /// Output mode: auto, plain, pretty.
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let ui = Ui::from_args(Some(&args.ui), std::io::stderr().is_terminal());

    let settings = RecognitionSettings {
        backend: args.backend.trim().to_lowercase(),
        store_path: args.out.clone(),
        tolerance: args.tolerance,
        model_path: args.model_path.clone(),
        model_width: 112,
        model_height: 112,
    };

    let mut recognizer = {
        let _stage = ui.stage("Load recognizer");
        let mut registry = builtin_registry(&settings)?;
        registry.take_for_capability(RecognitionCapability::Enroll)?
    };

    let total = list_photos(&args.dir)?.len();
    if total == 0 {
        return Err(anyhow!("no photos found in {}", args.dir.display()));
    }

    let report = {
        let _stage = ui.stage("Encode photos");
        let progress = ui.progress(total as u64);
        enroll_directory(recognizer.as_mut(), &args.dir, |outcome| match outcome {
            EnrollOutcome::Encoded(name) => {
                progress.item(&format!("Encoded {} successfully!", name))
            }
            EnrollOutcome::NoFace(path) => progress.item(&format!(
                "No face detected in {}. Skipping.",
                path.display()
            )),
            EnrollOutcome::Unreadable { path, reason } => progress.item(&format!(
                "Could not read {}: {}. Skipping.",
                path.display(),
                reason
            )),
        })?
    };

    {
        let _stage = ui.stage("Write face store");
        report.faces.save(&args.out)?;
    }
    eprintln!(
        "{} of {} photos enrolled into {}",
        report.faces.len(),
        total,
        args.out.display()
    );
    Ok(())
}
