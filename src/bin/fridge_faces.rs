//! fridge_faces - manage enrolled face profiles from image files

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use fridge_kernel::face::FaceConfig;
use fridge_kernel::{FacialIdentifier, Frame};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Face profile store (JSON).
    #[arg(long, env = "FRIDGE_FACE_STORE", default_value = "fridge_faces.json")]
    store: PathBuf,
    /// Largest accepted match distance.
    #[arg(long, env = "FRIDGE_FACE_TOLERANCE", default_value_t = 0.6)]
    tolerance: f32,
    /// SeetaFace detector model (needs the face-rustface feature).
    #[arg(long)]
    detector_model: Option<PathBuf>,
    /// ONNX embedding model (needs the backend-tract feature).
    #[arg(long)]
    embedding_model: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or replace a profile from one image.
    Enroll {
        #[arg(long)]
        name: String,
        #[arg(long)]
        image: PathBuf,
        /// Defaults to the next free id.
        #[arg(long)]
        id: Option<u64>,
        /// Preferences as a JSON object.
        #[arg(long, value_name = "JSON")]
        prefs: Option<String>,
    },
    /// Add one more sample to an enrolled user.
    AddSample {
        #[arg(long)]
        id: u64,
        #[arg(long)]
        image: PathBuf,
    },
    /// Delete a profile.
    Remove {
        #[arg(long)]
        id: u64,
    },
    /// Print every profile's stats as JSON.
    List,
    /// Match every face in an image.
    Identify {
        #[arg(long)]
        image: PathBuf,
        /// Write a copy of the image with matched faces boxed.
        #[arg(long, value_name = "PATH")]
        annotated: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = FaceConfig {
        store_path: args.store.clone(),
        tolerance: args.tolerance,
        detector_model_path: args.detector_model.clone(),
        embedding_model_path: args.embedding_model.clone(),
        ..FaceConfig::default()
    };
    let mut faces = FacialIdentifier::from_config(&config);

    match args.command {
        Command::Enroll {
            name,
            image,
            id,
            prefs,
        } => {
            let preferences = parse_prefs(prefs.as_deref())?;
            let frame = load_frame(&image)?;
            let user_id = id.unwrap_or_else(|| faces.next_user_id());
            let profile = faces.enroll(user_id, &name, &frame, preferences)?;
            println!("enrolled {} as user {}", profile.display_name, profile.user_id);
        }
        Command::AddSample { id, image } => {
            let frame = load_frame(&image)?;
            let samples = faces.add_sample(id, &frame)?;
            println!("user {} now has {} sample(s)", id, samples);
        }
        Command::Remove { id } => {
            if !faces.remove(id) {
                return Err(anyhow!("user {} is not enrolled", id));
            }
            println!("removed user {}", id);
        }
        Command::List => {
            println!("{}", serde_json::to_string_pretty(&faces.stats())?);
        }
        Command::Identify { image, annotated } => {
            let frame = load_frame(&image)?;
            let matches = faces.identify_all(&frame);
            println!("{}", serde_json::to_string_pretty(&matches)?);
            if let Some(path) = annotated {
                faces.annotate(&frame, &matches).save_jpeg(&path)?;
                log::info!("annotated image written to {}", path.display());
            }
        }
    }
    Ok(())
}

fn load_frame(path: &Path) -> Result<Frame> {
    Frame::load("cli", path).with_context(|| format!("load image {}", path.display()))
}

fn parse_prefs(raw: Option<&str>) -> Result<Map<String, Value>> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(raw).context("--prefs must be JSON")? {
        Value::Object(map) => Ok(map),
        _ => Err(anyhow!("--prefs must be a JSON object")),
    }
}
