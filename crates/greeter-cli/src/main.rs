use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use greeter_hw::Camera;
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "greeter", about = "Greeter kiosk CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new profile from a photo
    Enroll {
        /// Display name
        #[arg(short, long)]
        name: String,
        /// Role: staff or student
        #[arg(short, long, default_value = "staff")]
        role: String,
        #[arg(short, long, default_value = "")]
        designation: String,
        #[arg(short, long, default_value = "")]
        qualification: String,
        /// Photo containing the person's face
        #[arg(short, long)]
        photo: Option<PathBuf>,
    },
    /// Replace the photo and face data of a profile
    Reenroll {
        /// Profile ID
        id: String,
        /// New photo
        photo: PathBuf,
    },
    /// List roster profiles
    List,
    /// Remove a profile
    Remove {
        /// Profile ID to remove
        id: String,
    },
    /// Show kiosk status
    Status,
    /// Clear the current detection
    Clear,
    /// Run camera diagnostics (bypasses the daemon)
    Test {
        /// V4L2 device path
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Number of frames to capture
        #[arg(short, long, default_value_t = 5)]
        frames: usize,
        /// Save the last frame as PNG
        #[arg(short, long)]
        save: Option<PathBuf>,
    },
}

#[zbus::proxy(
    interface = "org.greeter.Kiosk1",
    default_service = "org.greeter.Kiosk1",
    default_path = "/org/greeter/Kiosk1"
)]
trait Kiosk {
    fn status(&self) -> zbus::Result<String>;
    fn list_profiles(&self) -> zbus::Result<String>;
    fn enroll(
        &self,
        name: &str,
        role: &str,
        designation: &str,
        qualification: &str,
        photo_path: &str,
    ) -> zbus::Result<String>;
    fn reenroll(&self, id: &str, photo_path: &str) -> zbus::Result<String>;
    fn remove_profile(&self, id: &str) -> zbus::Result<bool>;
    fn clear_detection(&self) -> zbus::Result<()>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Enroll {
            name,
            role,
            designation,
            qualification,
            photo,
        } => {
            let photo = photo.map(absolute).transpose()?;
            let photo = photo
                .as_deref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            let reply = connect()
                .await?
                .enroll(&name, &role, &designation, &qualification, &photo)
                .await?;
            print_outcome("Enrolled", &reply)?;
        }
        Commands::Reenroll { id, photo } => {
            let photo = absolute(photo)?;
            let reply = connect().await?.reenroll(&id, &photo.to_string_lossy()).await?;
            print_outcome("Updated", &reply)?;
        }
        Commands::List => {
            let profiles: Vec<Value> = serde_json::from_str(&connect().await?.list_profiles().await?)?;
            if profiles.is_empty() {
                println!("No profiles enrolled");
            }
            for p in &profiles {
                println!(
                    "{}  {:<24} {:<8} {}{}",
                    p["id"].as_str().unwrap_or("?"),
                    p["name"].as_str().unwrap_or("?"),
                    p["role_type"].as_str().unwrap_or("?"),
                    p["designation"].as_str().unwrap_or(""),
                    if p["has_face"].as_bool() == Some(true) { "" } else { "  (no face data)" },
                );
            }
        }
        Commands::Remove { id } => {
            if connect().await?.remove_profile(&id).await? {
                println!("Removed profile {id}");
            } else {
                println!("No profile with id {id}");
            }
        }
        Commands::Status => {
            let status: Value = serde_json::from_str(&connect().await?.status().await?)?;
            print_status(&status);
        }
        Commands::Clear => {
            connect().await?.clear_detection().await?;
            println!("Detection cleared");
        }
        Commands::Test { device, frames, save } => {
            camera_test(&device, frames, save.as_deref())?;
        }
    }

    Ok(())
}

async fn connect() -> Result<KioskProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    KioskProxy::new(&conn)
        .await
        .context("greeterd is not reachable on the session bus")
}

/// The daemon resolves paths in its own working directory.
fn absolute(path: PathBuf) -> Result<PathBuf> {
    std::fs::canonicalize(&path).with_context(|| format!("cannot read {}", path.display()))
}

fn print_outcome(verb: &str, reply: &str) -> Result<()> {
    let outcome: Value = serde_json::from_str(reply)?;
    let profile = &outcome["profile"];
    println!(
        "{verb} {} ({})",
        profile["name"].as_str().unwrap_or("?"),
        profile["id"].as_str().unwrap_or("?")
    );
    if let Some(warning) = outcome["warning"].as_str() {
        println!("Warning: {warning}");
    }
    Ok(())
}

fn print_status(status: &Value) {
    println!("greeterd {}", status["version"].as_str().unwrap_or("?"));
    println!(
        "  profiles:   {} ({} with face data)",
        status["profiles"], status["enrolled_faces"]
    );
    match status["models"]["state"].as_str() {
        Some("failed") => println!(
            "  models:     failed: {}",
            status["models"]["error"].as_str().unwrap_or("unknown error")
        ),
        Some(state) => println!("  models:     {state}"),
        None => println!("  models:     unknown"),
    }
    match status["camera_error"].as_str() {
        Some(err) => println!("  camera:     {err}"),
        None => println!("  camera:     ok"),
    }
    println!(
        "  detection:  {}",
        if status["detection_armed"].as_bool() == Some(true) { "running" } else { "not running" }
    );
    println!("  in view:    {} face(s)", status["faces_in_view"]);
    if let Some(text) = status["banner"]["text"].as_str() {
        println!("  banner:     {text}");
    }
    let active = &status["active"];
    if active.is_null() {
        println!("  Awaiting detection...");
    } else {
        println!("  Welcoming:  {}", active["name"].as_str().unwrap_or("?"));
        println!("              {}", active["role_type"].as_str().unwrap_or(""));
        for key in ["designation", "qualification"] {
            if let Some(v) = active[key].as_str().filter(|v| !v.is_empty()) {
                println!("              {v}");
            }
        }
    }
}

/// Capture a few frames directly from the camera and report what the kiosk would see.
fn camera_test(device: &str, frames: usize, save: Option<&Path>) -> Result<()> {
    println!("Running camera diagnostics...");

    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for d in &devices {
        println!("  {}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }

    let mut camera = match Camera::open(device, 720, 560) {
        Ok(camera) => camera,
        Err(e) => {
            println!("{}", e.user_message());
            return Err(e).with_context(|| format!("failed to open {device}"));
        }
    };
    println!(
        "Opened {} at {}x{} ({:?})",
        camera.device_path, camera.width, camera.height, camera.fourcc
    );

    let mut last = None;
    for i in 0..frames.max(1) {
        let frame = camera.capture_frame()?;
        println!(
            "  frame {i}: seq={} brightness={:.1}{}",
            frame.sequence,
            frame.avg_brightness(),
            if frame.is_dark(0.95) { " (dark)" } else { "" }
        );
        last = Some(frame);
    }

    if let (Some(path), Some(frame)) = (save, last) {
        frame
            .image
            .save_with_format(path, image::ImageFormat::Png)
            .with_context(|| format!("failed to save {}", path.display()))?;
        println!("Saved last frame to {}", path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_enroll() {
        let cli = Cli::try_parse_from([
            "greeter", "enroll", "-n", "Ada Lovelace", "-r", "student", "-p", "ada.jpg",
        ])
        .unwrap();
        match cli.command {
            Commands::Enroll { name, role, designation, photo, .. } => {
                assert_eq!(name, "Ada Lovelace");
                assert_eq!(role, "student");
                assert_eq!(designation, "");
                assert_eq!(photo, Some(PathBuf::from("ada.jpg")));
            }
            _ => panic!("expected enroll"),
        }
    }

    #[test]
    fn test_parse_test_defaults() {
        let cli = Cli::try_parse_from(["greeter", "test"]).unwrap();
        match cli.command {
            Commands::Test { device, frames, save } => {
                assert_eq!(device, "/dev/video0");
                assert_eq!(frames, 5);
                assert!(save.is_none());
            }
            _ => panic!("expected test"),
        }
    }
}
