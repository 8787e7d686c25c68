use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use zbus::proxy;

#[proxy(
    interface = "org.likeness.Likeness1",
    default_service = "org.likeness.Likeness1",
    default_path = "/org/likeness/Likeness1"
)]
trait Likeness {
    fn enroll(&self, name: &str, image: &[u8]) -> zbus::Result<String>;
    fn recognize(&self, image: &[u8]) -> zbus::Result<String>;
    fn delete_sample(&self, key: &str) -> zbus::Result<bool>;
    fn statistics(&self) -> zbus::Result<String>;
    fn list_samples(&self) -> zbus::Result<String>;
    fn reload(&self) -> zbus::Result<u32>;
    fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "likeness", about = "Likeness face identity CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    /// Print raw JSON replies
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a face sample for a person
    Enroll {
        /// Identity name (e.g., "Alice")
        name: String,
        /// Image containing exactly one face
        image: PathBuf,
    },
    /// Identify every face in an image
    Recognize {
        image: PathBuf,
    },
    /// Remove an enrolled sample
    Delete {
        /// Storage key reported by `enroll` or `list`
        key: String,
    },
    /// List enrolled samples
    List,
    /// Show gallery statistics
    Stats,
    /// Rebuild the daemon's gallery from storage
    Reload,
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    tracing::debug!(system = cli.system, "connecting to likenessd");

    let connection = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("connecting to D-Bus")?;
    let proxy = LikenessProxy::new(&connection)
        .await
        .context("is likenessd running?")?;

    match cli.command {
        Commands::Enroll { name, image } => {
            let reply = proxy.enroll(&name, &read_image(&image)?).await?;
            show(cli.json, &reply, print_enrollment)?;
        }
        Commands::Recognize { image } => {
            let reply = proxy.recognize(&read_image(&image)?).await?;
            show(cli.json, &reply, print_recognition)?;
        }
        Commands::Delete { key } => {
            if proxy.delete_sample(&key).await? {
                println!("Deleted {key}");
            } else {
                println!("No sample with key {key}");
            }
        }
        Commands::List => {
            let reply = proxy.list_samples().await?;
            show(cli.json, &reply, print_samples)?;
        }
        Commands::Stats => {
            let reply = proxy.statistics().await?;
            show(cli.json, &reply, print_statistics)?;
        }
        Commands::Reload => {
            let samples = proxy.reload().await?;
            println!("Reloaded {samples} samples");
        }
        Commands::Status => {
            let reply = proxy.status().await?;
            let value: Value = serde_json::from_str(&reply)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }

    Ok(())
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn show(raw: bool, reply: &str, pretty: fn(&Value)) -> Result<()> {
    if raw {
        println!("{reply}");
    } else {
        pretty(&serde_json::from_str(reply).context("daemon sent malformed JSON")?);
    }
    Ok(())
}

fn print_enrollment(v: &Value) {
    println!("{}", v["message"].as_str().unwrap_or_default());
    if let Some(key) = v["key"].as_str() {
        println!("key: {key}");
    }
}

fn print_recognition(v: &Value) {
    let faces = v["results"].as_array().map(Vec::as_slice).unwrap_or_default();
    println!(
        "{} face(s) in {:.3}s",
        faces.len(),
        v["processing_time"].as_f64().unwrap_or_default()
    );
    for face in faces {
        let loc = &face["face_location"];
        println!(
            "  {:<24} {:>6.2}%  at ({}, {}) {}x{}",
            face["name"].as_str().unwrap_or("Unknown"),
            face["confidence"].as_f64().unwrap_or_default(),
            loc["x"],
            loc["y"],
            loc["width"],
            loc["height"],
        );
    }
}

fn print_samples(v: &Value) {
    let samples = v.as_array().map(Vec::as_slice).unwrap_or_default();
    if samples.is_empty() {
        println!("No samples enrolled");
        return;
    }
    for s in samples {
        println!(
            "{:<48} {:<24} {}",
            s["key"].as_str().unwrap_or_default(),
            s["identity"].as_str().unwrap_or_default(),
            s["created_at"].as_str().unwrap_or_default(),
        );
    }
}

fn print_statistics(v: &Value) {
    println!("samples:              {}", v["total_samples"]);
    println!("identities:           {}", v["identity_count"]);
    println!("multi-sample people:  {}", v["people_with_multiple_encodings"]);
    if let Some(per) = v["samples_per_identity"].as_object() {
        for (name, count) in per {
            println!("  {name:<24} {count}");
        }
    }
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
        let cli = Cli::try_parse_from(["likeness", "--json", "enroll", "Alice", "alice.png"]).unwrap();
        assert!(cli.json);
        assert!(!cli.system);
        match cli.command {
            Commands::Enroll { name, image } => {
                assert_eq!(name, "Alice");
                assert_eq!(image, PathBuf::from("alice.png"));
            }
            _ => panic!("expected enroll"),
        }
    }

    #[test]
    fn test_delete_requires_key() {
        assert!(Cli::try_parse_from(["likeness", "delete"]).is_err());
    }
}
