use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn recognize(&self, image: Vec<u8>) -> zbus::Result<String>;
    async fn enroll(&self, name: String, image: Vec<u8>) -> zbus::Result<String>;
    async fn remove(&self, name: String) -> zbus::Result<bool>;
    async fn rebuild(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
    async fn list_people(&self) -> zbus::Result<String>;
    async fn records(&self, limit: u32) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a person from a photo
    Enroll {
        /// Identity name (becomes the gallery key)
        name: String,
        /// Path to the enrollment photo
        image: PathBuf,
    },
    /// Remove an enrolled person
    Remove {
        /// Identity name to remove
        name: String,
    },
    /// Recognize a snapshot and mark attendance
    Recognize {
        /// Path to the snapshot
        image: PathBuf,
    },
    /// Rebuild the gallery from the enrollment source directory
    Rebuild,
    /// Show daemon status and attendance statistics
    Status,
    /// List enrolled people
    List,
    /// Show recent attendance records
    Records {
        /// Maximum number of records to show
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },
}

/// Re-indent a JSON reply for the terminal; raw passthrough if unparsable.
fn print_json(body: &str) {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => println!(
            "{}",
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| body.to_string())
        ),
        Err(_) => println!("{body}"),
    }
}

fn read_image(path: &PathBuf) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading image {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let connection = zbus::Connection::session()
        .await
        .context("connecting to the session bus — is rollcalld running?")?;
    let proxy = AttendanceProxy::new(&connection)
        .await
        .context("creating daemon proxy")?;

    match cli.command {
        Commands::Enroll { name, image } => {
            let bytes = read_image(&image)?;
            let reply = proxy.enroll(name, bytes).await?;
            print_json(&reply);
        }
        Commands::Remove { name } => {
            proxy.remove(name.clone()).await?;
            println!("removed: {name}");
        }
        Commands::Recognize { image } => {
            let bytes = read_image(&image)?;
            let reply = proxy.recognize(bytes).await?;
            print_json(&reply);
        }
        Commands::Rebuild => {
            let reply = proxy.rebuild().await?;
            print_json(&reply);
        }
        Commands::Status => {
            let reply = proxy.status().await?;
            print_json(&reply);
        }
        Commands::List => {
            let reply = proxy.list_people().await?;
            print_json(&reply);
        }
        Commands::Records { limit } => {
            let reply = proxy.records(limit).await?;
            print_json(&reply);
        }
    }

    Ok(())
}
