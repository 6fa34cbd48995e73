use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use hadir_core::fingerprint::{
    fingerprint_image, similarity, CANONICAL_SIZE, DEFAULT_MATCH_THRESHOLD,
};
use hadir_core::framing::{classify, locate_face, FramingRules};
use hadir_core::{compare_fingerprints, distance_meters, looks_like_face, Coordinate};
use hadir_hw::{CameraConstraints, CameraProvider, V4lCameraProvider};
use image::imageops::FilterType;
use std::path::{Path, PathBuf};

#[zbus::proxy(
    interface = "org.hadir.Attendance1",
    default_service = "org.hadir.Attendance1",
    default_path = "/org/hadir/Attendance1"
)]
trait Attendance {
    async fn start(&self, employee_id: i64) -> zbus::Result<String>;
    async fn select_kind(&self, kind: &str) -> zbus::Result<String>;
    async fn verify_location(&self) -> zbus::Result<String>;
    async fn open_camera(&self) -> zbus::Result<String>;
    async fn framing(&self) -> zbus::Result<String>;
    async fn capture_face(&self) -> zbus::Result<String>;
    async fn disable_camera_verification(&self) -> zbus::Result<String>;
    async fn submit(&self) -> zbus::Result<String>;
    async fn cancel(&self) -> zbus::Result<()>;
    async fn status(&self) -> zbus::Result<String>;
    async fn enroll(&self, employee_id: i64, photo_path: &str) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "hadir", about = "Hadir attendance kiosk CLI")]
struct Cli {
    /// Talk to hadird on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open an attendance form for an employee
    Start { employee_id: i64 },
    /// Choose check-in ("masuk") or check-out ("keluar")
    Kind { kind: String },
    /// Step 1: verify the device location against the office
    Location,
    /// Step 2: open the camera
    Camera,
    /// Show the current framing feedback
    Framing,
    /// Step 2: capture the face photo
    Capture,
    /// Skip face verification for this attempt
    DisableCamera,
    /// Step 3: submit the attendance
    Submit,
    /// Discard the current attempt
    Cancel,
    /// Show daemon/session status
    Status,
    /// Store an employee's reference fingerprint from a profile photo
    Enroll {
        employee_id: i64,
        photo: PathBuf,
    },
    /// Print the fingerprint of an image (no daemon)
    Fingerprint { image: PathBuf },
    /// Compare the fingerprints of two images (no daemon)
    Compare {
        a: PathBuf,
        b: PathBuf,
        #[arg(short, long, default_value_t = DEFAULT_MATCH_THRESHOLD)]
        threshold: f64,
    },
    /// Great-circle distance in meters between two coordinates
    Distance {
        #[arg(allow_hyphen_values = true)]
        lat1: f64,
        #[arg(allow_hyphen_values = true)]
        lon1: f64,
        #[arg(allow_hyphen_values = true)]
        lat2: f64,
        #[arg(allow_hyphen_values = true)]
        lon2: f64,
    },
    /// Run the face heuristic and framing classifier on an image (no daemon)
    CheckFace { image: PathBuf },
    /// Grab one frame from a V4L2 device and report framing (no daemon)
    CameraTest {
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
    },
}

fn print_json(reply: &str) -> Result<()> {
    let value: serde_json::Value =
        serde_json::from_str(reply).context("daemon returned malformed JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn connect(system: bool) -> Result<AttendanceProxy<'static>> {
    let conn = if system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("failed to connect to D-Bus")?;
    AttendanceProxy::new(&conn)
        .await
        .context("hadird is not reachable; is the daemon running?")
}

async fn run_daemon_command(proxy: &AttendanceProxy<'_>, command: Commands) -> Result<()> {
    let reply = match command {
        Commands::Start { employee_id } => proxy.start(employee_id).await?,
        Commands::Kind { kind } => proxy.select_kind(&kind).await?,
        Commands::Location => {
            println!("Locating...");
            proxy.verify_location().await?
        }
        Commands::Camera => proxy.open_camera().await?,
        Commands::Framing => proxy.framing().await?,
        Commands::Capture => proxy.capture_face().await?,
        Commands::DisableCamera => proxy.disable_camera_verification().await?,
        Commands::Submit => proxy.submit().await?,
        Commands::Cancel => {
            proxy.cancel().await?;
            println!("Attendance cancelled");
            return Ok(());
        }
        Commands::Status => proxy.status().await?,
        Commands::Enroll { employee_id, photo } => {
            // The daemon resolves the path in its own working directory.
            let photo = std::fs::canonicalize(&photo)
                .with_context(|| format!("cannot resolve {}", photo.display()))?;
            proxy.enroll(employee_id, &photo.to_string_lossy()).await?
        }
        _ => bail!("not a daemon command"),
    };
    print_json(&reply)
}

fn load_fingerprint(path: &Path) -> Result<hadir_core::Fingerprint> {
    let img = image::open(path).with_context(|| format!("cannot read {}", path.display()))?;
    Ok(fingerprint_image(&img))
}

fn check_face(path: &Path) -> Result<()> {
    let img = image::open(path).with_context(|| format!("cannot read {}", path.display()))?;
    let rgba = img.to_rgba8();
    let face = locate_face(rgba.as_raw(), rgba.width(), rgba.height());
    let framing = classify(face.as_ref(), rgba.width(), rgba.height(), &FramingRules::default());

    let canonical = img
        .resize_exact(CANONICAL_SIZE, CANONICAL_SIZE, FilterType::Triangle)
        .to_rgba8();
    let is_face = looks_like_face(canonical.as_raw(), canonical.width(), canonical.height());

    println!("Image:        {}x{}", rgba.width(), rgba.height());
    println!("Looks like a face: {}", if is_face { "yes" } else { "no" });
    match face {
        Some(b) => println!(
            "Face box:     x={:.0} y={:.0} w={:.0} h={:.0}",
            b.x, b.y, b.width, b.height
        ),
        None => println!("Face box:     none"),
    }
    println!("Framing:      {}", framing.message());
    Ok(())
}

async fn camera_test(device: &str) -> Result<()> {
    println!("Opening {device}...");
    let provider = V4lCameraProvider::new(device);
    let mut stream = provider.open(&CameraConstraints::default()).await?;
    println!("Streaming at {}x{}", stream.width(), stream.height());

    let frame = stream.next_frame()?;
    stream.stop();

    let face = locate_face(&frame.data, frame.width, frame.height);
    let framing = classify(face.as_ref(), frame.width, frame.height, &FramingRules::default());
    let dark = if frame.is_dark { " (dark)" } else { "" };
    println!(
        "Frame #{}: brightness {:.1}{dark}",
        frame.sequence,
        frame.avg_brightness()
    );
    println!("Framing: {}", framing.message());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Fingerprint { image } => {
            println!("{}", load_fingerprint(&image)?);
        }
        Commands::Compare { a, b, threshold } => {
            let fa = load_fingerprint(&a)?;
            let fb = load_fingerprint(&b)?;
            if let Some(s) = similarity(&fa, &fb) {
                println!(
                    "euclidean {:.3}  cosine {:.3}  tolerance {:.3}",
                    s.euclidean, s.cosine, s.tolerance
                );
                println!("combined  {:.3}  (threshold {threshold})", s.combined());
            }
            let matched = compare_fingerprints(Some(&fa), Some(&fb), threshold);
            println!("{}", if matched { "MATCH" } else { "NO MATCH" });
        }
        Commands::Distance { lat1, lon1, lat2, lon2 } => {
            let a = Coordinate::new(lat1, lon1)?;
            let b = Coordinate::new(lat2, lon2)?;
            println!("{:.1} m", distance_meters(a, b));
        }
        Commands::CheckFace { image } => check_face(&image)?,
        Commands::CameraTest { device } => camera_test(&device).await?,
        command => {
            let proxy = connect(cli.system).await?;
            run_daemon_command(&proxy, command).await?;
        }
    }

    Ok(())
}
