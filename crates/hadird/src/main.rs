use anyhow::{Context, Result};
use hadir_core::framing::FramingRules;
use hadir_hw::{
    CameraConstraints, CommandSpeech, FixedLocationProvider, LocationRequest, SpeechFeedback,
    TracingSpeech, V4lCameraProvider,
};
use hadir_store::{SettingsCache, SettingsStore, SqliteStore};
use hadird::dbus_interface::{BUS_NAME, OBJECT_PATH};
use hadird::{AttendanceService, Config, LocationVerifier, SessionDeps, SettingsSeed, SystemClock};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("hadird starting");

    let config = Config::from_env();

    let store = SqliteStore::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;
    tracing::info!(path = %config.db_path.display(), "database opened");

    if let Some(path) = &config.settings_file {
        SettingsSeed::load(path)?.apply(&store).await?;
    }

    let settings: Arc<dyn SettingsStore> =
        Arc::new(SettingsCache::new(store.clone(), config.settings_ttl));
    let store = Arc::new(store);

    if config.device_location.is_none() {
        tracing::warn!("HADIR_DEVICE_LAT/LON not set; location verification will fail");
    }
    let locator = Arc::new(LocationVerifier::new(
        Arc::new(FixedLocationProvider::new(config.device_location)),
        settings.clone(),
        LocationRequest {
            high_accuracy: true,
            timeout: config.location_timeout,
            maximum_age: config.location_max_age,
        },
    ));

    let speech: Arc<dyn SpeechFeedback> = if config.speech_enabled {
        Arc::new(CommandSpeech::new("espeak-ng"))
    } else {
        Arc::new(TracingSpeech)
    };

    let deps = SessionDeps {
        settings,
        profiles: store.clone(),
        attendance: store.clone(),
        activity: store,
        locator,
        camera: Arc::new(V4lCameraProvider::new(config.camera_device.clone())),
        speech,
        clock: Arc::new(SystemClock),
        camera_constraints: CameraConstraints::default(),
        framing_rules: FramingRules::default(),
        match_threshold: config.match_threshold,
    };
    let service = AttendanceService::new(deps, config.framing_interval);

    let builder = if config.system_bus {
        zbus::connection::Builder::system()?
    } else {
        zbus::connection::Builder::session()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(
        name = BUS_NAME,
        bus = if config.system_bus { "system" } else { "session" },
        camera = %config.camera_device,
        "hadird ready"
    );

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("hadird shutting down");

    Ok(())
}
