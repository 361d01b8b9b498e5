use anyhow::{Context, Result};
use iriscap_hw::mock::MockBackend;
use iriscap_hw::{
    DeviceId, DeviceManager, DeviceSource, Frame, NativeLayer, Readiness, SourceConfig,
    V4l2Backend,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use config::{BackendKind, BusKind, Config};
use dbus_interface::CaptureService;
use engine::{spawn_engine, spawn_frame_pump, EngineHandle};

const BUS_NAME: &str = "org.iriscap.Daemon1";
const OBJECT_PATH: &str = "/org/iriscap/Daemon1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    tracing::info!(backend = ?config.backend, sources = config.sources, "iriscapd starting");

    match config.backend {
        BackendKind::V4l2 => {
            let backend = V4l2Backend::new()
                .with_buffer_count(config.v4l2_buffers)
                .with_timeout(config.capture_timeout);
            run(config, backend).await
        }
        BackendKind::Mock => run(config, MockBackend::new()).await,
    }
}

/// Pick which device ids to open.
///
/// With fewer attached devices than sources, ids `0..sources` are opened
/// anyway; the missing ones come up inert and serve blank frames.
fn select_device_ids<B: NativeLayer>(config: &Config, manager: &mut DeviceManager<B>) -> Vec<DeviceId> {
    if let Some(ids) = &config.device_ids {
        return ids.clone();
    }

    let devices = manager.enumerate().unwrap_or_else(|err| {
        tracing::warn!(error = %err, "enumeration failed");
        Vec::new()
    });
    tracing::info!(devices = ?devices, "enumeration done");

    if devices.len() < config.sources {
        tracing::warn!(
            found = devices.len(),
            wanted = config.sources,
            "not enough cameras attached; opening default ids"
        );
        (0..config.sources as u32).map(DeviceId::new).collect()
    } else {
        devices
            .iter()
            .take(config.sources)
            .map(|d| DeviceId::new(d.index))
            .collect()
    }
}

/// Construct one source per id. Initialization blocks on the native layer,
/// so it runs on the blocking pool.
async fn open_sources<B: NativeLayer + Clone + 'static>(
    backend: &B,
    ids: Vec<DeviceId>,
    source_config: &SourceConfig,
) -> Result<Vec<DeviceSource<B>>> {
    let mut sources = Vec::with_capacity(ids.len());
    for (slot, id) in ids.into_iter().enumerate() {
        let backend = backend.clone();
        let config = source_config.clone();
        let source = tokio::task::spawn_blocking(move || DeviceSource::with_id(backend, id, config))
            .await
            .context("device initialization task failed")?;
        if let Readiness::Inert(reason) = source.readiness() {
            tracing::warn!(camera = slot, %id, %reason, "camera inert at startup");
        }
        sources.push(source);
    }
    Ok(sources)
}

async fn run<B: NativeLayer + Clone + 'static>(config: Config, backend: B) -> Result<()> {
    let mut manager = DeviceManager::new(backend.clone());
    let ids = select_device_ids(&config, &mut manager);
    let source_config = config.source_config();
    let sources = open_sources(&backend, ids, &source_config).await?;

    let mut cameras: Vec<EngineHandle> = Vec::with_capacity(sources.len());
    let mut frames: Vec<watch::Receiver<Arc<Frame>>> = Vec::with_capacity(sources.len());

    for (slot, source) in sources.into_iter().enumerate() {
        let engine = spawn_engine(format!("iriscap-cam{slot}"), source)
            .context("failed to spawn engine thread")?;
        frames.push(spawn_frame_pump(
            slot,
            engine.clone(),
            config.frame_rate,
            Frame::degraded(source_config.frame_size),
        ));
        cameras.push(engine);
    }

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, CaptureService::new(cameras.clone()))?
        .build()
        .await
        .context("failed to register D-Bus interface")?;

    tracing::info!(cameras = cameras.len(), bus = BUS_NAME, "iriscapd ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("iriscapd shutting down");

    for (slot, camera) in cameras.iter().enumerate() {
        if let Err(err) = camera.close().await {
            tracing::warn!(camera = slot, error = %err, "close failed");
        }
    }
    drop(frames);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use iriscap_hw::DeviceIdentity;

    fn config(device_ids: Option<&str>) -> Config {
        let mut config = Config::from_lookup(|_| None).unwrap();
        config.device_ids = device_ids.map(|ids| ids.split(',').map(|s| s.parse().unwrap()).collect());
        config
    }

    fn identity(index: u32) -> DeviceIdentity {
        DeviceIdentity {
            serial: format!("usb-{index}"),
            index,
        }
    }

    #[test]
    fn test_defaults_when_too_few_devices() {
        let mock = MockBackend::new().with_devices(vec![identity(4)]);
        let mut manager = DeviceManager::new(mock);
        let ids = select_device_ids(&config(None), &mut manager);
        assert_eq!(ids, vec![DeviceId::new(0), DeviceId::new(1)]);
    }

    #[test]
    fn test_first_enumerated_devices_used() {
        let mock = MockBackend::new().with_devices(vec![identity(2), identity(4), identity(6)]);
        let mut manager = DeviceManager::new(mock);
        let ids = select_device_ids(&config(None), &mut manager);
        assert_eq!(ids, vec![DeviceId::new(2), DeviceId::new(4)]);
    }

    #[tokio::test]
    async fn test_open_sources_reports_each_device() {
        let mock = MockBackend::new();
        mock.fail_initialize(1, iriscap_hw::mock::status(0xFF71));
        let ids = vec![DeviceId::new(0), DeviceId::new(1)];
        let source_config = config(None).source_config();

        let sources = open_sources(&mock, ids, &source_config).await.unwrap();
        assert_eq!(sources.len(), 2);
        assert!(sources[0].readiness().is_ready());
        assert!(!sources[1].readiness().is_ready());
        assert_eq!(mock.open_handles(), 1);
    }

    #[test]
    fn test_explicit_ids_skip_enumeration() {
        let mock = MockBackend::new();
        let mut manager = DeviceManager::new(mock.clone());
        let ids = select_device_ids(&config(Some("7,9")), &mut manager);
        assert_eq!(ids, vec![DeviceId::new(7), DeviceId::new(9)]);
        assert!(mock.calls().is_empty());
    }
}
