use std::path::Path;
use std::sync::Arc;

use beatlink::{LinkClient, LinkEvent, LinkSession};
use beatlight_lib::audio_input::spawn_audio_reader;
use beatlight_lib::clock::link::ExternalClock;
use beatlight_lib::database::init_app_db;
use beatlight_lib::database::local::database::default_config_dir;
use beatlight_lib::midi::input::MidiInputManager;
use beatlight_lib::output::{spawn_output_writer, SerialSink};
use beatlight_lib::persistence::{load_state, spawn_persistence_loop};
use beatlight_lib::settings::{get_all_settings, AppSettings};
use beatlight_lib::RenderEngine;

#[cfg(feature = "link")]
fn link_session(tempo: f64) -> Option<Arc<dyn LinkSession>> {
    Some(Arc::new(beatlink::rusty::RustyLinkSession::new(tempo)))
}

#[cfg(not(feature = "link"))]
fn link_session(_tempo: f64) -> Option<Arc<dyn LinkSession>> {
    log::warn!("[Main] built without the `link` feature, no external clock");
    None
}

async fn start_link(engine: &RenderEngine, settings: &AppSettings) -> Option<LinkClient> {
    let session = link_session(settings.internal_tempo)?;
    let client = LinkClient::start(session, settings.quantum, |event| match event {
        LinkEvent::PeersChanged { num_peers } => log::info!("[Link] {} peers", num_peers),
        LinkEvent::TransportChanged { is_playing } => {
            log::info!("[Link] transport playing: {}", is_playing)
        }
        LinkEvent::TempoChanged { tempo } => log::debug!("[Link] tempo {:.1}", tempo),
        LinkEvent::StateChanged(_) => {}
    })
    .await;

    match client {
        Ok(client) => {
            engine.attach_external_clock(Box::new(ExternalClock::from_client(&client)));
            Some(client)
        }
        Err(e) => {
            log::error!("[Main] {}", e);
            None
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), String> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let app_dir = default_config_dir()?;
    let db = init_app_db(&app_dir).await?;
    let settings = get_all_settings(&db.0).await?;
    let (store, config) = load_state(&db.0).await.engine_config(&settings);
    let engine = RenderEngine::new(store, config);

    let writer = match &settings.serial_port {
        Some(port) => match SerialSink::open(Path::new(port), settings.serial_baud).await {
            Ok(sink) => {
                let (handle, task) = spawn_output_writer(Box::new(sink));
                engine.attach_output(handle);
                Some(task)
            }
            Err(e) => {
                log::error!("[Main] {}", e);
                None
            }
        },
        None => {
            log::warn!("[Main] no serial_port configured, hardware output disabled");
            None
        }
    };

    let link = if settings.link_enabled {
        start_link(&engine, &settings).await
    } else {
        None
    };

    if let Err(e) = engine.set_mode(settings.app_mode) {
        log::warn!("[Main] {}", e);
    }

    let (mut midi, midi_rx) = MidiInputManager::new();
    if let Some(name) = &settings.midi_input {
        if let Err(e) = midi.open_by_name(name) {
            log::warn!("[Main] {}", e);
        }
    }
    let midi_task = engine.spawn_midi_loop(midi_rx);

    let audio_task = match &settings.audio_port {
        Some(path) => match tokio::fs::File::open(path).await {
            Ok(file) => {
                let audio_engine = engine.clone();
                Some(spawn_audio_reader(
                    tokio::io::BufReader::new(file),
                    move |levels| audio_engine.set_audio_levels(levels),
                ))
            }
            Err(e) => {
                log::warn!("[Main] Failed to open audio input {}: {}", path, e);
                None
            }
        },
        None => None,
    };

    let ticker = engine.spawn_tick_loop();
    let saver = spawn_persistence_loop(engine.clone(), db.0.clone());
    log::info!("[Main] running, ctrl-c to quit");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to wait for ctrl-c: {}", e))?;

    ticker.stop().await;
    engine.shutdown();
    saver.stop().await;

    midi.close_all();
    drop(midi);
    let _ = midi_task.await;
    if let Some(task) = audio_task {
        task.abort();
    }
    if let Some(link) = link {
        link.stop().await;
    }

    // The writer drains the final blackout once its last handle is gone.
    drop(engine.detach_output());
    if let Some(task) = writer {
        let _ = task.await;
    }
    Ok(())
}
