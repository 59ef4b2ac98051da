//! `run`: bring up the face system and log its traffic.
//!
//! The forwarding pipeline proper is outside this binary; its two callbacks
//! are stood in by a pump that logs every received packet and state change.

use crate::utils;
use anyhow::{Context, Result};
use log::{info, warn};
use rust_ndnd_face::{FaceEvent, FaceSystem, FaceTable};
use std::path::Path;
use std::sync::Arc;

pub async fn execute(path: &Path) -> Result<()> {
    let section = utils::load_face_system_section(path)?;

    let face_table = FaceTable::new();
    let mut new_faces = face_table.subscribe();
    let face_system = FaceSystem::new(Arc::clone(&face_table));

    // dry run first so a bad file leaves no half-applied state
    face_system
        .process_config(&section, true)
        .with_context(|| format!("{} is invalid", path.display()))?;
    face_system
        .process_config(&section, false)
        .context("Cannot apply configuration")?;

    for factory in face_system.factory_ids() {
        if let Some(factory) = face_system.factory_by_id(factory) {
            for channel in factory.channels() {
                info!(
                    "Channel {} listening={} faces={}",
                    channel.local_uri(),
                    channel.is_listening(),
                    channel.size()
                );
            }
        }
    }
    info!("Face system up");

    loop {
        tokio::select! {
            face = new_faces.recv() => {
                let Some(face) = face else { break };
                tokio::spawn(async move {
                    let id = face.id();
                    while let Some(event) = face.next_event().await {
                        match event {
                            FaceEvent::Interest(interest) => {
                                info!("face {}: Interest {}", id, interest.name());
                            }
                            FaceEvent::Data(data) => {
                                info!("face {}: Data {}", id, data.name());
                            }
                            FaceEvent::Nack(nack) => {
                                info!(
                                    "face {}: Nack {} for {}",
                                    id,
                                    nack.reason,
                                    nack.interest.name()
                                );
                            }
                            FaceEvent::StateChange { old, new } => {
                                info!("face {}: {} -> {}", id, old, new);
                            }
                        }
                    }
                });
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Cannot listen for shutdown signal: {}", e);
                }
                info!("Shutting down");
                for face in face_table.faces() {
                    face.close();
                }
                break;
            }
        }
    }
    Ok(())
}
