// src/monitoring.rs

use crate::backend::{open_bus, read_device, RegisterBus};
use crate::error::Result;
use crate::hardware::HardwareStruct;

use crossbeam_channel::{Sender, TrySendError};
use eframe::egui;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Nouvelle image du matériel produite par un worker
#[derive(Debug, Clone)]
pub struct HwReady {
    /// Génération du handle auquel le worker était lié
    pub generation: u64,
    pub hw: HardwareStruct,
}

impl HwReady {
    pub fn get_event_info(self) -> HardwareStruct {
        self.hw
    }
}

pub type BusOpener = Arc<dyn Fn(&str) -> Result<Box<dyn RegisterBus>> + Send + Sync>;

pub fn default_opener() -> BusOpener {
    Arc::new(open_bus)
}

/// Worker de monitoring : lit tous les registres à chaque période et envoie
/// un `HwReady` à la fenêtre principale.
pub struct HardwareMonitoring {
    ctx: egui::Context,
    hw: HardwareStruct,
    sender: Sender<HwReady>,
    generation: u64,
    period: Duration,
    opener: BusOpener,
}

impl HardwareMonitoring {
    pub fn new(
        ctx: egui::Context,
        hw: HardwareStruct,
        sender: Sender<HwReady>,
        generation: u64,
        period: Duration,
    ) -> Self {
        Self {
            ctx,
            hw,
            sender,
            generation,
            period,
            opener: default_opener(),
        }
    }

    pub fn with_opener(mut self, opener: BusOpener) -> Self {
        self.opener = opener;
        self
    }

    /// Lance le thread. Les bus sont ouverts dans le thread : seul un échec
    /// de création du thread est une erreur ici.
    pub fn start(self) -> Result<MonitorHandle> {
        let HardwareMonitoring {
            ctx,
            mut hw,
            sender,
            generation,
            period,
            opener,
        } = self;

        let running = Arc::new(AtomicBool::new(true));
        let running_clone = Arc::clone(&running);

        let thread = thread::Builder::new()
            .name(format!("hw-monitor-{}", generation))
            .spawn(move || {
                let buses = open_buses(&mut hw, &opener);
                if buses.iter().all(Option::is_none) {
                    log::warn!("Aucun bus ouvert (génération {})", generation);
                    let event = HwReady { generation, hw };
                    publish_last(&ctx, event, &sender, period, &running_clone);
                    return;
                }

                log::info!("Monitoring démarré (génération {})", generation);
                poll_loop(&ctx, &mut hw, buses, &sender, generation, period, &running_clone);
                log::info!("Monitoring arrêté (génération {})", generation);
            })?;

        Ok(MonitorHandle {
            generation,
            running,
            thread: Some(thread),
        })
    }
}

/// Un bus par périphérique ; un échec d'ouverture est conservé dans `Device::status`
fn open_buses(hw: &mut HardwareStruct, opener: &BusOpener) -> Vec<Option<Box<dyn RegisterBus>>> {
    hw.devices
        .iter_mut()
        .map(|device| match opener(&device.uri) {
            Ok(bus) => Some(bus),
            Err(e) => {
                log::warn!("Impossible d'ouvrir {}: {}", device.id, e);
                device.status = Some(e.to_string());
                None
            }
        })
        .collect()
}

fn poll_loop(
    ctx: &egui::Context,
    hw: &mut HardwareStruct,
    mut buses: Vec<Option<Box<dyn RegisterBus>>>,
    sender: &Sender<HwReady>,
    generation: u64,
    period: Duration,
    running: &AtomicBool,
) {
    while running.load(Ordering::Relaxed) {
        for (device, bus) in hw.devices.iter_mut().zip(buses.iter_mut()) {
            let Some(bus) = bus else { continue };
            if let Err(e) = read_device(bus.as_mut(), device) {
                log::warn!("Erreur de lecture sur {}: {}", device.id, e);
            }
        }

        let event = HwReady {
            generation,
            hw: hw.clone(),
        };
        match sender.try_send(event) {
            Ok(()) => ctx.request_repaint(),
            // La fenêtre n'a pas encore consommé les images précédentes
            Err(TrySendError::Full(_)) => {
                log::trace!("Image de la génération {} sautée", generation)
            }
            // Plus de fenêtre pour recevoir
            Err(TrySendError::Disconnected(_)) => break,
        }

        thread::sleep(period);
    }
}

/// Envoie une dernière image, en attendant une place dans la file tant que
/// le worker n'est pas arrêté
fn publish_last(
    ctx: &egui::Context,
    mut event: HwReady,
    sender: &Sender<HwReady>,
    period: Duration,
    running: &AtomicBool,
) {
    while running.load(Ordering::Relaxed) {
        match sender.try_send(event) {
            Ok(()) => {
                ctx.request_repaint();
                return;
            }
            Err(TrySendError::Full(e)) => {
                event = e;
                thread::sleep(period);
            }
            Err(TrySendError::Disconnected(_)) => return,
        }
    }
}

/// Côté fenêtre : arrête le worker quand il est abandonné
pub struct MonitorHandle {
    generation: u64,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        // Pas de join : le thread peut dormir une période entière
        self.stop();
        self.thread.take();
    }
}
