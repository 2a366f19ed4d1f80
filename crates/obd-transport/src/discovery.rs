//! Characteristic Discovery
//!
//! ELM327 BLE clones use vendor-specific UUIDs, so the RX/TX pair is found
//! by capability rather than by name: a ranked search over every
//! notify-capable and write-capable characteristic.

use crate::link::{CharacteristicInfo, CharacteristicRef, ServiceInfo, WriteMode};
use tracing::debug;
use uuid::Uuid;

/// UUID prefix of Bluetooth SIG assigned characteristics (0x2Axx)
const SIG_CHARACTERISTIC_PREFIX: &str = "00002a";

/// Selected notify (RX) and write (TX) characteristics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattChannel {
    /// Characteristic delivering adapter output
    pub rx: CharacteristicRef,
    /// Characteristic accepting commands
    pub tx: CharacteristicRef,
    /// Write mode tried first on `tx`
    pub write_mode: WriteMode,
}

/// Pick the RX/TX pair from a discovered service topology.
///
/// Ranking, best first: both in one service with write-without-response,
/// both in one service with acknowledged write, then the same two across
/// services. Ties go to discovery order. SIG assigned characteristics are
/// never candidates.
pub fn select_channel(services: &[ServiceInfo]) -> Option<GattChannel> {
    let all: Vec<_> = services.iter().flat_map(candidates).collect();

    let mut best: Option<(u8, GattChannel)> = None;
    for (rx_service, rx) in all.iter().filter(|(_, c)| c.properties.notify) {
        for (tx_service, tx) in &all {
            let Some(write_mode) = write_mode(tx) else {
                continue;
            };

            let mut rank = 0;
            if rx_service != tx_service {
                rank += 2;
            }
            if write_mode == WriteMode::WithResponse {
                rank += 1;
            }

            if best.as_ref().map_or(true, |(current, _)| rank < *current) {
                best = Some((
                    rank,
                    GattChannel {
                        rx: CharacteristicRef { service: *rx_service, characteristic: rx.uuid },
                        tx: CharacteristicRef { service: *tx_service, characteristic: tx.uuid },
                        write_mode,
                    },
                ));
            }
        }
    }

    if let Some((rank, channel)) = &best {
        debug!("Selected RX {} / TX {} (rank {})", channel.rx.characteristic, channel.tx.characteristic, rank);
    }
    best.map(|(_, channel)| channel)
}

fn write_mode(characteristic: &CharacteristicInfo) -> Option<WriteMode> {
    if characteristic.properties.write_without_response {
        Some(WriteMode::WithoutResponse)
    } else if characteristic.properties.write {
        Some(WriteMode::WithResponse)
    } else {
        None
    }
}

fn candidates(service: &ServiceInfo) -> Vec<(Uuid, &CharacteristicInfo)> {
    service
        .characteristics
        .iter()
        .filter(|c| !is_sig_assigned(c))
        .map(|c| (service.uuid, c))
        .collect()
}

fn is_sig_assigned(characteristic: &CharacteristicInfo) -> bool {
    characteristic
        .uuid
        .to_string()
        .starts_with(SIG_CHARACTERISTIC_PREFIX)
}
