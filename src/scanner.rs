use std::collections::HashMap;

use btleplug::api::{Central as _, CentralEvent, Manager as _, Peripheral as _, PeripheralProperties};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures::StreamExt as _;
use log::{debug, info, trace};
use tokio::time::Instant;

use crate::beacon::BeaconFilter;
use crate::error::{Result, SensorError};

/// Picks the adapter whose description contains `wanted`, or the first one.
pub async fn find_adapter(manager: &Manager, wanted: Option<&str>) -> Result<Adapter> {
    for adapter in manager.adapters().await? {
        let info = adapter.adapter_info().await?;
        match wanted {
            Some(name) if !info.contains(name) => {
                debug!("Skipping adapter {}", info);
            }
            _ => {
                info!("Using adapter {}", info);
                return Ok(adapter);
            }
        }
    }
    Err(SensorError::AdapterNotFound(wanted.map(str::to_string)))
}

/// Feeds manufacturer data from BLE advertisements into the beacon filter.
pub struct Scanner {
    adapter: Adapter,
    filter: BeaconFilter,
}

impl Scanner {
    pub fn new(adapter: Adapter, filter: BeaconFilter) -> Self {
        Scanner { adapter, filter }
    }

    pub async fn run(&self) -> Result<()> {
        let mut events = self.adapter.events().await?;

        while let Some(event) = events.next().await {
            match event {
                CentralEvent::ManufacturerDataAdvertisement {
                    id,
                    manufacturer_data,
                } => {
                    let now = Instant::now();
                    match self.properties(&id).await {
                        Ok(properties) => {
                            if let Some(properties) = &properties {
                                self.dump_services(&id, properties);
                            }
                            let rssi = properties.and_then(|p| p.rssi);
                            self.observe(&id, &manufacturer_data, rssi, now);
                        }
                        Err(err) => debug!("Error reading properties of {:?}: {}", id, err),
                    }
                }
                CentralEvent::DeviceDiscovered(id) => {
                    let now = Instant::now();
                    match self.properties(&id).await {
                        Ok(Some(properties)) => {
                            self.dump_services(&id, &properties);
                            self.observe(&id, &properties.manufacturer_data, properties.rssi, now);
                        }
                        Ok(None) => {}
                        Err(err) => debug!("Error reading properties of {:?}: {}", id, err),
                    }
                }
                _ => {}
            }
        }

        info!("No more Bluetooth events");
        Ok(())
    }

    async fn properties(&self, id: &PeripheralId) -> Result<Option<PeripheralProperties>> {
        let peripheral = self.adapter.peripheral(id).await?;
        Ok(peripheral.properties().await?)
    }

    fn dump_services(&self, id: &PeripheralId, properties: &PeripheralProperties) {
        if !self.filter.dumps_advertisements() {
            return;
        }
        for line in service_lines(properties) {
            debug!("{:?}: {}", id, line);
        }
    }

    fn observe(
        &self,
        id: &PeripheralId,
        manufacturer_data: &HashMap<u16, Vec<u8>>,
        rssi: Option<i16>,
        now: Instant,
    ) {
        let Some(rssi) = rssi else {
            trace!("No RSSI for {:?}, skipping advertisement", id);
            return;
        };

        for (company_id, payload) in manufacturer_data {
            // Company identifiers are little-endian on the air.
            let vendor_id = company_id.to_le_bytes();
            if self.filter.observe(&vendor_id, payload, rssi, now) {
                trace!("Beacon from {:?} delivered", id);
            }
        }
    }
}

fn service_lines(properties: &PeripheralProperties) -> Vec<String> {
    let mut lines: Vec<String> = properties
        .services
        .iter()
        .map(|uuid| format!("Service {}", uuid))
        .collect();

    let mut service_data: Vec<_> = properties.service_data.iter().collect();
    service_data.sort_by_key(|(uuid, _)| **uuid);
    lines.extend(
        service_data
            .into_iter()
            .map(|(uuid, data)| format!("Service data {}: 0x{}", uuid, hex::encode(data))),
    );
    lines
}
