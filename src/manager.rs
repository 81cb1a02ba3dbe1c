use std::future::Future;
use std::time::Duration;

use btleplug::api::{Central as _, ScanFilter};
use log::{debug, error, info, warn};

use crate::beacon::BeaconFilter;
use crate::config::PresenceSettings;
use crate::error::Result;
use crate::messages::{PresenceState, delivery_channel};
use crate::mqtt::MqttClient;
use crate::presence::{LogSink, PresenceMonitor, PresenceSink as _};
use crate::scanner::Scanner;

/// How long queued MQTT messages get to flush on shutdown.
const MQTT_FLUSH_TIMEOUT: Duration = Duration::from_secs(3);

pub struct Manager {
    adapter: btleplug::platform::Adapter,
    settings: PresenceSettings,
    sensor_name: String,
    dump_advertisements: bool,
    mqtt: Option<(MqttClient, rumqttc::EventLoop)>,
}

impl Manager {
    pub fn new(
        adapter: btleplug::platform::Adapter,
        settings: PresenceSettings,
        sensor_name: String,
        dump_advertisements: bool,
        mqtt: Option<(MqttClient, rumqttc::EventLoop)>,
    ) -> Self {
        Manager {
            adapter,
            settings,
            sensor_name,
            dump_advertisements,
            mqtt,
        }
    }

    /// Scans and publishes presence until `shutdown` resolves or the
    /// Bluetooth event stream ends. Returns the last published state.
    pub async fn run_loop<F>(self, shutdown: F) -> Result<PresenceState>
    where
        F: Future<Output = ()>,
    {
        info!(
            "Watching for nearby beacons: threshold {} dBm, hold {:?}",
            self.settings.threshold, self.settings.hold
        );
        self.adapter.start_scan(ScanFilter::default()).await?;

        let (tx, rx) = delivery_channel();
        let scanner = Scanner::new(
            self.adapter.clone(),
            BeaconFilter::new(tx, self.dump_advertisements),
        );
        let scan_handle = tokio::task::spawn(async move {
            if let Err(err) = scanner.run().await {
                error!("Error handling BTLE events: {:?}", err);
            }
            debug!("Done handling BTLE events");
        });

        let monitor = PresenceMonitor::new(self.settings, rx);

        let final_state = match self.mqtt {
            Some((client, mut eventloop)) => {
                let mqtt_handle = tokio::task::spawn(async move {
                    MqttClient::event_loop(&mut eventloop).await;
                });

                client.announce_online().await?;
                client.announce_presence(PresenceState::Absent).await?;

                let mut sink = client.clone();
                let state = monitor.run(&mut sink, shutdown).await;

                if let Err(err) = client.disconnect().await {
                    warn!("Error disconnecting from MQTT: {:?}", err);
                }
                if tokio::time::timeout(MQTT_FLUSH_TIMEOUT, mqtt_handle)
                    .await
                    .is_err()
                {
                    warn!("MQTT event loop did not finish within {:?}", MQTT_FLUSH_TIMEOUT);
                }
                state
            }
            None => {
                let mut sink = LogSink {
                    name: self.sensor_name.clone(),
                };
                sink.presence_changed(PresenceState::Absent);
                monitor.run(&mut sink, shutdown).await
            }
        };

        scan_handle.abort();
        if let Err(err) = self.adapter.stop_scan().await {
            warn!("Error stopping scan: {:?}", err);
        }
        info!("Exiting manager event loop");

        Ok(final_state)
    }
}
