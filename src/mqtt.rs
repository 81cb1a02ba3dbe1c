use std::time::Duration;

use log::{debug, error, info, warn};
use rumqttc::{LastWill, MqttOptions, QoS};
use serde_derive::Serialize;

use crate::config;
use crate::error::Result;
use crate::messages::{ContactState, PresenceState};
use crate::presence::PresenceSink;

const AVAILABILITY_ONLINE: &str = "online";
const AVAILABILITY_OFFLINE: &str = "offline";
/// Back-off after a failed poll so a missing broker doesn't spin the loop.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct MqttClient {
    client: rumqttc::AsyncClient,
    name: String,
    state_topic: String,
    availability_topic: String,
}

#[derive(Debug, Serialize)]
struct ContactSensorMessage<'a> {
    name: &'a str,
    state: &'static str,
    contact: bool,
    present: bool,
}

impl<'a> ContactSensorMessage<'a> {
    fn new(name: &'a str, presence: PresenceState) -> Self {
        let contact = ContactState::from(presence);
        ContactSensorMessage {
            name,
            state: contact.as_str(),
            contact: contact == ContactState::Detected,
            present: presence == PresenceState::Present,
        }
    }
}

impl MqttClient {
    pub fn new(config: &config::MqttConfig, sensor_name: &str) -> (Self, rumqttc::EventLoop) {
        let publisher_id = config
            .publisher_id
            .clone()
            .unwrap_or_else(|| "nearby-sensor".to_string());
        let topic_path = config
            .topic_path
            .clone()
            .unwrap_or_else(|| "nearby".to_string());

        let state_topic = format!(
            "{}/{}/{}",
            topic_path,
            publisher_id,
            sanitize_name(sensor_name)
        );
        let availability_topic = format!("{}/availability", state_topic);

        let mut mqttoptions = MqttOptions::new(
            publisher_id.clone(),
            config.host.clone(),
            config.port.unwrap_or(1883),
        );

        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.unwrap_or(5)));
        mqttoptions.set_last_will(LastWill::new(
            availability_topic.clone(),
            AVAILABILITY_OFFLINE,
            QoS::AtLeastOnce,
            true,
        ));

        if let (Some(username), Some(password)) =
            (config.username.as_ref(), config.password.as_ref())
        {
            mqttoptions.set_credentials(username.clone(), password.clone());
        }

        let (client, eventloop) = rumqttc::AsyncClient::new(mqttoptions, 10);

        (
            MqttClient {
                client,
                name: sensor_name.to_string(),
                state_topic,
                availability_topic,
            },
            eventloop,
        )
    }

    /// Drives the connection until the client disconnects.
    pub async fn event_loop(eventloop: &mut rumqttc::EventLoop) {
        loop {
            match eventloop.poll().await {
                Ok(notification) => match notification {
                    rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_)) => {
                        debug!("Connection acknowledged");
                    }
                    rumqttc::Event::Incoming(rumqttc::Packet::PubAck(_)) => {
                        debug!("Publish acknowledged");
                    }
                    rumqttc::Event::Outgoing(rumqttc::Outgoing::Disconnect) => {
                        debug!("Disconnect sent, leaving MQTT event loop");
                        break;
                    }
                    _ => {}
                },
                Err(e) => {
                    error!("Error polling MQTT event loop: {:?}", e);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }

    pub async fn announce_online(&self) -> Result<()> {
        self.client
            .publish(
                self.availability_topic.clone(),
                QoS::AtLeastOnce,
                true,
                AVAILABILITY_ONLINE,
            )
            .await?;
        Ok(())
    }

    pub async fn announce_presence(&self, presence: PresenceState) -> Result<()> {
        let payload = self.state_payload(presence)?;
        self.client
            .publish(self.state_topic.clone(), QoS::AtLeastOnce, true, payload)
            .await?;
        Ok(())
    }

    fn state_payload(&self, presence: PresenceState) -> serde_json::Result<String> {
        serde_json::to_string(&ContactSensorMessage::new(&self.name, presence))
    }

    pub async fn disconnect(&self) -> Result<()> {
        debug!("Disconnecting MQTT client");
        self.client
            .publish(
                self.availability_topic.clone(),
                QoS::AtLeastOnce,
                true,
                AVAILABILITY_OFFLINE,
            )
            .await?;
        self.client.disconnect().await?;
        Ok(())
    }
}

impl PresenceSink for MqttClient {
    fn presence_changed(&mut self, state: PresenceState) {
        info!(
            "Announcing {} as {} on MQTT",
            self.name,
            ContactState::from(state).as_str()
        );
        let payload = match self.state_payload(state) {
            Ok(payload) => payload,
            Err(err) => {
                error!("Error serializing presence state: {:?}", err);
                return;
            }
        };
        if let Err(err) = self.client.try_publish(
            self.state_topic.clone(),
            QoS::AtLeastOnce,
            true,
            payload,
        ) {
            warn!("Error publishing presence state: {:?}", err);
        }
    }
}

fn sanitize_name(name: &str) -> String {
    // Remove any non-alphanumeric characters and replace spaces with underscores
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(name: &str) -> MqttClient {
        let config = config::MqttConfig {
            host: "localhost".to_string(),
            port: None,
            username: None,
            password: None,
            publisher_id: Some("hallway-pi".to_string()),
            topic_path: None,
            keep_alive_seconds: None,
        };
        MqttClient::new(&config, name).0
    }

    #[test]
    fn test_sanitize_name() {
        let name = "Test's Device 123";
        let sanitized = super::sanitize_name(name);
        assert_eq!(sanitized, "test_s_device_123");
    }

    #[test]
    fn test_topics() {
        let client = client("Nearby Sensor");
        assert_eq!(client.state_topic, "nearby/hallway-pi/nearby_sensor");
        assert_eq!(
            client.availability_topic,
            "nearby/hallway-pi/nearby_sensor/availability"
        );
    }

    #[test]
    fn test_state_payload() {
        let client = client("Nearby Sensor");
        let present: serde_json::Value =
            serde_json::from_str(&client.state_payload(PresenceState::Present).unwrap()).unwrap();
        assert_eq!(present["name"], "Nearby Sensor");
        assert_eq!(present["state"], "open");
        assert_eq!(present["contact"], false);
        assert_eq!(present["present"], true);

        let absent: serde_json::Value =
            serde_json::from_str(&client.state_payload(PresenceState::Absent).unwrap()).unwrap();
        assert_eq!(absent["state"], "closed");
        assert_eq!(absent["contact"], true);
        assert_eq!(absent["present"], false);
    }
}
