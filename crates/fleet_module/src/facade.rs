//! Convenience senders for common fleet commands.

use tracing::info;

use crate::client::ModuleClient;
use crate::error::ModuleError;
use crate::message::{ErrorReport, MessageType, RemoteExecute};
use crate::protocol;

/// Thin helper over a [`ModuleClient`] for frequently used commands.
pub struct Facade<'a> {
    client: &'a ModuleClient,
}

impl<'a> Facade<'a> {
    pub fn new(client: &'a ModuleClient) -> Self {
        Self { client }
    }

    /// Ask `target_party_id` to report its unit id.
    pub fn request_id(&self, target_party_id: &str) -> Result<(), ModuleError> {
        let command = serde_json::to_value(RemoteExecute {
            command_type: protocol::TYPE_UNIT_ID,
        })?;
        self.client
            .send_json(target_party_id, command, MessageType::REMOTE_EXECUTE, true)
    }

    /// Send an error or notification report. An empty target reaches the
    /// whole group.
    pub fn send_error_message(
        &self,
        target_party_id: &str,
        error_number: u32,
        info_type: u32,
        notification_type: u8,
        description: &str,
    ) -> Result<(), ModuleError> {
        let command = serde_json::to_value(ErrorReport {
            error_number,
            info_type,
            notification_type,
            description: description.to_string(),
        })?;
        self.client
            .send_json(target_party_id, command, MessageType::ERROR, false)?;
        info!("Sent error message: {description}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ModuleIdentity;
    use crate::transport::MemoryTransport;
    use serde_json::Value;
    use std::sync::Arc;

    fn client() -> (ModuleClient, Arc<MemoryTransport>) {
        let client = ModuleClient::new(ModuleIdentity::new("gen", "42", "K", "1.0", Vec::new()));
        let transport = Arc::new(MemoryTransport::new());
        client.attach(transport.clone()).unwrap();
        (client, transport)
    }

    #[test]
    fn test_request_id() {
        let (client, transport) = client();
        Facade::new(&client).request_id("P7").unwrap();

        let value: Value = serde_json::from_slice(&transport.sent()[0]).unwrap();
        assert_eq!(value["mt"], 1005);
        assert_eq!(value["ty"], "uv");
        assert_eq!(value["tg"], "P7");
        assert_eq!(value["ms"], serde_json::json!({"C": 1004}));
    }

    #[test]
    fn test_send_error_message_to_group() {
        let (client, transport) = client();
        Facade::new(&client)
            .send_error_message(
                "",
                protocol::ERROR_USER_DEFINED,
                7,
                protocol::NOTIFICATION_NOTICE,
                "Hello from rust",
            )
            .unwrap();

        let value: Value = serde_json::from_slice(&transport.sent()[0]).unwrap();
        assert_eq!(value["mt"], 1008);
        assert_eq!(value["ty"], "g");
        assert_eq!(value["ms"]["EN"], 1000);
        assert_eq!(value["ms"]["IT"], 7);
        assert_eq!(value["ms"]["NT"], 5);
        assert_eq!(value["ms"]["DS"], "Hello from rust");
    }
}
