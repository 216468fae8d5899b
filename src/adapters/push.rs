use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::ports::{PushError, PushMessage, PushSender};

/// Posts notifications to an HTTP push relay.
#[derive(Clone)]
pub struct HttpPushSender {
    client: Client,
    url: String,
}

impl HttpPushSender {
    pub fn new(url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self { client, url }
    }
}

#[async_trait]
impl PushSender for HttpPushSender {
    async fn send(&self, message: &PushMessage) -> Result<(), PushError> {
        let response = self.client.post(&self.url).json(message).send().await?;
        if !response.status().is_success() {
            return Err(PushError::Rejected(response.status().as_u16()));
        }
        tracing::debug!(user_id = %message.user_id, kind = %message.kind, "Push delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn message() -> PushMessage {
        PushMessage {
            user_id: Uuid::new_v4(),
            title: "Reservation approved".to_string(),
            body: "See you at the airport".to_string(),
            kind: "reservation".to_string(),
        }
    }

    #[tokio::test]
    async fn test_send_posts_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/push")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"title":"Reservation approved","kind":"reservation"}"#.to_string(),
            ))
            .with_status(202)
            .create_async()
            .await;

        let sender = HttpPushSender::new(format!("{}/push", server.url()));
        sender.send(&message()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejection_status_is_returned() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/push")
            .with_status(429)
            .create_async()
            .await;

        let sender = HttpPushSender::new(format!("{}/push", server.url()));
        assert!(matches!(
            sender.send(&message()).await,
            Err(PushError::Rejected(429))
        ));
    }
}
