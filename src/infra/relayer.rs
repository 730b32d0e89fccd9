//! The AMB relayer: the WebSocket feed of observed AMB messages and the
//! best-effort prioritisation endpoint.

use {
    crate::{
        domain::eth::{Address, ChainId, H256, TxHash},
        util::serialize,
    },
    futures::{SinkExt, StreamExt},
    serde::{Deserialize, Serialize},
    serde_with::serde_as,
    std::time::Duration,
    tokio::sync::mpsc,
    tokio_tungstenite::{connect_async, tungstenite::Message},
};

/// An AMB message observation, as the relayer reports it.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmbMessage {
    pub message_identifier: H256,
    pub amb: String,
    pub from_chain_id: ChainId,
    pub to_chain_id: ChainId,
    pub from_incentives_address: Address,
    #[serde_as(as = "serialize::Hex")]
    pub incentives_payload: Vec<u8>,
    pub block_number: u64,
    pub block_hash: H256,
    pub transaction_hash: TxHash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_block_number: Option<u64>,
    /// Unix-seconds relay deadline, when the AMB carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<u64>,
}

/// A frame on the relayer feed.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
enum Frame {
    AmbMessage(AmbMessage),
    #[serde(other)]
    Other,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeRequest<'a> {
    event: &'a str,
    channel: &'a str,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrioritiseRequest {
    pub message_identifier: H256,
    pub amb: String,
    pub source_chain_id: ChainId,
    pub destination_chain_id: ChainId,
}

#[derive(Debug, thiserror::Error)]
pub enum RelayerError {
    #[error("relayer has no http endpoint configured")]
    NoHttpEndpoint,
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[derive(Clone)]
pub struct RelayerClient {
    client: reqwest::Client,
    ws_url: String,
    http_url: Option<reqwest::Url>,
}

impl RelayerClient {
    pub fn new(ws_url: String, http_url: Option<reqwest::Url>) -> Self {
        Self {
            client: reqwest::Client::new(),
            ws_url,
            http_url,
        }
    }

    /// Subscribes to the relayer's AMB feed. The returned channel yields
    /// every received AMB message; the connection is re-established after
    /// `retry_interval` on every error or close, for as long as the receiver
    /// lives.
    pub fn subscribe_amb_messages(&self, retry_interval: Duration) -> mpsc::Receiver<AmbMessage> {
        let (tx, rx) = mpsc::channel(256);
        let ws_url = self.ws_url.clone();
        tokio::spawn(async move {
            loop {
                match run_subscription(&ws_url, &tx).await {
                    Ok(()) => {
                        tracing::info!("relayer feed closed; reconnecting");
                    }
                    Err(err) => {
                        tracing::warn!(?err, "relayer feed failed; reconnecting");
                    }
                }
                if tx.is_closed() {
                    return;
                }
                tokio::time::sleep(retry_interval).await;
            }
        });
        rx
    }

    /// Asks the relayer to prioritise delivery of an AMB message. Failures
    /// are the caller's to log; prioritisation is best effort.
    pub async fn prioritise_amb_message(
        &self,
        request: &PrioritiseRequest,
    ) -> Result<(), RelayerError> {
        let url = self
            .http_url
            .as_ref()
            .ok_or(RelayerError::NoHttpEndpoint)?
            .join("prioritiseAMBMessage")
            .expect("a constant path joins onto a valid url");
        self.client
            .post(url)
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

async fn run_subscription(
    ws_url: &str,
    tx: &mpsc::Sender<AmbMessage>,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let (mut stream, _) = connect_async(ws_url).await?;
    let subscribe = SubscribeRequest {
        event: "subscribe",
        channel: "ambMessage",
    };
    stream
        .send(Message::Text(
            serde_json::to_string(&subscribe).expect("a constant request serializes"),
        ))
        .await?;

    while let Some(message) = stream.next().await {
        let text = match message? {
            Message::Text(text) => text,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => {
                continue;
            }
            Message::Close(_) => break,
        };
        match serde_json::from_str::<Frame>(&text) {
            Ok(Frame::AmbMessage(amb)) => {
                if tx.send(amb).await.is_err() {
                    return Ok(());
                }
            }
            Ok(Frame::Other) => {}
            Err(err) => {
                tracing::warn!(?err, "dropping unparseable relayer frame");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_amb_message_frames() {
        let text = r#"{
            "event": "ambMessage",
            "data": {
                "messageIdentifier": "0x4242424242424242424242424242424242424242424242424242424242424242",
                "amb": "wormhole",
                "fromChainId": "11155111",
                "toChainId": "80001",
                "fromIncentivesAddress": "0x2222222222222222222222222222222222222222",
                "incentivesPayload": "0xdeadbeef",
                "blockNumber": 17000000,
                "blockHash": "0x1010101010101010101010101010101010101010101010101010101010101010",
                "transactionHash": "0x2020202020202020202020202020202020202020202020202020202020202020"
            }
        }"#;
        match serde_json::from_str::<Frame>(text).unwrap() {
            Frame::AmbMessage(amb) => {
                assert_eq!(amb.amb, "wormhole");
                assert_eq!(amb.from_chain_id, ChainId::new("11155111"));
                assert_eq!(amb.incentives_payload, vec![0xde, 0xad, 0xbe, 0xef]);
                assert_eq!(amb.transaction_block_number, None);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn ignores_unknown_frames() {
        let text = r#"{"event": "heartbeat", "data": {}}"#;
        assert!(matches!(
            serde_json::from_str::<Frame>(text).unwrap(),
            Frame::Other
        ));
    }
}
