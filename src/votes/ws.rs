use axum::extract::ws::{CloseFrame, Message};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::debug_handler;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::auth::{Identities, IdentityResolver};
use crate::realtime::{SessionId, SessionRegistry};

/// Application close code for a failed handshake, 4xxx range per RFC 6455.
const CLOSE_UNAUTHORIZED: u16 = 4401;

#[derive(Deserialize)]
pub(crate) struct LiveQuery {
    token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Subscribe {
    session_id: SessionId,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn live(
    State(identities): State<Identities>,
    State(registry): State<SessionRegistry>,
    Query(LiveQuery { token }): Query<LiveQuery>,

    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle(socket, identities, registry, token))
}

// generic over the socket so the handshake can be driven by channels in tests
async fn handle<S, I>(
    mut socket: S,
    identities: I,
    registry: SessionRegistry,
    token: Option<String>,
) where
    I: IdentityResolver,
    S: Stream<Item = Result<Message, axum::Error>> + Sink<Message> + Unpin + Send + 'static,
{
    let identity = match token {
        Some(token) => identities.validate(&token).await.ok(),
        None => None,
    };
    let Some(identity) = identity else {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_UNAUTHORIZED,
                reason: "unauthorized".into(),
            })))
            .await;
        return;
    };

    // the first parseable inbound message names the session to watch;
    // a client that hangs up before sending one was never registered
    let session_id = loop {
        match socket.next().await {
            Some(Ok(msg)) => {
                let Ok(Subscribe { session_id }) = serde_json::from_slice(&msg.into_data()) else {
                    continue;
                };
                break session_id;
            }
            Some(Err(_)) | None => return,
        }
    };

    tracing::info!(user = %identity.sub, session_id, "subscribed");

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let conn_id = registry.register(session_id, tx);

    let (mut sender, mut receiver) = socket.split();
    let forward_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    // after subscribing only the close matters; everything else is ignored
    while let Some(Ok(msg)) = receiver.next().await {
        if let Message::Close(_) = msg {
            break;
        }
    }

    registry.unregister(session_id, conn_id);
    forward_task.abort();

    tracing::info!(user = %identity.sub, session_id, "unsubscribed");
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};

    use super::*;
    use crate::auth::{Identity, UserInfo};
    use crate::{AppError, AppResult};

    type Inbound = mpsc::UnboundedSender<Result<Message, axum::Error>>;
    type Sent = Arc<Mutex<Vec<Message>>>;

    /// Channel-fed stand-in for a websocket: the test feeds inbound frames
    /// and inspects whatever the handler sent.
    struct FakeSocket {
        inbound: mpsc::UnboundedReceiver<Result<Message, axum::Error>>,
        sent: Sent,
    }

    fn fake_socket() -> (Inbound, Sent, FakeSocket) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Sent::default();
        let socket = FakeSocket { inbound: rx, sent: sent.clone() };
        (tx, sent, socket)
    }

    impl Stream for FakeSocket {
        type Item = Result<Message, axum::Error>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.inbound.poll_recv(cx)
        }
    }

    impl Sink<Message> for FakeSocket {
        type Error = axum::Error;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
            self.sent.lock().unwrap().push(item);
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    struct FakeIdentities;

    impl IdentityResolver for FakeIdentities {
        async fn validate(&self, token: &str) -> AppResult<Identity> {
            match token {
                "secret" => Ok(Identity { sub: "alice".to_owned() }),
                _ => Err(AppError::Unauthorized),
            }
        }

        async fn resolve(&self, _user_id: &str) -> AppResult<UserInfo> {
            Ok(UserInfo::default())
        }
    }

    /// Yields until the spawned handler task has caught up.
    async fn settle(cond: impl Fn() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition never settled");
    }

    #[tokio::test]
    async fn bad_token_closes_unauthorized_and_never_registers() {
        let registry = SessionRegistry::new();
        let (_tx, sent, socket) = fake_socket();

        handle(socket, FakeIdentities, registry.clone(), Some("wrong".to_owned())).await;

        let sent = sent.lock().unwrap();
        assert!(matches!(
            &sent[..],
            [Message::Close(Some(frame))] if frame.code == CLOSE_UNAUTHORIZED
        ));
        assert_eq!(registry.session_count(), 0);
    }

    #[tokio::test]
    async fn missing_token_closes_unauthorized() {
        let registry = SessionRegistry::new();
        let (_tx, sent, socket) = fake_socket();

        handle(socket, FakeIdentities, registry.clone(), None).await;

        let sent = sent.lock().unwrap();
        assert!(matches!(
            &sent[..],
            [Message::Close(Some(frame))] if frame.code == CLOSE_UNAUTHORIZED
        ));
        assert_eq!(registry.session_count(), 0);
    }

    #[tokio::test]
    async fn hangup_before_subscribe_never_registers() {
        let registry = SessionRegistry::new();
        let (tx, sent, socket) = fake_socket();
        drop(tx);

        handle(socket, FakeIdentities, registry.clone(), Some("secret".to_owned())).await;

        assert!(sent.lock().unwrap().is_empty());
        assert_eq!(registry.session_count(), 0);
    }

    #[tokio::test]
    async fn subscriber_gets_broadcasts_until_close() {
        let registry = SessionRegistry::new();
        let (tx, sent, socket) = fake_socket();

        let task = tokio::spawn(handle(
            socket,
            FakeIdentities,
            registry.clone(),
            Some("secret".to_owned()),
        ));

        tx.send(Ok(Message::Text(r#"{"sessionId":5}"#.into()))).unwrap();
        settle(|| registry.session_count() == 1).await;

        registry.broadcast(5, r#"{"votes":1}"#);
        settle(|| !sent.lock().unwrap().is_empty()).await;
        assert!(matches!(
            &sent.lock().unwrap()[..],
            [Message::Text(payload)] if payload.as_str() == r#"{"votes":1}"#
        ));

        tx.send(Ok(Message::Close(None))).unwrap();
        settle(|| registry.session_count() == 0).await;
        task.await.unwrap();
    }
}
