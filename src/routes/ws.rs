//! WebSocket upgrade. Auth happens before the upgrade completes: the access
//! token travels as a query parameter since the browser WebSocket API can't
//! set an Authorization header on the handshake request.

use crate::connection::{ConnectionContext, InboundFrame, OutboundFrame};
use crate::AppState;
use futures_util::{SinkExt, StreamExt};
use rocket::http::Status;
use rocket::{get, State};
use rocket_ws::{Channel, Message, WebSocket};
use std::sync::Arc;

#[get("/api/v1/ws?<token>&<character_id>")]
pub async fn connect(state: &State<Arc<AppState>>, ws: WebSocket, token: &str, character_id: Option<String>) -> Result<Channel<'static>, Status> {
    if state.identity.is_blacklisted(token).await {
        return Err(Status::Unauthorized);
    }
    let account = state.identity.verify_access_token(token).map_err(|_| Status::Unauthorized)?;
    let state = state.inner().clone();
    let account_id = account.account_id;

    Ok(ws.channel(move |mut stream| {
        Box::pin(async move {
            let mut ctx = ConnectionContext::open(state, account_id, character_id).await;
            while let Some(Ok(message)) = stream.next().await {
                let Message::Text(text) = message else { continue };
                let now_ms = chrono::Utc::now().timestamp_millis();
                let outbound = match serde_json::from_str::<InboundFrame>(&text) {
                    Ok(frame) => ctx.dispatch(frame, now_ms).await,
                    Err(e) => OutboundFrame::Error { code: "ValidationFailed", message: e.to_string() },
                };
                let payload = serde_json::to_string(&outbound).unwrap_or_default();
                if stream.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            ctx.close().await;
            Ok(())
        })
    }))
}
