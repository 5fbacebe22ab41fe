use crate::api::{ApiResponse, ApiResult, Message, Request, PROTOCOL_VERSION};
use crate::event::{EventFilter, EventKind, OutputEvent};
use crate::store::Store;
use anyhow::{bail, Context, Result};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("did not receive a version message")]
    NoVersionReceived,
    #[error("protocol version mismatch")]
    VersionMismatch,
    #[error("I/O error during handshake")]
    Io,
}

/// Accepts connections until cancelled. Each client gets its own task and
/// its own receiver on the event channel.
pub async fn serve(
    listener: TcpListener,
    store: Arc<Store>,
    events: broadcast::Sender<OutputEvent>,
    token: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("listener: shutting down");
                return Ok(());
            }
            res = listener.accept() => {
                let (conn, remote) = res.context("unable to accept connection")?;
                debug!("listener: new connection from {}", remote);
                let store = store.clone();
                let events_tx = events.clone();
                let events_rx = events.subscribe();
                let token = token.clone();
                task::spawn(async move {
                    if let Err(e) = handle_client(conn, remote, store, events_tx, events_rx, token).await {
                        debug!("client {}: closed: {:#}", remote, e);
                    }
                });
            }
        }
    }
}

async fn handle_client(
    conn: TcpStream,
    remote: SocketAddr,
    store: Arc<Store>,
    events_tx: broadcast::Sender<OutputEvent>,
    mut events_rx: broadcast::Receiver<OutputEvent>,
    token: CancellationToken,
) -> Result<()> {
    // Set up length-delimited frames
    let mut framed = Framed::new(
        conn,
        LengthDelimitedCodec::builder()
            .length_field_length(2)
            .new_codec(),
    );

    // Exchange version
    ensure_version(&mut framed).await?;

    let mut subscription: Option<EventFilter> = None;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("client {}: shutting down", remote);
                return Ok(());
            }
            frame = framed.next() => {
                let frame = match frame {
                    None => {
                        debug!("client {}: connection closed", remote);
                        return Ok(());
                    }
                    Some(frame) => frame.context("socket read error")?,
                };
                let msg: Message =
                    serde_json::from_slice(&frame).context("unable to decode frame")?;
                match msg {
                    Message::Request { id, inner } => {
                        debug!("client {}: request {}: {:?}", remote, id, inner);
                        let resp = handle_request(&store, &events_tx, &mut subscription, inner);
                        let buf = serde_json::to_vec(&Message::Response { id, inner: resp })
                            .context("unable to encode response")?;
                        framed
                            .send(Bytes::from(buf))
                            .await
                            .context("unable to send response")?;
                    }
                    other => {
                        bail!("client sent a non-request frame: {:?}", other);
                    }
                }
            }
            event = events_rx.recv() => {
                match event {
                    Ok(ev) => {
                        let wanted = subscription.as_ref().map(|f| f.matches(&ev)).unwrap_or(false);
                        if wanted {
                            let buf = serde_json::to_vec(&Message::Event(ev))
                                .context("unable to encode event")?;
                            framed
                                .send(Bytes::from(buf))
                                .await
                                .context("unable to push event")?;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("client {}: dropped {} events, too slow", remote, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                }
            }
        }
    }
}

fn handle_request(
    store: &Store,
    events: &broadcast::Sender<OutputEvent>,
    subscription: &mut Option<EventFilter>,
    req: Request,
) -> ApiResponse {
    // Event sends are fire-and-forget; a send only fails with no receivers.
    let emit = |ev: OutputEvent| {
        let _ = events.send(ev);
    };

    match req {
        Request::ListOutputs => ApiResult::Outputs(store.list()).into(),
        Request::GetOutput { id } => match store.get(id) {
            Ok(o) => ApiResult::Output(o).into(),
            Err(e) => e.into(),
        },
        Request::UpdateOutput { id, update } => {
            let status = update.status;
            let manual_override = update.manual_override;
            let mode_written = update.mode.is_some();
            match store.update(id, update, chrono::Local::now().timestamp()) {
                Ok(o) => {
                    if let Some(status) = status {
                        emit(OutputEvent::now(id, EventKind::StatusChanged { status }));
                    }
                    if let Some(manual_override) = manual_override {
                        emit(OutputEvent::now(
                            id,
                            EventKind::OverrideChanged { manual_override },
                        ));
                    }
                    if mode_written {
                        emit(OutputEvent::now(
                            id,
                            EventKind::ModeChanged {
                                mode: o.mode.clone(),
                            },
                        ));
                    }
                    ApiResult::Output(o).into()
                }
                Err(e) => e.into(),
            }
        }
        Request::ToggleOutput { id } => match store.toggle(id) {
            Ok(o) => {
                emit(OutputEvent::now(
                    id,
                    EventKind::StatusChanged { status: o.status },
                ));
                ApiResult::Output(o).into()
            }
            Err(e) => e.into(),
        },
        Request::ToggleOverride { id } => match store.toggle_override(id) {
            Ok(o) => {
                emit(OutputEvent::now(
                    id,
                    EventKind::OverrideChanged {
                        manual_override: o.manual_override,
                    },
                ));
                ApiResult::Output(o).into()
            }
            Err(e) => e.into(),
        },
        Request::ListInputs => ApiResult::Inputs(store.list_inputs()).into(),
        Request::UpdateInput { id, update } => match store.update_input(id, update) {
            Ok(i) => ApiResult::Input(i).into(),
            Err(e) => e.into(),
        },
        Request::GetSensors => ApiResult::Sensors(store.sensor_snapshot()).into(),
        Request::GetStatus => {
            let state = store.full_state();
            ApiResult::Status {
                outputs: state.outputs,
                inputs: state.inputs,
                sensors: state.sensors,
                timestamp: chrono::Utc::now(),
            }
            .into()
        }
        Request::Subscribe { strategy, filters } => {
            *subscription = Some(EventFilter {
                strategy,
                entries: filters,
            });
            ApiResult::Subscribed.into()
        }
    }
}

async fn ensure_version(
    framed: &mut Framed<TcpStream, LengthDelimitedCodec>,
) -> Result<(), HandshakeError> {
    let version_msg = Message::Version(PROTOCOL_VERSION);
    let version_msg_bytes =
        serde_json::to_vec(&version_msg).map_err(|_| HandshakeError::Io)?;
    framed
        .send(Bytes::from(version_msg_bytes))
        .await
        .map_err(|_| HandshakeError::Io)?;

    let rec = framed
        .next()
        .await
        .ok_or(HandshakeError::NoVersionReceived)?
        .map_err(|_| HandshakeError::Io)?;
    let remote_version_msg: Message =
        serde_json::from_slice(rec.as_ref()).map_err(|_| HandshakeError::Io)?;
    match remote_version_msg {
        Message::Version(v) => {
            if v != PROTOCOL_VERSION {
                return Err(HandshakeError::VersionMismatch);
            }
        }
        _ => return Err(HandshakeError::NoVersionReceived),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventFilterEntry;
    use crate::output::{Mode, OutputUpdate, PeriodicConfig};

    fn fixture() -> (Arc<Store>, broadcast::Sender<OutputEvent>) {
        (Arc::new(Store::new(0)), broadcast::channel(16).0)
    }

    #[test]
    fn get_unknown_output_returns_404() {
        let (store, events) = fixture();
        let mut sub = None;
        let resp = handle_request(&store, &events, &mut sub, Request::GetOutput { id: 42 });
        assert!(!resp.ok);
        assert_eq!(resp.status, 404);
    }

    #[test]
    fn update_emits_mode_event_for_subscribers() {
        let (store, events) = fixture();
        let mut rx = events.subscribe();
        let mut sub = None;
        let resp = handle_request(
            &store,
            &events,
            &mut sub,
            Request::UpdateOutput {
                id: 1,
                update: OutputUpdate {
                    mode: Some(Mode::Periodic(PeriodicConfig::default())),
                    ..Default::default()
                },
            },
        );
        assert!(resp.ok);
        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.id, 1);
        assert!(matches!(ev.kind, EventKind::ModeChanged { .. }));
    }

    #[test]
    fn failed_update_emits_nothing() {
        let (store, events) = fixture();
        let mut rx = events.subscribe();
        let mut sub = None;
        let resp = handle_request(
            &store,
            &events,
            &mut sub,
            Request::UpdateOutput {
                id: 42,
                update: OutputUpdate {
                    status: Some(true),
                    ..Default::default()
                },
            },
        );
        assert_eq!(resp.status, 404);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn subscribe_installs_the_filter() {
        let (store, events) = fixture();
        let mut sub = None;
        let resp = handle_request(
            &store,
            &events,
            &mut sub,
            Request::Subscribe {
                strategy: crate::event::EventFilterStrategy::Any,
                filters: vec![EventFilterEntry::Any],
            },
        );
        assert!(resp.ok);
        let filter = sub.expect("subscription installed");
        assert!(filter.matches(&OutputEvent::now(
            1,
            EventKind::StatusChanged { status: true }
        )));
    }

    #[test]
    fn status_request_reports_everything() {
        let (store, events) = fixture();
        let mut sub = None;
        let resp = handle_request(&store, &events, &mut sub, Request::GetStatus);
        match resp.result {
            Some(ApiResult::Status {
                outputs, inputs, sensors, ..
            }) => {
                assert_eq!(outputs.len(), 6);
                assert_eq!(inputs.len(), 6);
                assert_eq!(sensors.len(), 2);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
