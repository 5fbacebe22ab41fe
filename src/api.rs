use crate::event::{EventFilterEntry, EventFilterStrategy, OutputEvent};
use crate::output::{Input, InputUpdate, Output, OutputUpdate, SensorChannel};
use crate::store::StoreError;
use http::status::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Bumped on every incompatible change to the wire format.
pub const PROTOCOL_VERSION: u16 = 1;

/// Top-level frame exchanged over a connection. The first frame in each
/// direction must be `Version`; afterwards clients send `Request` and the
/// server answers with `Response` (matching `id`) and pushes `Event` frames
/// for active subscriptions.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum Message {
    Version(u16),
    Request { id: u64, inner: Request },
    Response { id: u64, inner: ApiResponse },
    Event(OutputEvent),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum Request {
    ListOutputs,
    GetOutput {
        id: u8,
    },
    UpdateOutput {
        id: u8,
        update: OutputUpdate,
    },
    ToggleOutput {
        id: u8,
    },
    ToggleOverride {
        id: u8,
    },
    ListInputs,
    UpdateInput {
        id: u8,
        update: InputUpdate,
    },
    GetSensors,
    GetStatus,
    Subscribe {
        strategy: EventFilterStrategy,
        filters: Vec<EventFilterEntry>,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ApiResponse {
    pub ok: bool,
    pub status: u16,
    pub error: Option<String>,
    pub result: Option<ApiResult>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum ApiResult {
    Output(Output),
    Outputs(Vec<Output>),
    Input(Input),
    Inputs(Vec<Input>),
    Sensors(HashMap<SensorChannel, f64>),
    Status {
        outputs: Vec<Output>,
        inputs: Vec<Input>,
        sensors: HashMap<SensorChannel, f64>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    Subscribed,
}

impl ApiResponse {
    pub fn from_result(result: ApiResult) -> Self {
        ApiResponse {
            ok: true,
            status: StatusCode::OK.as_u16(),
            error: None,
            result: Some(result),
        }
    }

    pub fn from_status(status: StatusCode) -> Self {
        ApiResponse {
            ok: status.is_success(),
            status: status.as_u16(),
            error: if status.is_success() {
                None
            } else {
                status.canonical_reason().map(|r| r.to_string())
            },
            result: None,
        }
    }

    pub fn from_error(status: StatusCode, e: impl std::fmt::Display) -> Self {
        ApiResponse {
            ok: false,
            status: status.as_u16(),
            error: Some(format!("{}", e)),
            result: None,
        }
    }
}

impl From<StatusCode> for ApiResponse {
    fn from(status: StatusCode) -> Self {
        ApiResponse::from_status(status)
    }
}

impl From<ApiResult> for ApiResponse {
    fn from(res: ApiResult) -> Self {
        ApiResponse::from_result(res)
    }
}

impl From<StoreError> for ApiResponse {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { .. } => ApiResponse::from_error(StatusCode::NOT_FOUND, e),
            StoreError::InvalidConfig(_) => ApiResponse::from_error(StatusCode::BAD_REQUEST, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let resp: ApiResponse = StoreError::NotFound { id: 9 }.into();
        assert!(!resp.ok);
        assert_eq!(resp.status, 404);
        assert!(resp.error.unwrap().contains("9"));
    }

    #[test]
    fn invalid_config_maps_to_400() {
        let resp: ApiResponse = StoreError::InvalidConfig("bad schedule".into()).into();
        assert!(!resp.ok);
        assert_eq!(resp.status, 400);
    }

    #[test]
    fn request_frames_round_trip() {
        let msg = Message::Request {
            id: 7,
            inner: Request::GetOutput { id: 3 },
        };
        let bytes = serde_json::to_vec(&msg).unwrap();
        let back: Message = serde_json::from_slice(&bytes).unwrap();
        match back {
            Message::Request {
                id: 7,
                inner: Request::GetOutput { id: 3 },
            } => {}
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}
