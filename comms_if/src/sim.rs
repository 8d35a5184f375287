//! # Simulator Interface
//!
//! Message definitions and event framing for the vehicle simulator.
//!
//! The simulator speaks in socket.io style text frames. An event frame starts with `42`, where
//! the `4` marks a message and the `2` marks an event, followed by a JSON array of
//! `[event_name, data]`:
//!
//! ```text
//! 42["telemetry",{"ptsx":[...],"ptsy":[...],"x":1.0,...}]
//! ```
//!
//! Replies use the same framing, either a `steer` event carrying a [`SteerCmd`] or an empty
//! `manual` event when there was no telemetry to act on.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Prefix marking a socket.io event message.
pub const EVENT_PREFIX: &str = "42";

/// Name of the telemetry event sent by the simulator.
pub const TELEMETRY_EVENT: &str = "telemetry";

/// Name of the steering event sent back to the simulator.
pub const STEER_EVENT: &str = "steer";

/// Reply sent when there is no telemetry in an event, handing control back to the driver.
pub const MANUAL_FRAME: &str = "42[\"manual\",{}]";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A telemetry snapshot from the simulator.
///
/// All fields are required, a snapshot missing any of them is rejected as malformed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Telemetry {
    /// Global x coordinates of the reference waypoints, in path order
    pub ptsx: Vec<f64>,

    /// Global y coordinates of the reference waypoints, in path order
    pub ptsy: Vec<f64>,

    /// Global x position of the vehicle
    pub x: f64,

    /// Global y position of the vehicle
    pub y: f64,

    /// Heading of the vehicle in radians
    pub psi: f64,

    /// Current speed of the vehicle
    pub speed: f64,

    /// Previously applied throttle, in [-1, 1]
    pub throttle: f64,

    /// Previously applied steering, in [-1, 1]
    pub steering_angle: f64,
}

/// A steering command sent back to the simulator.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SteerCmd {
    /// Normalised steering demand in [-1, 1], 1 being the maximum physical steering angle
    pub steering_angle: f64,

    /// Throttle demand in [-1, 1], negative values brake
    pub throttle: f64,

    /// Predicted trajectory x coordinates, vehicle body frame
    pub mpc_x: Vec<f64>,

    /// Predicted trajectory y coordinates, vehicle body frame
    pub mpc_y: Vec<f64>,

    /// Reference curve sample x coordinates, vehicle body frame
    pub next_x: Vec<f64>,

    /// Reference curve sample y coordinates, vehicle body frame
    pub next_y: Vec<f64>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// An event decoded from a simulator frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    /// A telemetry snapshot, one control cycle should be run.
    Telemetry(Telemetry),

    /// The event carried no data, the vehicle should be left in manual control.
    NoData,

    /// An event which isn't handled by the controller.
    Other(String),
}

/// Errors which can occur while decoding a simulator frame.
#[derive(thiserror::Error, Debug)]
pub enum SimFrameError {
    #[error("The event payload is not valid JSON: {0}")]
    InvalidJson(serde_json::Error),

    #[error("The event payload is not an array starting with an event name")]
    InvalidPayload,

    #[error("The telemetry is missing fields or could not be parsed: {0}")]
    InvalidTelemetry(serde_json::Error),

    #[error("Could not serialize the steering command: {0}")]
    SerializationError(serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SteerCmd {
    /// A command with zero steering and throttle and no visualisation data.
    pub fn neutral() -> Self {
        Self::from_actuation(0.0, 0.0)
    }

    /// A command from a steering and throttle pair, without visualisation data.
    pub fn from_actuation(steering_angle: f64, throttle: f64) -> Self {
        Self {
            steering_angle,
            throttle,
            mpc_x: Vec::new(),
            mpc_y: Vec::new(),
            next_x: Vec::new(),
            next_y: Vec::new(),
        }
    }

    /// Encode this command as a `steer` event frame.
    pub fn to_frame(&self) -> Result<String, SimFrameError> {
        let payload = serde_json::to_string(&(STEER_EVENT, self))
            .map_err(SimFrameError::SerializationError)?;

        Ok(format!("{}{}", EVENT_PREFIX, payload))
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Decode a frame received from the simulator.
///
/// Returns `Ok(None)` if the frame is not an event message at all, in which case it should be
/// ignored.
pub fn parse_frame(frame: &str) -> Result<Option<SimEvent>, SimFrameError> {
    if frame.len() <= EVENT_PREFIX.len() || !frame.starts_with(EVENT_PREFIX) {
        return Ok(None);
    }

    let payload = match extract_payload(frame) {
        Some(p) => p,
        None => return Ok(Some(SimEvent::NoData)),
    };

    let value: Value = serde_json::from_str(payload).map_err(SimFrameError::InvalidJson)?;

    let (name, data) = match value {
        Value::Array(mut items) if !items.is_empty() => {
            let data = if items.len() > 1 {
                items.swap_remove(1)
            } else {
                Value::Null
            };

            match items.swap_remove(0) {
                Value::String(name) => (name, data),
                _ => return Err(SimFrameError::InvalidPayload),
            }
        }
        _ => return Err(SimFrameError::InvalidPayload),
    };

    if name == TELEMETRY_EVENT {
        serde_json::from_value(data)
            .map(|t| Some(SimEvent::Telemetry(t)))
            .map_err(SimFrameError::InvalidTelemetry)
    } else {
        Ok(Some(SimEvent::Other(name)))
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Get the JSON array out of an event frame.
///
/// `None` is returned if the frame has no data, which is the case if it contains a `null` or if
/// there's no `[ ... }]` section.
fn extract_payload(frame: &str) -> Option<&str> {
    if frame.contains("null") {
        return None;
    }

    let start = frame.find('[')?;
    let end = frame.rfind("}]")?;

    if end < start {
        return None;
    }

    Some(&frame[start..end + 2])
}

#[cfg(test)]
mod test {
    use super::*;

    const TELEMETRY_FRAME: &str = "42[\"telemetry\",{\"ptsx\":[10.0,20.0,30.0],\
        \"ptsy\":[0.0,0.0,0.0],\"x\":0.0,\"y\":0.0,\"psi\":0.0,\"speed\":5.0,\
        \"throttle\":0.1,\"steering_angle\":-0.05}]";

    #[test]
    fn test_parse_telemetry() {
        let event = parse_frame(TELEMETRY_FRAME).unwrap().unwrap();

        match event {
            SimEvent::Telemetry(t) => {
                assert_eq!(t.ptsx, vec![10.0, 20.0, 30.0]);
                assert_eq!(t.ptsy, vec![0.0, 0.0, 0.0]);
                assert_eq!(t.speed, 5.0);
                assert_eq!(t.steering_angle, -0.05);
            }
            e => panic!("Expected telemetry, got {:?}", e),
        }
    }

    #[test]
    fn test_parse_non_event() {
        assert!(parse_frame("").unwrap().is_none());
        assert!(parse_frame("42").unwrap().is_none());
        assert!(parse_frame("0{\"sid\":\"abc\"}").unwrap().is_none());
    }

    #[test]
    fn test_parse_no_data() {
        assert_eq!(parse_frame("42[\"telemetry\",null]").unwrap(), Some(SimEvent::NoData));
        assert_eq!(parse_frame("42[\"telemetry\"]").unwrap(), Some(SimEvent::NoData));
    }

    #[test]
    fn test_parse_missing_field() {
        let frame = "42[\"telemetry\",{\"ptsy\":[0.0],\"x\":0.0,\"y\":0.0,\"psi\":0.0,\
            \"speed\":5.0,\"throttle\":0.1,\"steering_angle\":0.0}]";

        match parse_frame(frame) {
            Err(SimFrameError::InvalidTelemetry(_)) => (),
            r => panic!("Expected invalid telemetry, got {:?}", r),
        }
    }

    #[test]
    fn test_parse_other_event() {
        assert_eq!(
            parse_frame("42[\"reset\",{}]").unwrap(),
            Some(SimEvent::Other("reset".into()))
        );
        match parse_frame("42[7,{}]") {
            Err(SimFrameError::InvalidPayload) => (),
            r => panic!("Expected invalid payload, got {:?}", r),
        }
    }

    #[test]
    fn test_steer_frame() {
        let mut cmd = SteerCmd::from_actuation(0.25, -0.5);
        cmd.mpc_x = vec![1.0];
        cmd.mpc_y = vec![0.0];

        let frame = cmd.to_frame().unwrap();
        assert!(frame.starts_with("42[\"steer\",{"));
        assert!(frame.ends_with("}]"));

        let value: Value = serde_json::from_str(&frame[2..]).unwrap();
        let decoded: SteerCmd = serde_json::from_value(value[1].clone()).unwrap();
        assert_eq!(decoded, cmd);
    }
}
