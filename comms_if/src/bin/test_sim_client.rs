//! Simple simulator client test
//!
//! Sends telemetry frames for a vehicle approaching a gently curving road to a running
//! `mpc_exec` and prints the steering replies.

use comms_if::{
    net::{MonitoredSocket, SocketOptions},
    sim::{Telemetry, EVENT_PREFIX, TELEMETRY_EVENT},
};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "test_sim_client")]
struct Opt {
    /// Endpoint of the controller's simulator socket
    #[structopt(short, long, default_value = "tcp://localhost:4567")]
    endpoint: String,

    /// Number of frames to send
    #[structopt(short, long, default_value = "10")]
    num_frames: usize,

    /// Vehicle speed to report
    #[structopt(short, long, default_value = "20.0")]
    speed: f64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    let ctx = zmq::Context::new();

    let socket_options = SocketOptions {
        connect_timeout: 1000,
        linger: 1,
        recv_timeout: 5000,
        send_timeout: 1000,
        ..Default::default()
    };

    let socket = match MonitoredSocket::new(&ctx, zmq::REQ, &socket_options, &opt.endpoint) {
        Ok(s) => s,
        Err(e) => {
            println!("Could not connect to the controller");
            return Err(e.into());
        }
    };

    for i in 0..opt.num_frames {
        // Waypoints along y = 0.01 x^2, with the vehicle moving up the road each frame
        let x = i as f64;
        let ptsx: Vec<f64> = (0..6).map(|k| x + 10.0 * k as f64).collect();
        let ptsy: Vec<f64> = ptsx.iter().map(|px| 0.01 * px * px).collect();

        let telemetry = Telemetry {
            ptsx,
            ptsy,
            x,
            y: 0.01 * x * x,
            psi: (0.02 * x).atan(),
            speed: opt.speed,
            throttle: 0.0,
            steering_angle: 0.0,
        };

        let frame = format!(
            "{}{}",
            EVENT_PREFIX,
            serde_json::to_string(&(TELEMETRY_EVENT, &telemetry))?
        );

        socket.send(frame.as_str(), 0)?;

        let msg = socket.recv_msg(0)?;
        match msg.as_str() {
            Some(r) => println!("[{}] response: {}", i, r),
            None => println!("[{}] non UTF-8 response", i),
        }
    }

    Ok(())
}
