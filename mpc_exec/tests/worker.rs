//! Worker tests, serving simulator frames over in-process sockets.

use std::time::Duration;

use comms_if::net::{zmq, SocketOptions};
use mpc_lib::{
    driver::{ControlLoopDriver, NoLatency},
    traj_ctrl::{mpc::GaussNewtonSolver, Params, TrajCtrl},
    worker::Worker,
};

const TELEMETRY_FRAME: &str = "42[\"telemetry\",{\"ptsx\":[10.0,20.0,30.0],\
    \"ptsy\":[0.0,0.0,0.0],\"x\":0.0,\"y\":0.0,\"psi\":0.0,\"speed\":20.0,\
    \"throttle\":0.0,\"steering_angle\":0.0}]";

fn socket_options() -> SocketOptions {
    SocketOptions {
        linger: 0,
        recv_timeout: 1000,
        send_timeout: 1000,
        ..SocketOptions::server()
    }
}

fn worker(ctx: &zmq::Context, endpoint: &str) -> Worker<NoLatency> {
    let mut params: Params =
        util::params::from_toml_str(include_str!("../../params/traj_ctrl.toml")).unwrap();
    params.poly_order = 2;
    params.mpc.max_solve_time_ms = 10_000.0;

    let tc = TrajCtrl::with_params(params, GaussNewtonSolver::default()).unwrap();
    let driver = ControlLoopDriver::new(tc, NoLatency, Duration::from_millis(0));

    Worker::new(ctx, endpoint, &socket_options(), driver).unwrap()
}

fn client(ctx: &zmq::Context, endpoint: &str) -> zmq::Socket {
    let socket = ctx.socket(zmq::REQ).unwrap();
    socket.set_linger(0).unwrap();
    socket.set_rcvtimeo(5000).unwrap();
    socket.connect(endpoint).unwrap();
    socket
}

fn recv_reply(socket: &zmq::Socket) -> String {
    let msg = socket.recv_msg(0).unwrap();
    msg.as_str().unwrap().to_string()
}

#[test]
fn test_serve_telemetry() {
    let ctx = zmq::Context::new();
    let endpoint = "inproc://worker_serve";
    let mut w = worker(&ctx, endpoint);
    let c = client(&ctx, endpoint);

    c.send(TELEMETRY_FRAME, 0).unwrap();
    assert!(w.serve_once().unwrap());
    assert!(recv_reply(&c).starts_with("42[\"steer\","));

    c.send("42[\"telemetry\",null]", 0).unwrap();
    assert!(w.serve_once().unwrap());
    assert_eq!(recv_reply(&c), "42[\"manual\",{}]");

    assert_eq!(w.driver().num_cycles(), 1);
    assert_eq!(w.num_rebinds(), 0);
}

#[test]
fn test_rebind_after_unanswered_frame() {
    let ctx = zmq::Context::new();
    let endpoint = "inproc://worker_rebind";
    let mut w = worker(&ctx, endpoint);

    // Take a frame without replying, leaving the socket unable to receive
    let stale = client(&ctx, endpoint);
    stale.send(TELEMETRY_FRAME, 0).unwrap();
    let frame = w.server_mut().unwrap().recv_frame().unwrap();
    assert_eq!(frame.as_deref(), Some(TELEMETRY_FRAME));

    // The worker rebinds instead of stopping
    assert!(!w.serve_once().unwrap());
    assert_eq!(w.num_rebinds(), 1);

    // And serves new connections on the same endpoint
    let c = client(&ctx, endpoint);
    c.send(TELEMETRY_FRAME, 0).unwrap();
    assert!(w.serve_once().unwrap());
    assert!(recv_reply(&c).starts_with("42[\"steer\","));
    assert_eq!(w.driver().num_cycles(), 1);
}
