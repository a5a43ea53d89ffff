//! End-to-end relay over loopback UDP with synthetic devices

use parking_lot::Mutex;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use vox_relay::audio::{AudioBackend, InputStream, OutputStream, StreamParams, ToneSource, WriteOutcome};
use vox_relay::codec::FrameEncoder;
use vox_relay::config::AppConfig;
use vox_relay::error::{AudioError, SinkError};
use vox_relay::network::Endpoint;
use vox_relay::session::{SessionController, SessionRequest, SessionState, ThreadLauncher};
use vox_relay::sink::{RoutingDefaults, SinkHandle, SinkLifecycle, SinkProvisioner};

type Played = Arc<Mutex<Vec<Vec<i16>>>>;

/// Tone in, recorder out
struct LoopbackBackend {
    played: Played,
}

struct Recorder {
    played: Played,
}

impl OutputStream for Recorder {
    fn write_block(&mut self, samples: &[i16], _timeout: Duration) -> Result<WriteOutcome, AudioError> {
        self.played.lock().push(samples.to_vec());
        Ok(WriteOutcome::Written)
    }
}

impl AudioBackend for LoopbackBackend {
    fn open_input(&self, params: &StreamParams) -> Result<Box<dyn InputStream>, AudioError> {
        Ok(Box::new(ToneSource::new(params)))
    }

    fn open_output(&self, _params: &StreamParams) -> Result<Box<dyn OutputStream>, AudioError> {
        Ok(Box::new(Recorder {
            played: self.played.clone(),
        }))
    }
}

/// Reports the sink as already present so nothing is ever changed
struct PresentSink;

impl SinkProvisioner for PresentSink {
    fn probe(&self, _name: &str) -> Result<bool, SinkError> {
        Ok(true)
    }

    fn create(&self, name: &str) -> Result<SinkHandle, SinkError> {
        Err(SinkError::CreateFailed {
            name: name.to_string(),
            reason: "unexpected".to_string(),
        })
    }

    fn read_defaults(&self) -> Result<RoutingDefaults, SinkError> {
        Ok(RoutingDefaults::default())
    }

    fn set_default_sink(&self, _name: &str) -> Result<(), SinkError> {
        Ok(())
    }

    fn set_default_source(&self, _name: &str) -> Result<(), SinkError> {
        Ok(())
    }

    fn remove(&self, _handle: &SinkHandle) -> Result<(), SinkError> {
        Ok(())
    }
}

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.audio.frames_per_chunk = 256;
    config.session.receive_timeout_ms = 100;
    config.session.grace_period_ms = 1000;
    config.session.auto_sink = true;
    config
}

fn controller(config: &Arc<AppConfig>, played: &Played, target: SessionRequest) -> SessionController {
    let backend = Arc::new(LoopbackBackend { played: played.clone() });
    SessionController::new(
        config.clone(),
        Box::new(ThreadLauncher::new(config.clone(), backend)),
        SinkLifecycle::new(Box::new(PresentSink), "vox_meter"),
        target,
    )
}

fn free_port() -> u16 {
    UdpSocket::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn test_tone_is_relayed_between_sessions() {
    let config = Arc::new(test_config());
    let played: Played = Arc::new(Mutex::new(Vec::new()));
    let port = free_port();
    let listen = Endpoint::new("127.0.0.1".parse().unwrap(), port);

    let mut listener = controller(&config, &played, SessionRequest::receive(listen));
    let mut sender = controller(&config, &played, SessionRequest::send(listen));

    listener.toggle().unwrap();
    sender.toggle().unwrap();
    assert_eq!(listener.state(), SessionState::Running);
    assert_eq!(sender.state(), SessionState::Running);

    assert!(wait_for(|| played.lock().len() >= 5), "no audio arrived");

    let started = Instant::now();
    sender.toggle().unwrap();
    listener.toggle().unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(sender.state(), SessionState::Idle);
    assert_eq!(listener.state(), SessionState::Idle);

    let played = played.lock();
    assert!(played.iter().all(|block| block.len() == 512));
    // the first tone blocks are a 440 Hz burst, not silence
    assert!(played[0].iter().any(|&s| s != 0));
}

#[test]
fn test_listener_survives_foreign_traffic() {
    let config = Arc::new(test_config());
    let played: Played = Arc::new(Mutex::new(Vec::new()));
    let port = free_port();
    let listen = Endpoint::new("127.0.0.1".parse().unwrap(), port);

    let mut listener = controller(&config, &played, SessionRequest::receive(listen));
    listener.toggle().unwrap();

    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let target: SocketAddr = listen.socket_addr();
    socket.send_to(b"not audio", target).unwrap();
    socket.send_to(&[0u8; 1025], target).unwrap();

    let mut encoder = FrameEncoder::new(config.audio.layout());
    let block = encoder.encode(&[1234; 512]).unwrap();
    socket.send_to(&block, target).unwrap();

    assert!(wait_for(|| !played.lock().is_empty()), "valid block was not played");
    assert!(!listener.poll(), "listener should still be running");
    listener.stop().unwrap();

    let played = played.lock();
    assert_eq!(played.len(), 1);
    assert!(played[0].iter().all(|&s| s == 1234));
}

#[test]
fn test_second_listener_on_same_port_fails_to_start() {
    let config = Arc::new(test_config());
    let played: Played = Arc::new(Mutex::new(Vec::new()));
    let port = free_port();
    let listen = Endpoint::new("127.0.0.1".parse().unwrap(), port);

    let mut first = controller(&config, &played, SessionRequest::receive(listen));
    let mut second = controller(&config, &played, SessionRequest::receive(listen));

    first.toggle().unwrap();
    let result = second.toggle();

    assert!(result.is_err());
    assert_eq!(second.state(), SessionState::Idle);
    assert_eq!(first.state(), SessionState::Running);
    first.stop().unwrap();
}
