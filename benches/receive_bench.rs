//! Benchmarks for the receive-side buffer path: engine deliveries filling
//! the in-flight request, spilling into the pending buffer, and draining
//! back out through `receive` under different chunk/read size ratios.

use std::rc::Rc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use ssh_transport::auth::PromptKind;
use ssh_transport::engine::{
    Engine, EngineCallbacks, EngineOptions, EventKind, HandleId, NetworkEvents, Prompt,
    SelectEvent, SocketId, SpecialCode, WaitStatus,
};
use ssh_transport::error::Result;
use ssh_transport::hostkey::HostKeyStore;
use ssh_transport::session::SecureSession;
use ssh_transport::ui::{
    HostKeyDecision, HostKeyPrompt, PollStatus, SessionUi, TimeoutAnswer, TimeoutQuery,
};
use ssh_transport::{ClientConfig, SessionConfig};

/// Bytes read per benchmark iteration.
const TOTAL: usize = 64 * 1024;

/// An engine that always has another chunk of payload ready.
struct FeedEngine {
    chunk: Vec<u8>,
}

impl Engine for FeedEngine {
    fn init(
        &mut self,
        _options: &EngineOptions,
        callbacks: &mut dyn EngineCallbacks,
    ) -> std::result::Result<String, String> {
        callbacks.update_socket(Some(SocketId(1)), true);
        Ok("bench.local".to_string())
    }

    fn free(&mut self) {}

    fn send(&mut self, _data: &[u8], _callbacks: &mut dyn EngineCallbacks) -> Result<usize> {
        Ok(0)
    }

    fn send_buffer_size(&mut self) -> usize {
        0
    }

    fn special(&mut self, _code: SpecialCode, _callbacks: &mut dyn EngineCallbacks) -> Result<()> {
        Ok(())
    }

    fn exit_code(&self) -> Option<i32> {
        None
    }

    fn session_started(&self) -> bool {
        true
    }

    fn is_closed(&self) -> bool {
        false
    }

    fn used_fallback_command(&self) -> bool {
        false
    }

    fn wait_handles(&mut self) -> Vec<HandleId> {
        Vec::new()
    }

    fn socket_event_handle(&self) -> HandleId {
        HandleId(1)
    }

    fn wait(&mut self, _handles: &[HandleId], _timeout: Duration) -> WaitStatus {
        WaitStatus::Handle(HandleId(1))
    }

    fn handle_signalled(
        &mut self,
        _handle: HandleId,
        _callbacks: &mut dyn EngineCallbacks,
    ) -> Result<bool> {
        Ok(false)
    }

    fn enumerate_socket_events(&mut self, _socket: SocketId) -> NetworkEvents {
        let mut events = NetworkEvents::default();
        events.set(EventKind::Read, 0);
        events
    }

    fn select_result(
        &mut self,
        _socket: SocketId,
        event: SelectEvent,
        callbacks: &mut dyn EngineCallbacks,
    ) -> Result<bool> {
        if event.kind == EventKind::Read {
            callbacks.from_backend(false, &self.chunk)?;
        }
        Ok(true)
    }

    fn toplevel_callback_pending(&self) -> bool {
        false
    }

    fn run_toplevel_callbacks(&mut self, _callbacks: &mut dyn EngineCallbacks) -> Result<()> {
        Ok(())
    }

    fn poke_timer(&mut self, _callbacks: &mut dyn EngineCallbacks) {}

    fn protocol_version(&self) -> u32 {
        2
    }

    fn cipher_client_to_server(&self) -> String {
        "aes".to_string()
    }

    fn cipher_server_to_client(&self) -> String {
        "aes".to_string()
    }

    fn compression_client_to_server(&self) -> bool {
        false
    }

    fn compression_server_to_client(&self) -> bool {
        false
    }

    fn min_packet_size(&self) -> Option<u32> {
        None
    }

    fn max_packet_size(&self) -> Option<u32> {
        None
    }
}

struct NullUi;

impl SessionUi for NullUi {
    fn information(&self, _message: &str, _status: bool) {}
    fn display_banner(&self, _banner: &str) {}
    fn prompt_user(
        &self,
        _kind: PromptKind,
        _name: &str,
        _instructions: &str,
        _prompts: &[Prompt],
    ) -> Option<Vec<String>> {
        None
    }
    fn confirm_host_key(&self, _prompt: &HostKeyPrompt<'_>) -> HostKeyDecision {
        HostKeyDecision::Reject
    }
    fn confirm_algorithm(&self, _alg_type: &str, _alg_name: &str) -> bool {
        true
    }
    fn query_timeout(
        &self,
        _query: &TimeoutQuery,
        _poll: &mut dyn FnMut() -> PollStatus,
    ) -> TimeoutAnswer {
        TimeoutAnswer::Abort
    }
    fn closed(&self) {}
}

struct NullStore;

impl HostKeyStore for NullStore {
    fn retrieve(&self, _host: &str, _port: u16, _key_type: &str) -> Option<String> {
        None
    }

    fn store(&self, _host: &str, _port: u16, _key_type: &str, _keys: &str) -> Result<()> {
        Ok(())
    }
}

fn feed_session(chunk_size: usize) -> SecureSession<FeedEngine> {
    let engine = FeedEngine {
        chunk: vec![0xA5; chunk_size],
    };
    let mut session = SecureSession::new(
        engine,
        SessionConfig::new("bench.local"),
        ClientConfig::default(),
        Rc::new(NullUi),
        Box::new(NullStore),
    );
    session.open().expect("bench session open");
    session
}

/// Many small deliveries filling one large read: dominated by the
/// out-request fill path and per-event dispatch.
/// One large delivery serving many small reads: dominated by pending-buffer
/// growth, spill, and front-drain shifting.
fn bench_receive(c: &mut Criterion) {
    let mut group = c.benchmark_group("receive");
    group.throughput(Throughput::Bytes(TOTAL as u64));

    for &(chunk_size, read_size) in &[
        (64usize, 4096usize),
        (1024, 4096),
        (16 * 1024, 512),
        (16 * 1024, 16 * 1024),
    ] {
        let label = format!("chunk{chunk_size}_read{read_size}");
        group.bench_with_input(
            BenchmarkId::new("chunked", label),
            &(chunk_size, read_size),
            |b, &(chunk_size, read_size)| {
                let mut session = feed_session(chunk_size);
                let mut buf = vec![0u8; read_size];
                b.iter(|| {
                    for _ in 0..(TOTAL / read_size) {
                        session.receive(black_box(&mut buf)).unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_receive);
criterion_main!(benches);
